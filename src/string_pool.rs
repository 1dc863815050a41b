//! The process-wide string pool. Class names and string literals are
//! interned here and referred to by index everywhere else, which turns the
//! object->class->superclass reference cycles into plain lookups.
//!
//! The pool is append-only for the life of the process: entries never move
//! and are never removed, so a fetched `&'static str` stays valid forever.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::types;

/// Sentinel index meaning "no string".
pub const INVALID: u32 = u32::MAX;
/// Index of `"java/lang/Object"`, preloaded by `init`.
pub const OBJECT: u32 = 0;
/// Index of `"java/lang/String"`, preloaded by `init`.
pub const STRING: u32 = 1;

struct Pool {
    entries: Vec<&'static str>,
    index: HashMap<&'static str, u32>,
}

fn pool() -> &'static Mutex<Pool> {
    static POOL: OnceLock<Mutex<Pool>> = OnceLock::new();
    POOL.get_or_init(|| {
        let mut p = Pool {
            entries: Vec::new(),
            index: HashMap::new(),
        };
        for base in [types::OBJECT_CLASS_NAME, types::STRING_CLASS_NAME] {
            let leaked: &'static str = Box::leak(base.to_string().into_boxed_str());
            p.index.insert(leaked, p.entries.len() as u32);
            p.entries.push(leaked);
        }
        Mutex::new(p)
    })
}

/// Seeds the reserved entries. Idempotent; safe to call from any init path.
pub fn init() {
    let _ = pool();
}

/// Interns `s`, returning its index. A string already present returns the
/// existing index; the whole operation is atomic with respect to concurrent
/// interns of the same string.
pub fn intern(s: &str) -> u32 {
    let mut p = pool().lock().unwrap();
    if let Some(&idx) = p.index.get(s) {
        return idx;
    }
    let leaked: &'static str = Box::leak(s.to_string().into_boxed_str());
    let idx = p.entries.len() as u32;
    p.index.insert(leaked, idx);
    p.entries.push(leaked);
    idx
}

/// Fetches the string at `idx`. Returns `None` for `INVALID` or any index
/// the pool has never handed out.
pub fn get(idx: u32) -> Option<&'static str> {
    if idx == INVALID {
        return None;
    }
    pool().lock().unwrap().entries.get(idx as usize).copied()
}

pub fn size() -> usize {
    pool().lock().unwrap().entries.len()
}
