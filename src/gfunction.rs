//! The G-function registry: host implementations of Java methods, keyed by
//! `class.name+descriptor`. A G-function runs to completion without pushing
//! a frame; its return value lands on the caller's operand stack, and an
//! error block becomes a thrown exception.
//!
//! All intrinsics share one shape: an ordered slice of argument values in
//! (one per Java argument, longs and doubles already collapsed to a single
//! value), a single value or error block out. Argument checking is each
//! intrinsic's own business.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::exceptions::ExcKind;
use crate::frame::FrameStack;
use crate::object::{self, JvmValue};

pub mod object_class;
pub mod printstream;
pub mod string;
pub mod system;
pub mod throwable;

/// Error block an intrinsic hands back in place of a value.
#[derive(Debug, Clone)]
pub struct GErrBlk {
    pub exc_kind: ExcKind,
    pub msg: String,
}

impl GErrBlk {
    pub fn new(exc_kind: ExcKind, msg: impl Into<String>) -> Self {
        GErrBlk {
            exc_kind,
            msg: msg.into(),
        }
    }
}

/// What an intrinsic produced.
pub enum GfResult {
    Void,
    Val(JvmValue),
    /// Raw bytes; the interpreter wraps them into a `[B` array object.
    Bytes(Vec<u8>),
    Err(GErrBlk),
}

pub type GFunc = fn(&mut [JvmValue]) -> GfResult;
pub type GFuncCtx = fn(&mut FrameStack, &mut [JvmValue]) -> GfResult;

#[derive(Clone, Copy)]
pub enum GFunction {
    Plain(GFunc),
    /// Needs the caller's frame stack (stack-trace capture and the like).
    WithFrames(GFuncCtx),
}

#[derive(Clone, Copy)]
pub struct GMeth {
    /// Caller-side stack slots the arguments occupy (longs/doubles = 2).
    pub param_slots: usize,
    pub gfunction: GFunction,
    pub needs_context: bool,
}

impl GMeth {
    pub fn new(param_slots: usize, f: GFunc) -> Self {
        GMeth {
            param_slots,
            gfunction: GFunction::Plain(f),
            needs_context: false,
        }
    }

    pub fn with_context(param_slots: usize, f: GFuncCtx) -> Self {
        GMeth {
            param_slots,
            gfunction: GFunction::WithFrames(f),
            needs_context: true,
        }
    }
}

fn registry() -> &'static RwLock<HashMap<String, GMeth>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, GMeth>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Loads every intrinsic family into the registry. Idempotent.
pub fn register_all() {
    let mut map = registry().write().unwrap();
    if !map.is_empty() {
        return;
    }
    object_class::load(&mut map);
    string::load(&mut map);
    system::load(&mut map);
    throwable::load(&mut map);
    printstream::load(&mut map);
}

pub fn lookup(class: &str, name: &str, desc: &str) -> Option<GMeth> {
    registry()
        .read()
        .unwrap()
        .get(&format!("{class}.{name}{desc}"))
        .copied()
}

/// All registered signatures for one class, used when the classloader
/// populates a base class's method table.
pub fn signatures_for_class(class: &str) -> Vec<(String, String, GMeth)> {
    let prefix = format!("{class}.");
    registry()
        .read()
        .unwrap()
        .iter()
        .filter_map(|(key, g)| {
            let rest = key.strip_prefix(&prefix)?;
            let paren = rest.find('(')?;
            Some((rest[..paren].to_string(), rest[paren..].to_string(), *g))
        })
        .collect()
}

// === argument marshalling helpers shared by the intrinsic modules ===

pub fn arg_int(args: &[JvmValue], i: usize) -> Result<i64, GErrBlk> {
    match args.get(i) {
        Some(JvmValue::Int(v)) => Ok(*v),
        other => Err(GErrBlk::new(
            ExcKind::IllegalArgument,
            format!("expected int argument at slot {i}, got {other:?}"),
        )),
    }
}

pub fn arg_float(args: &[JvmValue], i: usize) -> Result<f64, GErrBlk> {
    match args.get(i) {
        Some(JvmValue::Float(v)) => Ok(*v),
        other => Err(GErrBlk::new(
            ExcKind::IllegalArgument,
            format!("expected float argument at slot {i}, got {other:?}"),
        )),
    }
}

pub fn arg_obj(args: &[JvmValue], i: usize) -> Result<object::ObjRef, GErrBlk> {
    match args.get(i) {
        Some(JvmValue::Ref(r)) => Ok(r.clone()),
        Some(JvmValue::Null) => Err(GErrBlk::new(
            ExcKind::NullPointer,
            format!("null reference in argument slot {i}"),
        )),
        other => Err(GErrBlk::new(
            ExcKind::IllegalArgument,
            format!("expected object argument at slot {i}, got {other:?}"),
        )),
    }
}

/// The host string behind a String-object argument.
pub fn arg_string(args: &[JvmValue], i: usize) -> Result<String, GErrBlk> {
    let r = arg_obj(args, i)?;
    let obj = r.lock().unwrap();
    object::string_from_string_object(&obj).ok_or_else(|| {
        GErrBlk::new(
            ExcKind::InvalidType,
            format!("argument slot {i} is not a String object"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup_by_signature() {
        register_all();
        assert!(lookup("java/lang/String", "length", "()I").is_some());
        assert!(lookup("java/lang/String", "length", "(I)I").is_none());
        assert!(lookup("java/lang/NoSuchClass", "length", "()I").is_none());
    }

    #[test]
    fn signatures_for_class_splits_name_and_descriptor() {
        register_all();
        let sigs = signatures_for_class("java/lang/String");
        assert!(sigs
            .iter()
            .any(|(name, desc, _)| name == "length" && desc == "()I"));
        assert!(sigs.iter().all(|(_, desc, _)| desc.starts_with('(')));
    }

    #[test]
    fn marshalling_helpers_reject_wrong_shapes() {
        let args = [JvmValue::Int(3), JvmValue::Null];
        assert_eq!(arg_int(&args, 0).unwrap(), 3);
        assert!(arg_float(&args, 0).is_err());
        assert!(matches!(
            arg_obj(&args, 1),
            Err(GErrBlk {
                exc_kind: ExcKind::NullPointer,
                ..
            })
        ));
        assert!(arg_int(&args, 5).is_err());
    }
}
