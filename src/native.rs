//! The native-function bridge as the core consumes it. Dynamic loading and
//! the FFI trampoline live in a collaborator; this module keeps the library
//! table and the dispatch surface, and answers for natives that were never
//! connected.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use tracing::debug;

use crate::exceptions::ExcKind;
use crate::frame::FrameStack;
use crate::object::JvmValue;

#[derive(Debug, Clone)]
pub struct NativeErrBlk {
    pub exc_kind: ExcKind,
    pub msg: String,
}

pub enum NativeResult {
    Int(i64),
    Err(NativeErrBlk),
}

struct NativeTable {
    /// library path -> opaque handle (0 is never issued; it means failure)
    libraries: HashMap<String, u64>,
    next_handle: u64,
}

fn table() -> &'static Mutex<NativeTable> {
    static TABLE: OnceLock<Mutex<NativeTable>> = OnceLock::new();
    TABLE.get_or_init(|| {
        Mutex::new(NativeTable {
            libraries: HashMap::new(),
            next_handle: 1,
        })
    })
}

fn is_shared_library(name: &str) -> bool {
    name.ends_with(".so") || name.ends_with(".dylib") || name.ends_with(".dll")
}

/// Records the shared libraries under `dir`. Returns the number found.
/// Symbol extraction happens when a library is connected by the FFI
/// collaborator.
pub fn create_native_function_table(dir: &Path) -> usize {
    let Ok(listing) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut count = 0;
    let mut tbl = table().lock().unwrap();
    for entry in listing.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_shared_library(name) {
            let handle = tbl.next_handle;
            tbl.next_handle += 1;
            tbl.libraries.insert(path.display().to_string(), handle);
            count += 1;
        }
    }
    debug!("native table: {count} libraries under {}", dir.display());
    count
}

/// An opaque handle for `path`, or 0 when the library cannot be connected.
pub fn connect_library(path: &str) -> u64 {
    if !Path::new(path).is_file() || !is_shared_library(path) {
        return 0;
    }
    let mut tbl = table().lock().unwrap();
    if let Some(&h) = tbl.libraries.get(path) {
        return h;
    }
    let handle = tbl.next_handle;
    tbl.next_handle += 1;
    tbl.libraries.insert(path.to_string(), handle);
    handle
}

/// Dispatches a native method. With no FFI trampoline connected for the
/// symbol, the declared behavior is an error block the interpreter throws.
pub fn run_native_function(
    _fs: &mut FrameStack,
    class_name: &str,
    func_name: &str,
    descriptor: &str,
    _params: &[JvmValue],
    trace: bool,
) -> NativeResult {
    if trace {
        debug!("native dispatch requested: {class_name}.{func_name}{descriptor}");
    }
    NativeResult::Err(NativeErrBlk {
        exc_kind: ExcKind::UnsupportedOperation,
        msg: format!("native method not connected: {class_name}.{func_name}{descriptor}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connecting_a_missing_library_fails_with_zero() {
        assert_eq!(connect_library("/no/such/libthing.so"), 0);
        assert_eq!(connect_library("/etc/hostname"), 0);
    }

    #[test]
    fn unconnected_native_yields_error_block() {
        let mut fs = FrameStack::new(1);
        match run_native_function(&mut fs, "com/x/Y", "nativeOp", "()I", &[], false) {
            NativeResult::Err(e) => assert_eq!(e.exc_kind, ExcKind::UnsupportedOperation),
            NativeResult::Int(_) => panic!("should not succeed"),
        }
    }
}
