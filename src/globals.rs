//! Process-wide VM state. Everything here is created by `init_globals` and
//! reached through `get_global`; tests re-run `init_globals("test")` to get
//! a fresh table set and to switch the exception/shutdown machinery into its
//! non-terminating test behavior.

use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use crate::thread::ThreadTable;

pub const VM_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct Globals {
    /// `"kava"` in normal operation, `"test"` under the test harness.
    pub vm_name: String,
    pub version: String,
    /// Base directory for caches (the jmod map blob). From `KAVA_HOME`.
    pub kava_home: Option<PathBuf>,
    pub threads: Mutex<ThreadTable>,
    pub main_trace: AtomicBool,
}

impl Globals {
    pub fn is_test(&self) -> bool {
        self.vm_name == "test"
    }
}

fn cell() -> &'static RwLock<Option<Arc<Globals>>> {
    static CELL: OnceLock<RwLock<Option<Arc<Globals>>>> = OnceLock::new();
    CELL.get_or_init(|| RwLock::new(None))
}

/// (Re)creates the global state. Called once at startup and at the top of
/// any test that needs a clean thread table.
pub fn init_globals(name: &str) -> Arc<Globals> {
    let g = Arc::new(Globals {
        vm_name: name.to_string(),
        version: VM_VERSION.to_string(),
        kava_home: env::var_os("KAVA_HOME").map(PathBuf::from),
        threads: Mutex::new(ThreadTable::new()),
        main_trace: AtomicBool::new(false),
    });
    *cell().write().unwrap() = Some(g.clone());
    g
}

pub fn get_global() -> Arc<Globals> {
    if let Some(g) = cell().read().unwrap().as_ref() {
        return g.clone();
    }
    init_globals("kava")
}

pub fn in_test_mode() -> bool {
    get_global().is_test()
}

pub fn trace_enabled() -> bool {
    get_global().main_trace.load(Ordering::Relaxed)
}

pub fn set_trace(on: bool) {
    get_global().main_trace.store(on, Ordering::Relaxed);
}
