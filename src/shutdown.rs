//! Orderly process teardown with a classified exit status.

use tracing::info;

use crate::{globals, statics};

pub type ExitStatus = i32;

pub const OK: ExitStatus = 0;
pub const JVM_EXCEPTION: ExitStatus = 1;
pub const APP_EXCEPTION: ExitStatus = 2;
pub const TEST_OK: ExitStatus = 3;
pub const TEST_ERR: ExitStatus = 4;
pub const UNKNOWN_ERROR: ExitStatus = 5;

/// Ends the process with `status`. In test mode no exit happens: the
/// classified status is mapped to 0/1 and returned so tests can assert on it.
pub fn exit(status: ExitStatus) -> i32 {
    let glob = globals::get_global();
    info!("shutdown requested, status {status}");

    if glob.is_test() {
        return if status == OK { 0 } else { 1 };
    }

    if status != OK {
        statics::dump_statics();
    }
    std::process::exit(status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals;

    #[test]
    fn test_mode_returns_instead_of_exiting() {
        globals::init_globals("test");
        assert_eq!(exit(OK), 0);
        assert_eq!(exit(JVM_EXCEPTION), 1);
        assert_eq!(exit(UNKNOWN_ERROR), 1);
    }
}
