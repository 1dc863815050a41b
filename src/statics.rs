//! Class-scoped static variables, keyed `"Class.field"` in one process-wide
//! mutex-guarded table.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use tracing::warn;

use crate::object::FieldValue;

#[derive(Debug, Clone)]
pub struct Static {
    /// Field-descriptor tag of the value.
    pub t: String,
    pub value: FieldValue,
}

fn table() -> &'static Mutex<HashMap<String, Static>> {
    static TABLE: OnceLock<Mutex<HashMap<String, Static>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Inserts or overwrites the static named `"Class.field"`.
pub fn add_static(name: &str, t: &str, value: FieldValue) {
    table().lock().unwrap().insert(
        name.to_string(),
        Static {
            t: t.to_string(),
            value,
        },
    );
}

/// The value of a static, or `None` when it was never defined.
pub fn get_static(name: &str) -> Option<Static> {
    table().lock().unwrap().get(name).cloned()
}

pub fn statics_count() -> usize {
    table().lock().unwrap().len()
}

/// Diagnostic dump used on abnormal shutdown.
pub fn dump_statics() {
    let tbl = table().lock().unwrap();
    let mut names: Vec<&String> = tbl.keys().collect();
    names.sort();
    for name in names {
        let s = &tbl[name];
        warn!("static {name}: {} = {:?}", s.t, s.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types;

    #[test]
    fn add_and_get() {
        add_static("test/Statics.answer", types::INT, FieldValue::Int(42));
        let s = get_static("test/Statics.answer").unwrap();
        assert_eq!(s.t, "I");
        assert!(matches!(s.value, FieldValue::Int(42)));
    }

    #[test]
    fn add_overwrites() {
        add_static("test/Statics.v", types::INT, FieldValue::Int(1));
        add_static("test/Statics.v", types::LONG, FieldValue::Int(2));
        let s = get_static("test/Statics.v").unwrap();
        assert_eq!(s.t, "J");
        assert!(matches!(s.value, FieldValue::Int(2)));
    }

    #[test]
    fn missing_static_is_none() {
        assert!(get_static("test/Statics.noSuchField").is_none());
    }
}
