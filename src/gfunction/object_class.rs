//! Intrinsics for java/lang/Object.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use rand::Rng;

use crate::gfunction::{arg_obj, GMeth, GfResult};
use crate::object::{self, Field, FieldValue, JvmValue};

pub fn load(map: &mut HashMap<String, GMeth>) {
    map.insert(
        "java/lang/Object.<init>()V".to_string(),
        GMeth::new(0, object_init),
    );
    map.insert(
        "java/lang/Object.hashCode()I".to_string(),
        GMeth::new(0, object_hash_code),
    );
    map.insert(
        "java/lang/Object.getClass()Ljava/lang/Class;".to_string(),
        GMeth::new(0, object_get_class),
    );
    map.insert(
        "java/lang/Object.toString()Ljava/lang/String;".to_string(),
        GMeth::new(0, object_to_string),
    );
}

fn object_init(_args: &mut [JvmValue]) -> GfResult {
    GfResult::Void
}

/// Process-wide salt so identity hashes do not leak raw heap addresses.
fn hash_salt() -> u64 {
    static SALT: OnceLock<u64> = OnceLock::new();
    *SALT.get_or_init(|| rand::thread_rng().gen())
}

fn identity_hash(r: &object::ObjRef) -> i64 {
    let addr = Arc::as_ptr(r) as u64;
    i64::from((addr ^ hash_salt()) as u32 as i32)
}

fn object_hash_code(args: &mut [JvmValue]) -> GfResult {
    match arg_obj(args, 0) {
        Ok(r) => GfResult::Val(JvmValue::Int(identity_hash(&r))),
        Err(e) => GfResult::Err(e),
    }
}

fn object_get_class(args: &mut [JvmValue]) -> GfResult {
    let r = match arg_obj(args, 0) {
        Ok(r) => r,
        Err(e) => return GfResult::Err(e),
    };
    let class_name = r.lock().unwrap().klass_name().to_string();
    let mut class_obj = object::Object::with_class("java/lang/Class");
    class_obj.set_field(
        "name",
        Field::new(
            "Ljava/lang/String;",
            FieldValue::Ref(object::make_ref(object::string_object_from_str(&class_name))),
        ),
    );
    GfResult::Val(object::make_ref(class_obj))
}

fn object_to_string(args: &mut [JvmValue]) -> GfResult {
    let r = match arg_obj(args, 0) {
        Ok(r) => r,
        Err(e) => return GfResult::Err(e),
    };
    let name = r.lock().unwrap().klass_name().to_string();
    let rendered = format!("{name}@{:08x}", identity_hash(&r));
    GfResult::Val(object::make_ref(object::string_object_from_str(&rendered)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;

    #[test]
    fn identity_hash_is_stable_per_object() {
        let a = object::make_ref(Object::new_empty());
        let r = a.as_ref().unwrap();
        assert_eq!(identity_hash(&r), identity_hash(&r));
        let b = object::make_ref(Object::new_empty());
        // different objects should essentially never collide
        assert_ne!(identity_hash(&r), identity_hash(&b.as_ref().unwrap()));
    }

    #[test]
    fn to_string_includes_class_name() {
        let mut args = [object::make_ref(Object::with_class("test/Painter"))];
        match object_to_string(&mut args) {
            GfResult::Val(JvmValue::Ref(r)) => {
                let s = object::string_from_string_object(&r.lock().unwrap()).unwrap();
                assert!(s.starts_with("test/Painter@"));
            }
            _ => panic!("toString should produce a String ref"),
        }
    }
}
