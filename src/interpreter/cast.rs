//! CHECKCAST / INSTANCEOF logic. The rules split on whether either side is
//! an array type; reference arrays apply the class rules recursively to
//! their component types.

use crate::classloader;
use crate::object::{JvmValue, Object};
use crate::string_pool;
use crate::types;

/// Whether `v` is an instance of `target`. Null is an instance of nothing.
pub fn instance_of(v: &JvmValue, target: &str) -> bool {
    match v {
        JvmValue::Ref(r) => passes_checkcast(&r.lock().unwrap(), target),
        _ => false,
    }
}

/// Whether a checkcast of `obj` to `target` succeeds.
pub fn passes_checkcast(obj: &Object, target: &str) -> bool {
    class_castable(obj.klass_name(), target)
}

fn is_primitive_tag(tag: &str) -> bool {
    !tag.starts_with(types::REF) && !tag.starts_with(types::ARRAY)
}

fn strip_ref(tag: &str) -> &str {
    tag.strip_prefix('L')
        .and_then(|t| t.strip_suffix(';'))
        .unwrap_or(tag)
}

/// The castability relation on internal names (class names or array tags).
pub fn class_castable(src: &str, target: &str) -> bool {
    if src == target {
        return true;
    }
    match (types::is_array_type(src), types::is_array_type(target)) {
        // two reference classes: target must sit on src's superclass chain
        (false, false) => classloader::is_subclass_of(
            string_pool::intern(src),
            string_pool::intern(target),
        ),
        // an array is only assignable to the class type java/lang/Object
        (true, false) => target == types::OBJECT_CLASS_NAME,
        (false, true) => false,
        (true, true) => {
            let sc = types::array_component(src);
            let tc = types::array_component(target);
            if is_primitive_tag(sc) || is_primitive_tag(tc) {
                return sc == tc;
            }
            if sc.starts_with(types::ARRAY) || tc.starts_with(types::ARRAY) {
                // multi-dimensional: recurse one level down
                return class_castable(sc, tc);
            }
            let sc = strip_ref(sc);
            let tc = strip_ref(tc);
            tc == types::OBJECT_CLASS_NAME || class_castable(sc, tc)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object;

    fn setup() {
        crate::globals::init_globals("test");
        classloader::init().unwrap();
        classloader::load_base_classes();
    }

    #[test]
    fn identity_and_object_always_pass() {
        setup();
        let s = object::string_object_from_str("hello world");
        assert!(passes_checkcast(&s, "java/lang/String"));
        assert!(passes_checkcast(&s, "java/lang/Object"));
        assert!(!passes_checkcast(&s, "java/lang/Throwable"));
    }

    #[test]
    fn instance_of_null_is_false() {
        setup();
        assert!(!instance_of(&JvmValue::Null, "java/lang/String"));
        let s = object::make_ref(object::string_object_from_str("hello world"));
        assert!(instance_of(&s, "java/lang/String"));
    }

    #[test]
    fn subclass_chain_is_monotonic() {
        setup();
        let ex = Object::with_class("java/lang/RuntimeException");
        assert!(passes_checkcast(&ex, "java/lang/Exception"));
        assert!(passes_checkcast(&ex, "java/lang/Throwable"));
        assert!(passes_checkcast(&ex, "java/lang/Object"));
        assert!(!passes_checkcast(&ex, "java/lang/Error"));
    }

    #[test]
    fn array_rules() {
        setup();
        // arrays cast to Object and to same-primitive arrays only
        let ints = object::make_primitive_array(types::INT, 2);
        assert!(passes_checkcast(&ints, "java/lang/Object"));
        assert!(passes_checkcast(&ints, "[I"));
        assert!(!passes_checkcast(&ints, "[J"));
        assert!(!passes_checkcast(&ints, "java/lang/String"));

        // reference arrays recurse on the component class
        let strings = object::make_1dim_ref_array("java/lang/String", 2);
        assert!(passes_checkcast(&strings, "[Ljava/lang/String;"));
        assert!(passes_checkcast(&strings, "[Ljava/lang/Object;"));

        let exceptions = object::make_1dim_ref_array("java/lang/RuntimeException", 2);
        assert!(passes_checkcast(&exceptions, "[Ljava/lang/Exception;"));
        assert!(!passes_checkcast(&exceptions, "[Ljava/lang/Error;"));
    }
}
