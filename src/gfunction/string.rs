//! Intrinsics for java/lang/String. The static initializer block is not
//! interpreted; String statics are seeded directly by `load_statics`.
//!
//! A String's comparison bytes come from `object::string_bytes`, which
//! accepts both `value` shapes (raw bytes and string-pool index).

use std::collections::HashMap;

use crate::exceptions::ExcKind;
use crate::gfunction::{arg_int, arg_obj, GErrBlk, GMeth, GfResult};
use crate::object::{self, Field, FieldValue, JvmValue};
use crate::statics;
use crate::{string_pool, types};

pub fn load(map: &mut HashMap<String, GMeth>) {
    // === instantiation ===
    map.insert(
        "java/lang/String.<clinit>()V".to_string(),
        GMeth::new(0, string_clinit),
    );
    map.insert(
        "java/lang/String.<init>([B)V".to_string(),
        GMeth::new(1, new_string_from_bytes),
    );
    map.insert(
        "java/lang/String.<init>([BII)V".to_string(),
        GMeth::new(3, new_string_from_bytes_subset),
    );
    // charset-aware constructors stay unsupported until a charset subsystem exists
    for sig in [
        "java/lang/String.<init>([BLjava/lang/String;)V",
        "java/lang/String.<init>([BLjava/nio/charset/Charset;)V",
        "java/lang/String.<init>([BIILjava/lang/String;)V",
        "java/lang/String.<init>([BIILjava/nio/charset/Charset;)V",
    ] {
        map.insert(sig.to_string(), GMeth::new(types::param_slot_count(sig), no_charset_support));
    }

    // === methods ===
    map.insert(
        "java/lang/String.equals(Ljava/lang/Object;)Z".to_string(),
        GMeth::new(1, string_equals),
    );
    map.insert(
        "java/lang/String.length()I".to_string(),
        GMeth::new(0, string_length),
    );
    map.insert(
        "java/lang/String.isEmpty()Z".to_string(),
        GMeth::new(0, string_is_empty),
    );
    map.insert(
        "java/lang/String.charAt(I)C".to_string(),
        GMeth::new(1, string_char_at),
    );
    map.insert(
        "java/lang/String.hashCode()I".to_string(),
        GMeth::new(0, string_hash_code),
    );
    map.insert(
        "java/lang/String.concat(Ljava/lang/String;)Ljava/lang/String;".to_string(),
        GMeth::new(1, string_concat),
    );
    map.insert(
        "java/lang/String.compareTo(Ljava/lang/String;)I".to_string(),
        GMeth::new(1, string_compare_to),
    );
    map.insert(
        "java/lang/String.compareToIgnoreCase(Ljava/lang/String;)I".to_string(),
        GMeth::new(1, string_compare_to_ignore_case),
    );
    map.insert(
        "java/lang/String.getBytes()[B".to_string(),
        GMeth::new(0, string_get_bytes),
    );
    map.insert(
        "java/lang/String.substring(I)Ljava/lang/String;".to_string(),
        GMeth::new(1, string_substring_from),
    );
    map.insert(
        "java/lang/String.substring(II)Ljava/lang/String;".to_string(),
        GMeth::new(2, string_substring_range),
    );
    map.insert(
        "java/lang/String.toLowerCase()Ljava/lang/String;".to_string(),
        GMeth::new(0, string_to_lower),
    );
    map.insert(
        "java/lang/String.toUpperCase()Ljava/lang/String;".to_string(),
        GMeth::new(0, string_to_upper),
    );
    map.insert(
        "java/lang/String.trim()Ljava/lang/String;".to_string(),
        GMeth::new(0, string_trim),
    );
    map.insert(
        "java/lang/String.intern()Ljava/lang/String;".to_string(),
        GMeth::new(0, string_intern),
    );
    map.insert(
        "java/lang/String.toString()Ljava/lang/String;".to_string(),
        GMeth::new(0, string_to_string),
    );

    // === valueOf ===
    map.insert(
        "java/lang/String.valueOf(Z)Ljava/lang/String;".to_string(),
        GMeth::new(1, value_of_boolean),
    );
    map.insert(
        "java/lang/String.valueOf(C)Ljava/lang/String;".to_string(),
        GMeth::new(1, value_of_char),
    );
    map.insert(
        "java/lang/String.valueOf(I)Ljava/lang/String;".to_string(),
        GMeth::new(1, value_of_int),
    );
    map.insert(
        "java/lang/String.valueOf(J)Ljava/lang/String;".to_string(),
        GMeth::new(2, value_of_int),
    );
    map.insert(
        "java/lang/String.valueOf(F)Ljava/lang/String;".to_string(),
        GMeth::new(1, value_of_float),
    );
    map.insert(
        "java/lang/String.valueOf(D)Ljava/lang/String;".to_string(),
        GMeth::new(2, value_of_float),
    );
}

/// Seeds the String statics the class initializer would have set.
pub fn load_statics() {
    statics::add_static(
        "java/lang/String.COMPACT_STRINGS",
        types::BOOL,
        FieldValue::Int(types::JAVA_BOOL_TRUE),
    );
}

fn string_clinit(_args: &mut [JvmValue]) -> GfResult {
    GfResult::Void
}

fn no_charset_support(_args: &mut [JvmValue]) -> GfResult {
    GfResult::Err(GErrBlk::new(
        ExcKind::UnsupportedEncoding,
        "charset-aware String constructors are not yet supported",
    ))
}

fn self_string(args: &[JvmValue]) -> Result<Vec<u8>, GErrBlk> {
    let this = arg_obj(args, 0)?;
    let obj = this.lock().unwrap();
    object::string_bytes(&obj).ok_or_else(|| {
        GErrBlk::new(ExcKind::InvalidType, "receiver is not a String object")
    })
}

fn arg_byte_array(args: &[JvmValue], i: usize) -> Result<Vec<u8>, GErrBlk> {
    let r = arg_obj(args, i)?;
    let obj = r.lock().unwrap();
    match obj.field("value").map(|f| &f.fvalue) {
        Some(FieldValue::Bytes(b)) => Ok(b.clone()),
        _ => Err(GErrBlk::new(
            ExcKind::InvalidType,
            format!("argument slot {i} is not a byte array"),
        )),
    }
}

fn string_result(s: &str) -> GfResult {
    GfResult::Val(object::make_ref(object::compact_string_from_str(s)))
}

fn new_string_from_bytes(args: &mut [JvmValue]) -> GfResult {
    let bytes = match arg_byte_array(args, 1) {
        Ok(b) => b,
        Err(e) => return GfResult::Err(e),
    };
    let this = match arg_obj(args, 0) {
        Ok(r) => r,
        Err(e) => return GfResult::Err(e),
    };
    this.lock().unwrap().set_field(
        "value",
        Field::new(types::BYTE_ARRAY, FieldValue::Bytes(bytes)),
    );
    GfResult::Void
}

fn new_string_from_bytes_subset(args: &mut [JvmValue]) -> GfResult {
    let bytes = match arg_byte_array(args, 1) {
        Ok(b) => b,
        Err(e) => return GfResult::Err(e),
    };
    let (offset, length) = match (arg_int(args, 2), arg_int(args, 3)) {
        (Ok(o), Ok(l)) => (o, l),
        (Err(e), _) | (_, Err(e)) => return GfResult::Err(e),
    };
    if offset < 0 || length < 0 || (offset + length) as usize > bytes.len() {
        return GfResult::Err(GErrBlk::new(
            ExcKind::StringIndexOutOfBounds,
            format!(
                "offset {offset}, length {length} out of bounds for byte array of {}",
                bytes.len()
            ),
        ));
    }
    let subset = bytes[offset as usize..(offset + length) as usize].to_vec();
    let this = match arg_obj(args, 0) {
        Ok(r) => r,
        Err(e) => return GfResult::Err(e),
    };
    this.lock().unwrap().set_field(
        "value",
        Field::new(types::BYTE_ARRAY, FieldValue::Bytes(subset)),
    );
    GfResult::Void
}

fn string_equals(args: &mut [JvmValue]) -> GfResult {
    let mine = match self_string(args) {
        Ok(b) => b,
        Err(e) => return GfResult::Err(e),
    };
    let equal = match args.get(1) {
        Some(JvmValue::Ref(other)) => {
            let other = other.lock().unwrap();
            object::is_string_object(&other) && object::string_bytes(&other).as_deref() == Some(&mine[..])
        }
        _ => false,
    };
    GfResult::Val(JvmValue::Int(types::java_bool(equal)))
}

fn string_length(args: &mut [JvmValue]) -> GfResult {
    match self_string(args) {
        Ok(b) => GfResult::Val(JvmValue::Int(b.len() as i64)),
        Err(e) => GfResult::Err(e),
    }
}

fn string_is_empty(args: &mut [JvmValue]) -> GfResult {
    match self_string(args) {
        Ok(b) => GfResult::Val(JvmValue::Int(types::java_bool(b.is_empty()))),
        Err(e) => GfResult::Err(e),
    }
}

fn string_char_at(args: &mut [JvmValue]) -> GfResult {
    let bytes = match self_string(args) {
        Ok(b) => b,
        Err(e) => return GfResult::Err(e),
    };
    let idx = match arg_int(args, 1) {
        Ok(i) => i,
        Err(e) => return GfResult::Err(e),
    };
    if idx < 0 || idx as usize >= bytes.len() {
        return GfResult::Err(GErrBlk::new(
            ExcKind::StringIndexOutOfBounds,
            format!("index {idx} out of bounds for length {}", bytes.len()),
        ));
    }
    GfResult::Val(JvmValue::Int(i64::from(bytes[idx as usize])))
}

fn string_hash_code(args: &mut [JvmValue]) -> GfResult {
    let bytes = match self_string(args) {
        Ok(b) => b,
        Err(e) => return GfResult::Err(e),
    };
    let mut h: i32 = 0;
    for &b in &bytes {
        h = h.wrapping_mul(31).wrapping_add(i32::from(b));
    }
    GfResult::Val(JvmValue::Int(i64::from(h)))
}

fn string_concat(args: &mut [JvmValue]) -> GfResult {
    let mut mine = match self_string(args) {
        Ok(b) => b,
        Err(e) => return GfResult::Err(e),
    };
    let other = match arg_obj(args, 1) {
        Ok(r) => r,
        Err(e) => return GfResult::Err(e),
    };
    let other_bytes = match object::string_bytes(&other.lock().unwrap()) {
        Some(b) => b,
        None => {
            return GfResult::Err(GErrBlk::new(
                ExcKind::InvalidType,
                "concat argument is not a String object",
            ))
        }
    };
    mine.extend_from_slice(&other_bytes);
    string_result(&String::from_utf8_lossy(&mine))
}

fn compare_bytes(a: &[u8], b: &[u8]) -> i64 {
    for (x, y) in a.iter().zip(b.iter()) {
        if x != y {
            return i64::from(*x) - i64::from(*y);
        }
    }
    a.len() as i64 - b.len() as i64
}

fn string_compare_to(args: &mut [JvmValue]) -> GfResult {
    let mine = match self_string(args) {
        Ok(b) => b,
        Err(e) => return GfResult::Err(e),
    };
    let other = match arg_obj(args, 1) {
        Ok(r) => r,
        Err(e) => return GfResult::Err(e),
    };
    let guard = other.lock().unwrap();
    let result = match object::string_bytes(&guard) {
        Some(theirs) => GfResult::Val(JvmValue::Int(compare_bytes(&mine, &theirs))),
        None => GfResult::Err(GErrBlk::new(
            ExcKind::InvalidType,
            "compareTo argument is not a String object",
        )),
    };
    result
}

fn string_compare_to_ignore_case(args: &mut [JvmValue]) -> GfResult {
    let mine = match self_string(args) {
        Ok(b) => b.to_ascii_lowercase(),
        Err(e) => return GfResult::Err(e),
    };
    let other = match arg_obj(args, 1) {
        Ok(r) => r,
        Err(e) => return GfResult::Err(e),
    };
    let guard = other.lock().unwrap();
    let result = match object::string_bytes(&guard) {
        Some(theirs) => GfResult::Val(JvmValue::Int(compare_bytes(
            &mine,
            &theirs.to_ascii_lowercase(),
        ))),
        None => GfResult::Err(GErrBlk::new(
            ExcKind::InvalidType,
            "compareToIgnoreCase argument is not a String object",
        )),
    };
    result
}

fn string_get_bytes(args: &mut [JvmValue]) -> GfResult {
    match self_string(args) {
        Ok(b) => GfResult::Bytes(b),
        Err(e) => GfResult::Err(e),
    }
}

fn substring(bytes: &[u8], begin: i64, end: i64) -> Result<Vec<u8>, GErrBlk> {
    if begin < 0 || end < begin || end as usize > bytes.len() {
        return Err(GErrBlk::new(
            ExcKind::StringIndexOutOfBounds,
            format!("begin {begin}, end {end}, length {}", bytes.len()),
        ));
    }
    Ok(bytes[begin as usize..end as usize].to_vec())
}

fn string_substring_from(args: &mut [JvmValue]) -> GfResult {
    let bytes = match self_string(args) {
        Ok(b) => b,
        Err(e) => return GfResult::Err(e),
    };
    let begin = match arg_int(args, 1) {
        Ok(i) => i,
        Err(e) => return GfResult::Err(e),
    };
    match substring(&bytes, begin, bytes.len() as i64) {
        Ok(sub) => string_result(&String::from_utf8_lossy(&sub)),
        Err(e) => GfResult::Err(e),
    }
}

fn string_substring_range(args: &mut [JvmValue]) -> GfResult {
    let bytes = match self_string(args) {
        Ok(b) => b,
        Err(e) => return GfResult::Err(e),
    };
    let (begin, end) = match (arg_int(args, 1), arg_int(args, 2)) {
        (Ok(b), Ok(e)) => (b, e),
        (Err(e), _) | (_, Err(e)) => return GfResult::Err(e),
    };
    match substring(&bytes, begin, end) {
        Ok(sub) => string_result(&String::from_utf8_lossy(&sub)),
        Err(e) => GfResult::Err(e),
    }
}

fn string_to_lower(args: &mut [JvmValue]) -> GfResult {
    match self_string(args) {
        Ok(b) => string_result(&String::from_utf8_lossy(&b).to_lowercase()),
        Err(e) => GfResult::Err(e),
    }
}

fn string_to_upper(args: &mut [JvmValue]) -> GfResult {
    match self_string(args) {
        Ok(b) => string_result(&String::from_utf8_lossy(&b).to_uppercase()),
        Err(e) => GfResult::Err(e),
    }
}

fn string_trim(args: &mut [JvmValue]) -> GfResult {
    match self_string(args) {
        Ok(b) => string_result(String::from_utf8_lossy(&b).trim()),
        Err(e) => GfResult::Err(e),
    }
}

fn string_intern(args: &mut [JvmValue]) -> GfResult {
    match self_string(args) {
        Ok(b) => {
            let idx = string_pool::intern(&String::from_utf8_lossy(&b));
            GfResult::Val(object::make_ref(object::string_object_from_pool_index(idx)))
        }
        Err(e) => GfResult::Err(e),
    }
}

fn string_to_string(args: &mut [JvmValue]) -> GfResult {
    match args.first() {
        Some(v @ JvmValue::Ref(_)) => GfResult::Val(v.clone()),
        _ => GfResult::Err(GErrBlk::new(
            ExcKind::NullPointer,
            "toString on a null String reference",
        )),
    }
}

fn value_of_boolean(args: &mut [JvmValue]) -> GfResult {
    match arg_int(args, 0) {
        Ok(v) => string_result(if v == types::JAVA_BOOL_FALSE { "false" } else { "true" }),
        Err(e) => GfResult::Err(e),
    }
}

fn value_of_char(args: &mut [JvmValue]) -> GfResult {
    match arg_int(args, 0) {
        Ok(v) => {
            let c = char::from_u32(v as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
            string_result(&c.to_string())
        }
        Err(e) => GfResult::Err(e),
    }
}

fn value_of_int(args: &mut [JvmValue]) -> GfResult {
    match arg_int(args, 0) {
        Ok(v) => string_result(&v.to_string()),
        Err(e) => GfResult::Err(e),
    }
}

fn value_of_float(args: &mut [JvmValue]) -> GfResult {
    match args.first() {
        Some(JvmValue::Float(f)) => string_result(&f.to_string()),
        _ => GfResult::Err(GErrBlk::new(
            ExcKind::IllegalArgument,
            "valueOf expected a floating argument",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_arg(s: &str) -> JvmValue {
        object::make_ref(object::string_object_from_str(s))
    }

    fn unwrap_string(r: GfResult) -> String {
        match r {
            GfResult::Val(JvmValue::Ref(obj)) => {
                object::string_from_string_object(&obj.lock().unwrap()).unwrap()
            }
            _ => panic!("expected a String result"),
        }
    }

    #[test]
    fn equality_is_byte_equality() {
        let mut args = [string_arg("hello"), string_arg("hello")];
        match string_equals(&mut args) {
            GfResult::Val(JvmValue::Int(v)) => assert_eq!(v, types::JAVA_BOOL_TRUE),
            _ => panic!(),
        }
        let mut args = [string_arg("hello"), string_arg("hellO")];
        match string_equals(&mut args) {
            GfResult::Val(JvmValue::Int(v)) => assert_eq!(v, types::JAVA_BOOL_FALSE),
            _ => panic!(),
        }
    }

    #[test]
    fn equality_accepts_pool_index_shape() {
        string_pool::init();
        let idx = string_pool::intern("hello");
        let literal = object::make_ref(object::string_object_from_pool_index(idx));
        let mut args = [string_arg("hello"), literal];
        match string_equals(&mut args) {
            GfResult::Val(JvmValue::Int(v)) => assert_eq!(v, types::JAVA_BOOL_TRUE),
            _ => panic!(),
        }
    }

    #[test]
    fn compare_to_is_byte_lexicographic() {
        let mut args = [string_arg("apple"), string_arg("banana")];
        match string_compare_to(&mut args) {
            GfResult::Val(JvmValue::Int(v)) => assert!(v < 0),
            _ => panic!(),
        }
        let mut args = [string_arg("APPLE"), string_arg("apple")];
        match string_compare_to_ignore_case(&mut args) {
            GfResult::Val(JvmValue::Int(v)) => assert_eq!(v, 0),
            _ => panic!(),
        }
    }

    #[test]
    fn concat_builds_new_string() {
        let mut args = [string_arg("foo"), string_arg("bar")];
        assert_eq!(unwrap_string(string_concat(&mut args)), "foobar");
    }

    #[test]
    fn substring_bounds_are_checked() {
        let mut args = [string_arg("hello"), JvmValue::Int(1), JvmValue::Int(3)];
        assert_eq!(unwrap_string(string_substring_range(&mut args)), "el");
        let mut args = [string_arg("hello"), JvmValue::Int(2), JvmValue::Int(9)];
        match string_substring_range(&mut args) {
            GfResult::Err(e) => assert_eq!(e.exc_kind, ExcKind::StringIndexOutOfBounds),
            _ => panic!("out-of-range substring must fail"),
        }
    }

    #[test]
    fn charset_constructors_are_unsupported() {
        let mut args = [string_arg("x"), string_arg("UTF-8")];
        match no_charset_support(&mut args) {
            GfResult::Err(e) => assert_eq!(e.exc_kind, ExcKind::UnsupportedEncoding),
            _ => panic!(),
        }
    }

    #[test]
    fn char_at_and_length() {
        let mut args = [string_arg("kava")];
        match string_length(&mut args) {
            GfResult::Val(JvmValue::Int(v)) => assert_eq!(v, 4),
            _ => panic!(),
        }
        let mut args = [string_arg("kava"), JvmValue::Int(1)];
        match string_char_at(&mut args) {
            GfResult::Val(JvmValue::Int(v)) => assert_eq!(v, i64::from(b'a')),
            _ => panic!(),
        }
        let mut args = [string_arg("kava"), JvmValue::Int(9)];
        match string_char_at(&mut args) {
            GfResult::Err(e) => assert_eq!(e.exc_kind, ExcKind::StringIndexOutOfBounds),
            _ => panic!(),
        }
    }

    #[test]
    fn java_string_hash() {
        // "hello".hashCode() in Java
        let mut args = [string_arg("hello")];
        match string_hash_code(&mut args) {
            GfResult::Val(JvmValue::Int(v)) => assert_eq!(v, 99_162_322),
            _ => panic!(),
        }
    }
}
