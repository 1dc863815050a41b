//! The object world: objects are a klass reference (an interned string-pool
//! index) plus a field table keyed by field name. Field values are a tagged
//! sum; intrinsics dispatch on the tag. Arrays are ordinary objects whose
//! klass name starts with `[` and whose backing storage lives in their
//! `value` field.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::string_pool;
use crate::types;

pub type ObjRef = Arc<Mutex<Object>>;

/// A value as it appears on the operand stack or in a locals slot.
/// All integral Java types widen to `Int`; float and double widen to `Float`.
#[derive(Clone)]
pub enum JvmValue {
    Int(i64),
    Float(f64),
    Ref(ObjRef),
    Null,
}

impl JvmValue {
    pub fn is_null(&self) -> bool {
        matches!(self, JvmValue::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            JvmValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            JvmValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<ObjRef> {
        match self {
            JvmValue::Ref(r) => Some(r.clone()),
            _ => None,
        }
    }
}

impl PartialEq for JvmValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JvmValue::Int(a), JvmValue::Int(b)) => a == b,
            (JvmValue::Float(a), JvmValue::Float(b)) => a == b,
            (JvmValue::Ref(a), JvmValue::Ref(b)) => Arc::ptr_eq(a, b),
            (JvmValue::Null, JvmValue::Null) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for JvmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JvmValue::Int(i) => write!(f, "int64 {i}"),
            JvmValue::Float(d) => write!(f, "float64 {d}"),
            JvmValue::Ref(r) => match r.try_lock() {
                Ok(obj) => write!(f, "ref {}", obj.klass_name()),
                Err(_) => write!(f, "ref <busy>"),
            },
            JvmValue::Null => write!(f, "null"),
        }
    }
}

/// The payload of one field. Backing arrays appear inline only in array
/// objects and in a String's `value`; fields that reference an array hold a
/// `Ref` to the array object.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Longs(Vec<i64>),
    Doubles(Vec<f64>),
    Refs(Vec<JvmValue>),
    Ref(JvmValue),
    /// String-pool index: the shape LDC gives a string literal's `value`.
    StrIdx(u32),
}

#[derive(Debug, Clone)]
pub struct Field {
    pub ftype: String,
    pub fvalue: FieldValue,
}

impl Field {
    pub fn new(ftype: &str, fvalue: FieldValue) -> Self {
        Field {
            ftype: ftype.to_string(),
            fvalue,
        }
    }
}

pub struct Object {
    /// String-pool index of the class's internal name.
    pub klass: u32,
    pub fields: HashMap<String, Field>,
}

impl Object {
    /// An object with an empty field table and no klass yet.
    pub fn new_empty() -> Self {
        Object {
            klass: string_pool::INVALID,
            fields: HashMap::new(),
        }
    }

    pub fn with_class(class_name: &str) -> Self {
        Object {
            klass: string_pool::intern(class_name),
            fields: HashMap::new(),
        }
    }

    pub fn klass_name(&self) -> &'static str {
        string_pool::get(self.klass).unwrap_or("<unloaded>")
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: &str, f: Field) {
        self.fields.insert(name.to_string(), f);
    }

    pub fn is_array(&self) -> bool {
        types::is_array_type(self.klass_name())
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.klass_name())?;
        let mut s = f.debug_struct("");
        for (name, fld) in &self.fields {
            match &fld.fvalue {
                FieldValue::Bytes(b) => {
                    s.field(name, &format!("{} {:?}", fld.ftype, String::from_utf8_lossy(b)));
                }
                other => {
                    s.field(name, &format!("{} {other:?}", fld.ftype));
                }
            }
        }
        s.finish()
    }
}

pub fn make_ref(obj: Object) -> JvmValue {
    JvmValue::Ref(Arc::new(Mutex::new(obj)))
}

pub fn is_null(v: &JvmValue) -> bool {
    v.is_null()
}

// === Strings ===

/// A String with an empty value, compact coder, and an unset hash.
pub fn new_string() -> Object {
    let mut obj = Object::with_class(types::STRING_CLASS_NAME);
    obj.set_field("value", Field::new(types::BYTE_ARRAY, FieldValue::Bytes(Vec::new())));
    obj.set_field("coder", Field::new(types::BYTE, FieldValue::Int(0)));
    obj.set_field("hash", Field::new(types::INT, FieldValue::Int(0)));
    obj.set_field(
        "hashIsZero",
        Field::new(types::BOOL, FieldValue::Int(types::JAVA_BOOL_FALSE)),
    );
    obj
}

/// A String whose `value` holds the UTF-8 bytes of `s`.
pub fn string_object_from_str(s: &str) -> Object {
    let mut obj = new_string();
    obj.set_field(
        "value",
        Field::new(types::BYTE_ARRAY, FieldValue::Bytes(s.as_bytes().to_vec())),
    );
    obj
}

/// Compact-string constructor taking a borrowed source buffer. The bytes are
/// copied; the borrow signals that the caller keeps ownership.
pub fn compact_string_from_str(s: &str) -> Object {
    string_object_from_str(s)
}

/// A String whose `value` is a string-pool index, the shape LDC produces for
/// literals. Consumers of `value` accept both this and the byte-array shape.
pub fn string_object_from_pool_index(idx: u32) -> Object {
    let mut obj = new_string();
    obj.set_field("value", Field::new(types::STRING_INDEX, FieldValue::StrIdx(idx)));
    obj
}

/// Recovers the host string behind a String object's `value` field,
/// whichever of the two shapes it is stored in.
pub fn string_from_string_object(obj: &Object) -> Option<String> {
    match &obj.field("value")?.fvalue {
        FieldValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        FieldValue::StrIdx(idx) => string_pool::get(*idx).map(str::to_string),
        _ => None,
    }
}

/// The raw comparison bytes of a String object (either `value` shape).
pub fn string_bytes(obj: &Object) -> Option<Vec<u8>> {
    match &obj.field("value")?.fvalue {
        FieldValue::Bytes(b) => Some(b.clone()),
        FieldValue::StrIdx(idx) => string_pool::get(*idx).map(|s| s.as_bytes().to_vec()),
        _ => None,
    }
}

pub fn is_string_object(obj: &Object) -> bool {
    obj.klass_name() == types::STRING_CLASS_NAME
}

// === Arrays ===

/// A one-dimensional reference array whose klass name is `[L<elem>;`.
pub fn make_1dim_ref_array(elem_class: &str, len: usize) -> Object {
    let klass = format!("[L{elem_class};");
    let mut obj = Object::with_class(&klass);
    obj.set_field(
        "value",
        Field::new(&klass, FieldValue::Refs(vec![JvmValue::Null; len])),
    );
    obj
}

/// A one-dimensional primitive array for the given component tag
/// (`"B"`, `"Z"`, `"C"`, `"S"`, `"I"`, `"J"`, `"F"`, `"D"`).
pub fn make_primitive_array(component: &str, len: usize) -> Object {
    let klass = format!("[{component}");
    let backing = match component {
        types::BYTE | types::BOOL => FieldValue::Bytes(vec![0; len]),
        types::FLOAT | types::DOUBLE => FieldValue::Doubles(vec![0.0; len]),
        _ => FieldValue::Longs(vec![0; len]),
    };
    let mut obj = Object::with_class(&klass);
    obj.set_field("value", Field::new(&klass, backing));
    obj
}

/// An array for any component tag: primitive, reference (`Lx;`), or a
/// nested array type (`[x`), which gets reference backing.
pub fn make_array_object(component: &str, len: usize) -> Object {
    if let Some(class) = component.strip_prefix('L').and_then(|c| c.strip_suffix(';')) {
        return make_1dim_ref_array(class, len);
    }
    if component.starts_with('[') {
        let klass = format!("[{component}");
        let mut obj = Object::with_class(&klass);
        obj.set_field(
            "value",
            Field::new(&klass, FieldValue::Refs(vec![JvmValue::Null; len])),
        );
        return obj;
    }
    make_primitive_array(component, len)
}

/// The logical element count of an array object.
pub fn array_length(obj: &Object) -> Option<usize> {
    match &obj.field("value")?.fvalue {
        FieldValue::Bytes(b) => Some(b.len()),
        FieldValue::Longs(l) => Some(l.len()),
        FieldValue::Doubles(d) => Some(d.len()),
        FieldValue::Refs(r) => Some(r.len()),
        _ => None,
    }
}

/// The component type of an array object, from its klass name.
pub fn array_component_type(obj: &Object) -> Option<String> {
    let name = obj.klass_name();
    if !types::is_array_type(name) {
        return None;
    }
    Some(types::array_component(name).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_string_shape() {
        let s = new_string();
        assert_eq!(s.klass_name(), "java/lang/String");
        match &s.field("value").unwrap().fvalue {
            FieldValue::Bytes(b) => assert!(b.is_empty()),
            other => panic!("value should be empty bytes, got {other:?}"),
        }
        assert_eq!(s.field("coder").unwrap().fvalue.clone_int(), Some(0));
        assert_eq!(s.field("hash").unwrap().fvalue.clone_int(), Some(0));
        assert_eq!(
            s.field("hashIsZero").unwrap().fvalue.clone_int(),
            Some(types::JAVA_BOOL_FALSE)
        );
    }

    #[test]
    fn string_round_trip() {
        for s in ["", "hello", "héllo wörld", "a\u{1F600}b"] {
            let obj = string_object_from_str(s);
            assert_eq!(string_from_string_object(&obj).as_deref(), Some(s));
        }
    }

    #[test]
    fn pool_index_string_shape_is_accepted() {
        string_pool::init();
        let idx = string_pool::intern("hello");
        let obj = string_object_from_pool_index(idx);
        assert_eq!(string_from_string_object(&obj).as_deref(), Some("hello"));
        assert_eq!(string_bytes(&obj).as_deref(), Some("hello".as_bytes()));
    }

    #[test]
    fn ref_array_has_bracket_klass_and_length() {
        let arr = make_1dim_ref_array("java/lang/String", 7);
        assert!(arr.klass_name().starts_with("[L"));
        assert_eq!(array_length(&arr), Some(7));
        assert_eq!(
            array_component_type(&arr).as_deref(),
            Some("Ljava/lang/String;")
        );
    }

    #[test]
    fn primitive_array_backings() {
        let bytes = make_primitive_array(types::BYTE, 3);
        assert!(matches!(
            bytes.field("value").unwrap().fvalue,
            FieldValue::Bytes(_)
        ));
        let ints = make_primitive_array(types::INT, 3);
        assert!(matches!(
            ints.field("value").unwrap().fvalue,
            FieldValue::Longs(_)
        ));
        let doubles = make_primitive_array(types::DOUBLE, 3);
        assert!(matches!(
            doubles.field("value").unwrap().fvalue,
            FieldValue::Doubles(_)
        ));
        assert_eq!(array_length(&ints), Some(3));
    }

    #[test]
    fn null_sentinel() {
        assert!(is_null(&JvmValue::Null));
        assert!(!is_null(&make_ref(Object::new_empty())));
    }
}

#[cfg(test)]
impl FieldValue {
    fn clone_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}
