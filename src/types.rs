//! Field/descriptor type tags and the widening conventions used on the
//! operand stack. All integral Java types (boolean through long) widen to
//! i64; float and double widen to f64.

pub const BYTE: &str = "B";
pub const CHAR: &str = "C";
pub const DOUBLE: &str = "D";
pub const FLOAT: &str = "F";
pub const INT: &str = "I";
pub const LONG: &str = "J";
pub const SHORT: &str = "S";
pub const BOOL: &str = "Z";

pub const BYTE_ARRAY: &str = "[B";
pub const INT_ARRAY: &str = "[I";
pub const LONG_ARRAY: &str = "[J";
pub const FLOAT_ARRAY: &str = "[F";
pub const DOUBLE_ARRAY: &str = "[D";
pub const REF_ARRAY: &str = "[L";
pub const ARRAY: &str = "[";
pub const REF: &str = "L";

/// Pseudo-tag for a String `value` field that holds a string-pool index
/// instead of raw bytes (the shape produced by LDC on a string constant).
pub const STRING_INDEX: &str = "T";

pub const STRING_CLASS_NAME: &str = "java/lang/String";
pub const OBJECT_CLASS_NAME: &str = "java/lang/Object";

pub const JAVA_BOOL_FALSE: i64 = 0;
pub const JAVA_BOOL_TRUE: i64 = 1;

pub fn java_bool(b: bool) -> i64 {
    if b {
        JAVA_BOOL_TRUE
    } else {
        JAVA_BOOL_FALSE
    }
}

pub fn is_array_type(tag: &str) -> bool {
    tag.starts_with(ARRAY)
}

/// Strips one array dimension: `"[I"` -> `"I"`, `"[Lx;"` -> `"Lx;"`.
pub fn array_component(tag: &str) -> &str {
    tag.strip_prefix('[').unwrap_or(tag)
}

/// Whether a descriptor tag occupies two locals/stack slots.
pub fn is_two_slot(tag: &str) -> bool {
    tag == LONG || tag == DOUBLE
}

/// Splits the parameter section of a method descriptor like `(I[BLjava/lang/String;J)V`
/// into individual type tags. Malformed trailing input is dropped rather than
/// diagnosed; descriptors reaching here came from a structurally valid class file.
pub fn parse_params(desc: &str) -> Vec<String> {
    let inner = match (desc.find('('), desc.find(')')) {
        (Some(open), Some(close)) if close > open => &desc[open + 1..close],
        _ => return Vec::new(),
    };
    let mut params = Vec::new();
    let bytes = inner.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i] == b'[' {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        if bytes[i] == b'L' {
            match inner[i..].find(';') {
                Some(semi) => i += semi + 1,
                None => break,
            }
        } else {
            i += 1;
        }
        params.push(inner[start..i].to_string());
    }
    params
}

/// The return-type tag of a method descriptor, `"V"` for void.
pub fn return_type(desc: &str) -> &str {
    match desc.rfind(')') {
        Some(close) => &desc[close + 1..],
        None => "V",
    }
}

/// Number of argument slots a descriptor consumes on the caller's operand
/// stack (longs and doubles count twice).
pub fn param_slot_count(desc: &str) -> usize {
    parse_params(desc)
        .iter()
        .map(|p| if is_two_slot(p) { 2 } else { 1 })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_descriptor() {
        assert_eq!(parse_params("(II)I"), vec!["I", "I"]);
        assert_eq!(return_type("(II)I"), "I");
    }

    #[test]
    fn parses_mixed_descriptor() {
        let params = parse_params("(I[BLjava/lang/String;J[[D)V");
        assert_eq!(
            params,
            vec!["I", "[B", "Ljava/lang/String;", "J", "[[D"]
        );
        assert_eq!(return_type("(I[BLjava/lang/String;J[[D)V"), "V");
    }

    #[test]
    fn slot_counting_doubles_wide_types() {
        assert_eq!(param_slot_count("(IJ)V"), 3);
        assert_eq!(param_slot_count("(DD)V"), 4);
        assert_eq!(param_slot_count("()V"), 0);
    }

    #[test]
    fn array_tags() {
        assert!(is_array_type("[Ljava/lang/String;"));
        assert!(!is_array_type("Ljava/lang/String;"));
        assert_eq!(array_component("[[I"), "[I");
    }
}
