//! The runtime constant pool: a dense index of tagged entries whose payloads
//! live in parallel per-tag vectors. Index 0 is a reserved dummy and is never
//! dereferenced; compound entries point back into the index and must resolve
//! to the expected tag. Pools are immutable once a class is loaded, so
//! readers take no lock.

use crate::string_pool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpTag {
    #[default]
    Dummy,
    Utf8,
    IntConst,
    FloatConst,
    LongConst,
    DoubleConst,
    ClassRef,
    StringConst,
    FieldRef,
    MethodRef,
    InterfaceRef,
    NameAndType,
    MethodHandle,
    MethodType,
    Dynamic,
    InvokeDynamic,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpEntry {
    pub tag: CpTag,
    /// Position in the per-tag vector -- except for `StringConst`, whose slot
    /// is the CP index of a `Utf8` entry in the same pool.
    pub slot: u16,
}

impl CpEntry {
    pub const fn new(tag: CpTag, slot: u16) -> Self {
        CpEntry { tag, slot }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NameAndTypeEntry {
    /// CP index of the Utf8 holding the member name.
    pub name_index: u16,
    /// CP index of the Utf8 holding the descriptor.
    pub desc_index: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct MethodRefEntry {
    /// CP index of a ClassRef.
    pub class_index: u16,
    /// CP index of a NameAndType.
    pub name_and_type: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct MethodHandleEntry {
    pub ref_kind: u8,
    pub ref_index: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct BootstrapRef {
    pub bootstrap_index: u16,
    pub name_and_type: u16,
}

#[derive(Debug, Default)]
pub struct CPool {
    pub cp_index: Vec<CpEntry>,
    pub utf8s: Vec<String>,
    pub int_consts: Vec<i32>,
    pub long_consts: Vec<i64>,
    pub floats: Vec<f32>,
    pub doubles: Vec<f64>,
    /// String-pool indices of interned class names.
    pub class_refs: Vec<u32>,
    pub name_and_types: Vec<NameAndTypeEntry>,
    pub method_refs: Vec<MethodRefEntry>,
    pub interface_refs: Vec<MethodRefEntry>,
    pub field_refs: Vec<MethodRefEntry>,
    /// Utf8 slots of method descriptors.
    pub method_types: Vec<u16>,
    pub method_handles: Vec<MethodHandleEntry>,
    pub dynamics: Vec<BootstrapRef>,
    pub invoke_dynamics: Vec<BootstrapRef>,
}

/// What a fetch produced, discriminated by the return type the caller must
/// handle. A bad index or unsupported tag is `Error`, never a throw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CpValue<'a> {
    Error,
    Int(i64),
    Float(f64),
    Str(&'a str),
}

impl CPool {
    pub fn new() -> Self {
        CPool::default()
    }

    fn entry(&self, index: usize) -> Option<CpEntry> {
        if index == 0 {
            return None;
        }
        self.cp_index.get(index).copied()
    }

    /// Fetches the loadable value behind `index`. Integral constants (and
    /// MethodType descriptor slots) come back as `Int`, float and double as
    /// `Float`, and Utf8/StringConst/ClassRef as a borrowed string.
    pub fn fetch(&self, index: usize) -> CpValue<'_> {
        let Some(entry) = self.entry(index) else {
            return CpValue::Error;
        };
        let slot = entry.slot as usize;
        match entry.tag {
            CpTag::IntConst => match self.int_consts.get(slot) {
                Some(&i) => CpValue::Int(i64::from(i)),
                None => CpValue::Error,
            },
            CpTag::LongConst => match self.long_consts.get(slot) {
                Some(&l) => CpValue::Int(l),
                None => CpValue::Error,
            },
            CpTag::MethodType => match self.method_types.get(slot) {
                Some(&u) => CpValue::Int(i64::from(u)),
                None => CpValue::Error,
            },
            CpTag::FloatConst => match self.floats.get(slot) {
                Some(&f) => CpValue::Float(f64::from(f)),
                None => CpValue::Error,
            },
            CpTag::DoubleConst => match self.doubles.get(slot) {
                Some(&d) => CpValue::Float(d),
                None => CpValue::Error,
            },
            // the slot of a string constant is the CP index of its Utf8
            CpTag::StringConst => match self.entry(slot) {
                Some(e) if e.tag == CpTag::Utf8 => match self.utf8s.get(e.slot as usize) {
                    Some(s) => CpValue::Str(s),
                    None => CpValue::Error,
                },
                _ => CpValue::Error,
            },
            CpTag::Utf8 => match self.utf8s.get(slot) {
                Some(s) => CpValue::Str(s),
                None => CpValue::Error,
            },
            CpTag::ClassRef => match self.class_refs.get(slot) {
                Some(&spool_idx) => match string_pool::get(spool_idx) {
                    Some(s) => CpValue::Str(s),
                    None => CpValue::Error,
                },
                None => CpValue::Error,
            },
            _ => CpValue::Error,
        }
    }

    fn utf8_at(&self, index: usize) -> Option<&str> {
        let e = self.entry(index)?;
        if e.tag != CpTag::Utf8 {
            return None;
        }
        self.utf8s.get(e.slot as usize).map(String::as_str)
    }

    fn name_and_type_at(&self, index: usize) -> Option<(&str, &str)> {
        let e = self.entry(index)?;
        if e.tag != CpTag::NameAndType {
            return None;
        }
        let nat = self.name_and_types.get(e.slot as usize)?;
        let name = self.utf8_at(nat.name_index as usize)?;
        let desc = self.utf8_at(nat.desc_index as usize)?;
        Some((name, desc))
    }

    fn member_ref_info(&self, entry: Option<&MethodRefEntry>) -> (String, String, String) {
        let empty = (String::new(), String::new(), String::new());
        let Some(mref) = entry else { return empty };
        let class_name = self.class_ref_name(mref.class_index as usize);
        if class_name.is_empty() {
            return empty;
        }
        match self.name_and_type_at(mref.name_and_type as usize) {
            Some((name, desc)) => (class_name, name.to_string(), desc.to_string()),
            None => empty,
        }
    }

    /// Dereferences a MethodRef through its ClassRef and NameAndType,
    /// yielding (class, method, descriptor). Any structural mismatch yields
    /// three empty strings; nothing is thrown here.
    pub fn method_ref_info(&self, index: usize) -> (String, String, String) {
        match self.entry(index) {
            Some(e) if e.tag == CpTag::MethodRef => {
                self.member_ref_info(self.method_refs.get(e.slot as usize))
            }
            _ => (String::new(), String::new(), String::new()),
        }
    }

    /// Same shape as `method_ref_info`, for InterfaceRef entries.
    pub fn interface_ref_info(&self, index: usize) -> (String, String, String) {
        match self.entry(index) {
            Some(e) if e.tag == CpTag::InterfaceRef => {
                self.member_ref_info(self.interface_refs.get(e.slot as usize))
            }
            _ => (String::new(), String::new(), String::new()),
        }
    }

    /// Same shape as `method_ref_info`, for FieldRef entries.
    pub fn field_ref_info(&self, index: usize) -> (String, String, String) {
        match self.entry(index) {
            Some(e) if e.tag == CpTag::FieldRef => {
                self.member_ref_info(self.field_refs.get(e.slot as usize))
            }
            _ => (String::new(), String::new(), String::new()),
        }
    }

    /// The interned class name behind a ClassRef, or `""` when the entry is
    /// not a ClassRef or its pool index is the missing sentinel.
    pub fn class_ref_name(&self, index: usize) -> String {
        let Some(e) = self.entry(index) else {
            return String::new();
        };
        if e.tag != CpTag::ClassRef {
            return String::new();
        }
        match self.class_refs.get(e.slot as usize) {
            Some(&spool_idx) => string_pool::get(spool_idx).unwrap_or("").to_string(),
            None => String::new(),
        }
    }

    pub fn tag_of(&self, index: usize) -> CpTag {
        self.entry(index).map_or(CpTag::Dummy, |e| e.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_pool;

    fn pool_with_entries() -> CPool {
        let mut cp = CPool::new();
        cp.cp_index = vec![CpEntry::default(); 20];
        cp.cp_index[0] = CpEntry::default(); // mandatory dummy entry
        cp.cp_index[1] = CpEntry::new(CpTag::IntConst, 0);
        cp.cp_index[2] = CpEntry::new(CpTag::LongConst, 0);
        cp.cp_index[3] = CpEntry::new(CpTag::StringConst, 4);
        cp.cp_index[4] = CpEntry::new(CpTag::Utf8, 0);
        cp.cp_index[5] = CpEntry::new(CpTag::MethodType, 0);
        cp.cp_index[6] = CpEntry::new(CpTag::FloatConst, 0);
        cp.cp_index[7] = CpEntry::new(CpTag::DoubleConst, 0);
        cp.cp_index[8] = CpEntry::new(CpTag::ClassRef, 0);
        cp.int_consts = vec![25];
        cp.long_consts = vec![250];
        cp.utf8s = vec!["Hello from the VM!".to_string()];
        cp.method_types = vec![24];
        cp.floats = vec![24.1];
        cp.doubles = vec![24.2];
        cp.class_refs = vec![string_pool::STRING];
        cp
    }

    #[test]
    fn fetch_closure_over_tags() {
        string_pool::init();
        let cp = pool_with_entries();

        assert_eq!(cp.fetch(1), CpValue::Int(25));
        assert_eq!(cp.fetch(2), CpValue::Int(250));
        assert_eq!(cp.fetch(3), CpValue::Str("Hello from the VM!"));
        assert_eq!(cp.fetch(4), CpValue::Str("Hello from the VM!"));
        assert_eq!(cp.fetch(5), CpValue::Int(24));
        match cp.fetch(6) {
            CpValue::Float(f) => assert!((f - 24.1).abs() < 0.001),
            other => panic!("expected Float, got {other:?}"),
        }
        match cp.fetch(7) {
            CpValue::Float(f) => assert!((f - 24.2).abs() < 0.001),
            other => panic!("expected Float, got {other:?}"),
        }
        assert_eq!(cp.fetch(8), CpValue::Str("java/lang/String"));
    }

    #[test]
    fn fetch_rejects_dummy_and_out_of_range() {
        string_pool::init();
        let cp = pool_with_entries();
        assert_eq!(cp.fetch(0), CpValue::Error);
        assert_eq!(cp.fetch(999), CpValue::Error);
        // index 9 exists but carries the dummy tag
        assert_eq!(cp.fetch(9), CpValue::Error);
    }

    #[test]
    fn method_ref_info_rejects_mismatches() {
        string_pool::init();
        let mut cp = CPool::new();
        cp.cp_index.push(CpEntry::default());
        cp.cp_index.push(CpEntry::new(CpTag::IntConst, 0));
        cp.cp_index.push(CpEntry::new(CpTag::Utf8, 0));
        cp.int_consts.push(26);
        cp.utf8s.push("Hello string".to_string());

        assert_eq!(
            cp.method_ref_info(0),
            (String::new(), String::new(), String::new())
        );
        assert_eq!(
            cp.method_ref_info(999),
            (String::new(), String::new(), String::new())
        );
        assert_eq!(
            cp.method_ref_info(1),
            (String::new(), String::new(), String::new())
        );
    }

    #[test]
    fn method_ref_info_resolves_init() {
        string_pool::init();
        let mut cp = CPool::new();
        cp.cp_index = vec![CpEntry::default(); 10];
        cp.cp_index[1] = CpEntry::new(CpTag::MethodRef, 0);
        cp.method_refs.push(MethodRefEntry {
            class_index: 2,
            name_and_type: 3,
        });
        cp.cp_index[2] = CpEntry::new(CpTag::ClassRef, 0);
        cp.class_refs.push(string_pool::OBJECT);
        cp.cp_index[3] = CpEntry::new(CpTag::NameAndType, 0);
        cp.name_and_types.push(NameAndTypeEntry {
            name_index: 4,
            desc_index: 5,
        });
        cp.cp_index[4] = CpEntry::new(CpTag::Utf8, 0);
        cp.cp_index[5] = CpEntry::new(CpTag::Utf8, 1);
        cp.utf8s = vec!["<init>".to_string(), "()V".to_string()];

        let (class, name, desc) = cp.method_ref_info(1);
        assert_eq!(class, "java/lang/Object");
        assert_eq!(name, "<init>");
        assert_eq!(desc, "()V");
    }

    #[test]
    fn class_ref_name_handles_invalid_pool_index() {
        string_pool::init();
        let mut cp = CPool::new();
        cp.cp_index = vec![CpEntry::default(); 4];
        cp.cp_index[1] = CpEntry::new(CpTag::ClassRef, 0);
        cp.cp_index[2] = CpEntry::new(CpTag::ClassRef, 1);
        cp.class_refs = vec![string_pool::OBJECT, string_pool::INVALID];

        assert_eq!(cp.class_ref_name(1), "java/lang/Object");
        assert_eq!(cp.class_ref_name(2), "");
        assert_eq!(cp.class_ref_name(0), "");
    }
}
