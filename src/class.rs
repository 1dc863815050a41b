//! The runtime class record. A `Klass` is created exactly once per internal
//! name and lives in the method area; superclass and interface links are
//! interned string-pool indices, so the class graph is cycle-free by
//! construction and every edge is a name lookup.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bitflags::bitflags;

use crate::cpool::CPool;
use crate::gfunction::GMeth;
use crate::string_pool;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u16 {
        const PUBLIC       = 0x0001;
        const PRIVATE      = 0x0002;
        const PROTECTED    = 0x0004;
        const STATIC       = 0x0008;
        const FINAL        = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE       = 0x0040;
        const VARARGS      = 0x0080;
        const NATIVE       = 0x0100;
        const INTERFACE    = 0x0200;
        const ABSTRACT     = 0x0400;
        const STRICT       = 0x0800;
        const SYNTHETIC    = 0x1000;
        const ANNOTATION   = 0x2000;
        const ENUM         = 0x4000;
    }
}

/// One row of a method's exception-handler table.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// CP index of the caught class's ClassRef; 0 catches everything.
    pub catch_type: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line: u16,
}

/// A bytecode method as the interpreter consumes it.
pub struct MethodInfo {
    pub name: Arc<str>,
    pub desc: Arc<str>,
    pub access: AccessFlags,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Arc<Vec<u8>>,
    pub exceptions: Vec<ExceptionEntry>,
    pub line_numbers: Vec<LineNumberEntry>,
}

impl MethodInfo {
    pub fn new(name: &str, desc: &str, access: AccessFlags, code: Vec<u8>) -> Self {
        MethodInfo {
            name: name.into(),
            desc: desc.into(),
            access,
            max_stack: 16,
            max_locals: 16,
            code: Arc::new(code),
            exceptions: Vec::new(),
            line_numbers: Vec::new(),
        }
    }

    /// Source line covering `pc`, from the line-number table when present.
    pub fn line_for_pc(&self, pc: usize) -> Option<u16> {
        let mut line = None;
        for entry in &self.line_numbers {
            if usize::from(entry.start_pc) <= pc {
                line = Some(entry.line);
            }
        }
        line
    }
}

impl Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} ({} bytes)", self.name, self.desc, self.code.len())
    }
}

/// A method-table slot: bytecode to interpret, or a registered intrinsic
/// that runs without pushing a frame.
#[derive(Clone)]
pub enum MethEntry {
    Bytecode(Arc<MethodInfo>),
    Intrinsic(GMeth),
}

impl Debug for MethEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethEntry::Bytecode(m) => write!(f, "bytecode {m:?}"),
            MethEntry::Intrinsic(g) => write!(f, "intrinsic ({} slots)", g.param_slots),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDesc {
    pub name: Arc<str>,
    pub ftype: String,
    pub access: AccessFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KlassStatus {
    Loaded = b'L',
    Linked = b'K',
    Initialized = b'I',
}

pub struct Klass {
    pub name: Arc<str>,
    /// `"bootstrap"` for base classes, otherwise the loader's name.
    pub loader: Arc<str>,
    /// String-pool index of the superclass name; INVALID for java/lang/Object.
    pub superclass: u32,
    /// String-pool indices of directly implemented interfaces.
    pub interfaces: Vec<u32>,
    /// Keyed by `name + descriptor`.
    pub methods: HashMap<String, MethEntry>,
    pub fields: Vec<FieldDesc>,
    pub cp: Arc<CPool>,
    pub source_file: Arc<str>,
    pub module: Arc<str>,
    clinit: AtomicU8,
    status: AtomicU8,
}

const CLINIT_NOT_RUN: u8 = 0;
const CLINIT_RUN: u8 = 1;

impl Klass {
    pub fn new(name: &str, loader: &str) -> Self {
        let superclass = if name == "java/lang/Object" {
            string_pool::INVALID
        } else {
            string_pool::OBJECT
        };
        Klass {
            name: name.into(),
            loader: loader.into(),
            superclass,
            interfaces: Vec::new(),
            methods: HashMap::new(),
            fields: Vec::new(),
            cp: Arc::new(CPool::new()),
            source_file: "".into(),
            module: "".into(),
            clinit: AtomicU8::new(CLINIT_NOT_RUN),
            status: AtomicU8::new(KlassStatus::Loaded as u8),
        }
    }

    pub fn method(&self, name: &str, desc: &str) -> Option<&MethEntry> {
        self.methods.get(&format!("{name}{desc}"))
    }

    pub fn add_bytecode_method(&mut self, m: MethodInfo) {
        let key = format!("{}{}", m.name, m.desc);
        self.methods.insert(key, MethEntry::Bytecode(Arc::new(m)));
    }

    pub fn add_intrinsic(&mut self, name: &str, desc: &str, g: GMeth) {
        self.methods
            .insert(format!("{name}{desc}"), MethEntry::Intrinsic(g));
    }

    /// Claims the right to run `<clinit>`. Returns true exactly once; later
    /// callers see false and must not re-enter the initializer.
    pub fn begin_clinit(&self) -> bool {
        self.clinit
            .compare_exchange(
                CLINIT_NOT_RUN,
                CLINIT_RUN,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub fn clinit_has_run(&self) -> bool {
        self.clinit.load(Ordering::SeqCst) == CLINIT_RUN
    }

    pub fn status(&self) -> KlassStatus {
        match self.status.load(Ordering::SeqCst) {
            b'K' => KlassStatus::Linked,
            b'I' => KlassStatus::Initialized,
            _ => KlassStatus::Loaded,
        }
    }

    pub fn set_status(&self, s: KlassStatus) {
        self.status.store(s as u8, Ordering::SeqCst);
    }

    pub fn superclass_name(&self) -> Option<&'static str> {
        string_pool::get(self.superclass)
    }
}

impl Debug for Klass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class {}", self.name)?;
        if let Some(sup) = self.superclass_name() {
            if sup != "java/lang/Object" {
                write!(f, " extends {sup}")?;
            }
        }
        if !self.interfaces.is_empty() {
            let names: Vec<&str> = self
                .interfaces
                .iter()
                .filter_map(|&i| string_pool::get(i))
                .collect();
            write!(f, " implements {}", names.join(", "))?;
        }
        write!(
            f,
            " [{:?}, {} methods, clinit run: {}]",
            self.status(),
            self.methods.len(),
            self.clinit_has_run()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clinit_runs_at_most_once() {
        let k = Klass::new("test/Once", "bootstrap");
        assert!(!k.clinit_has_run());
        assert!(k.begin_clinit());
        assert!(!k.begin_clinit());
        assert!(k.clinit_has_run());
    }

    #[test]
    fn status_transitions() {
        let k = Klass::new("test/Status", "bootstrap");
        assert_eq!(k.status(), KlassStatus::Loaded);
        k.set_status(KlassStatus::Linked);
        assert_eq!(k.status(), KlassStatus::Linked);
        k.set_status(KlassStatus::Initialized);
        assert_eq!(k.status(), KlassStatus::Initialized);
    }

    #[test]
    fn object_has_no_superclass() {
        string_pool::init();
        let obj = Klass::new("java/lang/Object", "bootstrap");
        assert_eq!(obj.superclass, string_pool::INVALID);
        let other = Klass::new("test/Sub", "bootstrap");
        assert_eq!(other.superclass_name(), Some("java/lang/Object"));
    }

    #[test]
    fn method_lookup_by_name_and_descriptor() {
        let mut k = Klass::new("test/Lookup", "bootstrap");
        k.add_bytecode_method(MethodInfo::new(
            "add",
            "(II)I",
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            vec![0x1a, 0x1b, 0x60, 0xac],
        ));
        assert!(k.method("add", "(II)I").is_some());
        assert!(k.method("add", "(JJ)J").is_none());
    }
}
