//! Class loading and the method area. Classes are loaded on demand by name:
//! the jmod index locates the artifact, a byte source produces the raw class
//! bytes, and the registered decoder turns them into a `Klass`, which is
//! inserted under the method-area lock. Loading the same name twice yields
//! exactly one Klass; the second caller sees the first entry.
//!
//! The class-file decoder itself is a collaborator: the core only consumes
//! its output shape. Linking (superclass, interfaces, CP references) is lazy
//! and driven by first use in the interpreter.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::{debug, info, warn};

use crate::class::{Klass, KlassStatus};
use crate::exceptions::{ExcKind, JvmEx};
use crate::gfunction;
use crate::string_pool;

pub mod jmod;

/// Turns raw class-file bytes into a Klass. Registered by the decoder
/// collaborator; errors surface as ClassFormatError.
pub type ClassDecoder = fn(&[u8]) -> Result<Klass, JvmEx>;

/// Produces the raw bytes of `class` from `archive`. Registered by the
/// archive-reading collaborator.
pub type ClassByteSource = fn(archive: &str, class: &str) -> Option<Vec<u8>>;

fn meth_area() -> &'static RwLock<HashMap<String, Arc<Klass>>> {
    static AREA: OnceLock<RwLock<HashMap<String, Arc<Klass>>>> = OnceLock::new();
    AREA.get_or_init(|| RwLock::new(HashMap::new()))
}

static DECODER: OnceLock<ClassDecoder> = OnceLock::new();
static BYTE_SOURCE: OnceLock<ClassByteSource> = OnceLock::new();

pub fn set_class_decoder(d: ClassDecoder) {
    let _ = DECODER.set(d);
}

pub fn set_class_byte_source(s: ClassByteSource) {
    let _ = BYTE_SOURCE.set(s);
}

/// Prepares the method area, string-pool base entries, and the intrinsic
/// registry. Must run before `load_base_classes`.
pub fn init() -> Result<(), JvmEx> {
    string_pool::init();
    gfunction::register_all();
    let _ = meth_area();
    Ok(())
}

/// Fetches a loaded class by internal name. Readers share the lock.
pub fn meth_area_fetch(name: &str) -> Option<Arc<Klass>> {
    meth_area().read().unwrap().get(name).cloned()
}

/// Inserts `klass` under `name`. A name already present keeps its original
/// Klass and that one is returned, making double loads idempotent.
pub fn meth_area_insert(name: &str, klass: Klass) -> Arc<Klass> {
    let mut area = meth_area().write().unwrap();
    if let Some(existing) = area.get(name) {
        return existing.clone();
    }
    let arc = Arc::new(klass);
    area.insert(name.to_string(), arc.clone());
    arc
}

pub fn meth_area_size() -> usize {
    meth_area().read().unwrap().len()
}

const BASE_CLASSES: &[(&str, &str)] = &[
    // (class, superclass)
    ("java/lang/Object", ""),
    ("java/lang/String", "java/lang/Object"),
    ("java/lang/System", "java/lang/Object"),
    ("java/lang/Throwable", "java/lang/Object"),
    ("java/lang/StackTraceElement", "java/lang/Object"),
    ("java/io/PrintStream", "java/lang/Object"),
    ("java/lang/Exception", "java/lang/Throwable"),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/Error", "java/lang/Throwable"),
    ("java/lang/VirtualMachineError", "java/lang/Error"),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
];

/// Loads the base classes the interpreter assumes are always present. Each
/// gets status "loaded" and a method table populated from the G-function
/// registry; the String/System/Throwable statics are seeded alongside.
pub fn load_base_classes() {
    for &(name, superclass) in BASE_CLASSES {
        if meth_area_fetch(name).is_some() {
            continue;
        }
        let mut k = Klass::new(name, "bootstrap");
        if !superclass.is_empty() {
            k.superclass = string_pool::intern(superclass);
        }
        k.module = "java.base".into();
        for (meth_name, desc, g) in gfunction::signatures_for_class(name) {
            k.add_intrinsic(&meth_name, &desc, g);
        }
        k.set_status(KlassStatus::Loaded);
        meth_area_insert(name, k);
        debug!("base class loaded: {name}");
    }
    gfunction::string::load_statics();
    gfunction::system::load_statics();
    gfunction::throwable::load_statics();
    info!("base classes loaded: {} classes in method area", meth_area_size());
}

fn classpath_candidates(name: &str) -> Vec<PathBuf> {
    let mut roots = vec![PathBuf::from(".")];
    if let Some(dir) = std::env::var_os("KAVA_TESTDATA") {
        roots.push(PathBuf::from(dir));
    }
    roots
        .into_iter()
        .map(|r| r.join(format!("{name}.class")))
        .collect()
}

/// Loads a class by internal name alone. The loose-file classpath is tried
/// first, then the jmod index + registered byte source. The decoded Klass is
/// inserted into the method area and returned.
pub fn load_class_from_name_only(name: &str) -> Result<Arc<Klass>, JvmEx> {
    if let Some(k) = meth_area_fetch(name) {
        return Ok(k);
    }

    let mut bytes: Option<Vec<u8>> = None;
    for candidate in classpath_candidates(name) {
        if let Ok(b) = fs::read(&candidate) {
            debug!("loading {name} from {}", candidate.display());
            bytes = Some(b);
            break;
        }
    }
    if bytes.is_none() {
        let archive = jmod::map_fetch(name);
        if !archive.is_empty() {
            if let Some(source) = BYTE_SOURCE.get() {
                bytes = source(&archive, name);
            } else {
                warn!("{name} found in {archive} but no class byte source is registered");
            }
        }
    }

    let Some(bytes) = bytes else {
        return Err(JvmEx::new(
            ExcKind::ClassNotLoaded,
            format!("could not locate class {name}"),
        ));
    };

    let Some(decoder) = DECODER.get() else {
        return Err(JvmEx::new(
            ExcKind::ClassFormat,
            format!("no class decoder registered, cannot load {name}"),
        ));
    };
    let klass = decoder(&bytes)?;
    Ok(meth_area_insert(name, klass))
}

/// The superclass chain of `class_name_idx` as string-pool indices, nearest
/// first, ending with java/lang/Object. Classes missing from the method area
/// are loaded on demand; an unresolvable link truncates the chain.
pub fn superclasses(class_name_idx: u32) -> Vec<u32> {
    let mut chain = Vec::new();
    if class_name_idx == string_pool::INVALID || class_name_idx == string_pool::OBJECT {
        return chain;
    }
    let mut current = class_name_idx;
    loop {
        let Some(name) = string_pool::get(current) else {
            return chain;
        };
        let klass = match meth_area_fetch(name) {
            Some(k) => k,
            None => match load_class_from_name_only(name) {
                Ok(k) => k,
                Err(_) => return chain,
            },
        };
        let superclass = klass.superclass;
        if superclass == string_pool::INVALID {
            return chain;
        }
        chain.push(superclass);
        if superclass == string_pool::OBJECT {
            return chain;
        }
        current = superclass;
    }
}

/// Whether class `a` is `b` or a subclass of it, using what is already in
/// the method area (no loading; used on the exception path).
pub fn is_loaded_subclass_of(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let mut current = a.to_string();
    loop {
        let Some(klass) = meth_area_fetch(&current) else {
            return false;
        };
        let Some(superclass) = klass.superclass_name() else {
            return false;
        };
        if superclass == b {
            return true;
        }
        if superclass == "java/lang/Object" {
            return false;
        }
        current = superclass.to_string();
    }
}

/// Whether class `a` is `b` or a subclass, loading links on demand. Takes
/// string-pool indices, the currency of klass references.
pub fn is_subclass_of(a: u32, b: u32) -> bool {
    if a == b {
        return true;
    }
    superclasses(a).contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_and_base_classes() {
        crate::globals::init_globals("test");
        init().unwrap();
        load_base_classes();

        let obj = meth_area_fetch("java/lang/Object").unwrap();
        assert_eq!(obj.status(), KlassStatus::Loaded);
        assert_eq!(obj.superclass, string_pool::INVALID);

        let string = meth_area_fetch("java/lang/String").unwrap();
        assert_eq!(string.superclass_name(), Some("java/lang/Object"));
        assert!(string.method("length", "()I").is_some());

        let system = meth_area_fetch("java/lang/System").unwrap();
        assert!(system
            .method(
                "arraycopy",
                "(Ljava/lang/Object;ILjava/lang/Object;II)V"
            )
            .is_some());
    }

    #[test]
    fn double_insert_is_idempotent() {
        crate::globals::init_globals("test");
        init().unwrap();
        let first = meth_area_insert("test/Doubled", Klass::new("test/Doubled", "bootstrap"));
        let second = meth_area_insert("test/Doubled", Klass::new("test/Doubled", "bootstrap"));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_class_is_class_not_loaded() {
        crate::globals::init_globals("test");
        init().unwrap();
        let err = load_class_from_name_only("does/not/Exist").unwrap_err();
        assert_eq!(err.kind, ExcKind::ClassNotLoaded);
    }

    #[test]
    fn subclass_chains() {
        crate::globals::init_globals("test");
        init().unwrap();
        load_base_classes();
        assert!(is_loaded_subclass_of(
            "java/lang/RuntimeException",
            "java/lang/Throwable"
        ));
        assert!(!is_loaded_subclass_of(
            "java/lang/Throwable",
            "java/lang/RuntimeException"
        ));

        let rte = string_pool::intern("java/lang/RuntimeException");
        let throwable = string_pool::intern("java/lang/Throwable");
        assert!(is_subclass_of(rte, throwable));
        let chain = superclasses(rte);
        assert!(chain.contains(&throwable));
        assert_eq!(chain.last(), Some(&string_pool::OBJECT));
    }
}
