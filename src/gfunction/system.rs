//! Intrinsics for java/lang/System: stream wiring, arraycopy, clocks,
//! process exit, and system properties.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::exceptions::ExcKind;
use crate::gfunction::{arg_int, arg_obj, arg_string, GErrBlk, GMeth, GfResult};
use crate::object::{self, Field, FieldValue, JvmValue, Object};
use crate::statics;
use crate::{shutdown, types};

pub fn load(map: &mut HashMap<String, GMeth>) {
    map.insert(
        "java/lang/System.<clinit>()V".to_string(),
        GMeth::new(0, system_clinit),
    );
    map.insert(
        "java/lang/System.arraycopy(Ljava/lang/Object;ILjava/lang/Object;II)V".to_string(),
        GMeth::new(5, arraycopy),
    );
    map.insert(
        "java/lang/System.currentTimeMillis()J".to_string(),
        GMeth::new(0, current_time_millis),
    );
    map.insert(
        "java/lang/System.nanoTime()J".to_string(),
        GMeth::new(0, nano_time),
    );
    map.insert(
        "java/lang/System.exit(I)V".to_string(),
        GMeth::new(1, system_exit),
    );
    map.insert(
        "java/lang/System.getProperty(Ljava/lang/String;)Ljava/lang/String;".to_string(),
        GMeth::new(1, get_property),
    );
}

fn stream_object(class: &str, fd: i64) -> FieldValue {
    let mut obj = Object::with_class(class);
    obj.set_field("fd", Field::new(types::INT, FieldValue::Int(fd)));
    FieldValue::Ref(object::make_ref(obj))
}

/// Wires System.in/out/err to the host's standard streams. Runs at class
/// init of java/lang/System and again harmlessly if re-invoked.
pub fn load_statics() {
    statics::add_static(
        "java/lang/System.in",
        "Ljava/io/InputStream;",
        stream_object("java/io/BufferedInputStream", 0),
    );
    statics::add_static(
        "java/lang/System.out",
        "Ljava/io/PrintStream;",
        stream_object("java/io/PrintStream", 1),
    );
    statics::add_static(
        "java/lang/System.err",
        "Ljava/io/PrintStream;",
        stream_object("java/io/PrintStream", 2),
    );
}

fn system_clinit(_args: &mut [JvmValue]) -> GfResult {
    load_statics();
    GfResult::Void
}

fn bounds_err(msg: String) -> GfResult {
    GfResult::Err(GErrBlk::new(ExcKind::ArrayIndexOutOfBounds, msg))
}

/// System.arraycopy with the full check set: both operands must be arrays of
/// the same component type, all positions non-negative, and both ranges in
/// bounds. A copy within one array runs back-to-front when the regions
/// overlap with the destination ahead of the source.
fn arraycopy(args: &mut [JvmValue]) -> GfResult {
    let src = match arg_obj(args, 0) {
        Ok(r) => r,
        Err(e) => return GfResult::Err(e),
    };
    let dest = match arg_obj(args, 2) {
        Ok(r) => r,
        Err(e) => return GfResult::Err(e),
    };
    let (src_pos, dest_pos, length) = match (arg_int(args, 1), arg_int(args, 3), arg_int(args, 4))
    {
        (Ok(a), Ok(b), Ok(c)) => (a, b, c),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return GfResult::Err(e),
    };

    {
        let s = src.lock().unwrap();
        if !s.is_array() {
            return GfResult::Err(GErrBlk::new(
                ExcKind::ArrayStore,
                "arraycopy source is not an array",
            ));
        }
    }
    {
        let d = dest.lock().unwrap();
        if !d.is_array() {
            return GfResult::Err(GErrBlk::new(
                ExcKind::ArrayStore,
                "arraycopy destination is not an array",
            ));
        }
    }

    let src_type = object::array_component_type(&src.lock().unwrap()).unwrap_or_default();
    let dest_type = object::array_component_type(&dest.lock().unwrap()).unwrap_or_default();
    if src_type != dest_type {
        return GfResult::Err(GErrBlk::new(
            ExcKind::ArrayStore,
            format!("arraycopy between [{src_type} and [{dest_type}"),
        ));
    }

    if src_pos < 0 || dest_pos < 0 || length < 0 {
        return bounds_err(format!(
            "arraycopy with negative srcPos {src_pos}, destPos {dest_pos}, or length {length}"
        ));
    }
    let src_len = object::array_length(&src.lock().unwrap()).unwrap_or(0) as i64;
    let dest_len = object::array_length(&dest.lock().unwrap()).unwrap_or(0) as i64;
    if src_pos + length > src_len || dest_pos + length > dest_len {
        return bounds_err(format!(
            "arraycopy range does not fit: src {src_pos}+{length}/{src_len}, dest {dest_pos}+{length}/{dest_len}"
        ));
    }

    let (sp, dp, n) = (src_pos as usize, dest_pos as usize, length as usize);
    if Arc::ptr_eq(&src, &dest) {
        // same backing store: copy_within moves back-to-front as needed
        let mut obj = src.lock().unwrap();
        match obj.fields.get_mut("value").map(|f| &mut f.fvalue) {
            Some(FieldValue::Bytes(b)) => b.copy_within(sp..sp + n, dp),
            Some(FieldValue::Longs(l)) => l.copy_within(sp..sp + n, dp),
            Some(FieldValue::Doubles(d)) => d.copy_within(sp..sp + n, dp),
            Some(FieldValue::Refs(r)) => {
                let window: Vec<JvmValue> = r[sp..sp + n].to_vec();
                r[dp..dp + n].clone_from_slice(&window);
            }
            _ => {
                return GfResult::Err(GErrBlk::new(
                    ExcKind::InvalidType,
                    "arraycopy on an array with no backing storage",
                ))
            }
        }
        return GfResult::Void;
    }

    let src_obj = src.lock().unwrap();
    let mut dest_obj = dest.lock().unwrap();
    match (
        src_obj.field("value").map(|f| &f.fvalue),
        dest_obj.fields.get_mut("value").map(|f| &mut f.fvalue),
    ) {
        (Some(FieldValue::Bytes(s)), Some(FieldValue::Bytes(d))) => {
            d[dp..dp + n].copy_from_slice(&s[sp..sp + n]);
        }
        (Some(FieldValue::Longs(s)), Some(FieldValue::Longs(d))) => {
            d[dp..dp + n].copy_from_slice(&s[sp..sp + n]);
        }
        (Some(FieldValue::Doubles(s)), Some(FieldValue::Doubles(d))) => {
            d[dp..dp + n].copy_from_slice(&s[sp..sp + n]);
        }
        (Some(FieldValue::Refs(s)), Some(FieldValue::Refs(d))) => {
            d[dp..dp + n].clone_from_slice(&s[sp..sp + n]);
        }
        _ => {
            return GfResult::Err(GErrBlk::new(
                ExcKind::ArrayStore,
                "arraycopy between arrays with different backing storage",
            ))
        }
    }
    GfResult::Void
}

fn current_time_millis(_args: &mut [JvmValue]) -> GfResult {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    GfResult::Val(JvmValue::Int(millis))
}

fn nano_time(_args: &mut [JvmValue]) -> GfResult {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    GfResult::Val(JvmValue::Int(start.elapsed().as_nanos() as i64))
}

fn system_exit(args: &mut [JvmValue]) -> GfResult {
    let code = arg_int(args, 0).map(|c| c as i32).unwrap_or(1);
    let status = if code == 0 {
        shutdown::OK
    } else {
        shutdown::APP_EXCEPTION
    };
    shutdown::exit(status);
    GfResult::Void
}

fn property_value(name: &str) -> Option<String> {
    let val = match name {
        "file.encoding" | "native.encoding" => "UTF-8".to_string(),
        "file.separator" => std::path::MAIN_SEPARATOR.to_string(),
        "java.class.path" => ".".to_string(),
        "java.compiler" => "no JIT".to_string(),
        "java.home" => std::env::var("JAVA_HOME").unwrap_or_default(),
        "java.library.path" => std::env::var("PATH").unwrap_or_default(),
        "java.vendor" | "java.vm.vendor" => "kava".to_string(),
        "java.vendor.url" => "https://kava-vm.example".to_string(),
        "java.vendor.version" | "java.vm.version" => crate::globals::VM_VERSION.to_string(),
        "java.version" => "17".to_string(),
        "java.vm.name" => "kava VM".to_string(),
        "java.vm.specification.name" => "Java Virtual Machine Specification".to_string(),
        "java.vm.specification.vendor" => "Oracle Corporation".to_string(),
        "java.vm.specification.version" => "17".to_string(),
        "line.separator" => {
            if cfg!(windows) {
                "\r\n".to_string()
            } else {
                "\n".to_string()
            }
        }
        "os.arch" => std::env::consts::ARCH.to_string(),
        "os.name" => std::env::consts::OS.to_string(),
        "os.version" => "unknown".to_string(),
        "path.separator" => {
            if cfg!(windows) {
                ";".to_string()
            } else {
                ":".to_string()
            }
        }
        "user.dir" => std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        "user.home" => std::env::var("HOME").unwrap_or_default(),
        "user.name" => std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default(),
        _ => return None,
    };
    Some(val)
}

fn get_property(args: &mut [JvmValue]) -> GfResult {
    let name = match arg_string(args, 0) {
        Ok(s) => s,
        Err(e) => return GfResult::Err(e),
    };
    match property_value(&name) {
        Some(v) => GfResult::Val(object::make_ref(object::string_object_from_str(&v))),
        None => GfResult::Val(JvmValue::Null),
    }
}
