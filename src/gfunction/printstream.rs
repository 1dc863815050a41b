//! Intrinsics for java/io/PrintStream. The receiver carries an `fd` field
//! wired by System's class init: 1 writes stdout, 2 writes stderr.

use std::collections::HashMap;
use std::io::Write;

use crate::gfunction::{arg_obj, GMeth, GfResult};
use crate::object::{self, FieldValue, JvmValue};
use crate::types;

pub fn load(map: &mut HashMap<String, GMeth>) {
    map.insert(
        "java/io/PrintStream.println()V".to_string(),
        GMeth::new(0, println_empty),
    );
    map.insert(
        "java/io/PrintStream.println(Ljava/lang/String;)V".to_string(),
        GMeth::new(1, println_string),
    );
    map.insert(
        "java/io/PrintStream.println(Ljava/lang/Object;)V".to_string(),
        GMeth::new(1, println_object),
    );
    map.insert(
        "java/io/PrintStream.println(I)V".to_string(),
        GMeth::new(1, println_int),
    );
    map.insert(
        "java/io/PrintStream.println(J)V".to_string(),
        GMeth::new(2, println_int),
    );
    map.insert(
        "java/io/PrintStream.println(Z)V".to_string(),
        GMeth::new(1, println_boolean),
    );
    map.insert(
        "java/io/PrintStream.println(C)V".to_string(),
        GMeth::new(1, println_char),
    );
    map.insert(
        "java/io/PrintStream.println(F)V".to_string(),
        GMeth::new(1, println_float),
    );
    map.insert(
        "java/io/PrintStream.println(D)V".to_string(),
        GMeth::new(2, println_float),
    );
    map.insert(
        "java/io/PrintStream.print(Ljava/lang/String;)V".to_string(),
        GMeth::new(1, print_string),
    );
    map.insert(
        "java/io/PrintStream.print(I)V".to_string(),
        GMeth::new(1, print_int),
    );
    map.insert(
        "java/io/PrintStream.print(J)V".to_string(),
        GMeth::new(2, print_int),
    );
    map.insert(
        "java/io/PrintStream.print(C)V".to_string(),
        GMeth::new(1, print_char),
    );
}

fn stream_fd(args: &[JvmValue]) -> i64 {
    match arg_obj(args, 0) {
        Ok(r) => match r.lock().unwrap().field("fd").map(|f| &f.fvalue) {
            Some(FieldValue::Int(fd)) => *fd,
            _ => 1,
        },
        Err(_) => 1,
    }
}

fn emit(fd: i64, text: &str, newline: bool) -> GfResult {
    if fd == 2 {
        let mut err = std::io::stderr();
        let _ = if newline {
            writeln!(err, "{text}")
        } else {
            write!(err, "{text}")
        };
    } else {
        let mut out = std::io::stdout();
        let _ = if newline {
            writeln!(out, "{text}")
        } else {
            write!(out, "{text}")
        };
        let _ = out.flush();
    }
    GfResult::Void
}

fn render_arg(args: &[JvmValue]) -> String {
    match args.get(1) {
        Some(JvmValue::Ref(r)) => {
            let obj = r.lock().unwrap();
            match object::string_from_string_object(&obj) {
                Some(s) => s,
                None => format!("{obj:?}"),
            }
        }
        Some(JvmValue::Int(i)) => i.to_string(),
        Some(JvmValue::Float(f)) => f.to_string(),
        Some(JvmValue::Null) | None => "null".to_string(),
    }
}

fn println_empty(args: &mut [JvmValue]) -> GfResult {
    emit(stream_fd(args), "", true)
}

fn println_string(args: &mut [JvmValue]) -> GfResult {
    emit(stream_fd(args), &render_arg(args), true)
}

fn println_object(args: &mut [JvmValue]) -> GfResult {
    emit(stream_fd(args), &render_arg(args), true)
}

fn println_int(args: &mut [JvmValue]) -> GfResult {
    emit(stream_fd(args), &render_arg(args), true)
}

fn println_boolean(args: &mut [JvmValue]) -> GfResult {
    let text = match args.get(1) {
        Some(JvmValue::Int(v)) if *v != types::JAVA_BOOL_FALSE => "true",
        _ => "false",
    };
    emit(stream_fd(args), text, true)
}

fn println_char(args: &mut [JvmValue]) -> GfResult {
    let text = match args.get(1) {
        Some(JvmValue::Int(v)) => char::from_u32(*v as u32)
            .unwrap_or(char::REPLACEMENT_CHARACTER)
            .to_string(),
        _ => String::new(),
    };
    emit(stream_fd(args), &text, true)
}

fn println_float(args: &mut [JvmValue]) -> GfResult {
    emit(stream_fd(args), &render_arg(args), true)
}

fn print_string(args: &mut [JvmValue]) -> GfResult {
    emit(stream_fd(args), &render_arg(args), false)
}

fn print_int(args: &mut [JvmValue]) -> GfResult {
    emit(stream_fd(args), &render_arg(args), false)
}

fn print_char(args: &mut [JvmValue]) -> GfResult {
    let text = match args.get(1) {
        Some(JvmValue::Int(v)) => char::from_u32(*v as u32)
            .unwrap_or(char::REPLACEMENT_CHARACTER)
            .to_string(),
        _ => String::new(),
    };
    emit(stream_fd(args), &text, false)
}
