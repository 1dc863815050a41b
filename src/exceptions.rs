//! The exception taxonomy the core routes on, plus the throw/catch walk.
//! Intrinsics surface failures as gError blocks; the interpreter converts
//! them (and its own invariant breaks) into a `JvmEx`, which unwinds the
//! frame stack looking for a handler whose byte range covers the pc and
//! whose catch type is the thrown class or a superclass of it.

use thiserror::Error;
use tracing::error;

use crate::frame::FrameStack;
use crate::object::{self, Field, FieldValue, JvmValue, Object};
use crate::{classloader, globals, shutdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExcKind {
    #[error("java.lang.ArithmeticException")]
    Arithmetic,
    #[error("java.lang.ArrayIndexOutOfBoundsException")]
    ArrayIndexOutOfBounds,
    #[error("java.lang.ArrayStoreException")]
    ArrayStore,
    #[error("java.lang.ClassCastException")]
    ClassCast,
    #[error("java.lang.ClassFormatError")]
    ClassFormat,
    #[error("java.lang.ClassNotLoadedException")]
    ClassNotLoaded,
    #[error("java.lang.IllegalArgumentException")]
    IllegalArgument,
    #[error("java.lang.instrument.IllegalClassFormatException")]
    IllegalClassFormat,
    #[error("java.lang.IncompatibleClassChangeError")]
    IncompatibleClassChange,
    #[error("java.lang.InternalException")]
    Internal,
    #[error("java.lang.InvalidTypeException")]
    InvalidType,
    #[error("java.lang.NegativeArraySizeException")]
    NegativeArraySize,
    #[error("java.lang.NullPointerException")]
    NullPointer,
    #[error("java.lang.StackOverflowError")]
    StackOverflow,
    #[error("java.lang.StringIndexOutOfBoundsException")]
    StringIndexOutOfBounds,
    #[error("java.io.UnsupportedEncodingException")]
    UnsupportedEncoding,
    #[error("java.lang.UnsupportedOperationException")]
    UnsupportedOperation,
    #[error("java.lang.VirtualMachineError")]
    VirtualMachine,
}

impl ExcKind {
    /// Internal (slash) form of the exception's class name.
    pub const fn class_name(self) -> &'static str {
        match self {
            ExcKind::Arithmetic => "java/lang/ArithmeticException",
            ExcKind::ClassCast => "java/lang/ClassCastException",
            ExcKind::NegativeArraySize => "java/lang/NegativeArraySizeException",
            ExcKind::ArrayIndexOutOfBounds => "java/lang/ArrayIndexOutOfBoundsException",
            ExcKind::ArrayStore => "java/lang/ArrayStoreException",
            ExcKind::ClassFormat => "java/lang/ClassFormatError",
            ExcKind::ClassNotLoaded => "java/lang/ClassNotLoadedException",
            ExcKind::IllegalArgument => "java/lang/IllegalArgumentException",
            ExcKind::IllegalClassFormat => "java/lang/instrument/IllegalClassFormatException",
            ExcKind::IncompatibleClassChange => "java/lang/IncompatibleClassChangeError",
            ExcKind::Internal => "java/lang/InternalException",
            ExcKind::InvalidType => "java/lang/InvalidTypeException",
            ExcKind::NullPointer => "java/lang/NullPointerException",
            ExcKind::StackOverflow => "java/lang/StackOverflowError",
            ExcKind::StringIndexOutOfBounds => "java/lang/StringIndexOutOfBoundsException",
            ExcKind::UnsupportedEncoding => "java/io/UnsupportedEncodingException",
            ExcKind::UnsupportedOperation => "java/lang/UnsupportedOperationException",
            ExcKind::VirtualMachine => "java/lang/VirtualMachineError",
        }
    }
}

/// The taxonomy kind for a thrown class the core knows about; user-defined
/// throwables have no kind and are routed by class name alone.
pub fn kind_for_class(name: &str) -> Option<ExcKind> {
    use ExcKind::*;
    Some(match name {
        "java/lang/ArithmeticException" => Arithmetic,
        "java/lang/ArrayIndexOutOfBoundsException" => ArrayIndexOutOfBounds,
        "java/lang/ArrayStoreException" => ArrayStore,
        "java/lang/ClassCastException" => ClassCast,
        "java/lang/ClassFormatError" => ClassFormat,
        "java/lang/ClassNotLoadedException" => ClassNotLoaded,
        "java/lang/IllegalArgumentException" => IllegalArgument,
        "java/lang/instrument/IllegalClassFormatException" => IllegalClassFormat,
        "java/lang/IncompatibleClassChangeError" => IncompatibleClassChange,
        "java/lang/InternalException" => Internal,
        "java/lang/InvalidTypeException" => InvalidType,
        "java/lang/NegativeArraySizeException" => NegativeArraySize,
        "java/lang/NullPointerException" => NullPointer,
        "java/lang/StackOverflowError" => StackOverflow,
        "java/lang/StringIndexOutOfBoundsException" => StringIndexOutOfBounds,
        "java/io/UnsupportedEncodingException" => UnsupportedEncoding,
        "java/lang/UnsupportedOperationException" => UnsupportedOperation,
        "java/lang/VirtualMachineError" => VirtualMachine,
        _ => return None,
    })
}

/// An in-flight exception. `obj` is the guest Throwable when one exists
/// (ATHROW); throws originating in the core synthesize one on demand.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {msg}")]
pub struct JvmEx {
    pub kind: ExcKind,
    pub msg: String,
    pub obj: Option<JvmValue>,
}

impl JvmEx {
    pub fn new(kind: ExcKind, msg: impl Into<String>) -> Self {
        JvmEx {
            kind,
            msg: msg.into(),
            obj: None,
        }
    }

    pub fn with_obj(kind: ExcKind, msg: impl Into<String>, obj: JvmValue) -> Self {
        JvmEx {
            kind,
            msg: msg.into(),
            obj: Some(obj),
        }
    }

    /// Internal name of the thrown class, preferring the guest object's.
    pub fn thrown_class(&self) -> String {
        if let Some(JvmValue::Ref(r)) = &self.obj {
            return r.lock().unwrap().klass_name().to_string();
        }
        self.kind.class_name().to_string()
    }

    /// The Throwable-shaped object to deliver to a handler, synthesizing one
    /// when the throw originated inside the core.
    pub fn throwable(&self) -> JvmValue {
        match &self.obj {
            Some(v) => v.clone(),
            None => object::make_ref(make_throwable(self.kind, &self.msg)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrowStatus {
    Caught,
    NotCaught,
}

/// Builds a Throwable-shaped object: klass set to the exception class,
/// `detailMessage` holding the message string.
pub fn make_throwable(kind: ExcKind, msg: &str) -> Object {
    let mut obj = Object::with_class(kind.class_name());
    obj.set_field(
        "detailMessage",
        Field::new(
            "Ljava/lang/String;",
            FieldValue::Ref(object::make_ref(object::string_object_from_str(msg))),
        ),
    );
    obj
}

/// Superclass edges for the exception classes the core itself can throw,
/// used when the thrown or caught class has no method-area entry.
fn builtin_parent(class: &str) -> Option<&'static str> {
    Some(match class {
        "java/lang/Exception" | "java/lang/Error" => "java/lang/Throwable",
        "java/lang/RuntimeException" => "java/lang/Exception",
        "java/io/IOException" => "java/lang/Exception",
        "java/lang/instrument/IllegalClassFormatException" => "java/lang/Exception",
        "java/lang/LinkageError" | "java/lang/VirtualMachineError" => "java/lang/Error",
        "java/lang/ClassFormatError" | "java/lang/IncompatibleClassChangeError" => {
            "java/lang/LinkageError"
        }
        "java/lang/StackOverflowError"
        | "java/lang/InternalException"
        | "java/lang/InvalidTypeException"
        | "java/lang/ClassNotLoadedException" => "java/lang/VirtualMachineError",
        "java/lang/ArithmeticException"
        | "java/lang/ClassCastException"
        | "java/lang/NegativeArraySizeException"
        | "java/lang/ArrayStoreException"
        | "java/lang/IllegalArgumentException"
        | "java/lang/NullPointerException"
        | "java/lang/UnsupportedOperationException" => "java/lang/RuntimeException",
        "java/lang/IndexOutOfBoundsException" => "java/lang/RuntimeException",
        "java/lang/ArrayIndexOutOfBoundsException"
        | "java/lang/StringIndexOutOfBoundsException" => "java/lang/IndexOutOfBoundsException",
        "java/io/UnsupportedEncodingException" => "java/io/IOException",
        _ => return None,
    })
}

/// Whether a handler declared for `handler_class` catches a thrown
/// `thrown_class`: identity, the built-in taxonomy walk, or the loaded
/// superclass chain.
pub fn handler_catches(thrown_class: &str, handler_class: &str) -> bool {
    if handler_class == thrown_class || handler_class == "java/lang/Throwable" {
        return true;
    }
    let mut cur = thrown_class;
    while let Some(parent) = builtin_parent(cur) {
        if parent == handler_class {
            return true;
        }
        cur = parent;
    }
    classloader::is_loaded_subclass_of(thrown_class, handler_class)
}

/// Records a throw and unwinds the frame stack. On a match the handler
/// frame's operand stack is cleared, the exception reference pushed, and pc
/// set to the handler offset. Unhandled: the process terminates through
/// shutdown with `JVM_EXCEPTION` -- except in test mode, where the status is
/// returned so callers can assert on it.
pub fn throw_ex(kind: ExcKind, msg: &str, fs: &mut FrameStack) -> ThrowStatus {
    let ex = JvmEx::new(kind, msg);
    match resolve_catch(fs, &ex) {
        ThrowStatus::Caught => ThrowStatus::Caught,
        ThrowStatus::NotCaught => {
            if globals::in_test_mode() {
                return ThrowStatus::NotCaught;
            }
            report_uncaught(&ex);
            shutdown::exit(shutdown::JVM_EXCEPTION);
            ThrowStatus::NotCaught
        }
    }
}

/// The catch walk alone: pops frames until one of them has a live handler
/// for `ex`, mutating that frame for re-entry. Leaves the stack drained when
/// nothing catches.
pub fn resolve_catch(fs: &mut FrameStack, ex: &JvmEx) -> ThrowStatus {
    let thrown = ex.thrown_class();
    while let Some(frame) = fs.top_mut() {
        if let Some(handler_pc) = frame.handler_for(&thrown) {
            frame.clear_op_stack();
            frame.push_unchecked(ex.throwable());
            frame.pc = handler_pc;
            return ThrowStatus::Caught;
        }
        fs.pop();
    }
    ThrowStatus::NotCaught
}

pub fn report_uncaught(ex: &JvmEx) {
    error!("uncaught exception: {ex}");
    eprintln!(
        "Exception in thread \"main\" {}: {}",
        ex.kind, ex.msg
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_names() {
        assert_eq!(
            ExcKind::Arithmetic.class_name(),
            "java/lang/ArithmeticException"
        );
        assert_eq!(
            ExcKind::Arithmetic.to_string(),
            "java.lang.ArithmeticException"
        );
    }

    #[test]
    fn throwable_carries_message() {
        let t = make_throwable(ExcKind::NullPointer, "oops");
        assert_eq!(t.klass_name(), "java/lang/NullPointerException");
        match &t.field("detailMessage").unwrap().fvalue {
            FieldValue::Ref(JvmValue::Ref(r)) => {
                let msg = object::string_from_string_object(&r.lock().unwrap());
                assert_eq!(msg.as_deref(), Some("oops"));
            }
            other => panic!("detailMessage should be a String ref, got {other:?}"),
        }
    }

    #[test]
    fn throw_ex_reports_status_in_test_mode() {
        use crate::class::ExceptionEntry;
        use crate::frame::Frame;
        crate::globals::init_globals("test");

        // no handler anywhere: not caught, and no process exit in test mode
        let mut fs = FrameStack::new(1);
        fs.push_frame(Frame::with_capacity(2)).unwrap();
        assert_eq!(
            throw_ex(ExcKind::Arithmetic, "/ by zero", &mut fs),
            ThrowStatus::NotCaught
        );

        // a catch-all handler covering the pc takes the throw
        let mut fs = FrameStack::new(1);
        let mut f = Frame::with_capacity(2);
        f.exceptions.push(ExceptionEntry {
            start_pc: 0,
            end_pc: 8,
            handler_pc: 5,
            catch_type: 0,
        });
        f.pc = 3;
        fs.push_frame(f).unwrap();
        assert_eq!(
            throw_ex(ExcKind::Arithmetic, "/ by zero", &mut fs),
            ThrowStatus::Caught
        );
        let top = fs.top_mut().unwrap();
        assert_eq!(top.pc, 5);
        assert_eq!(top.tos, 0);
        match top.pop().unwrap() {
            JvmValue::Ref(r) => {
                assert_eq!(
                    r.lock().unwrap().klass_name(),
                    "java/lang/ArithmeticException"
                );
            }
            other => panic!("handler should receive the throwable, got {other:?}"),
        }
    }

    #[test]
    fn builtin_hierarchy_catches() {
        assert!(handler_catches(
            "java/lang/ArithmeticException",
            "java/lang/ArithmeticException"
        ));
        assert!(handler_catches(
            "java/lang/ArithmeticException",
            "java/lang/RuntimeException"
        ));
        assert!(handler_catches(
            "java/lang/ArithmeticException",
            "java/lang/Throwable"
        ));
        assert!(handler_catches(
            "java/lang/ArrayIndexOutOfBoundsException",
            "java/lang/IndexOutOfBoundsException"
        ));
        assert!(!handler_catches(
            "java/lang/ArithmeticException",
            "java/lang/NullPointerException"
        ));
        assert!(!handler_catches(
            "java/lang/RuntimeException",
            "java/lang/ArithmeticException"
        ));
    }
}
