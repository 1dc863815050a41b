//! Intrinsics for java/lang/Throwable. Stack traces are materialized from
//! the live frame stack: one StackTraceElement per frame, top-down, with the
//! source line taken from the method's line-number table when one exists.

use std::collections::HashMap;

use crate::classloader;
use crate::frame::FrameStack;
use crate::gfunction::{arg_obj, GMeth, GfResult};
use crate::object::{self, Field, FieldValue, JvmValue, Object};
use crate::statics;
use crate::types;

pub fn load(map: &mut HashMap<String, GMeth>) {
    map.insert(
        "java/lang/Throwable.<clinit>()V".to_string(),
        GMeth::new(0, throwable_clinit),
    );
    map.insert(
        "java/lang/Throwable.<init>()V".to_string(),
        GMeth::new(0, throwable_init),
    );
    map.insert(
        "java/lang/Throwable.<init>(Ljava/lang/String;)V".to_string(),
        GMeth::new(1, throwable_init_message),
    );
    map.insert(
        "java/lang/Throwable.getMessage()Ljava/lang/String;".to_string(),
        GMeth::new(0, get_message),
    );
    map.insert(
        "java/lang/Throwable.fillInStackTrace()Ljava/lang/Throwable;".to_string(),
        GMeth::with_context(0, fill_in_stack_trace),
    );
    map.insert(
        "java/lang/Throwable.printStackTrace()V".to_string(),
        GMeth::new(0, print_stack_trace),
    );
}

/// Seeds the Throwable statics referenced by compiled constructors.
pub fn load_statics() {
    statics::add_static(
        "java/lang/Throwable.UNASSIGNED_STACK",
        "[Ljava/lang/StackTraceElement;",
        FieldValue::Ref(object::make_ref(object::make_1dim_ref_array(
            "java/lang/StackTraceElement",
            0,
        ))),
    );
    statics::add_static(
        "java/lang/Throwable.EMPTY_THROWABLE_ARRAY",
        "[Ljava/lang/Throwable;",
        FieldValue::Ref(object::make_ref(object::make_1dim_ref_array(
            "java/lang/Throwable",
            0,
        ))),
    );
}

fn throwable_clinit(_args: &mut [JvmValue]) -> GfResult {
    load_statics();
    GfResult::Void
}

fn throwable_init(_args: &mut [JvmValue]) -> GfResult {
    GfResult::Void
}

fn throwable_init_message(args: &mut [JvmValue]) -> GfResult {
    let this = match arg_obj(args, 0) {
        Ok(r) => r,
        Err(e) => return GfResult::Err(e),
    };
    let message = args.get(1).cloned().unwrap_or(JvmValue::Null);
    this.lock().unwrap().set_field(
        "detailMessage",
        Field::new("Ljava/lang/String;", FieldValue::Ref(message)),
    );
    GfResult::Void
}

fn get_message(args: &mut [JvmValue]) -> GfResult {
    let this = match arg_obj(args, 0) {
        Ok(r) => r,
        Err(e) => return GfResult::Err(e),
    };
    let obj = this.lock().unwrap();
    match obj.field("detailMessage").map(|f| &f.fvalue) {
        Some(FieldValue::Ref(v)) => GfResult::Val(v.clone()),
        _ => GfResult::Val(JvmValue::Null),
    }
}

fn string_field(obj: &mut Object, name: &str, value: &str) {
    obj.set_field(
        name,
        Field::new(
            "Ljava/lang/String;",
            FieldValue::Ref(object::make_ref(object::string_object_from_str(value))),
        ),
    );
}

/// One StackTraceElement for each live frame, top of stack first.
fn capture_stack(fs: &FrameStack) -> Vec<JvmValue> {
    let mut elements = Vec::with_capacity(fs.len());
    for frame in fs.iter_top_down() {
        let mut elem = Object::with_class("java/lang/StackTraceElement");
        string_field(&mut elem, "declaringClass", &frame.cl_name);
        string_field(&mut elem, "methodName", &frame.meth_name);
        let (file, module) = match classloader::meth_area_fetch(&frame.cl_name) {
            Some(k) => (k.source_file.to_string(), k.module.to_string()),
            None => (String::new(), String::new()),
        };
        string_field(&mut elem, "fileName", &file);
        string_field(&mut elem, "moduleName", &module);
        elem.set_field(
            "lineNumber",
            Field::new(
                types::INT,
                FieldValue::Int(i64::from(frame.current_line().unwrap_or(0))),
            ),
        );
        elements.push(object::make_ref(elem));
    }
    elements
}

fn fill_in_stack_trace(fs: &mut FrameStack, args: &mut [JvmValue]) -> GfResult {
    let this = match arg_obj(args, 0) {
        Ok(r) => r,
        Err(e) => return GfResult::Err(e),
    };
    let elements = capture_stack(fs);
    let mut arr = object::make_1dim_ref_array("java/lang/StackTraceElement", elements.len());
    arr.set_field(
        "value",
        Field::new(
            "[Ljava/lang/StackTraceElement;",
            FieldValue::Refs(elements),
        ),
    );
    this.lock().unwrap().set_field(
        "stackTrace",
        Field::new(
            "[Ljava/lang/StackTraceElement;",
            FieldValue::Ref(object::make_ref(arr)),
        ),
    );
    GfResult::Val(args[0].clone())
}

fn element_string(elem: &Object) -> String {
    let get = |name: &str| -> String {
        match elem.field(name).map(|f| &f.fvalue) {
            Some(FieldValue::Ref(JvmValue::Ref(r))) => {
                object::string_from_string_object(&r.lock().unwrap()).unwrap_or_default()
            }
            _ => String::new(),
        }
    };
    let line = match elem.field("lineNumber").map(|f| &f.fvalue) {
        Some(FieldValue::Int(l)) => *l,
        _ => 0,
    };
    let file = get("fileName");
    if file.is_empty() {
        format!("{}.{}", get("declaringClass"), get("methodName"))
    } else {
        format!("{}.{}({file}:{line})", get("declaringClass"), get("methodName"))
    }
}

fn print_stack_trace(args: &mut [JvmValue]) -> GfResult {
    let this = match arg_obj(args, 0) {
        Ok(r) => r,
        Err(e) => return GfResult::Err(e),
    };
    let obj = this.lock().unwrap();
    let class_name = obj.klass_name().replace('/', ".");
    let message = match obj.field("detailMessage").map(|f| &f.fvalue) {
        Some(FieldValue::Ref(JvmValue::Ref(r))) => {
            object::string_from_string_object(&r.lock().unwrap()).unwrap_or_default()
        }
        _ => String::new(),
    };
    if message.is_empty() {
        eprintln!("{class_name}");
    } else {
        eprintln!("{class_name}: {message}");
    }

    if let Some(FieldValue::Ref(JvmValue::Ref(arr))) =
        obj.field("stackTrace").map(|f| &f.fvalue)
    {
        let arr = arr.lock().unwrap();
        if let Some(FieldValue::Refs(elements)) = arr.field("value").map(|f| &f.fvalue) {
            for elem in elements {
                if let JvmValue::Ref(e) = elem {
                    eprintln!("\tat {}", element_string(&e.lock().unwrap()));
                }
            }
        }
    }
    GfResult::Void
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[test]
    fn message_round_trip() {
        let throwable = object::make_ref(Object::with_class("java/lang/Throwable"));
        let msg = object::make_ref(object::string_object_from_str("went sideways"));
        let mut args = [throwable.clone(), msg];
        assert!(matches!(throwable_init_message(&mut args), GfResult::Void));

        let mut args = [throwable];
        match get_message(&mut args) {
            GfResult::Val(JvmValue::Ref(r)) => {
                let s = object::string_from_string_object(&r.lock().unwrap()).unwrap();
                assert_eq!(s, "went sideways");
            }
            _ => panic!("getMessage should return the stored string"),
        }
    }

    #[test]
    fn fill_in_stack_trace_walks_frames_top_down() {
        let mut fs = FrameStack::new(1);
        let mut outer = Frame::with_capacity(4);
        outer.cl_name = "com/example/Outer".into();
        outer.meth_name = "main".into();
        fs.push_frame(outer).unwrap();
        let mut inner = Frame::with_capacity(4);
        inner.cl_name = "com/example/Inner".into();
        inner.meth_name = "work".into();
        fs.push_frame(inner).unwrap();

        let throwable = object::make_ref(Object::with_class("java/lang/Throwable"));
        let mut args = [throwable.clone()];
        match fill_in_stack_trace(&mut fs, &mut args) {
            GfResult::Val(v) => assert_eq!(v, throwable),
            _ => panic!("fillInStackTrace returns this"),
        }

        let this = throwable.as_ref().unwrap();
        let obj = this.lock().unwrap();
        let FieldValue::Ref(JvmValue::Ref(arr)) = &obj.field("stackTrace").unwrap().fvalue
        else {
            panic!("stackTrace should hold a ref array");
        };
        let arr = arr.lock().unwrap();
        let FieldValue::Refs(elements) = &arr.field("value").unwrap().fvalue else {
            panic!();
        };
        assert_eq!(elements.len(), 2);
        let JvmValue::Ref(top) = &elements[0] else { panic!() };
        let top = top.lock().unwrap();
        let FieldValue::Ref(JvmValue::Ref(cls)) = &top.field("declaringClass").unwrap().fvalue
        else {
            panic!();
        };
        assert_eq!(
            object::string_from_string_object(&cls.lock().unwrap()).as_deref(),
            Some("com/example/Inner")
        );
    }
}
