//! Method invocation: the four invoke forms, argument transfer between
//! frames, G-function dispatch, class-initialization gating, and interface
//! method resolution.

use std::sync::Arc;

use tracing::debug;

use crate::class::{AccessFlags, Klass, MethEntry, MethodInfo};
use crate::classloader;
use crate::exceptions::{ExcKind, JvmEx};
use crate::frame::{Frame, FrameStack};
use crate::gfunction::{GFunction, GMeth, GfResult};
use crate::object::{self, Field, FieldValue, JvmValue};
use crate::string_pool;
use crate::types;

/// Makes sure `class_name` is loaded and its `<clinit>` has run. The status
/// byte suppresses re-entry, so a `<clinit>` that references its own class
/// does not recurse.
pub fn ensure_initialized(fs: &mut FrameStack, class_name: &str) -> Result<Arc<Klass>, JvmEx> {
    let klass = classloader::load_class_from_name_only(class_name)?;
    if klass.clinit_has_run() {
        return Ok(klass);
    }
    if klass.begin_clinit() {
        if let Some(entry) = klass.method("<clinit>", "()V").cloned() {
            debug!("running <clinit> of {class_name}");
            match entry {
                MethEntry::Intrinsic(g) => {
                    let mut no_args: Vec<JvmValue> = Vec::new();
                    match dispatch_gfunction(fs, &g, &mut no_args) {
                        GfResult::Err(e) => return Err(JvmEx::new(e.exc_kind, e.msg)),
                        _ => {}
                    }
                }
                MethEntry::Bytecode(m) => {
                    let frame = Frame::for_method(&klass, &m, fs.thread_id, false);
                    fs.push_frame(frame)?;
                    super::run_frame(fs)?;
                }
            }
        }
        klass.set_status(crate::class::KlassStatus::Initialized);
    }
    Ok(klass)
}

/// Finds `name+desc` in `class_name` or up its superclass chain, loading
/// classes on demand.
pub fn find_method_in_hierarchy(
    class_name: &str,
    name: &str,
    desc: &str,
) -> Option<(Arc<Klass>, MethEntry)> {
    let mut current = class_name.to_string();
    loop {
        let klass = classloader::load_class_from_name_only(&current).ok()?;
        if let Some(entry) = klass.method(name, desc) {
            return Some((klass.clone(), entry.clone()));
        }
        let superclass = klass.superclass_name()?;
        if current == types::OBJECT_CLASS_NAME {
            return None;
        }
        current = superclass.to_string();
    }
}

fn run_gfunc(g: &GMeth, fs: &mut FrameStack, args: &mut Vec<JvmValue>) -> GfResult {
    match g.gfunction {
        GFunction::Plain(f) => f(args),
        GFunction::WithFrames(f) => f(fs, args),
    }
}

fn dispatch_gfunction(fs: &mut FrameStack, g: &GMeth, args: &mut Vec<JvmValue>) -> GfResult {
    run_gfunc(g, fs, args)
}

/// Pops intrinsic arguments off the caller: one value per parameter, with
/// the duplicate slot of longs/doubles discarded; `this` goes in front for
/// instance calls.
fn pop_intrinsic_args(
    f: &mut Frame,
    desc: &str,
    with_this: bool,
) -> Result<Vec<JvmValue>, JvmEx> {
    let params = types::parse_params(desc);
    let mut rev = Vec::with_capacity(params.len() + 1);
    for p in params.iter().rev() {
        let v = f.pop()?;
        if types::is_two_slot(p) {
            let _ = f.pop()?;
        }
        rev.push(v);
    }
    if with_this {
        rev.push(f.pop()?);
    }
    rev.reverse();
    Ok(rev)
}

/// Pops bytecode-call arguments into a locals image: rightmost argument
/// popped first, longs/doubles occupying two locals slots.
fn pop_call_locals(
    f: &mut Frame,
    desc: &str,
    with_this: bool,
    max_locals: usize,
) -> Result<Vec<JvmValue>, JvmEx> {
    let params = types::parse_params(desc);
    let mut rev: Vec<(JvmValue, bool)> = Vec::with_capacity(params.len());
    for p in params.iter().rev() {
        let v = f.pop()?;
        let two = types::is_two_slot(p);
        if two {
            let _ = f.pop()?;
        }
        rev.push((v, two));
    }
    let this = if with_this { Some(f.pop()?) } else { None };

    let mut locals = Vec::with_capacity(max_locals);
    if let Some(t) = this {
        locals.push(t);
    }
    for (v, two) in rev.iter().rev() {
        locals.push(v.clone());
        if *two {
            locals.push(v.clone());
        }
    }
    while locals.len() < max_locals {
        locals.push(JvmValue::Null);
    }
    Ok(locals)
}

/// Delivers an intrinsic's result onto the caller's operand stack, widening
/// long/double returns to their two-slot convention.
fn push_gfunc_result(
    fs: &mut FrameStack,
    result: GfResult,
    return_tag: &str,
) -> Result<(), JvmEx> {
    let f = fs.top_mut().ok_or_else(|| {
        JvmEx::new(ExcKind::Internal, "intrinsic returned with no caller frame")
    })?;
    match result {
        GfResult::Void => Ok(()),
        GfResult::Val(v) => {
            let two = types::is_two_slot(return_tag);
            f.push(v.clone())?;
            if two {
                f.push(v)?;
            }
            Ok(())
        }
        GfResult::Bytes(b) => {
            let mut arr = object::make_primitive_array(types::BYTE, 0);
            arr.set_field("value", Field::new(types::BYTE_ARRAY, FieldValue::Bytes(b)));
            f.push(object::make_ref(arr))
        }
        GfResult::Err(e) => Err(JvmEx::new(e.exc_kind, e.msg)),
    }
}

/// Runs an already-selected method: a G-function completes in place, a
/// bytecode method gets a frame and a recursive trip through the
/// interpreter.
fn dispatch(
    fs: &mut FrameStack,
    klass: &Arc<Klass>,
    entry: MethEntry,
    desc: &str,
    with_this: bool,
) -> Result<(), JvmEx> {
    match entry {
        MethEntry::Intrinsic(g) => {
            let mut args = {
                let f = fs
                    .top_mut()
                    .ok_or_else(|| JvmEx::new(ExcKind::Internal, "invoke with no frame"))?;
                pop_intrinsic_args(f, desc, with_this)?
            };
            let result = dispatch_gfunction(fs, &g, &mut args);
            push_gfunc_result(fs, result, types::return_type(desc))
        }
        MethEntry::Bytecode(m) => {
            if m.access.contains(AccessFlags::NATIVE) {
                return run_native(fs, klass, &m, desc, with_this);
            }
            let locals = {
                let f = fs
                    .top_mut()
                    .ok_or_else(|| JvmEx::new(ExcKind::Internal, "invoke with no frame"))?;
                pop_call_locals(f, desc, with_this, usize::from(m.max_locals))?
            };
            let trace = fs.top().map(|f| f.trace).unwrap_or(false);
            let mut frame = Frame::for_method(klass, &m, fs.thread_id, trace);
            frame.locals = locals;
            fs.push_frame(frame)?;
            super::run_frame(fs)
        }
    }
}

/// A method carrying ACC_NATIVE goes to the native bridge; unconnected
/// natives surface as a thrown error block.
fn run_native(
    fs: &mut FrameStack,
    klass: &Arc<Klass>,
    m: &Arc<MethodInfo>,
    desc: &str,
    with_this: bool,
) -> Result<(), JvmEx> {
    let params = {
        let f = fs
            .top_mut()
            .ok_or_else(|| JvmEx::new(ExcKind::Internal, "native invoke with no frame"))?;
        pop_intrinsic_args(f, desc, with_this)?
    };
    let trace = fs.top().map(|f| f.trace).unwrap_or(false);
    match crate::native::run_native_function(fs, &klass.name, &m.name, desc, &params, trace) {
        crate::native::NativeResult::Int(v) => {
            let f = fs.top_mut().unwrap();
            f.push(JvmValue::Int(v))
        }
        crate::native::NativeResult::Err(e) => Err(JvmEx::new(e.exc_kind, e.msg)),
    }
}

fn expect_method_ref(f: &Frame, idx: usize) -> Result<(String, String, String), JvmEx> {
    let info = f.cp.method_ref_info(idx);
    if info.0.is_empty() {
        return Err(JvmEx::new(
            ExcKind::Internal,
            format!("Expected a method ref, but got {:?} in {}", f.cp.tag_of(idx), f.cl_name),
        ));
    }
    Ok(info)
}

/// INVOKESTATIC: class init, then either G-function or a new frame with
/// locals filled from the caller's stack.
pub fn invoke_static(fs: &mut FrameStack, idx: usize) -> Result<(), JvmEx> {
    let (class_name, meth_name, desc) = {
        let f = fs
            .top()
            .ok_or_else(|| JvmEx::new(ExcKind::Internal, "invokestatic with no frame"))?;
        expect_method_ref(f, idx)?
    };
    ensure_initialized(fs, &class_name)?;
    let (klass, entry) =
        find_method_in_hierarchy(&class_name, &meth_name, &desc).ok_or_else(|| {
            JvmEx::new(
                ExcKind::ClassNotLoaded,
                format!("INVOKESTATIC: method not found: {class_name}.{meth_name}{desc}"),
            )
        })?;
    dispatch(fs, &klass, entry, &desc, false)
}

/// INVOKEVIRTUAL: the concrete target comes from the receiver's class,
/// walking its superclass chain for `name+descriptor`.
pub fn invoke_virtual(fs: &mut FrameStack, idx: usize) -> Result<(), JvmEx> {
    let (class_name, meth_name, desc) = {
        let f = fs
            .top()
            .ok_or_else(|| JvmEx::new(ExcKind::Internal, "invokevirtual with no frame"))?;
        expect_method_ref(f, idx)?
    };
    let receiver = {
        let f = fs.top().unwrap();
        f.peek_at(types::param_slot_count(&desc))?
    };
    let runtime_class = match &receiver {
        JvmValue::Ref(r) => r.lock().unwrap().klass_name().to_string(),
        JvmValue::Null => {
            return Err(JvmEx::new(
                ExcKind::NullPointer,
                format!("INVOKEVIRTUAL on a null reference: {class_name}.{meth_name}{desc}"),
            ))
        }
        _ => {
            return Err(JvmEx::new(
                ExcKind::InvalidType,
                format!("INVOKEVIRTUAL receiver is not a reference: {class_name}.{meth_name}"),
            ))
        }
    };
    // array receivers and literals fall back to the compile-time class
    let lookup_class = if types::is_array_type(&runtime_class) {
        class_name.clone()
    } else {
        runtime_class
    };
    let (klass, entry) = find_method_in_hierarchy(&lookup_class, &meth_name, &desc)
        .or_else(|| find_method_in_hierarchy(&class_name, &meth_name, &desc))
        .ok_or_else(|| {
            JvmEx::new(
                ExcKind::ClassNotLoaded,
                format!("INVOKEVIRTUAL: method not found: {lookup_class}.{meth_name}{desc}"),
            )
        })?;
    dispatch(fs, &klass, entry, &desc, true)
}

/// INVOKESPECIAL: `<init>`, private methods, and super calls. The target
/// class is the one named in the CP entry; no virtual dispatch.
pub fn invoke_special(fs: &mut FrameStack, idx: usize) -> Result<(), JvmEx> {
    let (class_name, meth_name, desc) = {
        let f = fs
            .top()
            .ok_or_else(|| JvmEx::new(ExcKind::Internal, "invokespecial with no frame"))?;
        expect_method_ref(f, idx)?
    };
    let (klass, entry) =
        find_method_in_hierarchy(&class_name, &meth_name, &desc).ok_or_else(|| {
            JvmEx::new(
                ExcKind::ClassNotLoaded,
                format!("INVOKESPECIAL: method not found: {class_name}.{meth_name}{desc}"),
            )
        })?;
    dispatch(fs, &klass, entry, &desc, true)
}

/// Interfaces implemented by `class_name`, directly or through its
/// superclass chain, as string-pool indices.
fn implemented_interfaces(class_name: &str) -> Vec<u32> {
    let mut result = Vec::new();
    let mut current = class_name.to_string();
    loop {
        let Ok(klass) = classloader::load_class_from_name_only(&current) else {
            return result;
        };
        result.extend(&klass.interfaces);
        match klass.superclass_name() {
            Some(s) if current != types::OBJECT_CLASS_NAME => current = s.to_string(),
            _ => return result,
        }
    }
}

/// Superinterface walk for resolution steps 4 and 5: the first non-abstract
/// declaration wins; with only abstract candidates the first found is
/// chosen.
fn search_superinterfaces(
    iface: &str,
    meth_name: &str,
    desc: &str,
) -> Option<(Arc<Klass>, MethEntry)> {
    let mut queue: Vec<u32> = match classloader::load_class_from_name_only(iface) {
        Ok(k) => k.interfaces.clone(),
        Err(_) => return None,
    };
    let mut abstract_fallback: Option<(Arc<Klass>, MethEntry)> = None;
    while let Some(idx) = queue.pop() {
        let Some(name) = string_pool::get(idx) else { continue };
        let Ok(klass) = classloader::load_class_from_name_only(name) else {
            continue;
        };
        if let Some(entry) = klass.method(meth_name, desc) {
            let is_abstract = match entry {
                MethEntry::Bytecode(m) => m.access.contains(AccessFlags::ABSTRACT),
                MethEntry::Intrinsic(_) => false,
            };
            if !is_abstract {
                return Some((klass.clone(), entry.clone()));
            }
            if abstract_fallback.is_none() {
                abstract_fallback = Some((klass.clone(), entry.clone()));
            }
        }
        queue.extend(&klass.interfaces);
    }
    abstract_fallback
}

/// INVOKEINTERFACE resolution:
/// 1. the receiver's class must implement the interface,
/// 2. the receiver class hierarchy is searched for the member,
/// 3. then the interface itself,
/// 4. then its superinterfaces (first non-abstract wins),
/// 5. and a native selection is rejected.
pub fn invoke_interface(fs: &mut FrameStack, idx: usize) -> Result<(), JvmEx> {
    let (iface_name, meth_name, desc) = {
        let f = fs
            .top()
            .ok_or_else(|| JvmEx::new(ExcKind::Internal, "invokeinterface with no frame"))?;
        let info = f.cp.interface_ref_info(idx);
        if info.0.is_empty() {
            return Err(JvmEx::new(
                ExcKind::Internal,
                format!(
                    "Expected an interface method ref, but got {:?} in {}",
                    f.cp.tag_of(idx),
                    f.cl_name
                ),
            ));
        }
        info
    };

    let receiver = {
        let f = fs.top().unwrap();
        f.peek_at(types::param_slot_count(&desc))?
    };
    let obj_class = match &receiver {
        JvmValue::Ref(r) => r.lock().unwrap().klass_name().to_string(),
        _ => {
            return Err(JvmEx::new(
                ExcKind::NullPointer,
                format!("INVOKEINTERFACE on a null reference: {iface_name}.{meth_name}"),
            ))
        }
    };

    let iface_idx = string_pool::intern(&iface_name);
    if !implemented_interfaces(&obj_class).contains(&iface_idx) {
        return Err(JvmEx::new(
            ExcKind::IncompatibleClassChange,
            format!("INVOKEINTERFACE: class {obj_class} does not implement interface {iface_name}"),
        ));
    }

    let selected = find_method_in_hierarchy(&obj_class, &meth_name, &desc)
        .or_else(|| {
            classloader::load_class_from_name_only(&iface_name)
                .ok()
                .and_then(|k| k.method(&meth_name, &desc).cloned().map(|e| (k.clone(), e)))
        })
        .or_else(|| search_superinterfaces(&iface_name, &meth_name, &desc));

    let Some((klass, entry)) = selected else {
        return Err(JvmEx::new(
            ExcKind::UnsupportedOperation,
            format!("INVOKEINTERFACE: no implementation of {iface_name}.{meth_name}{desc}"),
        ));
    };

    if let MethEntry::Bytecode(m) = &entry {
        if m.access.contains(AccessFlags::NATIVE) {
            return Err(JvmEx::new(
                ExcKind::UnsupportedOperation,
                format!(
                    "INVOKEINTERFACE: native method requested: {}.{meth_name}{desc}",
                    klass.name
                ),
            ));
        }
    }

    dispatch(fs, &klass, entry, &desc, true)
}
