//! The bytecode interpreter: one frame executed at a time, one opcode per
//! iteration of the dispatch loop. Each arm owns its operand decoding and
//! its pc advancement; branch offsets are signed and relative to the pc of
//! the opcode itself.
//!
//! Invoking a bytecode method pushes a frame and recurses into `run_frame`;
//! returns pop the frame and deliver the value to the caller's operand
//! stack. An error unwinds frame by frame, consulting each frame's handler
//! table on the way down.

use byteorder::{BigEndian, ByteOrder};
use tracing::trace;

use crate::exceptions::{self, ExcKind, JvmEx};
use crate::frame::{Frame, FrameStack};
use crate::object::{self, Field, FieldValue, JvmValue};
use crate::thread::ExecThread;
use crate::{classloader, globals, opcodes, statics, string_pool, types};

pub mod cast;
pub mod invoke;

// === sign-extension helpers for bytecode immediates ===

/// Sign-extends a single byte into an int64.
pub fn byte_to_int64(b: u8) -> i64 {
    i64::from(b as i8)
}

/// Sign-extends a big-endian two-byte immediate into an int64.
pub fn two_bytes_to_int64(b1: u8, b2: u8) -> i64 {
    i64::from(i16::from_be_bytes([b1, b2]))
}

/// Sign-extends a big-endian four-byte immediate into an int64.
pub fn four_bytes_to_int64(b1: u8, b2: u8, b3: u8, b4: u8) -> i64 {
    i64::from(BigEndian::read_i32(&[b1, b2, b3, b4]))
}

enum Flow {
    Continue,
    Return,
}

fn top(fs: &mut FrameStack) -> Result<&mut Frame, JvmEx> {
    fs.top_mut()
        .ok_or_else(|| JvmEx::new(ExcKind::Internal, "no active frame"))
}

fn code_byte(f: &Frame, at: usize) -> Result<u8, JvmEx> {
    f.meth.get(at).copied().ok_or_else(|| {
        JvmEx::new(
            ExcKind::Internal,
            format!("bytecode ran out at {at} in {}.{}", f.cl_name, f.meth_name),
        )
    })
}

fn pop_int(f: &mut Frame) -> Result<i64, JvmEx> {
    match f.pop()? {
        JvmValue::Int(i) => Ok(i),
        other => Err(JvmEx::new(
            ExcKind::InvalidType,
            format!("expected int on stack in {}.{}, got {other:?}", f.cl_name, f.meth_name),
        )),
    }
}

fn pop_float(f: &mut Frame) -> Result<f64, JvmEx> {
    match f.pop()? {
        JvmValue::Float(v) => Ok(v),
        other => Err(JvmEx::new(
            ExcKind::InvalidType,
            format!("expected float on stack in {}.{}, got {other:?}", f.cl_name, f.meth_name),
        )),
    }
}

fn pop_ref(f: &mut Frame) -> Result<JvmValue, JvmEx> {
    match f.pop()? {
        v @ (JvmValue::Ref(_) | JvmValue::Null) => Ok(v),
        other => Err(JvmEx::new(
            ExcKind::InvalidType,
            format!(
                "expected reference on stack in {}.{}, got {other:?}",
                f.cl_name, f.meth_name
            ),
        )),
    }
}

// longs and doubles occupy two identical stack slots

fn pop_long(f: &mut Frame) -> Result<i64, JvmEx> {
    let v = pop_int(f)?;
    let _ = f.pop()?;
    Ok(v)
}

fn push_long(f: &mut Frame, v: i64) -> Result<(), JvmEx> {
    f.push(JvmValue::Int(v))?;
    f.push(JvmValue::Int(v))
}

fn pop_double(f: &mut Frame) -> Result<f64, JvmEx> {
    let v = pop_float(f)?;
    let _ = f.pop()?;
    Ok(v)
}

fn push_double(f: &mut Frame, v: f64) -> Result<(), JvmEx> {
    f.push(JvmValue::Float(v))?;
    f.push(JvmValue::Float(v))
}

fn local(f: &Frame, idx: usize) -> Result<JvmValue, JvmEx> {
    f.locals.get(idx).cloned().ok_or_else(|| {
        JvmEx::new(
            ExcKind::Internal,
            format!("locals index {idx} out of range in {}.{}", f.cl_name, f.meth_name),
        )
    })
}

fn set_local(f: &mut Frame, idx: usize, v: JvmValue) -> Result<(), JvmEx> {
    if idx >= f.locals.len() {
        return Err(JvmEx::new(
            ExcKind::Internal,
            format!("locals index {idx} out of range in {}.{}", f.cl_name, f.meth_name),
        ));
    }
    f.locals[idx] = v;
    Ok(())
}

fn value_load(f: &mut Frame, idx: usize) -> Result<(), JvmEx> {
    let v = local(f, idx)?;
    f.push(v)
}

fn long_load(f: &mut Frame, idx: usize) -> Result<(), JvmEx> {
    let v = local(f, idx)?;
    f.push(v.clone())?;
    f.push(v)
}

fn value_store(f: &mut Frame, idx: usize) -> Result<(), JvmEx> {
    let v = f.pop()?;
    set_local(f, idx, v)
}

fn long_store(f: &mut Frame, idx: usize) -> Result<(), JvmEx> {
    let v = f.pop()?;
    let _ = f.pop()?;
    if idx + 1 >= f.locals.len() {
        return Err(JvmEx::new(
            ExcKind::Internal,
            format!("locals index {} out of range in {}.{}", idx + 1, f.cl_name, f.meth_name),
        ));
    }
    f.locals[idx] = v.clone();
    f.locals[idx + 1] = v;
    Ok(())
}

fn check_bounds(len: usize, idx: i64) -> Result<usize, JvmEx> {
    if idx < 0 || idx as usize >= len {
        return Err(JvmEx::new(
            ExcKind::ArrayIndexOutOfBounds,
            format!("array index {idx} out of bounds for length {len}"),
        ));
    }
    Ok(idx as usize)
}

fn array_ref(v: JvmValue) -> Result<object::ObjRef, JvmEx> {
    match v {
        JvmValue::Ref(r) => Ok(r),
        JvmValue::Null => Err(JvmEx::new(ExcKind::NullPointer, "null array reference")),
        other => Err(JvmEx::new(
            ExcKind::InvalidType,
            format!("expected array reference, got {other:?}"),
        )),
    }
}

/// Renders the per-instruction trace line: class, method, pc, mnemonic,
/// TOS index, and the TOS value.
fn trace_line(f: &Frame) -> String {
    let op = f.meth.get(f.pc).copied().unwrap_or(0);
    let tos_render = if f.tos >= 0 {
        match f.peek_at(0) {
            Ok(v) => format!("{v:?}"),
            Err(_) => String::new(),
        }
    } else {
        String::new()
    };
    format!(
        "class: {:<22} meth: {:<10} PC: {:3}, {:<13} TOS: {:3} {}",
        f.cl_name,
        f.meth_name,
        f.pc,
        opcodes::mnemonic(op),
        f.tos,
        tos_render
    )
}

/// Executes the top frame until it returns. On an uncaught error the frame
/// is popped and the error propagates to the invoking recursion level, which
/// consults its own handler table.
pub fn run_frame(fs: &mut FrameStack) -> Result<(), JvmEx> {
    loop {
        match step(fs) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Return) => return Ok(()),
            Err(ex) => {
                let thrown = ex.thrown_class();
                if let Some(f) = fs.top_mut() {
                    if let Some(handler_pc) = f.handler_for(&thrown) {
                        f.clear_op_stack();
                        f.push_unchecked(ex.throwable());
                        f.pc = handler_pc;
                        continue;
                    }
                }
                fs.pop();
                return Err(ex);
            }
        }
    }
}

#[allow(clippy::too_many_lines)]
fn step(fs: &mut FrameStack) -> Result<Flow, JvmEx> {
    let op = {
        let f = top(fs)?;
        if f.trace {
            trace!("{}", trace_line(f));
        }
        code_byte(f, f.pc)?
    };

    match op {
        opcodes::NOP => {
            let f = top(fs)?;
            f.pc += 1;
        }
        opcodes::ACONST_NULL => {
            let f = top(fs)?;
            f.push(JvmValue::Null)?;
            f.pc += 1;
        }
        opcodes::ICONST_M1..=opcodes::ICONST_5 => {
            // iconst_<i>
            let f = top(fs)?;
            let value = i64::from(op) - i64::from(opcodes::ICONST_0);
            f.push(JvmValue::Int(value))?;
            f.pc += 1;
        }
        opcodes::LCONST_0 | opcodes::LCONST_1 => {
            let f = top(fs)?;
            push_long(f, i64::from(op - opcodes::LCONST_0))?;
            f.pc += 1;
        }
        opcodes::FCONST_0..=opcodes::FCONST_2 => {
            let f = top(fs)?;
            f.push(JvmValue::Float(f64::from(op - opcodes::FCONST_0)))?;
            f.pc += 1;
        }
        opcodes::DCONST_0 | opcodes::DCONST_1 => {
            let f = top(fs)?;
            push_double(f, f64::from(op - opcodes::DCONST_0))?;
            f.pc += 1;
        }
        opcodes::BIPUSH => {
            // bipush: one signed byte
            let f = top(fs)?;
            let b = code_byte(f, f.pc + 1)?;
            f.push(JvmValue::Int(byte_to_int64(b)))?;
            f.pc += 2;
        }
        opcodes::SIPUSH => {
            // sipush: two signed bytes
            let f = top(fs)?;
            let b1 = code_byte(f, f.pc + 1)?;
            let b2 = code_byte(f, f.pc + 2)?;
            f.push(JvmValue::Int(two_bytes_to_int64(b1, b2)))?;
            f.pc += 3;
        }
        opcodes::LDC => {
            let idx = {
                let f = top(fs)?;
                usize::from(code_byte(f, f.pc + 1)?)
            };
            load_constant(fs, idx, false)?;
            top(fs)?.pc += 2;
        }
        opcodes::LDC_W => {
            let idx = {
                let f = top(fs)?;
                cp_index(f, f.pc + 1)?
            };
            load_constant(fs, idx, false)?;
            top(fs)?.pc += 3;
        }
        opcodes::LDC2_W => {
            let idx = {
                let f = top(fs)?;
                cp_index(f, f.pc + 1)?
            };
            load_constant(fs, idx, true)?;
            top(fs)?.pc += 3;
        }
        opcodes::ILOAD | opcodes::FLOAD | opcodes::ALOAD => {
            let f = top(fs)?;
            let idx = usize::from(code_byte(f, f.pc + 1)?);
            value_load(f, idx)?;
            f.pc += 2;
        }
        opcodes::LLOAD | opcodes::DLOAD => {
            let f = top(fs)?;
            let idx = usize::from(code_byte(f, f.pc + 1)?);
            long_load(f, idx)?;
            f.pc += 2;
        }
        opcodes::ILOAD_0..=opcodes::ILOAD_3 => {
            let f = top(fs)?;
            value_load(f, usize::from(op - opcodes::ILOAD_0))?;
            f.pc += 1;
        }
        opcodes::LLOAD_0..=opcodes::LLOAD_3 => {
            let f = top(fs)?;
            long_load(f, usize::from(op - opcodes::LLOAD_0))?;
            f.pc += 1;
        }
        opcodes::FLOAD_0..=opcodes::FLOAD_3 => {
            let f = top(fs)?;
            value_load(f, usize::from(op - opcodes::FLOAD_0))?;
            f.pc += 1;
        }
        opcodes::DLOAD_0..=opcodes::DLOAD_3 => {
            let f = top(fs)?;
            long_load(f, usize::from(op - opcodes::DLOAD_0))?;
            f.pc += 1;
        }
        opcodes::ALOAD_0..=opcodes::ALOAD_3 => {
            let f = top(fs)?;
            value_load(f, usize::from(op - opcodes::ALOAD_0))?;
            f.pc += 1;
        }
        opcodes::IALOAD | opcodes::CALOAD | opcodes::SALOAD => {
            let f = top(fs)?;
            let idx = pop_int(f)?;
            let arr = array_ref(pop_ref(f)?)?;
            let v = {
                let obj = arr.lock().unwrap();
                match obj.field("value").map(|fld| &fld.fvalue) {
                    Some(FieldValue::Longs(l)) => l[check_bounds(l.len(), idx)?],
                    _ => {
                        return Err(JvmEx::new(
                            ExcKind::InvalidType,
                            "int array load on a non-int array",
                        ))
                    }
                }
            };
            f.push(JvmValue::Int(v))?;
            f.pc += 1;
        }
        opcodes::LALOAD => {
            let f = top(fs)?;
            let idx = pop_int(f)?;
            let arr = array_ref(pop_ref(f)?)?;
            let v = {
                let obj = arr.lock().unwrap();
                match obj.field("value").map(|fld| &fld.fvalue) {
                    Some(FieldValue::Longs(l)) => l[check_bounds(l.len(), idx)?],
                    _ => {
                        return Err(JvmEx::new(
                            ExcKind::InvalidType,
                            "laload on a non-long array",
                        ))
                    }
                }
            };
            push_long(f, v)?;
            f.pc += 1;
        }
        opcodes::FALOAD => {
            let f = top(fs)?;
            let idx = pop_int(f)?;
            let arr = array_ref(pop_ref(f)?)?;
            let v = {
                let obj = arr.lock().unwrap();
                match obj.field("value").map(|fld| &fld.fvalue) {
                    Some(FieldValue::Doubles(d)) => d[check_bounds(d.len(), idx)?],
                    _ => {
                        return Err(JvmEx::new(
                            ExcKind::InvalidType,
                            "faload on a non-float array",
                        ))
                    }
                }
            };
            f.push(JvmValue::Float(v))?;
            f.pc += 1;
        }
        opcodes::DALOAD => {
            let f = top(fs)?;
            let idx = pop_int(f)?;
            let arr = array_ref(pop_ref(f)?)?;
            let v = {
                let obj = arr.lock().unwrap();
                match obj.field("value").map(|fld| &fld.fvalue) {
                    Some(FieldValue::Doubles(d)) => d[check_bounds(d.len(), idx)?],
                    _ => {
                        return Err(JvmEx::new(
                            ExcKind::InvalidType,
                            "daload on a non-double array",
                        ))
                    }
                }
            };
            push_double(f, v)?;
            f.pc += 1;
        }
        opcodes::AALOAD => {
            let f = top(fs)?;
            let idx = pop_int(f)?;
            let arr = array_ref(pop_ref(f)?)?;
            let v = {
                let obj = arr.lock().unwrap();
                match obj.field("value").map(|fld| &fld.fvalue) {
                    Some(FieldValue::Refs(r)) => r[check_bounds(r.len(), idx)?].clone(),
                    _ => {
                        return Err(JvmEx::new(
                            ExcKind::InvalidType,
                            "aaload on a non-reference array",
                        ))
                    }
                }
            };
            f.push(v)?;
            f.pc += 1;
        }
        opcodes::BALOAD => {
            let f = top(fs)?;
            let idx = pop_int(f)?;
            let arr = array_ref(pop_ref(f)?)?;
            let v = {
                let obj = arr.lock().unwrap();
                match obj.field("value").map(|fld| &fld.fvalue) {
                    Some(FieldValue::Bytes(b)) => byte_to_int64(b[check_bounds(b.len(), idx)?]),
                    _ => {
                        return Err(JvmEx::new(
                            ExcKind::InvalidType,
                            "baload on a non-byte array",
                        ))
                    }
                }
            };
            f.push(JvmValue::Int(v))?;
            f.pc += 1;
        }
        opcodes::ISTORE | opcodes::FSTORE | opcodes::ASTORE => {
            let f = top(fs)?;
            let idx = usize::from(code_byte(f, f.pc + 1)?);
            value_store(f, idx)?;
            f.pc += 2;
        }
        opcodes::LSTORE | opcodes::DSTORE => {
            let f = top(fs)?;
            let idx = usize::from(code_byte(f, f.pc + 1)?);
            long_store(f, idx)?;
            f.pc += 2;
        }
        opcodes::ISTORE_0..=opcodes::ISTORE_3 => {
            let f = top(fs)?;
            value_store(f, usize::from(op - opcodes::ISTORE_0))?;
            f.pc += 1;
        }
        opcodes::LSTORE_0..=opcodes::LSTORE_3 => {
            let f = top(fs)?;
            long_store(f, usize::from(op - opcodes::LSTORE_0))?;
            f.pc += 1;
        }
        opcodes::FSTORE_0..=opcodes::FSTORE_3 => {
            let f = top(fs)?;
            value_store(f, usize::from(op - opcodes::FSTORE_0))?;
            f.pc += 1;
        }
        opcodes::DSTORE_0..=opcodes::DSTORE_3 => {
            let f = top(fs)?;
            long_store(f, usize::from(op - opcodes::DSTORE_0))?;
            f.pc += 1;
        }
        opcodes::ASTORE_0..=opcodes::ASTORE_3 => {
            let f = top(fs)?;
            value_store(f, usize::from(op - opcodes::ASTORE_0))?;
            f.pc += 1;
        }
        opcodes::IASTORE | opcodes::CASTORE | opcodes::SASTORE | opcodes::LASTORE => {
            let f = top(fs)?;
            let v = if op == opcodes::LASTORE {
                pop_long(f)?
            } else {
                pop_int(f)?
            };
            let idx = pop_int(f)?;
            let arr = array_ref(pop_ref(f)?)?;
            let mut obj = arr.lock().unwrap();
            match obj.fields.get_mut("value").map(|fld| &mut fld.fvalue) {
                Some(FieldValue::Longs(l)) => {
                    let i = check_bounds(l.len(), idx)?;
                    l[i] = v;
                }
                _ => {
                    return Err(JvmEx::new(
                        ExcKind::InvalidType,
                        "int array store on a non-int array",
                    ))
                }
            }
            drop(obj);
            f.pc += 1;
        }
        opcodes::FASTORE | opcodes::DASTORE => {
            let f = top(fs)?;
            let v = if op == opcodes::DASTORE {
                pop_double(f)?
            } else {
                pop_float(f)?
            };
            let idx = pop_int(f)?;
            let arr = array_ref(pop_ref(f)?)?;
            let mut obj = arr.lock().unwrap();
            match obj.fields.get_mut("value").map(|fld| &mut fld.fvalue) {
                Some(FieldValue::Doubles(d)) => {
                    let i = check_bounds(d.len(), idx)?;
                    d[i] = v;
                }
                _ => {
                    return Err(JvmEx::new(
                        ExcKind::InvalidType,
                        "float array store on a non-float array",
                    ))
                }
            }
            drop(obj);
            f.pc += 1;
        }
        opcodes::AASTORE => {
            let f = top(fs)?;
            let v = pop_ref(f)?;
            let idx = pop_int(f)?;
            let arr = array_ref(pop_ref(f)?)?;
            let mut obj = arr.lock().unwrap();
            match obj.fields.get_mut("value").map(|fld| &mut fld.fvalue) {
                Some(FieldValue::Refs(r)) => {
                    let i = check_bounds(r.len(), idx)?;
                    r[i] = v;
                }
                _ => {
                    return Err(JvmEx::new(
                        ExcKind::InvalidType,
                        "aastore on a non-reference array",
                    ))
                }
            }
            drop(obj);
            f.pc += 1;
        }
        opcodes::BASTORE => {
            let f = top(fs)?;
            let v = pop_int(f)?;
            let idx = pop_int(f)?;
            let arr = array_ref(pop_ref(f)?)?;
            let mut obj = arr.lock().unwrap();
            match obj.fields.get_mut("value").map(|fld| &mut fld.fvalue) {
                Some(FieldValue::Bytes(b)) => {
                    let i = check_bounds(b.len(), idx)?;
                    b[i] = v as u8;
                }
                _ => {
                    return Err(JvmEx::new(
                        ExcKind::InvalidType,
                        "bastore on a non-byte array",
                    ))
                }
            }
            drop(obj);
            f.pc += 1;
        }
        opcodes::POP => {
            let f = top(fs)?;
            f.pop()?;
            f.pc += 1;
        }
        opcodes::POP2 => {
            let f = top(fs)?;
            f.pop()?;
            f.pop()?;
            f.pc += 1;
        }
        opcodes::DUP => {
            let f = top(fs)?;
            let v = f.peek()?;
            f.push(v)?;
            f.pc += 1;
        }
        opcodes::DUP_X1 => {
            // xy => yxy
            let f = top(fs)?;
            let y = f.pop()?;
            let x = f.pop()?;
            f.push(y.clone())?;
            f.push(x)?;
            f.push(y)?;
            f.pc += 1;
        }
        opcodes::DUP_X2 => {
            // xyz => zxyz
            let f = top(fs)?;
            let z = f.pop()?;
            let y = f.pop()?;
            let x = f.pop()?;
            f.push(z.clone())?;
            f.push(x)?;
            f.push(y)?;
            f.push(z)?;
            f.pc += 1;
        }
        opcodes::DUP2 => {
            // xy => xyxy
            let f = top(fs)?;
            let y = f.pop()?;
            let x = f.pop()?;
            f.push(x.clone())?;
            f.push(y.clone())?;
            f.push(x)?;
            f.push(y)?;
            f.pc += 1;
        }
        opcodes::DUP2_X1 => {
            // xyz => yzxyz
            let f = top(fs)?;
            let z = f.pop()?;
            let y = f.pop()?;
            let x = f.pop()?;
            f.push(y.clone())?;
            f.push(z.clone())?;
            f.push(x)?;
            f.push(y)?;
            f.push(z)?;
            f.pc += 1;
        }
        opcodes::DUP2_X2 => {
            // wxyz => yzwxyz
            let f = top(fs)?;
            let z = f.pop()?;
            let y = f.pop()?;
            let x = f.pop()?;
            let w = f.pop()?;
            f.push(y.clone())?;
            f.push(z.clone())?;
            f.push(w)?;
            f.push(x)?;
            f.push(y)?;
            f.push(z)?;
            f.pc += 1;
        }
        opcodes::SWAP => {
            let f = top(fs)?;
            let x = f.pop()?;
            let y = f.pop()?;
            f.push(x)?;
            f.push(y)?;
            f.pc += 1;
        }
        opcodes::IADD => {
            let f = top(fs)?;
            let rhs = pop_int(f)?;
            let lhs = pop_int(f)?;
            f.push(JvmValue::Int(lhs.wrapping_add(rhs)))?;
            f.pc += 1;
        }
        opcodes::LADD => {
            let f = top(fs)?;
            let rhs = pop_long(f)?;
            let lhs = pop_long(f)?;
            push_long(f, lhs.wrapping_add(rhs))?;
            f.pc += 1;
        }
        opcodes::FADD => {
            let f = top(fs)?;
            let rhs = pop_float(f)?;
            let lhs = pop_float(f)?;
            f.push(JvmValue::Float(lhs + rhs))?;
            f.pc += 1;
        }
        opcodes::DADD => {
            let f = top(fs)?;
            let rhs = pop_double(f)?;
            let lhs = pop_double(f)?;
            push_double(f, lhs + rhs)?;
            f.pc += 1;
        }
        opcodes::ISUB => {
            let f = top(fs)?;
            let rhs = pop_int(f)?;
            let lhs = pop_int(f)?;
            f.push(JvmValue::Int(lhs.wrapping_sub(rhs)))?;
            f.pc += 1;
        }
        opcodes::LSUB => {
            let f = top(fs)?;
            let rhs = pop_long(f)?;
            let lhs = pop_long(f)?;
            push_long(f, lhs.wrapping_sub(rhs))?;
            f.pc += 1;
        }
        opcodes::FSUB => {
            let f = top(fs)?;
            let rhs = pop_float(f)?;
            let lhs = pop_float(f)?;
            f.push(JvmValue::Float(lhs - rhs))?;
            f.pc += 1;
        }
        opcodes::DSUB => {
            let f = top(fs)?;
            let rhs = pop_double(f)?;
            let lhs = pop_double(f)?;
            push_double(f, lhs - rhs)?;
            f.pc += 1;
        }
        opcodes::IMUL => {
            let f = top(fs)?;
            let rhs = pop_int(f)?;
            let lhs = pop_int(f)?;
            f.push(JvmValue::Int(lhs.wrapping_mul(rhs)))?;
            f.pc += 1;
        }
        opcodes::LMUL => {
            let f = top(fs)?;
            let rhs = pop_long(f)?;
            let lhs = pop_long(f)?;
            push_long(f, lhs.wrapping_mul(rhs))?;
            f.pc += 1;
        }
        opcodes::FMUL => {
            let f = top(fs)?;
            let rhs = pop_float(f)?;
            let lhs = pop_float(f)?;
            f.push(JvmValue::Float(lhs * rhs))?;
            f.pc += 1;
        }
        opcodes::DMUL => {
            let f = top(fs)?;
            let rhs = pop_double(f)?;
            let lhs = pop_double(f)?;
            push_double(f, lhs * rhs)?;
            f.pc += 1;
        }
        opcodes::IDIV | opcodes::IREM => {
            let f = top(fs)?;
            let rhs = pop_int(f)?;
            let lhs = pop_int(f)?;
            if rhs == 0 {
                return Err(JvmEx::new(ExcKind::Arithmetic, "/ by zero"));
            }
            let result = if op == opcodes::IDIV {
                lhs.wrapping_div(rhs)
            } else {
                lhs.wrapping_rem(rhs)
            };
            f.push(JvmValue::Int(result))?;
            f.pc += 1;
        }
        opcodes::LDIV | opcodes::LREM => {
            let f = top(fs)?;
            let rhs = pop_long(f)?;
            let lhs = pop_long(f)?;
            if rhs == 0 {
                return Err(JvmEx::new(ExcKind::Arithmetic, "/ by zero"));
            }
            let result = if op == opcodes::LDIV {
                lhs.wrapping_div(rhs)
            } else {
                lhs.wrapping_rem(rhs)
            };
            push_long(f, result)?;
            f.pc += 1;
        }
        opcodes::FDIV => {
            // IEEE division: no throw, Inf/NaN flow through
            let f = top(fs)?;
            let rhs = pop_float(f)?;
            let lhs = pop_float(f)?;
            f.push(JvmValue::Float(lhs / rhs))?;
            f.pc += 1;
        }
        opcodes::DDIV => {
            let f = top(fs)?;
            let rhs = pop_double(f)?;
            let lhs = pop_double(f)?;
            push_double(f, lhs / rhs)?;
            f.pc += 1;
        }
        opcodes::FREM => {
            let f = top(fs)?;
            let rhs = pop_float(f)?;
            let lhs = pop_float(f)?;
            f.push(JvmValue::Float(lhs % rhs))?;
            f.pc += 1;
        }
        opcodes::DREM => {
            let f = top(fs)?;
            let rhs = pop_double(f)?;
            let lhs = pop_double(f)?;
            push_double(f, lhs % rhs)?;
            f.pc += 1;
        }
        opcodes::INEG => {
            let f = top(fs)?;
            let v = pop_int(f)?;
            f.push(JvmValue::Int(v.wrapping_neg()))?;
            f.pc += 1;
        }
        opcodes::LNEG => {
            let f = top(fs)?;
            let v = pop_long(f)?;
            push_long(f, v.wrapping_neg())?;
            f.pc += 1;
        }
        opcodes::FNEG => {
            let f = top(fs)?;
            let v = pop_float(f)?;
            f.push(JvmValue::Float(-v))?;
            f.pc += 1;
        }
        opcodes::DNEG => {
            let f = top(fs)?;
            let v = pop_double(f)?;
            push_double(f, -v)?;
            f.pc += 1;
        }
        opcodes::ISHL => {
            let f = top(fs)?;
            let shift = pop_int(f)? & 0x1F;
            let v = pop_int(f)?;
            f.push(JvmValue::Int(v << shift))?;
            f.pc += 1;
        }
        opcodes::LSHL => {
            let f = top(fs)?;
            let shift = pop_int(f)? & 0x3F;
            let v = pop_long(f)?;
            push_long(f, v << shift)?;
            f.pc += 1;
        }
        opcodes::ISHR => {
            // arithmetic shift
            let f = top(fs)?;
            let shift = pop_int(f)? & 0x1F;
            let v = pop_int(f)?;
            f.push(JvmValue::Int(v >> shift))?;
            f.pc += 1;
        }
        opcodes::LSHR => {
            let f = top(fs)?;
            let shift = pop_int(f)? & 0x3F;
            let v = pop_long(f)?;
            push_long(f, v >> shift)?;
            f.pc += 1;
        }
        opcodes::IUSHR => {
            // logical shift via unsigned cast
            let f = top(fs)?;
            let shift = pop_int(f)? & 0x1F;
            let v = pop_int(f)?;
            f.push(JvmValue::Int(((v as u64) >> shift) as i64))?;
            f.pc += 1;
        }
        opcodes::LUSHR => {
            let f = top(fs)?;
            let shift = pop_int(f)? & 0x3F;
            let v = pop_long(f)?;
            push_long(f, ((v as u64) >> shift) as i64)?;
            f.pc += 1;
        }
        opcodes::IAND => {
            let f = top(fs)?;
            let rhs = pop_int(f)?;
            let lhs = pop_int(f)?;
            f.push(JvmValue::Int(lhs & rhs))?;
            f.pc += 1;
        }
        opcodes::LAND => {
            let f = top(fs)?;
            let rhs = pop_long(f)?;
            let lhs = pop_long(f)?;
            push_long(f, lhs & rhs)?;
            f.pc += 1;
        }
        opcodes::IOR => {
            let f = top(fs)?;
            let rhs = pop_int(f)?;
            let lhs = pop_int(f)?;
            f.push(JvmValue::Int(lhs | rhs))?;
            f.pc += 1;
        }
        opcodes::LOR => {
            let f = top(fs)?;
            let rhs = pop_long(f)?;
            let lhs = pop_long(f)?;
            push_long(f, lhs | rhs)?;
            f.pc += 1;
        }
        opcodes::IXOR => {
            let f = top(fs)?;
            let rhs = pop_int(f)?;
            let lhs = pop_int(f)?;
            f.push(JvmValue::Int(lhs ^ rhs))?;
            f.pc += 1;
        }
        opcodes::LXOR => {
            let f = top(fs)?;
            let rhs = pop_long(f)?;
            let lhs = pop_long(f)?;
            push_long(f, lhs ^ rhs)?;
            f.pc += 1;
        }
        opcodes::IINC => {
            // local index, signed byte delta
            let f = top(fs)?;
            let idx = usize::from(code_byte(f, f.pc + 1)?);
            let delta = byte_to_int64(code_byte(f, f.pc + 2)?);
            match local(f, idx)? {
                JvmValue::Int(v) => set_local(f, idx, JvmValue::Int(v.wrapping_add(delta)))?,
                other => {
                    return Err(JvmEx::new(
                        ExcKind::InvalidType,
                        format!("iinc on a non-int local: {other:?}"),
                    ))
                }
            }
            f.pc += 3;
        }
        opcodes::I2L => {
            let f = top(fs)?;
            let v = pop_int(f)?;
            push_long(f, v)?;
            f.pc += 1;
        }
        opcodes::I2F => {
            let f = top(fs)?;
            let v = pop_int(f)?;
            f.push(JvmValue::Float(v as f64))?;
            f.pc += 1;
        }
        opcodes::I2D => {
            let f = top(fs)?;
            let v = pop_int(f)?;
            push_double(f, v as f64)?;
            f.pc += 1;
        }
        opcodes::L2I => {
            let f = top(fs)?;
            let v = pop_long(f)?;
            f.push(JvmValue::Int(i64::from(v as i32)))?;
            f.pc += 1;
        }
        opcodes::L2F => {
            let f = top(fs)?;
            let v = pop_long(f)?;
            f.push(JvmValue::Float(v as f64))?;
            f.pc += 1;
        }
        opcodes::L2D => {
            let f = top(fs)?;
            let v = pop_long(f)?;
            push_double(f, v as f64)?;
            f.pc += 1;
        }
        opcodes::F2I => {
            // saturating toward the int range; NaN becomes 0
            let f = top(fs)?;
            let v = pop_float(f)?;
            f.push(JvmValue::Int(i64::from(v as i32)))?;
            f.pc += 1;
        }
        opcodes::F2L => {
            let f = top(fs)?;
            let v = pop_float(f)?;
            push_long(f, v as i64)?;
            f.pc += 1;
        }
        opcodes::F2D => {
            let f = top(fs)?;
            let v = pop_float(f)?;
            push_double(f, v)?;
            f.pc += 1;
        }
        opcodes::D2I => {
            let f = top(fs)?;
            let v = pop_double(f)?;
            f.push(JvmValue::Int(i64::from(v as i32)))?;
            f.pc += 1;
        }
        opcodes::D2L => {
            let f = top(fs)?;
            let v = pop_double(f)?;
            push_long(f, v as i64)?;
            f.pc += 1;
        }
        opcodes::D2F => {
            let f = top(fs)?;
            let v = pop_double(f)?;
            f.push(JvmValue::Float(f64::from(v as f32)))?;
            f.pc += 1;
        }
        opcodes::I2B => {
            let f = top(fs)?;
            let v = pop_int(f)?;
            f.push(JvmValue::Int(i64::from(v as i8)))?;
            f.pc += 1;
        }
        opcodes::I2C => {
            let f = top(fs)?;
            let v = pop_int(f)?;
            f.push(JvmValue::Int(i64::from(v as u16)))?;
            f.pc += 1;
        }
        opcodes::I2S => {
            let f = top(fs)?;
            let v = pop_int(f)?;
            f.push(JvmValue::Int(i64::from(v as i16)))?;
            f.pc += 1;
        }
        opcodes::LCMP => {
            let f = top(fs)?;
            let rhs = pop_long(f)?;
            let lhs = pop_long(f)?;
            let v = match lhs.cmp(&rhs) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            };
            f.push(JvmValue::Int(v))?;
            f.pc += 1;
        }
        opcodes::FCMPL | opcodes::FCMPG => {
            // L and G differ only on NaN
            let f = top(fs)?;
            let rhs = pop_float(f)?;
            let lhs = pop_float(f)?;
            let v = float_compare(lhs, rhs, op == opcodes::FCMPG);
            f.push(JvmValue::Int(v))?;
            f.pc += 1;
        }
        opcodes::DCMPL | opcodes::DCMPG => {
            let f = top(fs)?;
            let rhs = pop_double(f)?;
            let lhs = pop_double(f)?;
            let v = float_compare(lhs, rhs, op == opcodes::DCMPG);
            f.push(JvmValue::Int(v))?;
            f.pc += 1;
        }
        opcodes::IFEQ..=opcodes::IFLE => {
            let f = top(fs)?;
            let offset = branch_offset(f)?;
            let v = pop_int(f)?;
            let jump = match op {
                opcodes::IFEQ => v == 0,
                opcodes::IFNE => v != 0,
                opcodes::IFLT => v < 0,
                opcodes::IFGE => v >= 0,
                opcodes::IFGT => v > 0,
                _ => v <= 0,
            };
            branch(f, offset, jump, 3);
        }
        opcodes::IF_ICMPEQ..=opcodes::IF_ICMPLE => {
            let f = top(fs)?;
            let offset = branch_offset(f)?;
            let rhs = pop_int(f)?;
            let lhs = pop_int(f)?;
            let jump = match op {
                opcodes::IF_ICMPEQ => lhs == rhs,
                opcodes::IF_ICMPNE => lhs != rhs,
                opcodes::IF_ICMPLT => lhs < rhs,
                opcodes::IF_ICMPGE => lhs >= rhs,
                opcodes::IF_ICMPGT => lhs > rhs,
                _ => lhs <= rhs,
            };
            branch(f, offset, jump, 3);
        }
        opcodes::IF_ACMPEQ | opcodes::IF_ACMPNE => {
            let f = top(fs)?;
            let offset = branch_offset(f)?;
            let rhs = pop_ref(f)?;
            let lhs = pop_ref(f)?;
            let jump = (lhs == rhs) == (op == opcodes::IF_ACMPEQ);
            branch(f, offset, jump, 3);
        }
        opcodes::IFNULL | opcodes::IFNONNULL => {
            let f = top(fs)?;
            let offset = branch_offset(f)?;
            let v = pop_ref(f)?;
            let jump = v.is_null() == (op == opcodes::IFNULL);
            branch(f, offset, jump, 3);
        }
        opcodes::GOTO => {
            let f = top(fs)?;
            let offset = branch_offset(f)?;
            branch(f, offset, true, 3);
        }
        opcodes::GOTO_W => {
            let f = top(fs)?;
            let offset = four_bytes_to_int64(
                code_byte(f, f.pc + 1)?,
                code_byte(f, f.pc + 2)?,
                code_byte(f, f.pc + 3)?,
                code_byte(f, f.pc + 4)?,
            );
            branch(f, offset, true, 5);
        }
        opcodes::TABLESWITCH => {
            let f = top(fs)?;
            let base = f.pc;
            let mut cursor = base + 1;
            while cursor % 4 != 0 {
                cursor += 1;
            }
            let default = read_i32(f, cursor)?;
            let low = read_i32(f, cursor + 4)?;
            let high = read_i32(f, cursor + 8)?;
            let key = pop_int(f)?;
            let offset = if key < low || key > high {
                default
            } else {
                read_i32(f, cursor + 12 + ((key - low) as usize) * 4)?
            };
            f.pc = (base as i64 + offset) as usize;
        }
        opcodes::LOOKUPSWITCH => {
            let f = top(fs)?;
            let base = f.pc;
            let mut cursor = base + 1;
            while cursor % 4 != 0 {
                cursor += 1;
            }
            let default = read_i32(f, cursor)?;
            let npairs = read_i32(f, cursor + 4)?;
            let key = pop_int(f)?;
            let mut offset = default;
            for i in 0..npairs as usize {
                let matcher = read_i32(f, cursor + 8 + i * 8)?;
                if matcher == key {
                    offset = read_i32(f, cursor + 12 + i * 8)?;
                    break;
                }
            }
            f.pc = (base as i64 + offset) as usize;
        }
        opcodes::IRETURN | opcodes::FRETURN | opcodes::ARETURN => {
            let v = top(fs)?.pop()?;
            fs.pop();
            if let Some(caller) = fs.top_mut() {
                caller.push(v)?;
            }
            return Ok(Flow::Return);
        }
        opcodes::LRETURN | opcodes::DRETURN => {
            let v = {
                let f = top(fs)?;
                let v = f.pop()?;
                let _ = f.pop()?;
                v
            };
            fs.pop();
            if let Some(caller) = fs.top_mut() {
                caller.push(v.clone())?;
                caller.push(v)?;
            }
            return Ok(Flow::Return);
        }
        opcodes::RETURN => {
            fs.pop();
            return Ok(Flow::Return);
        }
        opcodes::GETSTATIC => {
            let (class_name, field_name, desc) = field_ref(fs, "GETSTATIC")?;
            invoke::ensure_initialized(fs, &class_name)?;
            let value = lookup_static(&class_name, &field_name);
            let f = top(fs)?;
            push_static_value(f, value, &desc)?;
            f.pc += 3;
        }
        opcodes::PUTSTATIC => {
            let (class_name, field_name, desc) = field_ref(fs, "PUTSTATIC")?;
            invoke::ensure_initialized(fs, &class_name)?;
            let f = top(fs)?;
            let value = if types::is_two_slot(&desc) {
                let v = f.pop()?;
                let _ = f.pop()?;
                v
            } else {
                f.pop()?
            };
            statics::add_static(
                &format!("{class_name}.{field_name}"),
                &desc,
                stack_to_field_value(value),
            );
            f.pc += 3;
        }
        opcodes::GETFIELD => {
            let (_, field_name, desc) = field_ref(fs, "GETFIELD")?;
            let f = top(fs)?;
            let objref = pop_ref(f)?;
            let JvmValue::Ref(r) = objref else {
                return Err(JvmEx::new(
                    ExcKind::NullPointer,
                    format!("GETFIELD {field_name} on a null reference"),
                ));
            };
            let field = r.lock().unwrap().field(&field_name).cloned();
            match field {
                Some(fld) => push_field_value(f, &fld, &desc)?,
                None => push_default(f, &desc)?,
            }
            f.pc += 3;
        }
        opcodes::PUTFIELD => {
            let (_, field_name, desc) = field_ref(fs, "PUTFIELD")?;
            let f = top(fs)?;
            let value = if types::is_two_slot(&desc) {
                let v = f.pop()?;
                let _ = f.pop()?;
                v
            } else {
                f.pop()?
            };
            let objref = pop_ref(f)?;
            let JvmValue::Ref(r) = objref else {
                return Err(JvmEx::new(
                    ExcKind::NullPointer,
                    format!("PUTFIELD {field_name} on a null reference"),
                ));
            };
            r.lock()
                .unwrap()
                .set_field(&field_name, Field::new(&desc, stack_to_field_value(value)));
            f.pc += 3;
        }
        opcodes::INVOKEVIRTUAL => {
            let idx = operand_index(fs)?;
            invoke::invoke_virtual(fs, idx)?;
            top(fs)?.pc += 3;
        }
        opcodes::INVOKESPECIAL => {
            let idx = operand_index(fs)?;
            invoke::invoke_special(fs, idx)?;
            top(fs)?.pc += 3;
        }
        opcodes::INVOKESTATIC => {
            let idx = operand_index(fs)?;
            invoke::invoke_static(fs, idx)?;
            top(fs)?.pc += 3;
        }
        opcodes::INVOKEINTERFACE => {
            // 2-byte index, a count byte, and a mandatory zero
            let idx = operand_index(fs)?;
            invoke::invoke_interface(fs, idx)?;
            top(fs)?.pc += 5;
        }
        opcodes::INVOKEDYNAMIC => {
            return Err(JvmEx::new(
                ExcKind::UnsupportedOperation,
                "INVOKEDYNAMIC is not supported",
            ));
        }
        opcodes::NEW => {
            let class_name = {
                let f = top(fs)?;
                let idx = cp_index(f, f.pc + 1)?;
                let name = f.cp.class_ref_name(idx);
                if name.is_empty() {
                    return Err(JvmEx::new(
                        ExcKind::Internal,
                        format!("NEW: expected a class ref, but got {:?}", f.cp.tag_of(idx)),
                    ));
                }
                name
            };
            let klass = invoke::ensure_initialized(fs, &class_name)?;
            let mut obj = object::Object::with_class(&class_name);
            for fd in &klass.fields {
                if fd.access.contains(crate::class::AccessFlags::STATIC) {
                    continue;
                }
                obj.set_field(&fd.name, Field::new(&fd.ftype, default_field_value(&fd.ftype)));
            }
            let f = top(fs)?;
            f.push(object::make_ref(obj))?;
            f.pc += 3;
        }
        opcodes::NEWARRAY => {
            let f = top(fs)?;
            let atype = code_byte(f, f.pc + 1)?;
            let count = pop_int(f)?;
            if count < 0 {
                return Err(JvmEx::new(
                    ExcKind::NegativeArraySize,
                    format!("newarray with negative count {count}"),
                ));
            }
            let component = match atype {
                4 => types::BOOL,
                5 => types::CHAR,
                6 => types::FLOAT,
                7 => types::DOUBLE,
                8 => types::BYTE,
                9 => types::SHORT,
                10 => types::INT,
                11 => types::LONG,
                _ => {
                    return Err(JvmEx::new(
                        ExcKind::Internal,
                        format!("newarray with invalid atype {atype}"),
                    ))
                }
            };
            f.push(object::make_ref(object::make_primitive_array(
                component,
                count as usize,
            )))?;
            f.pc += 2;
        }
        opcodes::ANEWARRAY => {
            let f = top(fs)?;
            let idx = cp_index(f, f.pc + 1)?;
            let class_name = f.cp.class_ref_name(idx);
            if class_name.is_empty() {
                return Err(JvmEx::new(
                    ExcKind::Internal,
                    format!("ANEWARRAY: expected a class ref, but got {:?}", f.cp.tag_of(idx)),
                ));
            }
            let count = pop_int(f)?;
            if count < 0 {
                return Err(JvmEx::new(
                    ExcKind::NegativeArraySize,
                    format!("anewarray with negative count {count}"),
                ));
            }
            f.push(object::make_ref(object::make_1dim_ref_array(
                &class_name,
                count as usize,
            )))?;
            f.pc += 3;
        }
        opcodes::MULTIANEWARRAY => {
            let f = top(fs)?;
            let idx = cp_index(f, f.pc + 1)?;
            let dims = usize::from(code_byte(f, f.pc + 3)?);
            let array_type = f.cp.class_ref_name(idx);
            if array_type.is_empty() || dims == 0 {
                return Err(JvmEx::new(
                    ExcKind::Internal,
                    "MULTIANEWARRAY with a bad class ref or zero dimensions",
                ));
            }
            let mut counts = vec![0i64; dims];
            for i in (0..dims).rev() {
                counts[i] = pop_int(f)?;
            }
            let arr = build_multi_array(&array_type, &counts)?;
            f.push(arr)?;
            f.pc += 4;
        }
        opcodes::ARRAYLENGTH => {
            let f = top(fs)?;
            let arr = array_ref(pop_ref(f)?)?;
            let len = object::array_length(&arr.lock().unwrap()).ok_or_else(|| {
                JvmEx::new(ExcKind::InvalidType, "arraylength on a non-array object")
            })?;
            f.push(JvmValue::Int(len as i64))?;
            f.pc += 1;
        }
        opcodes::ATHROW => {
            let f = top(fs)?;
            let v = pop_ref(f)?;
            let JvmValue::Ref(r) = &v else {
                return Err(JvmEx::new(ExcKind::NullPointer, "athrow on a null reference"));
            };
            let (class_name, msg) = {
                let obj = r.lock().unwrap();
                let msg = match obj.field("detailMessage").map(|fld| &fld.fvalue) {
                    Some(FieldValue::Ref(JvmValue::Ref(m))) => {
                        object::string_from_string_object(&m.lock().unwrap()).unwrap_or_default()
                    }
                    _ => String::new(),
                };
                (obj.klass_name().to_string(), msg)
            };
            let kind =
                exceptions::kind_for_class(&class_name).unwrap_or(ExcKind::VirtualMachine);
            return Err(JvmEx::with_obj(kind, msg, v));
        }
        opcodes::CHECKCAST => {
            let f = top(fs)?;
            let idx = cp_index(f, f.pc + 1)?;
            let target = checkcast_target(f, idx)?;
            let v = f.peek()?;
            match &v {
                JvmValue::Null => {}
                JvmValue::Ref(r) => {
                    if !cast::passes_checkcast(&r.lock().unwrap(), &target) {
                        let src = r.lock().unwrap().klass_name().to_string();
                        return Err(JvmEx::new(
                            ExcKind::ClassCast,
                            format!("class {src} cannot be cast to class {target}"),
                        ));
                    }
                }
                other => {
                    return Err(JvmEx::new(
                        ExcKind::InvalidType,
                        format!("checkcast on a non-reference: {other:?}"),
                    ))
                }
            }
            f.pc += 3;
        }
        opcodes::INSTANCEOF => {
            let f = top(fs)?;
            let idx = cp_index(f, f.pc + 1)?;
            let target = checkcast_target(f, idx)?;
            let v = pop_ref(f)?;
            f.push(JvmValue::Int(types::java_bool(cast::instance_of(&v, &target))))?;
            f.pc += 3;
        }
        opcodes::MONITORENTER | opcodes::MONITOREXIT => {
            // object monitors are uncontended in v1; the null check stands
            let f = top(fs)?;
            let v = pop_ref(f)?;
            if v.is_null() {
                return Err(JvmEx::new(ExcKind::NullPointer, "monitor on a null reference"));
            }
            f.pc += 1;
        }
        opcodes::WIDE => {
            wide_op(fs)?;
        }
        opcodes::JSR | opcodes::JSR_W | opcodes::RET => {
            return Err(JvmEx::new(
                ExcKind::Internal,
                format!("{} is not supported", opcodes::mnemonic(op)),
            ));
        }
        opcodes::IMPDEP1 | opcodes::IMPDEP2 => {
            return Err(JvmEx::new(
                ExcKind::Internal,
                format!("reserved opcode 0x{op:02x} in the instruction stream"),
            ));
        }
        other => {
            return Err(JvmEx::new(
                ExcKind::Internal,
                format!("invalid opcode 0x{other:02x} at pc {}", top(fs)?.pc),
            ));
        }
    }
    Ok(Flow::Continue)
}

fn float_compare(lhs: f64, rhs: f64, nan_is_one: bool) -> i64 {
    if lhs.is_nan() || rhs.is_nan() {
        return if nan_is_one { 1 } else { -1 };
    }
    if lhs > rhs {
        1
    } else if lhs < rhs {
        -1
    } else {
        0
    }
}

fn cp_index(f: &Frame, at: usize) -> Result<usize, JvmEx> {
    let b1 = code_byte(f, at)?;
    let b2 = code_byte(f, at + 1)?;
    Ok(usize::from(u16::from_be_bytes([b1, b2])))
}

fn branch_offset(f: &Frame) -> Result<i64, JvmEx> {
    let b1 = code_byte(f, f.pc + 1)?;
    let b2 = code_byte(f, f.pc + 2)?;
    Ok(two_bytes_to_int64(b1, b2))
}

/// Takes the branch relative to the opcode's pc, or falls through past the
/// operand bytes.
fn branch(f: &mut Frame, offset: i64, jump: bool, fallthrough: usize) {
    if jump {
        f.pc = (f.pc as i64 + offset) as usize;
    } else {
        f.pc += fallthrough;
    }
}

fn read_i32(f: &Frame, at: usize) -> Result<i64, JvmEx> {
    Ok(four_bytes_to_int64(
        code_byte(f, at)?,
        code_byte(f, at + 1)?,
        code_byte(f, at + 2)?,
        code_byte(f, at + 3)?,
    ))
}

fn operand_index(fs: &mut FrameStack) -> Result<usize, JvmEx> {
    let f = top(fs)?;
    cp_index(f, f.pc + 1)
}

fn field_ref(fs: &mut FrameStack, op_name: &str) -> Result<(String, String, String), JvmEx> {
    let f = top(fs)?;
    let idx = cp_index(f, f.pc + 1)?;
    let info = f.cp.field_ref_info(idx);
    if info.0.is_empty() {
        return Err(JvmEx::new(
            ExcKind::Internal,
            format!("{op_name}: expected a field ref, but got {:?}", f.cp.tag_of(idx)),
        ));
    }
    Ok(info)
}

/// CHECKCAST/INSTANCEOF name an ordinary class or an array type in the CP.
fn checkcast_target(f: &Frame, idx: usize) -> Result<String, JvmEx> {
    let name = f.cp.class_ref_name(idx);
    if name.is_empty() {
        return Err(JvmEx::new(
            ExcKind::Internal,
            format!("expected a class ref, but got {:?}", f.cp.tag_of(idx)),
        ));
    }
    Ok(name)
}

/// LDC family. Numeric constants push their widened value; a string constant
/// pushes a String object whose value holds the interned pool index; a class
/// ref pushes a Class-shaped object.
fn load_constant(fs: &mut FrameStack, idx: usize, two_slot: bool) -> Result<(), JvmEx> {
    use crate::cpool::{CpTag, CpValue};
    let tag = {
        let f = top(fs)?;
        f.cp.tag_of(idx)
    };
    match tag {
        CpTag::IntConst | CpTag::LongConst => {
            let v = {
                let f = top(fs)?;
                match f.cp.fetch(idx) {
                    CpValue::Int(v) => v,
                    _ => return Err(JvmEx::new(ExcKind::Internal, "bad numeric constant")),
                }
            };
            let f = top(fs)?;
            if two_slot {
                push_long(f, v)
            } else {
                f.push(JvmValue::Int(v))
            }
        }
        CpTag::FloatConst | CpTag::DoubleConst => {
            let v = {
                let f = top(fs)?;
                match f.cp.fetch(idx) {
                    CpValue::Float(v) => v,
                    _ => return Err(JvmEx::new(ExcKind::Internal, "bad float constant")),
                }
            };
            let f = top(fs)?;
            if two_slot {
                push_double(f, v)
            } else {
                f.push(JvmValue::Float(v))
            }
        }
        CpTag::StringConst | CpTag::Utf8 => {
            let pool_idx = {
                let f = top(fs)?;
                match f.cp.fetch(idx) {
                    CpValue::Str(s) => string_pool::intern(s),
                    _ => return Err(JvmEx::new(ExcKind::Internal, "bad string constant")),
                }
            };
            let f = top(fs)?;
            f.push(object::make_ref(object::string_object_from_pool_index(
                pool_idx,
            )))
        }
        CpTag::ClassRef => {
            let name = {
                let f = top(fs)?;
                f.cp.class_ref_name(idx)
            };
            let mut class_obj = object::Object::with_class("java/lang/Class");
            class_obj.set_field(
                "name",
                Field::new(
                    "Ljava/lang/String;",
                    FieldValue::Ref(object::make_ref(object::string_object_from_str(&name))),
                ),
            );
            let f = top(fs)?;
            f.push(object::make_ref(class_obj))
        }
        other => Err(JvmEx::new(
            ExcKind::InvalidType,
            format!("LDC on an unloadable constant tag {other:?}"),
        )),
    }
}

fn default_field_value(desc: &str) -> FieldValue {
    match desc {
        types::FLOAT | types::DOUBLE => FieldValue::Float(0.0),
        d if d.starts_with(types::REF) || d.starts_with(types::ARRAY) => {
            FieldValue::Ref(JvmValue::Null)
        }
        _ => FieldValue::Int(0),
    }
}

fn stack_to_field_value(v: JvmValue) -> FieldValue {
    match v {
        JvmValue::Int(i) => FieldValue::Int(i),
        JvmValue::Float(d) => FieldValue::Float(d),
        other => FieldValue::Ref(other),
    }
}

/// A static's current value, searching the superclass chain of loaded
/// classes the way field resolution does.
fn lookup_static(class_name: &str, field_name: &str) -> Option<crate::statics::Static> {
    let mut current = class_name.to_string();
    loop {
        if let Some(s) = statics::get_static(&format!("{current}.{field_name}")) {
            return Some(s);
        }
        let klass = classloader::meth_area_fetch(&current)?;
        let superclass = klass.superclass_name()?;
        if current == types::OBJECT_CLASS_NAME {
            return None;
        }
        current = superclass.to_string();
    }
}

fn push_static_value(
    f: &mut Frame,
    value: Option<crate::statics::Static>,
    desc: &str,
) -> Result<(), JvmEx> {
    match value {
        Some(s) => {
            let fld = Field {
                ftype: s.t,
                fvalue: s.value,
            };
            push_field_value(f, &fld, desc)
        }
        None => push_default(f, desc),
    }
}

fn push_default(f: &mut Frame, desc: &str) -> Result<(), JvmEx> {
    match desc {
        types::LONG => push_long(f, 0),
        types::DOUBLE => push_double(f, 0.0),
        types::FLOAT => f.push(JvmValue::Float(0.0)),
        d if d.starts_with(types::REF) || d.starts_with(types::ARRAY) => f.push(JvmValue::Null),
        _ => f.push(JvmValue::Int(0)),
    }
}

/// Converts a field table entry to stack value(s). Inline array backings
/// (the String `value` case) get wrapped into a fresh array object; a
/// pool-index string becomes a String object around the same index.
fn push_field_value(f: &mut Frame, fld: &Field, desc: &str) -> Result<(), JvmEx> {
    match &fld.fvalue {
        FieldValue::Int(i) => {
            if types::is_two_slot(desc) {
                push_long(f, *i)
            } else {
                f.push(JvmValue::Int(*i))
            }
        }
        FieldValue::Float(d) => {
            if types::is_two_slot(desc) {
                push_double(f, *d)
            } else {
                f.push(JvmValue::Float(*d))
            }
        }
        FieldValue::Ref(v) => f.push(v.clone()),
        FieldValue::StrIdx(idx) => f.push(object::make_ref(
            object::string_object_from_pool_index(*idx),
        )),
        FieldValue::Bytes(b) => {
            let mut arr = object::make_primitive_array(types::BYTE, 0);
            arr.set_field(
                "value",
                Field::new(types::BYTE_ARRAY, FieldValue::Bytes(b.clone())),
            );
            f.push(object::make_ref(arr))
        }
        FieldValue::Longs(l) => {
            let mut arr = object::make_primitive_array(types::LONG, 0);
            arr.set_field(
                "value",
                Field::new(types::LONG_ARRAY, FieldValue::Longs(l.clone())),
            );
            f.push(object::make_ref(arr))
        }
        FieldValue::Doubles(d) => {
            let mut arr = object::make_primitive_array(types::DOUBLE, 0);
            arr.set_field(
                "value",
                Field::new(types::DOUBLE_ARRAY, FieldValue::Doubles(d.clone())),
            );
            f.push(object::make_ref(arr))
        }
        FieldValue::Refs(r) => {
            let mut arr = object::make_1dim_ref_array(types::OBJECT_CLASS_NAME, 0);
            let ftype = fld.ftype.clone();
            arr.set_field("value", Field::new(&ftype, FieldValue::Refs(r.clone())));
            f.push(object::make_ref(arr))
        }
    }
}

/// Builds the nested arrays of MULTIANEWARRAY. `array_type` is the full
/// array descriptor (e.g. `[[I`), `counts` one length per dimension.
fn build_multi_array(array_type: &str, counts: &[i64]) -> Result<JvmValue, JvmEx> {
    let count = counts[0];
    if count < 0 {
        return Err(JvmEx::new(
            ExcKind::NegativeArraySize,
            format!("multianewarray with negative count {count}"),
        ));
    }
    let component = types::array_component(array_type);
    if counts.len() == 1 {
        return Ok(object::make_ref(object::make_array_object(
            component,
            count as usize,
        )));
    }
    let mut arr = object::make_array_object(component, count as usize);
    let mut elements = Vec::with_capacity(count as usize);
    for _ in 0..count {
        elements.push(build_multi_array(component, &counts[1..])?);
    }
    arr.set_field("value", Field::new(array_type, FieldValue::Refs(elements)));
    Ok(object::make_ref(arr))
}

/// WIDE prefixes a load/store/ret with a 16-bit index, or IINC with a
/// 16-bit index and 16-bit delta.
fn wide_op(fs: &mut FrameStack) -> Result<(), JvmEx> {
    let f = top(fs)?;
    let modified = code_byte(f, f.pc + 1)?;
    let idx = usize::from(u16::from_be_bytes([
        code_byte(f, f.pc + 2)?,
        code_byte(f, f.pc + 3)?,
    ]));
    match modified {
        opcodes::ILOAD | opcodes::FLOAD | opcodes::ALOAD => {
            value_load(f, idx)?;
            f.pc += 4;
        }
        opcodes::LLOAD | opcodes::DLOAD => {
            long_load(f, idx)?;
            f.pc += 4;
        }
        opcodes::ISTORE | opcodes::FSTORE | opcodes::ASTORE => {
            value_store(f, idx)?;
            f.pc += 4;
        }
        opcodes::LSTORE | opcodes::DSTORE => {
            long_store(f, idx)?;
            f.pc += 4;
        }
        opcodes::IINC => {
            let delta = two_bytes_to_int64(code_byte(f, f.pc + 4)?, code_byte(f, f.pc + 5)?);
            match local(f, idx)? {
                JvmValue::Int(v) => set_local(f, idx, JvmValue::Int(v.wrapping_add(delta)))?,
                other => {
                    return Err(JvmEx::new(
                        ExcKind::InvalidType,
                        format!("wide iinc on a non-int local: {other:?}"),
                    ))
                }
            }
            f.pc += 6;
        }
        other => {
            return Err(JvmEx::new(
                ExcKind::Internal,
                format!("wide prefix on unsupported opcode {}", opcodes::mnemonic(other)),
            ))
        }
    }
    Ok(())
}

/// Runs `main([Ljava/lang/String;)V` of `class_name` on a fresh thread.
pub fn run_main_method(class_name: &str, args: &[String]) -> Result<(), JvmEx> {
    let mut thread = ExecThread::new();
    thread.trace = globals::trace_enabled();
    let thread_id = thread.add_to_table(&globals::get_global());

    let klass = classloader::load_class_from_name_only(class_name)?;
    let entry = klass
        .method("main", "([Ljava/lang/String;)V")
        .cloned()
        .ok_or_else(|| {
            JvmEx::new(
                ExcKind::ClassNotLoaded,
                format!("no main([Ljava/lang/String;)V in {class_name}"),
            )
        })?;
    let crate::class::MethEntry::Bytecode(m) = entry else {
        return Err(JvmEx::new(ExcKind::Internal, "main must be a bytecode method"));
    };

    let mut arg_array = object::make_1dim_ref_array(types::STRING_CLASS_NAME, args.len());
    let elements: Vec<JvmValue> = args
        .iter()
        .map(|a| object::make_ref(object::string_object_from_str(a)))
        .collect();
    arg_array.set_field(
        "value",
        Field::new("[Ljava/lang/String;", FieldValue::Refs(elements)),
    );

    let mut fs = FrameStack::new(thread_id);
    let mut frame = Frame::for_method(&klass, &m, thread_id, thread.trace);
    frame.locals[0] = object::make_ref(arg_array);
    fs.push_frame(frame)?;
    run_frame(&mut fs)
}

#[cfg(test)]
mod tests;
