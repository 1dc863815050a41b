//! Execution frames. One frame per in-progress method call: the method's
//! bytecode, a pc, an operand stack with an explicit top-of-stack index
//! (-1 = empty), and a locals vector. Longs and doubles take two stack slots
//! (the value is pushed twice) and two locals slots, matching the class
//! file's slot accounting.

use std::sync::Arc;

use tracing::trace;

use crate::class::{ExceptionEntry, Klass, LineNumberEntry, MethodInfo};
use crate::cpool::CPool;
use crate::exceptions::{self, ExcKind, JvmEx};
use crate::object::JvmValue;

/// Depth limit for the frame stack; recursion past this throws
/// StackOverflowError rather than exhausting the host stack.
pub const MAX_FRAMES: usize = 1024;

#[derive(Debug)]
pub struct Frame {
    pub thread: u32,
    pub trace: bool,
    pub cl_name: Arc<str>,
    pub meth_name: Arc<str>,
    pub meth_desc: Arc<str>,
    /// The method's bytecode.
    pub meth: Arc<Vec<u8>>,
    pub pc: usize,
    /// The owning class's constant pool (immutable after load).
    pub cp: Arc<CPool>,
    pub locals: Vec<JvmValue>,
    op_stack: Vec<JvmValue>,
    pub tos: i32,
    pub exceptions: Vec<ExceptionEntry>,
    pub line_numbers: Vec<LineNumberEntry>,
}

impl Frame {
    /// A bare frame with the given operand-stack capacity, for tests and
    /// synthetic entry points.
    pub fn with_capacity(op_stack_size: usize) -> Self {
        Frame {
            thread: 0,
            trace: false,
            cl_name: "".into(),
            meth_name: "".into(),
            meth_desc: "".into(),
            meth: Arc::new(Vec::new()),
            pc: 0,
            cp: Arc::new(CPool::new()),
            locals: Vec::new(),
            op_stack: vec![JvmValue::Null; op_stack_size.max(1)],
            tos: -1,
            exceptions: Vec::new(),
            line_numbers: Vec::new(),
        }
    }

    /// The frame for one invocation of a bytecode method. Locals are sized
    /// from the method and start as Null; the caller fills argument slots.
    pub fn for_method(klass: &Klass, m: &MethodInfo, thread: u32, trace: bool) -> Self {
        Frame {
            thread,
            trace,
            cl_name: klass.name.clone(),
            meth_name: m.name.clone(),
            meth_desc: m.desc.clone(),
            meth: m.code.clone(),
            pc: 0,
            cp: klass.cp.clone(),
            locals: vec![JvmValue::Null; usize::from(m.max_locals).max(1)],
            op_stack: vec![JvmValue::Null; usize::from(m.max_stack).max(1)],
            tos: -1,
            exceptions: m.exceptions.clone(),
            line_numbers: m.line_numbers.clone(),
        }
    }

    pub fn op_stack_size(&self) -> usize {
        self.op_stack.len()
    }

    /// Pushes onto the operand stack, throwing StackOverflowError when the
    /// method's declared stack size is exceeded.
    pub fn push(&mut self, v: JvmValue) -> Result<(), JvmEx> {
        if self.tos + 1 >= self.op_stack.len() as i32 {
            return Err(JvmEx::new(
                ExcKind::StackOverflow,
                format!(
                    "in {}.{}, exceeded op stack size of {}",
                    self.cl_name,
                    self.meth_name,
                    self.op_stack.len()
                ),
            ));
        }
        if self.trace {
            self.trace_op("PUSH", Some(&v));
        }
        self.tos += 1;
        self.op_stack[self.tos as usize] = v;
        Ok(())
    }

    /// Push without the overflow check, for exception-handler delivery onto
    /// a just-cleared stack.
    pub fn push_unchecked(&mut self, v: JvmValue) {
        self.tos += 1;
        if self.tos as usize >= self.op_stack.len() {
            self.op_stack.push(v);
        } else {
            self.op_stack[self.tos as usize] = v;
        }
    }

    pub fn pop(&mut self) -> Result<JvmValue, JvmEx> {
        if self.tos == -1 {
            return Err(JvmEx::new(
                ExcKind::Internal,
                format!("stack underflow in pop() in {}.{}", self.cl_name, self.meth_name),
            ));
        }
        let v = self.op_stack[self.tos as usize].clone();
        if self.trace {
            self.trace_op("POP", Some(&v));
        }
        self.tos -= 1;
        Ok(v)
    }

    pub fn peek(&self) -> Result<JvmValue, JvmEx> {
        if self.tos == -1 {
            return Err(JvmEx::new(
                ExcKind::Internal,
                format!("stack underflow in peek() in {}.{}", self.cl_name, self.meth_name),
            ));
        }
        if self.trace {
            self.trace_op("PEEK", Some(&self.op_stack[self.tos as usize]));
        }
        Ok(self.op_stack[self.tos as usize].clone())
    }

    /// The value `depth` slots below the top of the stack (0 = TOS),
    /// without popping.
    pub fn peek_at(&self, depth: usize) -> Result<JvmValue, JvmEx> {
        let idx = self.tos - depth as i32;
        if idx < 0 {
            return Err(JvmEx::new(
                ExcKind::Internal,
                format!(
                    "stack underflow in peek_at({depth}) in {}.{}",
                    self.cl_name, self.meth_name
                ),
            ));
        }
        Ok(self.op_stack[idx as usize].clone())
    }

    pub fn clear_op_stack(&mut self) {
        self.tos = -1;
    }

    fn trace_op(&self, op: &str, v: Option<&JvmValue>) {
        match v {
            Some(v) => trace!(
                "{:>14} {}.{} TOS:{:3} {v:?}",
                op,
                self.cl_name,
                self.meth_name,
                self.tos
            ),
            None => trace!("{:>14} {}.{} TOS:  -", op, self.cl_name, self.meth_name),
        }
    }

    /// Finds a live handler in this frame for a thrown class: the byte range
    /// must cover the current pc and the catch type must be the thrown class
    /// or a superclass (entry 0 catches everything).
    pub fn handler_for(&self, thrown_class: &str) -> Option<usize> {
        for h in &self.exceptions {
            if self.pc < usize::from(h.start_pc) || self.pc >= usize::from(h.end_pc) {
                continue;
            }
            if h.catch_type == 0 {
                return Some(usize::from(h.handler_pc));
            }
            let handler_class = self.cp.class_ref_name(usize::from(h.catch_type));
            if !handler_class.is_empty() && exceptions::handler_catches(thrown_class, &handler_class)
            {
                return Some(usize::from(h.handler_pc));
            }
        }
        None
    }

    /// Source line for the current pc, when the method carried a
    /// line-number table.
    pub fn current_line(&self) -> Option<u16> {
        let mut line = None;
        for entry in &self.line_numbers {
            if usize::from(entry.start_pc) <= self.pc {
                line = Some(entry.line);
            }
        }
        line
    }
}

/// The per-thread LIFO of frames. The top frame is the executing one.
#[derive(Debug)]
pub struct FrameStack {
    frames: Vec<Frame>,
    pub thread_id: u32,
}

impl FrameStack {
    pub fn new(thread_id: u32) -> Self {
        FrameStack {
            frames: Vec::new(),
            thread_id,
        }
    }

    pub fn push_frame(&mut self, f: Frame) -> Result<(), JvmEx> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(JvmEx::new(
                ExcKind::StackOverflow,
                format!("frame stack exceeded {MAX_FRAMES} frames"),
            ));
        }
        self.frames.push(f);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames from the top of the stack down, for stack-trace capture.
    pub fn iter_top_down(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::JvmValue;

    #[test]
    fn push_pop_peek_discipline() {
        let mut f = Frame::with_capacity(4);
        assert_eq!(f.tos, -1);
        f.push(JvmValue::Int(5)).unwrap();
        f.push(JvmValue::Int(6)).unwrap();
        assert_eq!(f.tos, 1);
        assert_eq!(f.peek().unwrap(), JvmValue::Int(6));
        assert_eq!(f.tos, 1);
        assert_eq!(f.pop().unwrap(), JvmValue::Int(6));
        assert_eq!(f.pop().unwrap(), JvmValue::Int(5));
        assert_eq!(f.tos, -1);
    }

    #[test]
    fn underflow_is_internal_exception() {
        let mut f = Frame::with_capacity(2);
        let err = f.pop().unwrap_err();
        assert_eq!(err.kind, ExcKind::Internal);
        let err = f.peek().unwrap_err();
        assert_eq!(err.kind, ExcKind::Internal);
    }

    #[test]
    fn overflow_is_stack_overflow_error() {
        let mut f = Frame::with_capacity(2);
        f.push(JvmValue::Int(1)).unwrap();
        f.push(JvmValue::Int(2)).unwrap();
        let err = f.push(JvmValue::Int(3)).unwrap_err();
        assert_eq!(err.kind, ExcKind::StackOverflow);
    }

    #[test]
    fn catch_all_handler_matches_any_class() {
        let mut f = Frame::with_capacity(2);
        f.exceptions.push(ExceptionEntry {
            start_pc: 0,
            end_pc: 10,
            handler_pc: 20,
            catch_type: 0,
        });
        f.pc = 5;
        assert_eq!(f.handler_for("java/lang/ArithmeticException"), Some(20));
        f.pc = 10;
        assert_eq!(f.handler_for("java/lang/ArithmeticException"), None);
    }

    #[test]
    fn frame_stack_is_lifo_and_bounded() {
        let mut fs = FrameStack::new(1);
        assert!(fs.is_empty());
        fs.push_frame(Frame::with_capacity(1)).unwrap();
        fs.push_frame(Frame::with_capacity(1)).unwrap();
        assert_eq!(fs.len(), 2);
        fs.pop().unwrap();
        assert_eq!(fs.len(), 1);
    }
}
