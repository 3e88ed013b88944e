//! The interpreter.
//!
//! ## Notes
//!
//! - Each call pushes a [`Frame`] with its own arguments, locals and evaluation stack.
//! - Exception dispatch is two-phase within a routine: filters of every enclosing region are evaluated (innermost
//!   first) before any `finally`/`fault` handler runs; then the handlers between the throw point and the selected catch
//!   run in order. Frames without a matching handler unwind and re-throw into their caller.
//! - `finally` and filter blocks execute as nested runs of the same frame bounded to the handler's range. An exception
//!   escaping such a run is dispatched again from the start of the block.
//! - Faults (null dereference, bad index, overflow, ...) are raised as objects of the builtin exception types.

use std::collections::HashMap;
use std::ops::Range;
use std::rc::Rc;
use std::sync::Arc;

use exprc_core::switch::{self, SwitchKey};
use exprc_core::{FaultKind, Num, NumFault, faults};

use crate::callable::Callable;
use crate::errors::{RuntimeError, Trap};
use crate::instr::{CmpOp, Const, Instr, Label, ResolvedKind};
use crate::intrinsics::Intrinsic;
use crate::metadata::{FieldRef, MethodBody, MethodKind, MethodRef, TypeRegistry};
use crate::routine::Routine;
use crate::types::{Ty, TypeId};
use crate::value::{Addr, ArrayObj, ListObj, ObjRef, Value};

const MAX_CALL_DEPTH: usize = 256;

struct Frame {
    args: Vec<Value>,
    locals: Vec<Value>,
    stack: Vec<Value>,
    /// Exceptions being handled by an active catch block: `(region index, exception)`.
    handling: Vec<(usize, ObjRef)>,
}

enum Flow {
    Next,
    Jump(usize),
    Leave(usize),
    Return(Value),
    EndFinally,
    EndFilter(bool),
}

enum Exit {
    Return(Value),
    EndFinally,
    EndFilter(bool),
}

/// Executes routines against a type registry.
pub struct Machine {
    registry: Arc<TypeRegistry>,
    frames: Vec<Frame>,
    statics: HashMap<FieldRef, Value>,
}

impl Machine {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            frames: Vec::new(),
            statics: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Call `callable` with `args` and convert an escaping exception into a [`RuntimeError`].
    pub fn invoke(&mut self, callable: &Callable, args: Vec<Value>) -> Result<Value, RuntimeError> {
        self.call_callable(callable, args).map_err(|trap| self.runtime_error(trap))
    }

    pub fn call_callable(&mut self, callable: &Callable, args: Vec<Value>) -> Result<Value, Trap> {
        let mut all = callable.captured.clone();
        all.extend(args);
        self.call_routine(&callable.routine, all)
    }

    /// Call a function value (`Value::Func`).
    pub fn call_value(&mut self, func: &Value, args: Vec<Value>) -> Result<Value, Trap> {
        match func {
            Value::Func(callable) => self.call_callable(callable, args),
            Value::Null => Err(self.fault(FaultKind::NullReference)),
            other => Err(Trap::invalid(format!("cannot call {:?}", other))),
        }
    }

    pub fn call_routine(&mut self, routine: &Arc<Routine>, args: Vec<Value>) -> Result<Value, Trap> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(Trap::invalid("call depth limit exceeded"));
        }
        if args.len() != routine.params.len() {
            return Err(Trap::invalid(format!(
                "{} expects {} arguments, got {}",
                routine.name,
                routine.params.len(),
                args.len()
            )));
        }
        let locals = routine
            .locals
            .iter()
            .map(|t| self.default_value(t))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::trace!(routine = %routine.name, depth = self.frames.len(), "enter");
        self.frames.push(Frame {
            args,
            locals,
            stack: Vec::new(),
            handling: Vec::new(),
        });
        let result = self.exec(routine, 0, 0..routine.code.len());
        self.frames.pop();
        match result? {
            Exit::Return(v) => Ok(v),
            Exit::EndFinally | Exit::EndFilter(_) => Err(Trap::invalid(format!(
                "{}: handler terminator outside a handler block",
                routine.name
            ))),
        }
    }

    /// Call a registry method or intrinsic with already evaluated arguments (`this` first).
    pub fn call_method(&mut self, method: &MethodRef, args: Vec<Value>) -> Result<Value, Trap> {
        let (ty, index) = match method {
            MethodRef::Intrinsic(intrinsic) => return self.intrinsic(intrinsic, args),
            MethodRef::Method { ty, index } => (*ty, *index),
        };
        let registry = self.registry.clone();
        let def = registry.method(ty, index).map_err(|e| Trap::invalid(e.to_string()))?;
        if def.kind == MethodKind::Instance && matches!(args.first(), Some(Value::Null)) {
            return Err(self.fault(FaultKind::NullReference));
        }
        self.run_body(&def.body, def.kind, args)
    }

    fn run_body(&mut self, body: &MethodBody, kind: MethodKind, mut args: Vec<Value>) -> Result<Value, Trap> {
        let is_static = matches!(kind, MethodKind::Static | MethodKind::Extension);
        match body {
            MethodBody::Native(f) => f(self, args),
            MethodBody::Routine(r) => self.call_routine(r, args),
            MethodBody::Empty => Ok(Value::Null),
            MethodBody::FieldGetter(field) => {
                if is_static {
                    self.static_value(*field)
                } else {
                    let this = args.into_iter().next().unwrap_or_default();
                    self.load_field(this, *field)
                }
            }
            MethodBody::FieldSetter(field) => {
                let value = args.pop().unwrap_or_default();
                if is_static {
                    self.statics.insert(*field, value);
                } else {
                    let this = args.into_iter().next().unwrap_or_default();
                    self.store_field(this, *field, value)?;
                }
                Ok(Value::Null)
            }
        }
    }

    pub fn static_value(&self, field: FieldRef) -> Result<Value, Trap> {
        match self.statics.get(&field) {
            Some(v) => Ok(v.clone()),
            None => {
                let def = self.registry.field(field).map_err(|e| Trap::invalid(e.to_string()))?;
                self.default_value(&def.ty)
            }
        }
    }

    pub fn set_static(&mut self, field: FieldRef, value: Value) {
        self.statics.insert(field, value);
    }

    /// Allocate an instance of a class with zeroed fields (no constructor runs).
    pub fn new_object(&self, ty: TypeId) -> Result<Value, Trap> {
        let layout = self.registry.instance_layout(ty).map_err(|e| Trap::invalid(e.to_string()))?;
        let fields = layout
            .iter()
            .map(|t| self.default_value(t))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::new_object(ty, fields))
    }

    /// Create an exception object of `ty` carrying `message`.
    pub fn exception(&self, ty: TypeId, message: &str) -> Trap {
        match self.new_object(ty) {
            Ok(Value::Object(obj)) => {
                if let Ok(slot) = self.registry.field_slot(self.registry.message_field()) {
                    if let Some(m) = obj.fields.borrow_mut().get_mut(slot) {
                        *m = Value::str(message);
                    }
                }
                Trap::Throw(obj)
            }
            Ok(_) => Trap::invalid("exception type is not a class"),
            Err(trap) => trap,
        }
    }

    /// Raise the builtin exception for `kind`.
    pub fn fault(&self, kind: FaultKind) -> Trap {
        self.exception(self.registry.exception_type(Some(kind)), faults::default_message(kind))
    }

    fn num_fault(&self, fault: NumFault) -> Trap {
        match fault {
            NumFault::Overflow | NumFault::DivideByZero => self.fault(fault.fault_kind()),
            other => Trap::invalid(other.to_string()),
        }
    }

    fn default_value(&self, ty: &Ty) -> Result<Value, Trap> {
        Value::default_for(ty, &self.registry).map_err(|e| Trap::invalid(e.to_string()))
    }

    pub fn runtime_error(&self, trap: Trap) -> RuntimeError {
        match trap {
            Trap::Throw(obj) => {
                let type_name = self.registry.type_name(obj.ty).to_string();
                let message = self
                    .registry
                    .field_slot(self.registry.message_field())
                    .ok()
                    .and_then(|slot| obj.fields.borrow().get(slot).and_then(|v| v.as_str().map(str::to_string)))
                    .unwrap_or_default();
                RuntimeError::Unhandled {
                    fault: faults::from_str(&type_name),
                    type_name,
                    message,
                }
            }
            Trap::Invalid(message) => RuntimeError::InvalidProgram(message),
        }
    }

    // =====================================================================
    // Execution loop and exception dispatch
    // =====================================================================

    fn exec(&mut self, routine: &Arc<Routine>, start: usize, bounds: Range<usize>) -> Result<Exit, Trap> {
        let mut pc = start;
        loop {
            let Some(instr) = routine.code.get(pc) else {
                return Err(Trap::invalid(format!("{}: control ran past IL_{:04x}", routine.name, pc)));
            };
            let flow = match self.step(routine, instr) {
                Ok(flow) => flow,
                Err(Trap::Throw(exc)) => {
                    pc = self.dispatch(routine, pc, exc, &bounds)?;
                    continue;
                }
                Err(other) => return Err(other),
            };
            match flow {
                Flow::Next => pc += 1,
                Flow::Jump(target) => pc = target,
                Flow::Leave(target) => match self.leave(routine, pc, target) {
                    Ok(()) => pc = target,
                    Err((at, Trap::Throw(exc))) => pc = self.dispatch(routine, at, exc, &bounds)?,
                    Err((_, other)) => return Err(other),
                },
                Flow::Return(v) => return Ok(Exit::Return(v)),
                Flow::EndFinally => return Ok(Exit::EndFinally),
                Flow::EndFilter(verdict) => return Ok(Exit::EndFilter(verdict)),
            }
        }
    }

    /// Run the `finally` handlers a `leave` from `pc` to `target` exits. On failure, reports the pc to dispatch from.
    fn leave(&mut self, routine: &Arc<Routine>, pc: usize, target: usize) -> Result<(), (usize, Trap)> {
        if let Some(frame) = self.frames.last_mut() {
            frame.handling.retain(|(r, _)| {
                let region = &routine.regions[*r];
                !(region.handler_contains(pc) && !region.handler_contains(target))
            });
        }
        for region in &routine.regions {
            if region.kind == ResolvedKind::Finally && region.try_contains(pc) && !region.try_contains(target) {
                let start = region.handler_start;
                match self.exec(routine, start, start..region.handler_end) {
                    Ok(Exit::EndFinally) => {}
                    Ok(_) => return Err((start, Trap::invalid("finally block must end with endfinally"))),
                    Err(trap) => return Err((start, trap)),
                }
            }
        }
        Ok(())
    }

    /// Find the handler for `exc` thrown at `pc`, running filters first and unwinding handlers second.
    fn dispatch(
        &mut self,
        routine: &Arc<Routine>,
        pc: usize,
        exc: ObjRef,
        bounds: &Range<usize>,
    ) -> Result<usize, Trap> {
        tracing::trace!(
            routine = %routine.name,
            pc,
            exception = self.registry.type_name(exc.ty),
            "dispatching exception"
        );
        let candidates: Vec<usize> = routine
            .regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.try_contains(pc) && bounds.start <= r.try_start && r.handler_end <= bounds.end)
            .map(|(i, _)| i)
            .collect();

        let mut chosen = None;
        for &i in &candidates {
            let region = &routine.regions[i];
            let selected = match &region.kind {
                ResolvedKind::Catch(ty) => self.catches(ty, &exc),
                ResolvedKind::Filter(start) => self.run_filter(routine, i, *start, &exc),
                ResolvedKind::Finally | ResolvedKind::Fault => false,
            };
            if selected {
                chosen = Some(i);
                break;
            }
        }

        for &i in &candidates {
            if Some(i) == chosen {
                break;
            }
            let region = &routine.regions[i];
            if matches!(region.kind, ResolvedKind::Finally | ResolvedKind::Fault) {
                let start = region.handler_start;
                self.reset_to_mark(region.stack_mark)?;
                match self.exec(routine, start, start..region.handler_end) {
                    Ok(Exit::EndFinally) => {}
                    Ok(_) => return Err(Trap::invalid("finally block must end with endfinally")),
                    Err(Trap::Throw(replacement)) => return self.dispatch(routine, start, replacement, bounds),
                    Err(other) => return Err(other),
                }
            }
        }

        let Some(i) = chosen else {
            return Err(Trap::Throw(exc));
        };
        let region = &routine.regions[i];
        let handler = region.handler_start;
        self.reset_to_mark(region.stack_mark)?;
        let frame = self.frame_mut()?;
        frame.handling.retain(|(r, _)| {
            let active = &routine.regions[*r];
            !(active.handler_contains(pc) && !active.handler_contains(handler))
        });
        frame.handling.push((i, exc.clone()));
        frame.stack.push(Value::Object(exc));
        Ok(handler)
    }

    fn catches(&self, ty: &Ty, exc: &ObjRef) -> bool {
        match ty {
            Ty::Object => true,
            Ty::Class(id) => self.registry.is_subclass(exc.ty, *id),
            _ => false,
        }
    }

    /// Evaluate a filter block. Exceptions inside the filter count as "not selected".
    fn run_filter(&mut self, routine: &Arc<Routine>, region: usize, start: usize, exc: &ObjRef) -> bool {
        let r = &routine.regions[region];
        if self.reset_to_mark(r.stack_mark).is_err() {
            return false;
        }
        if let Ok(frame) = self.frame_mut() {
            frame.stack.push(Value::Object(exc.clone()));
        }
        let verdict = matches!(self.exec(routine, start, start..r.handler_start), Ok(Exit::EndFilter(true)));
        let _ = self.reset_to_mark(r.stack_mark);
        verdict
    }

    fn reset_to_mark(&mut self, mark: u16) -> Result<(), Trap> {
        let frame = self.frame_mut()?;
        let depth = frame.locals.get(mark as usize).and_then(Value::as_i64).unwrap_or(0).max(0) as usize;
        frame.stack.truncate(depth);
        Ok(())
    }

    // =====================================================================
    // Stack helpers
    // =====================================================================

    fn frame_mut(&mut self) -> Result<&mut Frame, Trap> {
        self.frames.last_mut().ok_or_else(|| Trap::invalid("no active frame"))
    }

    fn push(&mut self, value: Value) -> Result<(), Trap> {
        self.frame_mut()?.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, Trap> {
        self.frame_mut()?
            .stack
            .pop()
            .ok_or_else(|| Trap::invalid("evaluation stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Trap> {
        let frame = self.frame_mut()?;
        if frame.stack.len() < n {
            return Err(Trap::invalid("evaluation stack underflow"));
        }
        let at = frame.stack.len() - n;
        Ok(frame.stack.split_off(at))
    }

    fn pop_num(&mut self) -> Result<Num, Trap> {
        match self.pop()? {
            Value::Num(n) => Ok(n),
            other => Err(Trap::invalid(format!("expected a number, found {:?}", other))),
        }
    }

    fn pop_index(&mut self) -> Result<i64, Trap> {
        match self.pop()? {
            Value::Num(n) if n.kind().is_integral() => Ok(n.as_i64()),
            other => Err(Trap::invalid(format!("expected an integer, found {:?}", other))),
        }
    }

    fn target(&self, routine: &Routine, label: Label) -> Result<usize, Trap> {
        routine
            .target(label)
            .ok_or_else(|| Trap::invalid(format!("{}: unknown label {}", routine.name, label)))
    }

    // =====================================================================
    // Instructions
    // =====================================================================

    fn step(&mut self, routine: &Arc<Routine>, instr: &Instr) -> Result<Flow, Trap> {
        let depth = self.frames.len() - 1;
        match instr {
            Instr::Nop => {}
            Instr::Ldc(c) => {
                let v = match c {
                    Const::Null => Value::Null,
                    Const::Bool(b) => Value::Bool(*b),
                    Const::Num(n) => Value::Num(*n),
                    Const::Str(s) => Value::Str(s.clone()),
                };
                self.push(v)?;
            }
            Instr::LdDefault(ty) => {
                let v = self.default_value(ty)?;
                self.push(v)?;
            }
            Instr::LdArg(i) => {
                let v = self.load_addr(&Addr::Arg { frame: depth, index: *i })?;
                self.push(v)?;
            }
            Instr::LdArgA(i) => self.push(Value::Addr(Addr::Arg { frame: depth, index: *i }))?,
            Instr::StArg(i) => {
                let v = self.pop()?;
                self.store_addr(&Addr::Arg { frame: depth, index: *i }, v)?;
            }
            Instr::LdLoc(i) => {
                let v = self.load_addr(&Addr::Local { frame: depth, slot: *i })?;
                self.push(v)?;
            }
            Instr::LdLocA(i) => self.push(Value::Addr(Addr::Local { frame: depth, slot: *i }))?,
            Instr::StLoc(i) => {
                let v = self.pop()?;
                self.store_addr(&Addr::Local { frame: depth, slot: *i }, v)?;
            }
            Instr::Dup => {
                let v = self.pop()?;
                self.push(v.clone())?;
                self.push(v)?;
            }
            Instr::Pop => {
                self.pop()?;
            }
            Instr::Arith { op, checked } => {
                let b = self.pop_num()?;
                let a = self.pop_num()?;
                let r = a.arith(*op, b, *checked).map_err(|f| self.num_fault(f))?;
                self.push(Value::Num(r))?;
            }
            Instr::Bitwise(op) => {
                let b = self.pop()?;
                let a = self.pop()?;
                let r = match (a, b) {
                    (Value::Bool(x), Value::Bool(y)) => Value::Bool(match op {
                        exprc_core::BitOp::And => x & y,
                        exprc_core::BitOp::Or => x | y,
                        exprc_core::BitOp::Xor => x ^ y,
                        _ => return Err(Trap::invalid("shift of a boolean")),
                    }),
                    (Value::Num(x), Value::Num(y)) => Value::Num(x.bitwise(*op, y).map_err(|f| self.num_fault(f))?),
                    (x, y) => return Err(Trap::invalid(format!("bitwise operands {:?} and {:?}", x, y))),
                };
                self.push(r)?;
            }
            Instr::Neg { checked } => {
                let a = self.pop_num()?;
                let r = a.neg(*checked).map_err(|f| self.num_fault(f))?;
                self.push(Value::Num(r))?;
            }
            Instr::Not => {
                let r = match self.pop()? {
                    Value::Bool(b) => Value::Bool(!b),
                    Value::Num(n) => Value::Num(n.not().map_err(|f| self.num_fault(f))?),
                    other => return Err(Trap::invalid(format!("cannot negate {:?}", other))),
                };
                self.push(r)?;
            }
            Instr::Conv { to, checked } => {
                let a = self.pop_num()?;
                let r = a.convert(*to, *checked).map_err(|f| self.num_fault(f))?;
                self.push(Value::Num(r))?;
            }
            Instr::Cmp(op) => {
                let b = self.pop()?;
                let a = self.pop()?;
                let r = self.compare(*op, &a, &b)?;
                self.push(Value::Bool(r))?;
            }
            Instr::Br(l) => return Ok(Flow::Jump(self.target(routine, *l)?)),
            Instr::BrTrue(l) => {
                if self.pop()?.is_truthy() {
                    return Ok(Flow::Jump(self.target(routine, *l)?));
                }
            }
            Instr::BrFalse(l) => {
                if !self.pop()?.is_truthy() {
                    return Ok(Flow::Jump(self.target(routine, *l)?));
                }
            }
            Instr::BrNull(l) => {
                if self.pop()?.is_absent() {
                    return Ok(Flow::Jump(self.target(routine, *l)?));
                }
            }
            Instr::BrInst(l) => {
                if !self.pop()?.is_absent() {
                    return Ok(Flow::Jump(self.target(routine, *l)?));
                }
            }
            Instr::Switch(labels) => {
                let v = self.pop_index()?;
                if let Some(l) = usize::try_from(v).ok().and_then(|i| labels.get(i)) {
                    return Ok(Flow::Jump(self.target(routine, *l)?));
                }
            }
            Instr::Leave(l) => return Ok(Flow::Leave(self.target(routine, *l)?)),
            Instr::EndFinally => return Ok(Flow::EndFinally),
            Instr::EndFilter => {
                let verdict = self.pop()?.is_truthy();
                return Ok(Flow::EndFilter(verdict));
            }
            Instr::Throw => {
                return match self.pop()? {
                    Value::Object(obj) if self.registry.is_exception(obj.ty) => Err(Trap::Throw(obj)),
                    Value::Null => Err(self.fault(FaultKind::NullReference)),
                    other => Err(Trap::invalid(format!("cannot throw {:?}", other))),
                };
            }
            Instr::Rethrow => {
                let current = self.frame_mut()?.handling.last().map(|(_, exc)| exc.clone());
                return match current {
                    Some(exc) => Err(Trap::Throw(exc)),
                    None => Err(Trap::invalid("rethrow outside a catch block")),
                };
            }
            Instr::Ret => {
                let v = if routine.ret.is_void() { Value::Null } else { self.pop()? };
                return Ok(Flow::Return(v));
            }
            Instr::NewObj(method) => {
                let v = self.construct(method)?;
                self.push(v)?;
            }
            Instr::InitObj(ty) => {
                let addr = self.pop_addr()?;
                let v = self.default_value(ty)?;
                self.store_addr(&addr, v)?;
            }
            Instr::LdFld(field) => {
                let receiver = self.pop()?;
                let v = self.load_field(receiver, *field)?;
                self.push(v)?;
            }
            Instr::LdFldA(field) => {
                let slot = self.slot_of(*field)?;
                let addr = match self.pop()? {
                    Value::Object(obj) => Addr::Field { obj, slot },
                    Value::Addr(base) => Addr::Inner {
                        base: Box::new(base),
                        slot,
                    },
                    Value::Null => return Err(self.fault(FaultKind::NullReference)),
                    other => return Err(Trap::invalid(format!("ldflda on {:?}", other))),
                };
                self.push(Value::Addr(addr))?;
            }
            Instr::StFld(field) => {
                let value = self.pop()?;
                let receiver = self.pop()?;
                self.store_field(receiver, *field, value)?;
            }
            Instr::LdSFld(field) => {
                let v = self.static_value(*field)?;
                self.push(v)?;
            }
            Instr::LdSFldA(field) => self.push(Value::Addr(Addr::Static(*field)))?,
            Instr::StSFld(field) => {
                let v = self.pop()?;
                self.statics.insert(*field, v);
            }
            Instr::Call(method) => {
                let sig = self.registry.signature(method).map_err(|e| Trap::invalid(e.to_string()))?;
                let argc = sig.params.len() + usize::from(sig.this.is_some());
                let args = self.pop_n(argc)?;
                let r = self.call_method(method, args)?;
                if !sig.ret.is_void() {
                    self.push(r)?;
                }
            }
            Instr::CallChild(index) => {
                let child = routine
                    .children
                    .get(*index as usize)
                    .cloned()
                    .ok_or_else(|| Trap::invalid(format!("{}: no child routine #{}", routine.name, index)))?;
                let args = self.pop_n(child.params.len())?;
                let r = self.call_routine(&child, args)?;
                if !child.ret.is_void() {
                    self.push(r)?;
                }
            }
            Instr::NewArr(elem) => {
                let len = self.pop_index()?;
                let v = self.new_array(elem, vec![len])?;
                self.push(v)?;
            }
            Instr::NewMdArr { elem, rank } => {
                let dims = self.pop_n(*rank as usize)?;
                let dims = dims
                    .iter()
                    .map(|d| d.as_i64().ok_or_else(|| Trap::invalid("array bound is not an integer")))
                    .collect::<Result<Vec<_>, _>>()?;
                let v = self.new_array(elem, dims)?;
                self.push(v)?;
            }
            Instr::NewList(elem) => self.push(Value::new_list(elem.clone(), Vec::new()))?,
            Instr::LdLen => {
                let len = match self.pop()? {
                    Value::Array(a) => a.len(),
                    Value::Null => return Err(self.fault(FaultKind::NullReference)),
                    other => return Err(Trap::invalid(format!("ldlen on {:?}", other))),
                };
                self.push(Value::from(len as i32))?;
            }
            Instr::LdElem => {
                let index = self.pop_index()?;
                let array = self.pop()?;
                let addr = self.element_addr(array, index)?;
                let v = self.load_addr(&addr)?;
                self.push(v)?;
            }
            Instr::LdElemA => {
                let index = self.pop_index()?;
                let array = self.pop()?;
                let addr = self.element_addr(array, index)?;
                self.push(Value::Addr(addr))?;
            }
            Instr::StElem => {
                let value = self.pop()?;
                let index = self.pop_index()?;
                let array = self.pop()?;
                let addr = self.element_addr(array, index)?;
                self.store_addr(&addr, value)?;
            }
            Instr::LdInd => {
                let addr = self.pop_addr()?;
                let v = self.load_addr(&addr)?;
                self.push(v)?;
            }
            Instr::StInd => {
                let value = self.pop()?;
                let addr = self.pop_addr()?;
                self.store_addr(&addr, value)?;
            }
            Instr::OptHasValue => {
                let v = self.pop()?;
                self.push(Value::Bool(!v.is_absent()))?;
            }
            Instr::OptGetValueOrDefault(ty) => {
                let v = match self.pop()? {
                    Value::Opt(Some(inner)) => *inner,
                    Value::Opt(None) | Value::Null => self.default_value(ty)?,
                    other => other,
                };
                self.push(v)?;
            }
            Instr::OptGetValue => {
                let v = match self.pop()? {
                    Value::Opt(Some(inner)) => *inner,
                    Value::Opt(None) | Value::Null => return Err(self.fault(FaultKind::InvalidOperation)),
                    other => other,
                };
                self.push(v)?;
            }
            Instr::OptWrap => {
                let v = self.pop()?;
                let wrapped = match v {
                    Value::Opt(_) => v,
                    other => Value::Opt(Some(Box::new(other))),
                };
                self.push(wrapped)?;
            }
            Instr::IsInst { ty, exact } => {
                let v = self.pop()?;
                let r = if self.instance_of(&v, ty, *exact) { v } else { Value::Null };
                self.push(r)?;
            }
            Instr::CastClass(ty) => {
                let v = self.pop()?;
                if !v.is_absent() && !self.instance_of(&v, ty, false) {
                    return Err(self.fault(FaultKind::InvalidCast));
                }
                self.push(v)?;
            }
            Instr::Box(_) => {
                let boxed = match self.pop()? {
                    Value::Opt(Some(inner)) => *inner,
                    Value::Opt(None) => Value::Null,
                    other => other,
                };
                self.push(boxed)?;
            }
            Instr::UnboxAny(ty) => {
                let v = self.pop()?;
                let r = self.unbox(v, ty)?;
                self.push(r)?;
            }
            Instr::LdFtn(index) => {
                let child = routine
                    .children
                    .get(*index as usize)
                    .ok_or_else(|| Trap::invalid(format!("{}: no child routine #{}", routine.name, index)))?;
                self.push(Value::FnPtr(child.clone()))?;
            }
            Instr::NewInvoker { captured } => {
                let target = match self.pop()? {
                    Value::FnPtr(r) => r,
                    other => return Err(Trap::invalid(format!("newinvoker on {:?}", other))),
                };
                let captured = self.pop_n(*captured as usize)?;
                self.push(Value::Func(Rc::new(Callable::new(target, captured))))?;
            }
            Instr::CallInvoker { argc } => {
                let args = self.pop_n(*argc as usize)?;
                let func = self.pop()?;
                let returns = match &func {
                    Value::Func(c) => !c.routine.ret.is_void(),
                    _ => true,
                };
                let r = self.call_value(&func, args)?;
                if returns {
                    self.push(r)?;
                }
            }
            Instr::MarkStack(slot) => {
                let height = self.frame_mut()?.stack.len();
                self.store_addr(&Addr::Local { frame: depth, slot: *slot }, Value::from(height as i32))?;
            }
            Instr::ResetStack(slot) => self.reset_to_mark(*slot)?,
            Instr::HashBucket { size } => {
                let v = self.pop()?;
                let key = match &v {
                    Value::Num(n) => SwitchKey::Int(n.as_i64()),
                    Value::Bool(b) => SwitchKey::Bool(*b),
                    Value::Str(s) => SwitchKey::Str(s),
                    other => return Err(Trap::invalid(format!("cannot hash {:?}", other))),
                };
                let bucket = switch::bucket_of(key, (*size).max(1));
                self.push(Value::from(bucket as i32))?;
            }
        }
        Ok(Flow::Next)
    }

    // =====================================================================
    // Objects, arrays and addresses
    // =====================================================================

    fn construct(&mut self, method: &MethodRef) -> Result<Value, Trap> {
        let MethodRef::Method { ty, index } = method else {
            return Err(Trap::invalid("newobj requires a constructor"));
        };
        let registry = self.registry.clone();
        let def = registry.method(*ty, *index).map_err(|e| Trap::invalid(e.to_string()))?;
        if def.kind != MethodKind::Ctor {
            return Err(Trap::invalid(format!("{} is not a constructor", registry.method_name(method))));
        }
        let args = self.pop_n(def.params.len())?;
        let instance = match registry.ty_of(*ty).map_err(|e| Trap::invalid(e.to_string()))? {
            Ty::Struct(_) => self.default_value(&Ty::Struct(*ty))?,
            _ => self.new_object(*ty)?,
        };
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(instance.clone());
        all.extend(args);
        // Struct constructors return the initialized value; class constructors mutate `this`.
        match self.run_body(&def.body, def.kind, all)? {
            v @ Value::Struct(_) => Ok(v),
            _ => Ok(instance),
        }
    }

    fn slot_of(&self, field: FieldRef) -> Result<usize, Trap> {
        self.registry.field_slot(field).map_err(|e| Trap::invalid(e.to_string()))
    }

    fn load_field(&mut self, receiver: Value, field: FieldRef) -> Result<Value, Trap> {
        let slot = self.slot_of(field)?;
        let fields_of = |v: &Value| -> Option<Value> {
            match v {
                Value::Object(obj) => obj.fields.borrow().get(slot).cloned(),
                Value::Struct(s) => s.fields.get(slot).cloned(),
                _ => None,
            }
        };
        match receiver {
            Value::Null => Err(self.fault(FaultKind::NullReference)),
            Value::Addr(addr) => {
                let target = self.load_addr(&addr)?;
                fields_of(&target).ok_or_else(|| Trap::invalid("ldfld through a non-struct address"))
            }
            other => fields_of(&other).ok_or_else(|| Trap::invalid(format!("ldfld on {:?}", other))),
        }
    }

    fn store_field(&mut self, receiver: Value, field: FieldRef, value: Value) -> Result<(), Trap> {
        let slot = self.slot_of(field)?;
        match receiver {
            Value::Null => Err(self.fault(FaultKind::NullReference)),
            Value::Object(obj) => {
                let mut fields = obj.fields.borrow_mut();
                let f = fields.get_mut(slot).ok_or_else(|| Trap::invalid("field slot out of range"))?;
                *f = value;
                Ok(())
            }
            Value::Addr(base) => self.store_addr(
                &Addr::Inner {
                    base: Box::new(base),
                    slot,
                },
                value,
            ),
            other => Err(Trap::invalid(format!("stfld on {:?}", other))),
        }
    }

    fn pop_addr(&mut self) -> Result<Addr, Trap> {
        match self.pop()? {
            Value::Addr(addr) => Ok(addr),
            Value::Null => Err(self.fault(FaultKind::NullReference)),
            other => Err(Trap::invalid(format!("expected an address, found {:?}", other))),
        }
    }

    fn element_addr(&self, array: Value, index: i64) -> Result<Addr, Trap> {
        match array {
            Value::Array(array) => {
                if index < 0 || index as usize >= array.len() {
                    return Err(self.fault(FaultKind::IndexOutOfRange));
                }
                Ok(Addr::Elem {
                    array,
                    index: index as usize,
                })
            }
            Value::Null => Err(self.fault(FaultKind::NullReference)),
            other => Err(Trap::invalid(format!("element access on {:?}", other))),
        }
    }

    pub fn load_addr(&self, addr: &Addr) -> Result<Value, Trap> {
        let missing = || Trap::invalid(format!("dangling address {:?}", addr));
        match addr {
            Addr::Local { frame, slot } => self
                .frames
                .get(*frame)
                .and_then(|f| f.locals.get(*slot as usize))
                .cloned()
                .ok_or_else(missing),
            Addr::Arg { frame, index } => self
                .frames
                .get(*frame)
                .and_then(|f| f.args.get(*index as usize))
                .cloned()
                .ok_or_else(missing),
            Addr::Field { obj, slot } => obj.fields.borrow().get(*slot).cloned().ok_or_else(missing),
            Addr::Static(field) => self.static_value(*field),
            Addr::Elem { array, index } => array.data.borrow().get(*index).cloned().ok_or_else(missing),
            Addr::Inner { base, slot } => match self.load_addr(base)? {
                Value::Struct(s) => s.fields.get(*slot).cloned().ok_or_else(missing),
                Value::Object(obj) => obj.fields.borrow().get(*slot).cloned().ok_or_else(missing),
                Value::Null => Err(self.fault(FaultKind::NullReference)),
                _ => Err(missing()),
            },
        }
    }

    pub fn store_addr(&mut self, addr: &Addr, value: Value) -> Result<(), Trap> {
        let missing = || Trap::invalid(format!("dangling address {:?}", addr));
        match addr {
            Addr::Local { frame, slot } => {
                let cell = self
                    .frames
                    .get_mut(*frame)
                    .and_then(|f| f.locals.get_mut(*slot as usize))
                    .ok_or_else(missing)?;
                *cell = value;
            }
            Addr::Arg { frame, index } => {
                let cell = self
                    .frames
                    .get_mut(*frame)
                    .and_then(|f| f.args.get_mut(*index as usize))
                    .ok_or_else(missing)?;
                *cell = value;
            }
            Addr::Field { obj, slot } => {
                let mut fields = obj.fields.borrow_mut();
                *fields.get_mut(*slot).ok_or_else(missing)? = value;
            }
            Addr::Static(field) => {
                self.statics.insert(*field, value);
            }
            Addr::Elem { array, index } => {
                let mut data = array.data.borrow_mut();
                *data.get_mut(*index).ok_or_else(missing)? = value;
            }
            Addr::Inner { base, slot } => {
                let mut outer = self.load_addr(base)?;
                match &mut outer {
                    Value::Struct(s) => *s.fields.get_mut(*slot).ok_or_else(missing)? = value,
                    Value::Object(obj) => {
                        *obj.fields.borrow_mut().get_mut(*slot).ok_or_else(missing)? = value;
                        return Ok(());
                    }
                    Value::Null => return Err(self.fault(FaultKind::NullReference)),
                    _ => return Err(missing()),
                }
                self.store_addr(base, outer)?;
            }
        }
        Ok(())
    }

    fn new_array(&self, elem: &Ty, dims: Vec<i64>) -> Result<Value, Trap> {
        if dims.iter().any(|d| *d < 0) {
            return Err(self.fault(FaultKind::Overflow));
        }
        let dims: Vec<usize> = dims.into_iter().map(|d| d as usize).collect();
        let total = dims.iter().product::<usize>();
        let zero = self.default_value(elem)?;
        Ok(Value::Array(Rc::new(ArrayObj {
            elem: elem.clone(),
            dims,
            data: std::cell::RefCell::new(vec![zero; total]),
        })))
    }

    // =====================================================================
    // Types and comparisons
    // =====================================================================

    /// Whether `value` is a (non-absent) instance of `ty`.
    pub fn instance_of(&self, value: &Value, ty: &Ty, exact: bool) -> bool {
        match (value, ty) {
            (Value::Null | Value::Opt(None), _) => false,
            (Value::Opt(Some(inner)), _) => self.instance_of(inner, ty, exact),
            (_, Ty::Object) => !exact,
            (_, Ty::Nullable(inner)) => self.instance_of(value, inner, exact),
            (Value::Bool(_), Ty::Bool) => true,
            (Value::Num(n), Ty::Num(kind)) => n.kind() == *kind,
            (Value::Str(_), Ty::Str) => true,
            (Value::Struct(s), Ty::Struct(id)) => s.ty == *id,
            (Value::Object(obj), Ty::Class(id)) => {
                if exact {
                    obj.ty == *id
                } else {
                    self.registry.is_subclass(obj.ty, *id)
                }
            }
            (Value::Array(a), Ty::Array(elem)) => a.dims.len() == 1 && a.elem == **elem,
            (Value::Array(a), Ty::MdArray { elem, rank }) => a.dims.len() == *rank as usize && a.elem == **elem,
            (Value::List(l), Ty::List(elem)) => l.elem == **elem,
            (Value::Func(c), Ty::Func { params, ret }) => {
                let own = &c.routine.params[c.captured.len().min(c.routine.params.len())..];
                own == params.as_slice() && c.routine.ret == **ret
            }
            _ => false,
        }
    }

    fn unbox(&self, value: Value, ty: &Ty) -> Result<Value, Trap> {
        match ty {
            Ty::Nullable(inner) => {
                if value.is_absent() {
                    Ok(Value::Opt(None))
                } else if self.instance_of(&value, inner, false) {
                    Ok(Value::Opt(Some(Box::new(value))))
                } else {
                    Err(self.fault(FaultKind::InvalidCast))
                }
            }
            t if t.is_value_type() => {
                if value.is_absent() {
                    Err(self.fault(FaultKind::NullReference))
                } else if self.instance_of(&value, t, false) {
                    Ok(value)
                } else {
                    Err(self.fault(FaultKind::InvalidCast))
                }
            }
            t => {
                if value.is_absent() || self.instance_of(&value, t, false) {
                    Ok(value)
                } else {
                    Err(self.fault(FaultKind::InvalidCast))
                }
            }
        }
    }

    fn compare(&self, op: CmpOp, a: &Value, b: &Value) -> Result<bool, Trap> {
        let ordering = match (a, b) {
            (Value::Num(x), Value::Num(y)) => x.compare(*y).map_err(|f| Trap::invalid(f.to_string()))?,
            (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
            (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
            _ => {
                return match op {
                    CmpOp::Eq => Ok(a == b),
                    CmpOp::Ne => Ok(a != b),
                    _ => Err(Trap::invalid(format!("cannot order {:?} and {:?}", a, b))),
                };
            }
        };
        use std::cmp::Ordering::*;
        Ok(match op {
            CmpOp::Eq => ordering == Some(Equal),
            CmpOp::Ne => ordering != Some(Equal),
            CmpOp::Lt => ordering == Some(Less),
            CmpOp::Le => matches!(ordering, Some(Less | Equal)),
            CmpOp::Gt => ordering == Some(Greater),
            CmpOp::Ge => matches!(ordering, Some(Greater | Equal)),
        })
    }

    // =====================================================================
    // Intrinsics
    // =====================================================================

    fn intrinsic(&mut self, intrinsic: &Intrinsic, args: Vec<Value>) -> Result<Value, Trap> {
        if args.len() != intrinsic.arity() {
            return Err(Trap::invalid(format!(
                "{} expects {} operands",
                intrinsic.name(&self.registry),
                intrinsic.arity()
            )));
        }
        let mut args = args.into_iter();
        let mut next = || args.next().unwrap_or_default();
        match intrinsic {
            Intrinsic::ListAdd(_) => {
                let list = self.expect_list(next())?;
                list.items.borrow_mut().push(next());
                Ok(Value::Null)
            }
            Intrinsic::ListGet(_) => {
                let list = self.expect_list(next())?;
                let index = next().as_i64().unwrap_or(-1);
                let items = list.items.borrow();
                if index < 0 || index as usize >= items.len() {
                    return Err(self.fault(FaultKind::IndexOutOfRange));
                }
                Ok(items[index as usize].clone())
            }
            Intrinsic::ListSet(_) => {
                let list = self.expect_list(next())?;
                let index = next().as_i64().unwrap_or(-1);
                let value = next();
                let mut items = list.items.borrow_mut();
                if index < 0 || index as usize >= items.len() {
                    return Err(self.fault(FaultKind::IndexOutOfRange));
                }
                items[index as usize] = value;
                Ok(Value::Null)
            }
            Intrinsic::ListCount(_) => {
                let list = self.expect_list(next())?;
                let count = list.items.borrow().len();
                Ok(Value::from(count as i32))
            }
            Intrinsic::ArrayResize(elem) => {
                let old = next();
                let len = next().as_i64().unwrap_or(-1);
                if len < 0 {
                    return Err(self.fault(FaultKind::Argument));
                }
                let resized = self.new_array(elem, vec![len])?;
                if let (Value::Array(src), Value::Array(dst)) = (&old, &resized) {
                    let src = src.data.borrow();
                    let mut dst = dst.data.borrow_mut();
                    for (d, s) in dst.iter_mut().zip(src.iter()) {
                        *d = s.clone();
                    }
                }
                Ok(resized)
            }
            Intrinsic::MdGet { rank, .. } => {
                let array = next();
                let indices: Vec<i64> = (0..*rank).map(|_| next().as_i64().unwrap_or(-1)).collect();
                let addr = self.md_addr(array, &indices)?;
                self.load_addr(&addr)
            }
            Intrinsic::MdSet { rank, .. } => {
                let array = next();
                let indices: Vec<i64> = (0..*rank).map(|_| next().as_i64().unwrap_or(-1)).collect();
                let value = next();
                let addr = self.md_addr(array, &indices)?;
                self.store_addr(&addr, value)?;
                Ok(Value::Null)
            }
            Intrinsic::MdLength { .. } => {
                let array = next();
                let dim = next().as_i64().unwrap_or(-1);
                match array {
                    Value::Array(a) => match a.dims.get(dim.max(0) as usize) {
                        Some(len) if dim >= 0 => Ok(Value::from(*len as i32)),
                        _ => Err(self.fault(FaultKind::IndexOutOfRange)),
                    },
                    Value::Null => Err(self.fault(FaultKind::NullReference)),
                    other => Err(Trap::invalid(format!("GetLength on {:?}", other))),
                }
            }
            Intrinsic::StrConcat => {
                let a = next();
                let b = next();
                let joined = format!("{}{}", a.as_str().unwrap_or(""), b.as_str().unwrap_or(""));
                Ok(Value::str(&joined))
            }
            Intrinsic::StrLength => match next() {
                Value::Str(s) => Ok(Value::from(s.chars().count() as i32)),
                Value::Null => Err(self.fault(FaultKind::NullReference)),
                other => Err(Trap::invalid(format!("string length of {:?}", other))),
            },
            Intrinsic::ObjEquals => {
                let a = next();
                let b = next();
                Ok(Value::Bool(self.compare(CmpOp::Eq, &a, &b).unwrap_or(false)))
            }
        }
    }

    fn expect_list(&self, value: Value) -> Result<Rc<ListObj>, Trap> {
        match value {
            Value::List(list) => Ok(list),
            Value::Null => Err(self.fault(FaultKind::NullReference)),
            other => Err(Trap::invalid(format!("expected a list, found {:?}", other))),
        }
    }

    fn md_addr(&self, array: Value, indices: &[i64]) -> Result<Addr, Trap> {
        match array {
            Value::Array(a) => match a.offset(indices) {
                Some(index) => Ok(Addr::Elem { array: a, index }),
                None => Err(self.fault(FaultKind::IndexOutOfRange)),
            },
            Value::Null => Err(self.fault(FaultKind::NullReference)),
            other => Err(Trap::invalid(format!("element access on {:?}", other))),
        }
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("frames", &self.frames.len())
            .field("statics", &self.statics.len())
            .finish()
    }
}
