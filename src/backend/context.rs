//! Per-unit emission state.
//!
//! [`EmitContext`] wraps the [`RoutineBuilder`] of the unit being compiled and tracks everything the expression
//! emitters share: variable slots, label targets, temporary locals, the hidden constants/closure arguments and the
//! nesting depth of protected regions.
//!
//! ## Notes
//!
//! - Temporaries are scoped: [`EmitContext::scoped`] returns every local acquired inside it to the free list when the
//!   closure finishes, whether it succeeded or not. Slots are reused only for the same type.
//! - A landing pad ([`EmitContext::with_landing_pad`]) is the target of null-propagation exits. Its stack-mark
//!   instruction is emitted as a `nop` placeholder and patched only when some check actually branches to it.

use std::collections::HashMap;
use std::sync::Arc;

use exprc_vm::{Const, Instr, Label, Routine, RoutineBuilder, Ty, TypeRegistry};

use super::compile::Compiler;
use super::emit::{Emitted, Form, ResultShape};
use super::errors::CompileError;
use super::options::CompileOptions;
use crate::ir::{Expr, ExprKind, HiddenParams, LabelId, LabelTarget, VarId, Variable};

/// Where a variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Arg(u16),
    Local(u16),
}

/// A label of the tree resolved to a routine label.
#[derive(Debug, Clone)]
pub(crate) struct LabelInfo {
    pub label: Label,
    pub ty: Ty,
    /// Local receiving the value carried by jumps, for non-void labels.
    pub value_slot: Option<u16>,
    /// Number of protected regions enclosing the label.
    pub depth: usize,
}

/// Free-list allocator for temporaries.
#[derive(Debug, Default)]
pub(crate) struct LocalAllocator {
    free: Vec<(Ty, u16)>,
    live: Vec<u16>,
}

impl LocalAllocator {
    fn acquire(&mut self, ty: &Ty, il: &mut RoutineBuilder) -> u16 {
        let slot = match self.free.iter().rposition(|(t, _)| t == ty) {
            Some(i) => self.free.remove(i).1,
            None => il.declare_local(ty.clone()),
        };
        self.live.push(slot);
        slot
    }

    fn mark(&self) -> usize {
        self.live.len()
    }

    fn release_to(&mut self, mark: usize, il: &RoutineBuilder) {
        while self.live.len() > mark {
            let Some(slot) = self.live.pop() else { break };
            if let Some(ty) = il.local_ty(slot) {
                self.free.push((ty.clone(), slot));
            }
        }
    }
}

/// Argument indices of the hidden leading parameters.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct HiddenSlots {
    pub constants: Option<u16>,
    pub closure: Option<u16>,
}

impl HiddenSlots {
    pub fn for_params(hidden: HiddenParams) -> Self {
        let mut next = 0u16;
        let mut take = |present: bool| {
            present.then(|| {
                next += 1;
                next - 1
            })
        };
        let constants = take(hidden.constants);
        let closure = take(hidden.closure);
        Self { constants, closure }
    }
}

pub(crate) struct EmitContext<'c> {
    pub il: RoutineBuilder,
    compiler: &'c Compiler,
    locals: LocalAllocator,
    vars: HashMap<VarId, (Slot, Ty)>,
    labels: HashMap<LabelId, LabelInfo>,
    pub hidden: HiddenParams,
    pub hidden_slots: HiddenSlots,
    /// Number of protected regions (try bodies and handlers) around the current emission point.
    pub try_depth: usize,
    /// Nested units discovered so far, in discovery order.
    pub units: Vec<Arc<Routine>>,
}

impl<'c> EmitContext<'c> {
    pub fn new(compiler: &'c Compiler, il: RoutineBuilder, hidden: HiddenParams) -> Self {
        Self {
            il,
            compiler,
            locals: LocalAllocator::default(),
            vars: HashMap::new(),
            labels: HashMap::new(),
            hidden,
            hidden_slots: HiddenSlots::for_params(hidden),
            try_depth: 0,
            units: Vec::new(),
        }
    }

    pub fn compiler(&self) -> &'c Compiler {
        self.compiler
    }

    pub fn registry(&self) -> &'c TypeRegistry {
        self.compiler.registry()
    }

    pub fn options(&self) -> &'c CompileOptions {
        self.compiler.options()
    }

    pub fn ty_name(&self, ty: &Ty) -> String {
        ty.display(self.registry())
    }

    // =====================================================================
    // Locals
    // =====================================================================

    /// Acquire a temporary of `ty`; it stays reserved until the enclosing scope ends.
    pub fn temp(&mut self, ty: &Ty) -> u16 {
        self.locals.acquire(ty, &mut self.il)
    }

    /// Run `f`, then release every temporary it acquired.
    pub fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, CompileError>) -> Result<T, CompileError> {
        let mark = self.locals.mark();
        let result = f(self);
        self.locals.release_to(mark, &self.il);
        result
    }

    /// Pop the top of the stack into a fresh temporary.
    pub fn spill(&mut self, ty: &Ty) -> u16 {
        let slot = self.temp(ty);
        self.il.emit(Instr::StLoc(slot));
        slot
    }

    // =====================================================================
    // Variables
    // =====================================================================

    pub fn bind_arg(&mut self, var: &Variable, index: u16) {
        self.vars.insert(var.id, (Slot::Arg(index), var.ty.clone()));
    }

    /// Give `var` a zero-initialized local; returns the binding it shadows.
    pub fn bind_local(&mut self, var: &Variable) -> Option<(Slot, Ty)> {
        let slot = self.temp(&var.ty);
        self.emit_default(&var.ty);
        self.il.emit(Instr::StLoc(slot));
        self.vars.insert(var.id, (Slot::Local(slot), var.ty.clone()))
    }

    pub fn unbind(&mut self, var: &Variable, previous: Option<(Slot, Ty)>) {
        match previous {
            Some(p) => {
                self.vars.insert(var.id, p);
            }
            None => {
                self.vars.remove(&var.id);
            }
        }
    }

    pub fn var_slot(&self, id: VarId) -> Result<(Slot, Ty), CompileError> {
        self.vars.get(&id).cloned().ok_or(CompileError::UnknownVariable(id))
    }

    // =====================================================================
    // Labels
    // =====================================================================

    /// Define routine labels for every label target in `expr`, recording the region depth they live at.
    pub fn collect_labels(&mut self, expr: &Expr, depth: usize) {
        match &expr.kind {
            ExprKind::Label { target, .. } => self.define_target(target, depth),
            ExprKind::Loop {
                break_label,
                continue_label,
                ..
            } => {
                for target in break_label.iter().chain(continue_label.iter()) {
                    self.define_target(target, depth);
                }
            }
            ExprKind::Try {
                body,
                handlers,
                finally,
                fault,
            } => {
                self.collect_labels(body, depth + 1);
                for h in handlers {
                    if let Some(filter) = &h.filter {
                        self.collect_labels(filter, depth + 1);
                    }
                    self.collect_labels(&h.body, depth + 1);
                }
                for block in finally.iter().chain(fault.iter()) {
                    self.collect_labels(block, depth + 1);
                }
                return;
            }
            _ => {}
        }
        for child in crate::ir::visit::children(expr) {
            self.collect_labels(child, depth);
        }
    }

    fn define_target(&mut self, target: &LabelTarget, depth: usize) {
        if self.labels.contains_key(&target.id) {
            return;
        }
        let label = self.il.define_label();
        let value_slot = (!target.ty.is_void()).then(|| self.temp(&target.ty));
        self.labels.insert(
            target.id,
            LabelInfo {
                label,
                ty: target.ty.clone(),
                value_slot,
                depth,
            },
        );
    }

    pub fn label_info(&self, id: LabelId) -> Result<LabelInfo, CompileError> {
        self.labels.get(&id).cloned().ok_or(CompileError::UnknownLabel(id))
    }

    /// Jump to a tree label, leaving protected regions when the label lies outside them.
    pub fn jump_to(&mut self, info: &LabelInfo) {
        if self.try_depth > info.depth {
            self.il.emit(Instr::Leave(info.label));
        } else {
            self.il.emit(Instr::Br(info.label));
        }
    }

    pub fn mark(&mut self, label: Label) -> Result<(), CompileError> {
        Ok(self.il.mark_label(label)?)
    }

    // =====================================================================
    // Null-propagation exits
    // =====================================================================

    /// Emit `f` with a fresh null-propagation exit. If the exit is used, the landing pad discards the partial stack
    /// values and produces the default of `ty` in the requested form.
    pub fn with_landing_pad(
        &mut self,
        ty: &Ty,
        f: impl FnOnce(&mut Self, Option<Label>) -> Result<Emitted, CompileError>,
    ) -> Result<Emitted, CompileError> {
        if !self.options().uses_exits() {
            return f(self, None);
        }
        let mark = self.temp(&Ty::I32);
        let at = self.il.position();
        self.il.emit(Instr::Nop);
        let pad = self.il.define_label();
        let emitted = f(self, Some(pad))?;
        if !emitted.used_exit {
            self.mark(pad)?;
            return Ok(emitted);
        }
        self.il.patch(at, Instr::MarkStack(mark));
        let end = self.il.define_label();
        self.il.emit(Instr::Br(end));
        self.mark(pad)?;
        self.il.emit(Instr::ResetStack(mark));
        match emitted.form {
            Form::Nothing => {}
            Form::Value => self.emit_default(ty),
            Form::Address => {
                let slot = self.temp(ty);
                self.emit_default(ty);
                self.il.emit(Instr::StLoc(slot));
                self.il.emit(Instr::LdLocA(slot));
            }
        }
        self.mark(end)?;
        Ok(Emitted {
            used_exit: false,
            form: emitted.form,
        })
    }

    /// Emit `expr` as a self-contained sub-expression whose null exits land on its own default value.
    pub fn emit_guarded(&mut self, expr: &Expr, shape: ResultShape) -> Result<Emitted, CompileError> {
        self.with_landing_pad(&expr.ty, |ctx, exit| ctx.emit(expr, exit, shape, false))
    }

    /// Branch to `exit` when the value on top of the stack is absent. Returns whether a check was emitted.
    pub fn null_check(&mut self, exit: Option<Label>) -> bool {
        match exit {
            Some(exit) if self.options().null_checks => {
                self.il.emit(Instr::Dup);
                self.il.emit(Instr::BrNull(exit));
                true
            }
            _ => false,
        }
    }

    // =====================================================================
    // Small emission helpers
    // =====================================================================

    pub fn emit_default(&mut self, ty: &Ty) {
        match ty {
            Ty::Void => {}
            t if t.is_value_type() => self.il.emit(Instr::LdDefault(t.clone())),
            _ => self.il.emit(Instr::Ldc(Const::Null)),
        }
    }

    pub fn emit_i32(&mut self, v: i32) {
        self.il.emit(Instr::Ldc(Const::Num(exprc_core::Num::I32(v))));
    }

    pub fn load(&mut self, slot: Slot) {
        match slot {
            Slot::Arg(i) => self.il.emit(Instr::LdArg(i)),
            Slot::Local(i) => self.il.emit(Instr::LdLoc(i)),
        }
    }

    pub fn load_address(&mut self, slot: Slot) {
        match slot {
            Slot::Arg(i) => self.il.emit(Instr::LdArgA(i)),
            Slot::Local(i) => self.il.emit(Instr::LdLocA(i)),
        }
    }

    pub fn store(&mut self, slot: Slot) {
        match slot {
            Slot::Arg(i) => self.il.emit(Instr::StArg(i)),
            Slot::Local(i) => self.il.emit(Instr::StLoc(i)),
        }
    }

    pub fn add_child(&mut self, routine: Arc<Routine>) -> u32 {
        self.il.add_child(routine)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_temporaries_are_reused_by_type() {
        let mut il = RoutineBuilder::new("f", vec![], Ty::Void);
        let mut alloc = LocalAllocator::default();
        let mark = alloc.mark();
        let a = alloc.acquire(&Ty::I32, &mut il);
        let b = alloc.acquire(&Ty::Str, &mut il);
        alloc.release_to(mark, &il);
        assert_eq!(alloc.acquire(&Ty::Str, &mut il), b);
        assert_eq!(alloc.acquire(&Ty::I32, &mut il), a);
        assert_eq!(alloc.acquire(&Ty::I32, &mut il), 2);
        assert_eq!(il.local_count(), 3);
    }

    #[test]
    fn test_hidden_slots_follow_declaration_order() {
        let slots = HiddenSlots::for_params(HiddenParams {
            constants: false,
            closure: true,
        });
        assert_eq!(slots.constants, None);
        assert_eq!(slots.closure, Some(0));
        let both = HiddenSlots::for_params(HiddenParams {
            constants: true,
            closure: true,
        });
        assert_eq!((both.constants, both.closure), (Some(0), Some(1)));
    }
}
