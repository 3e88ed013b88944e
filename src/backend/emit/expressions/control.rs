//! Structured control flow: conditionals, blocks, loops, jumps and throws.

use exprc_vm::{Instr, Label, Ty};

use super::super::{Emitted, ResultShape};
use crate::backend::context::EmitContext;
use crate::backend::errors::CompileError;
use crate::ir::{Expr, LabelTarget, Variable};

impl<'c> EmitContext<'c> {
    pub(crate) fn emit_conditional(
        &mut self,
        expr: &Expr,
        test: &Expr,
        if_true: &Expr,
        if_false: &Expr,
        exit: Option<Label>,
        shape: ResultShape,
    ) -> Result<Emitted, CompileError> {
        if test.ty.underlying() != &Ty::Bool {
            return Err(CompileError::mismatch("conditional test", "bool", self.ty_name(&test.ty)));
        }
        let discard = expr.ty.is_void() || shape == ResultShape::Void;
        if !expr.ty.is_void() {
            for branch in [if_true, if_false] {
                self.check_branch_type(branch, &expr.ty)?;
            }
        }

        let otherwise = self.il.define_label();
        let end = self.il.define_label();
        self.emit_guarded(test, ResultShape::Value)?;
        if test.ty.is_nullable() {
            self.il.emit(Instr::OptGetValueOrDefault(Ty::Bool));
        }
        self.il.emit(Instr::BrFalse(otherwise));
        let mut used = self.emit_branch(if_true, &expr.ty, exit, discard)?;
        self.il.emit(Instr::Br(end));
        self.mark(otherwise)?;
        used |= self.emit_branch(if_false, &expr.ty, exit, discard)?;
        self.mark(end)?;
        if discard {
            return Ok(Emitted::nothing(used));
        }
        Ok(Emitted::of(&expr.ty, used))
    }

    fn emit_branch(&mut self, branch: &Expr, ty: &Ty, exit: Option<Label>, discard: bool) -> Result<bool, CompileError> {
        if discard {
            return self.emit_void(branch, exit);
        }
        let used = self.emit_value(branch, exit)?;
        if ty.is_nullable() && !branch.ty.is_nullable() {
            self.il.emit(Instr::OptWrap);
        }
        Ok(used)
    }

    /// A branch value must be storable in the node type (optionally wrapped into its optional).
    pub(crate) fn check_branch_type(&self, branch: &Expr, ty: &Ty) -> Result<(), CompileError> {
        let wraps = ty.is_nullable() && ty.underlying() == &branch.ty;
        if self.registry().is_assignable(&branch.ty, ty) || wraps {
            Ok(())
        } else {
            Err(CompileError::mismatch("branch", self.ty_name(ty), self.ty_name(&branch.ty)))
        }
    }

    pub(crate) fn emit_block(
        &mut self,
        expr: &Expr,
        variables: &[Variable],
        body: &[Expr],
        exit: Option<Label>,
        shape: ResultShape,
    ) -> Result<Emitted, CompileError> {
        self.scoped(|ctx| {
            let shadowed: Vec<_> = variables.iter().map(|v| ctx.bind_local(v)).collect();
            let result = ctx.emit_statements(expr, body, exit, shape);
            for (var, previous) in variables.iter().zip(shadowed).rev() {
                ctx.unbind(var, previous);
            }
            result
        })
    }

    fn emit_statements(
        &mut self,
        expr: &Expr,
        body: &[Expr],
        exit: Option<Label>,
        shape: ResultShape,
    ) -> Result<Emitted, CompileError> {
        let Some((last, init)) = body.split_last() else {
            self.emit_default(&expr.ty);
            return Ok(Emitted::of(&expr.ty, false));
        };
        for statement in init {
            self.with_landing_pad(&Ty::Void, |ctx, pad| ctx.emit(statement, pad, ResultShape::Void, false))?;
        }
        if expr.ty.is_void() {
            return Ok(Emitted::nothing(self.emit_void(last, exit)?));
        }
        self.check_branch_type(last, &expr.ty)?;
        if last.ty != expr.ty {
            let used = self.emit_branch(last, &expr.ty, exit, false)?;
            return Ok(Emitted::of(&expr.ty, used));
        }
        self.emit(last, exit, shape, false)
    }

    pub(crate) fn emit_loop(
        &mut self,
        expr: &Expr,
        body: &Expr,
        break_label: Option<&LabelTarget>,
        continue_label: Option<&LabelTarget>,
        _exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        let start = match continue_label {
            Some(target) => self.label_info(target.id)?.label,
            None => self.il.define_label(),
        };
        self.mark(start)?;
        self.with_landing_pad(&Ty::Void, |ctx, pad| ctx.emit(body, pad, ResultShape::Void, false))?;
        self.il.emit(Instr::Br(start));
        let Some(target) = break_label else {
            self.emit_default(&expr.ty);
            return Ok(Emitted::of(&expr.ty, false));
        };
        let info = self.label_info(target.id)?;
        self.mark(info.label)?;
        match info.value_slot {
            Some(slot) => {
                self.il.emit(Instr::LdLoc(slot));
                Ok(Emitted::of(&info.ty, false))
            }
            None => Ok(Emitted::nothing(false)),
        }
    }

    pub(crate) fn emit_goto(&mut self, target: &LabelTarget, value: Option<&Expr>) -> Result<Emitted, CompileError> {
        let info = self.label_info(target.id)?;
        if let Some(value) = value {
            self.emit_guarded(value, ResultShape::Value)?;
            match info.value_slot {
                Some(slot) => {
                    if info.ty.is_nullable() && !value.ty.is_nullable() {
                        self.il.emit(Instr::OptWrap);
                    }
                    self.il.emit(Instr::StLoc(slot));
                }
                None if !value.ty.is_void() => self.il.emit(Instr::Pop),
                None => {}
            }
        } else if !info.ty.is_void() {
            return Err(CompileError::mismatch("jump", self.ty_name(&info.ty), "void"));
        }
        self.jump_to(&info);
        Ok(Emitted::nothing(false))
    }

    pub(crate) fn emit_label(&mut self, target: &LabelTarget, default: Option<&Expr>) -> Result<Emitted, CompileError> {
        let info = self.label_info(target.id)?;
        if let Some(slot) = info.value_slot {
            match default {
                Some(default) => {
                    self.emit_guarded(default, ResultShape::Value)?;
                    if info.ty.is_nullable() && !default.ty.is_nullable() {
                        self.il.emit(Instr::OptWrap);
                    }
                }
                None => self.emit_default(&info.ty),
            }
            self.il.emit(Instr::StLoc(slot));
        } else if let Some(default) = default {
            self.emit_guarded(default, ResultShape::Void)?;
        }
        self.mark(info.label)?;
        match info.value_slot {
            Some(slot) => {
                self.il.emit(Instr::LdLoc(slot));
                Ok(Emitted::of(&info.ty, false))
            }
            None => Ok(Emitted::nothing(false)),
        }
    }

    pub(crate) fn emit_throw(&mut self, operand: Option<&Expr>) -> Result<Emitted, CompileError> {
        match operand {
            Some(operand) => {
                if !operand.ty.is_reference() {
                    return Err(CompileError::mismatch("throw", "an exception object", self.ty_name(&operand.ty)));
                }
                self.emit_guarded(operand, ResultShape::Value)?;
                self.il.emit(Instr::Throw);
            }
            None => self.il.emit(Instr::Rethrow),
        }
        Ok(Emitted::nothing(false))
    }
}
