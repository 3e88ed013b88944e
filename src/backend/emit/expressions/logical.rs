//! Short-circuit `&&`/`||` (two- and three-valued) and null coalescing.
//!
//! ## Notes
//!
//! - Over `bool?` the left operand decides alone only when it is the dominating value (`false` for `&&`, `true` for
//!   `||`); otherwise the right operand is evaluated exactly once and combined with the left's truth table.
//! - Coalesce evaluates its left operand under its own landing pad, so a null chain on the left falls through to the
//!   right operand instead of short-circuiting the enclosing expression.

use exprc_core::Tri;
use exprc_vm::{Const, Instr, Label, Ty};

use super::super::Emitted;
use super::super::nullable::Operand;
use crate::backend::context::EmitContext;
use crate::backend::errors::CompileError;
use crate::ir::{Expr, ExprKind, Literal, LogicalOp};

impl<'c> EmitContext<'c> {
    pub(crate) fn emit_logical(
        &mut self,
        expr: &Expr,
        op: LogicalOp,
        left: &Expr,
        right: &Expr,
        exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        for side in [left, right] {
            if side.ty.underlying() != &Ty::Bool {
                return Err(CompileError::mismatch("logical operand", "bool", self.ty_name(&side.ty)));
            }
        }
        let lifted = left.ty.is_nullable() || right.ty.is_nullable();
        if lifted && !expr.ty.is_nullable() {
            return Err(CompileError::mismatch("lifted logical operator", "bool?", self.ty_name(&expr.ty)));
        }

        if let (Some(l), Some(r)) = (constant_tri(left), constant_tri(right)) {
            let folded = match op {
                LogicalOp::AndAlso => l.and(r),
                LogicalOp::OrElse => l.or(r),
            };
            self.emit_tri(folded, &expr.ty);
            return Ok(Emitted::of(&expr.ty, false));
        }

        let decisive = op == LogicalOp::OrElse;
        let decide = |l: Label| if decisive { Instr::BrTrue(l) } else { Instr::BrFalse(l) };

        if !lifted {
            let done = self.il.define_label();
            let mut used = self.emit_value(left, exit)?;
            self.il.emit(Instr::Dup);
            self.il.emit(decide(done));
            self.il.emit(Instr::Pop);
            used |= self.emit_value(right, exit)?;
            self.mark(done)?;
            if expr.ty.is_nullable() {
                self.il.emit(Instr::OptWrap);
            }
            return Ok(Emitted::of(&expr.ty, used));
        }

        self.scoped(|ctx| {
            let decided = ctx.il.define_label();
            let eval_right = ctx.il.define_label();
            let done = ctx.il.define_label();

            let mut used = ctx.emit_value(left, exit)?;
            let l = Operand::new(ctx.spill(&left.ty), &left.ty);
            if l.ty.is_nullable() {
                ctx.il.emit(Instr::LdLoc(l.slot));
                ctx.il.emit(Instr::OptHasValue);
                ctx.il.emit(Instr::BrFalse(eval_right));
            }
            ctx.load_unwrapped(&l);
            ctx.il.emit(decide(decided));

            ctx.mark(eval_right)?;
            used |= ctx.emit_value(right, exit)?;
            let r = Operand::new(ctx.spill(&right.ty), &right.ty);
            let left_absent = ctx.il.define_label();
            if l.ty.is_nullable() {
                ctx.il.emit(Instr::LdLoc(l.slot));
                ctx.il.emit(Instr::OptHasValue);
                ctx.il.emit(Instr::BrFalse(left_absent));
            }
            // The left operand did not decide: the right one is the result.
            ctx.il.emit(Instr::LdLoc(r.slot));
            if !r.ty.is_nullable() {
                ctx.il.emit(Instr::OptWrap);
            }
            ctx.il.emit(Instr::Br(done));

            if l.ty.is_nullable() {
                ctx.mark(left_absent)?;
                let absent = ctx.il.define_label();
                if r.ty.is_nullable() {
                    ctx.il.emit(Instr::LdLoc(r.slot));
                    ctx.il.emit(Instr::OptHasValue);
                    ctx.il.emit(Instr::BrFalse(absent));
                }
                ctx.load_unwrapped(&r);
                ctx.il.emit(decide(decided));
                ctx.mark(absent)?;
                ctx.il.emit(Instr::LdDefault(expr.ty.clone()));
                ctx.il.emit(Instr::Br(done));
            }

            ctx.mark(decided)?;
            ctx.il.emit(Instr::Ldc(Const::Bool(decisive)));
            ctx.il.emit(Instr::OptWrap);
            ctx.mark(done)?;
            Ok(Emitted::of(&expr.ty, used))
        })
    }

    fn emit_tri(&mut self, value: Tri, ty: &Ty) {
        match value.to_option() {
            None => self.il.emit(Instr::LdDefault(ty.clone())),
            Some(b) => {
                self.il.emit(Instr::Ldc(Const::Bool(b)));
                if ty.is_nullable() {
                    self.il.emit(Instr::OptWrap);
                }
            }
        }
    }

    pub(crate) fn emit_coalesce(
        &mut self,
        expr: &Expr,
        left: &Expr,
        right: &Expr,
        exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        if !left.ty.can_be_absent() {
            return Err(CompileError::mismatch(
                "coalesce",
                "a nullable or reference left operand",
                self.ty_name(&left.ty),
            ));
        }
        let right_ok = self.registry().is_assignable(&right.ty, &expr.ty)
            || (expr.ty.is_nullable() && expr.ty.underlying() == &right.ty);
        if !right_ok {
            return Err(CompileError::mismatch("coalesce", self.ty_name(&expr.ty), self.ty_name(&right.ty)));
        }
        let done = self.il.define_label();
        if left.ty.is_nullable() {
            return self.scoped(|ctx| {
                let use_right = ctx.il.define_label();
                ctx.emit_guarded(left, super::super::ResultShape::Value)?;
                let slot = ctx.spill(&left.ty);
                ctx.il.emit(Instr::LdLoc(slot));
                ctx.il.emit(Instr::OptHasValue);
                ctx.il.emit(Instr::BrFalse(use_right));
                ctx.il.emit(Instr::LdLoc(slot));
                if !expr.ty.is_nullable() {
                    ctx.il.emit(Instr::OptGetValue);
                }
                ctx.il.emit(Instr::Br(done));
                ctx.mark(use_right)?;
                let used = ctx.emit_value(right, exit)?;
                if expr.ty.is_nullable() && !right.ty.is_nullable() {
                    ctx.il.emit(Instr::OptWrap);
                }
                ctx.mark(done)?;
                Ok(Emitted::of(&expr.ty, used))
            });
        }
        self.emit_guarded(left, super::super::ResultShape::Value)?;
        self.il.emit(Instr::Dup);
        self.il.emit(Instr::BrInst(done));
        self.il.emit(Instr::Pop);
        let used = self.emit_value(right, exit)?;
        self.mark(done)?;
        Ok(Emitted::of(&expr.ty, used))
    }
}

/// The truth value of a boolean or `bool?` constant operand.
fn constant_tri(expr: &Expr) -> Option<Tri> {
    match &expr.kind {
        ExprKind::Constant(Literal::Bool(b)) => Some(Tri::from(*b)),
        ExprKind::Constant(Literal::Null) if expr.ty.is_nullable() => Some(Tri::Absent),
        ExprKind::Default if expr.ty.is_nullable() => Some(Tri::Absent),
        ExprKind::Default => Some(Tri::False),
        _ => None,
    }
}
