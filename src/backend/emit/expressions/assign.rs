//! Assignment, compound assignment and increment/decrement on every assignable place.
//!
//! The target's receiver and index operands are evaluated once into temporaries, then the value (or the updated
//! value) is stored through the same operands:
//!
//! ```text
//! a.b[i] += v   =>   r = a.b; k = i; old = r[k]; t = v; new = old + t; r[k] = new; [ldloc new]
//! ```
//!
//! ## Notes
//!
//! - With auto-extension the receiver chain of the target is materialized: missing intermediate objects are created
//!   and stored back, and indexed arrays and lists are grown to hold the index being assigned.
//! - Post-increment and post-decrement yield the value held before the update; every other form yields the stored
//!   value.

use exprc_core::ArithOp;
use exprc_vm::{Instr, Label, Ty};

use super::super::nullable::Operand;
use super::super::{Emitted, ResultShape};
use crate::backend::context::EmitContext;
use crate::backend::errors::CompileError;
use crate::ir::{AssignOp, Expr};

impl<'c> EmitContext<'c> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn emit_assign(
        &mut self,
        op: AssignOp,
        target: &Expr,
        value: Option<&Expr>,
        checked: bool,
        auto_extend: bool,
        exit: Option<Label>,
        shape: ResultShape,
    ) -> Result<Emitted, CompileError> {
        let extend = auto_extend || self.options().auto_extend_assign;
        let keep = shape != ResultShape::Void;
        match (op.binary(), value) {
            (None, Some(value)) => self.emit_store(target, value, extend, exit, keep),
            (Some(bin), Some(value)) if !op.is_step() => {
                self.check_binary_operands(bin, &target.ty, &value.ty)?;
                self.scoped(|ctx| {
                    let (place, mut used) = ctx.prepare_place(target, exit, extend)?;
                    ctx.load_place(&place)?;
                    let old = Operand::new(ctx.spill(&target.ty), &target.ty);
                    used |= ctx.emit_value(value, exit)?;
                    let rhs = Operand::new(ctx.spill(&value.ty), &value.ty);
                    ctx.emit_binary_slots(bin, checked, None, &old, &rhs, &target.ty)?;
                    let new = ctx.spill(&target.ty);
                    ctx.store_place(&place, new)?;
                    Ok(ctx.assign_result(&target.ty, new, keep, used))
                })
            }
            (Some(_), None) if op.is_step() => self.emit_step(op, target, checked, extend, exit, keep),
            (_, found) => Err(CompileError::ArgumentCount {
                what: format!("{:?} assignment", op),
                expected: usize::from(!op.is_step()),
                found: usize::from(found.is_some()),
            }),
        }
    }

    fn emit_store(
        &mut self,
        target: &Expr,
        value: &Expr,
        extend: bool,
        exit: Option<Label>,
        keep: bool,
    ) -> Result<Emitted, CompileError> {
        self.scoped(|ctx| {
            let (place, mut used) = ctx.prepare_place(target, exit, extend)?;
            used |= ctx.emit_value(value, exit)?;
            ctx.coerce(&value.ty, &target.ty, "assignment")?;
            let slot = ctx.spill(&target.ty);
            ctx.store_place(&place, slot)?;
            Ok(ctx.assign_result(&target.ty, slot, keep, used))
        })
    }

    fn emit_step(
        &mut self,
        op: AssignOp,
        target: &Expr,
        checked: bool,
        extend: bool,
        exit: Option<Label>,
        keep: bool,
    ) -> Result<Emitted, CompileError> {
        let Some(kind) = target.ty.underlying().num_kind() else {
            return Err(CompileError::mismatch(
                format!("{:?}", op),
                "a numeric target",
                self.ty_name(&target.ty),
            ));
        };
        let arith = match op {
            AssignOp::PreIncrement | AssignOp::PostIncrement => ArithOp::Add,
            _ => ArithOp::Sub,
        };
        self.scoped(|ctx| {
            let (place, used) = ctx.prepare_place(target, exit, extend)?;
            ctx.load_place(&place)?;
            let old = Operand::new(ctx.spill(&target.ty), &target.ty);
            if target.ty.is_nullable() {
                let ty = target.ty.clone();
                ctx.emit_lifted(
                    &[&old],
                    true,
                    |ctx| ctx.il.emit(Instr::LdDefault(ty)),
                    |ctx| {
                        ctx.load_unwrapped(&old);
                        ctx.emit_one(kind);
                        ctx.il.emit(Instr::Arith { op: arith, checked });
                        Ok(())
                    },
                )?;
            } else {
                ctx.il.emit(Instr::LdLoc(old.slot));
                ctx.emit_one(kind);
                ctx.il.emit(Instr::Arith { op: arith, checked });
            }
            let new = ctx.spill(&target.ty);
            ctx.store_place(&place, new)?;
            let result = if op.yields_old_value() { old.slot } else { new };
            Ok(ctx.assign_result(&target.ty, result, keep, used))
        })
    }

    fn assign_result(&mut self, ty: &Ty, slot: u16, keep: bool, used: bool) -> Emitted {
        if !keep {
            return Emitted::nothing(used);
        }
        self.il.emit(Instr::LdLoc(slot));
        Emitted::of(ty, used)
    }
}
