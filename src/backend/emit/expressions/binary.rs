//! Binary arithmetic, bitwise, comparison and equality operators.
//!
//! ## Notes
//!
//! - `checked` applies to `+`, `-` and `*` (and to nothing else: division faults on zero regardless).
//! - When either operand is an optional scalar both operands are evaluated into temporaries and the operator is
//!   lifted (see [`super::super::nullable`]).

use exprc_vm::{Instr, Label, MethodRef, Ty};

use super::super::Emitted;
use super::super::nullable::Operand;
use crate::backend::context::EmitContext;
use crate::backend::errors::CompileError;
use crate::ir::{BinaryOp, Expr};

impl<'c> EmitContext<'c> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn emit_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        checked: bool,
        method: Option<&MethodRef>,
        exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        if method.is_none() {
            self.check_binary_operands(op, &left.ty, &right.ty)?;
        }
        let lifted = left.ty.is_nullable() || right.ty.is_nullable();
        if !lifted && method.is_none() {
            let mut used = self.emit_value(left, exit)?;
            used |= self.emit_value(right, exit)?;
            self.emit_raw_binary(op, checked, &left.ty)?;
            if expr.ty.is_nullable() {
                self.il.emit(Instr::OptWrap);
            }
            return Ok(Emitted::of(&expr.ty, used));
        }
        self.scoped(|ctx| {
            let mut used = ctx.emit_value(left, exit)?;
            let l = Operand::new(ctx.spill(&left.ty), &left.ty);
            used |= ctx.emit_value(right, exit)?;
            let r = Operand::new(ctx.spill(&right.ty), &right.ty);
            ctx.emit_binary_slots(op, checked, method, &l, &r, &expr.ty)?;
            Ok(Emitted::of(&expr.ty, used))
        })
    }

    pub(crate) fn check_binary_operands(&self, op: BinaryOp, left: &Ty, right: &Ty) -> Result<(), CompileError> {
        let l = left.underlying();
        let r = right.underlying();
        let ok = match op {
            BinaryOp::Shl | BinaryOp::Shr => l.is_integral() && r.is_integral(),
            BinaryOp::Add => l == r && matches!(l, Ty::Num(_) | Ty::Str),
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => l == r && matches!(l, Ty::Num(_)),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => l == r && (l.is_integral() || matches!(l, Ty::Bool)),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                l == r && matches!(l, Ty::Num(_) | Ty::Str)
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                l == r
                    || (left.is_reference() && right.is_reference())
                    || matches!(left, Ty::Object)
                    || matches!(right, Ty::Object)
            }
        };
        if ok {
            Ok(())
        } else {
            Err(CompileError::mismatch(
                format!("binary {:?}", op),
                self.ty_name(left),
                self.ty_name(right),
            ))
        }
    }
}
