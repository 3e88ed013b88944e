//! Unary operators, plain and lifted over optional scalars.

use exprc_core::ArithOp;
use exprc_vm::{Const, Instr, Label, MethodRef, Ty};

use super::super::Emitted;
use super::super::nullable::Operand;
use crate::backend::context::EmitContext;
use crate::backend::errors::CompileError;
use crate::ir::{Expr, UnaryOp};

impl<'c> EmitContext<'c> {
    pub(crate) fn emit_unary(
        &mut self,
        expr: &Expr,
        op: UnaryOp,
        operand: &Expr,
        checked: bool,
        method: Option<&MethodRef>,
        exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        self.check_unary_operand(op, operand, method.is_some())?;
        let lifted = operand.ty.is_nullable();
        if !lifted {
            let used = self.emit_value(operand, exit)?;
            match method {
                Some(m) => self.il.emit(Instr::Call(m.clone())),
                None => self.emit_raw_unary(op, checked, &operand.ty),
            }
            if expr.ty.is_nullable() {
                self.il.emit(Instr::OptWrap);
            }
            return Ok(Emitted::of(&expr.ty, used));
        }

        // `is true` on a bool? is just "present and true".
        if op == UnaryOp::IsTrue && !expr.ty.is_nullable() && method.is_none() {
            let used = self.emit_value(operand, exit)?;
            self.il.emit(Instr::OptGetValueOrDefault(Ty::Bool));
            return Ok(Emitted::of(&expr.ty, used));
        }
        if !expr.ty.is_nullable() && !matches!(op, UnaryOp::IsTrue | UnaryOp::IsFalse) {
            return Err(CompileError::mismatch(
                "lifted unary operator",
                self.ty_name(&Ty::nullable(expr.ty.clone())),
                self.ty_name(&expr.ty),
            ));
        }

        self.scoped(|ctx| {
            let used = ctx.emit_value(operand, exit)?;
            let value = Operand::new(ctx.spill(&operand.ty), &operand.ty);
            let result = expr.ty.clone();
            let inner = operand.ty.underlying().clone();
            let wrap = result.is_nullable();
            ctx.emit_lifted(
                &[&value],
                wrap,
                |ctx| {
                    if wrap {
                        ctx.il.emit(Instr::LdDefault(result));
                    } else {
                        ctx.il.emit(Instr::Ldc(Const::Bool(false)));
                    }
                },
                |ctx| {
                    ctx.load_unwrapped(&value);
                    match method {
                        Some(m) => ctx.il.emit(Instr::Call(m.clone())),
                        None => ctx.emit_raw_unary(op, checked, &inner),
                    }
                    Ok(())
                },
            )?;
            Ok(Emitted::of(&expr.ty, used))
        })
    }

    fn emit_raw_unary(&mut self, op: UnaryOp, checked: bool, ty: &Ty) {
        match op {
            UnaryOp::Plus | UnaryOp::IsTrue => {}
            UnaryOp::Negate => self.il.emit(Instr::Neg { checked }),
            UnaryOp::Not | UnaryOp::IsFalse => self.il.emit(Instr::Not),
            UnaryOp::Increment | UnaryOp::Decrement => {
                if let Some(kind) = ty.num_kind() {
                    self.emit_one(kind);
                }
                let arith = if op == UnaryOp::Increment { ArithOp::Add } else { ArithOp::Sub };
                self.il.emit(Instr::Arith { op: arith, checked });
            }
        }
    }

    fn check_unary_operand(&self, op: UnaryOp, operand: &Expr, has_method: bool) -> Result<(), CompileError> {
        if has_method {
            return Ok(());
        }
        let ty = operand.ty.underlying();
        let ok = match op {
            UnaryOp::Negate | UnaryOp::Plus | UnaryOp::Increment | UnaryOp::Decrement => matches!(ty, Ty::Num(_)),
            UnaryOp::Not => matches!(ty, Ty::Bool) || ty.is_integral(),
            UnaryOp::IsTrue | UnaryOp::IsFalse => matches!(ty, Ty::Bool),
        };
        if ok {
            Ok(())
        } else {
            Err(CompileError::mismatch(
                format!("unary {:?}", op),
                "a numeric or boolean operand",
                self.ty_name(&operand.ty),
            ))
        }
    }
}
