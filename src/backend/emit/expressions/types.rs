//! Type tests, conversions and `as` casts.
//!
//! ## Notes
//!
//! - Numeric conversions honor the node's `checked` flag; a lifted numeric conversion (`int?` to `long?`) maps an
//!   absent operand to an absent result without converting.
//! - Unwrapping an absent optional (`T?` to `T`) faults, as does a failing reference downcast or unboxing.

use exprc_vm::{Instr, Label, MethodRef, Ty};

use super::super::Emitted;
use super::super::nullable::Operand;
use crate::backend::context::EmitContext;
use crate::backend::errors::CompileError;
use crate::ir::Expr;

impl<'c> EmitContext<'c> {
    pub(crate) fn emit_type_test(
        &mut self,
        operand: &Expr,
        target: &Ty,
        exact: bool,
        exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        let used = self.emit_value(operand, exit)?;
        if operand.ty.is_value_type() {
            self.il.emit(Instr::Box(operand.ty.clone()));
        }
        self.il.emit(Instr::IsInst {
            ty: target.clone(),
            exact,
        });
        self.emit_default(&Ty::Object);
        self.il.emit(Instr::Cmp(exprc_vm::CmpOp::Ne));
        Ok(Emitted::of(&Ty::Bool, used))
    }

    pub(crate) fn emit_convert(
        &mut self,
        expr: &Expr,
        operand: &Expr,
        checked: bool,
        method: Option<&MethodRef>,
        exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        let from = &operand.ty;
        let to = &expr.ty;
        if let Some(method) = method {
            return self.emit_user_conversion(expr, operand, method, exit);
        }
        if let (Some(src), Some(dst)) = (from.underlying().num_kind(), to.underlying().num_kind()) {
            let conv = (src != dst).then_some(Instr::Conv { to: dst, checked });
            if from.is_nullable() && to.is_nullable() {
                return self.scoped(|ctx| {
                    let used = ctx.emit_value(operand, exit)?;
                    let value = Operand::new(ctx.spill(from), from);
                    let absent = to.clone();
                    ctx.emit_lifted(
                        &[&value],
                        true,
                        |ctx| ctx.il.emit(Instr::LdDefault(absent)),
                        |ctx| {
                            ctx.load_unwrapped(&value);
                            if let Some(conv) = conv {
                                ctx.il.emit(conv);
                            }
                            Ok(())
                        },
                    )?;
                    Ok(Emitted::of(to, used))
                });
            }
            let used = self.emit_value(operand, exit)?;
            if from.is_nullable() {
                self.il.emit(Instr::OptGetValue);
            }
            if let Some(conv) = conv {
                self.il.emit(conv);
            }
            if to.is_nullable() {
                self.il.emit(Instr::OptWrap);
            }
            return Ok(Emitted::of(to, used));
        }

        let used = self.emit_value(operand, exit)?;
        self.emit_plain_conversion(from, to)?;
        Ok(Emitted::of(to, used))
    }

    /// Conversions that never change a numeric representation: wrapping, unwrapping, boxing and reference casts.
    fn emit_plain_conversion(&mut self, from: &Ty, to: &Ty) -> Result<(), CompileError> {
        if from == to || to.is_void() {
            if to.is_void() && !from.is_void() {
                self.il.emit(Instr::Pop);
            }
            return Ok(());
        }
        if to.is_nullable() && to.underlying() == from {
            self.il.emit(Instr::OptWrap);
            return Ok(());
        }
        if from.is_nullable() && from.underlying() == to {
            self.il.emit(Instr::OptGetValue);
            return Ok(());
        }
        if from.is_value_type() && to.is_reference() {
            if !matches!(to, Ty::Object) {
                return Err(self.unsupported_conversion(from, to));
            }
            self.il.emit(Instr::Box(from.clone()));
            return Ok(());
        }
        if from.is_reference() && to.is_value_type() {
            if !matches!(from, Ty::Object) {
                return Err(self.unsupported_conversion(from, to));
            }
            self.il.emit(Instr::UnboxAny(to.clone()));
            return Ok(());
        }
        if from.is_reference() && to.is_reference() {
            if !self.registry().is_assignable(from, to) {
                self.il.emit(Instr::CastClass(to.clone()));
            }
            return Ok(());
        }
        Err(self.unsupported_conversion(from, to))
    }

    fn unsupported_conversion(&self, from: &Ty, to: &Ty) -> CompileError {
        CompileError::unsupported(format!(
            "conversion from {} to {}",
            self.ty_name(from),
            self.ty_name(to)
        ))
    }

    /// Call a conversion method; lifted over an optional operand when the method takes the plain type.
    fn emit_user_conversion(
        &mut self,
        expr: &Expr,
        operand: &Expr,
        method: &MethodRef,
        exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        let sig = self.registry().signature(method)?;
        let name = self.registry().method_name(method);
        let [(param, _)] = sig.params.as_slice() else {
            return Err(CompileError::ArgumentCount {
                what: name,
                expected: 1,
                found: sig.params.len(),
            });
        };
        let lifted = operand.ty.is_nullable() && !param.is_nullable();
        if !lifted {
            let used = self.emit_value(operand, exit)?;
            self.coerce(&operand.ty, param, &name)?;
            self.il.emit(Instr::Call(method.clone()));
            self.emit_plain_conversion(&sig.ret, &expr.ty)?;
            return Ok(Emitted::of(&expr.ty, used));
        }
        if !expr.ty.can_be_absent() {
            return Err(CompileError::mismatch(
                "lifted conversion",
                self.ty_name(&Ty::nullable(expr.ty.clone())),
                self.ty_name(&expr.ty),
            ));
        }
        self.scoped(|ctx| {
            let used = ctx.emit_value(operand, exit)?;
            let value = Operand::new(ctx.spill(&operand.ty), &operand.ty);
            let result = expr.ty.clone();
            let wrap = result.is_nullable() && !sig.ret.is_nullable();
            ctx.emit_lifted(
                &[&value],
                wrap,
                |ctx| ctx.emit_default(&result),
                |ctx| {
                    ctx.load_unwrapped(&value);
                    ctx.il.emit(Instr::Call(method.clone()));
                    Ok(())
                },
            )?;
            Ok(Emitted::of(&expr.ty, used))
        })
    }

    pub(crate) fn emit_type_as(&mut self, expr: &Expr, operand: &Expr, exit: Option<Label>) -> Result<Emitted, CompileError> {
        let target = &expr.ty;
        if !target.can_be_absent() {
            return Err(CompileError::mismatch(
                "as",
                "a reference or nullable type",
                self.ty_name(target),
            ));
        }
        let used = self.emit_value(operand, exit)?;
        if operand.ty.is_value_type() {
            self.il.emit(Instr::Box(operand.ty.clone()));
        }
        self.il.emit(Instr::IsInst {
            ty: target.clone(),
            exact: false,
        });
        if target.is_nullable() {
            self.il.emit(Instr::UnboxAny(target.clone()));
        }
        Ok(Emitted::of(target, used))
    }
}
