//! Member reads: fields, properties, lengths and optional accessors.

use exprc_vm::{Instr, Intrinsic, Label, MethodRef, Ty};

use super::super::{Emitted, ResultShape};
use crate::backend::context::EmitContext;
use crate::backend::errors::CompileError;
use crate::ir::{Expr, Member};

impl<'c> EmitContext<'c> {
    pub(crate) fn emit_member(
        &mut self,
        expr: &Expr,
        receiver: Option<&Expr>,
        member: &Member,
        exit: Option<Label>,
        shape: ResultShape,
    ) -> Result<Emitted, CompileError> {
        match member {
            Member::Field(field) => {
                let def = self.registry().field(*field)?;
                self.check_member_type(&def.ty, &expr.ty, &self.registry().field_name(*field))?;
                let address = shape.wants_address(&expr.ty);
                if def.is_static {
                    if address {
                        self.il.emit(Instr::LdSFldA(*field));
                        return Ok(Emitted::address(false));
                    }
                    self.il.emit(Instr::LdSFld(*field));
                    return Ok(Emitted::of(&expr.ty, false));
                }
                let receiver = self.require_receiver(receiver, "field")?;
                let used = self.emit_receiver(receiver, exit, ResultShape::ValueTypeAddress, false)?.used_exit;
                if address {
                    self.il.emit(Instr::LdFldA(*field));
                    return Ok(Emitted::address(used));
                }
                self.il.emit(Instr::LdFld(*field));
                Ok(Emitted::of(&expr.ty, used))
            }
            Member::Property(prop) => {
                let def = self.registry().property(*prop)?;
                if !def.index_params.is_empty() {
                    return Err(CompileError::ArgumentCount {
                        what: def.name.clone(),
                        expected: def.index_params.len(),
                        found: 0,
                    });
                }
                let name = format!("{}::{}", self.registry().type_name(prop.ty), def.name);
                self.check_member_type(&def.ty, &expr.ty, &name)?;
                let getter = self.accessor(*prop, false)?;
                let mut used = false;
                if !def.is_static {
                    let receiver = self.require_receiver(receiver, "property")?;
                    used = self.emit_receiver(receiver, exit, ResultShape::ValueTypeAddress, false)?.used_exit;
                }
                self.il.emit(Instr::Call(getter));
                Ok(Emitted::of(&expr.ty, used))
            }
            Member::ArrayLength => {
                let receiver = self.require_receiver(receiver, "length")?;
                self.expect_receiver_type(receiver, "array length", |t| matches!(t, Ty::Array(_)))?;
                let used = self.emit_receiver(receiver, exit, ResultShape::Value, false)?.used_exit;
                self.il.emit(Instr::LdLen);
                Ok(Emitted::of(&expr.ty, used))
            }
            Member::ListCount => {
                let receiver = self.require_receiver(receiver, "count")?;
                let Ty::List(elem) = &receiver.ty else {
                    return Err(CompileError::mismatch("list count", "a list", self.ty_name(&receiver.ty)));
                };
                let used = self.emit_receiver(receiver, exit, ResultShape::Value, false)?.used_exit;
                self.il
                    .emit(Instr::Call(MethodRef::Intrinsic(Intrinsic::ListCount((**elem).clone()))));
                Ok(Emitted::of(&expr.ty, used))
            }
            Member::StrLength => {
                let receiver = self.require_receiver(receiver, "length")?;
                self.expect_receiver_type(receiver, "string length", |t| matches!(t, Ty::Str))?;
                let used = self.emit_receiver(receiver, exit, ResultShape::Value, false)?.used_exit;
                self.il.emit(Instr::Call(MethodRef::Intrinsic(Intrinsic::StrLength)));
                Ok(Emitted::of(&expr.ty, used))
            }
            Member::HasValue => {
                let receiver = self.require_receiver(receiver, "has-value")?;
                self.expect_receiver_type(receiver, "has-value", Ty::is_nullable)?;
                let used = self.emit_value(receiver, exit)?;
                self.il.emit(Instr::OptHasValue);
                Ok(Emitted::of(&expr.ty, used))
            }
            Member::Value => {
                let receiver = self.require_receiver(receiver, "value")?;
                self.expect_receiver_type(receiver, "optional value", Ty::is_nullable)?;
                let mut used = self.emit_value(receiver, exit)?;
                used |= self.null_check(exit);
                self.il.emit(Instr::OptGetValue);
                Ok(Emitted::of(&expr.ty, used))
            }
        }
    }

    fn require_receiver<'e>(&self, receiver: Option<&'e Expr>, what: &str) -> Result<&'e Expr, CompileError> {
        receiver.ok_or_else(|| CompileError::unsupported(format!("{} access without a receiver", what)))
    }

    fn expect_receiver_type(
        &self,
        receiver: &Expr,
        context: &str,
        accepts: impl Fn(&Ty) -> bool,
    ) -> Result<(), CompileError> {
        if accepts(&receiver.ty) {
            Ok(())
        } else {
            Err(CompileError::mismatch(context, "a compatible receiver", self.ty_name(&receiver.ty)))
        }
    }

    fn check_member_type(&self, declared: &Ty, node: &Ty, member: &str) -> Result<(), CompileError> {
        if self.registry().is_assignable(declared, node) {
            Ok(())
        } else {
            Err(CompileError::mismatch(
                format!("access to {}", member),
                self.ty_name(node),
                self.ty_name(declared),
            ))
        }
    }
}
