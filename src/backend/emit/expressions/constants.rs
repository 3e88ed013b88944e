//! Leaves: literals, variables, hoisted constants and closure variables.

use exprc_vm::{Const, Instr, Ty};

use super::super::{Emitted, ResultShape};
use crate::backend::context::EmitContext;
use crate::backend::errors::CompileError;
use crate::ir::{Expr, Literal, VarId};

impl<'c> EmitContext<'c> {
    pub(crate) fn emit_constant(&mut self, expr: &Expr, lit: &Literal) -> Result<Emitted, CompileError> {
        let ty = &expr.ty;
        let literal_ty = match lit {
            Literal::Null => {
                if ty.is_value_type() && !ty.is_nullable() {
                    return Err(CompileError::mismatch("null constant", "a nullable or reference type", self.ty_name(ty)));
                }
                self.emit_default(ty);
                return Ok(Emitted::of(ty, false));
            }
            Literal::Bool(b) => {
                self.il.emit(Instr::Ldc(Const::Bool(*b)));
                Ty::Bool
            }
            Literal::Num(n) => {
                self.il.emit(Instr::Ldc(Const::Num(*n)));
                Ty::Num(n.kind())
            }
            Literal::Str(s) => {
                self.il.emit(Instr::Ldc(Const::Str(s.as_str().into())));
                Ty::Str
            }
        };
        if ty.underlying() != &literal_ty && !matches!(ty, Ty::Object) {
            return Err(CompileError::mismatch(
                "constant",
                self.ty_name(ty),
                self.ty_name(&literal_ty),
            ));
        }
        if ty.is_nullable() {
            self.il.emit(Instr::OptWrap);
        }
        Ok(Emitted::of(ty, false))
    }

    pub(crate) fn emit_parameter(&mut self, id: VarId, shape: ResultShape) -> Result<Emitted, CompileError> {
        let (slot, ty) = self.var_slot(id)?;
        if shape.wants_address(&ty) {
            self.load_address(slot);
            return Ok(Emitted::address(false));
        }
        self.load(slot);
        Ok(Emitted::of(&ty, false))
    }

    pub(crate) fn emit_hoisted(&mut self, index: u32, ty: &Ty) -> Result<Emitted, CompileError> {
        let Some(table) = self.hidden_slots.constants else {
            return Err(CompileError::unsupported(
                "hoisted constant in a function compiled without a constants table",
            ));
        };
        self.emit_table_element(table, index, ty);
        Ok(Emitted::of(ty, false))
    }

    pub(crate) fn emit_closure_var(&mut self, index: u32, ty: &Ty) -> Result<Emitted, CompileError> {
        let table = self.closure_table()?;
        self.emit_table_element(table, index, ty);
        Ok(Emitted::of(ty, false))
    }

    pub(crate) fn closure_table(&self) -> Result<u16, CompileError> {
        self.hidden_slots.closure.ok_or_else(|| {
            CompileError::unsupported("closure variable in a function compiled without a closure environment")
        })
    }

    /// Load element `index` of an object-array argument and unbox it to `ty`.
    fn emit_table_element(&mut self, table: u16, index: u32, ty: &Ty) {
        self.il.emit(Instr::LdArg(table));
        self.emit_i32(index as i32);
        self.il.emit(Instr::LdElem);
        if !matches!(ty, Ty::Object) {
            self.il.emit(Instr::UnboxAny(ty.clone()));
        }
    }
}
