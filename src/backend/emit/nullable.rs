//! Lifted-operator building blocks.
//!
//! Operators on optional scalars evaluate their operands into temporaries first, then test each optional operand's
//! has-value flag and run the plain operator on the unwrapped values only when every flag is set:
//!
//! ```text
//!     ldloc a; opt.has_value; brfalse absent      (for each optional operand)
//!     <op on unwrapped values>; opt.wrap
//!     br done
//! absent:
//!     lddefault T?                                (or the comparison's fallback)
//! done:
//! ```
//!
//! ## Notes
//!
//! - Equality is never lifted this way: two absent operands compare equal (see [`EmitContext::emit_lifted_equality`]).
//! - Ordering comparisons on absent operands yield `false`, or an absent `bool?` when the node is typed `bool?` and
//!   three-valued comparisons are enabled.

use exprc_core::{ArithOp, BitOp, NumKind};
use exprc_vm::{CmpOp, Instr, Intrinsic, MethodRef, Ty};

use crate::backend::context::EmitContext;
use crate::backend::errors::CompileError;
use crate::ir::BinaryOp;

/// An operand already evaluated into a temporary.
#[derive(Debug, Clone)]
pub(crate) struct Operand {
    pub slot: u16,
    pub ty: Ty,
}

impl Operand {
    pub fn new(slot: u16, ty: &Ty) -> Self {
        Self { slot, ty: ty.clone() }
    }
}

impl<'c> EmitContext<'c> {
    /// Push the operand with any optional wrapper removed (absent becomes the zero value).
    pub(crate) fn load_unwrapped(&mut self, operand: &Operand) {
        self.il.emit(Instr::LdLoc(operand.slot));
        if let Some(inner) = operand.ty.nullable_inner() {
            self.il.emit(Instr::OptGetValueOrDefault(inner.clone()));
        }
    }

    /// Run `body` on present operands; otherwise produce what `absent` pushes.
    pub(crate) fn emit_lifted(
        &mut self,
        operands: &[&Operand],
        wrap: bool,
        absent: impl FnOnce(&mut Self),
        body: impl FnOnce(&mut Self) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        let missing = self.il.define_label();
        let done = self.il.define_label();
        for operand in operands.iter().filter(|o| o.ty.is_nullable()) {
            self.il.emit(Instr::LdLoc(operand.slot));
            self.il.emit(Instr::OptHasValue);
            self.il.emit(Instr::BrFalse(missing));
        }
        body(self)?;
        if wrap {
            self.il.emit(Instr::OptWrap);
        }
        self.il.emit(Instr::Br(done));
        self.mark(missing)?;
        absent(self);
        self.mark(done)?;
        Ok(())
    }

    /// Emit `op` on two operands held in temporaries, leaving a value of `result` on the stack.
    pub(crate) fn emit_binary_slots(
        &mut self,
        op: BinaryOp,
        checked: bool,
        method: Option<&MethodRef>,
        left: &Operand,
        right: &Operand,
        result: &Ty,
    ) -> Result<(), CompileError> {
        let lifted = left.ty.is_nullable() || right.ty.is_nullable();
        if let Some(method) = method {
            return self.emit_operator_call(method, left, right, result);
        }
        if !lifted {
            self.il.emit(Instr::LdLoc(left.slot));
            self.il.emit(Instr::LdLoc(right.slot));
            return self.emit_raw_binary(op, checked, &left.ty);
        }
        if op.is_equality() {
            return self.emit_lifted_equality(op, left, right, result);
        }
        let operand_ty = left.ty.underlying().clone();
        if op.is_comparison() {
            let propagate = result.is_nullable() && self.options().three_valued_comparisons;
            let wrap = result.is_nullable();
            let result_ty = result.clone();
            return self.emit_lifted(
                &[left, right],
                wrap,
                |ctx| {
                    if propagate {
                        ctx.il.emit(Instr::LdDefault(result_ty));
                    } else {
                        ctx.il.emit(Instr::Ldc(exprc_vm::Const::Bool(false)));
                        if wrap {
                            ctx.il.emit(Instr::OptWrap);
                        }
                    }
                },
                |ctx| {
                    ctx.load_unwrapped(left);
                    ctx.load_unwrapped(right);
                    ctx.emit_raw_binary(op, checked, &operand_ty)
                },
            );
        }
        if !result.is_nullable() {
            return Err(CompileError::mismatch(
                "lifted operator",
                format!("{}?", self.ty_name(result)),
                self.ty_name(result),
            ));
        }
        let result_ty = result.clone();
        self.emit_lifted(
            &[left, right],
            true,
            |ctx| ctx.il.emit(Instr::LdDefault(result_ty)),
            |ctx| {
                ctx.load_unwrapped(left);
                ctx.load_unwrapped(right);
                ctx.emit_raw_binary(op, checked, &operand_ty)
            },
        )
    }

    /// Equality on optionals: the has-value flags must agree, and values are compared only when both are present.
    pub(crate) fn emit_lifted_equality(
        &mut self,
        op: BinaryOp,
        left: &Operand,
        right: &Operand,
        result: &Ty,
    ) -> Result<(), CompileError> {
        let differ = self.il.define_label();
        let both_absent = self.il.define_label();
        let done = self.il.define_label();
        self.emit_has_value(left);
        self.emit_has_value(right);
        self.il.emit(Instr::Cmp(CmpOp::Ne));
        self.il.emit(Instr::BrTrue(differ));
        self.emit_has_value(left);
        self.il.emit(Instr::BrFalse(both_absent));
        self.load_unwrapped(left);
        self.load_unwrapped(right);
        self.il.emit(Instr::Cmp(if op == BinaryOp::Eq { CmpOp::Eq } else { CmpOp::Ne }));
        self.il.emit(Instr::Br(done));
        self.mark(both_absent)?;
        self.il.emit(Instr::Ldc(exprc_vm::Const::Bool(op == BinaryOp::Eq)));
        self.il.emit(Instr::Br(done));
        self.mark(differ)?;
        self.il.emit(Instr::Ldc(exprc_vm::Const::Bool(op == BinaryOp::Ne)));
        self.mark(done)?;
        if result.is_nullable() {
            self.il.emit(Instr::OptWrap);
        }
        Ok(())
    }

    /// Push the has-value flag of an operand; non-optional operands are always present.
    fn emit_has_value(&mut self, operand: &Operand) {
        if operand.ty.is_nullable() {
            self.il.emit(Instr::LdLoc(operand.slot));
            self.il.emit(Instr::OptHasValue);
        } else {
            self.il.emit(Instr::Ldc(exprc_vm::Const::Bool(true)));
        }
    }

    /// User-defined operator method; lifted when the operands are optional and the method is not.
    fn emit_operator_call(
        &mut self,
        method: &MethodRef,
        left: &Operand,
        right: &Operand,
        result: &Ty,
    ) -> Result<(), CompileError> {
        let sig = self.registry().signature(method)?;
        let arity = sig.params.len() + usize::from(sig.this.is_some());
        if arity != 2 {
            return Err(CompileError::ArgumentCount {
                what: self.registry().method_name(method),
                expected: arity,
                found: 2,
            });
        }
        let takes_optional = sig.params.iter().any(|(t, _)| t.is_nullable());
        let lifted = (left.ty.is_nullable() || right.ty.is_nullable()) && !takes_optional;
        if !lifted {
            self.il.emit(Instr::LdLoc(left.slot));
            self.il.emit(Instr::LdLoc(right.slot));
            self.il.emit(Instr::Call(method.clone()));
            return Ok(());
        }
        let wrap = result.is_nullable() && !sig.ret.is_nullable();
        let result_ty = result.clone();
        let method = method.clone();
        self.emit_lifted(
            &[left, right],
            wrap,
            |ctx| ctx.emit_default(&result_ty),
            |ctx| {
                ctx.load_unwrapped(left);
                ctx.load_unwrapped(right);
                ctx.il.emit(Instr::Call(method));
                Ok(())
            },
        )
    }

    /// The plain instruction for `op` on two operands of `operand_ty` already on the stack.
    pub(crate) fn emit_raw_binary(&mut self, op: BinaryOp, checked: bool, operand_ty: &Ty) -> Result<(), CompileError> {
        let is_str = matches!(operand_ty.underlying(), Ty::Str);
        let instr = match op {
            BinaryOp::Add if is_str => Instr::Call(MethodRef::Intrinsic(Intrinsic::StrConcat)),
            BinaryOp::Add => Instr::Arith {
                op: ArithOp::Add,
                checked,
            },
            BinaryOp::Sub => Instr::Arith {
                op: ArithOp::Sub,
                checked,
            },
            BinaryOp::Mul => Instr::Arith {
                op: ArithOp::Mul,
                checked,
            },
            BinaryOp::Div => Instr::Arith {
                op: ArithOp::Div,
                checked: false,
            },
            BinaryOp::Rem => Instr::Arith {
                op: ArithOp::Rem,
                checked: false,
            },
            BinaryOp::And => Instr::Bitwise(BitOp::And),
            BinaryOp::Or => Instr::Bitwise(BitOp::Or),
            BinaryOp::Xor => Instr::Bitwise(BitOp::Xor),
            BinaryOp::Shl => Instr::Bitwise(BitOp::Shl),
            BinaryOp::Shr => Instr::Bitwise(BitOp::Shr),
            BinaryOp::Eq => Instr::Cmp(CmpOp::Eq),
            BinaryOp::Ne => Instr::Cmp(CmpOp::Ne),
            BinaryOp::Lt => Instr::Cmp(CmpOp::Lt),
            BinaryOp::Le => Instr::Cmp(CmpOp::Le),
            BinaryOp::Gt => Instr::Cmp(CmpOp::Gt),
            BinaryOp::Ge => Instr::Cmp(CmpOp::Ge),
        };
        self.il.emit(instr);
        Ok(())
    }

    /// Push the constant one of a numeric kind.
    pub(crate) fn emit_one(&mut self, kind: NumKind) {
        self.il.emit(Instr::Ldc(exprc_vm::Const::Num(exprc_core::Num::one(kind))));
    }
}
