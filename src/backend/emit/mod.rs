//! Emit stack-machine code from expression trees.
//!
//! [`EmitContext::emit`] is the single entry point: it dispatches on the node kind to the focused emitters in
//! [`expressions`] and then adapts what the emitter produced to the [`ResultShape`] the caller asked for.
//!
//! ## Notes
//!
//! - Every emitter receives the current null-propagation exit (if any) and reports whether it branched to it. Nodes
//!   that open a new short-circuit scope (block statements, conditional tests, coalesce operands, protected blocks)
//!   establish their own landing pad and never report their children's exits upward.
//! - `extend` asks the emitter to materialize a missing value in place (auto-extension); it is only honored for
//!   assignable nodes of class, array or list type.
//!
//! ## See also
//! - [`crate::backend::context`]: locals, labels and landing pads
//! - [`nullable`]: lifted-operator building blocks

mod expressions;
mod nullable;

use exprc_vm::{Instr, Label, Ty};

use super::context::EmitContext;
use super::errors::CompileError;
use crate::ir::{Expr, ExprKind, Literal, Member};

/// What the caller needs on the stack after a node is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResultShape {
    /// Nothing; any value is discarded.
    Void,
    Value,
    /// A managed address of the value (spilled to a temporary when the node is not addressable).
    Address,
    /// An address for value types, the value itself for reference types (method receivers).
    ValueTypeAddress,
}

impl ResultShape {
    pub fn wants_address(self, ty: &Ty) -> bool {
        match self {
            ResultShape::Address => true,
            ResultShape::ValueTypeAddress => ty.is_value_type(),
            ResultShape::Void | ResultShape::Value => false,
        }
    }
}

/// What an emitter left on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Form {
    Nothing,
    Value,
    Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Emitted {
    /// Whether some check branched to the exit passed in.
    pub used_exit: bool,
    pub form: Form,
}

impl Emitted {
    pub fn of(ty: &Ty, used_exit: bool) -> Self {
        Self {
            used_exit,
            form: if ty.is_void() { Form::Nothing } else { Form::Value },
        }
    }

    pub fn nothing(used_exit: bool) -> Self {
        Self {
            used_exit,
            form: Form::Nothing,
        }
    }

    pub fn address(used_exit: bool) -> Self {
        Self {
            used_exit,
            form: Form::Address,
        }
    }
}

impl<'c> EmitContext<'c> {
    /// Emit `expr` and adapt the result to `shape`.
    pub(crate) fn emit(
        &mut self,
        expr: &Expr,
        exit: Option<Label>,
        shape: ResultShape,
        extend: bool,
    ) -> Result<Emitted, CompileError> {
        if extend && is_place(expr) && is_materializable(&expr.ty) {
            let used = self.emit_materialized(expr, exit)?;
            return Ok(self.adapt(&expr.ty, Emitted::of(&expr.ty, used), shape));
        }
        let emitted = match &expr.kind {
            ExprKind::Constant(lit) => self.emit_constant(expr, lit)?,
            ExprKind::Default => {
                self.emit_default(&expr.ty);
                Emitted::of(&expr.ty, false)
            }
            ExprKind::Parameter(id) => self.emit_parameter(*id, shape)?,
            ExprKind::Hoisted(index) => self.emit_hoisted(*index, &expr.ty)?,
            ExprKind::ClosureVar(index) => self.emit_closure_var(*index, &expr.ty)?,
            ExprKind::Member { receiver, member } => self.emit_member(expr, receiver.as_deref(), member, exit, shape)?,
            ExprKind::Index { .. } => self.emit_index(expr, exit, shape)?,
            ExprKind::Unary {
                op,
                operand,
                checked,
                method,
            } => self.emit_unary(expr, *op, operand, *checked, method.as_ref(), exit)?,
            ExprKind::Binary {
                op,
                left,
                right,
                checked,
                method,
            } => self.emit_binary(expr, *op, left, right, *checked, method.as_ref(), exit)?,
            ExprKind::Logical { op, left, right } => self.emit_logical(expr, *op, left, right, exit)?,
            ExprKind::Coalesce { left, right } => self.emit_coalesce(expr, left, right, exit)?,
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            } => self.emit_conditional(expr, test, if_true, if_false, exit, shape)?,
            ExprKind::Block { variables, body } => self.emit_block(expr, variables, body, exit, shape)?,
            ExprKind::Loop {
                body,
                break_label,
                continue_label,
            } => self.emit_loop(expr, body, break_label.as_ref(), continue_label.as_ref(), exit)?,
            ExprKind::Switch {
                value,
                cases,
                default,
                comparison,
            } => self.emit_switch(expr, value, cases, default.as_deref(), comparison.as_ref(), exit)?,
            ExprKind::Try {
                body,
                handlers,
                finally,
                fault,
            } => self.emit_try(expr, body, handlers, finally.as_deref(), fault.as_deref())?,
            ExprKind::Call {
                method,
                receiver,
                args,
            } => self.emit_call(expr, method, receiver.as_deref(), args, exit)?,
            ExprKind::Invoke { func, args } => self.emit_invoke(expr, func, args, exit)?,
            ExprKind::New { ctor, args } => self.emit_new(expr, ctor.as_ref(), args, exit)?,
            ExprKind::NewArray { elem, init } => self.emit_new_array(expr, elem, init, exit)?,
            ExprKind::ListInit { new, items } => self.emit_list_init(new, items, exit)?,
            ExprKind::MemberInit { new, bindings } => self.emit_member_init(new, bindings, exit)?,
            ExprKind::Lambda(lambda) => self.emit_lambda(lambda)?,
            ExprKind::Assign {
                op,
                target,
                value,
                checked,
                auto_extend,
            } => self.emit_assign(*op, target, value.as_deref(), *checked, *auto_extend, exit, shape)?,
            ExprKind::TypeTest {
                operand,
                target,
                exact,
            } => self.emit_type_test(operand, target, *exact, exit)?,
            ExprKind::Convert {
                operand,
                checked,
                method,
            } => self.emit_convert(expr, operand, *checked, method.as_ref(), exit)?,
            ExprKind::TypeAs { operand } => self.emit_type_as(expr, operand, exit)?,
            ExprKind::Throw { operand } => self.emit_throw(operand.as_deref())?,
            ExprKind::Goto { target, value, .. } => self.emit_goto(target, value.as_deref())?,
            ExprKind::Label { target, default } => self.emit_label(target, default.as_deref())?,
        };
        Ok(self.adapt(&expr.ty, emitted, shape))
    }

    /// Emit `expr` as a value.
    pub(crate) fn emit_value(&mut self, expr: &Expr, exit: Option<Label>) -> Result<bool, CompileError> {
        Ok(self.emit(expr, exit, ResultShape::Value, false)?.used_exit)
    }

    /// Emit `expr` for its side effects only.
    pub(crate) fn emit_void(&mut self, expr: &Expr, exit: Option<Label>) -> Result<bool, CompileError> {
        Ok(self.emit(expr, exit, ResultShape::Void, false)?.used_exit)
    }

    /// Emit a member receiver, branching to `exit` when it is null and null checks are on. `extend` materializes a
    /// missing receiver instead (reads extend too when auto-extension of reads is enabled).
    pub(crate) fn emit_receiver(
        &mut self,
        receiver: &Expr,
        exit: Option<Label>,
        shape: ResultShape,
        extend: bool,
    ) -> Result<Emitted, CompileError> {
        let extend = extend || self.options().auto_extend_read;
        let emitted = self.emit(receiver, exit, shape, extend)?;
        let materialized = extend && is_place(receiver) && is_materializable(&receiver.ty);
        let mut used = emitted.used_exit;
        if emitted.form == Form::Value && !materialized && receiver.ty.is_reference() && may_be_null(receiver) {
            used |= self.null_check(exit);
        }
        Ok(Emitted {
            used_exit: used,
            form: emitted.form,
        })
    }

    fn adapt(&mut self, ty: &Ty, emitted: Emitted, shape: ResultShape) -> Emitted {
        let form = match (emitted.form, shape) {
            (Form::Nothing, _) => Form::Nothing,
            (Form::Value | Form::Address, ResultShape::Void) => {
                self.il.emit(Instr::Pop);
                Form::Nothing
            }
            (Form::Value, s) if s.wants_address(ty) => {
                let slot = self.spill(ty);
                self.il.emit(Instr::LdLocA(slot));
                Form::Address
            }
            (Form::Address, s) if !s.wants_address(ty) => {
                self.il.emit(Instr::LdInd);
                Form::Value
            }
            (form, _) => form,
        };
        Emitted {
            used_exit: emitted.used_exit,
            form,
        }
    }
}

/// Nodes that name a storage location.
pub(crate) fn is_place(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Parameter(_) | ExprKind::ClosureVar(_) | ExprKind::Index { .. } => true,
        ExprKind::Member { member, .. } => matches!(member, Member::Field(_) | Member::Property(_)),
        _ => false,
    }
}

/// Types auto-extension knows how to create.
pub(crate) fn is_materializable(ty: &Ty) -> bool {
    matches!(ty, Ty::Class(_) | Ty::Array(_) | Ty::List(_))
}

/// Whether the value of `expr` can be null at runtime.
pub(crate) fn may_be_null(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::New { .. }
        | ExprKind::NewArray { .. }
        | ExprKind::ListInit { .. }
        | ExprKind::MemberInit { .. }
        | ExprKind::Lambda(_) => false,
        ExprKind::Constant(lit) => matches!(lit, Literal::Null),
        _ => expr.ty.can_be_absent(),
    }
}
