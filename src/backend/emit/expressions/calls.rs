//! Calls, function-value invocation and construction (objects, arrays, collection and member initializers).
//!
//! ## Notes
//!
//! - Evaluation order is receiver first, then arguments left to right.
//! - Value-type receivers of instance calls are passed by address so mutating methods act in place.
//! - Reference receivers of instance calls are null-checked; extension methods take their receiver as the first
//!   argument of a static call and are not.
//! - By-reference arguments are emitted as addresses and bypass null propagation and auto-extension.

use exprc_vm::{Instr, Label, MethodKind, MethodRef, Ty};

use super::super::{Emitted, ResultShape};
use crate::backend::context::EmitContext;
use crate::backend::errors::CompileError;
use crate::ir::{ArrayInit, Binding, ElementInit, Expr, MemberTarget};

impl<'c> EmitContext<'c> {
    pub(crate) fn emit_call(
        &mut self,
        expr: &Expr,
        method: &MethodRef,
        receiver: Option<&Expr>,
        args: &[Expr],
        exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        let sig = self.registry().signature(method)?;
        let kind = match method {
            MethodRef::Method { ty, index } => self.registry().method(*ty, *index)?.kind,
            MethodRef::Intrinsic(_) if sig.this.is_some() => MethodKind::Instance,
            MethodRef::Intrinsic(_) => MethodKind::Static,
        };
        let name = self.registry().method_name(method);

        let mut used = false;
        let mut all_args: Vec<&Expr> = Vec::with_capacity(args.len() + 1);
        match (kind, receiver) {
            (MethodKind::Instance, Some(receiver)) => {
                used |= self.emit_receiver(receiver, exit, ResultShape::ValueTypeAddress, false)?.used_exit;
            }
            (MethodKind::Instance, None) => {
                return Err(CompileError::unsupported(format!("instance call to {} without a receiver", name)));
            }
            (MethodKind::Extension, Some(receiver)) => all_args.push(receiver),
            (MethodKind::Ctor, _) => {
                return Err(CompileError::unsupported(format!("direct call to constructor {}", name)));
            }
            (_, Some(_)) => {
                return Err(CompileError::unsupported(format!("static method {} called with a receiver", name)));
            }
            (_, None) => {}
        }
        all_args.extend(args.iter());
        used |= self.emit_arguments(&name, &sig.params, &all_args, exit)?;
        self.il.emit(Instr::Call(method.clone()));
        Ok(self.call_result(&sig.ret, &expr.ty, used))
    }

    /// Map a call's return value to what the node produces.
    fn call_result(&mut self, ret: &Ty, node: &Ty, used: bool) -> Emitted {
        if ret.is_void() {
            return Emitted::nothing(used);
        }
        if node.is_void() {
            self.il.emit(Instr::Pop);
            return Emitted::nothing(used);
        }
        Emitted::of(node, used)
    }

    /// Emit call arguments against `(type, by_ref)` parameters.
    pub(crate) fn emit_arguments(
        &mut self,
        what: &str,
        params: &[(Ty, bool)],
        args: &[&Expr],
        exit: Option<Label>,
    ) -> Result<bool, CompileError> {
        if params.len() != args.len() {
            return Err(CompileError::ArgumentCount {
                what: what.to_string(),
                expected: params.len(),
                found: args.len(),
            });
        }
        let mut used = false;
        for (arg, (ty, by_ref)) in args.iter().zip(params) {
            if *by_ref {
                if arg.ty != *ty {
                    return Err(CompileError::mismatch(
                        format!("by-reference argument of {}", what),
                        self.ty_name(ty),
                        self.ty_name(&arg.ty),
                    ));
                }
                self.emit(arg, None, ResultShape::Address, false)?;
            } else {
                used |= self.emit_value(arg, exit)?;
                self.coerce(&arg.ty, ty, what)?;
            }
        }
        Ok(used)
    }

    /// Convert the value on the stack from `from` to a slot of type `to` without a user conversion.
    pub(crate) fn coerce(&mut self, from: &Ty, to: &Ty, context: &str) -> Result<(), CompileError> {
        if from == to {
            return Ok(());
        }
        if to.is_nullable() && to.underlying() == from {
            self.il.emit(Instr::OptWrap);
            return Ok(());
        }
        if self.registry().is_assignable(from, to) {
            if matches!(to, Ty::Object) && from.is_value_type() {
                self.il.emit(Instr::Box(from.clone()));
            }
            return Ok(());
        }
        Err(CompileError::mismatch(context, self.ty_name(to), self.ty_name(from)))
    }

    pub(crate) fn emit_invoke(
        &mut self,
        expr: &Expr,
        func: &Expr,
        args: &[Expr],
        exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        let Ty::Func { params, ret } = &func.ty else {
            return Err(CompileError::mismatch("invoke", "a function value", self.ty_name(&func.ty)));
        };
        let mut used = self.emit_receiver(func, exit, ResultShape::Value, false)?.used_exit;
        let params: Vec<(Ty, bool)> = params.iter().map(|p| (p.clone(), false)).collect();
        let args: Vec<&Expr> = args.iter().collect();
        used |= self.emit_arguments("function value", &params, &args, exit)?;
        self.il.emit(Instr::CallInvoker { argc: args.len() as u16 });
        Ok(self.call_result(ret, &expr.ty, used))
    }

    pub(crate) fn emit_new(
        &mut self,
        expr: &Expr,
        ctor: Option<&MethodRef>,
        args: &[Expr],
        exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        if let Some(ctor) = ctor {
            let sig = self.registry().signature(ctor)?;
            let name = self.registry().method_name(ctor);
            let args: Vec<&Expr> = args.iter().collect();
            let used = self.emit_arguments(&name, &sig.params, &args, exit)?;
            self.il.emit(Instr::NewObj(ctor.clone()));
            return Ok(Emitted::of(&expr.ty, used));
        }
        if !args.is_empty() {
            return Err(CompileError::ArgumentCount {
                what: format!("new {}", self.ty_name(&expr.ty)),
                expected: 0,
                found: args.len(),
            });
        }
        match &expr.ty {
            Ty::Struct(_) => {
                self.scoped(|ctx| {
                    let slot = ctx.temp(&expr.ty);
                    ctx.il.emit(Instr::LdLocA(slot));
                    ctx.il.emit(Instr::InitObj(expr.ty.clone()));
                    ctx.il.emit(Instr::LdLoc(slot));
                    Ok(())
                })?;
            }
            Ty::Class(id) => {
                let ctor = self.registry().default_ctor(*id).ok_or_else(|| {
                    CompileError::unsupported(format!("{} has no parameterless constructor", self.ty_name(&expr.ty)))
                })?;
                self.il.emit(Instr::NewObj(ctor));
            }
            Ty::List(elem) => self.il.emit(Instr::NewList((**elem).clone())),
            other => {
                return Err(CompileError::unsupported(format!("construction of {}", self.ty_name(other))));
            }
        }
        Ok(Emitted::of(&expr.ty, false))
    }

    pub(crate) fn emit_new_array(
        &mut self,
        expr: &Expr,
        elem: &Ty,
        init: &ArrayInit,
        exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        let mut used = false;
        match init {
            ArrayInit::Elements(items) => {
                self.emit_i32(items.len() as i32);
                self.il.emit(Instr::NewArr(elem.clone()));
                for (i, item) in items.iter().enumerate() {
                    self.il.emit(Instr::Dup);
                    self.emit_i32(i as i32);
                    used |= self.emit_value(item, exit)?;
                    self.coerce(&item.ty, elem, "array element")?;
                    self.il.emit(Instr::StElem);
                }
            }
            ArrayInit::Bounds(bounds) => {
                if bounds.is_empty() {
                    return Err(CompileError::ArgumentCount {
                        what: "array bounds".to_string(),
                        expected: 1,
                        found: 0,
                    });
                }
                for bound in bounds {
                    used |= self.emit_index_operand(bound, exit)?;
                }
                if bounds.len() == 1 {
                    self.il.emit(Instr::NewArr(elem.clone()));
                } else {
                    self.il.emit(Instr::NewMdArr {
                        elem: elem.clone(),
                        rank: bounds.len() as u32,
                    });
                }
            }
        }
        Ok(Emitted::of(&expr.ty, used))
    }

    pub(crate) fn emit_list_init(
        &mut self,
        new: &Expr,
        items: &[ElementInit],
        exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        let mut used = self.emit_value(new, exit)?;
        used |= self.emit_element_inits(items, exit)?;
        Ok(Emitted::of(&new.ty, used))
    }

    /// Call each `add` on the collection on top of the stack, leaving it there.
    fn emit_element_inits(&mut self, items: &[ElementInit], exit: Option<Label>) -> Result<bool, CompileError> {
        let mut used = false;
        for item in items {
            let sig = self.registry().signature(&item.add)?;
            let name = self.registry().method_name(&item.add);
            self.il.emit(Instr::Dup);
            let args: Vec<&Expr> = item.args.iter().collect();
            used |= self.emit_arguments(&name, &sig.params, &args, exit)?;
            self.il.emit(Instr::Call(item.add.clone()));
            if !sig.ret.is_void() {
                self.il.emit(Instr::Pop);
            }
        }
        Ok(used)
    }

    pub(crate) fn emit_member_init(
        &mut self,
        new: &Expr,
        bindings: &[Binding],
        exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        if new.ty.is_value_type() {
            return self.scoped(|ctx| {
                let mut used = ctx.emit_value(new, exit)?;
                let slot = ctx.spill(&new.ty);
                for binding in bindings {
                    ctx.il.emit(Instr::LdLocA(slot));
                    used |= ctx.emit_binding(binding, exit)?;
                }
                ctx.il.emit(Instr::LdLoc(slot));
                Ok(Emitted::of(&new.ty, used))
            });
        }
        let mut used = self.emit_value(new, exit)?;
        for binding in bindings {
            self.il.emit(Instr::Dup);
            used |= self.emit_binding(binding, exit)?;
        }
        Ok(Emitted::of(&new.ty, used))
    }

    /// Apply a binding to the object (or struct address) on top of the stack, consuming it.
    fn emit_binding(&mut self, binding: &Binding, exit: Option<Label>) -> Result<bool, CompileError> {
        match binding {
            Binding::Assign { member, value } => {
                let used = self.emit_value(value, exit)?;
                match member {
                    MemberTarget::Field(field) => {
                        let def = self.registry().field(*field)?;
                        self.coerce(&value.ty, &def.ty, &def.name)?;
                        self.il.emit(Instr::StFld(*field));
                    }
                    MemberTarget::Property(prop) => {
                        let def = self.registry().property(*prop)?;
                        self.coerce(&value.ty, &def.ty, &def.name)?;
                        let setter = self.accessor(*prop, true)?;
                        self.il.emit(Instr::Call(setter));
                    }
                }
                Ok(used)
            }
            Binding::Member { member, bindings } => {
                self.load_binding_member(member)?;
                let mut used = false;
                for nested in bindings {
                    self.il.emit(Instr::Dup);
                    used |= self.emit_binding(nested, exit)?;
                }
                self.il.emit(Instr::Pop);
                Ok(used)
            }
            Binding::List { member, items } => {
                self.load_binding_member(member)?;
                let used = self.emit_element_inits(items, exit)?;
                self.il.emit(Instr::Pop);
                Ok(used)
            }
        }
    }

    /// Replace the receiver on the stack with the member it holds (by address for struct fields).
    fn load_binding_member(&mut self, member: &MemberTarget) -> Result<(), CompileError> {
        match member {
            MemberTarget::Field(field) => {
                let def = self.registry().field(*field)?;
                if def.ty.is_value_type() {
                    self.il.emit(Instr::LdFldA(*field));
                } else {
                    self.il.emit(Instr::LdFld(*field));
                }
            }
            MemberTarget::Property(prop) => {
                let def = self.registry().property(*prop)?;
                if def.ty.is_value_type() {
                    return Err(CompileError::unsupported(format!(
                        "member bindings on value-type property {}",
                        def.name
                    )));
                }
                let getter = self.accessor(*prop, false)?;
                self.il.emit(Instr::Call(getter));
            }
        }
        Ok(())
    }
}
