//! Storage locations: preparing, loading, storing and auto-extending assignable nodes.
//!
//! A [`Place`] is an assignable node whose receiver and index operands have been evaluated once into temporaries, so
//! it can be loaded and stored any number of times (compound assignment reads and writes the same location).
//!
//! ## Notes
//!
//! - Supported targets: variables and parameters, instance and static fields, instance and static properties,
//!   array and list elements, multi-dimensional array elements, indexed properties, and closure variables.
//! - With `extend`, receivers are created when missing, arrays are grown through the shared `EnsureArrayLength`
//!   helper and written back to their own location, and lists are padded through `EnsureListCount`.

use exprc_vm::{CmpOp, FieldRef, Instr, Intrinsic, Label, MethodRef, PropertyRef, Ty};

use super::super::{Form, ResultShape, is_materializable, is_place};
use crate::backend::context::{EmitContext, Slot};
use crate::backend::errors::CompileError;
use crate::backend::helpers::HelperKind;
use crate::ir::{Expr, ExprKind, Member};

#[derive(Debug, Clone)]
pub(crate) enum PlaceKind {
    Var(Slot),
    Field(FieldRef),
    StaticField(FieldRef),
    Property { prop: PropertyRef, is_static: bool },
    ArrayElem,
    ListElem(Ty),
    MdElem { elem: Ty, rank: u32 },
    Closure(u32),
}

#[derive(Debug, Clone)]
pub(crate) struct Place {
    pub kind: PlaceKind,
    /// Temporary holding the receiver (object, struct address, array or list).
    pub receiver: Option<u16>,
    /// Temporaries holding the index operands.
    pub indices: Vec<u16>,
    pub ty: Ty,
}

impl Place {
    fn simple(kind: PlaceKind, ty: Ty) -> Self {
        Self {
            kind,
            receiver: None,
            indices: Vec::new(),
            ty,
        }
    }
}

impl<'c> EmitContext<'c> {
    /// Evaluate the receiver and index operands of `target` into temporaries.
    pub(crate) fn prepare_place(
        &mut self,
        target: &Expr,
        exit: Option<Label>,
        extend: bool,
    ) -> Result<(Place, bool), CompileError> {
        let ty = target.ty.clone();
        match &target.kind {
            ExprKind::Parameter(id) => {
                let (slot, _) = self.var_slot(*id)?;
                Ok((Place::simple(PlaceKind::Var(slot), ty), false))
            }
            ExprKind::ClosureVar(index) => {
                self.closure_table()?;
                Ok((Place::simple(PlaceKind::Closure(*index), ty), false))
            }
            ExprKind::Member {
                receiver,
                member: Member::Field(field),
            } => {
                if self.registry().field(*field)?.is_static {
                    return Ok((Place::simple(PlaceKind::StaticField(*field), ty), false));
                }
                let receiver = self.instance_receiver(receiver.as_deref(), "field")?;
                let (slot, used) = self.spill_receiver(receiver, exit, extend)?;
                let mut place = Place::simple(PlaceKind::Field(*field), ty);
                place.receiver = Some(slot);
                Ok((place, used))
            }
            ExprKind::Member {
                receiver,
                member: Member::Property(prop),
            } => {
                let def = self.registry().property(*prop)?;
                if !def.index_params.is_empty() {
                    return Err(CompileError::ArgumentCount {
                        what: def.name.clone(),
                        expected: def.index_params.len(),
                        found: 0,
                    });
                }
                let is_static = def.is_static;
                let mut place = Place::simple(PlaceKind::Property { prop: *prop, is_static }, ty);
                let mut used = false;
                if !is_static {
                    let receiver = self.instance_receiver(receiver.as_deref(), "property")?;
                    let (slot, u) = self.spill_receiver(receiver, exit, extend)?;
                    place.receiver = Some(slot);
                    used = u;
                }
                Ok((place, used))
            }
            ExprKind::Index {
                receiver,
                args,
                indexer: Some(prop),
            } => {
                let def = self.registry().property(*prop)?;
                if def.index_params.len() != args.len() {
                    return Err(CompileError::ArgumentCount {
                        what: def.name.clone(),
                        expected: def.index_params.len(),
                        found: args.len(),
                    });
                }
                let is_static = def.is_static;
                let mut used = false;
                let mut place = Place::simple(PlaceKind::Property { prop: *prop, is_static }, ty);
                if !is_static {
                    let (slot, u) = self.spill_receiver(receiver, exit, extend)?;
                    place.receiver = Some(slot);
                    used = u;
                }
                for arg in args {
                    used |= self.emit_value(arg, exit)?;
                    place.indices.push(self.spill(&arg.ty));
                }
                Ok((place, used))
            }
            ExprKind::Index {
                receiver,
                args,
                indexer: None,
            } => self.prepare_element(target, receiver, args, exit, extend),
            other => Err(CompileError::NotAssignable { kind: other.name() }),
        }
    }

    fn instance_receiver<'e>(&self, receiver: Option<&'e Expr>, what: &str) -> Result<&'e Expr, CompileError> {
        receiver.ok_or_else(|| CompileError::unsupported(format!("instance {} access without a receiver", what)))
    }

    /// Emit a receiver (by address for value types) and keep it in a temporary.
    fn spill_receiver(&mut self, receiver: &Expr, exit: Option<Label>, extend: bool) -> Result<(u16, bool), CompileError> {
        let emitted = self.emit_receiver(receiver, exit, ResultShape::ValueTypeAddress, extend)?;
        let slot_ty = match emitted.form {
            Form::Address => Ty::by_ref(receiver.ty.clone()),
            _ => receiver.ty.clone(),
        };
        Ok((self.spill(&slot_ty), emitted.used_exit))
    }

    /// Emit an index operand converted to `int`.
    pub(crate) fn emit_index_operand(&mut self, arg: &Expr, exit: Option<Label>) -> Result<bool, CompileError> {
        let used = self.emit_value(arg, exit)?;
        match &arg.ty {
            Ty::Num(kind) if kind.is_integral() => {
                if *kind != exprc_core::NumKind::I32 {
                    self.il.emit(Instr::Conv {
                        to: exprc_core::NumKind::I32,
                        checked: true,
                    });
                }
                Ok(used)
            }
            other => Err(CompileError::mismatch("index", "an integral type", self.ty_name(other))),
        }
    }

    fn prepare_element(
        &mut self,
        target: &Expr,
        receiver: &Expr,
        args: &[Expr],
        exit: Option<Label>,
        extend: bool,
    ) -> Result<(Place, bool), CompileError> {
        let ty = target.ty.clone();
        let (kind, rank) = match &receiver.ty {
            Ty::Array(_) => (PlaceKind::ArrayElem, 1),
            Ty::List(elem) => (PlaceKind::ListElem((**elem).clone()), 1),
            Ty::MdArray { elem, rank } => (
                PlaceKind::MdElem {
                    elem: (**elem).clone(),
                    rank: *rank,
                },
                *rank as usize,
            ),
            other => {
                return Err(CompileError::mismatch(
                    "element access",
                    "an array or list",
                    self.ty_name(other),
                ));
            }
        };
        if args.len() != rank {
            return Err(CompileError::ArgumentCount {
                what: format!("{} indexer", self.ty_name(&receiver.ty)),
                expected: rank,
                found: args.len(),
            });
        }

        let grow = extend && is_place(receiver) && !matches!(kind, PlaceKind::MdElem { .. });
        let mut used = false;
        let container = if grow {
            // The container is itself a location: create or resize it there.
            let (outer, u) = self.prepare_place(receiver, exit, true)?;
            used |= u;
            let index = {
                used |= self.emit_index_operand(&args[0], exit)?;
                self.spill(&Ty::I32)
            };
            let container = self.materialize_place(&outer)?;
            if let PlaceKind::ArrayElem = kind {
                let elem = receiver.ty.element().cloned().unwrap_or(Ty::Object);
                let helper = self.compiler().helpers().get_or_create(HelperKind::EnsureArrayLength, &elem)?;
                let child = self.add_child(helper);
                self.il.emit(Instr::LdLoc(container));
                self.il.emit(Instr::LdLoc(index));
                self.il.emit(Instr::CallChild(child));
                self.il.emit(Instr::StLoc(container));
                self.store_place(&outer, container)?;
            } else if let PlaceKind::ListElem(elem) = &kind {
                let helper = self.compiler().helpers().get_or_create(HelperKind::EnsureListCount, elem)?;
                let child = self.add_child(helper);
                self.il.emit(Instr::LdLoc(container));
                self.il.emit(Instr::LdLoc(index));
                self.emit_i32(1);
                self.il.emit(Instr::Arith {
                    op: exprc_core::ArithOp::Add,
                    checked: true,
                });
                self.il.emit(Instr::CallChild(child));
            }
            Place {
                kind,
                receiver: Some(container),
                indices: vec![index],
                ty,
            }
        } else {
            let emitted = self.emit_receiver(receiver, exit, ResultShape::Value, false)?;
            used |= emitted.used_exit;
            let container = self.spill(&receiver.ty);
            let mut indices = Vec::with_capacity(args.len());
            for arg in args {
                used |= self.emit_index_operand(arg, exit)?;
                indices.push(self.spill(&Ty::I32));
            }
            Place {
                kind,
                receiver: Some(container),
                indices,
                ty,
            }
        };
        used |= self.emit_bounds_check(&container, exit);
        Ok((container, used))
    }

    /// Branch to `exit` when an index of an element place is out of range.
    fn emit_bounds_check(&mut self, place: &Place, exit: Option<Label>) -> bool {
        let Some(exit) = exit else { return false };
        if !self.options().bounds_checks {
            return false;
        }
        let Some(container) = place.receiver else { return false };
        for (dim, index) in place.indices.iter().enumerate() {
            self.il.emit(Instr::LdLoc(*index));
            self.emit_i32(0);
            self.il.emit(Instr::Cmp(CmpOp::Lt));
            self.il.emit(Instr::BrTrue(exit));
            self.il.emit(Instr::LdLoc(*index));
            self.il.emit(Instr::LdLoc(container));
            match &place.kind {
                PlaceKind::ArrayElem => self.il.emit(Instr::LdLen),
                PlaceKind::ListElem(elem) => {
                    self.il.emit(Instr::Call(MethodRef::Intrinsic(Intrinsic::ListCount(elem.clone()))))
                }
                PlaceKind::MdElem { elem, rank } => {
                    self.emit_i32(dim as i32);
                    self.il.emit(Instr::Call(MethodRef::Intrinsic(Intrinsic::MdLength {
                        elem: elem.clone(),
                        rank: *rank,
                    })));
                }
                _ => return false,
            }
            self.il.emit(Instr::Cmp(CmpOp::Lt));
            self.il.emit(Instr::BrFalse(exit));
        }
        true
    }

    /// Push the current value of `place`.
    pub(crate) fn load_place(&mut self, place: &Place) -> Result<(), CompileError> {
        match &place.kind {
            PlaceKind::Var(slot) => self.load(*slot),
            PlaceKind::Closure(index) => {
                let table = self.closure_table()?;
                self.il.emit(Instr::LdArg(table));
                self.emit_i32(*index as i32);
                self.il.emit(Instr::LdElem);
                if !matches!(place.ty, Ty::Object) {
                    self.il.emit(Instr::UnboxAny(place.ty.clone()));
                }
            }
            PlaceKind::Field(field) => {
                self.load_operands(place);
                self.il.emit(Instr::LdFld(*field));
            }
            PlaceKind::StaticField(field) => self.il.emit(Instr::LdSFld(*field)),
            PlaceKind::Property { prop, .. } => {
                let getter = self.accessor(*prop, false)?;
                self.load_operands(place);
                self.il.emit(Instr::Call(getter));
            }
            PlaceKind::ArrayElem => {
                self.load_operands(place);
                self.il.emit(Instr::LdElem);
            }
            PlaceKind::ListElem(elem) => {
                self.load_operands(place);
                self.il.emit(Instr::Call(MethodRef::Intrinsic(Intrinsic::ListGet(elem.clone()))));
            }
            PlaceKind::MdElem { elem, rank } => {
                self.load_operands(place);
                self.il.emit(Instr::Call(MethodRef::Intrinsic(Intrinsic::MdGet {
                    elem: elem.clone(),
                    rank: *rank,
                })));
            }
        }
        Ok(())
    }

    /// Store the value held in local `value` into `place`.
    pub(crate) fn store_place(&mut self, place: &Place, value: u16) -> Result<(), CompileError> {
        match &place.kind {
            PlaceKind::Var(slot) => {
                self.il.emit(Instr::LdLoc(value));
                self.store(*slot);
            }
            PlaceKind::Closure(index) => {
                let table = self.closure_table()?;
                self.il.emit(Instr::LdArg(table));
                self.emit_i32(*index as i32);
                self.il.emit(Instr::LdLoc(value));
                self.il.emit(Instr::Box(place.ty.clone()));
                self.il.emit(Instr::StElem);
            }
            PlaceKind::Field(field) => {
                self.load_operands(place);
                self.il.emit(Instr::LdLoc(value));
                self.il.emit(Instr::StFld(*field));
            }
            PlaceKind::StaticField(field) => {
                self.il.emit(Instr::LdLoc(value));
                self.il.emit(Instr::StSFld(*field));
            }
            PlaceKind::Property { prop, .. } => {
                let setter = self.accessor(*prop, true)?;
                self.load_operands(place);
                self.il.emit(Instr::LdLoc(value));
                self.il.emit(Instr::Call(setter));
            }
            PlaceKind::ArrayElem => {
                self.load_operands(place);
                self.il.emit(Instr::LdLoc(value));
                self.il.emit(Instr::StElem);
            }
            PlaceKind::ListElem(elem) => {
                self.load_operands(place);
                self.il.emit(Instr::LdLoc(value));
                self.il.emit(Instr::Call(MethodRef::Intrinsic(Intrinsic::ListSet(elem.clone()))));
            }
            PlaceKind::MdElem { elem, rank } => {
                self.load_operands(place);
                self.il.emit(Instr::LdLoc(value));
                self.il.emit(Instr::Call(MethodRef::Intrinsic(Intrinsic::MdSet {
                    elem: elem.clone(),
                    rank: *rank,
                })));
            }
        }
        Ok(())
    }

    /// Push the address of `place` when it has one.
    pub(crate) fn place_address(&mut self, place: &Place) -> bool {
        match &place.kind {
            PlaceKind::Var(slot) => self.load_address(*slot),
            PlaceKind::Field(field) => {
                self.load_operands(place);
                self.il.emit(Instr::LdFldA(*field));
            }
            PlaceKind::StaticField(field) => self.il.emit(Instr::LdSFldA(*field)),
            PlaceKind::ArrayElem => {
                self.load_operands(place);
                self.il.emit(Instr::LdElemA);
            }
            _ => return false,
        }
        true
    }

    fn load_operands(&mut self, place: &Place) {
        if let Some(receiver) = place.receiver {
            self.il.emit(Instr::LdLoc(receiver));
        }
        for index in &place.indices {
            self.il.emit(Instr::LdLoc(*index));
        }
    }

    pub(crate) fn accessor(&self, prop: PropertyRef, setter: bool) -> Result<MethodRef, CompileError> {
        let def = self.registry().property(prop)?;
        let accessor = if setter { &def.setter } else { &def.getter };
        accessor.clone().ok_or_else(|| CompileError::MissingAccessor {
            member: format!("{}::{}", self.registry().type_name(prop.ty), def.name),
            accessor: if setter { "setter" } else { "getter" },
        })
    }

    // =====================================================================
    // Auto-extension
    // =====================================================================

    /// Load `place` into a temporary, creating and storing a default instance first when it is null.
    pub(crate) fn materialize_place(&mut self, place: &Place) -> Result<u16, CompileError> {
        self.load_place(place)?;
        let slot = self.spill(&place.ty);
        if !is_materializable(&place.ty) {
            return Ok(slot);
        }
        let present = self.il.define_label();
        self.il.emit(Instr::LdLoc(slot));
        self.il.emit(Instr::BrInst(present));
        self.emit_create(&place.ty)?;
        self.il.emit(Instr::StLoc(slot));
        self.store_place(place, slot)?;
        self.mark(present)?;
        Ok(slot)
    }

    /// Push a fresh empty instance of a class, array or list type.
    fn emit_create(&mut self, ty: &Ty) -> Result<(), CompileError> {
        match ty {
            Ty::Class(id) => {
                let ctor = self.registry().default_ctor(*id).ok_or_else(|| {
                    CompileError::unsupported(format!(
                        "auto-extension of {} requires a parameterless constructor",
                        self.ty_name(ty)
                    ))
                })?;
                self.il.emit(Instr::NewObj(ctor));
            }
            Ty::Array(elem) => {
                self.emit_i32(0);
                self.il.emit(Instr::NewArr((**elem).clone()));
            }
            Ty::List(elem) => self.il.emit(Instr::NewList((**elem).clone())),
            other => {
                return Err(CompileError::unsupported(format!(
                    "auto-extension of {}",
                    self.ty_name(other)
                )));
            }
        }
        Ok(())
    }

    /// Emit an assignable node's value, creating it in place when missing.
    pub(crate) fn emit_materialized(&mut self, expr: &Expr, exit: Option<Label>) -> Result<bool, CompileError> {
        self.scoped(|ctx| {
            let (place, used) = ctx.prepare_place(expr, exit, true)?;
            let slot = ctx.materialize_place(&place)?;
            ctx.il.emit(Instr::LdLoc(slot));
            Ok(used)
        })
    }
}
