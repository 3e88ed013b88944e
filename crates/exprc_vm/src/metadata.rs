//! Type metadata: classes, structs, their fields, properties and methods.
//!
//! The registry is the only place emitters look up members. It is built up front by whoever constructs the IR and is
//! read-only afterwards (shared behind an `Arc` by every compilation and machine).
//!
//! ## Notes
//!
//! - Instance field storage is flattened base-first: a derived object's slot list starts with its base's fields.
//! - Every class gets an implicit parameterless constructor. Structs do not; `new S()` zero-initializes instead.
//! - The builtin exception hierarchy occupies the first type ids (see [`TypeRegistry::exception_type`]).

use std::fmt;
use std::sync::Arc;

use exprc_core::faults::{self, FaultKind};

use crate::errors::Trap;
use crate::intrinsics::Intrinsic;
use crate::machine::Machine;
use crate::routine::Routine;
use crate::types::{Ty, TypeId};
use crate::value::Value;

/// Host-implemented method body. Instance methods receive `this` as the first argument.
pub type NativeFn = Arc<dyn Fn(&mut Machine, Vec<Value>) -> Result<Value, Trap> + Send + Sync>;

/// Lookup failure against the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("unknown type #{0}")]
    UnknownType(TypeId),
    #[error("type '{ty}' has no {what} #{index}")]
    UnknownMember { ty: String, what: &'static str, index: u32 },
    #[error("type '{ty}' has no member named '{name}'")]
    UnknownName { ty: String, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeKind {
    Class,
    Struct,
}

/// Field of a type; `index` is its position in the declaring type's field list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldRef {
    pub ty: TypeId,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropertyRef {
    pub ty: TypeId,
    pub index: u32,
}

/// A callable member: a registry method or a container intrinsic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MethodRef {
    Method { ty: TypeId, index: u32 },
    Intrinsic(Intrinsic),
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: Ty,
    pub is_static: bool,
}

#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub name: String,
    pub ty: Ty,
    pub getter: Option<MethodRef>,
    pub setter: Option<MethodRef>,
    /// Non-empty for indexed properties (`obj[i, j]`).
    pub index_params: Vec<Ty>,
    pub is_static: bool,
}

#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: String,
    pub ty: Ty,
    /// Passed as a managed address instead of a value.
    pub by_ref: bool,
}

impl ParamDef {
    pub fn new(name: impl Into<String>, ty: Ty) -> Self {
        Self {
            name: name.into(),
            ty,
            by_ref: false,
        }
    }

    pub fn by_ref(name: impl Into<String>, ty: Ty) -> Self {
        Self {
            name: name.into(),
            ty,
            by_ref: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Instance,
    Static,
    /// Static method whose first parameter is written as the receiver.
    Extension,
    Ctor,
}

#[derive(Clone)]
pub enum MethodBody {
    Native(NativeFn),
    /// Auto-property getter reading the given field.
    FieldGetter(FieldRef),
    /// Auto-property setter writing the given field.
    FieldSetter(FieldRef),
    Routine(Arc<Routine>),
    Empty,
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodBody::Native(_) => f.write_str("Native(..)"),
            MethodBody::FieldGetter(r) => write!(f, "FieldGetter({:?})", r),
            MethodBody::FieldSetter(r) => write!(f, "FieldSetter({:?})", r),
            MethodBody::Routine(r) => write!(f, "Routine({})", r.name),
            MethodBody::Empty => f.write_str("Empty"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: String,
    /// Declared parameters, excluding `this`.
    pub params: Vec<ParamDef>,
    pub ret: Ty,
    pub kind: MethodKind,
    pub body: MethodBody,
}

#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
    pub base: Option<TypeId>,
    pub fields: Vec<FieldDef>,
    pub properties: Vec<PropertyDef>,
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    pub fn ty(&self, id: TypeId) -> Ty {
        match self.kind {
            TypeKind::Class => Ty::Class(id),
            TypeKind::Struct => Ty::Struct(id),
        }
    }
}

/// Resolved call shape of a [`MethodRef`].
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSig {
    /// Receiver type for instance methods and constructors.
    pub this: Option<Ty>,
    /// `(type, by_ref)` per declared parameter.
    pub params: Vec<(Ty, bool)>,
    pub ret: Ty,
}

/// All types known to a compilation.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: Vec<TypeDef>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// A registry holding only the builtin exception hierarchy.
    pub fn new() -> Self {
        let mut reg = Self { types: Vec::new() };
        let root = reg.define_class(faults::ROOT_EXCEPTION, None);
        reg.add_field(root, "Message", Ty::Str);
        for info in faults::FAULTS {
            reg.define_class(info.canonical, Some(root));
        }
        reg
    }

    // =====================================================================
    // Definition
    // =====================================================================

    /// Define a reference type with an implicit parameterless constructor.
    pub fn define_class(&mut self, name: impl Into<String>, base: Option<TypeId>) -> TypeId {
        let id = self.push_type(name.into(), TypeKind::Class, base);
        self.types[id as usize].methods.push(MethodDef {
            name: ".ctor".to_string(),
            params: Vec::new(),
            ret: Ty::Void,
            kind: MethodKind::Ctor,
            body: MethodBody::Empty,
        });
        id
    }

    pub fn define_struct(&mut self, name: impl Into<String>) -> TypeId {
        self.push_type(name.into(), TypeKind::Struct, None)
    }

    fn push_type(&mut self, name: String, kind: TypeKind, base: Option<TypeId>) -> TypeId {
        let id = self.types.len() as TypeId;
        self.types.push(TypeDef {
            name,
            kind,
            base,
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
        });
        id
    }

    pub fn add_field(&mut self, ty: TypeId, name: impl Into<String>, field_ty: Ty) -> FieldRef {
        self.push_field(ty, name.into(), field_ty, false)
    }

    pub fn add_static_field(&mut self, ty: TypeId, name: impl Into<String>, field_ty: Ty) -> FieldRef {
        self.push_field(ty, name.into(), field_ty, true)
    }

    fn push_field(&mut self, ty: TypeId, name: String, field_ty: Ty, is_static: bool) -> FieldRef {
        let def = &mut self.types[ty as usize];
        def.fields.push(FieldDef {
            name,
            ty: field_ty,
            is_static,
        });
        FieldRef {
            ty,
            index: (def.fields.len() - 1) as u32,
        }
    }

    pub fn add_method(&mut self, ty: TypeId, method: MethodDef) -> MethodRef {
        let def = &mut self.types[ty as usize];
        def.methods.push(method);
        MethodRef::Method {
            ty,
            index: (def.methods.len() - 1) as u32,
        }
    }

    /// Register a host-implemented method.
    pub fn add_native(
        &mut self,
        ty: TypeId,
        name: impl Into<String>,
        kind: MethodKind,
        params: Vec<ParamDef>,
        ret: Ty,
        body: impl Fn(&mut Machine, Vec<Value>) -> Result<Value, Trap> + Send + Sync + 'static,
    ) -> MethodRef {
        self.add_method(
            ty,
            MethodDef {
                name: name.into(),
                params,
                ret,
                kind,
                body: MethodBody::Native(Arc::new(body)),
            },
        )
    }

    pub fn add_property(&mut self, ty: TypeId, property: PropertyDef) -> PropertyRef {
        let def = &mut self.types[ty as usize];
        def.properties.push(property);
        PropertyRef {
            ty,
            index: (def.properties.len() - 1) as u32,
        }
    }

    /// Define a property backed by a generated field with a trivial getter and setter.
    pub fn add_auto_property(&mut self, ty: TypeId, name: impl Into<String>, prop_ty: Ty) -> PropertyRef {
        self.push_auto_property(ty, name.into(), prop_ty, false)
    }

    pub fn add_static_auto_property(&mut self, ty: TypeId, name: impl Into<String>, prop_ty: Ty) -> PropertyRef {
        self.push_auto_property(ty, name.into(), prop_ty, true)
    }

    fn push_auto_property(&mut self, ty: TypeId, name: String, prop_ty: Ty, is_static: bool) -> PropertyRef {
        let backing = self.push_field(ty, format!("<{}>k__BackingField", name), prop_ty.clone(), is_static);
        let kind = if is_static { MethodKind::Static } else { MethodKind::Instance };
        let getter = self.add_method(
            ty,
            MethodDef {
                name: format!("get_{}", name),
                params: Vec::new(),
                ret: prop_ty.clone(),
                kind,
                body: MethodBody::FieldGetter(backing),
            },
        );
        let setter = self.add_method(
            ty,
            MethodDef {
                name: format!("set_{}", name),
                params: vec![ParamDef::new("value", prop_ty.clone())],
                ret: Ty::Void,
                kind,
                body: MethodBody::FieldSetter(backing),
            },
        );
        self.add_property(
            ty,
            PropertyDef {
                name,
                ty: prop_ty,
                getter: Some(getter),
                setter: Some(setter),
                index_params: Vec::new(),
                is_static,
            },
        )
    }

    // =====================================================================
    // Lookup
    // =====================================================================

    /// Number of defined types (builtins included); the next defined type gets this id.
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn type_def(&self, id: TypeId) -> Result<&TypeDef, MetadataError> {
        self.types.get(id as usize).ok_or(MetadataError::UnknownType(id))
    }

    pub fn type_name(&self, id: TypeId) -> &str {
        self.types.get(id as usize).map(|t| t.name.as_str()).unwrap_or("<unknown>")
    }

    /// The static type (`Class`/`Struct`) of a type id.
    pub fn ty_of(&self, id: TypeId) -> Result<Ty, MetadataError> {
        Ok(self.type_def(id)?.ty(id))
    }

    pub fn find_type(&self, name: &str) -> Option<TypeId> {
        self.types.iter().position(|t| t.name == name).map(|i| i as TypeId)
    }

    pub fn field(&self, field: FieldRef) -> Result<&FieldDef, MetadataError> {
        let def = self.type_def(field.ty)?;
        def.fields.get(field.index as usize).ok_or_else(|| MetadataError::UnknownMember {
            ty: def.name.clone(),
            what: "field",
            index: field.index,
        })
    }

    pub fn property(&self, prop: PropertyRef) -> Result<&PropertyDef, MetadataError> {
        let def = self.type_def(prop.ty)?;
        def.properties
            .get(prop.index as usize)
            .ok_or_else(|| MetadataError::UnknownMember {
                ty: def.name.clone(),
                what: "property",
                index: prop.index,
            })
    }

    pub fn method(&self, ty: TypeId, index: u32) -> Result<&MethodDef, MetadataError> {
        let def = self.type_def(ty)?;
        def.methods.get(index as usize).ok_or_else(|| MetadataError::UnknownMember {
            ty: def.name.clone(),
            what: "method",
            index,
        })
    }

    /// Find an instance or static field by name, searching base types.
    pub fn find_field(&self, ty: TypeId, name: &str) -> Result<FieldRef, MetadataError> {
        let mut current = Some(ty);
        while let Some(id) = current {
            let def = self.type_def(id)?;
            if let Some(index) = def.fields.iter().position(|f| f.name == name) {
                return Ok(FieldRef { ty: id, index: index as u32 });
            }
            current = def.base;
        }
        Err(self.unknown_name(ty, name))
    }

    pub fn find_property(&self, ty: TypeId, name: &str) -> Result<PropertyRef, MetadataError> {
        let mut current = Some(ty);
        while let Some(id) = current {
            let def = self.type_def(id)?;
            if let Some(index) = def.properties.iter().position(|p| p.name == name) {
                return Ok(PropertyRef { ty: id, index: index as u32 });
            }
            current = def.base;
        }
        Err(self.unknown_name(ty, name))
    }

    pub fn find_method(&self, ty: TypeId, name: &str) -> Result<MethodRef, MetadataError> {
        let mut current = Some(ty);
        while let Some(id) = current {
            let def = self.type_def(id)?;
            if let Some(index) = def.methods.iter().position(|m| m.name == name) {
                return Ok(MethodRef::Method { ty: id, index: index as u32 });
            }
            current = def.base;
        }
        Err(self.unknown_name(ty, name))
    }

    fn unknown_name(&self, ty: TypeId, name: &str) -> MetadataError {
        MetadataError::UnknownName {
            ty: self.type_name(ty).to_string(),
            name: name.to_string(),
        }
    }

    /// The parameterless constructor of a class, if any.
    pub fn default_ctor(&self, ty: TypeId) -> Option<MethodRef> {
        let def = self.types.get(ty as usize)?;
        def.methods
            .iter()
            .position(|m| m.kind == MethodKind::Ctor && m.params.is_empty())
            .map(|index| MethodRef::Method { ty, index: index as u32 })
    }

    /// Call shape of `method`.
    pub fn signature(&self, method: &MethodRef) -> Result<MethodSig, MetadataError> {
        match method {
            MethodRef::Intrinsic(intrinsic) => Ok(intrinsic.signature()),
            MethodRef::Method { ty, index } => {
                let def = self.method(*ty, *index)?;
                let this = match def.kind {
                    MethodKind::Instance | MethodKind::Ctor => Some(self.ty_of(*ty)?),
                    MethodKind::Static | MethodKind::Extension => None,
                };
                let ret = match def.kind {
                    MethodKind::Ctor => self.ty_of(*ty)?,
                    _ => def.ret.clone(),
                };
                Ok(MethodSig {
                    this,
                    params: def.params.iter().map(|p| (p.ty.clone(), p.by_ref)).collect(),
                    ret,
                })
            }
        }
    }

    /// Display name of a method for diagnostics and disassembly (`Type::name`).
    pub fn method_name(&self, method: &MethodRef) -> String {
        match method {
            MethodRef::Intrinsic(intrinsic) => intrinsic.name(self),
            MethodRef::Method { ty, index } => match self.method(*ty, *index) {
                Ok(def) => format!("{}::{}", self.type_name(*ty), def.name),
                Err(_) => format!("{}::<method #{}>", self.type_name(*ty), index),
            },
        }
    }

    pub fn field_name(&self, field: FieldRef) -> String {
        match self.field(field) {
            Ok(def) => format!("{}::{}", self.type_name(field.ty), def.name),
            Err(_) => format!("{}::<field #{}>", self.type_name(field.ty), field.index),
        }
    }

    // =====================================================================
    // Layout and subtyping
    // =====================================================================

    /// Types of every instance field of `ty`, base fields first.
    pub fn instance_layout(&self, ty: TypeId) -> Result<Vec<Ty>, MetadataError> {
        let def = self.type_def(ty)?;
        let mut layout = match def.base {
            Some(base) => self.instance_layout(base)?,
            None => Vec::new(),
        };
        layout.extend(def.fields.iter().filter(|f| !f.is_static).map(|f| f.ty.clone()));
        Ok(layout)
    }

    /// Storage slot of an instance field within an object of the declaring type (or a subtype).
    pub fn field_slot(&self, field: FieldRef) -> Result<usize, MetadataError> {
        let def = self.type_def(field.ty)?;
        let inherited = match def.base {
            Some(base) => self.instance_layout(base)?.len(),
            None => 0,
        };
        let before = def
            .fields
            .iter()
            .take(field.index as usize)
            .filter(|f| !f.is_static)
            .count();
        Ok(inherited + before)
    }

    pub fn is_subclass(&self, sub: TypeId, sup: TypeId) -> bool {
        let mut current = Some(sub);
        while let Some(id) = current {
            if id == sup {
                return true;
            }
            current = self.types.get(id as usize).and_then(|t| t.base);
        }
        false
    }

    /// Whether a value of static type `from` can be stored in a slot of type `to` without conversion.
    pub fn is_assignable(&self, from: &Ty, to: &Ty) -> bool {
        if from == to {
            return true;
        }
        match (from, to) {
            (_, Ty::Object) => !from.is_void(),
            (Ty::Class(a), Ty::Class(b)) => self.is_subclass(*a, *b),
            _ => false,
        }
    }

    // =====================================================================
    // Exceptions
    // =====================================================================

    /// Type id of the exception raised for `kind`, or of the root exception for `None`.
    pub fn exception_type(&self, kind: Option<FaultKind>) -> TypeId {
        match kind {
            None => 0,
            Some(kind) => kind as TypeId + 1,
        }
    }

    /// The `Message` field of the root exception type.
    pub fn message_field(&self) -> FieldRef {
        FieldRef { ty: 0, index: 0 }
    }

    pub fn is_exception(&self, ty: TypeId) -> bool {
        self.is_subclass(ty, 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_exceptions_are_registered_in_order() {
        let reg = TypeRegistry::new();
        for info in faults::FAULTS {
            let id = reg.exception_type(Some(info.id));
            assert_eq!(reg.type_name(id), info.canonical);
            assert!(reg.is_exception(id));
        }
        assert_eq!(reg.type_name(reg.exception_type(None)), "Exception");
    }

    #[test]
    fn test_field_layout_is_base_first() {
        let mut reg = TypeRegistry::new();
        let base = reg.define_class("Base", None);
        let a = reg.add_field(base, "a", Ty::I32);
        reg.add_static_field(base, "counter", Ty::I32);
        let derived = reg.define_class("Derived", Some(base));
        let b = reg.add_field(derived, "b", Ty::Str);

        assert_eq!(reg.instance_layout(derived).unwrap(), vec![Ty::I32, Ty::Str]);
        assert_eq!(reg.field_slot(a).unwrap(), 0);
        assert_eq!(reg.field_slot(b).unwrap(), 1);
        assert_eq!(reg.find_field(derived, "a").unwrap(), a);
    }

    #[test]
    fn test_auto_property_has_accessors() {
        let mut reg = TypeRegistry::new();
        let t = reg.define_class("Holder", None);
        let p = reg.add_auto_property(t, "Value", Ty::I64);
        let def = reg.property(p).unwrap();
        assert!(def.getter.is_some());
        assert!(def.setter.is_some());
        let sig = reg.signature(def.setter.as_ref().unwrap()).unwrap();
        assert_eq!(sig.params, vec![(Ty::I64, false)]);
        assert_eq!(sig.this, Some(Ty::Class(t)));
    }

    #[test]
    fn test_classes_get_default_ctor_structs_do_not() {
        let mut reg = TypeRegistry::new();
        let c = reg.define_class("C", None);
        let s = reg.define_struct("S");
        assert!(reg.default_ctor(c).is_some());
        assert!(reg.default_ctor(s).is_none());
    }

    #[test]
    fn test_unknown_lookups_report_errors() {
        let reg = TypeRegistry::new();
        assert_eq!(reg.type_def(999).unwrap_err(), MetadataError::UnknownType(999));
        assert!(matches!(
            reg.find_field(0, "Missing"),
            Err(MetadataError::UnknownName { .. })
        ));
    }
}
