//! Static types of the instruction set.

use exprc_core::NumKind;

use crate::metadata::TypeRegistry;

/// Index of a user or builtin type in a [`TypeRegistry`].
pub type TypeId = u32;

/// Static type of a value, slot or expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Ty {
    Void,
    Bool,
    Num(NumKind),
    Str,
    /// Root of every type; values of any type can be stored in an `Object` slot.
    Object,
    /// Optional scalar (`int?`). The inner type is always a value type.
    Nullable(Box<Ty>),
    Class(TypeId),
    Struct(TypeId),
    Array(Box<Ty>),
    MdArray {
        elem: Box<Ty>,
        rank: u32,
    },
    /// Growable collection.
    List(Box<Ty>),
    Func {
        params: Vec<Ty>,
        ret: Box<Ty>,
    },
    /// Managed address of a storage location holding a `T`; only used for locals and by-ref parameters.
    ByRef(Box<Ty>),
}

impl Ty {
    pub const I8: Ty = Ty::Num(NumKind::I8);
    pub const U8: Ty = Ty::Num(NumKind::U8);
    pub const I16: Ty = Ty::Num(NumKind::I16);
    pub const U16: Ty = Ty::Num(NumKind::U16);
    pub const I32: Ty = Ty::Num(NumKind::I32);
    pub const U32: Ty = Ty::Num(NumKind::U32);
    pub const I64: Ty = Ty::Num(NumKind::I64);
    pub const U64: Ty = Ty::Num(NumKind::U64);
    pub const F32: Ty = Ty::Num(NumKind::F32);
    pub const F64: Ty = Ty::Num(NumKind::F64);

    pub fn nullable(inner: Ty) -> Ty {
        match inner {
            Ty::Nullable(_) => inner,
            other => Ty::Nullable(Box::new(other)),
        }
    }

    pub fn array(elem: Ty) -> Ty {
        Ty::Array(Box::new(elem))
    }

    pub fn list(elem: Ty) -> Ty {
        Ty::List(Box::new(elem))
    }

    pub fn md_array(elem: Ty, rank: u32) -> Ty {
        Ty::MdArray {
            elem: Box::new(elem),
            rank,
        }
    }

    pub fn func(params: Vec<Ty>, ret: Ty) -> Ty {
        Ty::Func {
            params,
            ret: Box::new(ret),
        }
    }

    pub fn by_ref(target: Ty) -> Ty {
        Ty::ByRef(Box::new(target))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Ty::Void)
    }

    /// Values of this type are copied on assignment and can never be a null reference.
    pub fn is_value_type(&self) -> bool {
        matches!(self, Ty::Bool | Ty::Num(_) | Ty::Struct(_) | Ty::Nullable(_))
    }

    pub fn is_reference(&self) -> bool {
        !self.is_void() && !self.is_value_type() && !matches!(self, Ty::ByRef(_))
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Ty::Nullable(_))
    }

    /// Whether a value of this type may be absent (a null reference or an empty optional).
    pub fn can_be_absent(&self) -> bool {
        self.is_reference() || self.is_nullable()
    }

    pub fn nullable_inner(&self) -> Option<&Ty> {
        match self {
            Ty::Nullable(inner) => Some(inner),
            _ => None,
        }
    }

    /// The type with one level of `Nullable` removed.
    pub fn underlying(&self) -> &Ty {
        self.nullable_inner().unwrap_or(self)
    }

    /// Numeric kind of this type or of its optional's inner type.
    pub fn num_kind(&self) -> Option<NumKind> {
        match self.underlying() {
            Ty::Num(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_integral(&self) -> bool {
        self.num_kind().is_some_and(|k| k.is_integral())
    }

    /// Element type of arrays, multi-dimensional arrays and lists.
    pub fn element(&self) -> Option<&Ty> {
        match self {
            Ty::Array(elem) | Ty::List(elem) => Some(elem),
            Ty::MdArray { elem, .. } => Some(elem),
            _ => None,
        }
    }

    /// Render the type using names from `registry`.
    pub fn display(&self, registry: &TypeRegistry) -> String {
        match self {
            Ty::Void => "void".to_string(),
            Ty::Bool => "bool".to_string(),
            Ty::Num(kind) => kind.name().to_string(),
            Ty::Str => "string".to_string(),
            Ty::Object => "object".to_string(),
            Ty::Nullable(inner) => format!("{}?", inner.display(registry)),
            Ty::Class(id) | Ty::Struct(id) => registry.type_name(*id).to_string(),
            Ty::Array(elem) => format!("{}[]", elem.display(registry)),
            Ty::MdArray { elem, rank } => {
                format!("{}[{}]", elem.display(registry), ",".repeat(rank.saturating_sub(1) as usize))
            }
            Ty::List(elem) => format!("List<{}>", elem.display(registry)),
            Ty::Func { params, ret } => {
                let params: Vec<String> = params.iter().map(|p| p.display(registry)).collect();
                format!("Func<({}) -> {}>", params.join(", "), ret.display(registry))
            }
            Ty::ByRef(target) => format!("{}&", target.display(registry)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_nullable_does_not_nest() {
        let t = Ty::nullable(Ty::nullable(Ty::I32));
        assert_eq!(t, Ty::Nullable(Box::new(Ty::I32)));
        assert_eq!(t.underlying(), &Ty::I32);
        assert_eq!(t.num_kind(), Some(NumKind::I32));
    }

    #[test]
    fn test_value_and_reference_classification() {
        assert!(Ty::I32.is_value_type());
        assert!(Ty::Struct(9).is_value_type());
        assert!(Ty::Str.is_reference());
        assert!(Ty::array(Ty::I32).is_reference());
        assert!(!Ty::Void.is_reference());
        assert!(Ty::nullable(Ty::Bool).can_be_absent());
        assert!(!Ty::Bool.can_be_absent());
    }

    #[test]
    fn test_display_uses_registry_names() {
        let mut reg = TypeRegistry::new();
        let node = reg.define_class("Node", None);
        assert_eq!(Ty::array(Ty::Class(node)).display(&reg), "Node[]");
        assert_eq!(Ty::md_array(Ty::I32, 3).display(&reg), "int[,,]");
        assert_eq!(Ty::nullable(Ty::I64).display(&reg), "long?");
    }
}
