//! Runtime values.
//!
//! Reference types (`Object`, arrays, lists, function values) are shared `Rc` handles compared by identity; value
//! types (scalars, optionals, structs) are copied on every load and compared structurally.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use exprc_core::Num;

use crate::callable::Callable;
use crate::metadata::{FieldRef, MetadataError, TypeRegistry};
use crate::routine::Routine;
use crate::types::{Ty, TypeId};

pub type ObjRef = Rc<Object>;

/// Heap instance of a class (exceptions included).
pub struct Object {
    pub ty: TypeId,
    pub fields: RefCell<Vec<Value>>,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object(#{})", self.ty)
    }
}

/// Single or multi-dimensional array; elements are stored row-major.
pub struct ArrayObj {
    pub elem: Ty,
    pub dims: Vec<usize>,
    pub data: RefCell<Vec<Value>>,
}

impl ArrayObj {
    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major offset of `indices`, or `None` when any index is out of range.
    pub fn offset(&self, indices: &[i64]) -> Option<usize> {
        if indices.len() != self.dims.len() {
            return None;
        }
        let mut offset = 0usize;
        for (&i, &dim) in indices.iter().zip(&self.dims) {
            if i < 0 || i as usize >= dim {
                return None;
            }
            offset = offset * dim + i as usize;
        }
        Some(offset)
    }
}

impl fmt::Debug for ArrayObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayObj")
            .field("elem", &self.elem)
            .field("dims", &self.dims)
            .finish_non_exhaustive()
    }
}

pub struct ListObj {
    pub elem: Ty,
    pub items: RefCell<Vec<Value>>,
}

impl fmt::Debug for ListObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListObj(len = {})", self.items.borrow().len())
    }
}

/// Unboxed instance of a struct.
#[derive(Debug, Clone, PartialEq)]
pub struct StructVal {
    pub ty: TypeId,
    pub fields: Vec<Value>,
}

/// Managed address of a storage location (`ref` argument, `ldloca`, `ldflda`, ...).
#[derive(Debug, Clone)]
pub enum Addr {
    Local { frame: usize, slot: u16 },
    Arg { frame: usize, index: u16 },
    Field { obj: ObjRef, slot: usize },
    Static(FieldRef),
    Elem { array: Rc<ArrayObj>, index: usize },
    /// Field `slot` of the struct stored at `base`.
    Inner { base: Box<Addr>, slot: usize },
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Null reference; also the result of void calls.
    #[default]
    Null,
    Bool(bool),
    Num(Num),
    Str(Arc<str>),
    /// Optional scalar; `None` is the absent value.
    Opt(Option<Box<Value>>),
    Struct(Box<StructVal>),
    Object(ObjRef),
    Array(Rc<ArrayObj>),
    List(Rc<ListObj>),
    Func(Rc<Callable>),
    FnPtr(Arc<Routine>),
    Addr(Addr),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Opt(a), Value::Opt(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Func(a), Value::Func(b)) => Rc::ptr_eq(a, b),
            (Value::FnPtr(a), Value::FnPtr(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    pub fn some(v: impl Into<Value>) -> Value {
        Value::Opt(Some(Box::new(v.into())))
    }

    pub fn none() -> Value {
        Value::Opt(None)
    }

    pub fn new_object(ty: TypeId, fields: Vec<Value>) -> Value {
        Value::Object(Rc::new(Object {
            ty,
            fields: RefCell::new(fields),
        }))
    }

    pub fn new_array(elem: Ty, items: Vec<Value>) -> Value {
        Value::Array(Rc::new(ArrayObj {
            elem,
            dims: vec![items.len()],
            data: RefCell::new(items),
        }))
    }

    pub fn new_list(elem: Ty, items: Vec<Value>) -> Value {
        Value::List(Rc::new(ListObj {
            elem,
            items: RefCell::new(items),
        }))
    }

    /// Zero value of `ty`: `false`, `0`, absent, a zeroed struct, or a null reference.
    pub fn default_for(ty: &Ty, registry: &TypeRegistry) -> Result<Value, MetadataError> {
        Ok(match ty {
            Ty::Bool => Value::Bool(false),
            Ty::Num(kind) => Value::Num(Num::zero(*kind)),
            Ty::Nullable(_) => Value::Opt(None),
            Ty::Struct(id) => {
                let fields = registry
                    .instance_layout(*id)?
                    .iter()
                    .map(|t| Value::default_for(t, registry))
                    .collect::<Result<Vec<_>, _>>()?;
                Value::Struct(Box::new(StructVal { ty: *id, fields }))
            }
            _ => Value::Null,
        })
    }

    /// A null reference or an absent optional.
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Null | Value::Opt(None))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<Num> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Num(n) if n.kind().is_integral() => Some(n.as_i64()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Branch truthiness: `true`, non-zero numbers and non-null references.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null | Value::Opt(None) => false,
            Value::Bool(b) => *b,
            Value::Num(n) => !n.is_zero(),
            _ => true,
        }
    }

    /// Render for display, naming types through `registry`.
    pub fn render(&self, registry: &TypeRegistry) -> String {
        self.render_depth(registry, 0)
    }

    fn render_depth(&self, registry: &TypeRegistry, depth: usize) -> String {
        if depth > 4 {
            return "...".to_string();
        }
        let join = |items: &[Value]| {
            items
                .iter()
                .map(|v| v.render_depth(registry, depth + 1))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            Value::Null | Value::Opt(None) => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => n.to_string(),
            Value::Str(s) => format!("{:?}", s),
            Value::Opt(Some(v)) => v.render_depth(registry, depth),
            Value::Struct(s) => format!("{} {{ {} }}", registry.type_name(s.ty), join(&s.fields)),
            Value::Object(o) => {
                let fields = o.fields.borrow();
                format!("{} {{ {} }}", registry.type_name(o.ty), join(&fields))
            }
            Value::Array(a) => format!("[{}]", join(&a.data.borrow())),
            Value::List(l) => format!("List [{}]", join(&l.items.borrow())),
            Value::Func(c) => format!("<func {}>", c.routine.name),
            Value::FnPtr(r) => format!("<fnptr {}>", r.name),
            Value::Addr(_) => "<address>".to_string(),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Num> for Value {
    fn from(v: Num) -> Self {
        Value::Num(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        Value::Opt(v.map(|inner| Box::new(inner.into())))
    }
}

macro_rules! value_from_num {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Num(Num::from(v))
            }
        })*
    };
}

value_from_num!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_per_type() {
        let mut reg = TypeRegistry::new();
        let point = reg.define_struct("Point");
        reg.add_field(point, "x", Ty::I32);
        reg.add_field(point, "label", Ty::Str);

        assert_eq!(Value::default_for(&Ty::I64, &reg).unwrap(), Value::from(0i64));
        assert_eq!(Value::default_for(&Ty::nullable(Ty::I32), &reg).unwrap(), Value::none());
        assert_eq!(Value::default_for(&Ty::Str, &reg).unwrap(), Value::Null);
        assert_eq!(
            Value::default_for(&Ty::Struct(point), &reg).unwrap(),
            Value::Struct(Box::new(StructVal {
                ty: point,
                fields: vec![Value::from(0), Value::Null],
            }))
        );
    }

    #[test]
    fn test_references_compare_by_identity() {
        let a = Value::new_list(Ty::I32, vec![]);
        let b = Value::new_list(Ty::I32, vec![]);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_md_offset_is_row_major() {
        let arr = ArrayObj {
            elem: Ty::I32,
            dims: vec![2, 3],
            data: RefCell::new(vec![Value::Null; 6]),
        };
        assert_eq!(arr.offset(&[1, 2]), Some(5));
        assert_eq!(arr.offset(&[2, 0]), None);
        assert_eq!(arr.offset(&[0, -1]), None);
    }
}
