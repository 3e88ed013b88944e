//! Built-in operations on strings and containers.
//!
//! These are the public contracts of the runtime's collection types. Generated code (including the synthesized
//! auto-extend helpers) only ever touches containers through them.

use crate::metadata::{MethodSig, TypeRegistry};
use crate::types::Ty;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Intrinsic {
    /// `List<T>.Add(item)`
    ListAdd(Ty),
    /// `List<T>[index]`
    ListGet(Ty),
    /// `List<T>[index] = value`
    ListSet(Ty),
    /// `List<T>.Count`
    ListCount(Ty),
    /// `Array.Resize`-style copy into a new array of the requested length.
    ArrayResize(Ty),
    /// Generic element read of a multi-dimensional array.
    MdGet { elem: Ty, rank: u32 },
    /// Generic element write of a multi-dimensional array.
    MdSet { elem: Ty, rank: u32 },
    /// Length of one dimension of a multi-dimensional array.
    MdLength { elem: Ty, rank: u32 },
    StrConcat,
    StrLength,
    /// Value equality (`object.Equals`).
    ObjEquals,
}

impl Intrinsic {
    pub fn signature(&self) -> MethodSig {
        let index = (Ty::I32, false);
        match self {
            Intrinsic::ListAdd(elem) => MethodSig {
                this: Some(Ty::list(elem.clone())),
                params: vec![(elem.clone(), false)],
                ret: Ty::Void,
            },
            Intrinsic::ListGet(elem) => MethodSig {
                this: Some(Ty::list(elem.clone())),
                params: vec![index],
                ret: elem.clone(),
            },
            Intrinsic::ListSet(elem) => MethodSig {
                this: Some(Ty::list(elem.clone())),
                params: vec![index, (elem.clone(), false)],
                ret: Ty::Void,
            },
            Intrinsic::ListCount(elem) => MethodSig {
                this: Some(Ty::list(elem.clone())),
                params: Vec::new(),
                ret: Ty::I32,
            },
            Intrinsic::ArrayResize(elem) => MethodSig {
                this: None,
                params: vec![(Ty::array(elem.clone()), false), index],
                ret: Ty::array(elem.clone()),
            },
            Intrinsic::MdGet { elem, rank } => MethodSig {
                this: Some(Ty::md_array(elem.clone(), *rank)),
                params: vec![index; *rank as usize],
                ret: elem.clone(),
            },
            Intrinsic::MdSet { elem, rank } => {
                let mut params = vec![index; *rank as usize];
                params.push((elem.clone(), false));
                MethodSig {
                    this: Some(Ty::md_array(elem.clone(), *rank)),
                    params,
                    ret: Ty::Void,
                }
            }
            Intrinsic::MdLength { elem, rank } => MethodSig {
                this: Some(Ty::md_array(elem.clone(), *rank)),
                params: vec![index],
                ret: Ty::I32,
            },
            Intrinsic::StrConcat => MethodSig {
                this: None,
                params: vec![(Ty::Str, false), (Ty::Str, false)],
                ret: Ty::Str,
            },
            Intrinsic::StrLength => MethodSig {
                this: Some(Ty::Str),
                params: Vec::new(),
                ret: Ty::I32,
            },
            Intrinsic::ObjEquals => MethodSig {
                this: None,
                params: vec![(Ty::Object, false), (Ty::Object, false)],
                ret: Ty::Bool,
            },
        }
    }

    /// Number of stack operands consumed, receiver included.
    pub fn arity(&self) -> usize {
        let sig = self.signature();
        sig.params.len() + usize::from(sig.this.is_some())
    }

    pub fn name(&self, registry: &TypeRegistry) -> String {
        match self {
            Intrinsic::ListAdd(t) => format!("List<{}>::Add", t.display(registry)),
            Intrinsic::ListGet(t) => format!("List<{}>::get_Item", t.display(registry)),
            Intrinsic::ListSet(t) => format!("List<{}>::set_Item", t.display(registry)),
            Intrinsic::ListCount(t) => format!("List<{}>::get_Count", t.display(registry)),
            Intrinsic::ArrayResize(t) => format!("Array::Resize<{}>", t.display(registry)),
            Intrinsic::MdGet { elem, rank } => format!("{}::Get", Ty::md_array(elem.clone(), *rank).display(registry)),
            Intrinsic::MdSet { elem, rank } => format!("{}::Set", Ty::md_array(elem.clone(), *rank).display(registry)),
            Intrinsic::MdLength { elem, rank } => {
                format!("{}::GetLength", Ty::md_array(elem.clone(), *rank).display(registry))
            }
            Intrinsic::StrConcat => "string::Concat".to_string(),
            Intrinsic::StrLength => "string::get_Length".to_string(),
            Intrinsic::ObjEquals => "object::Equals".to_string(),
        }
    }
}
