//! Execution target of the `exprc` emitter: a typed stack machine with managed references.
//!
//! The crate provides the static type language ([`Ty`]), the metadata registry the emitters consult
//! ([`TypeRegistry`]), the instruction set ([`Instr`]), finished routines with their builder and disassembler
//! ([`Routine`], [`RoutineBuilder`]), and the interpreter that runs them ([`Machine`]).
//!
//! ## Notes
//!
//! - Routines are immutable once finished and shared as `Arc<Routine>`; compiled code can be cached and reused across
//!   threads. Runtime values are single-threaded (`Rc`) and live in one machine.
//! - Numeric and switch-hash semantics come from `exprc_core` so compile-time folding and runtime evaluation agree.

#![deny(clippy::unwrap_used)]

pub mod callable;
pub mod errors;
pub mod instr;
pub mod intrinsics;
pub mod machine;
pub mod metadata;
pub mod routine;
pub mod types;
pub mod value;

pub use callable::Callable;
pub use errors::{RuntimeError, Trap};
pub use instr::{CmpOp, Const, Instr, Label, Region, RegionKind, RegionSpec};
pub use intrinsics::Intrinsic;
pub use machine::Machine;
pub use metadata::{
    FieldRef, MethodBody, MethodDef, MethodKind, MethodRef, MethodSig, ParamDef, PropertyDef, PropertyRef,
    TypeRegistry,
};
pub use routine::{BuildError, Routine, RoutineBuilder};
pub use types::{Ty, TypeId};
pub use value::{Addr, Value};
