#![forbid(unsafe_code)]
//! exprc: a backend code generator for typed expression trees.
//!
//! Trees built with [`ir`] are lowered by [`backend::Compiler`] to routines for the `exprc_vm` stack machine, with
//! null-propagating member access, lifted arithmetic, three-valued logic, checked arithmetic, auto-extending
//! assignment, hash-dispatched switches, protected regions and closures.
//!
//! ## Panic Policy
//!
//! This codebase follows explicit error handling:
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. The `cli` and `backend` modules
//!   enforce `#![deny(clippy::unwrap_used)]`.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.
//!
//! - **Malformed trees**: Surface as [`backend::CompileError`], never as panics.

pub mod backend;
pub mod cli;
pub mod ir;

pub use backend::{CompileError, CompileOptions, CompiledFn, Compiler, ResolvedLambda};
pub use ir::{Expr, ExprKind, LambdaExpr};
