//! Code generation backend
//!
//! Lowers typed expression trees ([`crate::ir`]) to routines of the `exprc_vm` stack machine.
//!
//! The pipeline is:
//! 1. [`Compiler::compile`] sets up one [`context::EmitContext`] per unit (the lambda and every nested lambda)
//! 2. The dispatcher in `emit` walks the tree, choosing a result shape (value, address, void) per node
//! 3. Helper routines for auto-extension and hash dispatch are built once per [`HelperCache`] and shared
//! 4. The finished routine is bound to its hidden arguments as a [`exprc_vm::Callable`]
//!
//! ## Module Organization
//!
//! - `compile.rs` - Entry point, collaborators (debug sink, invoker factory), compiled output
//! - `context.rs` - Per-unit emission state: locals, labels, guards, try nesting
//! - `emit/` - Node emitters
//!   - `mod.rs` - Dispatcher and result shapes
//!   - `nullable.rs` - Lifting over optional operands
//!   - `expressions/` - One module per construct
//! - `helpers.rs` - Shared helper routine cache
//! - `options.rs` - Compile options
//! - `errors.rs` - Compile errors

#![deny(clippy::unwrap_used)]

pub mod compile;
pub(crate) mod context;
pub(crate) mod emit;
pub mod errors;
pub mod helpers;
pub mod options;

pub use compile::{
    CompiledFn, Compiler, DebugSink, DefaultInvokers, DumpDirSink, InvokerFactory, InvokerShape, MAX_INVOKER_PARAMS,
    ResolvedLambda,
};
pub use errors::CompileError;
pub use helpers::{HelperCache, HelperKind};
pub use options::CompileOptions;
