//! Per-node emitters, grouped by construct.
//!
//! Each submodule adds `emit_*` methods to [`EmitContext`](crate::backend::context::EmitContext); the dispatcher in
//! the parent module picks one by node kind.
//!
//! ## Modules
//!
//! - `constants` - literals, variables, hoisted constants, closure variables
//! - `members` - field, property, length and optional-member reads
//! - `indexing` - array, list, multi-dimensional and indexer reads
//! - `places` - assignable locations shared by reads, writes and auto-extension
//! - `unary`, `binary`, `logical` - operators (plain, lifted and three-valued)
//! - `assign` - simple and compound assignment, increments
//! - `calls` - calls, invocations, construction and initializers
//! - `lambda` - nested functions and closures
//! - `types` - type tests and conversions
//! - `control` - conditionals, blocks, loops, labels, jumps, throw
//! - `switch` - linear and hash-dispatched switches
//! - `try_catch` - protected regions

mod assign;
mod binary;
mod calls;
mod constants;
mod control;
mod indexing;
mod lambda;
mod logical;
mod members;
mod places;
mod switch;
mod try_catch;
mod types;
mod unary;
