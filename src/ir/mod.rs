//! Typed expression trees: the input of the emitter.
//!
//! ## Modules
//!
//! - `expr` - node definitions
//! - `build` - constructors with result-type inference
//! - `visit` - read-only traversal helpers used by analysis passes

mod build;
mod expr;
pub mod visit;

pub use expr::*;
