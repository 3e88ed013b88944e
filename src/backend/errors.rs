//! Define error types for expression-tree compilation.
//!
//! These errors represent *emission* failures: the tree is well-formed data but cannot be lowered (wrong argument
//! counts, unassignable targets, missing accessors, mismatched types).
//!
//! ## Notes
//!
//! - Messages name the construct and the types involved so the caller can fix the tree.

use exprc_vm::BuildError;
use exprc_vm::metadata::MetadataError;
use miette::Diagnostic;
use thiserror::Error;

use crate::ir::{LabelId, VarId};

/// Error during compilation of an expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum CompileError {
    #[error("{what} expects {expected} argument(s), got {found}")]
    #[diagnostic(code(exprc::argument_count))]
    ArgumentCount {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("{kind} expression is not assignable")]
    #[diagnostic(
        code(exprc::not_assignable),
        help("assign to a variable, field, property, array or list element, or closure variable")
    )]
    NotAssignable { kind: &'static str },

    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    #[diagnostic(code(exprc::type_mismatch))]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    #[error("{member} has no {accessor}")]
    #[diagnostic(code(exprc::missing_accessor))]
    MissingAccessor { member: String, accessor: &'static str },

    #[error("unsupported: {0}")]
    #[diagnostic(code(exprc::unsupported))]
    NotSupported(String),

    #[error("variable #{0} is not in scope")]
    #[diagnostic(code(exprc::unknown_variable))]
    UnknownVariable(VarId),

    #[error("label #{0} is not defined in this function")]
    #[diagnostic(code(exprc::unknown_label))]
    UnknownLabel(LabelId),

    #[error("internal emission error: {0}")]
    #[diagnostic(code(exprc::internal))]
    Build(#[from] BuildError),

    #[error("metadata lookup failed: {0}")]
    #[diagnostic(code(exprc::metadata))]
    Metadata(#[from] MetadataError),
}

impl CompileError {
    pub fn mismatch(context: impl Into<String>, expected: impl Into<String>, found: impl Into<String>) -> Self {
        CompileError::TypeMismatch {
            context: context.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        CompileError::NotSupported(what.into())
    }
}
