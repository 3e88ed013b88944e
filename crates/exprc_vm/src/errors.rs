//! Error types raised while executing routines.

use exprc_core::FaultKind;

use crate::value::ObjRef;

/// Abrupt completion inside the machine.
#[derive(Debug, Clone)]
pub enum Trap {
    /// A thrown exception object; catchable by generated handlers.
    Throw(ObjRef),
    /// Malformed code or a broken machine invariant; never catchable.
    Invalid(String),
}

impl Trap {
    pub fn invalid(message: impl Into<String>) -> Self {
        Trap::Invalid(message.into())
    }
}

/// Error returned by [`crate::Machine::invoke`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("unhandled {type_name}: {message}")]
    Unhandled {
        type_name: String,
        message: String,
        /// Set when the exception type is one of the builtin fault types.
        fault: Option<FaultKind>,
    },
    #[error("invalid program: {0}")]
    InvalidProgram(String),
}

impl RuntimeError {
    pub fn fault(&self) -> Option<FaultKind> {
        match self {
            RuntimeError::Unhandled { fault, .. } => *fault,
            RuntimeError::InvalidProgram(_) => None,
        }
    }
}
