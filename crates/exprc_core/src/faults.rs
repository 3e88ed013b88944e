//! Runtime fault vocabulary.
//!
//! Each fault the machine can raise on its own (null dereference, bad index, overflow, ...) has a canonical
//! exception type name and a default message. The machine materializes faults as objects of these types so generated
//! catch clauses can filter on them; tooling uses the names when printing unhandled exceptions.

use std::fmt;

use crate::num::NumFault;

/// Stable identifier for a machine-raised fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FaultKind {
    NullReference,
    IndexOutOfRange,
    Overflow,
    DivideByZero,
    InvalidCast,
    Argument,
    InvalidOperation,
}

/// Registry entry for a fault kind.
#[derive(Debug, Clone, Copy)]
pub struct FaultInfo {
    pub id: FaultKind,
    /// Exception type name surfaced to generated code.
    pub canonical: &'static str,
    pub message: &'static str,
}

/// Every fault kind, in declaration order.
pub const FAULTS: &[FaultInfo] = &[
    FaultInfo {
        id: FaultKind::NullReference,
        canonical: "NullReferenceException",
        message: "Object reference not set to an instance of an object.",
    },
    FaultInfo {
        id: FaultKind::IndexOutOfRange,
        canonical: "IndexOutOfRangeException",
        message: "Index was outside the bounds of the array.",
    },
    FaultInfo {
        id: FaultKind::Overflow,
        canonical: "OverflowException",
        message: "Arithmetic operation resulted in an overflow.",
    },
    FaultInfo {
        id: FaultKind::DivideByZero,
        canonical: "DivideByZeroException",
        message: "Attempted to divide by zero.",
    },
    FaultInfo {
        id: FaultKind::InvalidCast,
        canonical: "InvalidCastException",
        message: "Specified cast is not valid.",
    },
    FaultInfo {
        id: FaultKind::Argument,
        canonical: "ArgumentException",
        message: "Value does not fall within the expected range.",
    },
    FaultInfo {
        id: FaultKind::InvalidOperation,
        canonical: "InvalidOperationException",
        message: "Operation is not valid due to the current state of the object.",
    },
];

/// Name of the root exception type every fault derives from.
pub const ROOT_EXCEPTION: &str = "Exception";

pub fn info_for(id: FaultKind) -> &'static FaultInfo {
    // FAULTS is ordered like the enum.
    &FAULTS[id as usize]
}

pub fn as_str(id: FaultKind) -> &'static str {
    info_for(id).canonical
}

pub fn from_str(name: &str) -> Option<FaultKind> {
    FAULTS.iter().find(|f| f.canonical == name).map(|f| f.id)
}

pub fn default_message(id: FaultKind) -> &'static str {
    info_for(id).message
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(as_str(*self))
    }
}

impl NumFault {
    /// Fault raised when a numeric kernel fails at runtime.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            NumFault::Overflow => FaultKind::Overflow,
            NumFault::DivideByZero => FaultKind::DivideByZero,
            NumFault::KindMismatch { .. } | NumFault::NotIntegral(_) => FaultKind::InvalidOperation,
        }
    }
}
