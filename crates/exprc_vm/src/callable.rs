//! Function values.

use std::sync::Arc;

use crate::routine::Routine;
use crate::value::Value;

/// A routine bundled with the leading arguments it was closed over (constants and/or closure arrays).
///
/// This is both the result of a compilation and the runtime representation of function values created by
/// `newinvoker`. Invoking it prepends `captured` to the caller's arguments.
#[derive(Debug, Clone)]
pub struct Callable {
    pub routine: Arc<Routine>,
    pub captured: Vec<Value>,
}

impl Callable {
    pub fn new(routine: Arc<Routine>, captured: Vec<Value>) -> Self {
        Self { routine, captured }
    }

    /// Number of arguments callers supply.
    pub fn arity(&self) -> usize {
        self.routine.params.len().saturating_sub(self.captured.len())
    }
}
