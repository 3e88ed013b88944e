//! Provide the pure semantic core shared by the `exprc` emitter and the `exprc_vm` machine.
//!
//! Both sides of the pipeline must agree on the exact meaning of an operation: the emitter folds constants and picks
//! switch buckets at compile time, the machine evaluates the same operations at runtime. Keeping the kernels here makes
//! that agreement structural instead of a matter of keeping two copies in sync.
//!
//! ## Notes
//!
//! - This is a "semantic core" crate: **no IO**, no global state, and no emitter- or machine-specific types.
//! - Current scope: width-exact numeric kernels ([`num`]), three-valued logic ([`logic`]), the fault vocabulary
//!   ([`faults`]) and switch bucket hashing ([`switch`]).

pub mod faults;
pub mod logic;
pub mod num;
pub mod switch;

pub use faults::FaultKind;
pub use logic::Tri;
pub use num::{ArithOp, BitOp, Num, NumFault, NumKind};
