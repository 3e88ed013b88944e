//! Numeric values and the arithmetic kernels shared by the emitter and the machine.
//!
//! Every operation here is defined at the operand's declared width: an `I16` addition overflows at the `i16` range,
//! not after promotion. Operands of a binary operation must share a [`NumKind`] (shift counts excepted); the emitter
//! inserts conversions before the operation, the kernels never coerce.
//!
//! ## Overflow policy
//!
//! - `checked = true`: `Add`/`Sub`/`Mul`/`Neg` report [`NumFault::Overflow`] instead of wrapping.
//! - `checked = false`: twos-complement wrapping.
//! - Integer `Div`/`Rem` by zero always report [`NumFault::DivideByZero`]; `MIN / -1` and `MIN % -1` always report
//!   [`NumFault::Overflow`], whatever the mode.
//! - Floating point follows IEEE 754 in both modes.

use std::cmp::Ordering;
use std::fmt;

/// Concrete numeric representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NumKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl NumKind {
    pub const ALL: [NumKind; 10] = [
        NumKind::I8,
        NumKind::U8,
        NumKind::I16,
        NumKind::U16,
        NumKind::I32,
        NumKind::U32,
        NumKind::I64,
        NumKind::U64,
        NumKind::F32,
        NumKind::F64,
    ];

    pub fn is_float(self) -> bool {
        matches!(self, NumKind::F32 | NumKind::F64)
    }

    pub fn is_integral(self) -> bool {
        !self.is_float()
    }

    /// Floats count as signed.
    pub fn is_signed(self) -> bool {
        !matches!(self, NumKind::U8 | NumKind::U16 | NumKind::U32 | NumKind::U64)
    }

    pub fn bits(self) -> u32 {
        match self {
            NumKind::I8 | NumKind::U8 => 8,
            NumKind::I16 | NumKind::U16 => 16,
            NumKind::I32 | NumKind::U32 | NumKind::F32 => 32,
            NumKind::I64 | NumKind::U64 | NumKind::F64 => 64,
        }
    }

    /// Suffix used by conversion opcodes in disassembly (`conv.ovf.i4`).
    pub fn il_suffix(self) -> &'static str {
        match self {
            NumKind::I8 => "i1",
            NumKind::U8 => "u1",
            NumKind::I16 => "i2",
            NumKind::U16 => "u2",
            NumKind::I32 => "i4",
            NumKind::U32 => "u4",
            NumKind::I64 => "i8",
            NumKind::U64 => "u8",
            NumKind::F32 => "r4",
            NumKind::F64 => "r8",
        }
    }

    /// Surface spelling of the kind (`int`, `ulong`, ...).
    pub fn name(self) -> &'static str {
        match self {
            NumKind::I8 => "sbyte",
            NumKind::U8 => "byte",
            NumKind::I16 => "short",
            NumKind::U16 => "ushort",
            NumKind::I32 => "int",
            NumKind::U32 => "uint",
            NumKind::I64 => "long",
            NumKind::U64 => "ulong",
            NumKind::F32 => "float",
            NumKind::F64 => "double",
        }
    }
}

impl fmt::Display for NumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A numeric scalar tagged with its representation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Num {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

/// Arithmetic operator evaluated by [`Num::arith`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Rem => "rem",
        }
    }
}

/// Bitwise operator evaluated by [`Num::bitwise`]. Integral kinds only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BitOp {
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BitOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BitOp::And => "and",
            BitOp::Or => "or",
            BitOp::Xor => "xor",
            BitOp::Shl => "shl",
            BitOp::Shr => "shr",
        }
    }
}

/// Failure reported by a numeric kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumFault {
    Overflow,
    DivideByZero,
    KindMismatch { left: NumKind, right: NumKind },
    NotIntegral(NumKind),
}

impl fmt::Display for NumFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumFault::Overflow => f.write_str("arithmetic operation resulted in an overflow"),
            NumFault::DivideByZero => f.write_str("attempted to divide by zero"),
            NumFault::KindMismatch { left, right } => {
                write!(f, "operand kinds differ: {} and {}", left, right)
            }
            NumFault::NotIntegral(kind) => write!(f, "operation requires an integral operand, found {}", kind),
        }
    }
}

impl std::error::Error for NumFault {}

macro_rules! int_arith {
    ($a:expr, $b:expr, $op:expr, $checked:expr, $variant:ident) => {{
        let (a, b) = ($a, $b);
        let value = match $op {
            ArithOp::Add if $checked => a.checked_add(b).ok_or(NumFault::Overflow)?,
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub if $checked => a.checked_sub(b).ok_or(NumFault::Overflow)?,
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul if $checked => a.checked_mul(b).ok_or(NumFault::Overflow)?,
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Div => {
                if b == 0 {
                    return Err(NumFault::DivideByZero);
                }
                a.checked_div(b).ok_or(NumFault::Overflow)?
            }
            ArithOp::Rem => {
                if b == 0 {
                    return Err(NumFault::DivideByZero);
                }
                a.checked_rem(b).ok_or(NumFault::Overflow)?
            }
        };
        Num::$variant(value)
    }};
}

macro_rules! float_arith {
    ($a:expr, $b:expr, $op:expr, $variant:ident) => {{
        let (a, b) = ($a, $b);
        Num::$variant(match $op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Rem => a % b,
        })
    }};
}

macro_rules! int_bitwise {
    ($a:expr, $b:expr, $op:expr, $variant:ident) => {{
        let (a, b) = ($a, $b);
        Num::$variant(match $op {
            BitOp::And => a & b,
            BitOp::Or => a | b,
            BitOp::Xor => a ^ b,
            BitOp::Shl | BitOp::Shr => unreachable!("shifts are dispatched separately"),
        })
    }};
}

macro_rules! int_shift {
    ($a:expr, $count:expr, $op:expr, $variant:ident) => {{
        // wrapping_shl/shr mask the count to the operand width.
        let (a, count) = ($a, $count);
        Num::$variant(match $op {
            BitOp::Shl => a.wrapping_shl(count),
            _ => a.wrapping_shr(count),
        })
    }};
}

macro_rules! from_i128 {
    ($value:expr, $to:expr, $checked:expr) => {{
        let v: i128 = $value;
        if $checked {
            match $to {
                NumKind::I8 => Num::I8(i8::try_from(v).map_err(|_| NumFault::Overflow)?),
                NumKind::U8 => Num::U8(u8::try_from(v).map_err(|_| NumFault::Overflow)?),
                NumKind::I16 => Num::I16(i16::try_from(v).map_err(|_| NumFault::Overflow)?),
                NumKind::U16 => Num::U16(u16::try_from(v).map_err(|_| NumFault::Overflow)?),
                NumKind::I32 => Num::I32(i32::try_from(v).map_err(|_| NumFault::Overflow)?),
                NumKind::U32 => Num::U32(u32::try_from(v).map_err(|_| NumFault::Overflow)?),
                NumKind::I64 => Num::I64(i64::try_from(v).map_err(|_| NumFault::Overflow)?),
                NumKind::U64 => Num::U64(u64::try_from(v).map_err(|_| NumFault::Overflow)?),
                NumKind::F32 => Num::F32(v as f32),
                NumKind::F64 => Num::F64(v as f64),
            }
        } else {
            match $to {
                NumKind::I8 => Num::I8(v as i8),
                NumKind::U8 => Num::U8(v as u8),
                NumKind::I16 => Num::I16(v as i16),
                NumKind::U16 => Num::U16(v as u16),
                NumKind::I32 => Num::I32(v as i32),
                NumKind::U32 => Num::U32(v as u32),
                NumKind::I64 => Num::I64(v as i64),
                NumKind::U64 => Num::U64(v as u64),
                NumKind::F32 => Num::F32(v as f32),
                NumKind::F64 => Num::F64(v as f64),
            }
        }
    }};
}

impl Num {
    pub fn kind(&self) -> NumKind {
        match self {
            Num::I8(_) => NumKind::I8,
            Num::U8(_) => NumKind::U8,
            Num::I16(_) => NumKind::I16,
            Num::U16(_) => NumKind::U16,
            Num::I32(_) => NumKind::I32,
            Num::U32(_) => NumKind::U32,
            Num::I64(_) => NumKind::I64,
            Num::U64(_) => NumKind::U64,
            Num::F32(_) => NumKind::F32,
            Num::F64(_) => NumKind::F64,
        }
    }

    /// The zero value of `kind`.
    pub fn zero(kind: NumKind) -> Num {
        Num::I32(0).cast(kind)
    }

    /// The unit value of `kind`, used by increment/decrement.
    pub fn one(kind: NumKind) -> Num {
        Num::I32(1).cast(kind)
    }

    pub fn is_zero(&self) -> bool {
        match *self {
            Num::F32(v) => v == 0.0,
            Num::F64(v) => v == 0.0,
            other => other.to_i128() == Some(0),
        }
    }

    /// Exact integer value for integral kinds.
    pub fn to_i128(&self) -> Option<i128> {
        match *self {
            Num::I8(v) => Some(v as i128),
            Num::U8(v) => Some(v as i128),
            Num::I16(v) => Some(v as i128),
            Num::U16(v) => Some(v as i128),
            Num::I32(v) => Some(v as i128),
            Num::U32(v) => Some(v as i128),
            Num::I64(v) => Some(v as i128),
            Num::U64(v) => Some(v as i128),
            Num::F32(_) | Num::F64(_) => None,
        }
    }

    pub fn to_f64(&self) -> f64 {
        match *self {
            Num::F32(v) => v as f64,
            Num::F64(v) => v,
            other => other.to_i128().map(|v| v as f64).unwrap_or(f64::NAN),
        }
    }

    /// Value as an `i64`, reinterpreting `u64` bits and truncating floats.
    pub fn as_i64(&self) -> i64 {
        match *self {
            Num::U64(v) => v as i64,
            Num::F32(v) => v as i64,
            Num::F64(v) => v as i64,
            other => other.to_i128().map(|v| v as i64).unwrap_or_default(),
        }
    }

    /// Unchecked conversion (`conv.*`): integers truncate, float to integer saturates.
    pub fn cast(self, to: NumKind) -> Num {
        match self.convert(to, false) {
            Ok(n) => n,
            // Unchecked conversions cannot fail.
            Err(_) => Num::zero(to),
        }
    }

    /// Convert to `to`; with `checked`, out-of-range values (and NaN into an integer) report overflow.
    pub fn convert(self, to: NumKind, checked: bool) -> Result<Num, NumFault> {
        if let Some(v) = self.to_i128() {
            return Ok(from_i128!(v, to, checked));
        }
        let x = self.to_f64();
        match to {
            NumKind::F32 => Ok(Num::F32(x as f32)),
            NumKind::F64 => Ok(Num::F64(x)),
            _ if checked => {
                if !x.is_finite() || x.abs() >= 1.0e38 {
                    return Err(NumFault::Overflow);
                }
                Ok(from_i128!(x.trunc() as i128, to, true))
            }
            NumKind::I8 => Ok(Num::I8(x as i8)),
            NumKind::U8 => Ok(Num::U8(x as u8)),
            NumKind::I16 => Ok(Num::I16(x as i16)),
            NumKind::U16 => Ok(Num::U16(x as u16)),
            NumKind::I32 => Ok(Num::I32(x as i32)),
            NumKind::U32 => Ok(Num::U32(x as u32)),
            NumKind::I64 => Ok(Num::I64(x as i64)),
            NumKind::U64 => Ok(Num::U64(x as u64)),
        }
    }

    /// Apply `op` to two operands of the same kind.
    pub fn arith(self, op: ArithOp, rhs: Num, checked: bool) -> Result<Num, NumFault> {
        Ok(match (self, rhs) {
            (Num::I8(a), Num::I8(b)) => int_arith!(a, b, op, checked, I8),
            (Num::U8(a), Num::U8(b)) => int_arith!(a, b, op, checked, U8),
            (Num::I16(a), Num::I16(b)) => int_arith!(a, b, op, checked, I16),
            (Num::U16(a), Num::U16(b)) => int_arith!(a, b, op, checked, U16),
            (Num::I32(a), Num::I32(b)) => int_arith!(a, b, op, checked, I32),
            (Num::U32(a), Num::U32(b)) => int_arith!(a, b, op, checked, U32),
            (Num::I64(a), Num::I64(b)) => int_arith!(a, b, op, checked, I64),
            (Num::U64(a), Num::U64(b)) => int_arith!(a, b, op, checked, U64),
            (Num::F32(a), Num::F32(b)) => float_arith!(a, b, op, F32),
            (Num::F64(a), Num::F64(b)) => float_arith!(a, b, op, F64),
            (l, r) => {
                return Err(NumFault::KindMismatch {
                    left: l.kind(),
                    right: r.kind(),
                });
            }
        })
    }

    /// Arithmetic negation. Checked negation of `MIN` or of a non-zero unsigned value overflows.
    pub fn neg(self, checked: bool) -> Result<Num, NumFault> {
        macro_rules! neg_int {
            ($v:expr, $variant:ident) => {
                if checked {
                    Num::$variant($v.checked_neg().ok_or(NumFault::Overflow)?)
                } else {
                    Num::$variant($v.wrapping_neg())
                }
            };
        }
        Ok(match self {
            Num::I8(v) => neg_int!(v, I8),
            Num::U8(v) => neg_int!(v, U8),
            Num::I16(v) => neg_int!(v, I16),
            Num::U16(v) => neg_int!(v, U16),
            Num::I32(v) => neg_int!(v, I32),
            Num::U32(v) => neg_int!(v, U32),
            Num::I64(v) => neg_int!(v, I64),
            Num::U64(v) => neg_int!(v, U64),
            Num::F32(v) => Num::F32(-v),
            Num::F64(v) => Num::F64(-v),
        })
    }

    /// Bitwise complement.
    pub fn not(self) -> Result<Num, NumFault> {
        Ok(match self {
            Num::I8(v) => Num::I8(!v),
            Num::U8(v) => Num::U8(!v),
            Num::I16(v) => Num::I16(!v),
            Num::U16(v) => Num::U16(!v),
            Num::I32(v) => Num::I32(!v),
            Num::U32(v) => Num::U32(!v),
            Num::I64(v) => Num::I64(!v),
            Num::U64(v) => Num::U64(!v),
            other => return Err(NumFault::NotIntegral(other.kind())),
        })
    }

    /// Bitwise operation. Shift counts may be of any integral kind and are masked to the operand width.
    pub fn bitwise(self, op: BitOp, rhs: Num) -> Result<Num, NumFault> {
        if matches!(op, BitOp::Shl | BitOp::Shr) {
            let count = rhs.to_i128().ok_or(NumFault::NotIntegral(rhs.kind()))? as u32;
            return Ok(match self {
                Num::I8(a) => int_shift!(a, count, op, I8),
                Num::U8(a) => int_shift!(a, count, op, U8),
                Num::I16(a) => int_shift!(a, count, op, I16),
                Num::U16(a) => int_shift!(a, count, op, U16),
                Num::I32(a) => int_shift!(a, count, op, I32),
                Num::U32(a) => int_shift!(a, count, op, U32),
                Num::I64(a) => int_shift!(a, count, op, I64),
                Num::U64(a) => int_shift!(a, count, op, U64),
                other => return Err(NumFault::NotIntegral(other.kind())),
            });
        }
        Ok(match (self, rhs) {
            (Num::I8(a), Num::I8(b)) => int_bitwise!(a, b, op, I8),
            (Num::U8(a), Num::U8(b)) => int_bitwise!(a, b, op, U8),
            (Num::I16(a), Num::I16(b)) => int_bitwise!(a, b, op, I16),
            (Num::U16(a), Num::U16(b)) => int_bitwise!(a, b, op, U16),
            (Num::I32(a), Num::I32(b)) => int_bitwise!(a, b, op, I32),
            (Num::U32(a), Num::U32(b)) => int_bitwise!(a, b, op, U32),
            (Num::I64(a), Num::I64(b)) => int_bitwise!(a, b, op, I64),
            (Num::U64(a), Num::U64(b)) => int_bitwise!(a, b, op, U64),
            (l, r) if l.kind() != r.kind() => {
                return Err(NumFault::KindMismatch {
                    left: l.kind(),
                    right: r.kind(),
                });
            }
            (l, _) => return Err(NumFault::NotIntegral(l.kind())),
        })
    }

    /// Ordering of two operands of the same kind; `None` when a float operand is NaN.
    pub fn compare(self, rhs: Num) -> Result<Option<Ordering>, NumFault> {
        Ok(match (self, rhs) {
            (Num::F32(a), Num::F32(b)) => a.partial_cmp(&b),
            (Num::F64(a), Num::F64(b)) => a.partial_cmp(&b),
            (l, r) if l.kind() == r.kind() => l.to_i128().partial_cmp(&r.to_i128()),
            (l, r) => {
                return Err(NumFault::KindMismatch {
                    left: l.kind(),
                    right: r.kind(),
                });
            }
        })
    }
}

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Num::I8(v) => write!(f, "{}", v),
            Num::U8(v) => write!(f, "{}", v),
            Num::I16(v) => write!(f, "{}", v),
            Num::U16(v) => write!(f, "{}", v),
            Num::I32(v) => write!(f, "{}", v),
            Num::U32(v) => write!(f, "{}", v),
            Num::I64(v) => write!(f, "{}", v),
            Num::U64(v) => write!(f, "{}", v),
            Num::F32(v) => write!(f, "{:?}", v),
            Num::F64(v) => write!(f, "{:?}", v),
        }
    }
}

macro_rules! impl_from_prim {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for Num {
            fn from(v: $t) -> Self {
                Num::$variant(v)
            }
        })*
    };
}

impl_from_prim!(
    i8 => I8, u8 => U8, i16 => I16, u16 => U16, i32 => I32,
    u32 => U32, i64 => I64, u64 => U64, f32 => F32, f64 => F64,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_add_overflows_at_declared_width() {
        let r = Num::I16(i16::MAX).arith(ArithOp::Add, Num::I16(1), true);
        assert_eq!(r, Err(NumFault::Overflow));
        let r = Num::I16(i16::MAX).arith(ArithOp::Add, Num::I16(1), false);
        assert_eq!(r, Ok(Num::I16(i16::MIN)));
    }

    #[test]
    fn test_unsigned_subtraction_underflow() {
        assert_eq!(
            Num::U32(0).arith(ArithOp::Sub, Num::U32(1), true),
            Err(NumFault::Overflow)
        );
        assert_eq!(
            Num::U32(0).arith(ArithOp::Sub, Num::U32(1), false),
            Ok(Num::U32(u32::MAX))
        );
    }

    #[test]
    fn test_division_faults_ignore_mode() {
        assert_eq!(
            Num::I32(1).arith(ArithOp::Div, Num::I32(0), false),
            Err(NumFault::DivideByZero)
        );
        assert_eq!(
            Num::I32(i32::MIN).arith(ArithOp::Div, Num::I32(-1), false),
            Err(NumFault::Overflow)
        );
        assert_eq!(
            Num::I64(i64::MIN).arith(ArithOp::Rem, Num::I64(-1), false),
            Err(NumFault::Overflow)
        );
    }

    #[test]
    fn test_float_division_by_zero_is_infinite() {
        let r = Num::F64(1.0).arith(ArithOp::Div, Num::F64(0.0), true).unwrap();
        assert_eq!(r, Num::F64(f64::INFINITY));
    }

    #[test]
    fn test_kind_mismatch_is_reported() {
        let r = Num::I32(1).arith(ArithOp::Add, Num::I64(1), false);
        assert_eq!(
            r,
            Err(NumFault::KindMismatch {
                left: NumKind::I32,
                right: NumKind::I64
            })
        );
    }

    #[test]
    fn test_checked_negation() {
        assert_eq!(Num::I32(i32::MIN).neg(true), Err(NumFault::Overflow));
        assert_eq!(Num::I32(i32::MIN).neg(false), Ok(Num::I32(i32::MIN)));
        assert_eq!(Num::U8(1).neg(true), Err(NumFault::Overflow));
        assert_eq!(Num::U8(0).neg(true), Ok(Num::U8(0)));
    }

    #[test]
    fn test_shift_count_is_masked() {
        assert_eq!(Num::I32(1).bitwise(BitOp::Shl, Num::I32(33)), Ok(Num::I32(2)));
        assert_eq!(Num::I32(-8).bitwise(BitOp::Shr, Num::I32(1)), Ok(Num::I32(-4)));
        assert_eq!(
            Num::U32(0x8000_0000).bitwise(BitOp::Shr, Num::I32(31)),
            Ok(Num::U32(1))
        );
    }

    #[test]
    fn test_checked_conversions() {
        assert_eq!(Num::I64(300).convert(NumKind::U8, true), Err(NumFault::Overflow));
        assert_eq!(Num::I64(300).convert(NumKind::U8, false), Ok(Num::U8(44)));
        assert_eq!(Num::I32(-1).convert(NumKind::U32, true), Err(NumFault::Overflow));
        assert_eq!(Num::F64(f64::NAN).convert(NumKind::I32, true), Err(NumFault::Overflow));
        assert_eq!(Num::F64(3.9).convert(NumKind::I32, true), Ok(Num::I32(3)));
        assert_eq!(
            Num::F64(18446744073709551616.0).convert(NumKind::U64, true),
            Err(NumFault::Overflow)
        );
    }

    #[test]
    fn test_compare_nan_is_unordered() {
        assert_eq!(Num::F64(f64::NAN).compare(Num::F64(1.0)), Ok(None));
        assert_eq!(Num::U64(u64::MAX).compare(Num::U64(1)), Ok(Some(Ordering::Greater)));
    }

    #[test]
    fn test_zero_and_one_per_kind() {
        for kind in NumKind::ALL {
            assert!(Num::zero(kind).is_zero());
            assert_eq!(Num::one(kind).kind(), kind);
            assert!(!Num::one(kind).is_zero());
        }
    }
}
