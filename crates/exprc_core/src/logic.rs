//! Three-valued logic over optional booleans.
//!
//! [`Tri`] is the reference model for lifted `and`/`or`/`not`: the emitter folds constant operands with it and the
//! test suites use it as the oracle for generated code.
//!
//! ## Notes
//!
//! - `false` dominates `and`, `true` dominates `or`; every other combination involving `Absent` stays `Absent`.
//! - The left operand decides the result alone exactly when it is the dominating value (see [`Tri::decides_and`]).

use std::fmt;

/// An optional boolean: `False`, `True`, or no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Tri {
    False,
    True,
    Absent,
}

impl Tri {
    pub const ALL: [Tri; 3] = [Tri::False, Tri::True, Tri::Absent];

    pub fn from_option(value: Option<bool>) -> Self {
        match value {
            Some(true) => Tri::True,
            Some(false) => Tri::False,
            None => Tri::Absent,
        }
    }

    pub fn to_option(self) -> Option<bool> {
        match self {
            Tri::True => Some(true),
            Tri::False => Some(false),
            Tri::Absent => None,
        }
    }

    /// Lifted conjunction.
    pub fn and(self, rhs: Tri) -> Tri {
        match (self, rhs) {
            (Tri::False, _) | (_, Tri::False) => Tri::False,
            (Tri::True, Tri::True) => Tri::True,
            _ => Tri::Absent,
        }
    }

    /// Lifted disjunction.
    pub fn or(self, rhs: Tri) -> Tri {
        match (self, rhs) {
            (Tri::True, _) | (_, Tri::True) => Tri::True,
            (Tri::False, Tri::False) => Tri::False,
            _ => Tri::Absent,
        }
    }

    /// Lifted negation; `Absent` stays `Absent`.
    pub fn not(self) -> Tri {
        match self {
            Tri::True => Tri::False,
            Tri::False => Tri::True,
            Tri::Absent => Tri::Absent,
        }
    }

    /// Whether `self and _` is decided without looking at the right operand.
    pub fn decides_and(self) -> bool {
        self == Tri::False
    }

    /// Whether `self or _` is decided without looking at the right operand.
    pub fn decides_or(self) -> bool {
        self == Tri::True
    }

    /// Truthiness used by conditions: only `True` is taken.
    pub fn is_true(self) -> bool {
        self == Tri::True
    }
}

impl From<bool> for Tri {
    fn from(value: bool) -> Self {
        if value { Tri::True } else { Tri::False }
    }
}

impl From<Option<bool>> for Tri {
    fn from(value: Option<bool>) -> Self {
        Tri::from_option(value)
    }
}

impl fmt::Display for Tri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tri::False => "false",
            Tri::True => "true",
            Tri::Absent => "null",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_table() {
        use Tri::*;
        let expected = [
            ((False, False), False),
            ((False, True), False),
            ((False, Absent), False),
            ((True, False), False),
            ((True, True), True),
            ((True, Absent), Absent),
            ((Absent, False), False),
            ((Absent, True), Absent),
            ((Absent, Absent), Absent),
        ];
        for ((l, r), want) in expected {
            assert_eq!(l.and(r), want, "{} and {}", l, r);
        }
    }

    #[test]
    fn test_or_table() {
        use Tri::*;
        let expected = [
            ((False, False), False),
            ((False, True), True),
            ((False, Absent), Absent),
            ((True, False), True),
            ((True, True), True),
            ((True, Absent), True),
            ((Absent, False), Absent),
            ((Absent, True), True),
            ((Absent, Absent), Absent),
        ];
        for ((l, r), want) in expected {
            assert_eq!(l.or(r), want, "{} or {}", l, r);
        }
    }

    #[test]
    fn test_deciding_left_operand_ignores_right() {
        for l in Tri::ALL {
            if l.decides_and() {
                assert!(Tri::ALL.iter().all(|&r| l.and(r) == l));
            }
            if l.decides_or() {
                assert!(Tri::ALL.iter().all(|&r| l.or(r) == l));
            }
        }
    }
}
