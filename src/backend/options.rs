//! Compilation options.
//!
//! Options are fixed for one [`crate::backend::Compiler`]; compiling the same tree twice with the same options yields
//! equivalent code.

use serde::{Deserialize, Serialize};

/// Default minimum number of constant case tests before a switch dispatches through a hash table.
pub const DEFAULT_HASH_SWITCH_THRESHOLD: usize = 7;

/// Switches controlling null propagation, bounds checking, auto-extension and switch lowering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// A null receiver or absent optional short-circuits the enclosing expression to its default value instead of
    /// faulting.
    pub null_checks: bool,
    /// An out-of-range index short-circuits like a null receiver instead of faulting.
    pub bounds_checks: bool,
    /// Reads create missing intermediate objects and grow collections.
    pub auto_extend_read: bool,
    /// Assignments create missing intermediate objects and grow collections.
    pub auto_extend_assign: bool,
    /// Lifted ordering comparisons typed `bool?` yield an absent result for absent operands (otherwise `false`).
    pub three_valued_comparisons: bool,
    /// Allow hash dispatch for switches over constant integer, boolean or string cases.
    pub hash_switch: bool,
    pub hash_switch_threshold: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            null_checks: true,
            bounds_checks: false,
            auto_extend_read: false,
            auto_extend_assign: false,
            three_valued_comparisons: false,
            hash_switch: true,
            hash_switch_threshold: DEFAULT_HASH_SWITCH_THRESHOLD,
        }
    }
}

impl CompileOptions {
    /// Plain semantics: every null dereference and bad index faults.
    pub fn strict() -> Self {
        Self {
            null_checks: false,
            ..Self::default()
        }
    }

    pub fn with_null_checks(mut self, enabled: bool) -> Self {
        self.null_checks = enabled;
        self
    }

    pub fn with_bounds_checks(mut self, enabled: bool) -> Self {
        self.bounds_checks = enabled;
        self
    }

    pub fn with_auto_extend_read(mut self, enabled: bool) -> Self {
        self.auto_extend_read = enabled;
        self
    }

    pub fn with_auto_extend_assign(mut self, enabled: bool) -> Self {
        self.auto_extend_assign = enabled;
        self
    }

    pub fn with_three_valued_comparisons(mut self, enabled: bool) -> Self {
        self.three_valued_comparisons = enabled;
        self
    }

    pub fn with_hash_switch(mut self, enabled: bool) -> Self {
        self.hash_switch = enabled;
        self
    }

    pub fn with_hash_switch_threshold(mut self, threshold: usize) -> Self {
        self.hash_switch_threshold = threshold;
        self
    }

    /// Whether any check can branch to a null-propagation exit.
    pub fn uses_exits(&self) -> bool {
        self.null_checks || self.bounds_checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let opts: CompileOptions = serde_json::from_str(r#"{"bounds_checks": true}"#).unwrap_or_default();
        assert!(opts.bounds_checks);
        assert!(opts.null_checks);
        assert_eq!(opts.hash_switch_threshold, DEFAULT_HASH_SWITCH_THRESHOLD);
    }

    #[test]
    fn test_strict_disables_exits() {
        assert!(!CompileOptions::strict().uses_exits());
        assert!(CompileOptions::strict().with_bounds_checks(true).uses_exits());
    }
}
