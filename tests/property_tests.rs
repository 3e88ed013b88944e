//! Property-based tests for the code generator
//!
//! These tests use proptest to compare compiled code against the scalar semantics in `exprc_core` across many
//! randomly generated inputs.

use std::sync::Arc;

use exprc::backend::{CompileOptions, CompiledFn, Compiler, ResolvedLambda};
use exprc::ir::{Expr, LambdaExpr, SwitchCase, Variable};
use exprc_core::FaultKind;
use exprc_vm::{Machine, Ty, TypeRegistry, Value};
use proptest::prelude::*;

fn compile(options: CompileOptions, lambda: LambdaExpr) -> (Arc<TypeRegistry>, CompiledFn) {
    let registry = Arc::new(TypeRegistry::new());
    let compiled = Compiler::new(Arc::clone(&registry), options)
        .compile(&ResolvedLambda::new(lambda))
        .expect("tree should compile");
    (registry, compiled)
}

fn adder(checked: bool) -> LambdaExpr {
    let a = Variable::new(0, "a", Ty::I32);
    let b = Variable::new(1, "b", Ty::I32);
    let sum = Expr::add(Expr::var(&a), Expr::var(&b));
    let sum = if checked { sum.checked() } else { sum };
    LambdaExpr::new("add", vec![a, b], Ty::I32, sum)
}

fn switch_over(keys: &[i32]) -> LambdaExpr {
    let x = Variable::new(0, "x", Ty::I32);
    let cases = keys
        .iter()
        .enumerate()
        .map(|(i, &k)| SwitchCase::new(vec![Expr::int(k)], Expr::int(i as i32)))
        .collect();
    LambdaExpr::new("pick", vec![x.clone()], Ty::I32, Expr::switch(Expr::var(&x), cases, Some(Expr::int(-1))))
}

// =============================================================================
// Arithmetic Properties
// =============================================================================

proptest! {
    /// Property: unchecked addition wraps like two's complement
    #[test]
    fn unchecked_add_wraps(a in any::<i32>(), b in any::<i32>()) {
        let (registry, compiled) = compile(CompileOptions::default(), adder(false));
        let result = Machine::new(registry).invoke(&compiled.callable, vec![Value::from(a), Value::from(b)]).unwrap();
        prop_assert_eq!(result, Value::from(a.wrapping_add(b)));
    }

    /// Property: checked addition either matches exact arithmetic or faults with Overflow
    #[test]
    fn checked_add_is_exact_or_faults(a in any::<i32>(), b in any::<i32>()) {
        let (registry, compiled) = compile(CompileOptions::default(), adder(true));
        let result = Machine::new(registry).invoke(&compiled.callable, vec![Value::from(a), Value::from(b)]);
        match a.checked_add(b) {
            Some(sum) => prop_assert_eq!(result.unwrap(), Value::from(sum)),
            None => prop_assert_eq!(result.unwrap_err().fault(), Some(FaultKind::Overflow)),
        }
    }
}

// =============================================================================
// Switch Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: hash dispatch selects the same case as a linear test chain
    #[test]
    fn hash_switch_matches_linear(
        keys in prop::collection::btree_set(-50i32..50, 1..20),
        probes in prop::collection::vec(-60i32..60, 1..16),
    ) {
        let keys: Vec<i32> = keys.into_iter().collect();
        let (registry, hashed) = compile(CompileOptions::default().with_hash_switch_threshold(1), switch_over(&keys));
        let (_, linear) = compile(CompileOptions::default().with_hash_switch(false), switch_over(&keys));
        for x in probes {
            let expected = keys.iter().position(|&k| k == x).map_or(-1, |i| i as i32);
            let mut machine = Machine::new(Arc::clone(&registry));
            let h = machine.invoke(&hashed.callable, vec![Value::from(x)]).unwrap();
            let l = machine.invoke(&linear.callable, vec![Value::from(x)]).unwrap();
            prop_assert_eq!(&h, &l);
            prop_assert_eq!(h, Value::from(expected));
        }
    }
}

// =============================================================================
// Determinism
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: compiling the same tree with the same options yields identical code
    #[test]
    fn compilation_is_deterministic(keys in prop::collection::btree_set(any::<i32>(), 1..12)) {
        let keys: Vec<i32> = keys.into_iter().collect();
        let (registry, first) = compile(CompileOptions::default(), switch_over(&keys));
        let (_, second) = compile(CompileOptions::default(), switch_over(&keys));
        prop_assert_eq!(first.disassemble(&registry), second.disassemble(&registry));
    }
}
