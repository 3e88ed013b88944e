//! End-to-end semantics: trees are compiled and executed on the stack machine.
//!
//! Run with: `cargo test --test semantics_tests`

use std::sync::Arc;

use exprc::backend::{CompileOptions, CompiledFn, Compiler, ResolvedLambda};
use exprc::ir::{AssignOp, BinaryOp, CatchBlock, Expr, LabelTarget, LambdaExpr, SwitchCase, Variable};
use exprc_core::{FaultKind, Tri};
use exprc_vm::{Instr, Intrinsic, Machine, MethodRef, RuntimeError, Ty, TypeRegistry, Value};

// =============================================================================
// Helpers
// =============================================================================

fn compile(registry: &Arc<TypeRegistry>, options: CompileOptions, resolved: ResolvedLambda) -> CompiledFn {
    Compiler::new(Arc::clone(registry), options)
        .compile(&resolved)
        .expect("tree should compile")
}

fn run(registry: &Arc<TypeRegistry>, compiled: &CompiledFn, args: Vec<Value>) -> Result<Value, RuntimeError> {
    Machine::new(Arc::clone(registry)).invoke(&compiled.callable, args)
}

fn eval(lambda: LambdaExpr, options: CompileOptions, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let registry = Arc::new(TypeRegistry::new());
    let compiled = compile(&registry, options, ResolvedLambda::new(lambda));
    run(&registry, &compiled, args)
}

fn fault(result: Result<Value, RuntimeError>) -> Option<FaultKind> {
    result.expect_err("expected a runtime fault").fault()
}

/// `log.Add(n)` on a `List<int>` parameter.
fn log(list: &Variable, n: i32) -> Expr {
    Expr::call(
        MethodRef::Intrinsic(Intrinsic::ListAdd(Ty::I32)),
        Some(Expr::var(list)),
        vec![Expr::int(n)],
        Ty::Void,
    )
}

fn log_items(list: &Value) -> Vec<Value> {
    match list {
        Value::List(l) => l.items.borrow().clone(),
        other => panic!("expected list, got {:?}", other),
    }
}

fn ints(items: &[i32]) -> Vec<Value> {
    items.iter().map(|&i| Value::from(i)).collect()
}

fn opt_bool(t: Tri) -> Value {
    match t.to_option() {
        Some(b) => Value::some(b),
        None => Value::none(),
    }
}

// =============================================================================
// Checked and unchecked arithmetic
// =============================================================================

#[test]
fn checked_multiply_faults_on_overflow_unchecked_wraps() {
    let x = Variable::new(0, "x", Ty::I32);
    let body = |checked: bool| {
        let target = Expr::var(&x);
        let assign = Expr::assign_op(AssignOp::Mul, target, Some(Expr::int(2)));
        let assign = if checked { assign.checked() } else { assign };
        LambdaExpr::new("mul", vec![x.clone()], Ty::I32, assign)
    };

    let wrapped = eval(body(false), CompileOptions::default(), vec![Value::from(i32::MAX)]).unwrap();
    assert_eq!(wrapped, Value::from(-2));

    let checked = eval(body(true), CompileOptions::default(), vec![Value::from(i32::MAX)]);
    assert_eq!(fault(checked), Some(FaultKind::Overflow));

    let fits = eval(body(true), CompileOptions::default(), vec![Value::from(21)]).unwrap();
    assert_eq!(fits, Value::from(42));
}

#[test]
fn checked_binary_add_faults_on_overflow() {
    let x = Variable::new(0, "x", Ty::I64);
    let lambda = LambdaExpr::new("add", vec![x.clone()], Ty::I64, Expr::add(Expr::var(&x), Expr::long(1)).checked());
    let result = eval(lambda, CompileOptions::default(), vec![Value::from(i64::MAX)]);
    assert_eq!(fault(result), Some(FaultKind::Overflow));
}

#[test]
fn field_multiply_assign_checks_overflow_and_null_receivers() {
    let (registry, node, value) = node_registry();
    let n = Variable::new(0, "n", node);
    let tree = |checked: bool| {
        let target = Expr::field(Expr::var(&n), value, Ty::I32);
        let assign = Expr::assign_op(AssignOp::Mul, target, Some(Expr::int(2_000_000_000)));
        let assign = if checked { assign.checked() } else { assign };
        ResolvedLambda::new(LambdaExpr::new("scale", vec![n.clone()], Ty::I32, assign))
    };
    let node_id = registry.find_type("Node").unwrap();
    let big = || Value::new_object(node_id, vec![Value::from(2_000_000_000)]);

    let checked = compile(&registry, CompileOptions::default(), tree(true));
    assert_eq!(fault(run(&registry, &checked, vec![big()])), Some(FaultKind::Overflow));
    assert_eq!(run(&registry, &checked, vec![Value::Null]).unwrap(), Value::from(0));

    let wrapping = compile(&registry, CompileOptions::default(), tree(false));
    let target = big();
    assert_eq!(run(&registry, &wrapping, vec![target.clone()]).unwrap(), Value::from(-1_651_507_200));
    let Value::Object(obj) = &target else {
        panic!("expected an object, got {:?}", target);
    };
    assert_eq!(obj.fields.borrow()[0], Value::from(-1_651_507_200));

    let strict = compile(&registry, CompileOptions::strict(), tree(true));
    assert_eq!(fault(run(&registry, &strict, vec![Value::Null])), Some(FaultKind::NullReference));
}

// =============================================================================
// Null propagation
// =============================================================================

fn node_registry() -> (Arc<TypeRegistry>, Ty, exprc_vm::FieldRef) {
    let mut reg = TypeRegistry::new();
    let node = reg.define_class("Node", None);
    let value = reg.add_field(node, "value", Ty::I32);
    (Arc::new(reg), Ty::Class(node), value)
}

#[test]
fn null_receiver_yields_default_with_null_checks() {
    let (registry, node, value) = node_registry();
    let n = Variable::new(0, "n", node);
    let lambda = LambdaExpr::new("read", vec![n.clone()], Ty::I32, Expr::field(Expr::var(&n), value, Ty::I32));

    let compiled = compile(&registry, CompileOptions::default(), ResolvedLambda::new(lambda.clone()));
    assert_eq!(run(&registry, &compiled, vec![Value::Null]).unwrap(), Value::from(0));

    let strict = compile(&registry, CompileOptions::strict(), ResolvedLambda::new(lambda));
    assert_eq!(fault(run(&registry, &strict, vec![Value::Null])), Some(FaultKind::NullReference));
}

#[test]
fn null_chain_short_circuits_the_whole_expression() {
    let (registry, node, value) = node_registry();
    let n = Variable::new(0, "n", node);
    // n.value + 1 is 0 (not 1) when n is null: the whole expression takes its default.
    let body = Expr::add(Expr::field(Expr::var(&n), value, Ty::I32), Expr::int(1));
    let lambda = LambdaExpr::new("chain", vec![n], Ty::I32, body);
    let compiled = compile(&registry, CompileOptions::default(), ResolvedLambda::new(lambda));
    assert_eq!(run(&registry, &compiled, vec![Value::Null]).unwrap(), Value::from(0));
}

#[test]
fn coalesce_falls_back_when_the_left_chain_is_null() {
    let (registry, node, value) = node_registry();
    let n = Variable::new(0, "n", node);
    let left = Expr::convert(Expr::field(Expr::var(&n), value, Ty::I32), Ty::nullable(Ty::I32));
    let lambda = LambdaExpr::new("fallback", vec![n], Ty::I32, Expr::coalesce(left, Expr::int(-1)));
    let compiled = compile(&registry, CompileOptions::default(), ResolvedLambda::new(lambda));
    assert_eq!(run(&registry, &compiled, vec![Value::Null]).unwrap(), Value::from(-1));

    let present = Value::new_object(registry.find_type("Node").unwrap(), vec![Value::from(9)]);
    assert_eq!(run(&registry, &compiled, vec![present]).unwrap(), Value::from(9));
}

// =============================================================================
// Value-type receivers
// =============================================================================

fn counter_registry() -> (Arc<TypeRegistry>, Ty, exprc_vm::PropertyRef, MethodRef) {
    let mut reg = TypeRegistry::new();
    let counter = reg.define_struct("Counter");
    let count = reg.add_auto_property(counter, "Count", Ty::I32);
    let setter = reg.find_method(counter, "set_Count").unwrap();
    (Arc::new(reg), Ty::Struct(counter), count, setter)
}

#[test]
fn setter_call_on_a_struct_variable_mutates_it_in_place() {
    let (registry, counter, count, setter) = counter_registry();
    let c = Variable::new(0, "c", counter);
    let body = Expr::block(
        vec![c.clone()],
        vec![
            Expr::call(setter, Some(Expr::var(&c)), vec![Expr::int(5)], Ty::Void),
            Expr::property(Expr::var(&c), count, Ty::I32),
        ],
    );
    let lambda = LambdaExpr::new("set_then_read", vec![], Ty::I32, body);
    for options in [CompileOptions::default(), CompileOptions::strict()] {
        let compiled = compile(&registry, options, ResolvedLambda::new(lambda.clone()));
        assert_eq!(run(&registry, &compiled, vec![]).unwrap(), Value::from(5));
    }
}

#[test]
fn setter_call_on_a_struct_parameter_mutates_it_in_place() {
    let (registry, counter, count, setter) = counter_registry();
    let c = Variable::new(0, "c", counter.clone());
    let body = Expr::block(
        vec![],
        vec![
            Expr::call(setter, Some(Expr::var(&c)), vec![Expr::int(9)], Ty::Void),
            Expr::add(Expr::property(Expr::var(&c), count, Ty::I32), Expr::int(1)),
        ],
    );
    let lambda = LambdaExpr::new("bump", vec![c], Ty::I32, body);
    let compiled = compile(&registry, CompileOptions::strict(), ResolvedLambda::new(lambda));
    let zeroed = Value::default_for(&counter, &registry).unwrap();
    assert_eq!(run(&registry, &compiled, vec![zeroed]).unwrap(), Value::from(10));
}

#[test]
fn out_of_range_index_propagates_only_with_bounds_checks() {
    let a = Variable::new(0, "a", Ty::array(Ty::I32));
    let lambda = LambdaExpr::new("at", vec![a.clone()], Ty::I32, Expr::index(Expr::var(&a), vec![Expr::int(5)]));
    let array = || Value::new_array(Ty::I32, ints(&[1, 2]));

    let lenient = eval(lambda.clone(), CompileOptions::default().with_bounds_checks(true), vec![array()]);
    assert_eq!(lenient.unwrap(), Value::from(0));

    let plain = eval(lambda, CompileOptions::default(), vec![array()]);
    assert_eq!(fault(plain), Some(FaultKind::IndexOutOfRange));
}

// =============================================================================
// Nullable arithmetic and three-valued logic
// =============================================================================

#[test]
fn pre_increment_of_absent_int_stays_absent() {
    let x = Variable::new(0, "x", Ty::nullable(Ty::I32));
    let lambda = LambdaExpr::new("inc", vec![x.clone()], x.ty.clone(), Expr::pre_increment(Expr::var(&x)));
    assert_eq!(eval(lambda.clone(), CompileOptions::default(), vec![Value::none()]).unwrap(), Value::none());
    assert_eq!(eval(lambda, CompileOptions::default(), vec![Value::some(5)]).unwrap(), Value::some(6));
}

#[test]
fn post_increment_yields_the_old_value() {
    let x = Variable::new(0, "x", Ty::I32);
    let body = Expr::add(Expr::post_increment(Expr::var(&x)), Expr::var(&x));
    let lambda = LambdaExpr::new("post", vec![x], Ty::I32, body);
    // 5 + 6
    assert_eq!(eval(lambda, CompileOptions::default(), vec![Value::from(5)]).unwrap(), Value::from(11));
}

#[test]
fn lifted_addition_propagates_absence() {
    let a = Variable::new(0, "a", Ty::nullable(Ty::I32));
    let b = Variable::new(1, "b", Ty::nullable(Ty::I32));
    let lambda = LambdaExpr::new("sum", vec![a.clone(), b.clone()], a.ty.clone(), Expr::add(Expr::var(&a), Expr::var(&b)));
    let sum = |x: Value, y: Value| eval(lambda.clone(), CompileOptions::default(), vec![x, y]).unwrap();
    assert_eq!(sum(Value::some(2), Value::some(3)), Value::some(5));
    assert_eq!(sum(Value::none(), Value::some(3)), Value::none());
    assert_eq!(sum(Value::some(2), Value::none()), Value::none());
}

#[test]
fn three_valued_and_or_match_truth_tables() {
    let a = Variable::new(0, "a", Ty::nullable(Ty::Bool));
    let b = Variable::new(1, "b", Ty::nullable(Ty::Bool));
    let and = LambdaExpr::new("and", vec![a.clone(), b.clone()], a.ty.clone(), Expr::and_also(Expr::var(&a), Expr::var(&b)));
    let or = LambdaExpr::new("or", vec![a.clone(), b.clone()], a.ty.clone(), Expr::or_else(Expr::var(&a), Expr::var(&b)));

    let registry = Arc::new(TypeRegistry::new());
    let and = compile(&registry, CompileOptions::default(), ResolvedLambda::new(and));
    let or = compile(&registry, CompileOptions::default(), ResolvedLambda::new(or));
    for l in Tri::ALL {
        for r in Tri::ALL {
            let args = vec![opt_bool(l), opt_bool(r)];
            assert_eq!(run(&registry, &and, args.clone()).unwrap(), opt_bool(l.and(r)), "{:?} && {:?}", l, r);
            assert_eq!(run(&registry, &or, args).unwrap(), opt_bool(l.or(r)), "{:?} || {:?}", l, r);
        }
    }
}

#[test]
fn lifted_ordering_is_absent_only_when_three_valued() {
    let a = Variable::new(0, "a", Ty::nullable(Ty::I32));
    let b = Variable::new(1, "b", Ty::nullable(Ty::I32));
    let lambda = LambdaExpr::new(
        "less",
        vec![a.clone(), b.clone()],
        Ty::nullable(Ty::Bool),
        Expr::compare_lifted(BinaryOp::Lt, Expr::var(&a), Expr::var(&b)),
    );
    let three = CompileOptions::default().with_three_valued_comparisons(true);
    assert_eq!(eval(lambda.clone(), three.clone(), vec![Value::none(), Value::some(1)]).unwrap(), Value::none());
    assert_eq!(eval(lambda.clone(), three, vec![Value::some(0), Value::some(1)]).unwrap(), Value::some(true));
    assert_eq!(
        eval(lambda, CompileOptions::default(), vec![Value::none(), Value::some(1)]).unwrap(),
        Value::some(false)
    );
}

#[test]
fn lifted_equality_treats_two_absent_values_as_equal() {
    let a = Variable::new(0, "a", Ty::nullable(Ty::I32));
    let b = Variable::new(1, "b", Ty::nullable(Ty::I32));
    let lambda = LambdaExpr::new("eq", vec![a.clone(), b.clone()], Ty::Bool, Expr::eq(Expr::var(&a), Expr::var(&b)));
    let eq = |x: Value, y: Value| eval(lambda.clone(), CompileOptions::default(), vec![x, y]).unwrap();
    assert_eq!(eq(Value::none(), Value::none()), Value::from(true));
    assert_eq!(eq(Value::none(), Value::some(1)), Value::from(false));
    assert_eq!(eq(Value::some(1), Value::some(1)), Value::from(true));
}

#[test]
fn short_circuit_skips_right_operand_side_effects() {
    let list = Variable::new(0, "log", Ty::list(Ty::I32));
    let right = Expr::block(vec![], vec![log(&list, 1), Expr::bool(true)]);
    let and = LambdaExpr::new("and", vec![list.clone()], Ty::Bool, Expr::and_also(Expr::bool(false), right.clone()));
    let or = LambdaExpr::new("or", vec![list.clone()], Ty::Bool, Expr::or_else(Expr::bool(false), right));

    let skipped = Value::new_list(Ty::I32, Vec::new());
    assert_eq!(eval(and, CompileOptions::default(), vec![skipped.clone()]).unwrap(), Value::from(false));
    assert!(log_items(&skipped).is_empty());

    let evaluated = Value::new_list(Ty::I32, Vec::new());
    assert_eq!(eval(or, CompileOptions::default(), vec![evaluated.clone()]).unwrap(), Value::from(true));
    assert_eq!(log_items(&evaluated), ints(&[1]));
}

// =============================================================================
// Switch
// =============================================================================

fn int_switch() -> LambdaExpr {
    let x = Variable::new(0, "x", Ty::I32);
    let cases = (0..9)
        .map(|i| SwitchCase::new(vec![Expr::int(i * 3)], Expr::int(i * 10)))
        .collect();
    LambdaExpr::new("pick", vec![x.clone()], Ty::I32, Expr::switch(Expr::var(&x), cases, Some(Expr::int(-1))))
}

#[test]
fn hash_switch_agrees_with_linear_switch() {
    let registry = Arc::new(TypeRegistry::new());
    let hashed = compile(&registry, CompileOptions::default(), ResolvedLambda::new(int_switch()));
    let linear = compile(
        &registry,
        CompileOptions::default().with_hash_switch(false),
        ResolvedLambda::new(int_switch()),
    );
    let dispatches = |c: &CompiledFn| c.routine().code.iter().any(|i| matches!(i, Instr::HashBucket { .. }));
    assert!(dispatches(&hashed));
    assert!(!dispatches(&linear));

    for x in -3..30 {
        let h = run(&registry, &hashed, vec![Value::from(x)]).unwrap();
        let l = run(&registry, &linear, vec![Value::from(x)]).unwrap();
        assert_eq!(h, l, "x = {}", x);
    }
    assert_eq!(run(&registry, &hashed, vec![Value::from(24)]).unwrap(), Value::from(80));
    assert_eq!(run(&registry, &hashed, vec![Value::from(4)]).unwrap(), Value::from(-1));
}

#[test]
fn small_switch_stays_linear() {
    let registry = Arc::new(TypeRegistry::new());
    let compiled = compile(
        &registry,
        CompileOptions::default().with_hash_switch_threshold(10),
        ResolvedLambda::new(int_switch()),
    );
    assert!(!compiled.routine().code.iter().any(|i| matches!(i, Instr::HashBucket { .. })));
    assert_eq!(run(&registry, &compiled, vec![Value::from(6)]).unwrap(), Value::from(20));
}

#[test]
fn string_switch_dispatches_by_value() {
    let s = Variable::new(0, "s", Ty::Str);
    let names = ["zero", "one", "two", "three", "four", "five", "six", "seven"];
    let cases = names
        .iter()
        .enumerate()
        .map(|(i, name)| SwitchCase::new(vec![Expr::string(name)], Expr::int(i as i32)))
        .collect();
    let lambda = LambdaExpr::new("word", vec![s.clone()], Ty::I32, Expr::switch(Expr::var(&s), cases, Some(Expr::int(-1))));
    let registry = Arc::new(TypeRegistry::new());
    let compiled = compile(&registry, CompileOptions::default(), ResolvedLambda::new(lambda));
    assert_eq!(run(&registry, &compiled, vec![Value::str("six")]).unwrap(), Value::from(6));
    assert_eq!(run(&registry, &compiled, vec![Value::str("ten")]).unwrap(), Value::from(-1));
}

#[test]
fn absent_subject_takes_the_default_in_hash_and_linear_switches() {
    let x = Variable::new(0, "x", Ty::nullable(Ty::I32));
    let cases = (0..9)
        .map(|i| SwitchCase::new(vec![Expr::int(i * 3)], Expr::int(i * 10)))
        .collect();
    let lambda = LambdaExpr::new("pick", vec![x.clone()], Ty::I32, Expr::switch(Expr::var(&x), cases, Some(Expr::int(-1))));

    let registry = Arc::new(TypeRegistry::new());
    let hashed = compile(&registry, CompileOptions::default(), ResolvedLambda::new(lambda.clone()));
    let linear = compile(&registry, CompileOptions::default().with_hash_switch(false), ResolvedLambda::new(lambda));
    assert!(hashed.routine().code.iter().any(|i| matches!(i, Instr::HashBucket { .. })));

    for compiled in [&hashed, &linear] {
        assert_eq!(run(&registry, compiled, vec![Value::none()]).unwrap(), Value::from(-1));
        assert_eq!(run(&registry, compiled, vec![Value::some(24)]).unwrap(), Value::from(80));
        assert_eq!(run(&registry, compiled, vec![Value::some(4)]).unwrap(), Value::from(-1));
    }
}

// =============================================================================
// Auto-extend assignment
// =============================================================================

/// `Holder { child: Holder, items: int[] }` and the path `h.child.items`.
fn holder_registry() -> (Arc<TypeRegistry>, exprc_vm::TypeId, Variable, impl Fn() -> Expr) {
    let mut reg = TypeRegistry::new();
    let holder = reg.define_class("Holder", None);
    let child = reg.add_field(holder, "child", Ty::Class(holder));
    let items = reg.add_field(holder, "items", Ty::array(Ty::I32));

    let h = Variable::new(0, "h", Ty::Class(holder));
    let root = h.clone();
    let path = move || {
        Expr::field(
            Expr::field(Expr::var(&root), child, Ty::Class(holder)),
            items,
            Ty::array(Ty::I32),
        )
    };
    (Arc::new(reg), holder, h, path)
}

#[test]
fn auto_extend_creates_missing_objects_and_grows_arrays() {
    let (registry, holder, h, path) = holder_registry();
    let store = Expr::assign(Expr::index(path(), vec![Expr::int(3)]), Expr::int(7)).auto_extend();
    let result = Expr::add(
        Expr::mul(Expr::array_length(path()), Expr::int(100)),
        Expr::index(path(), vec![Expr::int(3)]),
    );
    let lambda = LambdaExpr::new("extend", vec![h], Ty::I32, Expr::block(vec![], vec![store, result]));
    let compiled = compile(&registry, CompileOptions::default(), ResolvedLambda::new(lambda));

    let root = Value::new_object(holder, vec![Value::Null, Value::Null]);
    assert_eq!(run(&registry, &compiled, vec![root]).unwrap(), Value::from(407));
}

#[test]
fn assignment_through_a_missing_receiver_is_skipped_without_auto_extend() {
    let (registry, holder, h, path) = holder_registry();
    let store = || Expr::assign(Expr::index(path(), vec![Expr::int(3)]), Expr::int(7));

    let as_value = LambdaExpr::new("store", vec![h.clone()], Ty::I32, store());
    let compiled = compile(&registry, CompileOptions::default(), ResolvedLambda::new(as_value));
    let root = Value::new_object(holder, vec![Value::Null, Value::Null]);
    assert_eq!(run(&registry, &compiled, vec![root]).unwrap(), Value::from(0));

    let as_statement = LambdaExpr::new("store", vec![h], Ty::I32, Expr::block(vec![], vec![store(), Expr::int(1)]));
    let compiled = compile(&registry, CompileOptions::default(), ResolvedLambda::new(as_statement));
    let root = Value::new_object(holder, vec![Value::Null, Value::Null]);
    assert_eq!(run(&registry, &compiled, vec![root.clone()]).unwrap(), Value::from(1));
    let Value::Object(obj) = &root else {
        panic!("expected an object, got {:?}", root);
    };
    assert_eq!(obj.fields.borrow()[0], Value::Null);
}

#[test]
fn auto_extend_pads_lists_and_obeys_the_option() {
    let list = Variable::new(0, "list", Ty::list(Ty::I32));
    let body = |extend: bool| {
        let store = Expr::assign(Expr::index(Expr::var(&list), vec![Expr::int(2)]), Expr::int(5));
        let store = if extend { store.auto_extend() } else { store };
        Expr::block(vec![], vec![store, Expr::list_count(Expr::var(&list))])
    };

    let flagged = LambdaExpr::new("pad", vec![list.clone()], Ty::I32, body(true));
    let items = Value::new_list(Ty::I32, Vec::new());
    assert_eq!(eval(flagged, CompileOptions::default(), vec![items.clone()]).unwrap(), Value::from(3));
    assert_eq!(log_items(&items), ints(&[0, 0, 5]));

    let by_option = LambdaExpr::new("pad", vec![list.clone()], Ty::I32, body(false));
    let items = Value::new_list(Ty::I32, Vec::new());
    let options = CompileOptions::default().with_auto_extend_assign(true);
    assert_eq!(eval(by_option.clone(), options, vec![items]).unwrap(), Value::from(3));

    let plain = eval(by_option, CompileOptions::default(), vec![Value::new_list(Ty::I32, Vec::new())]);
    assert_eq!(fault(plain), Some(FaultKind::IndexOutOfRange));
}

#[test]
fn helpers_are_shared_across_compilations() {
    let a = Variable::new(0, "a", Ty::array(Ty::I32));
    let store = Expr::assign(Expr::index(Expr::var(&a), vec![Expr::int(1)]), Expr::int(1)).auto_extend();
    let lambda = LambdaExpr::new("grow", vec![a], Ty::I32, store);
    let compiler = Compiler::new(Arc::new(TypeRegistry::new()), CompileOptions::default());
    let first = compiler.compile(&ResolvedLambda::new(lambda.clone())).unwrap();
    let second = compiler.compile(&ResolvedLambda::new(lambda)).unwrap();
    assert_eq!(compiler.helpers().len(), 1);
    assert_eq!(first.disassemble(compiler.registry()), second.disassemble(compiler.registry()));
}

// =============================================================================
// Protected regions
// =============================================================================

#[test]
fn try_filter_catch_finally_run_in_order() {
    let list = Variable::new(0, "log", Ty::list(Ty::I32));
    let e = Variable::new(1, "e", Ty::Class(0));
    let body = Expr::block(vec![], vec![log(&list, 1), Expr::throw(Expr::new_default(Ty::Class(0)))]);
    let handler = |accept: bool| {
        CatchBlock::new(Ty::Class(0), Some(e.clone()), log(&list, 3))
            .when(Expr::block(vec![], vec![log(&list, 2), Expr::bool(accept)]))
    };
    let tree = |accept: bool| {
        let protected = Expr::try_full(body.clone(), vec![handler(accept)], Some(log(&list, 4)), None);
        LambdaExpr::new("guarded", vec![list.clone()], Ty::Void, Expr::block(vec![], vec![protected, log(&list, 5)]))
    };

    let caught = Value::new_list(Ty::I32, Vec::new());
    eval(tree(true), CompileOptions::default(), vec![caught.clone()]).unwrap();
    assert_eq!(log_items(&caught), ints(&[1, 2, 3, 4, 5]));

    let rejected = Value::new_list(Ty::I32, Vec::new());
    let err = eval(tree(false), CompileOptions::default(), vec![rejected.clone()]).unwrap_err();
    assert!(matches!(err, RuntimeError::Unhandled { ref type_name, .. } if type_name == "Exception"));
    assert_eq!(log_items(&rejected), ints(&[1, 2, 4]));
}

#[test]
fn typed_catch_handles_runtime_faults_and_yields_a_value() {
    let x = Variable::new(0, "x", Ty::I32);
    let registry = Arc::new(TypeRegistry::new());
    let dbz = registry.exception_type(Some(FaultKind::DivideByZero));
    let divide = Expr::binary(BinaryOp::Div, Expr::int(10), Expr::var(&x));
    let tree = Expr::try_catch(divide, vec![CatchBlock::new(Ty::Class(dbz), None, Expr::int(-1))]);
    let lambda = LambdaExpr::new("safe_div", vec![x], Ty::I32, tree);
    let compiled = compile(&registry, CompileOptions::default(), ResolvedLambda::new(lambda));
    assert_eq!(run(&registry, &compiled, vec![Value::from(2)]).unwrap(), Value::from(5));
    assert_eq!(run(&registry, &compiled, vec![Value::from(0)]).unwrap(), Value::from(-1));
}

#[test]
fn fault_block_runs_only_on_exceptional_exit() {
    let list = Variable::new(0, "log", Ty::list(Ty::I32));
    let flag = Variable::new(1, "fail", Ty::Bool);
    let body = Expr::block(
        vec![],
        vec![
            log(&list, 1),
            Expr::if_then(Expr::var(&flag), Expr::throw(Expr::new_default(Ty::Class(0)))),
        ],
    );
    let lambda = LambdaExpr::new(
        "faulty",
        vec![list.clone(), flag],
        Ty::Void,
        Expr::try_fault(body, log(&list, 9)),
    );

    let quiet = Value::new_list(Ty::I32, Vec::new());
    eval(lambda.clone(), CompileOptions::default(), vec![quiet.clone(), Value::from(false)]).unwrap();
    assert_eq!(log_items(&quiet), ints(&[1]));

    let loud = Value::new_list(Ty::I32, Vec::new());
    assert!(eval(lambda, CompileOptions::default(), vec![loud.clone(), Value::from(true)]).is_err());
    assert_eq!(log_items(&loud), ints(&[1, 9]));
}

#[test]
fn return_from_inside_try_runs_finally() {
    let list = Variable::new(0, "log", Ty::list(Ty::I32));
    let ret = LabelTarget::new(0, Ty::I32);
    let body = Expr::block(vec![], vec![Expr::return_(&ret, Some(Expr::int(7))), Expr::empty()]);
    let protected = Expr::try_finally(body, log(&list, 4));
    let lambda = LambdaExpr::new(
        "early",
        vec![list.clone()],
        Ty::I32,
        Expr::block(vec![], vec![protected, Expr::label(&ret, Some(Expr::int(0)))]),
    );
    let items = Value::new_list(Ty::I32, Vec::new());
    assert_eq!(eval(lambda, CompileOptions::default(), vec![items.clone()]).unwrap(), Value::from(7));
    assert_eq!(log_items(&items), ints(&[4]));
}

// =============================================================================
// Closures
// =============================================================================

#[test]
fn nested_lambda_reads_and_writes_shared_closure_variables() {
    let y = Variable::new(1, "y", Ty::I32);
    let add = LambdaExpr::new(
        "add_captured",
        vec![y.clone()],
        Ty::I32,
        Expr::add(Expr::closure_var(0, Ty::I32), Expr::var(&y)),
    )
    .with_closure();
    let bump = LambdaExpr::new(
        "bump",
        vec![],
        Ty::Void,
        Expr::assign_op(AssignOp::Add, Expr::closure_var(0, Ty::I32), Some(Expr::int(1))),
    )
    .with_closure();

    let f = Variable::new(2, "f", bump.func_ty());
    let body = Expr::block(
        vec![f.clone()],
        vec![
            Expr::assign(Expr::closure_var(0, Ty::I32), Expr::int(10)),
            Expr::assign(Expr::var(&f), Expr::lambda(bump)),
            Expr::invoke(Expr::var(&f), vec![]),
            Expr::invoke(Expr::var(&f), vec![]),
            Expr::invoke(Expr::lambda(add), vec![Expr::int(5)]),
        ],
    );
    let outer = LambdaExpr::new("outer", vec![], Ty::I32, body).with_closure();

    let registry = Arc::new(TypeRegistry::new());
    let compiled = compile(
        &registry,
        CompileOptions::default(),
        ResolvedLambda::new(outer).with_closure(vec![Ty::I32]),
    );
    assert_eq!(compiled.units.len(), 2);
    assert_eq!(run(&registry, &compiled, vec![]).unwrap(), Value::from(17));
}

#[test]
fn returned_function_value_is_callable() {
    let x = Variable::new(0, "x", Ty::I32);
    let double = LambdaExpr::new("double", vec![x.clone()], Ty::I32, Expr::mul(Expr::var(&x), Expr::int(2)));
    let ty = double.func_ty();
    let outer = LambdaExpr::new("make", vec![], ty, Expr::lambda(double));

    let registry = Arc::new(TypeRegistry::new());
    let compiled = compile(&registry, CompileOptions::default(), ResolvedLambda::new(outer));
    let func = run(&registry, &compiled, vec![]).unwrap();
    let Value::Func(callable) = func else {
        panic!("expected a function value, got {:?}", func);
    };
    let result = Machine::new(Arc::clone(&registry)).invoke(&callable, vec![Value::from(21)]).unwrap();
    assert_eq!(result, Value::from(42));
}

#[test]
fn hoisted_constants_are_read_from_the_constants_table() {
    let lambda = LambdaExpr::new(
        "greet",
        vec![],
        Ty::Str,
        Expr::add(Expr::hoisted(0, Ty::Str), Expr::string("!")),
    )
    .with_constants();
    let registry = Arc::new(TypeRegistry::new());
    let compiled = compile(
        &registry,
        CompileOptions::default(),
        ResolvedLambda::new(lambda).with_constants(vec![Value::str("hi")]),
    );
    assert_eq!(run(&registry, &compiled, vec![]).unwrap(), Value::str("hi!"));
}
