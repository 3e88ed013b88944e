//! Hand-assembled routines exercising the machine's control flow and exception dispatch.

use std::sync::Arc;

use exprc_core::{ArithOp, FaultKind, Num};
use exprc_vm::{
    Callable, Const, Instr, Intrinsic, Machine, MethodRef, RegionKind, RegionSpec, RoutineBuilder, RuntimeError, Ty,
    TypeRegistry, Value,
};

fn run(builder: RoutineBuilder, registry: TypeRegistry, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let routine = Arc::new(builder.finish().expect("routine should finish"));
    let mut machine = Machine::new(Arc::new(registry));
    machine.invoke(&Callable::new(routine, Vec::new()), args)
}

fn int(v: i32) -> Instr {
    Instr::Ldc(Const::Num(Num::I32(v)))
}

fn log_add() -> Instr {
    Instr::Call(MethodRef::Intrinsic(Intrinsic::ListAdd(Ty::I32)))
}

fn log_items(log: &Value) -> Vec<Value> {
    match log {
        Value::List(l) => l.items.borrow().clone(),
        other => panic!("expected list, got {:?}", other),
    }
}

#[test]
fn leave_runs_enclosing_finally() {
    let mut b = RoutineBuilder::new("leave_finally", vec![Ty::list(Ty::I32)], Ty::I32);
    let mark = b.declare_local(Ty::I32);
    let (try_start, try_end, handler_end, done) = (b.define_label(), b.define_label(), b.define_label(), b.define_label());
    b.emit(Instr::MarkStack(mark));
    b.mark_label(try_start).unwrap();
    b.emit(Instr::Leave(done));
    b.mark_label(try_end).unwrap();
    b.emit(Instr::LdArg(0));
    b.emit(int(5));
    b.emit(log_add());
    b.emit(Instr::EndFinally);
    b.mark_label(handler_end).unwrap();
    b.mark_label(done).unwrap();
    b.emit(int(1));
    b.emit(Instr::Ret);
    b.add_region(RegionSpec {
        try_start,
        try_end,
        handler_start: try_end,
        handler_end,
        kind: RegionKind::Finally,
        stack_mark: mark,
    });

    let log = Value::new_list(Ty::I32, Vec::new());
    let result = run(b, TypeRegistry::new(), vec![log.clone()]).unwrap();
    assert_eq!(result, Value::from(1));
    assert_eq!(log_items(&log), vec![Value::from(5)]);
}

#[test]
fn fault_is_caught_by_matching_catch() {
    let reg = TypeRegistry::new();
    let dbz = reg.exception_type(Some(FaultKind::DivideByZero));

    let mut b = RoutineBuilder::new("catch_dbz", vec![Ty::I32], Ty::I32);
    let mark = b.declare_local(Ty::I32);
    let (try_start, try_end, handler_end, done) = (b.define_label(), b.define_label(), b.define_label(), b.define_label());
    b.emit(Instr::MarkStack(mark));
    b.mark_label(try_start).unwrap();
    b.emit(int(10));
    b.emit(Instr::LdArg(0));
    b.emit(Instr::Arith {
        op: ArithOp::Div,
        checked: false,
    });
    b.emit(Instr::StArg(0));
    b.emit(Instr::Leave(done));
    b.mark_label(try_end).unwrap();
    b.emit(Instr::Pop);
    b.emit(int(-1));
    b.emit(Instr::StArg(0));
    b.emit(Instr::Leave(done));
    b.mark_label(handler_end).unwrap();
    b.mark_label(done).unwrap();
    b.emit(Instr::LdArg(0));
    b.emit(Instr::Ret);
    b.add_region(RegionSpec {
        try_start,
        try_end,
        handler_start: try_end,
        handler_end,
        kind: RegionKind::Catch(Ty::Class(dbz)),
        stack_mark: mark,
    });
    let routine = Arc::new(b.finish().unwrap());
    let mut machine = Machine::new(Arc::new(reg));
    let f = Callable::new(routine, Vec::new());

    assert_eq!(machine.invoke(&f, vec![Value::from(2)]).unwrap(), Value::from(5));
    assert_eq!(machine.invoke(&f, vec![Value::from(0)]).unwrap(), Value::from(-1));
}

#[test]
fn filters_run_before_inner_finally() {
    let mut b = RoutineBuilder::new("two_phase", vec![Ty::list(Ty::I32)], Ty::I32);
    let mark = b.declare_local(Ty::I32);
    let try_start = b.define_label();
    let finally_start = b.define_label();
    let finally_end = b.define_label();
    let handler_start = b.define_label();
    let handler_end = b.define_label();
    let done = b.define_label();

    b.emit(Instr::MarkStack(mark));
    b.mark_label(try_start).unwrap();
    b.emit(int(1));
    b.emit(int(0));
    b.emit(Instr::Arith {
        op: ArithOp::Div,
        checked: false,
    });
    b.emit(Instr::Leave(done));
    b.mark_label(finally_start).unwrap();
    b.emit(Instr::LdArg(0));
    b.emit(int(2));
    b.emit(log_add());
    b.emit(Instr::EndFinally);
    b.mark_label(finally_end).unwrap();
    // Filter block: log 1 and accept.
    b.emit(Instr::Pop);
    b.emit(Instr::LdArg(0));
    b.emit(int(1));
    b.emit(log_add());
    b.emit(Instr::Ldc(Const::Bool(true)));
    b.emit(Instr::EndFilter);
    b.mark_label(handler_start).unwrap();
    b.emit(Instr::Pop);
    b.emit(Instr::Leave(done));
    b.mark_label(handler_end).unwrap();
    b.mark_label(done).unwrap();
    b.emit(int(7));
    b.emit(Instr::Ret);

    b.add_region(RegionSpec {
        try_start,
        try_end: finally_start,
        handler_start: finally_start,
        handler_end: finally_end,
        kind: RegionKind::Finally,
        stack_mark: mark,
    });
    b.add_region(RegionSpec {
        try_start,
        try_end: finally_end,
        handler_start,
        handler_end,
        kind: RegionKind::Filter(finally_end),
        stack_mark: mark,
    });

    let log = Value::new_list(Ty::I32, Vec::new());
    let result = run(b, TypeRegistry::new(), vec![log.clone()]).unwrap();
    assert_eq!(result, Value::from(7));
    assert_eq!(log_items(&log), vec![Value::from(1), Value::from(2)]);
}

#[test]
fn unhandled_fault_surfaces_as_runtime_error() {
    let mut reg = TypeRegistry::new();
    let node = reg.define_class("Node", None);
    let value = reg.add_field(node, "value", Ty::I32);

    let mut b = RoutineBuilder::new("deref", vec![Ty::Class(node)], Ty::I32);
    b.emit(Instr::LdArg(0));
    b.emit(Instr::LdFld(value));
    b.emit(Instr::Ret);

    let err = run(b, reg, vec![Value::Null]).unwrap_err();
    assert_eq!(err.fault(), Some(FaultKind::NullReference));
    assert!(matches!(err, RuntimeError::Unhandled { ref type_name, .. } if type_name == "NullReferenceException"));
}

#[test]
fn rethrow_propagates_current_exception() {
    let reg = TypeRegistry::new();
    let overflow = reg.exception_type(Some(FaultKind::Overflow));

    let mut b = RoutineBuilder::new("rethrow", vec![], Ty::I32);
    let mark = b.declare_local(Ty::I32);
    let (try_start, try_end, handler_end) = (b.define_label(), b.define_label(), b.define_label());
    b.emit(Instr::MarkStack(mark));
    b.mark_label(try_start).unwrap();
    b.emit(int(i32::MAX));
    b.emit(int(1));
    b.emit(Instr::Arith {
        op: ArithOp::Add,
        checked: true,
    });
    b.emit(Instr::Ret);
    b.mark_label(try_end).unwrap();
    b.emit(Instr::Pop);
    b.emit(Instr::Rethrow);
    b.mark_label(handler_end).unwrap();
    b.emit(int(0));
    b.emit(Instr::Ret);
    b.add_region(RegionSpec {
        try_start,
        try_end,
        handler_start: try_end,
        handler_end,
        kind: RegionKind::Catch(Ty::Class(overflow)),
        stack_mark: mark,
    });

    let err = run(b, reg, vec![]).unwrap_err();
    assert_eq!(err.fault(), Some(FaultKind::Overflow));
}

#[test]
fn reset_stack_discards_partial_values() {
    let mut b = RoutineBuilder::new("landing_pad", vec![], Ty::I32);
    let mark = b.declare_local(Ty::I32);
    b.emit(Instr::MarkStack(mark));
    b.emit(int(1));
    b.emit(int(2));
    b.emit(int(3));
    b.emit(Instr::ResetStack(mark));
    b.emit(int(9));
    b.emit(Instr::Ret);
    assert_eq!(run(b, TypeRegistry::new(), vec![]).unwrap(), Value::from(9));
}

#[test]
fn invoker_prepends_captured_values() {
    let mut child = RoutineBuilder::new("add", vec![Ty::I32, Ty::I32], Ty::I32);
    child.emit(Instr::LdArg(0));
    child.emit(Instr::LdArg(1));
    child.emit(Instr::Arith {
        op: ArithOp::Add,
        checked: false,
    });
    child.emit(Instr::Ret);
    let child = Arc::new(child.finish().unwrap());

    let mut b = RoutineBuilder::new("outer", vec![], Ty::I32);
    let index = b.add_child(child);
    b.emit(Instr::Ldc(Const::Num(Num::I32(40))));
    b.emit(Instr::LdFtn(index));
    b.emit(Instr::NewInvoker { captured: 1 });
    b.emit(int(2));
    b.emit(Instr::CallInvoker { argc: 1 });
    b.emit(Instr::Ret);
    assert_eq!(run(b, TypeRegistry::new(), vec![]).unwrap(), Value::from(42));
}

#[test]
fn array_bounds_fault() {
    let mut b = RoutineBuilder::new("oob", vec![], Ty::I32);
    b.emit(int(2));
    b.emit(Instr::NewArr(Ty::I32));
    b.emit(int(2));
    b.emit(Instr::LdElem);
    b.emit(Instr::Ret);
    let err = run(b, TypeRegistry::new(), vec![]).unwrap_err();
    assert_eq!(err.fault(), Some(FaultKind::IndexOutOfRange));
}
