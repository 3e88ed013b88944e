//! Golden snapshot tests for emitted code
//!
//! These tests compile small expression trees and compare the disassembly against stored snapshots. This ensures
//! changes to the emitted instruction sequences are reviewed and intentional.
//!
//! Run with: `cargo test --test codegen_snapshot_tests`
//! Review changes: `cargo insta review`

use std::sync::Arc;

use exprc::backend::{CompileOptions, Compiler, ResolvedLambda};
use exprc::ir::{Expr, LambdaExpr, Variable};
use exprc_vm::{Ty, TypeRegistry};

/// Disassemble a lambda compiled against `registry`
fn disassemble(registry: TypeRegistry, options: CompileOptions, lambda: LambdaExpr) -> String {
    let registry = Arc::new(registry);
    let compiled = Compiler::new(Arc::clone(&registry), options)
        .compile(&ResolvedLambda::new(lambda))
        .expect("tree should compile");
    compiled.disassemble(&registry)
}

#[test]
fn test_checked_add_codegen() {
    let a = Variable::new(0, "a", Ty::I32);
    let b = Variable::new(1, "b", Ty::I32);
    let lambda = LambdaExpr::new(
        "add",
        vec![a.clone(), b.clone()],
        Ty::I32,
        Expr::add(Expr::var(&a), Expr::var(&b)).checked(),
    );
    let il = disassemble(TypeRegistry::new(), CompileOptions::strict(), lambda);
    insta::assert_snapshot!("checked_add", il);
}

#[test]
fn test_null_propagating_field_read_codegen() {
    let mut registry = TypeRegistry::new();
    let node = registry.define_class("Node", None);
    let value = registry.add_field(node, "value", Ty::I32);
    let n = Variable::new(0, "n", Ty::Class(node));
    let lambda = LambdaExpr::new("read", vec![n.clone()], Ty::I32, Expr::field(Expr::var(&n), value, Ty::I32));
    let il = disassemble(registry, CompileOptions::default(), lambda);
    insta::assert_snapshot!("null_propagating_field_read", il);
}

#[test]
fn test_field_read_without_null_checks_codegen() {
    let mut registry = TypeRegistry::new();
    let node = registry.define_class("Node", None);
    let value = registry.add_field(node, "value", Ty::I32);
    let n = Variable::new(0, "n", Ty::Class(node));
    let lambda = LambdaExpr::new("read", vec![n.clone()], Ty::I32, Expr::field(Expr::var(&n), value, Ty::I32));
    let il = disassemble(registry, CompileOptions::strict(), lambda);
    insta::assert_snapshot!("field_read_without_null_checks", il);
}
