//! Switch lowering: a linear chain of equality tests, or hash-bucket dispatch.
//!
//! Hash dispatch applies when every test is a constant integer, boolean or string (nulls allowed), there is no custom
//! comparison, and the number of tests reaches the configured threshold. Buckets are assigned at compile time with
//! [`exprc_core::switch::bucket_of`]; the generated code recomputes the bucket of the switch value at runtime, jumps
//! into that bucket and verifies each candidate with an equality test, so a hash collision can never select the
//! wrong case.
//!
//! ## Notes
//!
//! - Duplicate tests resolve to the first case that lists them under both strategies.
//! - An absent switch value selects the case testing for null, or the default.

use exprc_core::Num;
use exprc_core::switch::{self, SwitchKey};
use exprc_vm::{Const, Instr, Label, MethodRef, Ty};

use super::super::nullable::Operand;
use super::super::{Emitted, ResultShape};
use crate::backend::context::EmitContext;
use crate::backend::errors::CompileError;
use crate::ir::{BinaryOp, Expr, ExprKind, Literal, SwitchCase};

/// A constant case test in hashable form.
#[derive(Debug, Clone)]
enum CaseKey {
    Null,
    Int(Num),
    Bool(bool),
    Str(String),
}

impl CaseKey {
    fn of(test: &Expr) -> Option<CaseKey> {
        match &test.kind {
            ExprKind::Constant(Literal::Null) => Some(CaseKey::Null),
            ExprKind::Constant(Literal::Num(n)) if n.kind().is_integral() => Some(CaseKey::Int(*n)),
            ExprKind::Constant(Literal::Bool(b)) => Some(CaseKey::Bool(*b)),
            ExprKind::Constant(Literal::Str(s)) => Some(CaseKey::Str(s.clone())),
            _ => None,
        }
    }

    fn switch_key(&self) -> Option<SwitchKey<'_>> {
        match self {
            CaseKey::Null => None,
            CaseKey::Int(n) => Some(SwitchKey::Int(n.as_i64())),
            CaseKey::Bool(b) => Some(SwitchKey::Bool(*b)),
            CaseKey::Str(s) => Some(SwitchKey::Str(s)),
        }
    }

    fn constant(&self) -> Const {
        match self {
            CaseKey::Null => Const::Null,
            CaseKey::Int(n) => Const::Num(*n),
            CaseKey::Bool(b) => Const::Bool(*b),
            CaseKey::Str(s) => Const::Str(s.as_str().into()),
        }
    }
}

impl<'c> EmitContext<'c> {
    #[tracing::instrument(level = "trace", skip_all, fields(cases = cases.len()))]
    pub(crate) fn emit_switch(
        &mut self,
        expr: &Expr,
        value: &Expr,
        cases: &[SwitchCase],
        default: Option<&Expr>,
        comparison: Option<&MethodRef>,
        exit: Option<Label>,
    ) -> Result<Emitted, CompileError> {
        if comparison.is_none() {
            for test in cases.iter().flat_map(|c| c.tests.iter()) {
                if test.ty.underlying() != value.ty.underlying() && !(test.ty.is_reference() && value.ty.is_reference())
                {
                    return Err(CompileError::mismatch(
                        "switch case",
                        self.ty_name(&value.ty),
                        self.ty_name(&test.ty),
                    ));
                }
            }
        }
        if !expr.ty.is_void() {
            for body in cases.iter().map(|c| &c.body).chain(default) {
                self.check_branch_type(body, &expr.ty)?;
            }
        }

        self.scoped(|ctx| {
            let mut used = ctx.emit_value(value, exit)?;
            let subject = Operand::new(ctx.spill(&value.ty), &value.ty);
            let case_labels: Vec<Label> = cases.iter().map(|_| ctx.il.define_label()).collect();
            let default_label = ctx.il.define_label();
            let end = ctx.il.define_label();

            match ctx.hash_keys(&subject.ty, cases, comparison) {
                Some(keys) => ctx.emit_hash_dispatch(&subject, &keys, &case_labels, default_label)?,
                None => ctx.emit_linear_dispatch(&subject, cases, comparison, &case_labels, default_label)?,
            }

            let discard = expr.ty.is_void();
            for (case, label) in cases.iter().zip(&case_labels) {
                ctx.mark(*label)?;
                used |= ctx.emit_case_body(&case.body, &expr.ty, exit, discard)?;
                ctx.il.emit(Instr::Br(end));
            }
            ctx.mark(default_label)?;
            match default {
                Some(body) => used |= ctx.emit_case_body(body, &expr.ty, exit, discard)?,
                None => ctx.emit_default(&expr.ty),
            }
            ctx.mark(end)?;
            Ok(Emitted::of(&expr.ty, used))
        })
    }

    fn emit_case_body(&mut self, body: &Expr, ty: &Ty, exit: Option<Label>, discard: bool) -> Result<bool, CompileError> {
        if discard {
            return self.emit_void(body, exit);
        }
        let used = self.emit(body, exit, ResultShape::Value, false)?.used_exit;
        if ty.is_nullable() && !body.ty.is_nullable() {
            self.il.emit(Instr::OptWrap);
        }
        Ok(used)
    }

    /// Per-case constant keys when hash dispatch applies.
    fn hash_keys(&self, ty: &Ty, cases: &[SwitchCase], comparison: Option<&MethodRef>) -> Option<Vec<Vec<CaseKey>>> {
        let options = self.options();
        if !options.hash_switch || comparison.is_some() {
            return None;
        }
        if !(ty.is_integral() || matches!(ty.underlying(), Ty::Bool | Ty::Str)) {
            return None;
        }
        let keys: Option<Vec<Vec<CaseKey>>> = cases
            .iter()
            .map(|c| c.tests.iter().map(CaseKey::of).collect())
            .collect();
        let keys = keys?;
        let count: usize = keys.iter().map(Vec::len).sum();
        (count >= options.hash_switch_threshold.max(1)).then_some(keys)
    }

    fn emit_linear_dispatch(
        &mut self,
        subject: &Operand,
        cases: &[SwitchCase],
        comparison: Option<&MethodRef>,
        case_labels: &[Label],
        default_label: Label,
    ) -> Result<(), CompileError> {
        for (case, label) in cases.iter().zip(case_labels) {
            for test in &case.tests {
                self.scoped(|ctx| {
                    ctx.emit_guarded(test, ResultShape::Value)?;
                    let t = Operand::new(ctx.spill(&test.ty), &test.ty);
                    ctx.emit_binary_slots(BinaryOp::Eq, false, comparison, subject, &t, &Ty::Bool)?;
                    ctx.il.emit(Instr::BrTrue(*label));
                    Ok(())
                })?;
            }
        }
        self.il.emit(Instr::Br(default_label));
        Ok(())
    }

    fn emit_hash_dispatch(
        &mut self,
        subject: &Operand,
        keys: &[Vec<CaseKey>],
        case_labels: &[Label],
        default_label: Label,
    ) -> Result<(), CompileError> {
        let null_target = keys
            .iter()
            .position(|k| k.iter().any(|key| matches!(key, CaseKey::Null)))
            .map_or(default_label, |i| case_labels[i]);
        if subject.ty.can_be_absent() {
            self.il.emit(Instr::LdLoc(subject.slot));
            self.il.emit(Instr::BrNull(null_target));
        }
        self.load_unwrapped(subject);
        let plain = self.spill(subject.ty.underlying());

        let hashed: Vec<(usize, &CaseKey)> = keys
            .iter()
            .enumerate()
            .flat_map(|(case, ks)| ks.iter().map(move |k| (case, k)))
            .filter(|(_, k)| k.switch_key().is_some())
            .collect();
        let size = switch::bucket_count(hashed.len());
        let mut buckets: Vec<Vec<(usize, &CaseKey)>> = vec![Vec::new(); size as usize];
        for (case, key) in &hashed {
            if let Some(k) = key.switch_key() {
                buckets[switch::bucket_of(k, size) as usize].push((*case, *key));
            }
        }
        tracing::trace!(size, keys = hashed.len(), "hash switch buckets");

        let bucket_labels: Vec<Label> = buckets
            .iter()
            .map(|b| if b.is_empty() { default_label } else { self.il.define_label() })
            .collect();
        self.il.emit(Instr::LdLoc(plain));
        self.il.emit(Instr::HashBucket { size });
        self.il.emit(Instr::Switch(bucket_labels.clone()));
        self.il.emit(Instr::Br(default_label));
        for (bucket, label) in buckets.iter().zip(&bucket_labels) {
            if bucket.is_empty() {
                continue;
            }
            self.mark(*label)?;
            for (case, key) in bucket {
                self.il.emit(Instr::LdLoc(plain));
                self.il.emit(Instr::Ldc(key.constant()));
                self.il.emit(Instr::Cmp(exprc_vm::CmpOp::Eq));
                self.il.emit(Instr::BrTrue(case_labels[*case]));
            }
            self.il.emit(Instr::Br(default_label));
        }
        Ok(())
    }
}
