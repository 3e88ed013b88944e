//! Protected regions: `try` with typed catches, filters, `finally` and `fault`.
//!
//! Layout (one result local shared by every path):
//!
//! ```text
//!         markstack m
//! try:    <body>; stloc r; leave end
//! filter: stloc e; <filter>; endfilter        (per filtered handler)
//! catch:  stloc e; <handler>; stloc r; leave end
//! fault:  <fault>; endfinally
//! final:  <finally>; endfinally
//! end:    ldloc r
//! ```
//!
//! ## Notes
//!
//! - Catch regions are registered before the `fault` and `finally` regions covering them, so dispatch tries the
//!   handlers innermost-first.
//! - The `finally` region also covers the handlers (and the fault block), so leaving or throwing from a handler
//!   runs it.

use exprc_vm::{Instr, Label, RegionKind, RegionSpec, Ty};

use super::super::{Emitted, ResultShape};
use crate::backend::context::EmitContext;
use crate::backend::errors::CompileError;
use crate::ir::{CatchBlock, Expr};

impl<'c> EmitContext<'c> {
    pub(crate) fn emit_try(
        &mut self,
        expr: &Expr,
        body: &Expr,
        handlers: &[CatchBlock],
        finally: Option<&Expr>,
        fault: Option<&Expr>,
    ) -> Result<Emitted, CompileError> {
        for handler in handlers {
            let catchable = match &handler.ty {
                Ty::Object => true,
                Ty::Class(id) => self.registry().is_exception(*id),
                _ => false,
            };
            if !catchable {
                return Err(CompileError::mismatch("catch", "an exception type", self.ty_name(&handler.ty)));
            }
            if let Some(filter) = &handler.filter {
                if filter.ty.underlying() != &Ty::Bool {
                    return Err(CompileError::mismatch("exception filter", "bool", self.ty_name(&filter.ty)));
                }
            }
        }
        if !expr.ty.is_void() {
            self.check_branch_type(body, &expr.ty)?;
            for handler in handlers {
                self.check_branch_type(&handler.body, &expr.ty)?;
            }
        }

        self.scoped(|ctx| {
            let result = (!expr.ty.is_void()).then(|| ctx.temp(&expr.ty));
            let mark = ctx.temp(&Ty::I32);
            let try_start = ctx.il.define_label();
            let try_end = ctx.il.define_label();
            let end = ctx.il.define_label();

            ctx.il.emit(Instr::MarkStack(mark));
            ctx.mark(try_start)?;
            ctx.try_depth += 1;
            ctx.emit_protected(body, &expr.ty, result)?;
            ctx.il.emit(Instr::Leave(end));
            ctx.mark(try_end)?;

            for handler in handlers {
                ctx.emit_handler(handler, &expr.ty, result, try_start, try_end, mark, end)?;
            }
            let mut covered_end = ctx.il.define_label();
            ctx.mark(covered_end)?;

            if let Some(fault) = fault {
                covered_end = ctx.emit_finally_block(fault, RegionKind::Fault, try_start, covered_end, mark)?;
            }
            if let Some(finally) = finally {
                ctx.emit_finally_block(finally, RegionKind::Finally, try_start, covered_end, mark)?;
            }
            ctx.try_depth -= 1;

            ctx.mark(end)?;
            if let Some(slot) = result {
                ctx.il.emit(Instr::LdLoc(slot));
            }
            Ok(Emitted::of(&expr.ty, false))
        })
    }

    /// Emit a body or handler under its own landing pad and store its value in the result local.
    fn emit_protected(&mut self, block: &Expr, ty: &Ty, result: Option<u16>) -> Result<(), CompileError> {
        match result {
            Some(slot) => {
                self.emit_guarded(block, ResultShape::Value)?;
                if ty.is_nullable() && !block.ty.is_nullable() {
                    self.il.emit(Instr::OptWrap);
                }
                self.il.emit(Instr::StLoc(slot));
            }
            None => {
                self.emit_guarded(block, ResultShape::Void)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_handler(
        &mut self,
        handler: &CatchBlock,
        ty: &Ty,
        result: Option<u16>,
        try_start: Label,
        try_end: Label,
        mark: u16,
        end: Label,
    ) -> Result<(), CompileError> {
        let shadowed = handler.variable.as_ref().map(|v| (v, self.bind_local(v)));
        let outcome = self.emit_handler_blocks(handler, ty, result, try_start, try_end, mark, end);
        if let Some((var, previous)) = shadowed {
            self.unbind(var, previous);
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_handler_blocks(
        &mut self,
        handler: &CatchBlock,
        ty: &Ty,
        result: Option<u16>,
        try_start: Label,
        try_end: Label,
        mark: u16,
        end: Label,
    ) -> Result<(), CompileError> {
        let kind = match &handler.filter {
            Some(filter) => {
                let filter_start = self.il.define_label();
                self.mark(filter_start)?;
                self.store_exception(handler)?;
                self.emit_guarded(filter, ResultShape::Value)?;
                if filter.ty.is_nullable() {
                    self.il.emit(Instr::OptGetValueOrDefault(Ty::Bool));
                }
                self.il.emit(Instr::EndFilter);
                RegionKind::Filter(filter_start)
            }
            None => RegionKind::Catch(handler.ty.clone()),
        };
        let handler_start = self.il.define_label();
        let handler_end = self.il.define_label();
        self.mark(handler_start)?;
        self.store_exception(handler)?;
        self.emit_protected(&handler.body, ty, result)?;
        self.il.emit(Instr::Leave(end));
        self.mark(handler_end)?;
        self.il.add_region(RegionSpec {
            try_start,
            try_end,
            handler_start,
            handler_end,
            kind,
            stack_mark: mark,
        });
        Ok(())
    }

    /// Pop the in-flight exception into the handler's variable, or discard it.
    fn store_exception(&mut self, handler: &CatchBlock) -> Result<(), CompileError> {
        match &handler.variable {
            Some(var) => {
                let (slot, _) = self.var_slot(var.id)?;
                self.store(slot);
            }
            None => self.il.emit(Instr::Pop),
        }
        Ok(())
    }

    /// Emit a `finally` or `fault` block protecting `try_start..covered_end`; returns the label after the block.
    fn emit_finally_block(
        &mut self,
        block: &Expr,
        kind: RegionKind,
        try_start: Label,
        covered_end: Label,
        mark: u16,
    ) -> Result<Label, CompileError> {
        let handler_start = self.il.define_label();
        let handler_end = self.il.define_label();
        self.mark(handler_start)?;
        self.emit_guarded(block, ResultShape::Void)?;
        self.il.emit(Instr::EndFinally);
        self.mark(handler_end)?;
        self.il.add_region(RegionSpec {
            try_start,
            try_end: covered_end,
            handler_start,
            handler_end,
            kind,
            stack_mark: mark,
        });
        Ok(handler_end)
    }
}
