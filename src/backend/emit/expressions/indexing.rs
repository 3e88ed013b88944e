//! Element reads: arrays, lists, multi-dimensional arrays and indexed properties.
//!
//! Plain single-dimension array reads load the receiver and index directly. Every other read goes through a
//! prepared [`super::places::Place`] so bounds checks and auto-extension share one implementation with assignment.

use exprc_vm::{Instr, Label, Ty};

use super::super::{Emitted, ResultShape};
use crate::backend::context::EmitContext;
use crate::backend::errors::CompileError;
use crate::ir::{Expr, ExprKind};

impl<'c> EmitContext<'c> {
    pub(crate) fn emit_index(
        &mut self,
        expr: &Expr,
        exit: Option<Label>,
        shape: ResultShape,
    ) -> Result<Emitted, CompileError> {
        let ExprKind::Index {
            receiver,
            args,
            indexer,
        } = &expr.kind
        else {
            return Err(CompileError::unsupported("element access on a non-index node"));
        };
        let options = self.options();
        let checked_bounds = options.bounds_checks && exit.is_some();
        let direct = indexer.is_none()
            && matches!(receiver.ty, Ty::Array(_))
            && args.len() == 1
            && !options.auto_extend_read
            && !checked_bounds;

        if direct {
            let mut used = self.emit_receiver(receiver, exit, ResultShape::Value, false)?.used_exit;
            used |= self.emit_index_operand(&args[0], exit)?;
            if shape.wants_address(&expr.ty) {
                self.il.emit(Instr::LdElemA);
                return Ok(Emitted::address(used));
            }
            self.il.emit(Instr::LdElem);
            return Ok(Emitted::of(&expr.ty, used));
        }

        let extend = options.auto_extend_read;
        self.scoped(|ctx| {
            let (place, used) = ctx.prepare_place(expr, exit, extend)?;
            if shape.wants_address(&expr.ty) && ctx.place_address(&place) {
                return Ok(Emitted::address(used));
            }
            ctx.load_place(&place)?;
            Ok(Emitted::of(&expr.ty, used))
        })
    }
}
