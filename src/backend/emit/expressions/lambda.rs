//! Nested lambdas: compile the child unit and build a function value over the parent's hidden arguments.

use std::sync::Arc;

use exprc_vm::Instr;

use super::super::Emitted;
use crate::backend::context::EmitContext;
use crate::backend::errors::CompileError;
use crate::ir::LambdaExpr;

impl<'c> EmitContext<'c> {
    #[tracing::instrument(level = "trace", skip_all, fields(name = %lambda.name))]
    pub(crate) fn emit_lambda(&mut self, lambda: &Arc<LambdaExpr>) -> Result<Emitted, CompileError> {
        let child = lambda.hidden;
        if (child.constants && !self.hidden.constants) || (child.closure && !self.hidden.closure) {
            return Err(CompileError::unsupported(format!(
                "lambda {} needs hidden arguments its enclosing function does not receive",
                lambda.name
            )));
        }
        let params: Vec<_> = lambda.params.iter().map(|p| p.ty.clone()).collect();
        let shape = self.compiler().invokers().shape(child.count(), &params, &lambda.ret)?;

        let (routine, nested) = self.compiler().compile_unit(lambda)?;
        self.units.push(routine.clone());
        self.units.extend(nested);
        let index = self.add_child(routine);

        if child.constants {
            if let Some(slot) = self.hidden_slots.constants {
                self.il.emit(Instr::LdArg(slot));
            }
        }
        if child.closure {
            if let Some(slot) = self.hidden_slots.closure {
                self.il.emit(Instr::LdArg(slot));
            }
        }
        self.il.emit(Instr::LdFtn(index));
        self.il.emit(Instr::NewInvoker {
            captured: shape.captured,
        });
        Ok(Emitted::of(&shape.ty, false))
    }
}
