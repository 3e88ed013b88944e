//! Compilation entry point.
//!
//! [`Compiler`] turns a resolved lambda into an executable [`Callable`]:
//!
//! ```text
//! ResolvedLambda ─▶ compile_unit (EmitContext + emitters) ─▶ Routine ─▶ Callable { routine, captured }
//!                        │
//!                        └─▶ nested lambdas: compile_unit recursively, attached as child routines
//! ```
//!
//! ## Notes
//!
//! - Hidden leading parameters come first: the constants table (if the lambda uses hoisted constants), then the
//!   closure environment (if it shares closure variables). Both are `object[]`.
//! - A compiler holds only read-only state plus the shared helper cache, so one instance can serve concurrent
//!   compilations.
//! - Debug-sink failures are logged and never fail a compilation.
//!
//! ## See also
//! - [`crate::backend::context`]: per-unit emission state
//! - [`crate::backend::helpers`]: shared helper routines

use std::path::PathBuf;
use std::sync::Arc;

use exprc_vm::{Callable, Instr, Routine, RoutineBuilder, Ty, TypeRegistry, Value};

use super::context::EmitContext;
use super::emit::ResultShape;
use super::errors::CompileError;
use super::helpers::HelperCache;
use super::options::CompileOptions;
use crate::ir::LambdaExpr;

/// Largest number of surface parameters a function value may take.
pub const MAX_INVOKER_PARAMS: usize = 16;

// =====================================================================
// Collaborators
// =====================================================================

/// Receives every compiled unit; used to dump generated code while debugging.
pub trait DebugSink: Send + Sync {
    fn on_unit(&self, routine: &Routine, registry: &TypeRegistry) -> std::io::Result<()>;
}

/// Writes the disassembly of each unit to `<dir>/<name>.il`.
#[derive(Debug, Clone)]
pub struct DumpDirSink {
    pub dir: PathBuf,
}

impl DumpDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DebugSink for DumpDirSink {
    fn on_unit(&self, routine: &Routine, registry: &TypeRegistry) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let file = self.dir.join(format!("{}.il", sanitize(&routine.name)));
        std::fs::write(file, routine.disassemble(registry))
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Static shape of the invoker wrapping a nested function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokerShape {
    /// Number of hidden values bundled with the function pointer.
    pub captured: u16,
    /// Function type of the resulting value.
    pub ty: Ty,
}

/// Chooses how nested functions are packaged as function values.
pub trait InvokerFactory: Send + Sync {
    fn shape(&self, captured: usize, params: &[Ty], ret: &Ty) -> Result<InvokerShape, CompileError>;
}

/// Invokers for up to [`MAX_INVOKER_PARAMS`] parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultInvokers;

impl InvokerFactory for DefaultInvokers {
    fn shape(&self, captured: usize, params: &[Ty], ret: &Ty) -> Result<InvokerShape, CompileError> {
        if params.len() > MAX_INVOKER_PARAMS {
            return Err(CompileError::unsupported(format!(
                "function values with {} parameters (at most {})",
                params.len(),
                MAX_INVOKER_PARAMS
            )));
        }
        let captured = u16::try_from(captured)
            .map_err(|_| CompileError::unsupported(format!("{} captured values", captured)))?;
        Ok(InvokerShape {
            captured,
            ty: Ty::func(params.to_vec(), ret.clone()),
        })
    }
}

// =====================================================================
// Input and output
// =====================================================================

/// A lambda ready for compilation together with the values its hidden parameters receive.
#[derive(Debug, Clone)]
pub struct ResolvedLambda {
    pub lambda: Arc<LambdaExpr>,
    /// Hoisted constants, indexed by `Hoisted(i)`.
    pub constants: Vec<Value>,
    /// Types of the shared closure variables, indexed by `ClosureVar(i)`; each starts at its zero value.
    pub closure: Vec<Ty>,
}

impl ResolvedLambda {
    pub fn new(lambda: LambdaExpr) -> Self {
        Self {
            lambda: Arc::new(lambda),
            constants: Vec::new(),
            closure: Vec::new(),
        }
    }

    pub fn with_constants(mut self, constants: Vec<Value>) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_closure(mut self, closure: Vec<Ty>) -> Self {
        self.closure = closure;
        self
    }
}

/// Result of a compilation.
#[derive(Debug, Clone)]
pub struct CompiledFn {
    pub callable: Callable,
    /// Nested units in discovery order (preorder).
    pub units: Vec<Arc<Routine>>,
}

impl CompiledFn {
    pub fn routine(&self) -> &Arc<Routine> {
        &self.callable.routine
    }

    /// Disassembly of the main unit followed by every nested unit.
    pub fn disassemble(&self, registry: &TypeRegistry) -> String {
        let mut out = self.callable.routine.disassemble(registry);
        for unit in &self.units {
            out.push('\n');
            out.push_str(&unit.disassemble(registry));
        }
        out
    }
}

// =====================================================================
// Compiler
// =====================================================================

/// Lowers expression trees against one type registry with fixed options.
pub struct Compiler {
    registry: Arc<TypeRegistry>,
    options: CompileOptions,
    helpers: Arc<HelperCache>,
    invokers: Arc<dyn InvokerFactory>,
    debug_sink: Option<Arc<dyn DebugSink>>,
}

impl Compiler {
    pub fn new(registry: Arc<TypeRegistry>, options: CompileOptions) -> Self {
        Self {
            registry,
            options,
            helpers: Arc::new(HelperCache::new()),
            invokers: Arc::new(DefaultInvokers),
            debug_sink: None,
        }
    }

    /// Share a helper cache with other compilers.
    pub fn with_helper_cache(mut self, helpers: Arc<HelperCache>) -> Self {
        self.helpers = helpers;
        self
    }

    pub fn with_debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    pub fn with_invokers(mut self, invokers: Arc<dyn InvokerFactory>) -> Self {
        self.invokers = invokers;
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn helpers(&self) -> &HelperCache {
        &self.helpers
    }

    pub fn invokers(&self) -> &dyn InvokerFactory {
        self.invokers.as_ref()
    }

    /// Compile a lambda and bind its hidden arguments.
    #[tracing::instrument(skip_all, fields(name = %resolved.lambda.name))]
    pub fn compile(&self, resolved: &ResolvedLambda) -> Result<CompiledFn, CompileError> {
        let (routine, units) = self.compile_unit(&resolved.lambda)?;
        let hidden = resolved.lambda.hidden;
        let mut captured = Vec::with_capacity(hidden.count());
        if hidden.constants {
            let items = resolved.constants.iter().cloned().map(box_value).collect();
            captured.push(Value::new_array(Ty::Object, items));
        }
        if hidden.closure {
            let items = resolved
                .closure
                .iter()
                .map(|ty| Value::default_for(ty, &self.registry).map(box_value))
                .collect::<Result<Vec<_>, _>>()?;
            captured.push(Value::new_array(Ty::Object, items));
        }
        tracing::debug!(units = units.len() + 1, "compiled lambda");
        Ok(CompiledFn {
            callable: Callable::new(routine, captured),
            units,
        })
    }

    /// Compile one unit; returns it with the nested units it created, in discovery order.
    pub(crate) fn compile_unit(&self, lambda: &LambdaExpr) -> Result<(Arc<Routine>, Vec<Arc<Routine>>), CompileError> {
        let hidden = lambda.hidden.count();
        let mut params: Vec<Ty> = (0..hidden).map(|_| Ty::array(Ty::Object)).collect();
        params.extend(lambda.params.iter().map(|p| p.ty.clone()));
        let il = RoutineBuilder::new(lambda.name.clone(), params, lambda.ret.clone());

        let mut ctx = EmitContext::new(self, il, lambda.hidden);
        for (i, param) in lambda.params.iter().enumerate() {
            let index = u16::try_from(hidden + i)
                .map_err(|_| CompileError::unsupported(format!("{} parameters", lambda.params.len())))?;
            ctx.bind_arg(param, index);
        }
        ctx.collect_labels(&lambda.body, 0);

        if lambda.ret.is_void() {
            ctx.emit_guarded(&lambda.body, ResultShape::Void)?;
        } else {
            ctx.check_branch_type(&lambda.body, &lambda.ret)?;
            ctx.emit_guarded(&lambda.body, ResultShape::Value)?;
            if lambda.ret.is_nullable() && !lambda.body.ty.is_nullable() {
                ctx.il.emit(Instr::OptWrap);
            }
        }
        ctx.il.emit(Instr::Ret);

        let units = std::mem::take(&mut ctx.units);
        let routine = Arc::new(ctx.il.finish()?);
        tracing::debug!(unit = %routine.name, instrs = routine.code.len(), nested = units.len(), "compiled unit");
        if let Some(sink) = &self.debug_sink {
            if let Err(err) = sink.on_unit(&routine, &self.registry) {
                tracing::warn!(unit = %routine.name, error = %err, "debug sink failed");
            }
        }
        Ok((routine, units))
    }
}

/// Representation of a value stored in an `object` slot.
fn box_value(value: Value) -> Value {
    match value {
        Value::Opt(Some(inner)) => *inner,
        Value::Opt(None) => Value::Null,
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ir::{Expr, Variable};

    fn identity() -> LambdaExpr {
        let x = Variable::new(0, "x", Ty::I32);
        LambdaExpr::new("id", vec![x.clone()], Ty::I32, Expr::var(&x))
    }

    #[test]
    fn test_compile_binds_parameters_after_hidden_slots() {
        let compiler = Compiler::new(Arc::new(TypeRegistry::new()), CompileOptions::default());
        let lambda = identity().with_closure();
        let compiled = compiler
            .compile(&ResolvedLambda::new(lambda).with_closure(vec![Ty::I32]))
            .unwrap();
        let routine = compiled.routine();
        assert_eq!(routine.params, vec![Ty::array(Ty::Object), Ty::I32]);
        assert!(routine.code.contains(&Instr::LdArg(1)));
        assert!(!routine.code.contains(&Instr::LdArg(0)));
        assert_eq!(compiled.callable.arity(), 1);
    }

    #[test]
    fn test_body_type_must_match_return_type() {
        let compiler = Compiler::new(Arc::new(TypeRegistry::new()), CompileOptions::default());
        let mut lambda = identity();
        lambda.ret = Ty::Str;
        let err = compiler.compile(&ResolvedLambda::new(lambda)).unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }));
    }

    #[test]
    fn test_default_invokers_limit_parameters() {
        let params = vec![Ty::I32; MAX_INVOKER_PARAMS + 1];
        assert!(DefaultInvokers.shape(0, &params, &Ty::Void).is_err());
        let shape = DefaultInvokers.shape(2, &params[..2], &Ty::Bool).unwrap();
        assert_eq!(shape.captured, 2);
        assert_eq!(shape.ty, Ty::func(vec![Ty::I32, Ty::I32], Ty::Bool));
    }

    #[test]
    fn test_sanitize_keeps_file_names_flat() {
        assert_eq!(sanitize("outer/inner λ"), "outer_inner__");
    }
}
