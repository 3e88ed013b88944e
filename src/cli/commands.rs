//! CLI command implementations
//!
//! All command functions return `CliResult<ExitCode>` instead of calling
//! `process::exit`. Error handling and exits happen in the top-level `run()`.

use std::sync::Arc;

use exprc_vm::{Machine, TypeRegistry};

use super::program::Program;
use super::{CliError, CliResult, ExitCode, ProgramArgs};
use crate::backend::{CompiledFn, Compiler, DumpDirSink};

// ============================================================================
// Program Preparation (shared between run, il and check)
// ============================================================================

/// A loaded program together with its compiled lambda.
struct PreparedProgram {
    program: Program,
    registry: Arc<TypeRegistry>,
    compiled: CompiledFn,
}

/// Load the program file, apply option overrides and compile.
fn prepare_program(args: &ProgramArgs) -> CliResult<PreparedProgram> {
    let program = Program::load(&args.file).map_err(CliError::diagnostic)?;
    let options = args.options.apply(program.options.clone());
    tracing::debug!(file = %args.file.display(), ?options, "loaded program");

    let registry = Arc::new(program.registry.clone());
    let mut compiler = Compiler::new(Arc::clone(&registry), options);
    if let Some(dir) = &args.dump_ir {
        compiler = compiler.with_debug_sink(Arc::new(DumpDirSink::new(dir)));
    }
    let compiled = compiler.compile(&program.resolved).map_err(CliError::diagnostic)?;
    Ok(PreparedProgram {
        program,
        registry,
        compiled,
    })
}

// ============================================================================
// Commands
// ============================================================================

/// Compile and execute; prints the rendered result, or the unhandled exception on failure.
pub fn run_program(args: &ProgramArgs, call_args: Option<&[serde_json::Value]>) -> CliResult<ExitCode> {
    let prepared = prepare_program(args)?;
    let values = prepared.program.arguments(call_args).map_err(CliError::diagnostic)?;

    let mut machine = Machine::new(Arc::clone(&prepared.registry));
    match machine.invoke(&prepared.compiled.callable, values) {
        Ok(value) => {
            if !prepared.program.resolved.lambda.ret.is_void() {
                println!("{}", value.render(&prepared.registry));
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("error: {}", err);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Compile and print the disassembly of every unit.
pub fn print_il(args: &ProgramArgs) -> CliResult<ExitCode> {
    let prepared = prepare_program(args)?;
    print!("{}", prepared.compiled.disassemble(&prepared.registry));
    Ok(ExitCode::SUCCESS)
}

/// Compile only.
pub fn check_program(args: &ProgramArgs) -> CliResult<ExitCode> {
    let prepared = prepare_program(args)?;
    println!(
        "✓ {} compiles ({} unit(s))",
        args.file.display(),
        prepared.compiled.units.len() + 1
    );
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::OptionFlags;
    use std::path::PathBuf;

    fn write_program(name: &str, text: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("exprc_cli_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("prog.json");
        std::fs::write(&path, text).unwrap();
        path
    }

    fn args(file: PathBuf) -> ProgramArgs {
        ProgramArgs {
            file,
            options: OptionFlags::default(),
            dump_ir: None,
        }
    }

    const ADD_ONE: &str = r#"{
        "lambda": {
            "name": "add_one",
            "params": [{ "id": 0, "name": "x", "ty": { "num": "I32" } }],
            "ret": { "num": "I32" },
            "body": {
                "kind": { "binary": {
                    "op": "add",
                    "left": { "kind": { "parameter": 0 }, "ty": { "num": "I32" } },
                    "right": { "kind": { "constant": { "num": { "I32": 1 } } }, "ty": { "num": "I32" } },
                    "checked": false
                } },
                "ty": { "num": "I32" }
            }
        },
        "args": [41]
    }"#;

    #[test]
    fn test_check_and_run_program() {
        let file = write_program("run", ADD_ONE);
        assert_eq!(check_program(&args(file.clone())).unwrap(), ExitCode::SUCCESS);
        assert_eq!(run_program(&args(file), None).unwrap(), ExitCode::SUCCESS);
    }

    #[test]
    fn test_dump_ir_writes_one_file_per_unit() {
        let file = write_program("dump", ADD_ONE);
        let dir = file.parent().unwrap().join("il");
        let mut program = args(file);
        program.dump_ir = Some(dir.clone());
        print_il(&program).unwrap();
        assert!(dir.join("add_one.il").exists());
    }

    #[test]
    fn test_missing_file_is_a_failure() {
        let err = check_program(&args(PathBuf::from("/nonexistent/prog.json"))).unwrap_err();
        assert_eq!(err.exit_code, ExitCode::FAILURE);
        assert!(err.message.contains("cannot read"));
    }
}
