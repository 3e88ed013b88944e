//! CLI module for the exprc code generator
//!
//! This module provides the command-line interface over JSON program files (see [`program`]).
//!
//! ## Commands
//!
//! - `run <file>` - Compile the program's lambda and execute it on the stack machine
//! - `il <file>` - Compile and print the disassembly of every unit
//! - `check <file>` - Compile only and report diagnostics
//!
//! ## Modules
//!
//! - `commands` - Command implementations
//! - `program` - Program file loading and argument conversion
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;
pub mod program;

use std::fmt;
use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};

use crate::backend::CompileOptions;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }

    /// Render a diagnostic with its code and help text.
    pub fn diagnostic(err: impl miette::Diagnostic + Send + Sync + 'static) -> Self {
        Self::failure(format!("{:?}", miette::Report::new(err)))
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Lower typed expression trees to stack-machine code
#[derive(Parser, Debug)]
#[command(name = "exprc")]
#[command(version = VERSION)]
#[command(about = "Lower typed expression trees to stack-machine code", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Arguments shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ProgramArgs {
    /// Program file (JSON)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    #[command(flatten)]
    pub options: OptionFlags,

    /// Write the disassembly of every compiled unit into this directory
    #[arg(long = "dump-ir", value_name = "DIR")]
    pub dump_ir: Option<PathBuf>,
}

/// Overrides for the program file's compile options.
#[derive(Args, Debug, Clone, Default)]
pub struct OptionFlags {
    /// Fault on null receivers instead of propagating a default value
    #[arg(long)]
    pub no_null_checks: bool,
    /// Propagate a default value on out-of-range indexes
    #[arg(long)]
    pub bounds_checks: bool,
    /// Create missing objects and grow collections on reads
    #[arg(long)]
    pub auto_extend_read: bool,
    /// Create missing objects and grow collections on assignment
    #[arg(long)]
    pub auto_extend_assign: bool,
    /// Absent operands make lifted ordering comparisons absent
    #[arg(long)]
    pub three_valued: bool,
    /// Always lower switches to linear test chains
    #[arg(long)]
    pub no_hash_switch: bool,
    /// Minimum number of constant case tests for hash dispatch
    #[arg(long, value_name = "N")]
    pub hash_threshold: Option<usize>,
}

impl OptionFlags {
    /// Apply the flags that were given on top of `base`.
    pub fn apply(&self, base: CompileOptions) -> CompileOptions {
        let mut options = base;
        if self.no_null_checks {
            options = options.with_null_checks(false);
        }
        if self.bounds_checks {
            options = options.with_bounds_checks(true);
        }
        if self.auto_extend_read {
            options = options.with_auto_extend_read(true);
        }
        if self.auto_extend_assign {
            options = options.with_auto_extend_assign(true);
        }
        if self.three_valued {
            options = options.with_three_valued_comparisons(true);
        }
        if self.no_hash_switch {
            options = options.with_hash_switch(false);
        }
        if let Some(threshold) = self.hash_threshold {
            options = options.with_hash_switch_threshold(threshold);
        }
        options
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile the program and execute it
    Run {
        #[command(flatten)]
        program: ProgramArgs,
        /// Argument as JSON, one per lambda parameter (replaces the file's `args`)
        #[arg(long = "arg", value_name = "JSON")]
        args: Vec<String>,
    },

    /// Compile the program and print its disassembly
    Il {
        #[command(flatten)]
        program: ProgramArgs,
    },

    /// Compile the program and report errors only
    Check {
        #[command(flatten)]
        program: ProgramArgs,
    },
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run() {
    let cli = Cli::parse();

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the CLI command and return result.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    match cli.command {
        Command::Run { program, args } => {
            let args = args
                .iter()
                .map(|a| {
                    serde_json::from_str(a).map_err(|e| CliError::failure(format!("Error: invalid --arg '{}': {}", a, e)))
                })
                .collect::<CliResult<Vec<serde_json::Value>>>()?;
            let args = (!args.is_empty()).then_some(args);
            commands::run_program(&program, args.as_deref())
        }
        Command::Il { program } => commands::print_il(&program),
        Command::Check { program } => commands::check_program(&program),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run_with_args() {
        let cli = Cli::try_parse_from(["exprc", "run", "prog.json", "--arg", "1", "--arg", "null"]).unwrap();
        let Command::Run { program, args } = cli.command else {
            panic!("Expected Run command");
        };
        assert_eq!(program.file, PathBuf::from("prog.json"));
        assert_eq!(args, vec!["1", "null"]);
    }

    #[test]
    fn test_cli_parse_il_with_dump_dir() {
        let cli = Cli::try_parse_from(["exprc", "il", "prog.json", "--dump-ir", "out"]).unwrap();
        let Command::Il { program } = cli.command else {
            panic!("Expected Il command");
        };
        assert_eq!(program.dump_ir, Some(PathBuf::from("out")));
    }

    #[test]
    fn test_cli_requires_a_subcommand() {
        assert!(Cli::try_parse_from(["exprc"]).is_err());
        assert!(Cli::try_parse_from(["exprc", "check"]).is_err());
    }

    #[test]
    fn test_option_flags_override_file_options() {
        let cli = Cli::try_parse_from([
            "exprc",
            "check",
            "prog.json",
            "--no-null-checks",
            "--three-valued",
            "--hash-threshold",
            "3",
        ])
        .unwrap();
        let Command::Check { program } = cli.command else {
            panic!("Expected Check command");
        };
        let options = program.options.apply(CompileOptions::default().with_bounds_checks(true));
        assert!(!options.null_checks);
        assert!(options.bounds_checks);
        assert!(options.three_valued_comparisons);
        assert_eq!(options.hash_switch_threshold, 3);
    }

    #[test]
    fn test_no_flags_keep_file_options() {
        let base = CompileOptions::default().with_auto_extend_assign(true);
        assert_eq!(OptionFlags::default().apply(base.clone()), base);
    }
}
