#![no_main]

use std::sync::Arc;

use exprc::backend::Compiler;
use exprc::cli::program::Program;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Convert bytes to UTF-8 string (ignore invalid UTF-8)
    if let Ok(s) = std::str::from_utf8(data) {
        // Loading and compiling must report errors, never panic
        if let Ok(program) = Program::parse(s) {
            let compiler = Compiler::new(Arc::new(program.registry.clone()), program.options.clone());
            if let Ok(compiled) = compiler.compile(&program.resolved) {
                let _ = compiled.disassemble(&program.registry);
            }
        }
    }
});
