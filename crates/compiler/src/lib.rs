//! minic-compiler: lexer, symbol table, single-pass compiler, and CLI
//! driver for a tiny C-like language that targets minic-core's VM.

pub mod compiler;
pub mod config;
pub mod error;
pub mod lexer;
pub mod token;
pub mod types;

pub use compiler::{CompiledProgram, Compiler};
pub use config::CompilerConfig;
pub use error::{CompileError, Location};

use std::io::Write;

/// Compile `source` without running it.
pub fn compile_source(source: &str) -> Result<CompiledProgram, CompileError> {
    Compiler::compile(source)
}

/// Compile and immediately execute `source`, writing `PRINTF`/`EXIT` output
/// to `out` and returning the VM's exit code. The convenience path library
/// consumers reach for when they don't need the compiled program itself.
pub fn compile_and_run(
    source: &str,
    config: &CompilerConfig,
    out: &mut dyn Write,
) -> Result<i64, CompileError> {
    let compiled = compile_source(source)?;
    Ok(minic_core::execute(
        compiled.entry,
        &compiled.program,
        &compiled.data,
        config.memory_cells,
        out,
    ))
}

/// Render a compiled program's instruction stream as opcode mnemonics (one
/// per line, operands inlined), for `--dump-program`.
pub fn dump_program(compiled: &CompiledProgram) -> String {
    use minic_core::Cell;
    let mut out = String::new();
    let cells = compiled.program.as_slice();
    let mut i = 0;
    while i < cells.len() {
        let pc = i;
        let Cell::Op(op) = cells[i] else {
            // Shouldn't happen at the top of the loop; skip stray operand
            // cells defensively rather than panicking on a dump.
            i += 1;
            continue;
        };
        if op.has_operand() {
            let operand = cells.get(i + 1).and_then(|c| c.as_operand()).unwrap_or(0);
            out.push_str(&format!("{pc:>5}: {op:?} {operand}\n"));
            i += 2;
        } else {
            out.push_str(&format!("{pc:>5}: {op:?}\n"));
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_and_run_captures_output() {
        let mut out = Vec::new();
        let code = compile_and_run(
            "int main() { printf(\"hi\\n\"); return 3; }",
            &CompilerConfig::new(),
            &mut out,
        )
        .unwrap();
        assert_eq!(code, 3);
        assert_eq!(String::from_utf8(out).unwrap(), "hi\nexit(3)\n");
    }

    #[test]
    fn dump_program_lists_every_instruction() {
        let compiled = compile_source("int main() { return 1; }").unwrap();
        let text = dump_program(&compiled);
        assert!(text.contains("Imm 1"));
        assert!(text.contains("Ret"));
    }
}
