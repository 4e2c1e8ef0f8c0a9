//! minic compiler CLI
//!
//! Command-line interface for compiling and running .mc programs against
//! minic-core's VM.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use minic_compiler::{compile_source, dump_program, CompilerConfig};
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "minicc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "minic compiler - compile and run .mc programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input source file (when no subcommand is given)
    input: Option<PathBuf>,

    /// Print the emitted instruction stream to stderr before running
    #[arg(long)]
    dump_program: bool,

    /// Override the VM's memory image size, in cells
    #[arg(long)]
    memory_cells: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Completions { shell }) => run_completions(shell),
        None => {
            let Some(input) = cli.input else {
                eprintln!("error: the following required arguments were not provided: <INPUT>");
                process::exit(2);
            };
            let mut config = CompilerConfig::new().with_dump_program(cli.dump_program);
            if let Some(cells) = cli.memory_cells {
                config = config.with_memory_cells(cells);
            }
            run_build(&input, &config);
        }
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "minicc", &mut io::stdout());
}

fn run_build(input: &PathBuf, config: &CompilerConfig) {
    let source = match std::fs::read_to_string(input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error reading {}: {e}", input.display());
            process::exit(1);
        }
    };

    let compiled = match compile_source(&source) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    if config.dump_program {
        eprint!("{}", dump_program(&compiled));
    }

    let mut stdout = io::stdout();
    let code = minic_core::execute(
        compiled.entry,
        &compiled.program,
        &compiled.data,
        config.memory_cells,
        &mut stdout,
    );
    process::exit(code as i32);
}
