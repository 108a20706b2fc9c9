use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use wis::bytecode::disasm::print_module;
use wis::bytecode::stack_check_error::check_chunk;
use wis::{Module, VmBc, VmBcConfig};

/// wis - bytecode virtual machine and disassembler
#[derive(Parser)]
#[command(name = "wis")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a compiled module
    Run {
        /// Path to a .wisb module
        file: PathBuf,

        /// Log every instruction before it executes
        #[arg(long)]
        trace: bool,

        /// Log the value stack before every instruction
        #[arg(long)]
        trace_stack: bool,

        /// Abort after this many instructions
        #[arg(long)]
        max_steps: Option<usize>,
    },

    /// Print the disassembly of a compiled module
    Disasm {
        /// Path to a .wisb module
        file: PathBuf,

        /// Also check the stack effects of straight-line code
        #[arg(long)]
        check: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            file,
            trace,
            trace_stack,
            max_steps,
        } => run_file(
            &file,
            VmBcConfig {
                trace_instructions: trace,
                trace_stack,
                max_steps,
                ..VmBcConfig::default()
            },
        ),
        Commands::Disasm { file, check } => disasm_file(&file, check),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}

fn load_module(path: &Path) -> Result<Module, String> {
    let bytes =
        fs::read(path).map_err(|e| format!("failed to read '{}': {}", path.display(), e))?;
    Module::from_bytes(&bytes).map_err(|e| format!("{}: {}", path.display(), e))
}

fn run_file(path: &Path, config: VmBcConfig) -> Result<(), String> {
    let module = load_module(path)?;
    let mut vm = VmBc::with_config(config);
    vm.run(&module).map_err(|e| e.to_string())
}

fn disasm_file(path: &Path, check: bool) -> Result<(), String> {
    let module = load_module(path)?;
    print_module(&module).map_err(|e| format!("disassembly failed: {}", e))?;

    if check {
        check_chunk(&module.top_level, 0).map_err(|e| format!("<{}>: {}", module.name, e))?;
        for function in &module.functions {
            check_chunk(&function.code, function.arity)
                .map_err(|e| format!("{}: {}", function.name, e))?;
        }
        println!("stack check passed");
    }

    Ok(())
}
