//! BCPL compiler CLI.
//!
//! Compile a source file to native code in memory and run it:
//!
//! ```text
//! bcplc [--debug] [--asm] [--opt] [--config file.toml] program.b
//! ```
//!
//! Exit status 0 on success, 1 on any compile or I/O error.

use std::path::PathBuf;
use std::process;

use clap::{CommandFactory, Parser as ClapParser};
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

use bcplc::{CompileError, CompilerConfig, Preprocessor};

#[derive(ClapParser)]
#[command(name = "bcplc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "BCPL compiler - JIT-compile and run BCPL programs", long_about = None)]
struct Cli {
    /// Input BCPL source file
    input: Option<PathBuf>,

    /// Print the token stream and AST
    #[arg(long)]
    debug: bool,

    /// Print the generated assembly listing
    #[arg(long)]
    asm: bool,

    /// Run the optimization pipeline
    #[arg(long)]
    opt: bool,

    /// Compiler configuration file (TOML)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Generate shell completions and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "bcplc", &mut std::io::stdout());
        return;
    }

    let Some(input) = cli.input.clone() else {
        eprintln!("Error: no source file specified");
        process::exit(1);
    };

    if let Err(error) = run(&cli, &input) {
        eprintln!("Error: {}", error);
        process::exit(1);
    }
}

fn run(cli: &Cli, input: &PathBuf) -> Result<(), CompileError> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                CompileError::Io(format!(
                    "could not read configuration '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            CompilerConfig::from_toml(&text)?
        }
        None => CompilerConfig::default(),
    };
    config = config
        .with_optimization(cli.opt)
        .with_debug(cli.debug)
        .with_asm_listing(cli.asm);

    let source = Preprocessor::process(input)?;

    if config.debug {
        println!("=== Tokens ===");
        print!("{}", bcplc::debug::dump_tokens(&source)?);
        let program = bcplc::parse_and_optimize(&source, &config)?;
        println!("=== AST ===");
        print!("{}", bcplc::debug::dump_program(&program));
    }

    let runtime = bcpl_runtime::Runtime::new();
    let compiled = bcplc::compile_source(&source, &runtime, &config)?;

    if config.print_asm {
        println!("=== Generated Assembly ===");
        print!("{}", compiled.listing());
    }

    execute(&compiled);
    Ok(())
}

#[cfg(all(target_arch = "aarch64", unix))]
fn execute(compiled: &bcplc::CompiledProgram) {
    // The compiler produced this buffer for the running architecture and
    // the runtime streams are initialized by Runtime::new above.
    unsafe {
        compiled.invoke();
    }
}

#[cfg(not(all(target_arch = "aarch64", unix)))]
fn execute(_compiled: &bcplc::CompiledProgram) {
    eprintln!("note: compiled for aarch64; skipping execution on this host");
}
