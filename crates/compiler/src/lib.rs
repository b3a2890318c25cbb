//! BCPL JIT compiler.
//!
//! The pipeline runs preprocessed source text through lexing, parsing,
//! optional AST optimization, and AArch64 code emission, finishing in a
//! writable-then-executable code buffer whose entry point can be invoked
//! directly:
//!
//! ```rust,ignore
//! let runtime = bcpl_runtime::Runtime::new();
//! let config = bcplc::CompilerConfig::new().with_optimization(true);
//! let compiled = bcplc::compile_source(source, &runtime, &config)?;
//! let status = unsafe { compiled.invoke() };
//! ```
//!
//! Every fatal condition travels as a [`CompileError`]; there is no partial
//! recovery and no degraded output.

pub mod ast;
pub mod cfg;
pub mod codegen;
pub mod config;
pub mod debug;
pub mod lexer;
pub mod liveness;
pub mod opt;
pub mod parser;
pub mod preprocessor;
pub mod token;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use bcpl_runtime::{ExecutableMemory, MemoryError, Runtime, SymbolError};

pub use ast::Program;
pub use codegen::{CodeGen, ENTRY_LABEL, GeneratedCode};
pub use config::CompilerConfig;
pub use lexer::Lexer;
pub use opt::PassManager;
pub use parser::Parser;
pub use preprocessor::Preprocessor;

/// Everything that can abort a compilation, by taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// Malformed source at the character level, with position.
    Lexical {
        line: u32,
        column: u32,
        message: String,
    },
    /// The parser rejected the token stream.
    Syntax { line: u32, message: String },
    /// A meaning-level fault: undefined names, bad assignment targets,
    /// label problems.
    Semantic(String),
    /// A machine-level limit: scratch exhaustion, displacement overflow,
    /// memory protection failure.
    Resource(String),
    /// A built-in the generated code needs is missing from the runtime.
    RuntimeBridge(String),
    /// File system or configuration trouble.
    Io(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lexical {
                line,
                column,
                message,
            } => write!(f, "lexical error at {}:{}: {}", line, column, message),
            CompileError::Syntax { line, message } => {
                write!(f, "syntax error at line {}: {}", line, message)
            }
            CompileError::Semantic(message) => write!(f, "semantic error: {}", message),
            CompileError::Resource(message) => write!(f, "resource error: {}", message),
            CompileError::RuntimeBridge(message) => {
                write!(f, "runtime linkage error: {}", message)
            }
            CompileError::Io(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<MemoryError> for CompileError {
    fn from(error: MemoryError) -> Self {
        CompileError::Resource(error.to_string())
    }
}

impl From<SymbolError> for CompileError {
    fn from(error: SymbolError) -> Self {
        CompileError::RuntimeBridge(error.to_string())
    }
}

/// A program compiled into executable memory.
pub struct CompiledProgram {
    memory: ExecutableMemory,
    entry_offset: u64,
    function_offsets: HashMap<String, u64>,
    listing: String,
}

impl CompiledProgram {
    /// Absolute address of the C-ABI entry thunk.
    pub fn entry_address(&self) -> usize {
        self.memory.as_ptr() as usize + self.entry_offset as usize
    }

    /// Absolute address of a compiled function, if it exists.
    pub fn function_address(&self, name: &str) -> Option<usize> {
        self.function_offsets
            .get(name)
            .map(|offset| self.memory.as_ptr() as usize + *offset as usize)
    }

    /// The `--asm` listing captured after branch resolution.
    pub fn listing(&self) -> &str {
        &self.listing
    }

    pub fn code_size(&self) -> usize {
        self.memory.len()
    }

    /// Run the program from its entry thunk.
    ///
    /// # Safety
    ///
    /// The caller vouches that the process may execute the generated code:
    /// the buffer was produced for this architecture and the runtime's
    /// streams are set up. Generated code can perform arbitrary I/O and may
    /// terminate the process through FINISH.
    #[cfg(all(target_arch = "aarch64", unix))]
    pub unsafe fn invoke(&self) -> i64 {
        let entry: extern "C" fn() -> i64 =
            unsafe { std::mem::transmute(self.entry_address()) };
        let result = entry();
        bcpl_runtime::context::global().flush_output();
        result
    }
}

/// Parse `source` and run the configured optimization pipeline over it.
pub fn parse_and_optimize(
    source: &str,
    config: &CompilerConfig,
) -> Result<Program, CompileError> {
    let program = Parser::parse(source)?;
    if config.optimize {
        PassManager::standard(config).optimize(program)
    } else {
        Ok(program)
    }
}

/// Compile preprocessed source text down to executable memory.
pub fn compile_source(
    source: &str,
    runtime: &Runtime,
    config: &CompilerConfig,
) -> Result<CompiledProgram, CompileError> {
    let program = parse_and_optimize(source, config)?;
    compile_program(&program, runtime, config)
}

/// Compile an already parsed (and possibly optimized) program.
pub fn compile_program(
    program: &Program,
    runtime: &Runtime,
    config: &CompilerConfig,
) -> Result<CompiledProgram, CompileError> {
    let global_vector_base = allocate_global_vector(program)?;
    let codegen = CodeGen::new(runtime.symbols(), config, global_vector_base);
    let generated = codegen.generate(program)?;

    let code_bytes = generated.stream.len() * 4;
    let mut stream = generated.stream;
    let mut memory = ExecutableMemory::with_size(code_bytes)?;

    stream.assign_addresses(memory.as_ptr() as u64);
    stream.resolve_branches()?;
    let listing = stream.listing();
    memory.write(0, &stream.to_bytes())?;
    memory.make_executable()?;

    tracing::debug!(bytes = code_bytes, "program compiled");
    Ok(CompiledProgram {
        memory,
        entry_offset: generated.function_offsets[ENTRY_LABEL],
        function_offsets: generated.function_offsets,
        listing,
    })
}

/// Preprocess and compile a source file.
pub fn compile_file(
    path: &Path,
    runtime: &Runtime,
    config: &CompilerConfig,
) -> Result<CompiledProgram, CompileError> {
    let source = Preprocessor::process(path)?;
    compile_source(&source, runtime, config)
}

/// The word-indexed global vector, sized by the highest declared slot.
/// Returns its base address, or 0 when the program declares no globals.
fn allocate_global_vector(program: &Program) -> Result<i64, CompileError> {
    let mut max_slot: Option<i64> = None;
    for decl in &program.declarations {
        if let ast::Declaration::Global(entries) = decl {
            for entry in entries {
                if entry.slot < 0 {
                    return Err(CompileError::Semantic(format!(
                        "global {} has a negative slot",
                        entry.name
                    )));
                }
                max_slot = Some(max_slot.map_or(entry.slot, |m| m.max(entry.slot)));
            }
        }
    }
    match max_slot {
        None => Ok(0),
        Some(max) => {
            let base = unsafe { bcpl_runtime::builtins::bcpl_vec(max + 1) };
            if base == 0 {
                return Err(CompileError::Resource(
                    "global vector allocation failed".to_string(),
                ));
            }
            Ok(base)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_taxonomy() {
        let lexical = CompileError::Lexical {
            line: 3,
            column: 7,
            message: "unterminated string literal".into(),
        };
        assert!(lexical.to_string().contains("3:7"));

        let syntax = CompileError::Syntax {
            line: 2,
            message: "expected THEN".into(),
        };
        assert!(syntax.to_string().contains("line 2"));
    }

    #[test]
    fn test_compile_source_produces_executable_memory() {
        let runtime = Runtime::new();
        let config = CompilerConfig::default();
        let compiled = compile_source(
            r#"LET START() BE $( WRITES("HI"); NEWLINE() $)"#,
            &runtime,
            &config,
        )
        .unwrap();
        assert!(compiled.entry_address() != 0);
        assert!(compiled.function_address("START").is_some());
        assert!(compiled.code_size() > 0);
        assert!(compiled.listing().contains("bl START"));
    }

    #[test]
    fn test_optimized_compile_of_the_pipeline_scenarios() {
        let runtime = Runtime::new();
        let config = CompilerConfig::default().with_optimization(true);
        for source in [
            r#"LET START() BE $( LET X = 2 + 3 * 4; IF X = 14 THEN WRITES("OK") $)"#,
            r#"LET FACT(N) = VALOF $( LET R = 1; FOR I = 2 TO N DO R := R * I; RESULTIS R $)
               LET START() BE WRITEN(FACT(6))"#,
        ] {
            compile_source(source, &runtime, &config).unwrap();
        }
    }

    #[test]
    fn test_parse_errors_propagate() {
        let runtime = Runtime::new();
        let config = CompilerConfig::default();
        assert!(matches!(
            compile_source("LET START() BE IF", &runtime, &config),
            Err(CompileError::Syntax { .. })
        ));
    }
}
