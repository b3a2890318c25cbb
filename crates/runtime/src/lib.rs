//! BCPL JIT runtime.
//!
//! One process-wide record backs every compiled program: a symbol table for
//! generated-code linkage, current-input/current-output stream holders, and
//! function-pointer thunks onto the C standard library. Executable memory
//! management lives here too, so the compiler crate carries no `unsafe`
//! platform code of its own.

pub mod builtins;
pub mod context;
pub mod memory;
pub mod symbols;

pub use context::RuntimeContext;
pub use memory::{ExecutableMemory, MemoryError, page_size};
pub use symbols::{SymbolError, SymbolTable};

/// Compiler-side handle over the process runtime: the symbol table consulted
/// during code generation plus access to the stream holders.
#[derive(Debug)]
pub struct Runtime {
    symbols: SymbolTable,
}

impl Runtime {
    /// Create a runtime with every built-in registered.
    pub fn new() -> Self {
        let mut symbols = SymbolTable::new();
        for (name, address) in builtin_symbols() {
            // The builtin list is static and duplicate-free.
            symbols
                .register(name, address)
                .expect("builtin symbol registered twice");
        }
        Runtime { symbols }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    pub fn context(&self) -> &'static RuntimeContext {
        context::global()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

/// The built-ins generated code can link against, lowercase as they appear
/// in branch targets.
fn builtin_symbols() -> Vec<(&'static str, usize)> {
    vec![
        ("writes", builtins::bcpl_writes as usize),
        ("writen", builtins::bcpl_writen as usize),
        ("writef", builtins::bcpl_writef as usize),
        ("newline", builtins::bcpl_newline as usize),
        ("finish", builtins::bcpl_finish as usize),
        ("stop", builtins::bcpl_stop as usize),
        ("rdch", builtins::bcpl_rdch as usize),
        ("wrch", builtins::bcpl_wrch as usize),
        ("readn", builtins::bcpl_readn as usize),
        ("findinput", builtins::bcpl_findinput as usize),
        ("findoutput", builtins::bcpl_findoutput as usize),
        ("selectinput", builtins::bcpl_selectinput as usize),
        ("selectoutput", builtins::bcpl_selectoutput as usize),
        ("endread", builtins::bcpl_endread as usize),
        ("endwrite", builtins::bcpl_endwrite as usize),
        ("bcpl_vec", builtins::bcpl_vec as usize),
        ("bcpl_vec_free", builtins::bcpl_vec_free as usize),
        ("bcpl_unpack_string", builtins::bcpl_unpack_string as usize),
        ("bcpl_float", builtins::bcpl_float as usize),
        ("bcpl_trunc", builtins::bcpl_trunc as usize),
        ("bcpl_fadd", builtins::bcpl_fadd as usize),
        ("bcpl_fsub", builtins::bcpl_fsub as usize),
        ("bcpl_fmul", builtins::bcpl_fmul as usize),
        ("bcpl_fdiv", builtins::bcpl_fdiv as usize),
        ("bcpl_feq", builtins::bcpl_feq as usize),
        ("bcpl_fne", builtins::bcpl_fne as usize),
        ("bcpl_flt", builtins::bcpl_flt as usize),
        ("bcpl_fle", builtins::bcpl_fle as usize),
        ("bcpl_fgt", builtins::bcpl_fgt as usize),
        ("bcpl_fge", builtins::bcpl_fge as usize),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_registers_core_builtins() {
        let runtime = Runtime::new();
        for name in [
            "writes",
            "writen",
            "newline",
            "finish",
            "bcpl_vec",
            "bcpl_vec_free",
            "bcpl_unpack_string",
        ] {
            assert!(runtime.symbols().contains(name), "missing builtin {}", name);
        }
    }

    #[test]
    fn test_symbol_addresses_are_distinct() {
        let runtime = Runtime::new();
        let mut seen = std::collections::HashSet::new();
        for (_, addr) in runtime.symbols().iter() {
            assert!(seen.insert(addr), "two builtins share an address");
        }
    }
}
