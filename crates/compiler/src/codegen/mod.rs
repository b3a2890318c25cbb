//! AArch64 code generation.
//!
//! Drives instruction emission from the optimized AST. Expression results
//! flow through x0; locals live in frame-pointer-relative slots; the
//! register manager caches hot locals in the callee-saved pool.
//!
//! # Frame layout
//!
//! The frame pointer is established at the bottom of the frame
//! (`mov x29, sp` after the allocating `sub`), so every slot sits at a
//! non-negative offset:
//!
//! ```text
//! [x29 + frame - 8]            (top of frame)
//! [x29 + 96 + 8*i]   local slot i (parameters first)
//! [x29 + 16 .. 96)   callee-saved x19..x28
//! [x29 + 0  .. 16)   saved x29 / x30
//! ```
//!
//! `frame = 96 + 8 * locals`, rounded up to 16. Only the allocating
//! `sub sp, sp, #frame` is back-patched once the local count is known; the
//! outgoing-argument area is carved dynamically at each call site, below
//! the frame.
//!
//! A small entry thunk (`__entry`) loads the global-vector base into x28
//! and calls START, so callers invoke one plain C-ABI function pointer.

pub mod insn;
pub mod labels;
pub mod registers;
pub mod scratch;

mod expr;
mod stmt;

use std::collections::{HashMap, HashSet};

use bcpl_runtime::SymbolTable;

use crate::CompileError;
use crate::ast::{Declaration, FunctionBody, FunctionDeclaration, Program};
use crate::config::CompilerConfig;
use insn::{InstructionStream, SP, X0, X28, X29, X30};
use labels::{LabelManager, ScopeKind};
use registers::RegisterManager;
use scratch::ScratchAllocator;

/// Offset of the callee-saved save area within the frame.
const CALLEE_SAVE_BASE: i64 = 16;
/// Offset of the first local slot.
const LOCALS_BASE: i64 = 96;
/// Callee-saved pairs preserved by every prologue.
const SAVED_PAIRS: [(u32, u32); 5] = [(19, 20), (21, 22), (23, 24), (25, 26), (27, 28)];

/// Name of the synthetic entry thunk.
pub const ENTRY_LABEL: &str = "__entry";

/// The result of lowering a program: a symbolic instruction stream plus the
/// stream offsets of every function entry.
pub struct GeneratedCode {
    pub stream: InstructionStream,
    pub function_offsets: HashMap<String, u64>,
}

pub struct CodeGen<'a> {
    pub(crate) insns: InstructionStream,
    pub(crate) labels: LabelManager,
    pub(crate) registers: RegisterManager,
    pub(crate) scratch: ScratchAllocator,
    symbols: &'a SymbolTable,
    config: &'a CompilerConfig,

    // Program-level state.
    manifests: HashMap<String, i64>,
    globals: HashMap<String, i64>,
    functions: HashSet<String>,
    string_pool: Vec<String>,
    function_offsets: HashMap<String, u64>,
    /// Absolute address of the global vector, embedded into the thunk.
    global_vector_base: i64,

    // Per-function state.
    current_function: String,
    /// Post-prologue re-entry point for self tail calls.
    current_tail_label: String,
    current_param_count: usize,
    locals: HashMap<String, i64>,
    local_count: usize,
}

impl<'a> CodeGen<'a> {
    pub fn new(
        symbols: &'a SymbolTable,
        config: &'a CompilerConfig,
        global_vector_base: i64,
    ) -> Self {
        CodeGen {
            insns: InstructionStream::new(),
            labels: LabelManager::new(),
            registers: RegisterManager::new(),
            scratch: ScratchAllocator::new(),
            symbols,
            config,
            manifests: HashMap::new(),
            globals: HashMap::new(),
            functions: HashSet::new(),
            string_pool: Vec::new(),
            function_offsets: HashMap::new(),
            global_vector_base,
            current_function: String::new(),
            current_tail_label: String::new(),
            current_param_count: 0,
            locals: HashMap::new(),
            local_count: 0,
        }
    }

    /// Lower the whole program to a symbolic instruction stream.
    pub fn generate(mut self, program: &Program) -> Result<GeneratedCode, CompileError> {
        // First pass: collect manifests, global slots, and function names.
        for decl in &program.declarations {
            match decl {
                Declaration::Manifest(entries) => {
                    for entry in entries {
                        self.manifests.insert(entry.name.clone(), entry.value);
                    }
                }
                Declaration::Global(entries) => {
                    for entry in entries {
                        self.globals.insert(entry.name.clone(), entry.slot);
                    }
                }
                Declaration::Function(func) => {
                    self.functions.insert(func.name.clone());
                }
                _ => {}
            }
        }

        if !self.functions.contains("START") {
            return Err(CompileError::Semantic(
                "no START function defined".to_string(),
            ));
        }

        self.emit_entry_thunk()?;

        for decl in &program.declarations {
            match decl {
                Declaration::Function(func) => self.emit_function(func)?,
                Declaration::Let(_) => {
                    tracing::warn!("top-level value bindings are not compiled");
                }
                _ => {}
            }
        }

        self.emit_string_pool()?;

        // Every recorded fixup must have found a definition somewhere.
        for fixup in self.labels.take_fixups() {
            if !self.labels.is_defined(&fixup.label) {
                return Err(CompileError::Semantic(format!(
                    "unresolved label: {}",
                    fixup.label
                )));
            }
        }

        Ok(GeneratedCode {
            stream: self.insns,
            function_offsets: self.function_offsets,
        })
    }

    /// The C-ABI entry point: establish the global-vector register, call
    /// START, and restore the caller's x28.
    fn emit_entry_thunk(&mut self) -> Result<(), CompileError> {
        let offset = self.insns.current_offset();
        self.insns.set_pending_label(ENTRY_LABEL);
        self.labels.define_global_label(ENTRY_LABEL, offset)?;
        self.function_offsets.insert(ENTRY_LABEL.to_string(), offset);

        self.insns.sub_imm(SP, SP, 32, "entry frame");
        self.insns.stp(X29, X30, SP, 0, "save frame pointer and link register");
        self.insns.str_imm(X28, SP, 16, "save global vector register");
        self.insns.mov_sp(X29, SP, "establish frame pointer");
        self.insns
            .load_immediate(X28, self.global_vector_base, "global vector base");
        self.labels.request_fixup("START", self.insns.current_offset());
        self.insns.bl("START", "run the program");
        self.insns.ldr_imm(X28, SP, 16, "restore global vector register");
        self.insns.ldp(X29, X30, SP, 0, "restore frame pointer and link register");
        self.insns.add_imm(SP, SP, 32, "release entry frame");
        self.insns.ret("");
        Ok(())
    }

    fn emit_function(&mut self, func: &FunctionDeclaration) -> Result<(), CompileError> {
        tracing::debug!(function = %func.name, "compiling function");
        if func.params.len() > 8 {
            return Err(CompileError::Resource(format!(
                "function {} has more than eight parameters",
                func.name
            )));
        }

        self.registers.reset();
        self.scratch = ScratchAllocator::new();
        self.locals.clear();
        self.local_count = 0;
        self.current_function = func.name.clone();
        self.current_param_count = func.params.len();

        self.labels.push_scope(ScopeKind::Function);
        let entry_offset = self.insns.current_offset();
        self.insns.set_pending_label(&func.name);
        self.labels.define_global_label(&func.name, entry_offset)?;
        self.function_offsets.insert(func.name.clone(), entry_offset);

        // Prologue. The frame-allocating sub is patched once the local
        // count is final.
        let frame_sub_index = self.insns.len();
        self.insns.sub_imm(SP, SP, 0, "allocate stack frame");
        self.insns.stp(X29, X30, SP, 0, "save frame pointer and link register");
        self.insns.mov_sp(X29, SP, "establish frame pointer");
        for (index, (first, second)) in SAVED_PAIRS.iter().enumerate() {
            self.insns.stp(
                *first,
                *second,
                X29,
                (CALLEE_SAVE_BASE + 16 * index as i64) as i32,
                "save callee-saved registers",
            );
        }

        // Self tail calls re-enter here with fresh arguments in x0..xn,
        // re-using the frame the prologue just built.
        let tail_label = self.labels.generate_label(&format!("{}_tail", func.name));
        self.define_here(&tail_label)?;
        self.current_tail_label = tail_label;

        // Parameters go straight to their stack homes; the first read pulls
        // them into pool registers.
        for (index, param) in func.params.iter().enumerate() {
            let offset = self.allocate_local(param);
            self.insns.str_imm(
                X0 + index as u32,
                X29,
                offset,
                &format!("spill parameter {}", param),
            );
        }

        match &func.body {
            FunctionBody::Statement(stmt) => self.emit_stmt(stmt)?,
            FunctionBody::Expression(expr) => self.emit_expr(expr)?,
        }

        // Return path: dirty write-back, callee restores, frame release.
        let return_label = self.labels.current_return_label()?.to_string();
        self.insns.set_pending_label(&return_label);
        self.labels
            .define_label(&return_label, self.insns.current_offset())?;
        self.registers.spill_all_dirty(&mut self.insns);

        let frame = self.frame_size();
        if frame >= 4096 {
            return Err(CompileError::Resource(format!(
                "stack frame of {} exceeds the addressable range ({} bytes)",
                func.name, frame
            )));
        }
        let sub = self.insns.at_mut(frame_sub_index);
        sub.encoding |= (frame as u32) << 10;
        sub.assembly = format!("sub sp, sp, #{}", frame);

        for (index, (first, second)) in SAVED_PAIRS.iter().enumerate() {
            self.insns.ldp(
                *first,
                *second,
                X29,
                (CALLEE_SAVE_BASE + 16 * index as i64) as i32,
                "restore callee-saved registers",
            );
        }
        self.insns.ldp(X29, X30, SP, 0, "restore frame pointer and link register");
        self.insns.add_imm(SP, SP, frame as u32, "release stack frame");
        self.insns.ret("");

        self.labels.pop_scope()?;
        debug_assert!(
            self.scratch.is_balanced(),
            "scratch registers leaked in {}",
            func.name
        );
        Ok(())
    }

    /// String literals, widened to 32-bit code points, after the code.
    fn emit_string_pool(&mut self) -> Result<(), CompileError> {
        for index in 0..self.string_pool.len() {
            let label = string_label(index);
            let text = self.string_pool[index].clone();
            self.insns.set_pending_label(&label);
            self.labels
                .define_global_label(&label, self.insns.current_offset())?;
            for ch in text.chars() {
                self.insns.word(ch as u32, "");
            }
            self.insns.word(0, "string terminator");
        }
        Ok(())
    }

    pub(crate) fn intern_string(&mut self, text: &str) -> String {
        if let Some(index) = self.string_pool.iter().position(|s| s == text) {
            return string_label(index);
        }
        self.string_pool.push(text.to_string());
        string_label(self.string_pool.len() - 1)
    }

    fn frame_size(&self) -> i64 {
        let raw = LOCALS_BASE + 8 * self.local_count as i64;
        (raw + 15) & !15
    }

    pub(crate) fn allocate_local(&mut self, name: &str) -> i64 {
        if let Some(&offset) = self.locals.get(name) {
            return offset;
        }
        let offset = LOCALS_BASE + 8 * self.local_count as i64;
        self.local_count += 1;
        self.locals.insert(name.to_string(), offset);
        offset
    }

    pub(crate) fn local_offset(&self, name: &str) -> Result<i64, CompileError> {
        self.locals.get(name).copied().ok_or_else(|| {
            CompileError::Semantic(format!(
                "undefined variable {} in {}",
                name, self.current_function
            ))
        })
    }

    pub(crate) fn manifest_value(&self, name: &str) -> Option<i64> {
        self.manifests.get(name).copied()
    }

    pub(crate) fn global_slot(&self, name: &str) -> Option<i64> {
        self.globals.get(name).copied()
    }

    pub(crate) fn is_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub(crate) fn is_local(&self, name: &str) -> bool {
        self.locals.contains_key(name)
    }

    pub(crate) fn current_function(&self) -> &str {
        &self.current_function
    }

    pub(crate) fn current_tail_label(&self) -> &str {
        &self.current_tail_label
    }

    pub(crate) fn current_param_count(&self) -> usize {
        self.current_param_count
    }

    /// Spill and drop every cached variable binding; required before any
    /// instruction that another control path can reach.
    pub(crate) fn flush_variables(&mut self) {
        self.registers.flush(&mut self.insns);
    }

    /// Flush, then place a control-flow label on the next instruction.
    pub(crate) fn control_label_here(&mut self, label: &str) -> Result<(), CompileError> {
        self.flush_variables();
        self.define_here(label)
    }

    pub(crate) fn config(&self) -> &CompilerConfig {
        self.config
    }

    pub(crate) fn runtime_address(&self, symbol: &str) -> Result<i64, CompileError> {
        Ok(self.symbols.address_of(symbol)? as i64)
    }

    /// Place `label` on the next instruction and record its position.
    pub(crate) fn define_here(&mut self, label: &str) -> Result<(), CompileError> {
        self.insns.set_pending_label(label);
        self.labels.define_label(label, self.insns.current_offset())
    }

    /// Record a fixup for a branch that is about to be emitted.
    pub(crate) fn note_branch(&mut self, label: &str) {
        self.labels.request_fixup(label, self.insns.current_offset());
    }

    /// Local user labels are qualified per function so a GOTO cannot
    /// silently bind to a label in another function.
    pub(crate) fn user_label(&self, name: &str) -> String {
        format!("{}.{}", self.current_function, name)
    }
}

fn string_label(index: usize) -> String {
    format!(".L.str{}", index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use bcpl_runtime::Runtime;

    fn generate(source: &str) -> GeneratedCode {
        let runtime = Runtime::new();
        let config = CompilerConfig::default();
        let program = Parser::parse(source).unwrap();
        let codegen = CodeGen::new(runtime.symbols(), &config, 0);
        codegen.generate(&program).unwrap()
    }

    fn generate_err(source: &str) -> CompileError {
        let runtime = Runtime::new();
        let config = CompilerConfig::default();
        let program = Parser::parse(source).unwrap();
        let codegen = CodeGen::new(runtime.symbols(), &config, 0);
        codegen.generate(&program).unwrap_err()
    }

    #[test]
    fn test_generated_stream_resolves_and_encodes() {
        let mut code = generate(r#"LET START() BE $( WRITES("HI"); NEWLINE() $)"#);
        code.stream.assign_addresses(0x10000);
        code.stream.resolve_branches().unwrap();
        let bytes = code.stream.to_bytes();
        assert_eq!(bytes.len(), code.stream.len() * 4);
        assert!(code.function_offsets.contains_key("START"));
        assert!(code.function_offsets.contains_key(ENTRY_LABEL));
    }

    #[test]
    fn test_missing_start_is_a_semantic_error() {
        let err = generate_err("LET HELPER() BE RETURN");
        assert!(matches!(err, CompileError::Semantic(_)));
    }

    #[test]
    fn test_unknown_routine_is_a_semantic_error() {
        let err = generate_err("LET START() BE NOSUCH(1)");
        assert!(matches!(err, CompileError::Semantic(_)));
    }

    #[test]
    fn test_goto_to_missing_label_is_fatal() {
        let err = generate_err("LET START() BE GOTO NOWHERE");
        assert!(matches!(err, CompileError::Semantic(_)));
    }

    #[test]
    fn test_assignment_to_manifest_is_fatal() {
        let err = generate_err(
            "MANIFEST $( K = 1 $)\nLET START() BE K := 2",
        );
        assert!(matches!(err, CompileError::Semantic(_)));
    }

    #[test]
    fn test_assignment_to_literal_is_fatal() {
        let err = generate_err("LET START() BE 3 := 2");
        assert!(matches!(err, CompileError::Semantic(_)));
    }

    #[test]
    fn test_instruction_addresses_are_consecutive() {
        let mut code = generate("LET START() BE RETURN");
        code.stream.assign_addresses(0);
        for (i, instr) in code.stream.instructions().iter().enumerate() {
            assert_eq!(instr.address, 4 * i as u64);
        }
    }

    #[test]
    fn test_tail_recursive_call_branches_to_entry() {
        let code = generate(
            r#"
            LET FACT_TAIL(N, A) = VALOF $(
                TEST N = 0 THEN RESULTIS A
                OR RESULTIS FACT_TAIL(N - 1, N * A)
            $)
            LET START() BE WRITEN(FACT_TAIL(6, 1))
            "#,
        );
        // The recursive call must be a plain branch back to the function's
        // post-prologue entry point, not a BL; the only BL to FACT_TAIL is
        // the outside call from START.
        let back_edges = code
            .stream
            .instructions()
            .iter()
            .filter(|i| i.assembly.starts_with("b FACT_TAIL_tail"))
            .count();
        assert_eq!(back_edges, 1);
        let frame_building_calls = code
            .stream
            .instructions()
            .iter()
            .filter(|i| i.assembly == "bl FACT_TAIL")
            .count();
        assert_eq!(frame_building_calls, 1, "only START may BL into FACT_TAIL");
    }

    #[test]
    fn test_string_literals_are_pooled_and_terminated() {
        let mut code = generate(r#"LET START() BE WRITES("HI")"#);
        code.stream.assign_addresses(0);
        code.stream.resolve_branches().unwrap();
        let instrs = code.stream.instructions();
        let pool_start = instrs
            .iter()
            .position(|i| i.labels.iter().any(|l| l == ".L.str0"))
            .expect("string pool emitted");
        assert_eq!(instrs[pool_start].encoding, u32::from(b'H'));
        assert_eq!(instrs[pool_start + 1].encoding, u32::from(b'I'));
        assert_eq!(instrs[pool_start + 2].encoding, 0);
    }

    #[test]
    fn test_identical_strings_share_a_pool_entry() {
        let code = generate(r#"LET START() BE $( WRITES("A"); WRITES("A") $)"#);
        let pool_entries = code
            .stream
            .instructions()
            .iter()
            .filter(|i| i.labels.iter().any(|l| l.starts_with(".L.str")))
            .count();
        assert_eq!(pool_entries, 1);
    }
}
