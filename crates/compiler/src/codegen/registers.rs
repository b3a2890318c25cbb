//! Variable-to-register management for the callee-saved pool (x19..x27).
//!
//! Tracks which callee-saved register holds which variable, each variable's
//! stack home relative to the frame pointer, a dirty set for write-back, and
//! an LRU list for eviction. Spilling prefers a clean least-recently-used
//! register; only a dirty victim costs a store.

use std::collections::{HashMap, HashSet};

use crate::CompileError;
use crate::codegen::insn::{InstructionStream, X29};

/// First and last registers of the allocatable pool.
pub const POOL_FIRST: u32 = 19;
pub const POOL_LAST: u32 = 27;

#[derive(Debug, Default)]
pub struct RegisterManager {
    available: Vec<u32>,
    used: HashSet<u32>,
    var_to_reg: HashMap<String, u32>,
    reg_to_var: HashMap<u32, String>,
    var_to_offset: HashMap<String, i64>,
    dirty: HashSet<u32>,
    /// Most recently used first.
    lru: Vec<u32>,
}

impl RegisterManager {
    pub fn new() -> Self {
        let mut manager = RegisterManager::default();
        manager.reset();
        manager
    }

    /// Clear all state and refill the pool; called per function.
    pub fn reset(&mut self) {
        self.available = (POOL_FIRST..=POOL_LAST).collect();
        self.used.clear();
        self.var_to_reg.clear();
        self.reg_to_var.clear();
        self.var_to_offset.clear();
        self.dirty.clear();
        self.lru.clear();
    }

    fn touch(&mut self, reg: u32) {
        self.lru.retain(|&r| r != reg);
        self.lru.insert(0, reg);
    }

    fn is_pool_register(reg: u32) -> bool {
        (POOL_FIRST..=POOL_LAST).contains(&reg)
    }

    pub fn register_of(&self, var: &str) -> Option<u32> {
        self.var_to_reg.get(var).copied()
    }

    pub fn variable_of(&self, reg: u32) -> Option<&str> {
        self.reg_to_var.get(&reg).map(String::as_str)
    }

    pub fn stack_offset_of(&self, var: &str) -> Option<i64> {
        self.var_to_offset.get(var).copied()
    }

    pub fn is_dirty(&self, reg: u32) -> bool {
        self.dirty.contains(&reg)
    }

    /// Record that an incoming argument already sits in `reg`. The register
    /// is not marked dirty; the caller's value is assumed consistent with
    /// the stack home.
    pub fn assign_parameter(
        &mut self,
        var: &str,
        reg: u32,
        stack_offset: i64,
    ) -> Result<(), CompileError> {
        if let Some(owner) = self.reg_to_var.get(&reg)
            && owner != var
        {
            return Err(CompileError::Semantic(format!(
                "register x{} already holds {} while binding parameter {}",
                reg, owner, var
            )));
        }
        if let Some(old_reg) = self.var_to_reg.remove(var) {
            self.reg_to_var.remove(&old_reg);
            self.used.remove(&old_reg);
            if old_reg != reg && Self::is_pool_register(old_reg) {
                self.available.push(old_reg);
            }
        }
        self.var_to_reg.insert(var.to_string(), reg);
        self.reg_to_var.insert(reg, var.to_string());
        self.var_to_offset.insert(var.to_string(), stack_offset);
        self.used.insert(reg);
        self.available.retain(|&r| r != reg);
        self.touch(reg);
        Ok(())
    }

    /// A register holding `var`, loading from the stack home on a miss.
    pub fn acquire(
        &mut self,
        var: &str,
        stack_offset: i64,
        insns: &mut InstructionStream,
    ) -> Result<u32, CompileError> {
        if let Some(reg) = self.var_to_reg.get(var).copied() {
            self.touch(reg);
            return Ok(reg);
        }
        let reg = self.find_and_assign(var, stack_offset, insns)?;
        insns.ldr_imm(
            reg,
            X29,
            stack_offset,
            &format!("load {} into x{}", var, reg),
        );
        Ok(reg)
    }

    /// Like `acquire`, but without the load: the caller will produce the
    /// value straight into the register.
    pub fn acquire_for_init(
        &mut self,
        var: &str,
        stack_offset: i64,
        insns: &mut InstructionStream,
    ) -> Result<u32, CompileError> {
        if let Some(reg) = self.var_to_reg.get(var).copied() {
            self.touch(reg);
            return Ok(reg);
        }
        self.find_and_assign(var, stack_offset, insns)
    }

    fn find_and_assign(
        &mut self,
        var: &str,
        stack_offset: i64,
        insns: &mut InstructionStream,
    ) -> Result<u32, CompileError> {
        let reg = match self.available.pop() {
            Some(free) => free,
            None => self.evict(insns)?,
        };
        self.var_to_reg.insert(var.to_string(), reg);
        self.reg_to_var.insert(reg, var.to_string());
        self.var_to_offset.insert(var.to_string(), stack_offset);
        self.used.insert(reg);
        self.touch(reg);
        Ok(reg)
    }

    /// Pick a victim: the least-recently-used clean register if one exists,
    /// otherwise the least-recently-used register outright (spilled first).
    fn evict(&mut self, insns: &mut InstructionStream) -> Result<u32, CompileError> {
        let victim = self
            .lru
            .iter()
            .rev()
            .copied()
            .find(|reg| !self.dirty.contains(reg))
            .or_else(|| self.lru.last().copied())
            .ok_or_else(|| {
                CompileError::Resource("no registers available to spill".to_string())
            })?;

        if self.dirty.contains(&victim) {
            self.spill(victim, insns);
        }

        // Invalidate the evicted variable's binding before reuse.
        if let Some(old_var) = self.reg_to_var.remove(&victim) {
            self.var_to_reg.remove(&old_var);
        }
        self.used.remove(&victim);
        self.lru.retain(|&r| r != victim);
        Ok(victim)
    }

    /// Store a dirty register back to its stack home and mark it clean.
    pub fn spill(&mut self, reg: u32, insns: &mut InstructionStream) {
        if let Some(var) = self.reg_to_var.get(&reg) {
            let offset = self.var_to_offset[var];
            insns.str_imm(reg, X29, offset, &format!("spill {} from x{}", var, reg));
            self.dirty.remove(&reg);
        }
    }

    /// Release, spilling first iff dirty.
    pub fn release(&mut self, reg: u32, insns: &mut InstructionStream) {
        if !self.used.contains(&reg) {
            return;
        }
        if self.dirty.contains(&reg) {
            self.spill(reg, insns);
        }
        self.release_without_spill(reg);
    }

    /// Release discarding any unsaved value.
    pub fn release_without_spill(&mut self, reg: u32) {
        if !self.used.remove(&reg) {
            return;
        }
        if let Some(var) = self.reg_to_var.remove(&reg) {
            self.var_to_reg.remove(&var);
            self.var_to_offset.remove(&var);
        }
        self.dirty.remove(&reg);
        self.lru.retain(|&r| r != reg);
        // Only pool registers return to the free list.
        if Self::is_pool_register(reg) {
            self.available.push(reg);
        }
    }

    /// Forget a variable's binding without touching the register pool (the
    /// value in memory is now authoritative).
    pub fn remove_variable(&mut self, var: &str) {
        if let Some(reg) = self.var_to_reg.remove(var) {
            self.reg_to_var.remove(&reg);
            self.dirty.remove(&reg);
            self.used.remove(&reg);
            self.lru.retain(|&r| r != reg);
            if Self::is_pool_register(reg) {
                self.available.push(reg);
            }
        }
        self.var_to_offset.remove(var);
    }

    pub fn mark_dirty(&mut self, var: &str) {
        if let Some(&reg) = self.var_to_reg.get(var) {
            self.dirty.insert(reg);
        }
    }

    /// Write every dirty register back to its home (function exits, call
    /// sites).
    pub fn spill_all_dirty(&mut self, insns: &mut InstructionStream) {
        let dirty: Vec<u32> = self.dirty.iter().copied().collect();
        for reg in dirty {
            self.spill(reg, insns);
        }
        self.dirty.clear();
    }

    /// Write back everything dirty and drop every binding. Emitted at
    /// control-flow joins so that every runtime path re-enters with the
    /// authoritative values in memory.
    pub fn flush(&mut self, insns: &mut InstructionStream) {
        self.spill_all_dirty(insns);
        let held: Vec<u32> = self.used.iter().copied().collect();
        for reg in held {
            self.release_without_spill(reg);
        }
    }

    /// Drop every binding that lives in a caller-saved register (argument
    /// registers after a call).
    pub fn invalidate_caller_saved(&mut self) {
        let stale: Vec<String> = self
            .var_to_reg
            .iter()
            .filter(|(_, &reg)| !Self::is_pool_register(reg))
            .map(|(var, _)| var.clone())
            .collect();
        for var in stale {
            self.remove_variable(&var);
        }
    }

    /// Internal-consistency check used by tests: each register appears in
    /// at most one of {available, used}, and the two maps are inverses.
    #[cfg(test)]
    fn check_invariants(&self) {
        for reg in &self.available {
            assert!(!self.used.contains(reg), "x{} both available and used", reg);
        }
        for (var, reg) in &self.var_to_reg {
            assert_eq!(self.reg_to_var.get(reg), Some(var), "maps disagree on x{}", reg);
        }
        for (reg, var) in &self.reg_to_var {
            assert_eq!(self.var_to_reg.get(var), Some(reg), "maps disagree on {}", var);
        }
        for reg in &self.dirty {
            let var = self.reg_to_var.get(reg).expect("dirty register has a variable");
            assert!(
                self.var_to_offset.contains_key(var),
                "dirty register x{} has no stack home",
                reg
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::insn::InstructionStream;

    #[test]
    fn test_acquire_emits_one_load() {
        let mut regs = RegisterManager::new();
        let mut insns = InstructionStream::new();
        let reg = regs.acquire("A", -8, &mut insns).unwrap();
        assert!(RegisterManager::is_pool_register(reg));
        assert_eq!(insns.len(), 1);
        assert!(insns.at(0).assembly.starts_with("ldr"));
        regs.check_invariants();

        // Second acquire of the same variable is a hit: no new load.
        let again = regs.acquire("A", -8, &mut insns).unwrap();
        assert_eq!(reg, again);
        assert_eq!(insns.len(), 1);
    }

    #[test]
    fn test_acquire_for_init_skips_the_load() {
        let mut regs = RegisterManager::new();
        let mut insns = InstructionStream::new();
        regs.acquire_for_init("A", -8, &mut insns).unwrap();
        assert!(insns.is_empty());
        regs.check_invariants();
    }

    #[test]
    fn test_release_spills_only_dirty_registers() {
        let mut regs = RegisterManager::new();
        let mut insns = InstructionStream::new();
        let clean = regs.acquire_for_init("A", -8, &mut insns).unwrap();
        regs.release(clean, &mut insns);
        assert!(insns.is_empty());

        let dirty = regs.acquire_for_init("B", -16, &mut insns).unwrap();
        regs.mark_dirty("B");
        regs.release(dirty, &mut insns);
        assert_eq!(insns.len(), 1);
        assert!(insns.at(0).assembly.starts_with("str"));
        // Spilled and released: dirty flag gone, register free again.
        assert!(!regs.is_dirty(dirty));
        regs.check_invariants();
    }

    #[test]
    fn test_eviction_prefers_clean_lru_register() {
        let mut regs = RegisterManager::new();
        let mut insns = InstructionStream::new();

        // Fill the whole pool; mark every variable dirty except the first.
        let mut first = None;
        for i in 0..(POOL_LAST - POOL_FIRST + 1) {
            let name = format!("V{}", i);
            let reg = regs
                .acquire_for_init(&name, -8 * (i as i64 + 1), &mut insns)
                .unwrap();
            if i == 0 {
                first = Some(reg);
            } else {
                regs.mark_dirty(&name);
            }
        }
        let clean_reg = first.unwrap();

        let emitted_before = insns.len();
        let reg = regs.acquire_for_init("EXTRA", -128, &mut insns).unwrap();
        // The clean LRU register was chosen and no spill store was emitted.
        assert_eq!(reg, clean_reg);
        assert_eq!(insns.len(), emitted_before);
        assert_eq!(regs.register_of("V0"), None);
        regs.check_invariants();
    }

    #[test]
    fn test_eviction_spills_dirty_lru_when_all_dirty() {
        let mut regs = RegisterManager::new();
        let mut insns = InstructionStream::new();
        for i in 0..(POOL_LAST - POOL_FIRST + 1) {
            let name = format!("V{}", i);
            regs.acquire_for_init(&name, -8 * (i as i64 + 1), &mut insns)
                .unwrap();
            regs.mark_dirty(&name);
        }

        let before = insns.len();
        regs.acquire_for_init("EXTRA", -128, &mut insns).unwrap();
        // The LRU victim (V0) was stored to its home.
        assert_eq!(insns.len(), before + 1);
        assert!(insns.at(before).assembly.starts_with("str"));
        assert_eq!(regs.register_of("V0"), None);
        regs.check_invariants();
    }

    #[test]
    fn test_parameter_assignment_is_not_dirty_and_never_pollutes_pool() {
        let mut regs = RegisterManager::new();
        let mut insns = InstructionStream::new();
        regs.assign_parameter("N", 0, -8).unwrap();
        assert!(!regs.is_dirty(0));
        assert_eq!(regs.register_of("N"), Some(0));

        // Releasing the argument register must not add x0 to the pool.
        regs.release_without_spill(0);
        assert_eq!(regs.register_of("N"), None);
        let mut seen = std::collections::HashSet::new();
        for i in 0..64 {
            let name = format!("V{}", i);
            match regs.acquire_for_init(&name, -8, &mut insns) {
                Ok(reg) => {
                    assert!(RegisterManager::is_pool_register(reg), "handed out x{}", reg);
                    seen.insert(reg);
                }
                Err(_) => break,
            }
        }
        regs.check_invariants();
    }

    #[test]
    fn test_flush_spills_and_clears_all_bindings() {
        let mut regs = RegisterManager::new();
        let mut insns = InstructionStream::new();
        regs.acquire_for_init("A", -8, &mut insns).unwrap();
        regs.acquire_for_init("B", -16, &mut insns).unwrap();
        regs.mark_dirty("A");
        regs.flush(&mut insns);
        assert_eq!(insns.len(), 1);
        assert_eq!(regs.register_of("A"), None);
        assert_eq!(regs.register_of("B"), None);
        // The whole pool is free again.
        assert_eq!(regs.available.len(), (POOL_LAST - POOL_FIRST + 1) as usize);
        regs.check_invariants();
    }

    #[test]
    fn test_spill_all_dirty_clears_the_set() {
        let mut regs = RegisterManager::new();
        let mut insns = InstructionStream::new();
        regs.acquire_for_init("A", -8, &mut insns).unwrap();
        regs.acquire_for_init("B", -16, &mut insns).unwrap();
        regs.mark_dirty("A");
        regs.mark_dirty("B");
        regs.spill_all_dirty(&mut insns);
        assert_eq!(insns.len(), 2);
        assert!(!regs.is_dirty(regs.register_of("A").unwrap()));
        regs.check_invariants();
    }

    #[test]
    fn test_invalidate_caller_saved_drops_argument_bindings() {
        let mut regs = RegisterManager::new();
        let mut insns = InstructionStream::new();
        regs.assign_parameter("N", 0, -8).unwrap();
        let pool_reg = regs.acquire_for_init("A", -16, &mut insns).unwrap();
        regs.invalidate_caller_saved();
        assert_eq!(regs.register_of("N"), None);
        assert_eq!(regs.register_of("A"), Some(pool_reg));
        regs.check_invariants();
    }
}
