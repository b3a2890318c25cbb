//! Stack-discipline pool of caller-saved scratch registers (x9..x15).

use crate::CompileError;

#[derive(Debug)]
pub struct ScratchAllocator {
    available: Vec<u32>,
    used: Vec<u32>,
}

impl ScratchAllocator {
    pub fn new() -> Self {
        ScratchAllocator {
            available: (9..=15).collect(),
            used: Vec::new(),
        }
    }

    /// Expression evaluation must never need more than seven live
    /// temporaries; running out is a compiler defect surfaced as an error.
    pub fn acquire(&mut self) -> Result<u32, CompileError> {
        let reg = self
            .available
            .pop()
            .ok_or_else(|| CompileError::Resource("out of scratch registers".to_string()))?;
        self.used.push(reg);
        Ok(reg)
    }

    pub fn release(&mut self, reg: u32) {
        let position = self.used.iter().position(|&r| r == reg);
        debug_assert!(position.is_some(), "releasing unacquired scratch x{}", reg);
        if let Some(index) = position {
            self.used.remove(index);
            self.available.push(reg);
        }
    }

    /// Registers currently handed out, in acquisition order.
    pub fn used_registers(&self) -> &[u32] {
        &self.used
    }

    pub fn is_balanced(&self) -> bool {
        self.used.is_empty()
    }
}

impl Default for ScratchAllocator {
    fn default() -> Self {
        ScratchAllocator::new()
    }
}

impl Drop for ScratchAllocator {
    fn drop(&mut self) {
        debug_assert!(
            self.used.is_empty(),
            "scratch registers leaked: {:?}",
            self.used
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_is_lifo() {
        let mut scratch = ScratchAllocator::new();
        let a = scratch.acquire().unwrap();
        let b = scratch.acquire().unwrap();
        assert_ne!(a, b);
        scratch.release(b);
        let c = scratch.acquire().unwrap();
        assert_eq!(b, c);
        scratch.release(c);
        scratch.release(a);
        assert!(scratch.is_balanced());
    }

    #[test]
    fn test_exhaustion_is_a_resource_error() {
        let mut scratch = ScratchAllocator::new();
        let mut held = Vec::new();
        for _ in 0..7 {
            held.push(scratch.acquire().unwrap());
        }
        assert!(matches!(
            scratch.acquire(),
            Err(CompileError::Resource(_))
        ));
        for reg in held {
            scratch.release(reg);
        }
    }
}
