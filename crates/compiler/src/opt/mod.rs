//! Tree-rewriting optimization passes.
//!
//! Every pass consumes the program by value and returns a rebuilt tree; the
//! pass manager threads ownership through the registered passes in order.

mod cse;
mod dce;
mod fold;
mod inline;
mod licm;
mod loops;

pub use cse::CommonSubexpressionEliminationPass;
pub use dce::DeadCodeEliminationPass;
pub use fold::ConstantFoldingPass;
pub use inline::FunctionInliningPass;
pub use licm::LoopInvariantCodeMotionPass;
pub use loops::LoopSpecializationPass;

use crate::CompileError;
use crate::ast::Program;
use crate::config::CompilerConfig;

pub trait OptimizationPass {
    fn name(&self) -> &'static str;
    fn apply(&mut self, program: Program) -> Result<Program, CompileError>;
}

/// Applies registered passes in order. Passes can be added after
/// construction; reordering is not supported.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        PassManager { passes: Vec::new() }
    }

    /// The default pipeline: fold, then the structural passes, then a
    /// cleanup fold and liveness-driven dead-code removal.
    pub fn standard(config: &CompilerConfig) -> Self {
        let mut manager = PassManager::new();
        manager.add_pass(Box::new(ConstantFoldingPass::new()));
        if config.cse {
            manager.add_pass(Box::new(CommonSubexpressionEliminationPass::new()));
        }
        if config.licm {
            manager.add_pass(Box::new(LoopInvariantCodeMotionPass::new()));
        }
        if config.loop_specialization {
            manager.add_pass(Box::new(LoopSpecializationPass::new()));
        }
        if config.inlining {
            manager.add_pass(Box::new(FunctionInliningPass::new(config.inline_budget)));
            // Inlined bodies expose fresh folding opportunities.
            manager.add_pass(Box::new(ConstantFoldingPass::new()));
        }
        if config.dce {
            manager.add_pass(Box::new(DeadCodeEliminationPass::new()));
        }
        manager
    }

    pub fn add_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn optimize(&mut self, program: Program) -> Result<Program, CompileError> {
        let mut current = program;
        for pass in &mut self.passes {
            tracing::debug!(pass = pass.name(), "running optimization pass");
            current = pass.apply(current)?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    #[test]
    fn test_manager_threads_passes_in_order() {
        let program = Parser::parse("LET START() BE X := 2 + 3").unwrap();
        let mut manager = PassManager::standard(&CompilerConfig::default());
        assert!(manager.pass_count() >= 4);
        let optimized = manager.optimize(program).unwrap();
        assert_eq!(optimized.declarations.len(), 1);
    }

    #[test]
    fn test_passes_can_be_added_after_construction() {
        let mut manager = PassManager::new();
        assert_eq!(manager.pass_count(), 0);
        manager.add_pass(Box::new(ConstantFoldingPass::new()));
        assert_eq!(manager.pass_count(), 1);
    }
}
