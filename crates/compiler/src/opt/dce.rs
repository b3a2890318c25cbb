//! Dead code elimination driven by liveness.
//!
//! Per function: build the CFG, run the backward liveness analysis, then
//! rebuild the body dropping LET bindings whose name is dead at the
//! declaration and bare-name assignments whose target is dead at the
//! assignment's out-point. A LET with every binding dropped disappears; a
//! dropped assignment becomes an empty compound statement.

use super::OptimizationPass;
use crate::CompileError;
use crate::ast::{
    Declaration, Expression, FunctionBody, FunctionDeclaration, Program, Statement, SwitchCase,
};
use crate::cfg::Cfg;
use crate::liveness::LivenessAnalysis;

pub struct DeadCodeEliminationPass;

impl DeadCodeEliminationPass {
    pub fn new() -> Self {
        DeadCodeEliminationPass
    }
}

impl Default for DeadCodeEliminationPass {
    fn default() -> Self {
        DeadCodeEliminationPass::new()
    }
}

impl OptimizationPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn apply(&mut self, program: Program) -> Result<Program, CompileError> {
        let declarations = program
            .declarations
            .into_iter()
            .map(|decl| match decl {
                Declaration::Function(func) => Declaration::Function(sweep_function(func)),
                other => other,
            })
            .collect();
        Ok(Program { declarations })
    }
}

fn sweep_function(func: FunctionDeclaration) -> FunctionDeclaration {
    let cfg = Cfg::build(&func);
    let analysis = LivenessAnalysis::analyze(&cfg);

    let body = match &func.body {
        FunctionBody::Statement(stmt) => {
            FunctionBody::Statement(sweep_stmt(stmt, &analysis).unwrap_or_else(Statement::empty))
        }
        FunctionBody::Expression(Expression::Valof(inner)) => {
            FunctionBody::Expression(Expression::Valof(Box::new(
                sweep_stmt(inner, &analysis).unwrap_or_else(Statement::empty),
            )))
        }
        FunctionBody::Expression(expr) => FunctionBody::Expression(expr.clone()),
    };

    FunctionDeclaration {
        name: func.name,
        params: func.params,
        body,
    }
}

/// Rebuild `stmt`, returning `None` when it is removed entirely.
fn sweep_stmt(stmt: &Statement, analysis: &LivenessAnalysis) -> Option<Statement> {
    match stmt {
        Statement::Declaration(decl) if matches!(decl.as_ref(), Declaration::Let(_)) => {
            let Declaration::Let(bindings) = decl.as_ref() else {
                unreachable!()
            };
            // Drop bindings whose name is dead right after the declaration.
            // A statement the analysis never saw (a VALOF nested inside an
            // expression) is kept untouched.
            let Some(live_out) = analysis.stmt_live_out(stmt) else {
                return Some(stmt.clone());
            };
            let kept: Vec<_> = bindings
                .iter()
                .filter(|binding| live_out.contains(&binding.name))
                .cloned()
                .collect();
            if kept.is_empty() {
                None
            } else {
                Some(Statement::Declaration(Box::new(Declaration::Let(kept))))
            }
        }

        Statement::Assignment { targets, values } => {
            if targets.len() == 1
                && let Expression::VariableAccess(name) = &targets[0]
                && let Some(live_out) = analysis.stmt_live_out(stmt)
                && !live_out.contains(name)
            {
                return Some(Statement::empty());
            }
            Some(Statement::Assignment {
                targets: targets.clone(),
                values: values.clone(),
            })
        }

        Statement::Compound(children) => Some(Statement::Compound(
            children
                .iter()
                .filter_map(|child| sweep_stmt(child, analysis))
                .collect(),
        )),

        Statement::If {
            condition,
            then_branch,
        } => Some(Statement::If {
            condition: condition.clone(),
            then_branch: Box::new(
                sweep_stmt(then_branch, analysis).unwrap_or_else(Statement::empty),
            ),
        }),

        Statement::Test {
            condition,
            then_branch,
            else_branch,
        } => Some(Statement::Test {
            condition: condition.clone(),
            then_branch: Box::new(
                sweep_stmt(then_branch, analysis).unwrap_or_else(Statement::empty),
            ),
            else_branch: else_branch
                .as_ref()
                .map(|s| Box::new(sweep_stmt(s, analysis).unwrap_or_else(Statement::empty))),
        }),

        Statement::While { condition, body } => Some(Statement::While {
            condition: condition.clone(),
            body: Box::new(sweep_stmt(body, analysis).unwrap_or_else(Statement::empty)),
        }),

        Statement::Repeat {
            body,
            condition,
            kind,
        } => Some(Statement::Repeat {
            body: Box::new(sweep_stmt(body, analysis).unwrap_or_else(Statement::empty)),
            condition: condition.clone(),
            kind: *kind,
        }),

        Statement::For {
            var,
            from,
            to,
            by,
            body,
        } => Some(Statement::For {
            var: var.clone(),
            from: from.clone(),
            to: to.clone(),
            by: by.clone(),
            body: Box::new(sweep_stmt(body, analysis).unwrap_or_else(Statement::empty)),
        }),

        Statement::Switchon {
            discriminant,
            cases,
            default,
        } => Some(Statement::Switchon {
            discriminant: discriminant.clone(),
            cases: cases
                .iter()
                .map(|c| SwitchCase {
                    value: c.value,
                    body: sweep_stmt(&c.body, analysis).unwrap_or_else(Statement::empty),
                })
                .collect(),
            default: default
                .as_ref()
                .map(|s| Box::new(sweep_stmt(s, analysis).unwrap_or_else(Statement::empty))),
        }),

        Statement::Labeled { name, body } => Some(Statement::Labeled {
            name: name.clone(),
            body: Box::new(sweep_stmt(body, analysis).unwrap_or_else(Statement::empty)),
        }),

        other => Some(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn sweep(source: &str) -> Program {
        let program = Parser::parse(source).unwrap();
        DeadCodeEliminationPass::new().apply(program).unwrap()
    }

    fn body_statements(program: &Program, name: &str) -> Vec<Statement> {
        let func = program.functions().find(|f| f.name == name).unwrap();
        match &func.body {
            FunctionBody::Statement(Statement::Compound(stmts)) => stmts.clone(),
            FunctionBody::Expression(Expression::Valof(body)) => match &**body {
                Statement::Compound(stmts) => stmts.clone(),
                other => vec![other.clone()],
            },
            FunctionBody::Statement(other) => vec![other.clone()],
            _ => panic!(),
        }
    }

    #[test]
    fn test_dead_let_binding_is_dropped() {
        let program = sweep(
            r#"LET F() = VALOF $(
                LET UNUSED = 1
                LET KEPT = 2
                RESULTIS KEPT
            $)"#,
        );
        let stmts = body_statements(&program, "F");
        assert_eq!(stmts.len(), 2);
        assert!(matches!(
            &stmts[0],
            Statement::Declaration(decl) if matches!(decl.as_ref(), Declaration::Let(bindings) if bindings[0].name == "KEPT")
        ));
    }

    #[test]
    fn test_dead_assignment_becomes_empty_compound() {
        let program = sweep(
            r#"LET F() = VALOF $(
                LET A = 1
                A := 99
                RESULTIS 0
            $)"#,
        );
        let stmts = body_statements(&program, "F");
        // Both the binding and the store are dead.
        assert!(stmts.iter().all(|s| !matches!(
            s,
            Statement::Assignment { .. } | Statement::Declaration(_)
        )));
    }

    #[test]
    fn test_live_variables_survive() {
        let program = sweep(
            r#"LET F(N) = VALOF $(
                LET R = 1
                FOR I = 2 TO N DO R := R * I
                RESULTIS R
            $)"#,
        );
        let stmts = body_statements(&program, "F");
        assert!(matches!(
            &stmts[0],
            Statement::Declaration(decl) if matches!(decl.as_ref(), Declaration::Let(bindings) if bindings[0].name == "R")
        ));
        // The loop body's store to R is still there.
        assert!(matches!(&stmts[1], Statement::For { .. }));
    }

    #[test]
    fn test_subscripted_store_is_never_dropped() {
        let program = sweep("LET F(V) BE V!0 := 42");
        let func = program.functions().find(|f| f.name == "F").unwrap();
        assert!(matches!(
            func.body,
            FunctionBody::Statement(Statement::Assignment { .. })
        ));
    }
}
