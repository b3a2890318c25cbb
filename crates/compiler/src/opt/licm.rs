//! Loop-invariant code motion for FOR loops.
//!
//! For each FOR loop, collect the variables the body can modify (plus the
//! induction variable), then hoist every non-trivial invariant expression
//! into a fresh LET placed immediately before the loop. Literals and bare
//! variable reads are never hoisted. Calls count as invariant only when the
//! callee is not a known side-effecting routine and every argument is
//! invariant.

use std::collections::HashSet;

use super::OptimizationPass;
use crate::CompileError;
use crate::ast::{
    Declaration, Expression, FunctionBody, Program, Statement, SwitchCase, ValueBinding,
};

/// Routines whose calls must never be hoisted out of a loop.
const SIDE_EFFECTING_ROUTINES: &[&str] = &["WRITES", "WRITEN", "NEWLINE", "FINISH", "READN"];

pub struct LoopInvariantCodeMotionPass {
    temp_counter: usize,
}

impl LoopInvariantCodeMotionPass {
    pub fn new() -> Self {
        LoopInvariantCodeMotionPass { temp_counter: 0 }
    }

    fn fresh_temp(&mut self) -> String {
        let name = format!("_licm_temp_{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }
}

impl Default for LoopInvariantCodeMotionPass {
    fn default() -> Self {
        LoopInvariantCodeMotionPass::new()
    }
}

impl OptimizationPass for LoopInvariantCodeMotionPass {
    fn name(&self) -> &'static str {
        "loop-invariant-code-motion"
    }

    fn apply(&mut self, program: Program) -> Result<Program, CompileError> {
        let declarations = program
            .declarations
            .into_iter()
            .map(|decl| match decl {
                Declaration::Function(mut func) => {
                    func.body = match func.body {
                        FunctionBody::Expression(expr) => {
                            FunctionBody::Expression(self.walk_expr(expr))
                        }
                        FunctionBody::Statement(stmt) => {
                            FunctionBody::Statement(self.walk_stmt(stmt))
                        }
                    };
                    Declaration::Function(func)
                }
                other => other,
            })
            .collect();
        Ok(Program { declarations })
    }
}

impl LoopInvariantCodeMotionPass {
    /// Walk looking for FOR loops; everything else passes through.
    fn walk_stmt(&mut self, stmt: Statement) -> Statement {
        match stmt {
            Statement::For { .. } => self.optimize_for(stmt),
            Statement::Compound(children) => {
                Statement::Compound(children.into_iter().map(|s| self.walk_stmt(s)).collect())
            }
            Statement::If {
                condition,
                then_branch,
            } => Statement::If {
                condition,
                then_branch: Box::new(self.walk_stmt(*then_branch)),
            },
            Statement::Test {
                condition,
                then_branch,
                else_branch,
            } => Statement::Test {
                condition,
                then_branch: Box::new(self.walk_stmt(*then_branch)),
                else_branch: else_branch.map(|s| Box::new(self.walk_stmt(*s))),
            },
            Statement::While { condition, body } => Statement::While {
                condition,
                body: Box::new(self.walk_stmt(*body)),
            },
            Statement::Repeat {
                body,
                condition,
                kind,
            } => Statement::Repeat {
                body: Box::new(self.walk_stmt(*body)),
                condition,
                kind,
            },
            Statement::Switchon {
                discriminant,
                cases,
                default,
            } => Statement::Switchon {
                discriminant,
                cases: cases
                    .into_iter()
                    .map(|c| SwitchCase {
                        value: c.value,
                        body: self.walk_stmt(c.body),
                    })
                    .collect(),
                default: default.map(|s| Box::new(self.walk_stmt(*s))),
            },
            Statement::Labeled { name, body } => Statement::Labeled {
                name,
                body: Box::new(self.walk_stmt(*body)),
            },
            other => other,
        }
    }

    fn walk_expr(&mut self, expr: Expression) -> Expression {
        match expr {
            Expression::Valof(body) => Expression::Valof(Box::new(self.walk_stmt(*body))),
            other => other,
        }
    }

    fn optimize_for(&mut self, stmt: Statement) -> Statement {
        let Statement::For {
            var,
            from,
            to,
            by,
            body,
        } = stmt
        else {
            unreachable!("optimize_for called on a non-FOR statement");
        };

        let mut modified = HashSet::new();
        modified.insert(var.clone());
        collect_modified(&body, &mut modified);

        let mut hoisted = Vec::new();
        let new_body = self.hoist_stmt(*body, &modified, &mut hoisted);

        let new_loop = Statement::For {
            var,
            from,
            to,
            by,
            body: Box::new(new_body),
        };

        if hoisted.is_empty() {
            new_loop
        } else {
            let mut statements: Vec<Statement> = hoisted
                .into_iter()
                .map(|binding| Statement::Declaration(Box::new(Declaration::Let(vec![binding]))))
                .collect();
            statements.push(new_loop);
            Statement::Compound(statements)
        }
    }

    /// Rebuild a statement, hoisting invariant expressions it evaluates.
    fn hoist_stmt(
        &mut self,
        stmt: Statement,
        modified: &HashSet<String>,
        hoisted: &mut Vec<ValueBinding>,
    ) -> Statement {
        match stmt {
            Statement::Assignment { targets, values } => Statement::Assignment {
                targets,
                values: values
                    .into_iter()
                    .map(|e| self.hoist_expr(e, modified, hoisted))
                    .collect(),
            },
            Statement::RoutineCall(call) => {
                // The call itself stays; its argument expressions may move.
                match call {
                    Expression::FunctionCall {
                        function,
                        arguments,
                    } => Statement::RoutineCall(Expression::FunctionCall {
                        function,
                        arguments: arguments
                            .into_iter()
                            .map(|a| self.hoist_expr(a, modified, hoisted))
                            .collect(),
                    }),
                    other => Statement::RoutineCall(other),
                }
            }
            Statement::Compound(children) => Statement::Compound(
                children
                    .into_iter()
                    .map(|s| self.hoist_stmt(s, modified, hoisted))
                    .collect(),
            ),
            Statement::If {
                condition,
                then_branch,
            } => Statement::If {
                condition: self.hoist_expr(condition, modified, hoisted),
                then_branch: Box::new(self.hoist_stmt(*then_branch, modified, hoisted)),
            },
            Statement::Test {
                condition,
                then_branch,
                else_branch,
            } => Statement::Test {
                condition: self.hoist_expr(condition, modified, hoisted),
                then_branch: Box::new(self.hoist_stmt(*then_branch, modified, hoisted)),
                else_branch: else_branch
                    .map(|s| Box::new(self.hoist_stmt(*s, modified, hoisted))),
            },
            Statement::While { condition, body } => Statement::While {
                condition: self.hoist_expr(condition, modified, hoisted),
                body: Box::new(self.hoist_stmt(*body, modified, hoisted)),
            },
            // A nested FOR runs its own independent hoisting.
            Statement::For { .. } => self.optimize_for(stmt),
            Statement::Labeled { name, body } => Statement::Labeled {
                name,
                body: Box::new(self.hoist_stmt(*body, modified, hoisted)),
            },
            Statement::Resultis(value) => {
                Statement::Resultis(self.hoist_expr(value, modified, hoisted))
            }
            other => other,
        }
    }

    /// Rebuild an expression bottom-up; once children are in place, an
    /// invariant non-trivial node moves out to a fresh temporary.
    fn hoist_expr(
        &mut self,
        expr: Expression,
        modified: &HashSet<String>,
        hoisted: &mut Vec<ValueBinding>,
    ) -> Expression {
        let rebuilt = match expr {
            Expression::UnaryOp { op, operand } => Expression::UnaryOp {
                op,
                operand: Box::new(self.hoist_expr(*operand, modified, hoisted)),
            },
            Expression::BinaryOp { op, left, right } => Expression::BinaryOp {
                op,
                left: Box::new(self.hoist_expr(*left, modified, hoisted)),
                right: Box::new(self.hoist_expr(*right, modified, hoisted)),
            },
            Expression::FunctionCall {
                function,
                arguments,
            } => Expression::FunctionCall {
                function,
                arguments: arguments
                    .into_iter()
                    .map(|a| self.hoist_expr(a, modified, hoisted))
                    .collect(),
            },
            other => other,
        };

        if is_hoistable(&rebuilt) && is_invariant(&rebuilt, modified) {
            let temp = self.fresh_temp();
            hoisted.push(ValueBinding {
                name: temp.clone(),
                init: Some(rebuilt),
            });
            Expression::variable(temp)
        } else {
            rebuilt
        }
    }
}

/// Worth naming: operators and calls, never literals or bare variables.
fn is_hoistable(expr: &Expression) -> bool {
    matches!(
        expr,
        Expression::UnaryOp { .. } | Expression::BinaryOp { .. } | Expression::FunctionCall { .. }
    )
}

fn is_invariant(expr: &Expression, modified: &HashSet<String>) -> bool {
    match expr {
        Expression::NumberLiteral(_)
        | Expression::FloatLiteral(_)
        | Expression::StringLiteral(_)
        | Expression::CharLiteral(_) => true,
        Expression::VariableAccess(name) => !modified.contains(name),
        Expression::UnaryOp { op, operand } => {
            // Taking an address is position-dependent only through its
            // operand name, which is checked like any read.
            let _ = op;
            is_invariant(operand, modified)
        }
        Expression::BinaryOp { left, right, .. } => {
            is_invariant(left, modified) && is_invariant(right, modified)
        }
        Expression::FunctionCall {
            function,
            arguments,
        } => {
            if let Expression::VariableAccess(name) = &**function {
                if SIDE_EFFECTING_ROUTINES.contains(&name.as_str()) {
                    return false;
                }
            } else {
                return false;
            }
            arguments.iter().all(|arg| is_invariant(arg, modified))
        }
        _ => false,
    }
}

/// Names a statement subtree can write: bare assignment targets, FOR
/// induction variables, and LET-bound names.
fn collect_modified(stmt: &Statement, modified: &mut HashSet<String>) {
    match stmt {
        Statement::Assignment { targets, .. } => {
            for target in targets {
                if let Expression::VariableAccess(name) = target {
                    modified.insert(name.clone());
                }
            }
        }
        Statement::Compound(children) => {
            for child in children {
                collect_modified(child, modified);
            }
        }
        Statement::If { then_branch, .. } => collect_modified(then_branch, modified),
        Statement::Test {
            then_branch,
            else_branch,
            ..
        } => {
            collect_modified(then_branch, modified);
            if let Some(else_stmt) = else_branch {
                collect_modified(else_stmt, modified);
            }
        }
        Statement::While { body, .. } | Statement::Repeat { body, .. } => {
            collect_modified(body, modified);
        }
        Statement::For { var, body, .. } => {
            modified.insert(var.clone());
            collect_modified(body, modified);
        }
        Statement::Switchon { cases, default, .. } => {
            for case in cases {
                collect_modified(&case.body, modified);
            }
            if let Some(default_stmt) = default {
                collect_modified(default_stmt, modified);
            }
        }
        Statement::Labeled { body, .. } => collect_modified(body, modified),
        Statement::Declaration(decl) => {
            if let Declaration::Let(bindings) = decl.as_ref() {
                for binding in bindings {
                    modified.insert(binding.name.clone());
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn optimized_body(source: &str) -> Statement {
        let program = Parser::parse(source).unwrap();
        let optimized = LoopInvariantCodeMotionPass::new().apply(program).unwrap();
        match optimized.declarations.into_iter().next().unwrap() {
            Declaration::Function(func) => match func.body {
                FunctionBody::Statement(stmt) => stmt,
                _ => panic!(),
            },
            _ => panic!(),
        }
    }

    fn count_products(stmt: &Statement) -> usize {
        fn in_expr(expr: &Expression) -> usize {
            match expr {
                Expression::BinaryOp { op, left, right } => {
                    usize::from(*op == crate::ast::BinaryOperator::Multiply)
                        + in_expr(left)
                        + in_expr(right)
                }
                Expression::UnaryOp { operand, .. } => in_expr(operand),
                _ => 0,
            }
        }
        fn walk(stmt: &Statement) -> usize {
            match stmt {
                Statement::Assignment { values, .. } => values.iter().map(in_expr).sum(),
                Statement::Compound(children) => children.iter().map(walk).sum(),
                Statement::For { body, .. } => walk(body),
                Statement::Declaration(decl) => match decl.as_ref() {
                    Declaration::Let(bindings) => bindings
                        .iter()
                        .filter_map(|b| b.init.as_ref())
                        .map(in_expr)
                        .sum(),
                    _ => 0,
                },
                _ => 0,
            }
        }
        walk(stmt)
    }

    #[test]
    fn test_invariant_product_is_hoisted_once() {
        let body = optimized_body(
            "LET START() BE $( LET S = 0; FOR I = 1 TO 10 DO S := S + (A * B) $)",
        );
        // The product now appears exactly once, in a LET before the loop.
        assert_eq!(count_products(&body), 1);
        let Statement::Compound(stmts) = &body else {
            panic!();
        };
        let Statement::Compound(inner) = &stmts[1] else {
            panic!("expected hoisted LET plus loop");
        };
        assert!(matches!(
            inner[0],
            Statement::Declaration(Declaration::Let(_))
        ));
        assert!(matches!(inner[1], Statement::For { .. }));
    }

    #[test]
    fn test_variant_expression_is_not_hoisted() {
        let body = optimized_body(
            "LET START() BE $( LET S = 0; FOR I = 1 TO 10 DO S := S + I * 2 $)",
        );
        let Statement::Compound(stmts) = &body else {
            panic!();
        };
        // No hoisting: the loop is still a bare FOR statement.
        assert!(matches!(stmts[1], Statement::For { .. }));
    }

    #[test]
    fn test_side_effecting_calls_stay_in_the_loop() {
        let body = optimized_body(
            "LET START() BE FOR I = 1 TO 10 DO WRITEN(42 + X)",
        );
        // WRITEN itself must not move; only its invariant argument may.
        fn find_writen(stmt: &Statement) -> bool {
            match stmt {
                Statement::For { body, .. } => find_writen(body),
                Statement::Compound(children) => children.iter().any(find_writen),
                Statement::RoutineCall(Expression::FunctionCall { function, .. }) => {
                    matches!(&**function, Expression::VariableAccess(n) if n == "WRITEN")
                }
                _ => false,
            }
        }
        assert!(find_writen(&body));
    }

    #[test]
    fn test_bare_variables_and_literals_are_not_hoisted() {
        let body = optimized_body("LET START() BE FOR I = 1 TO 10 DO S := K");
        // Reading K is invariant but trivial; nothing is hoisted.
        assert!(matches!(body, Statement::For { .. }));
    }

    #[test]
    fn test_let_bound_names_in_body_are_variant() {
        let body = optimized_body(
            "LET START() BE FOR I = 1 TO 10 DO $( LET T = I; S := T + K $)",
        );
        // T is rebound each iteration, so T + K must stay put.
        assert!(matches!(body, Statement::For { .. }));
    }
}
