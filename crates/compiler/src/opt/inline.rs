//! Function inlining.
//!
//! A function is inlinable when it is not recursive (its own name never
//! appears in its body) and its body fits a node-count budget. A call to an
//! inlinable function becomes a VALOF whose body binds each formal to the
//! cloned actual and then runs a deep clone of the function's body. The
//! inserted clone is not re-scanned, so mutually inlinable functions expand
//! one level per pass.

use std::collections::HashMap;

use super::OptimizationPass;
use crate::CompileError;
use crate::ast::{
    Declaration, Expression, FunctionBody, FunctionDeclaration, Program, Statement, SwitchCase,
    ValueBinding,
};

pub struct FunctionInliningPass {
    budget: usize,
    inlinable: HashMap<String, FunctionDeclaration>,
}

impl FunctionInliningPass {
    pub fn new(budget: usize) -> Self {
        FunctionInliningPass {
            budget,
            inlinable: HashMap::new(),
        }
    }
}

impl OptimizationPass for FunctionInliningPass {
    fn name(&self) -> &'static str {
        "function-inlining"
    }

    fn apply(&mut self, program: Program) -> Result<Program, CompileError> {
        self.inlinable = program
            .functions()
            .filter(|func| is_inlinable(func, self.budget))
            .map(|func| (func.name.clone(), func.clone()))
            .collect();
        tracing::debug!(count = self.inlinable.len(), "inlinable functions found");

        let declarations = program
            .declarations
            .into_iter()
            .map(|decl| match decl {
                Declaration::Function(mut func) => {
                    func.body = match func.body {
                        FunctionBody::Expression(expr) => {
                            FunctionBody::Expression(self.rewrite_expr(expr))
                        }
                        FunctionBody::Statement(stmt) => {
                            FunctionBody::Statement(self.rewrite_stmt(stmt))
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

impl FunctionInliningPass {
    fn rewrite_stmt(&self, stmt: Statement) -> Statement {
        match stmt {
            Statement::Assignment { targets, values } => Statement::Assignment {
                targets,
                values: values.into_iter().map(|e| self.rewrite_expr(e)).collect(),
            },
            // A top-level routine call keeps its call; inlining it would
            // discard the callee's side-effect ordering guarantees for no
            // benefit, and routine results are unused anyway.
            Statement::RoutineCall(call) => match call {
                Expression::FunctionCall {
                    function,
                    arguments,
                } => Statement::RoutineCall(Expression::FunctionCall {
                    function,
                    arguments: arguments
                        .into_iter()
                        .map(|a| self.rewrite_expr(a))
                        .collect(),
                }),
                other => Statement::RoutineCall(other),
            },
            Statement::Compound(children) => Statement::Compound(
                children.into_iter().map(|s| self.rewrite_stmt(s)).collect(),
            ),
            Statement::If {
                condition,
                then_branch,
            } => Statement::If {
                condition: self.rewrite_expr(condition),
                then_branch: Box::new(self.rewrite_stmt(*then_branch)),
            },
            Statement::Test {
                condition,
                then_branch,
                else_branch,
            } => Statement::Test {
                condition: self.rewrite_expr(condition),
                then_branch: Box::new(self.rewrite_stmt(*then_branch)),
                else_branch: else_branch.map(|s| Box::new(self.rewrite_stmt(*s))),
            },
            Statement::While { condition, body } => Statement::While {
                condition: self.rewrite_expr(condition),
                body: Box::new(self.rewrite_stmt(*body)),
            },
            Statement::Repeat {
                body,
                condition,
                kind,
            } => Statement::Repeat {
                body: Box::new(self.rewrite_stmt(*body)),
                condition: condition.map(|c| self.rewrite_expr(c)),
                kind,
            },
            Statement::For {
                var,
                from,
                to,
                by,
                body,
            } => Statement::For {
                var,
                from: self.rewrite_expr(from),
                to: self.rewrite_expr(to),
                by: by.map(|e| self.rewrite_expr(e)),
                body: Box::new(self.rewrite_stmt(*body)),
            },
            Statement::Switchon {
                discriminant,
                cases,
                default,
            } => Statement::Switchon {
                discriminant: self.rewrite_expr(discriminant),
                cases: cases
                    .into_iter()
                    .map(|c| SwitchCase {
                        value: c.value,
                        body: self.rewrite_stmt(c.body),
                    })
                    .collect(),
                default: default.map(|s| Box::new(self.rewrite_stmt(*s))),
            },
            Statement::Resultis(value) => Statement::Resultis(self.rewrite_expr(value)),
            Statement::Labeled { name, body } => Statement::Labeled {
                name,
                body: Box::new(self.rewrite_stmt(*body)),
            },
            Statement::Declaration(decl) => match *decl {
                Declaration::Let(bindings) => Statement::Declaration(Box::new(Declaration::Let(
                    bindings
                        .into_iter()
                        .map(|b| ValueBinding {
                            name: b.name,
                            init: b.init.map(|e| self.rewrite_expr(e)),
                        })
                        .collect(),
                ))),
                other => Statement::Declaration(Box::new(other)),
            },
            other => other,
        }
    }

    fn rewrite_expr(&self, expr: Expression) -> Expression {
        match expr {
            Expression::FunctionCall {
                function,
                arguments,
            } => {
                let arguments: Vec<Expression> = arguments
                    .into_iter()
                    .map(|a| self.rewrite_expr(a))
                    .collect();

                if let Expression::VariableAccess(name) = &*function
                    && let Some(callee) = self.inlinable.get(name)
                    && callee.params.len() == arguments.len()
                {
                    return inline_call(callee, arguments);
                }
                Expression::FunctionCall {
                    function,
                    arguments,
                }
            }
            Expression::UnaryOp { op, operand } => Expression::UnaryOp {
                op,
                operand: Box::new(self.rewrite_expr(*operand)),
            },
            Expression::BinaryOp { op, left, right } => Expression::BinaryOp {
                op,
                left: Box::new(self.rewrite_expr(*left)),
                right: Box::new(self.rewrite_expr(*right)),
            },
            Expression::Conditional {
                condition,
                then_expr,
                else_expr,
            } => Expression::Conditional {
                condition: Box::new(self.rewrite_expr(*condition)),
                then_expr: Box::new(self.rewrite_expr(*then_expr)),
                else_expr: Box::new(self.rewrite_expr(*else_expr)),
            },
            Expression::Valof(body) => Expression::Valof(Box::new(self.rewrite_stmt(*body))),
            Expression::VectorConstructor(size) => {
                Expression::VectorConstructor(Box::new(self.rewrite_expr(*size)))
            }
            Expression::Table(items) => {
                Expression::Table(items.into_iter().map(|e| self.rewrite_expr(e)).collect())
            }
            Expression::Dereference(pointer) => {
                Expression::Dereference(Box::new(self.rewrite_expr(*pointer)))
            }
            Expression::VectorAccess { vector, index } => Expression::VectorAccess {
                vector: Box::new(self.rewrite_expr(*vector)),
                index: Box::new(self.rewrite_expr(*index)),
            },
            Expression::CharacterAccess { string, index } => Expression::CharacterAccess {
                string: Box::new(self.rewrite_expr(*string)),
                index: Box::new(self.rewrite_expr(*index)),
            },
            Expression::FloatVectorAccess { vector, index } => Expression::FloatVectorAccess {
                vector: Box::new(self.rewrite_expr(*vector)),
                index: Box::new(self.rewrite_expr(*index)),
            },
            leaf => leaf,
        }
    }
}

/// `F(a, b)` becomes `VALOF $( LET p1 = a; LET p2 = b; <body> $)`.
fn inline_call(callee: &FunctionDeclaration, arguments: Vec<Expression>) -> Expression {
    let mut statements = Vec::with_capacity(callee.params.len() + 1);
    for (param, arg) in callee.params.iter().zip(arguments) {
        statements.push(Statement::Declaration(Box::new(Declaration::Let(vec![
            ValueBinding {
                name: param.clone(),
                init: Some(arg),
            },
        ]))));
    }
    statements.push(match &callee.body {
        FunctionBody::Statement(stmt) => stmt.clone(),
        // An expression body inlines as the VALOF's result.
        FunctionBody::Expression(Expression::Valof(body)) => (**body).clone(),
        FunctionBody::Expression(expr) => Statement::Resultis(expr.clone()),
    });
    Expression::Valof(Box::new(Statement::Compound(statements)))
}

fn is_inlinable(func: &FunctionDeclaration, budget: usize) -> bool {
    let body_size = match &func.body {
        FunctionBody::Expression(expr) => expr.node_count(),
        FunctionBody::Statement(stmt) => stmt.node_count(),
    };
    body_size <= budget && !references_name(func, &func.name)
}

fn references_name(func: &FunctionDeclaration, name: &str) -> bool {
    fn in_expr(expr: &Expression, name: &str) -> bool {
        match expr {
            Expression::VariableAccess(var) => var == name,
            Expression::UnaryOp { operand, .. } => in_expr(operand, name),
            Expression::BinaryOp { left, right, .. } => {
                in_expr(left, name) || in_expr(right, name)
            }
            Expression::FunctionCall {
                function,
                arguments,
            } => in_expr(function, name) || arguments.iter().any(|a| in_expr(a, name)),
            Expression::Conditional {
                condition,
                then_expr,
                else_expr,
            } => in_expr(condition, name) || in_expr(then_expr, name) || in_expr(else_expr, name),
            Expression::Table(items) => items.iter().any(|e| in_expr(e, name)),
            Expression::VectorConstructor(size) => in_expr(size, name),
            Expression::Valof(body) => in_stmt(body, name),
            Expression::Dereference(pointer) => in_expr(pointer, name),
            Expression::VectorAccess { vector, index }
            | Expression::FloatVectorAccess { vector, index } => {
                in_expr(vector, name) || in_expr(index, name)
            }
            Expression::CharacterAccess { string, index } => {
                in_expr(string, name) || in_expr(index, name)
            }
            _ => false,
        }
    }

    fn in_stmt(stmt: &Statement, name: &str) -> bool {
        match stmt {
            Statement::Assignment { targets, values } => {
                targets.iter().any(|e| in_expr(e, name))
                    || values.iter().any(|e| in_expr(e, name))
            }
            Statement::RoutineCall(call) => in_expr(call, name),
            Statement::Compound(children) => children.iter().any(|s| in_stmt(s, name)),
            Statement::If {
                condition,
                then_branch,
            } => in_expr(condition, name) || in_stmt(then_branch, name),
            Statement::Test {
                condition,
                then_branch,
                else_branch,
            } => {
                in_expr(condition, name)
                    || in_stmt(then_branch, name)
                    || else_branch.as_ref().is_some_and(|s| in_stmt(s, name))
            }
            Statement::While { condition, body } => {
                in_expr(condition, name) || in_stmt(body, name)
            }
            Statement::Repeat {
                body, condition, ..
            } => in_stmt(body, name) || condition.as_ref().is_some_and(|c| in_expr(c, name)),
            Statement::For {
                from, to, by, body, ..
            } => {
                in_expr(from, name)
                    || in_expr(to, name)
                    || by.as_ref().is_some_and(|e| in_expr(e, name))
                    || in_stmt(body, name)
            }
            Statement::Switchon {
                discriminant,
                cases,
                default,
            } => {
                in_expr(discriminant, name)
                    || cases.iter().any(|c| in_stmt(&c.body, name))
                    || default.as_ref().is_some_and(|s| in_stmt(s, name))
            }
            Statement::Resultis(value) => in_expr(value, name),
            Statement::Goto(target) => in_expr(target, name),
            Statement::Labeled { body, .. } => in_stmt(body, name),
            Statement::Declaration(decl) => match decl.as_ref() {
                Declaration::Let(bindings) => bindings
                    .iter()
                    .any(|b| b.init.as_ref().is_some_and(|e| in_expr(e, name))),
                _ => false,
            },
            _ => false,
        }
    }

    match &func.body {
        FunctionBody::Expression(expr) => in_expr(expr, name),
        FunctionBody::Statement(stmt) => in_stmt(stmt, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn inline_program(source: &str, budget: usize) -> Program {
        let program = Parser::parse(source).unwrap();
        FunctionInliningPass::new(budget).apply(program).unwrap()
    }

    fn start_body(program: &Program) -> &Statement {
        program
            .functions()
            .find(|f| f.name == "START")
            .map(|f| match &f.body {
                FunctionBody::Statement(stmt) => stmt,
                _ => panic!(),
            })
            .unwrap()
    }

    #[test]
    fn test_small_function_is_inlined_as_valof() {
        let program = inline_program(
            "LET DOUBLE(X) = X + X\nLET START() BE Y := DOUBLE(21)",
            64,
        );
        let Statement::Assignment { values, .. } = start_body(&program) else {
            panic!();
        };
        let Expression::Valof(body) = &values[0] else {
            panic!("expected the call to inline into a VALOF");
        };
        let Statement::Compound(stmts) = &**body else {
            panic!();
        };
        // LET X = 21 then RESULTIS X + X.
        assert!(matches!(
            &stmts[0],
            Statement::Declaration(decl) if matches!(decl.as_ref(), Declaration::Let(bindings) if bindings[0].name == "X")
        ));
        assert!(matches!(&stmts[1], Statement::Resultis(_)));
    }

    #[test]
    fn test_recursive_function_is_not_inlined() {
        let program = inline_program(
            "LET F(N) = N = 0 -> 1, F(N - 1)\nLET START() BE Y := F(3)",
            1024,
        );
        let Statement::Assignment { values, .. } = start_body(&program) else {
            panic!();
        };
        assert!(matches!(values[0], Expression::FunctionCall { .. }));
    }

    #[test]
    fn test_budget_blocks_large_functions() {
        let program = inline_program(
            "LET F(A) = A + A + A + A + A + A\nLET START() BE Y := F(1)",
            3,
        );
        let Statement::Assignment { values, .. } = start_body(&program) else {
            panic!();
        };
        assert!(matches!(values[0], Expression::FunctionCall { .. }));
    }

    #[test]
    fn test_valof_body_function_inlines_its_statement() {
        let program = inline_program(
            "LET F(X) = VALOF RESULTIS X * 3\nLET START() BE Y := F(2)",
            64,
        );
        let Statement::Assignment { values, .. } = start_body(&program) else {
            panic!();
        };
        let Expression::Valof(body) = &values[0] else {
            panic!();
        };
        let Statement::Compound(stmts) = &**body else {
            panic!();
        };
        assert!(matches!(stmts[1], Statement::Resultis(_)));
    }
}
