//! Loop specialization for constant loop conditions.
//!
//! `REPEAT body UNTIL <true>` runs exactly once and becomes the body;
//! `REPEAT body UNTIL <false>` never exits and becomes `WHILE true`.
//! A `WHILE <false>` loop disappears; `WHILE <true>` is preserved as the
//! canonical infinite-loop form.

use super::OptimizationPass;
use crate::CompileError;
use crate::ast::{
    Declaration, Expression, FunctionBody, Program, RepeatKind, Statement, SwitchCase,
    ValueBinding,
};

pub struct LoopSpecializationPass;

impl LoopSpecializationPass {
    pub fn new() -> Self {
        LoopSpecializationPass
    }
}

impl Default for LoopSpecializationPass {
    fn default() -> Self {
        LoopSpecializationPass::new()
    }
}

impl OptimizationPass for LoopSpecializationPass {
    fn name(&self) -> &'static str {
        "loop-specialization"
    }

    fn apply(&mut self, program: Program) -> Result<Program, CompileError> {
        let declarations = program
            .declarations
            .into_iter()
            .map(specialize_declaration)
            .collect();
        Ok(Program { declarations })
    }
}

fn specialize_declaration(decl: Declaration) -> Declaration {
    match decl {
        Declaration::Function(mut func) => {
            func.body = match func.body {
                FunctionBody::Expression(expr) => FunctionBody::Expression(specialize_expr(expr)),
                FunctionBody::Statement(stmt) => FunctionBody::Statement(specialize_stmt(stmt)),
            };
            Declaration::Function(func)
        }
        Declaration::Let(bindings) => Declaration::Let(
            bindings
                .into_iter()
                .map(|b| ValueBinding {
                    name: b.name,
                    init: b.init.map(specialize_expr),
                })
                .collect(),
        ),
        other => other,
    }
}

fn infinite_loop(body: Statement) -> Statement {
    Statement::While {
        condition: Expression::NumberLiteral(-1),
        body: Box::new(body),
    }
}

fn specialize_stmt(stmt: Statement) -> Statement {
    match stmt {
        Statement::Repeat {
            body,
            condition,
            kind,
        } => {
            let body = specialize_stmt(*body);
            let condition = condition.map(specialize_expr);
            match (kind, &condition) {
                // UNTIL true: the loop body runs exactly once.
                (RepeatKind::RepeatUntil, Some(Expression::NumberLiteral(v))) if *v != 0 => body,
                // UNTIL false: never exits.
                (RepeatKind::RepeatUntil, Some(Expression::NumberLiteral(0))) => {
                    infinite_loop(body)
                }
                // WHILE false: the body runs exactly once.
                (RepeatKind::RepeatWhile, Some(Expression::NumberLiteral(0))) => body,
                // WHILE true: never exits.
                (RepeatKind::RepeatWhile, Some(Expression::NumberLiteral(v))) if *v != 0 => {
                    infinite_loop(body)
                }
                _ => Statement::Repeat {
                    body: Box::new(body),
                    condition,
                    kind,
                },
            }
        }
        Statement::While { condition, body } => {
            let condition = specialize_expr(condition);
            let body = specialize_stmt(*body);
            match condition {
                Expression::NumberLiteral(0) => Statement::empty(),
                // A truthy literal stays as the canonical infinite loop.
                other => Statement::While {
                    condition: other,
                    body: Box::new(body),
                },
            }
        }
        Statement::Compound(children) => {
            Statement::Compound(children.into_iter().map(specialize_stmt).collect())
        }
        Statement::If {
            condition,
            then_branch,
        } => Statement::If {
            condition: specialize_expr(condition),
            then_branch: Box::new(specialize_stmt(*then_branch)),
        },
        Statement::Test {
            condition,
            then_branch,
            else_branch,
        } => Statement::Test {
            condition: specialize_expr(condition),
            then_branch: Box::new(specialize_stmt(*then_branch)),
            else_branch: else_branch.map(|s| Box::new(specialize_stmt(*s))),
        },
        Statement::For {
            var,
            from,
            to,
            by,
            body,
        } => Statement::For {
            var,
            from: specialize_expr(from),
            to: specialize_expr(to),
            by: by.map(specialize_expr),
            body: Box::new(specialize_stmt(*body)),
        },
        Statement::Switchon {
            discriminant,
            cases,
            default,
        } => Statement::Switchon {
            discriminant: specialize_expr(discriminant),
            cases: cases
                .into_iter()
                .map(|c| SwitchCase {
                    value: c.value,
                    body: specialize_stmt(c.body),
                })
                .collect(),
            default: default.map(|s| Box::new(specialize_stmt(*s))),
        },
        Statement::Labeled { name, body } => Statement::Labeled {
            name,
            body: Box::new(specialize_stmt(*body)),
        },
        Statement::Assignment { targets, values } => Statement::Assignment {
            targets: targets.into_iter().map(specialize_expr).collect(),
            values: values.into_iter().map(specialize_expr).collect(),
        },
        Statement::RoutineCall(call) => Statement::RoutineCall(specialize_expr(call)),
        Statement::Resultis(value) => Statement::Resultis(specialize_expr(value)),
        Statement::Goto(target) => Statement::Goto(specialize_expr(target)),
        Statement::Declaration(decl) => {
            Statement::Declaration(Box::new(specialize_declaration(*decl)))
        }
        simple => simple,
    }
}

fn specialize_expr(expr: Expression) -> Expression {
    match expr {
        Expression::Valof(body) => Expression::Valof(Box::new(specialize_stmt(*body))),
        Expression::UnaryOp { op, operand } => Expression::UnaryOp {
            op,
            operand: Box::new(specialize_expr(*operand)),
        },
        Expression::BinaryOp { op, left, right } => Expression::BinaryOp {
            op,
            left: Box::new(specialize_expr(*left)),
            right: Box::new(specialize_expr(*right)),
        },
        Expression::FunctionCall {
            function,
            arguments,
        } => Expression::FunctionCall {
            function: Box::new(specialize_expr(*function)),
            arguments: arguments.into_iter().map(specialize_expr).collect(),
        },
        Expression::Conditional {
            condition,
            then_expr,
            else_expr,
        } => Expression::Conditional {
            condition: Box::new(specialize_expr(*condition)),
            then_expr: Box::new(specialize_expr(*then_expr)),
            else_expr: Box::new(specialize_expr(*else_expr)),
        },
        Expression::Table(items) => {
            Expression::Table(items.into_iter().map(specialize_expr).collect())
        }
        Expression::VectorConstructor(size) => {
            Expression::VectorConstructor(Box::new(specialize_expr(*size)))
        }
        Expression::Dereference(pointer) => {
            Expression::Dereference(Box::new(specialize_expr(*pointer)))
        }
        Expression::VectorAccess { vector, index } => Expression::VectorAccess {
            vector: Box::new(specialize_expr(*vector)),
            index: Box::new(specialize_expr(*index)),
        },
        Expression::CharacterAccess { string, index } => Expression::CharacterAccess {
            string: Box::new(specialize_expr(*string)),
            index: Box::new(specialize_expr(*index)),
        },
        Expression::FloatVectorAccess { vector, index } => Expression::FloatVectorAccess {
            vector: Box::new(specialize_expr(*vector)),
            index: Box::new(specialize_expr(*index)),
        },
        leaf => leaf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn specialized_body(source: &str) -> Statement {
        let program = Parser::parse(source).unwrap();
        let optimized = LoopSpecializationPass::new().apply(program).unwrap();
        match optimized.declarations.into_iter().next().unwrap() {
            Declaration::Function(func) => match func.body {
                FunctionBody::Statement(stmt) => stmt,
                _ => panic!(),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn test_repeat_until_true_becomes_body() {
        let body = specialized_body("LET START() BE X := X + 1 REPEATUNTIL TRUE");
        assert!(matches!(body, Statement::Assignment { .. }));
    }

    #[test]
    fn test_repeat_until_false_becomes_while_true() {
        let body = specialized_body("LET START() BE X := X + 1 REPEATUNTIL FALSE");
        let Statement::While { condition, .. } = body else {
            panic!("expected an infinite WHILE loop");
        };
        assert_eq!(condition, Expression::NumberLiteral(-1));
    }

    #[test]
    fn test_while_false_disappears() {
        let body = specialized_body("LET START() BE WHILE FALSE DO X := 1");
        assert_eq!(body, Statement::empty());
    }

    #[test]
    fn test_while_true_is_preserved() {
        let body = specialized_body("LET START() BE WHILE TRUE DO X := 1");
        let Statement::While { condition, .. } = body else {
            panic!();
        };
        assert_eq!(condition, Expression::NumberLiteral(-1));
    }

    #[test]
    fn test_non_constant_conditions_untouched() {
        let body = specialized_body("LET START() BE X := X + 1 REPEATUNTIL X = 10");
        assert!(matches!(
            body,
            Statement::Repeat {
                kind: RepeatKind::RepeatUntil,
                ..
            }
        ));
    }
}
