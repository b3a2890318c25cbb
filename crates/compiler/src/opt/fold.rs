//! Constant folding and algebraic simplification.
//!
//! Folds operators over literal operands, resolves manifest constants,
//! applies strength reductions and identities, and collapses conditionals
//! with literal discriminants. Comparisons fold to BCPL truth values
//! (true = -1, false = 0); float comparisons fold to *integer* literals.

use std::collections::HashMap;

use super::OptimizationPass;
use crate::CompileError;
use crate::ast::{
    BinaryOperator, Declaration, Expression, FunctionBody, Program, Statement, SwitchCase,
    UnaryOperator, ValueBinding,
};

pub struct ConstantFoldingPass {
    manifests: HashMap<String, i64>,
}

impl ConstantFoldingPass {
    pub fn new() -> Self {
        ConstantFoldingPass {
            manifests: HashMap::new(),
        }
    }
}

impl Default for ConstantFoldingPass {
    fn default() -> Self {
        ConstantFoldingPass::new()
    }
}

impl OptimizationPass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn apply(&mut self, program: Program) -> Result<Program, CompileError> {
        self.manifests = program.manifests();
        let declarations = program
            .declarations
            .into_iter()
            .map(|decl| self.fold_declaration(decl))
            .collect();
        Ok(Program { declarations })
    }
}

impl ConstantFoldingPass {
    fn fold_declaration(&self, decl: Declaration) -> Declaration {
        match decl {
            Declaration::Let(bindings) => Declaration::Let(
                bindings
                    .into_iter()
                    .map(|b| ValueBinding {
                        name: b.name,
                        init: b.init.map(|e| self.fold_expr(e)),
                    })
                    .collect(),
            ),
            Declaration::Function(mut func) => {
                func.body = match func.body {
                    FunctionBody::Expression(expr) => {
                        FunctionBody::Expression(self.fold_expr(expr))
                    }
                    FunctionBody::Statement(stmt) => FunctionBody::Statement(self.fold_stmt(stmt)),
                };
                Declaration::Function(func)
            }
            other => other,
        }
    }

    fn fold_stmt(&self, stmt: Statement) -> Statement {
        match stmt {
            Statement::Assignment { targets, values } => Statement::Assignment {
                targets: targets.into_iter().map(|e| self.fold_expr(e)).collect(),
                values: values.into_iter().map(|e| self.fold_expr(e)).collect(),
            },
            Statement::RoutineCall(call) => Statement::RoutineCall(self.fold_expr(call)),
            Statement::Compound(children) => Statement::Compound(
                children.into_iter().map(|s| self.fold_stmt(s)).collect(),
            ),
            Statement::If {
                condition,
                then_branch,
            } => {
                let condition = self.fold_expr(condition);
                if let Expression::NumberLiteral(value) = condition {
                    return if value != 0 {
                        self.fold_stmt(*then_branch)
                    } else {
                        Statement::empty()
                    };
                }
                Statement::If {
                    condition,
                    then_branch: Box::new(self.fold_stmt(*then_branch)),
                }
            }
            Statement::Test {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.fold_expr(condition);
                if let Expression::NumberLiteral(value) = condition {
                    return if value != 0 {
                        self.fold_stmt(*then_branch)
                    } else {
                        else_branch.map_or_else(Statement::empty, |s| self.fold_stmt(*s))
                    };
                }
                Statement::Test {
                    condition,
                    then_branch: Box::new(self.fold_stmt(*then_branch)),
                    else_branch: else_branch.map(|s| Box::new(self.fold_stmt(*s))),
                }
            }
            Statement::While { condition, body } => Statement::While {
                condition: self.fold_expr(condition),
                body: Box::new(self.fold_stmt(*body)),
            },
            Statement::Repeat {
                body,
                condition,
                kind,
            } => Statement::Repeat {
                body: Box::new(self.fold_stmt(*body)),
                condition: condition.map(|c| self.fold_expr(c)),
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
                from: self.fold_expr(from),
                to: self.fold_expr(to),
                by: by.map(|e| self.fold_expr(e)),
                body: Box::new(self.fold_stmt(*body)),
            },
            Statement::Switchon {
                discriminant,
                cases,
                default,
            } => Statement::Switchon {
                discriminant: self.fold_expr(discriminant),
                cases: cases
                    .into_iter()
                    .map(|c| SwitchCase {
                        value: c.value,
                        body: self.fold_stmt(c.body),
                    })
                    .collect(),
                default: default.map(|s| Box::new(self.fold_stmt(*s))),
            },
            Statement::Resultis(value) => Statement::Resultis(self.fold_expr(value)),
            Statement::Goto(target) => Statement::Goto(self.fold_expr(target)),
            Statement::Labeled { name, body } => Statement::Labeled {
                name,
                body: Box::new(self.fold_stmt(*body)),
            },
            Statement::Declaration(decl) => {
                Statement::Declaration(Box::new(self.fold_declaration(*decl)))
            }
            simple => simple,
        }
    }

    fn fold_expr(&self, expr: Expression) -> Expression {
        match expr {
            Expression::VariableAccess(name) => match self.manifests.get(&name) {
                Some(&value) => Expression::NumberLiteral(value),
                None => Expression::VariableAccess(name),
            },
            Expression::UnaryOp { op, operand } => {
                let operand = self.fold_expr(*operand);
                if let Expression::NumberLiteral(value) = operand {
                    match op {
                        UnaryOperator::Negate => {
                            return Expression::NumberLiteral(value.wrapping_neg());
                        }
                        UnaryOperator::Not => return Expression::NumberLiteral(!value),
                        UnaryOperator::AddressOf => {}
                    }
                }
                Expression::UnaryOp {
                    op,
                    operand: Box::new(operand),
                }
            }
            Expression::BinaryOp { op, left, right } => {
                let left = self.fold_expr(*left);
                let right = self.fold_expr(*right);
                fold_binary(op, left, right)
            }
            Expression::FunctionCall {
                function,
                arguments,
            } => Expression::FunctionCall {
                function: Box::new(self.fold_expr(*function)),
                arguments: arguments.into_iter().map(|a| self.fold_expr(a)).collect(),
            },
            Expression::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                let condition = self.fold_expr(*condition);
                if let Expression::NumberLiteral(value) = condition {
                    return if value != 0 {
                        self.fold_expr(*then_expr)
                    } else {
                        self.fold_expr(*else_expr)
                    };
                }
                Expression::Conditional {
                    condition: Box::new(condition),
                    then_expr: Box::new(self.fold_expr(*then_expr)),
                    else_expr: Box::new(self.fold_expr(*else_expr)),
                }
            }
            Expression::Table(items) => {
                Expression::Table(items.into_iter().map(|e| self.fold_expr(e)).collect())
            }
            Expression::VectorConstructor(size) => {
                Expression::VectorConstructor(Box::new(self.fold_expr(*size)))
            }
            Expression::Valof(body) => Expression::Valof(Box::new(self.fold_stmt(*body))),
            Expression::Dereference(pointer) => {
                Expression::Dereference(Box::new(self.fold_expr(*pointer)))
            }
            Expression::VectorAccess { vector, index } => Expression::VectorAccess {
                vector: Box::new(self.fold_expr(*vector)),
                index: Box::new(self.fold_expr(*index)),
            },
            Expression::CharacterAccess { string, index } => Expression::CharacterAccess {
                string: Box::new(self.fold_expr(*string)),
                index: Box::new(self.fold_expr(*index)),
            },
            Expression::FloatVectorAccess { vector, index } => Expression::FloatVectorAccess {
                vector: Box::new(self.fold_expr(*vector)),
                index: Box::new(self.fold_expr(*index)),
            },
            leaf => leaf,
        }
    }
}

fn truth(value: bool) -> Expression {
    Expression::NumberLiteral(if value { -1 } else { 0 })
}

fn fold_binary(op: BinaryOperator, left: Expression, right: Expression) -> Expression {
    use BinaryOperator::*;

    if let (Expression::NumberLiteral(l), Expression::NumberLiteral(r)) = (&left, &right) {
        let (l, r) = (*l, *r);
        match op {
            Add => return Expression::NumberLiteral(l.wrapping_add(r)),
            Subtract => return Expression::NumberLiteral(l.wrapping_sub(r)),
            Multiply => return Expression::NumberLiteral(l.wrapping_mul(r)),
            // Division truncates toward zero; fold only when defined.
            Divide if r != 0 => return Expression::NumberLiteral(l.wrapping_div(r)),
            Remainder if r != 0 => return Expression::NumberLiteral(l.wrapping_rem(r)),
            ShiftLeft => return Expression::NumberLiteral(l.wrapping_shl(r as u32)),
            // Arithmetic right shift, matching the ASR lowering.
            ShiftRight => return Expression::NumberLiteral(l.wrapping_shr(r as u32)),
            LogAnd => return Expression::NumberLiteral(l & r),
            LogOr => return Expression::NumberLiteral(l | r),
            Eqv => return Expression::NumberLiteral(!(l ^ r)),
            Neqv => return Expression::NumberLiteral(l ^ r),
            Equal => return truth(l == r),
            NotEqual => return truth(l != r),
            Less => return truth(l < r),
            LessEqual => return truth(l <= r),
            Greater => return truth(l > r),
            GreaterEqual => return truth(l >= r),
            _ => {}
        }
    }

    if let (Expression::FloatLiteral(l), Expression::FloatLiteral(r)) = (&left, &right) {
        let (l, r) = (*l, *r);
        match op {
            FAdd => return Expression::FloatLiteral(l + r),
            FSubtract => return Expression::FloatLiteral(l - r),
            FMultiply => return Expression::FloatLiteral(l * r),
            FDivide if r != 0.0 => return Expression::FloatLiteral(l / r),
            FEqual => return truth(l == r),
            FNotEqual => return truth(l != r),
            FLess => return truth(l < r),
            FLessEqual => return truth(l <= r),
            FGreater => return truth(l > r),
            FGreaterEqual => return truth(l >= r),
            _ => {}
        }
    }

    // Strength reduction and identities against a literal right operand.
    if let Expression::NumberLiteral(r) = right {
        match (op, r) {
            (Multiply, 2) => {
                return Expression::binary(ShiftLeft, left, Expression::NumberLiteral(1));
            }
            (Divide, 2) => {
                return Expression::binary(ShiftRight, left, Expression::NumberLiteral(1));
            }
            (Add, 0) | (Subtract, 0) | (Multiply, 1) | (Divide, 1) => return left,
            (Multiply, 0) => return Expression::NumberLiteral(0),
            _ => {}
        }
    }

    if let Expression::NumberLiteral(l) = left {
        match (op, l) {
            (Add, 0) | (Multiply, 1) => return right,
            (Multiply, 0) => return Expression::NumberLiteral(0),
            _ => {}
        }
        return Expression::binary(op, Expression::NumberLiteral(l), right);
    }

    Expression::binary(op, left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn fold(program: Program) -> Program {
        ConstantFoldingPass::new().apply(program).unwrap()
    }

    fn fold_expression(source: &str) -> Expression {
        let program = Parser::parse(&format!("LET START() BE X := {}", source)).unwrap();
        let folded = fold(program);
        let Declaration::Function(func) = &folded.declarations[0] else {
            panic!();
        };
        let FunctionBody::Statement(Statement::Assignment { values, .. }) = &func.body else {
            panic!();
        };
        values[0].clone()
    }

    /// Walk an expression checking no binary operator has two literal
    /// children.
    fn fully_folded(expr: &Expression) -> bool {
        match expr {
            Expression::BinaryOp { left, right, .. } => {
                let both_literal = matches!(**left, Expression::NumberLiteral(_))
                    && matches!(**right, Expression::NumberLiteral(_));
                !both_literal && fully_folded(left) && fully_folded(right)
            }
            Expression::UnaryOp { operand, .. } => fully_folded(operand),
            _ => true,
        }
    }

    #[test]
    fn test_integer_arithmetic_folds() {
        assert_eq!(fold_expression("2 + 3 * 4"), Expression::NumberLiteral(14));
        assert_eq!(fold_expression("10 - 4"), Expression::NumberLiteral(6));
        assert_eq!(fold_expression("7 / 2"), Expression::NumberLiteral(3));
        assert_eq!(fold_expression("-7 / 2"), Expression::NumberLiteral(-3));
        assert_eq!(fold_expression("7 REM 3"), Expression::NumberLiteral(1));
        assert_eq!(fold_expression("1 << 4"), Expression::NumberLiteral(16));
        assert_eq!(fold_expression("16 >> 2"), Expression::NumberLiteral(4));
        // Right shift is arithmetic: the sign bit propagates.
        assert_eq!(fold_expression("-8 >> 1"), Expression::NumberLiteral(-4));
        assert_eq!(fold_expression("5 & 3"), Expression::NumberLiteral(1));
        assert_eq!(fold_expression("5 | 3"), Expression::NumberLiteral(7));
        assert_eq!(fold_expression("5 NEQV 3"), Expression::NumberLiteral(6));
        assert_eq!(fold_expression("5 EQV 3"), Expression::NumberLiteral(!6));
    }

    #[test]
    fn test_comparisons_fold_to_bcpl_truth() {
        assert_eq!(fold_expression("3 < 4"), Expression::NumberLiteral(-1));
        assert_eq!(fold_expression("3 > 4"), Expression::NumberLiteral(0));
        assert_eq!(fold_expression("3 = 3"), Expression::NumberLiteral(-1));
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        let expr = fold_expression("1 / 0");
        assert!(matches!(
            expr,
            Expression::BinaryOp {
                op: BinaryOperator::Divide,
                ..
            }
        ));
        assert!(matches!(
            fold_expression("1 REM 0"),
            Expression::BinaryOp { .. }
        ));
    }

    #[test]
    fn test_float_folding() {
        assert_eq!(fold_expression("1.5 +. 2.5"), Expression::FloatLiteral(4.0));
        // Float comparisons produce integer truth values.
        assert_eq!(fold_expression("1.5 <. 2.5"), Expression::NumberLiteral(-1));
        assert_eq!(fold_expression("1.5 >. 2.5"), Expression::NumberLiteral(0));
    }

    #[test]
    fn test_strength_reduction() {
        let doubled = fold_expression("X * 2");
        assert!(matches!(
            doubled,
            Expression::BinaryOp {
                op: BinaryOperator::ShiftLeft,
                ..
            }
        ));
        let halved = fold_expression("X / 2");
        assert!(matches!(
            halved,
            Expression::BinaryOp {
                op: BinaryOperator::ShiftRight,
                ..
            }
        ));
    }

    #[test]
    fn test_identities() {
        assert_eq!(fold_expression("X + 0"), Expression::variable("X"));
        assert_eq!(fold_expression("X - 0"), Expression::variable("X"));
        assert_eq!(fold_expression("X * 1"), Expression::variable("X"));
        assert_eq!(fold_expression("X / 1"), Expression::variable("X"));
        assert_eq!(fold_expression("X * 0"), Expression::NumberLiteral(0));
        assert_eq!(fold_expression("0 + X"), Expression::variable("X"));
        assert_eq!(fold_expression("1 * X"), Expression::variable("X"));
    }

    #[test]
    fn test_manifest_constants_resolve() {
        let program = Parser::parse(
            "MANIFEST $( LIMIT = 14 $)\nLET START() BE X := LIMIT + 1",
        )
        .unwrap();
        let folded = fold(program);
        let Declaration::Function(func) = &folded.declarations[1] else {
            panic!();
        };
        let FunctionBody::Statement(Statement::Assignment { values, .. }) = &func.body else {
            panic!();
        };
        assert_eq!(values[0], Expression::NumberLiteral(15));
    }

    #[test]
    fn test_literal_if_collapses() {
        let program = Parser::parse("LET START() BE IF 0 THEN WRITES(\"NO\")").unwrap();
        let folded = fold(program);
        let Declaration::Function(func) = &folded.declarations[0] else {
            panic!();
        };
        assert_eq!(
            func.body,
            FunctionBody::Statement(Statement::Compound(vec![]))
        );
    }

    #[test]
    fn test_literal_conditional_expression_collapses() {
        assert_eq!(fold_expression("1 -> 10, 20"), Expression::NumberLiteral(10));
        assert_eq!(fold_expression("0 -> 10, 20"), Expression::NumberLiteral(20));
    }

    #[test]
    fn test_folding_is_idempotent() {
        let source = r#"
            MANIFEST $( K = 3 $)
            LET START() BE $(
                LET X = 2 + K * 4
                IF X = 14 THEN WRITES("OK")
                Y := Z * 2 + (1 -> A, B)
            $)
        "#;
        let once = fold(Parser::parse(source).unwrap());
        let twice = fold(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_no_literal_pairs_survive() {
        let expr = fold_expression("(2 + 3 * 4) - (10 / 5) + X");
        assert!(fully_folded(&expr));
    }
}
