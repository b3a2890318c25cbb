//! Common subexpression elimination.
//!
//! Works over linear statement sequences. Pure expressions (unary/binary
//! operators over variables and literals) are canonicalized to a textual
//! fingerprint; a fingerprint that occurs at least twice in the sequence is
//! bound to a temporary at its first occurrence and later occurrences read
//! the temporary instead. Assigning a variable invalidates every fingerprint
//! that mentions it, and any control-flow statement closes the window.
//! Calls and memory subscripts are never eliminated.

use std::collections::HashMap;

use super::OptimizationPass;
use crate::CompileError;
use crate::ast::{
    Declaration, Expression, FunctionBody, Program, Statement, SwitchCase, ValueBinding,
};

pub struct CommonSubexpressionEliminationPass {
    temp_counter: usize,
}

impl CommonSubexpressionEliminationPass {
    pub fn new() -> Self {
        CommonSubexpressionEliminationPass { temp_counter: 0 }
    }

    fn fresh_temp(&mut self) -> String {
        let name = format!("_cse_temp_{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }
}

impl Default for CommonSubexpressionEliminationPass {
    fn default() -> Self {
        CommonSubexpressionEliminationPass::new()
    }
}

impl OptimizationPass for CommonSubexpressionEliminationPass {
    fn name(&self) -> &'static str {
        "common-subexpression-elimination"
    }

    fn apply(&mut self, program: Program) -> Result<Program, CompileError> {
        let declarations = program
            .declarations
            .into_iter()
            .map(|decl| match decl {
                Declaration::Function(mut func) => {
                    self.temp_counter = 0;
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

impl CommonSubexpressionEliminationPass {
    /// Rewrite a statement, treating compound bodies as linear windows.
    fn rewrite_stmt(&mut self, stmt: Statement) -> Statement {
        match stmt {
            Statement::Compound(children) => Statement::Compound(self.rewrite_sequence(children)),
            Statement::If {
                condition,
                then_branch,
            } => Statement::If {
                condition,
                then_branch: Box::new(self.rewrite_stmt(*then_branch)),
            },
            Statement::Test {
                condition,
                then_branch,
                else_branch,
            } => Statement::Test {
                condition,
                then_branch: Box::new(self.rewrite_stmt(*then_branch)),
                else_branch: else_branch.map(|s| Box::new(self.rewrite_stmt(*s))),
            },
            Statement::While { condition, body } => Statement::While {
                condition,
                body: Box::new(self.rewrite_stmt(*body)),
            },
            Statement::Repeat {
                body,
                condition,
                kind,
            } => Statement::Repeat {
                body: Box::new(self.rewrite_stmt(*body)),
                condition,
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
                from,
                to,
                by,
                body: Box::new(self.rewrite_stmt(*body)),
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
                        body: self.rewrite_stmt(c.body),
                    })
                    .collect(),
                default: default.map(|s| Box::new(self.rewrite_stmt(*s))),
            },
            Statement::Labeled { name, body } => Statement::Labeled {
                name,
                body: Box::new(self.rewrite_stmt(*body)),
            },
            other => other,
        }
    }

    fn rewrite_expr(&mut self, expr: Expression) -> Expression {
        match expr {
            Expression::Valof(body) => Expression::Valof(Box::new(self.rewrite_stmt(*body))),
            other => other,
        }
    }

    /// Split a sequence into linear segments at control-flow statements and
    /// run the windowed transform over each segment.
    fn rewrite_sequence(&mut self, children: Vec<Statement>) -> Vec<Statement> {
        let mut output = Vec::with_capacity(children.len());
        let mut segment = Vec::new();
        for child in children {
            if matches!(&child, Statement::Assignment { .. })
                || matches!(&child, Statement::Declaration(decl) if matches!(decl.as_ref(), Declaration::Let(_)))
            {
                segment.push(child);
            } else {
                self.flush_segment(&mut output, std::mem::take(&mut segment));
                output.push(self.rewrite_stmt(child));
            }
        }
        self.flush_segment(&mut output, segment);
        output
    }

    /// The windowed transform over one linear segment.
    fn flush_segment(&mut self, output: &mut Vec<Statement>, segment: Vec<Statement>) {
        // Candidate fingerprint of each statement, and the names each
        // statement defines, for the reuse lookahead below.
        let keys: Vec<Option<String>> = segment
            .iter()
            .map(|stmt| match stmt {
                Statement::Assignment { targets, values }
                    if targets.len() == 1 && values.len() == 1 && is_candidate(&values[0]) =>
                {
                    Some(fingerprint(&values[0]))
                }
                _ => None,
            })
            .collect();
        let defs: Vec<Vec<&str>> = segment
            .iter()
            .map(|stmt| match stmt {
                Statement::Assignment { targets, .. } => targets
                    .iter()
                    .filter_map(|t| match t {
                        Expression::VariableAccess(name) => Some(name.as_str()),
                        _ => None,
                    })
                    .collect(),
                Statement::Declaration(decl) => match decl.as_ref() {
                    Declaration::Let(bindings) => {
                        bindings.iter().map(|b| b.name.as_str()).collect()
                    }
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            })
            .collect();

        // A binding pays off only if the fingerprint recurs before any of
        // its variables is redefined.
        let reused_later = |index: usize, key: &str| -> bool {
            for later in index + 1..segment.len() {
                if keys[later].as_deref() == Some(key) {
                    return true;
                }
                if defs[later].iter().any(|name| mentions(key, name)) {
                    return false;
                }
            }
            false
        };

        let mut available: HashMap<String, String> = HashMap::new();
        for (index, stmt) in segment.iter().enumerate() {
            match stmt {
                Statement::Assignment { targets, values } => {
                    let mut value = values[0].clone();

                    if let Some(key) = &keys[index] {
                        if let Some(temp) = available.get(key) {
                            value = Expression::variable(temp.clone());
                        } else if reused_later(index, key) {
                            let temp = self.fresh_temp();
                            output.push(Statement::Declaration(Box::new(Declaration::Let(vec![
                                ValueBinding {
                                    name: temp.clone(),
                                    init: Some(value),
                                },
                            ]))));
                            available.insert(key.clone(), temp.clone());
                            value = Expression::variable(temp);
                        }
                    }

                    for name in &defs[index] {
                        invalidate(&mut available, name);
                    }
                    let mut new_values = values.clone();
                    new_values[0] = value;
                    output.push(Statement::Assignment {
                        targets: targets.clone(),
                        values: new_values,
                    });
                }
                Statement::Declaration(decl) if matches!(decl.as_ref(), Declaration::Let(_)) => {
                    for name in &defs[index] {
                        invalidate(&mut available, name);
                    }
                    output.push(stmt.clone());
                }
                other => output.push(other.clone()),
            }
        }
    }
}

/// Pure and worth naming: unary/binary operators over pure operands.
fn is_candidate(expr: &Expression) -> bool {
    matches!(
        expr,
        Expression::UnaryOp { .. } | Expression::BinaryOp { .. }
    ) && is_pure(expr)
}

fn is_pure(expr: &Expression) -> bool {
    match expr {
        Expression::NumberLiteral(_)
        | Expression::FloatLiteral(_)
        | Expression::CharLiteral(_)
        | Expression::VariableAccess(_) => true,
        Expression::UnaryOp { operand, .. } => is_pure(operand),
        Expression::BinaryOp { left, right, .. } => is_pure(left) && is_pure(right),
        _ => false,
    }
}

/// Canonical textual key for structural equality of pure expressions.
fn fingerprint(expr: &Expression) -> String {
    match expr {
        Expression::NumberLiteral(n) => n.to_string(),
        Expression::FloatLiteral(f) => format!("{:?}", f),
        Expression::CharLiteral(c) => format!("'{}'", c),
        Expression::VariableAccess(name) => name.clone(),
        Expression::UnaryOp { op, operand } => format!("({} {})", op, fingerprint(operand)),
        Expression::BinaryOp { op, left, right } => {
            format!("({} {} {})", op, fingerprint(left), fingerprint(right))
        }
        _ => "<opaque>".to_string(),
    }
}

/// Drop every remembered fingerprint that mentions `name`.
fn invalidate(available: &mut HashMap<String, String>, name: &str) {
    available.retain(|key, _| !mentions(key, name));
}

fn mentions(fingerprint: &str, name: &str) -> bool {
    fingerprint
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|word| word == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn rewritten_body(source: &str) -> Vec<Statement> {
        let program = Parser::parse(source).unwrap();
        let optimized = CommonSubexpressionEliminationPass::new()
            .apply(program)
            .unwrap();
        match optimized.declarations.into_iter().next().unwrap() {
            Declaration::Function(func) => match func.body {
                FunctionBody::Statement(Statement::Compound(stmts)) => stmts,
                _ => panic!("expected a compound body"),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn test_repeated_expression_is_bound_once() {
        let stmts = rewritten_body(
            "LET START() BE $( A := X + Y; B := X + Y $)",
        );
        // LET temp = X + Y; A := temp; B := temp
        assert_eq!(stmts.len(), 3);
        let Statement::Declaration(decl) = &stmts[0] else {
            panic!("expected a temporary binding first");
        };
        let Declaration::Let(bindings) = decl.as_ref() else {
            panic!("expected a temporary binding first");
        };
        let temp = &bindings[0].name;
        for stmt in &stmts[1..] {
            let Statement::Assignment { values, .. } = stmt else {
                panic!();
            };
            assert_eq!(values[0], Expression::variable(temp.clone()));
        }
    }

    #[test]
    fn test_single_occurrence_is_left_alone() {
        let stmts = rewritten_body("LET START() BE $( A := X + Y; B := X - Y $)");
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0], Statement::Assignment { .. }));
    }

    #[test]
    fn test_assignment_invalidates_fingerprints() {
        let stmts = rewritten_body(
            "LET START() BE $( A := X + Y; X := 0; B := X + Y $)",
        );
        // X changed between the occurrences, so no temporary is reused for B.
        let Statement::Assignment { values, .. } = stmts.last().unwrap() else {
            panic!();
        };
        assert!(matches!(values[0], Expression::BinaryOp { .. }));
    }

    #[test]
    fn test_calls_are_not_eliminated() {
        let stmts = rewritten_body("LET START() BE $( A := F(1); B := F(1) $)");
        assert_eq!(stmts.len(), 2);
        for stmt in &stmts {
            let Statement::Assignment { values, .. } = stmt else {
                panic!();
            };
            assert!(matches!(values[0], Expression::FunctionCall { .. }));
        }
    }

    #[test]
    fn test_subscripts_are_not_eliminated() {
        let stmts = rewritten_body("LET START() BE $( A := V!1; B := V!1 $)");
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn test_control_flow_closes_the_window() {
        let stmts = rewritten_body(
            "LET START() BE $( A := X + Y; IF A THEN C := 1; B := X + Y $)",
        );
        // The IF between occurrences prevents reuse across it.
        let Statement::Assignment { values, .. } = stmts.last().unwrap() else {
            panic!();
        };
        assert!(matches!(values[0], Expression::BinaryOp { .. }));
    }
}
