//! Token and AST dumps for `--debug`.

use std::fmt::Write;

use crate::CompileError;
use crate::ast::{
    Declaration, Expression, FunctionBody, Program, Statement,
};
use crate::lexer::Lexer;

/// Render the token stream, one token per line.
pub fn dump_tokens(source: &str) -> Result<String, CompileError> {
    let tokens = Lexer::tokenize(source)?;
    let mut out = String::new();
    for token in tokens {
        let _ = writeln!(
            out,
            "{:>4}:{:<3} {:<20} {:?}",
            token.line,
            token.column,
            format!("{}", token.kind),
            token.text
        );
    }
    Ok(out)
}

/// Render the AST as an indented outline.
pub fn dump_program(program: &Program) -> String {
    let mut out = String::new();
    for decl in &program.declarations {
        write_declaration(&mut out, decl, 0);
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_declaration(out: &mut String, decl: &Declaration, depth: usize) {
    indent(out, depth);
    match decl {
        Declaration::Let(bindings) => {
            out.push_str("Let\n");
            for binding in bindings {
                indent(out, depth + 1);
                let _ = writeln!(out, "{} =", binding.name);
                if let Some(init) = &binding.init {
                    write_expression(out, init, depth + 2);
                }
            }
        }
        Declaration::Function(func) => {
            let _ = writeln!(out, "Function {}({})", func.name, func.params.join(", "));
            match &func.body {
                FunctionBody::Expression(expr) => write_expression(out, expr, depth + 1),
                FunctionBody::Statement(stmt) => write_statement(out, stmt, depth + 1),
            }
        }
        Declaration::Global(globals) => {
            out.push_str("Global\n");
            for global in globals {
                indent(out, depth + 1);
                let _ = writeln!(out, "{}: {}", global.name, global.slot);
            }
        }
        Declaration::Manifest(manifests) => {
            out.push_str("Manifest\n");
            for manifest in manifests {
                indent(out, depth + 1);
                let _ = writeln!(out, "{} = {}", manifest.name, manifest.value);
            }
        }
        Declaration::Get(path) => {
            let _ = writeln!(out, "Get {:?}", path);
        }
    }
}

fn write_statement(out: &mut String, stmt: &Statement, depth: usize) {
    indent(out, depth);
    match stmt {
        Statement::Assignment { targets, values } => {
            out.push_str("Assignment\n");
            for target in targets {
                write_expression(out, target, depth + 1);
            }
            indent(out, depth + 1);
            out.push_str(":=\n");
            for value in values {
                write_expression(out, value, depth + 1);
            }
        }
        Statement::RoutineCall(call) => {
            out.push_str("RoutineCall\n");
            write_expression(out, call, depth + 1);
        }
        Statement::Compound(children) => {
            out.push_str("Compound\n");
            for child in children {
                write_statement(out, child, depth + 1);
            }
        }
        Statement::If {
            condition,
            then_branch,
        } => {
            out.push_str("If\n");
            write_expression(out, condition, depth + 1);
            write_statement(out, then_branch, depth + 1);
        }
        Statement::Test {
            condition,
            then_branch,
            else_branch,
        } => {
            out.push_str("Test\n");
            write_expression(out, condition, depth + 1);
            write_statement(out, then_branch, depth + 1);
            if let Some(else_stmt) = else_branch {
                write_statement(out, else_stmt, depth + 1);
            }
        }
        Statement::While { condition, body } => {
            out.push_str("While\n");
            write_expression(out, condition, depth + 1);
            write_statement(out, body, depth + 1);
        }
        Statement::Repeat {
            body,
            condition,
            kind,
        } => {
            let _ = writeln!(out, "Repeat {:?}", kind);
            write_statement(out, body, depth + 1);
            if let Some(cond) = condition {
                write_expression(out, cond, depth + 1);
            }
        }
        Statement::For {
            var,
            from,
            to,
            by,
            body,
        } => {
            let _ = writeln!(out, "For {}", var);
            write_expression(out, from, depth + 1);
            write_expression(out, to, depth + 1);
            if let Some(step) = by {
                write_expression(out, step, depth + 1);
            }
            write_statement(out, body, depth + 1);
        }
        Statement::Switchon {
            discriminant,
            cases,
            default,
        } => {
            out.push_str("Switchon\n");
            write_expression(out, discriminant, depth + 1);
            for case in cases {
                indent(out, depth + 1);
                let _ = writeln!(out, "Case {}", case.value);
                write_statement(out, &case.body, depth + 2);
            }
            if let Some(default_stmt) = default {
                indent(out, depth + 1);
                out.push_str("Default\n");
                write_statement(out, default_stmt, depth + 2);
            }
        }
        Statement::Break => out.push_str("Break\n"),
        Statement::Loop => out.push_str("Loop\n"),
        Statement::Endcase => out.push_str("Endcase\n"),
        Statement::Finish => out.push_str("Finish\n"),
        Statement::Return => out.push_str("Return\n"),
        Statement::Resultis(value) => {
            out.push_str("Resultis\n");
            write_expression(out, value, depth + 1);
        }
        Statement::Goto(target) => {
            out.push_str("Goto\n");
            write_expression(out, target, depth + 1);
        }
        Statement::Labeled { name, body } => {
            let _ = writeln!(out, "Label {}", name);
            write_statement(out, body, depth + 1);
        }
        Statement::Declaration(decl) => {
            out.push_str("Declaration\n");
            write_declaration(out, decl, depth + 1);
        }
    }
}

fn write_expression(out: &mut String, expr: &Expression, depth: usize) {
    indent(out, depth);
    match expr {
        Expression::NumberLiteral(value) => {
            let _ = writeln!(out, "Number {}", value);
        }
        Expression::FloatLiteral(value) => {
            let _ = writeln!(out, "Float {}", value);
        }
        Expression::StringLiteral(text) => {
            let _ = writeln!(out, "String {:?}", text);
        }
        Expression::CharLiteral(value) => {
            let _ = writeln!(out, "Char {}", value);
        }
        Expression::VariableAccess(name) => {
            let _ = writeln!(out, "Var {}", name);
        }
        Expression::UnaryOp { op, operand } => {
            let _ = writeln!(out, "Unary {}", op);
            write_expression(out, operand, depth + 1);
        }
        Expression::BinaryOp { op, left, right } => {
            let _ = writeln!(out, "Binary {}", op);
            write_expression(out, left, depth + 1);
            write_expression(out, right, depth + 1);
        }
        Expression::FunctionCall {
            function,
            arguments,
        } => {
            out.push_str("Call\n");
            write_expression(out, function, depth + 1);
            for arg in arguments {
                write_expression(out, arg, depth + 1);
            }
        }
        Expression::Conditional {
            condition,
            then_expr,
            else_expr,
        } => {
            out.push_str("Conditional\n");
            write_expression(out, condition, depth + 1);
            write_expression(out, then_expr, depth + 1);
            write_expression(out, else_expr, depth + 1);
        }
        Expression::Table(items) => {
            out.push_str("Table\n");
            for item in items {
                write_expression(out, item, depth + 1);
            }
        }
        Expression::VectorConstructor(size) => {
            out.push_str("Vec\n");
            write_expression(out, size, depth + 1);
        }
        Expression::Valof(body) => {
            out.push_str("Valof\n");
            write_statement(out, body, depth + 1);
        }
        Expression::Dereference(pointer) => {
            out.push_str("Deref\n");
            write_expression(out, pointer, depth + 1);
        }
        Expression::VectorAccess { vector, index } => {
            out.push_str("VectorAccess\n");
            write_expression(out, vector, depth + 1);
            write_expression(out, index, depth + 1);
        }
        Expression::CharacterAccess { string, index } => {
            out.push_str("CharacterAccess\n");
            write_expression(out, string, depth + 1);
            write_expression(out, index, depth + 1);
        }
        Expression::FloatVectorAccess { vector, index } => {
            out.push_str("FloatVectorAccess\n");
            write_expression(out, vector, depth + 1);
            write_expression(out, index, depth + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    #[test]
    fn test_token_dump_lists_positions() {
        let dump = dump_tokens("LET X = 1").unwrap();
        assert!(dump.contains("LET"));
        assert!(dump.contains("identifier"));
    }

    #[test]
    fn test_ast_dump_is_indented() {
        let program = Parser::parse("LET START() BE X := 1 + 2").unwrap();
        let dump = dump_program(&program);
        assert!(dump.contains("Function START()"));
        assert!(dump.contains("Binary +"));
    }
}
