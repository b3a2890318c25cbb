//! End-to-end pipeline scenarios.
//!
//! Every scenario compiles on any host; assertions about emitted
//! instructions run everywhere. Invoking the generated code and checking
//! its output is gated on AArch64 hosts, with the runtime output redirected
//! into a temp file.

use bcplc::ast::{
    Declaration, Expression, FunctionBody, Program, Statement, SwitchCase,
};
use bcplc::{CompilerConfig, compile_source, parse_and_optimize};
use bcpl_runtime::Runtime;

fn optimizing_config() -> CompilerConfig {
    CompilerConfig::default().with_optimization(true)
}

/// Walk every expression in a program.
fn walk_expressions(program: &Program, visit: &mut dyn FnMut(&Expression)) {
    fn expr(e: &Expression, visit: &mut dyn FnMut(&Expression)) {
        visit(e);
        match e {
            Expression::UnaryOp { operand, .. } => expr(operand, visit),
            Expression::BinaryOp { left, right, .. } => {
                expr(left, visit);
                expr(right, visit);
            }
            Expression::FunctionCall {
                function,
                arguments,
            } => {
                expr(function, visit);
                arguments.iter().for_each(|a| expr(a, visit));
            }
            Expression::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                expr(condition, visit);
                expr(then_expr, visit);
                expr(else_expr, visit);
            }
            Expression::Table(items) => items.iter().for_each(|i| expr(i, visit)),
            Expression::VectorConstructor(size) => expr(size, visit),
            Expression::Valof(body) => stmt(body, visit),
            Expression::Dereference(pointer) => expr(pointer, visit),
            Expression::VectorAccess { vector, index }
            | Expression::FloatVectorAccess { vector, index } => {
                expr(vector, visit);
                expr(index, visit);
            }
            Expression::CharacterAccess { string, index } => {
                expr(string, visit);
                expr(index, visit);
            }
            _ => {}
        }
    }

    fn stmt(s: &Statement, visit: &mut dyn FnMut(&Expression)) {
        match s {
            Statement::Assignment { targets, values } => {
                targets.iter().for_each(|e| expr(e, visit));
                values.iter().for_each(|e| expr(e, visit));
            }
            Statement::RoutineCall(call) => expr(call, visit),
            Statement::Compound(children) => children.iter().for_each(|c| stmt(c, visit)),
            Statement::If {
                condition,
                then_branch,
            } => {
                expr(condition, visit);
                stmt(then_branch, visit);
            }
            Statement::Test {
                condition,
                then_branch,
                else_branch,
            } => {
                expr(condition, visit);
                stmt(then_branch, visit);
                if let Some(e) = else_branch {
                    stmt(e, visit);
                }
            }
            Statement::While { condition, body } => {
                expr(condition, visit);
                stmt(body, visit);
            }
            Statement::Repeat {
                body, condition, ..
            } => {
                stmt(body, visit);
                if let Some(c) = condition {
                    expr(c, visit);
                }
            }
            Statement::For {
                from, to, by, body, ..
            } => {
                expr(from, visit);
                expr(to, visit);
                if let Some(b) = by {
                    expr(b, visit);
                }
                stmt(body, visit);
            }
            Statement::Switchon {
                discriminant,
                cases,
                default,
            } => {
                expr(discriminant, visit);
                cases
                    .iter()
                    .for_each(|SwitchCase { body, .. }| stmt(body, visit));
                if let Some(d) = default {
                    stmt(d, visit);
                }
            }
            Statement::Resultis(value) => expr(value, visit),
            Statement::Goto(target) => expr(target, visit),
            Statement::Labeled { body, .. } => stmt(body, visit),
            Statement::Declaration(Declaration::Let(bindings)) => {
                bindings
                    .iter()
                    .filter_map(|b| b.init.as_ref())
                    .for_each(|e| expr(e, visit));
            }
            _ => {}
        }
    }

    for decl in &program.declarations {
        match decl {
            Declaration::Function(func) => match &func.body {
                FunctionBody::Expression(e) => expr(e, visit),
                FunctionBody::Statement(s) => stmt(s, visit),
            },
            Declaration::Let(bindings) => bindings
                .iter()
                .filter_map(|b| b.init.as_ref())
                .for_each(|e| expr(e, visit)),
            _ => {}
        }
    }
}

const HELLO: &str = r#"LET START() BE $( WRITES("HI"); NEWLINE() $)"#;

const FACT_ITERATIVE: &str = r#"
LET FACT(N) = VALOF $(
    LET R = 1
    FOR I = 2 TO N DO R := R * I
    RESULTIS R
$)
LET START() BE WRITEN(FACT(6))
"#;

const FACT_TAIL: &str = r#"
LET FACT_TAIL(N, A) = VALOF $(
    TEST N = 0 THEN RESULTIS A
    OR RESULTIS FACT_TAIL(N - 1, N * A)
$)
LET START() BE WRITEN(FACT_TAIL(6, 1))
"#;

const FOLD_AND_DEAD: &str = r#"
LET START() BE $(
    LET X = 2 + 3 * 4
    IF X = 14 THEN WRITES("OK")
$)
"#;

const LICM_SUM: &str = r#"
LET START() BE $(
    LET S = 0
    FOR I = 1 TO 10 DO S := S + (7 * 11)
    WRITEN(S)
$)
"#;

const SWITCH: &str = r#"
LET F(N) = VALOF SWITCHON N INTO $(
    CASE 1: RESULTIS 10
    CASE 2: RESULTIS 20
    DEFAULT: RESULTIS 0
$)
LET START() BE $(
    WRITEN(F(1)); NEWLINE()
    WRITEN(F(2)); NEWLINE()
    WRITEN(F(3)); NEWLINE()
$)
"#;

#[test]
fn e1_hello_compiles_without_optimization() {
    let runtime = Runtime::new();
    let compiled = compile_source(HELLO, &runtime, &CompilerConfig::default()).unwrap();
    assert!(compiled.function_address("START").is_some());
    // WRITES and NEWLINE go through absolute runtime calls.
    assert!(compiled.listing().contains("blr x16"));
}

#[test]
fn e2_factorial_compiles_with_optimization() {
    let runtime = Runtime::new();
    let compiled = compile_source(FACT_ITERATIVE, &runtime, &optimizing_config()).unwrap();
    assert!(compiled.function_address("FACT").is_some());
}

#[test]
fn e3_tail_recursion_is_a_back_edge() {
    let runtime = Runtime::new();
    let compiled = compile_source(FACT_TAIL, &runtime, &CompilerConfig::default()).unwrap();
    let listing = compiled.listing();
    // The self call branches back to the post-prologue entry; the only BL
    // into FACT_TAIL is the outside call from START.
    assert!(listing.contains("b FACT_TAIL_tail"));
    assert_eq!(listing.matches("bl FACT_TAIL").count(), 1);
}

#[test]
fn e4_folding_leaves_no_literal_operator_pairs() {
    let program = parse_and_optimize(FOLD_AND_DEAD, &optimizing_config()).unwrap();
    let mut literal_pairs = 0;
    walk_expressions(&program, &mut |expr| {
        if let Expression::BinaryOp { left, right, .. } = expr
            && matches!(**left, Expression::NumberLiteral(_))
            && matches!(**right, Expression::NumberLiteral(_))
        {
            literal_pairs += 1;
        }
    });
    assert_eq!(literal_pairs, 0, "folding left literal operator pairs");
}

#[test]
fn e5_invariant_product_is_folded_or_hoisted_once() {
    let program = parse_and_optimize(LICM_SUM, &optimizing_config()).unwrap();
    // The folded product must appear, and multiplication must be gone from
    // the loop entirely.
    let mut product_count = 0;
    let mut folded_constant = 0;
    walk_expressions(&program, &mut |expr| match expr {
        Expression::BinaryOp {
            op: bcplc::ast::BinaryOperator::Multiply,
            ..
        } => product_count += 1,
        Expression::NumberLiteral(77) => folded_constant += 1,
        _ => {}
    });
    assert_eq!(product_count, 0);
    assert_eq!(folded_constant, 1);
}

#[test]
fn e6_dense_switch_uses_a_jump_table() {
    let runtime = Runtime::new();
    let compiled = compile_source(SWITCH, &runtime, &CompilerConfig::default()).unwrap();
    let listing = compiled.listing();
    // Cases 1 and 2 are dense: expect the table dispatch sequence.
    assert!(listing.contains("jump_table"));
    assert!(listing.contains("br x"));
}

#[test]
fn sparse_switch_uses_binary_search() {
    let runtime = Runtime::new();
    let source = r#"
        LET F(N) = VALOF SWITCHON N INTO $(
            CASE 1: RESULTIS 1
            CASE 1000: RESULTIS 2
            CASE 100000: RESULTIS 3
            DEFAULT: RESULTIS 0
        $)
        LET START() BE WRITEN(F(1000))
    "#;
    let compiled = compile_source(source, &runtime, &CompilerConfig::default()).unwrap();
    let listing = compiled.listing();
    assert!(!listing.contains("jump_table"));
    assert!(listing.contains("switch_lt"));
}

#[test]
fn getvec_and_freevec_resolve_through_the_symbol_table() {
    let runtime = Runtime::new();
    let source = r#"
        LET START() BE $(
            LET V = GETVEC(4)
            V!0 := 42
            WRITEN(V!0)
            FREEVEC(V)
        $)
    "#;
    let compiled = compile_source(source, &runtime, &CompilerConfig::default()).unwrap();
    // Both heap primitives reach the runtime by absolute address.
    assert!(compiled.listing().contains("call bcpl_vec"));
    assert!(compiled.listing().contains("call bcpl_vec_free"));
}

#[cfg(all(target_arch = "aarch64", unix))]
mod invoke {
    use super::*;
    use serial_test::serial;
    use std::ffi::CString;
    use std::io::Read;

    /// Redirect the runtime output into a temp file around `f` and return
    /// what the program wrote.
    fn run_capturing(source: &str, config: &CompilerConfig) -> String {
        let runtime = Runtime::new();
        let compiled = compile_source(source, &runtime, config).unwrap();

        let ctx = bcpl_runtime::context::global();
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = CString::new(file.path().to_str().unwrap()).unwrap();
        let mode = CString::new("w").unwrap();
        let stream = unsafe { libc::fopen(path.as_ptr(), mode.as_ptr()) };
        assert!(!stream.is_null());
        ctx.select_output(stream);
        unsafe {
            compiled.invoke();
        }
        ctx.flush_output();
        ctx.end_write();

        let mut text = String::new();
        std::fs::File::open(file.path())
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        text
    }

    #[test]
    #[serial]
    fn e1_hello_prints_hi() {
        assert_eq!(run_capturing(HELLO, &CompilerConfig::default()), "HI\n");
    }

    #[test]
    #[serial]
    fn e2_iterative_factorial_prints_720() {
        assert_eq!(
            run_capturing(FACT_ITERATIVE, &optimizing_config()),
            "720"
        );
        assert_eq!(
            run_capturing(FACT_ITERATIVE, &CompilerConfig::default()),
            "720"
        );
    }

    #[test]
    #[serial]
    fn e3_tail_recursive_factorial_prints_720() {
        assert_eq!(run_capturing(FACT_TAIL, &CompilerConfig::default()), "720");
    }

    #[test]
    #[serial]
    fn e4_folded_program_prints_ok() {
        assert_eq!(run_capturing(FOLD_AND_DEAD, &optimizing_config()), "OK");
        assert_eq!(
            run_capturing(FOLD_AND_DEAD, &CompilerConfig::default()),
            "OK"
        );
    }

    #[test]
    #[serial]
    fn e5_licm_sum_prints_770() {
        assert_eq!(run_capturing(LICM_SUM, &optimizing_config()), "770");
        assert_eq!(run_capturing(LICM_SUM, &CompilerConfig::default()), "770");
    }

    #[test]
    #[serial]
    fn e6_switch_prints_each_branch() {
        assert_eq!(
            run_capturing(SWITCH, &CompilerConfig::default()),
            "10\n20\n0\n"
        );
    }

    #[test]
    #[serial]
    fn globals_round_trip_through_the_global_vector() {
        let source = r#"
            GLOBAL $( COUNTER: 0 $)
            LET BUMP() BE COUNTER := COUNTER + 1
            LET START() BE $(
                COUNTER := 40
                BUMP(); BUMP()
                WRITEN(COUNTER)
            $)
        "#;
        assert_eq!(run_capturing(source, &CompilerConfig::default()), "42");
    }

    #[test]
    #[serial]
    fn vectors_store_and_load() {
        let source = r#"
            LET START() BE $(
                LET V = VEC 10
                V!3 := 7
                V!4 := V!3 * 6
                WRITEN(V!4)
            $)
        "#;
        assert_eq!(run_capturing(source, &CompilerConfig::default()), "42");
    }

    #[test]
    #[serial]
    fn character_subscript_reads_string_cells() {
        let source = r#"
            LET START() BE $(
                LET S = "AB"
                WRCH(S%1)
            $)
        "#;
        assert_eq!(run_capturing(source, &CompilerConfig::default()), "B");
    }

    #[test]
    #[serial]
    fn getvec_and_freevec_round_trip() {
        let source = r#"
            LET START() BE $(
                LET V = GETVEC(4)
                V!0 := 42
                WRITEN(V!0)
                FREEVEC(V)
            $)
        "#;
        assert_eq!(run_capturing(source, &CompilerConfig::default()), "42");
    }

    #[test]
    #[serial]
    fn right_shift_is_arithmetic() {
        let source = r#"
            LET START() BE $(
                LET N = -8
                WRITEN(N >> 1)
            $)
        "#;
        // Unoptimized, so the shift runs through the emitted instruction.
        assert_eq!(run_capturing(source, &CompilerConfig::default()), "-4");
    }

    #[test]
    #[serial]
    fn repeat_loops_terminate_on_their_condition() {
        let source = r#"
            LET START() BE $(
                LET N = 0
                N := N + 1 REPEATUNTIL N = 5
                WRITEN(N)
            $)
        "#;
        assert_eq!(run_capturing(source, &CompilerConfig::default()), "5");
    }

    #[test]
    #[serial]
    fn conditional_expression_selects_by_truth() {
        let source = r#"
            LET PICK(N) = N > 10 -> 1, 2
            LET START() BE $(
                WRITEN(PICK(11))
                WRITEN(PICK(9))
            $)
        "#;
        assert_eq!(run_capturing(source, &CompilerConfig::default()), "12");
    }
}
