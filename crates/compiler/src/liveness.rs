//! Backward liveness analysis over the CFG.
//!
//! Classic may-dataflow: `live-out[B] = U live-in[s]` over successors and
//! `live-in[B] = use[B] U (live-out[B] \ def[B])`, iterated to a fixed point
//! (guaranteed by monotonicity over the finite name set). After convergence
//! the block sets are pushed down to individual statements and expressions,
//! right-to-left to respect evaluation order.
//!
//! Results are keyed by node identity. The keys wrap raw pointers into the
//! analyzed tree, which the caller keeps alive for the lifetime of the
//! analysis; they are never dereferenced.

use std::collections::{BTreeSet, HashMap};

use crate::ast::{Declaration, Expression, Statement};
use crate::cfg::{BlockId, Cfg, Entry};

pub type NameSet = BTreeSet<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtKey(*const Statement);

impl StmtKey {
    pub fn of(stmt: &Statement) -> Self {
        StmtKey(stmt as *const Statement)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprKey(*const Expression);

impl ExprKey {
    pub fn of(expr: &Expression) -> Self {
        ExprKey(expr as *const Expression)
    }
}

#[derive(Debug, Default)]
pub struct LivenessAnalysis {
    block_live_in: HashMap<BlockId, NameSet>,
    block_live_out: HashMap<BlockId, NameSet>,
    stmt_live_in: HashMap<StmtKey, NameSet>,
    stmt_live_out: HashMap<StmtKey, NameSet>,
    expr_live_in: HashMap<ExprKey, NameSet>,
    expr_live_out: HashMap<ExprKey, NameSet>,
}

impl LivenessAnalysis {
    pub fn analyze(cfg: &Cfg<'_>) -> Self {
        let mut analysis = LivenessAnalysis::default();
        analysis.solve_blocks(cfg);
        analysis.propagate_into_entries(cfg);
        analysis
    }

    /// One round of the block equations; returns true if any set changed.
    /// The public fixed-point tests re-run this after convergence.
    pub fn solve_blocks_once(&mut self, cfg: &Cfg<'_>) -> bool {
        let mut changed = false;
        // Reverse order of discovery approximates reverse topological
        // order, which speeds convergence without affecting the result.
        for block in cfg.blocks().iter().rev() {
            let mut new_out = NameSet::new();
            for succ in &block.successors {
                if let Some(succ_in) = self.block_live_in.get(succ) {
                    new_out.extend(succ_in.iter().cloned());
                }
            }

            let (block_use, block_def) = block_use_def(&block.entries);
            let mut new_in = block_use;
            for name in &new_out {
                if !block_def.contains(name) {
                    new_in.insert(name.clone());
                }
            }

            if self.block_live_out.get(&block.id) != Some(&new_out) {
                self.block_live_out.insert(block.id, new_out);
                changed = true;
            }
            if self.block_live_in.get(&block.id) != Some(&new_in) {
                self.block_live_in.insert(block.id, new_in);
                changed = true;
            }
        }
        changed
    }

    fn solve_blocks(&mut self, cfg: &Cfg<'_>) {
        for block in cfg.blocks() {
            self.block_live_in.insert(block.id, NameSet::new());
            self.block_live_out.insert(block.id, NameSet::new());
        }
        while self.solve_blocks_once(cfg) {}
    }

    /// Push block-level results down to entries: the last entry's live-out
    /// is the block's live-out, each earlier entry's live-out is the
    /// live-in of its successor.
    fn propagate_into_entries(&mut self, cfg: &Cfg<'_>) {
        for block in cfg.blocks() {
            let mut live = self
                .block_live_out
                .get(&block.id)
                .cloned()
                .unwrap_or_default();
            for entry in block.entries.iter().rev() {
                let (entry_use, entry_def) = entry_use_def(entry);
                let mut live_in: NameSet = entry_use.clone();
                for name in &live {
                    if !entry_def.contains(name) {
                        live_in.insert(name.clone());
                    }
                }

                match entry {
                    Entry::Stmt(stmt) => {
                        self.stmt_live_out.insert(StmtKey::of(stmt), live.clone());
                        self.stmt_live_in
                            .insert(StmtKey::of(stmt), live_in.clone());
                        self.propagate_into_statement(stmt, &live_in, &live);
                    }
                    Entry::Cond(expr) | Entry::Eval(expr) => {
                        self.propagate_into_expression(expr, live.clone());
                    }
                    Entry::Def(_) | Entry::UseVar(_) => {}
                }

                live = live_in;
            }
        }
    }

    fn propagate_into_statement(&mut self, stmt: &Statement, _live_in: &NameSet, live_out: &NameSet) {
        // Expressions evaluate left-to-right, so liveness flows through them
        // right-to-left starting from the statement's out-set.
        let exprs = statement_expressions(stmt);
        let mut live = live_out.clone();
        for expr in exprs.into_iter().rev() {
            live = self.propagate_into_expression(expr, live);
        }
    }

    /// Record live-in/live-out for `expr` and its children, right-to-left.
    /// Returns the expression's live-in set.
    fn propagate_into_expression(&mut self, expr: &Expression, live_out: NameSet) -> NameSet {
        let mut live_in = live_out.clone();
        live_in.extend(expression_uses(expr));

        let mut live = live_out.clone();
        for child in expression_children(expr).into_iter().rev() {
            live = self.propagate_into_expression(child, live);
        }

        self.expr_live_out.insert(ExprKey::of(expr), live_out);
        self.expr_live_in.insert(ExprKey::of(expr), live_in.clone());
        live_in
    }

    pub fn block_live_in(&self, id: BlockId) -> &NameSet {
        static EMPTY: std::sync::OnceLock<NameSet> = std::sync::OnceLock::new();
        self.block_live_in
            .get(&id)
            .unwrap_or_else(|| EMPTY.get_or_init(NameSet::new))
    }

    pub fn block_live_out(&self, id: BlockId) -> &NameSet {
        static EMPTY: std::sync::OnceLock<NameSet> = std::sync::OnceLock::new();
        self.block_live_out
            .get(&id)
            .unwrap_or_else(|| EMPTY.get_or_init(NameSet::new))
    }

    pub fn stmt_live_in(&self, stmt: &Statement) -> Option<&NameSet> {
        self.stmt_live_in.get(&StmtKey::of(stmt))
    }

    pub fn stmt_live_out(&self, stmt: &Statement) -> Option<&NameSet> {
        self.stmt_live_out.get(&StmtKey::of(stmt))
    }

    pub fn expr_live_in(&self, expr: &Expression) -> Option<&NameSet> {
        self.expr_live_in.get(&ExprKey::of(expr))
    }

    pub fn expr_live_out(&self, expr: &Expression) -> Option<&NameSet> {
        self.expr_live_out.get(&ExprKey::of(expr))
    }
}

/// Variables read by an expression. A routine name in call position is not a
/// variable use; its arguments are.
pub fn expression_uses(expr: &Expression) -> NameSet {
    let mut uses = NameSet::new();
    collect_expression_uses(expr, &mut uses);
    uses
}

fn collect_expression_uses(expr: &Expression, uses: &mut NameSet) {
    match expr {
        Expression::VariableAccess(name) => {
            uses.insert(name.clone());
        }
        Expression::FunctionCall {
            function,
            arguments,
        } => {
            if !matches!(**function, Expression::VariableAccess(_)) {
                collect_expression_uses(function, uses);
            }
            for arg in arguments {
                collect_expression_uses(arg, uses);
            }
        }
        // A VALOF body may read anything; over-approximating its reads is
        // safe for a may-analysis.
        Expression::Valof(body) => collect_statement_uses(body, uses),
        other => {
            for child in expression_children(other) {
                collect_expression_uses(child, uses);
            }
        }
    }
}

/// Every read anywhere inside a statement subtree.
fn collect_statement_uses(stmt: &Statement, uses: &mut NameSet) {
    match stmt {
        Statement::Compound(children) => {
            for child in children {
                collect_statement_uses(child, uses);
            }
        }
        Statement::If {
            condition,
            then_branch,
        } => {
            collect_expression_uses(condition, uses);
            collect_statement_uses(then_branch, uses);
        }
        Statement::Test {
            condition,
            then_branch,
            else_branch,
        } => {
            collect_expression_uses(condition, uses);
            collect_statement_uses(then_branch, uses);
            if let Some(else_stmt) = else_branch {
                collect_statement_uses(else_stmt, uses);
            }
        }
        Statement::While { condition, body } => {
            collect_expression_uses(condition, uses);
            collect_statement_uses(body, uses);
        }
        Statement::Repeat {
            body, condition, ..
        } => {
            collect_statement_uses(body, uses);
            if let Some(cond) = condition {
                collect_expression_uses(cond, uses);
            }
        }
        Statement::For {
            from, to, by, body, ..
        } => {
            collect_expression_uses(from, uses);
            collect_expression_uses(to, uses);
            if let Some(by_expr) = by {
                collect_expression_uses(by_expr, uses);
            }
            collect_statement_uses(body, uses);
        }
        Statement::Switchon {
            discriminant,
            cases,
            default,
        } => {
            collect_expression_uses(discriminant, uses);
            for case in cases {
                collect_statement_uses(&case.body, uses);
            }
            if let Some(default_stmt) = default {
                collect_statement_uses(default_stmt, uses);
            }
        }
        Statement::Labeled { body, .. } => collect_statement_uses(body, uses),
        other => {
            let (stmt_uses, _) = statement_use_def(other);
            uses.extend(stmt_uses);
        }
    }
}

fn expression_children(expr: &Expression) -> Vec<&Expression> {
    match expr {
        Expression::NumberLiteral(_)
        | Expression::FloatLiteral(_)
        | Expression::StringLiteral(_)
        | Expression::CharLiteral(_)
        | Expression::VariableAccess(_) => Vec::new(),
        Expression::UnaryOp { operand, .. } => vec![operand],
        Expression::BinaryOp { left, right, .. } => vec![left, right],
        Expression::FunctionCall {
            function,
            arguments,
        } => {
            let mut children = vec![&**function];
            children.extend(arguments.iter());
            children
        }
        Expression::Conditional {
            condition,
            then_expr,
            else_expr,
        } => vec![condition, then_expr, else_expr],
        Expression::Table(items) => items.iter().collect(),
        Expression::VectorConstructor(size) => vec![size],
        // A VALOF body is opaque at expression level; its reads still count
        // as uses through `statement_uses`.
        Expression::Valof(_) => Vec::new(),
        Expression::Dereference(pointer) => vec![pointer],
        Expression::VectorAccess { vector, index }
        | Expression::FloatVectorAccess { vector, index } => vec![vector, index],
        Expression::CharacterAccess { string, index } => vec![string, index],
    }
}

/// Use/def sets of one simple statement, per the contracts: a bare-name
/// assignment target defines; subscripted or dereferenced targets use their
/// constituents; LET defines its names.
pub fn statement_use_def(stmt: &Statement) -> (NameSet, NameSet) {
    let mut uses = NameSet::new();
    let mut defs = NameSet::new();
    match stmt {
        Statement::Assignment { targets, values } => {
            for value in values {
                uses.extend(expression_uses(value));
            }
            for target in targets {
                match target {
                    Expression::VariableAccess(name) => {
                        defs.insert(name.clone());
                    }
                    other => uses.extend(expression_uses(other)),
                }
            }
        }
        Statement::Declaration(decl) => match decl.as_ref() {
            Declaration::Let(bindings) => {
                for binding in bindings {
                    if let Some(init) = &binding.init {
                        uses.extend(expression_uses(init));
                    }
                    defs.insert(binding.name.clone());
                }
            }
            _ => {}
        },
        Statement::RoutineCall(call) => {
            uses.extend(expression_uses(call));
        }
        Statement::Resultis(value) => {
            uses.extend(expression_uses(value));
        }
        Statement::Goto(target) => {
            // A bare label name is a control target, not a data read.
            if !matches!(target, Expression::VariableAccess(_)) {
                uses.extend(expression_uses(target));
            }
        }
        // Valof bodies reached through expressions: count their reads.
        other => {
            for expr in statement_expressions(other) {
                uses.extend(expression_uses(expr));
            }
        }
    }
    (uses, defs)
}

fn entry_use_def(entry: &Entry<'_>) -> (NameSet, NameSet) {
    match entry {
        Entry::Stmt(stmt) => statement_use_def(stmt),
        Entry::Cond(expr) | Entry::Eval(expr) => (expression_uses(expr), NameSet::new()),
        Entry::Def(name) => {
            let mut defs = NameSet::new();
            defs.insert((*name).to_string());
            (NameSet::new(), defs)
        }
        Entry::UseVar(name) => {
            let mut uses = NameSet::new();
            uses.insert((*name).to_string());
            (uses, NameSet::new())
        }
    }
}

fn block_use_def(entries: &[Entry<'_>]) -> (NameSet, NameSet) {
    let mut block_use = NameSet::new();
    let mut block_def = NameSet::new();
    for entry in entries {
        let (entry_use, entry_def) = entry_use_def(entry);
        // Reads count only before any local definition of the same name.
        for name in entry_use {
            if !block_def.contains(&name) {
                block_use.insert(name);
            }
        }
        block_def.extend(entry_def);
    }
    (block_use, block_def)
}

/// Top-level expressions of a simple statement, in evaluation order.
fn statement_expressions(stmt: &Statement) -> Vec<&Expression> {
    match stmt {
        Statement::Assignment { targets, values } => {
            let mut exprs: Vec<&Expression> = values.iter().collect();
            exprs.extend(targets.iter());
            exprs
        }
        Statement::RoutineCall(call) => vec![call],
        Statement::Resultis(value) => vec![value],
        Statement::Goto(target) => vec![target],
        Statement::Declaration(decl) => match decl.as_ref() {
            Declaration::Let(bindings) => {
                bindings.iter().filter_map(|b| b.init.as_ref()).collect()
            }
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Declaration, FunctionDeclaration};
    use crate::parser::Parser;

    fn function(source: &str) -> FunctionDeclaration {
        let program = Parser::parse(source).unwrap();
        program
            .declarations
            .into_iter()
            .find_map(|d| match d {
                Declaration::Function(f) => Some(f),
                _ => None,
            })
            .expect("no function in source")
    }

    #[test]
    fn test_fixed_point_is_stable() {
        let func = function(
            r#"LET F(N) = VALOF $(
                LET S = 0
                FOR I = 1 TO N DO S := S + I
                RESULTIS S
            $)"#,
        );
        let cfg = Cfg::build(&func);
        let mut analysis = LivenessAnalysis::analyze(&cfg);
        // Iterating further changes nothing.
        assert!(!analysis.solve_blocks_once(&cfg));
    }

    #[test]
    fn test_loop_variable_is_live_around_back_edge() {
        let func = function(
            r#"LET F(N) = VALOF $(
                LET S = 0
                WHILE S < N DO S := S + 1
                RESULTIS S
            $)"#,
        );
        let cfg = Cfg::build(&func);
        let analysis = LivenessAnalysis::analyze(&cfg);
        // S is live at the loop header: read by the condition and the body.
        let header = cfg
            .blocks()
            .iter()
            .find(|b| b.predecessors.len() == 2)
            .expect("loop header has entry and back edge");
        assert!(analysis.block_live_in(header.id).contains("S"));
        assert!(analysis.block_live_in(header.id).contains("N"));
    }

    #[test]
    fn test_dead_binding_is_not_live() {
        let func = function(
            r#"LET F() = VALOF $(
                LET UNUSED = 1
                LET KEPT = 2
                RESULTIS KEPT
            $)"#,
        );
        let cfg = Cfg::build(&func);
        let analysis = LivenessAnalysis::analyze(&cfg);
        let entry = cfg.block(cfg.entry());
        // Find the LET UNUSED statement and check its out-set.
        let Entry::Stmt(unused_let) = entry.entries[0] else {
            panic!("expected a statement entry");
        };
        let out = analysis.stmt_live_out(unused_let).unwrap();
        assert!(!out.contains("UNUSED"));
    }

    #[test]
    fn test_routine_name_is_not_a_use() {
        let func = function("LET START() BE WRITEN(X)");
        let cfg = Cfg::build(&func);
        let analysis = LivenessAnalysis::analyze(&cfg);
        let live_in = analysis.block_live_in(cfg.entry());
        assert!(live_in.contains("X"));
        assert!(!live_in.contains("WRITEN"));
    }

    #[test]
    fn test_subscripted_assignment_target_uses_constituents() {
        let (uses, defs) = statement_use_def(&parse_stmt("V!I := W"));
        assert!(uses.contains("V"));
        assert!(uses.contains("I"));
        assert!(uses.contains("W"));
        assert!(defs.is_empty());

        let (uses, defs) = statement_use_def(&parse_stmt("A := B"));
        assert!(uses.contains("B"));
        assert!(defs.contains("A"));
        assert!(!uses.contains("A"));
    }

    fn parse_stmt(text: &str) -> Statement {
        let source = format!("LET START() BE {}", text);
        let func = function(&source);
        match func.body {
            crate::ast::FunctionBody::Statement(stmt) => stmt,
            _ => panic!(),
        }
    }

    #[test]
    fn test_expression_liveness_recorded() {
        let func = function("LET START() BE X := A + B");
        let cfg = Cfg::build(&func);
        let analysis = LivenessAnalysis::analyze(&cfg);
        let Entry::Stmt(stmt) = cfg.block(cfg.entry()).entries[0] else {
            panic!();
        };
        let Statement::Assignment { values, .. } = stmt else {
            panic!();
        };
        let live_in = analysis.expr_live_in(&values[0]).unwrap();
        assert!(live_in.contains("A"));
        assert!(live_in.contains("B"));
    }
}
