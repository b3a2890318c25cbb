//! Control-flow-graph construction.
//!
//! Blocks live in a `Vec` arena addressed by [`BlockId`]; edges are index
//! pairs, so cyclic graphs need no shared ownership. Block entries are
//! borrowed views of the AST — building a CFG never takes the tree apart.

use crate::ast::{Expression, FunctionBody, FunctionDeclaration, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// One unit of work inside a basic block.
#[derive(Debug, Clone, Copy)]
pub enum Entry<'a> {
    /// A simple statement (assignment, call, LET, RESULTIS, ...).
    Stmt(&'a Statement),
    /// A branch or loop condition evaluated at the end of the block.
    Cond(&'a Expression),
    /// An expression evaluated for its value (FOR bounds, switch value).
    Eval(&'a Expression),
    /// A name defined at this point (FOR induction variable).
    Def(&'a str),
    /// A bare name read at this point (FOR header re-reads the variable).
    UseVar(&'a str),
}

#[derive(Debug)]
pub struct BasicBlock<'a> {
    pub id: BlockId,
    pub entries: Vec<Entry<'a>>,
    pub successors: Vec<BlockId>,
    pub predecessors: Vec<BlockId>,
}

#[derive(Debug)]
pub struct Cfg<'a> {
    blocks: Vec<BasicBlock<'a>>,
    entry: BlockId,
}

impl<'a> Cfg<'a> {
    /// Build the CFG of one function body.
    pub fn build(func: &'a FunctionDeclaration) -> Cfg<'a> {
        let mut builder = Builder {
            blocks: Vec::new(),
            labels: Vec::new(),
            gotos: Vec::new(),
        };
        let entry = builder.new_block();
        let current = match &func.body {
            FunctionBody::Statement(stmt) => builder.stmt(stmt, Some(entry)),
            FunctionBody::Expression(expr) => {
                // An expression body may still contain statements via VALOF.
                match expr {
                    Expression::Valof(body) => builder.stmt(body, Some(entry)),
                    other => {
                        builder.push(entry, Entry::Eval(other));
                        Some(entry)
                    }
                }
            }
        };
        let _ = current;

        // Wire GOTO edges now every label has a home block.
        for (from, name) in std::mem::take(&mut builder.gotos) {
            if let Some(&(_, target)) = builder.labels.iter().find(|(n, _)| *n == name) {
                builder.edge(from, target);
            }
        }

        Cfg {
            blocks: builder.blocks,
            entry,
        }
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn blocks(&self) -> &[BasicBlock<'a>] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock<'a> {
        &self.blocks[id.0]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

struct Builder<'a> {
    blocks: Vec<BasicBlock<'a>>,
    labels: Vec<(&'a str, BlockId)>,
    gotos: Vec<(BlockId, &'a str)>,
}

impl<'a> Builder<'a> {
    fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock {
            id,
            entries: Vec::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
        });
        id
    }

    fn push(&mut self, block: BlockId, entry: Entry<'a>) {
        self.blocks[block.0].entries.push(entry);
    }

    fn edge(&mut self, from: BlockId, to: BlockId) {
        if !self.blocks[from.0].successors.contains(&to) {
            self.blocks[from.0].successors.push(to);
            self.blocks[to.0].predecessors.push(from);
        }
    }

    /// Append a simple entry, opening a fresh (unreachable) block when the
    /// current path has been terminated.
    fn append(&mut self, current: Option<BlockId>, entry: Entry<'a>) -> BlockId {
        let block = current.unwrap_or_else(|| self.new_block());
        self.push(block, entry);
        block
    }

    /// Lower one statement. Returns the block holding the fall-through end
    /// of the statement, or `None` when the path terminates.
    fn stmt(&mut self, stmt: &'a Statement, current: Option<BlockId>) -> Option<BlockId> {
        match stmt {
            Statement::Compound(children) => {
                let mut cursor = current;
                for child in children {
                    cursor = self.stmt(child, cursor);
                }
                cursor
            }

            Statement::If {
                condition,
                then_branch,
            } => {
                let head = self.append(current, Entry::Cond(condition));
                let then_block = self.new_block();
                self.edge(head, then_block);
                let then_end = self.stmt(then_branch, Some(then_block));
                let merge = self.new_block();
                if let Some(end) = then_end {
                    self.edge(end, merge);
                }
                self.edge(head, merge);
                Some(merge)
            }

            Statement::Test {
                condition,
                then_branch,
                else_branch,
            } => {
                let head = self.append(current, Entry::Cond(condition));
                let merge = self.new_block();

                let then_block = self.new_block();
                self.edge(head, then_block);
                if let Some(end) = self.stmt(then_branch, Some(then_block)) {
                    self.edge(end, merge);
                }

                match else_branch {
                    Some(else_stmt) => {
                        let else_block = self.new_block();
                        self.edge(head, else_block);
                        if let Some(end) = self.stmt(else_stmt, Some(else_block)) {
                            self.edge(end, merge);
                        }
                    }
                    None => self.edge(head, merge),
                }
                Some(merge)
            }

            Statement::While { condition, body } => {
                let before = current.unwrap_or_else(|| self.new_block());
                let header = self.new_block();
                self.edge(before, header);
                self.push(header, Entry::Cond(condition));

                let body_block = self.new_block();
                self.edge(header, body_block);
                if let Some(end) = self.stmt(body, Some(body_block)) {
                    self.edge(end, header);
                }

                let exit = self.new_block();
                self.edge(header, exit);
                Some(exit)
            }

            Statement::For {
                var,
                from,
                to,
                by,
                body,
            } => {
                let before = current.unwrap_or_else(|| self.new_block());
                self.push(before, Entry::Eval(from));
                self.push(before, Entry::Def(var));
                self.push(before, Entry::Eval(to));
                if let Some(by_expr) = by {
                    self.push(before, Entry::Eval(by_expr));
                }

                let header = self.new_block();
                self.edge(before, header);
                self.push(header, Entry::UseVar(var));

                let body_block = self.new_block();
                self.edge(header, body_block);
                // The increment is folded into the body-end block.
                if let Some(end) = self.stmt(body, Some(body_block)) {
                    self.push(end, Entry::UseVar(var));
                    self.push(end, Entry::Def(var));
                    self.edge(end, header);
                }

                let exit = self.new_block();
                self.edge(header, exit);
                Some(exit)
            }

            Statement::Repeat {
                body, condition, ..
            } => {
                let before = current.unwrap_or_else(|| self.new_block());
                let body_block = self.new_block();
                self.edge(before, body_block);

                let body_end = self.stmt(body, Some(body_block));
                let exit = self.new_block();
                if let Some(end) = body_end {
                    // The re-entry condition lives in the body-end block.
                    if let Some(cond) = condition {
                        self.push(end, Entry::Cond(cond));
                    }
                    self.edge(end, body_block);
                    self.edge(end, exit);
                }
                Some(exit)
            }

            Statement::Switchon {
                discriminant,
                cases,
                default,
            } => {
                let head = self.append(current, Entry::Eval(discriminant));
                let merge = self.new_block();

                for case in cases {
                    let case_block = self.new_block();
                    self.edge(head, case_block);
                    if let Some(end) = self.stmt(&case.body, Some(case_block)) {
                        self.edge(end, merge);
                    }
                }
                match default {
                    Some(default_stmt) => {
                        let default_block = self.new_block();
                        self.edge(head, default_block);
                        if let Some(end) = self.stmt(default_stmt, Some(default_block)) {
                            self.edge(end, merge);
                        }
                    }
                    None => self.edge(head, merge),
                }
                Some(merge)
            }

            Statement::Labeled { name, body } => {
                let fresh = self.new_block();
                if let Some(block) = current {
                    self.edge(block, fresh);
                }
                self.labels.push((name.as_str(), fresh));
                self.stmt(body, Some(fresh))
            }

            Statement::Goto(target) => {
                let block = self.append(current, Entry::Stmt(stmt));
                if let Expression::VariableAccess(name) = target {
                    self.gotos.push((block, name.as_str()));
                }
                None
            }

            // These terminate the current path.
            Statement::Return | Statement::Finish | Statement::Resultis(_) => {
                self.append(current, Entry::Stmt(stmt));
                None
            }

            // Break/Loop/Endcase transfer control to an enclosing label; the
            // fall-through edge kept here over-approximates, which is safe
            // for a may-liveness analysis.
            Statement::Break | Statement::Loop | Statement::Endcase => {
                Some(self.append(current, Entry::Stmt(stmt)))
            }

            Statement::Assignment { .. }
            | Statement::RoutineCall(_)
            | Statement::Declaration(_) => Some(self.append(current, Entry::Stmt(stmt))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FunctionBody;
    use crate::parser::Parser;

    fn first_function(source: &str) -> crate::ast::FunctionDeclaration {
        let program = Parser::parse(source).unwrap();
        match program.declarations.into_iter().next().unwrap() {
            crate::ast::Declaration::Function(func) => func,
            _ => panic!("expected a function"),
        }
    }

    fn assert_body_is_statement(func: &crate::ast::FunctionDeclaration) {
        assert!(matches!(func.body, FunctionBody::Statement(_)));
    }

    #[test]
    fn test_straight_line_body_is_one_reachable_block() {
        let func = first_function("LET START() BE $( X := 1; Y := 2 $)");
        assert_body_is_statement(&func);
        let cfg = Cfg::build(&func);
        let entry = cfg.block(cfg.entry());
        assert_eq!(entry.entries.len(), 2);
        assert!(entry.successors.is_empty());
    }

    #[test]
    fn test_if_shape() {
        let func = first_function("LET START() BE $( IF X THEN Y := 1; Z := 2 $)");
        let cfg = Cfg::build(&func);
        let entry = cfg.block(cfg.entry());
        // Branch to then-block and to merge.
        assert_eq!(entry.successors.len(), 2);
        let merge = entry.successors[1];
        assert_eq!(cfg.block(merge).predecessors.len(), 2);
    }

    #[test]
    fn test_while_has_back_edge() {
        let func = first_function("LET START() BE WHILE X DO X := X - 1");
        let cfg = Cfg::build(&func);
        let header = cfg.block(cfg.entry()).successors[0];
        let header_block = cfg.block(header);
        // Header branches to body and exit.
        assert_eq!(header_block.successors.len(), 2);
        let body = header_block.successors[0];
        assert!(cfg.block(body).successors.contains(&header));
    }

    #[test]
    fn test_repeat_condition_lives_in_body_end() {
        let func = first_function("LET START() BE X := X + 1 REPEATUNTIL X = 10");
        let cfg = Cfg::build(&func);
        let body = cfg.block(cfg.entry()).successors[0];
        let body_block = cfg.block(body);
        assert!(matches!(body_block.entries.last(), Some(Entry::Cond(_))));
        // Back edge to itself plus the exit edge.
        assert!(body_block.successors.contains(&body));
        assert_eq!(body_block.successors.len(), 2);
    }

    #[test]
    fn test_return_terminates_path() {
        let func = first_function("LET START() BE $( RETURN; X := 1 $)");
        let cfg = Cfg::build(&func);
        let entry = cfg.block(cfg.entry());
        assert!(entry.successors.is_empty());
        // The trailing assignment landed in a fresh unreachable block.
        assert!(cfg.len() >= 2);
    }

    #[test]
    fn test_goto_resolves_to_labeled_block() {
        let func = first_function(
            "LET START() BE $( AGAIN: X := X + 1; GOTO AGAIN $)",
        );
        let cfg = Cfg::build(&func);
        let labeled = cfg.block(cfg.entry()).successors[0];
        // The goto block branches back to the labeled block.
        let goto_block = labeled; // label body continues in the same block
        assert!(cfg.block(goto_block).successors.contains(&labeled));
    }

    #[test]
    fn test_switchon_fans_out() {
        let func = first_function(
            "LET START() BE SWITCHON X INTO $( CASE 1: Y := 1; CASE 2: Y := 2; DEFAULT: Y := 0 $)",
        );
        let cfg = Cfg::build(&func);
        let head = cfg.block(cfg.entry());
        assert_eq!(head.successors.len(), 3);
    }
}
