//! Statement lowering.
//!
//! Control flow follows the zero-false convention: IF tests with CBZ, TEST
//! and the loop forms compare against zero and branch on the condition
//! flags. SWITCHON dispatches through a jump table when the case values are
//! dense, and through a binary search over the sorted keys otherwise.

use super::CodeGen;
use super::insn::{Shift, X0, X28, X29};
use super::labels::ScopeKind;
use crate::CompileError;
use crate::ast::{Declaration, Expression, RepeatKind, Statement, SwitchCase};

impl CodeGen<'_> {
    pub(crate) fn emit_stmt(&mut self, stmt: &Statement) -> Result<(), CompileError> {
        match stmt {
            Statement::Compound(children) => {
                for child in children {
                    self.emit_stmt(child)?;
                }
                Ok(())
            }
            Statement::Assignment { targets, values } => {
                for (target, value) in targets.iter().zip(values) {
                    self.emit_expr(value)?;
                    self.emit_store(target)?;
                }
                Ok(())
            }
            Statement::RoutineCall(call) => self.emit_expr(call),
            Statement::If {
                condition,
                then_branch,
            } => {
                let end_label = self.labels.generate_label("if_end");
                self.emit_expr(condition)?;
                self.flush_variables();
                self.note_branch(&end_label);
                self.insns.cbz(X0, &end_label, "skip when false");
                self.emit_stmt(then_branch)?;
                self.control_label_here(&end_label)
            }
            Statement::Test {
                condition,
                then_branch,
                else_branch,
            } => {
                let else_label = self.labels.generate_label("test_else");
                let end_label = self.labels.generate_label("test_end");
                self.emit_expr(condition)?;
                self.flush_variables();
                self.insns.cmp_imm(X0, 0, "");
                self.note_branch(&else_label);
                self.insns.beq(&else_label, "take the else branch");
                self.emit_stmt(then_branch)?;
                self.flush_variables();
                self.note_branch(&end_label);
                self.insns.b(&end_label, "");
                self.control_label_here(&else_label)?;
                if let Some(else_stmt) = else_branch {
                    self.emit_stmt(else_stmt)?;
                }
                self.control_label_here(&end_label)
            }
            Statement::While { condition, body } => {
                self.labels.push_scope(ScopeKind::Loop);
                let header = self.labels.current_repeat_label()?.to_string();
                let end_label = self.labels.current_end_label()?.to_string();

                self.control_label_here(&header)?;
                self.emit_expr(condition)?;
                self.flush_variables();
                self.insns.cmp_imm(X0, 0, "");
                self.note_branch(&end_label);
                self.insns.beq(&end_label, "exit when false");
                self.emit_stmt(body)?;
                self.flush_variables();
                self.note_branch(&header);
                self.insns.b(&header, "loop back edge");
                self.control_label_here(&end_label)?;
                self.labels.pop_scope()
            }
            Statement::Repeat {
                body,
                condition,
                kind,
            } => {
                self.labels.push_scope(ScopeKind::Loop);
                let repeat_label = self.labels.current_repeat_label()?.to_string();
                let end_label = self.labels.current_end_label()?.to_string();

                self.control_label_here(&repeat_label)?;
                self.emit_stmt(body)?;
                match kind {
                    RepeatKind::Repeat => {
                        self.flush_variables();
                        self.note_branch(&repeat_label);
                        self.insns.b(&repeat_label, "repeat forever");
                    }
                    RepeatKind::RepeatWhile => {
                        let cond = condition
                            .as_ref()
                            .expect("REPEATWHILE carries a condition");
                        self.emit_expr(cond)?;
                        self.flush_variables();
                        self.insns.cmp_imm(X0, 0, "");
                        self.note_branch(&repeat_label);
                        self.insns.bne(&repeat_label, "re-enter while true");
                    }
                    RepeatKind::RepeatUntil => {
                        let cond = condition
                            .as_ref()
                            .expect("REPEATUNTIL carries a condition");
                        self.emit_expr(cond)?;
                        self.flush_variables();
                        self.insns.cmp_imm(X0, 0, "");
                        self.note_branch(&repeat_label);
                        self.insns.beq(&repeat_label, "re-enter while false");
                    }
                }
                self.control_label_here(&end_label)?;
                self.labels.pop_scope()
            }
            Statement::For {
                var,
                from,
                to,
                by,
                body,
            } => self.emit_for(var, from, to, by.as_ref(), body),
            Statement::Switchon {
                discriminant,
                cases,
                default,
            } => self.emit_switchon(discriminant, cases, default.as_deref()),
            Statement::Break => {
                let label = self.labels.current_break_label()?.to_string();
                self.flush_variables();
                self.note_branch(&label);
                self.insns.b(&label, "break");
                Ok(())
            }
            Statement::Loop => {
                let label = self.labels.current_repeat_label()?.to_string();
                self.flush_variables();
                self.note_branch(&label);
                self.insns.b(&label, "next iteration");
                Ok(())
            }
            Statement::Endcase => {
                let label = self.labels.current_endcase_label()?.to_string();
                self.flush_variables();
                self.note_branch(&label);
                self.insns.b(&label, "leave switch");
                Ok(())
            }
            Statement::Finish => {
                self.flush_variables();
                self.call_runtime("finish")
            }
            Statement::Return => {
                let label = self.labels.current_return_label()?.to_string();
                self.flush_variables();
                self.note_branch(&label);
                self.insns.b(&label, "return");
                Ok(())
            }
            Statement::Resultis(value) => self.emit_resultis(value),
            Statement::Goto(target) => match target {
                Expression::VariableAccess(name) => {
                    let label = self.user_label(name);
                    self.flush_variables();
                    self.note_branch(&label);
                    self.insns.b(&label, &format!("goto {}", name));
                    Ok(())
                }
                _ => Err(CompileError::Semantic(
                    "GOTO requires a label name".to_string(),
                )),
            },
            Statement::Labeled { name, body } => {
                let label = self.user_label(name);
                self.control_label_here(&label)?;
                self.emit_stmt(body)
            }
            Statement::Declaration(decl) => self.emit_declaration_stmt(decl),
        }
    }

    fn emit_declaration_stmt(&mut self, decl: &Declaration) -> Result<(), CompileError> {
        match decl {
            Declaration::Let(bindings) => {
                for binding in bindings {
                    if let Some(init) = &binding.init {
                        self.emit_expr(init)?;
                    } else {
                        self.insns.load_immediate(X0, 0, "default initializer");
                    }
                    let offset = self.allocate_local(&binding.name);
                    self.insns.str_imm(
                        X0,
                        X29,
                        offset,
                        &format!("initialize {}", binding.name),
                    );
                    self.registers.remove_variable(&binding.name);
                }
                Ok(())
            }
            Declaration::Function(func) => Err(CompileError::Semantic(format!(
                "nested function declaration {} is not supported",
                func.name
            ))),
            _ => Ok(()),
        }
    }

    /// Store x0 into an assignment target.
    fn emit_store(&mut self, target: &Expression) -> Result<(), CompileError> {
        match target {
            Expression::NumberLiteral(_)
            | Expression::FloatLiteral(_)
            | Expression::CharLiteral(_)
            | Expression::StringLiteral(_) => Err(CompileError::Semantic(
                "cannot assign to a literal".to_string(),
            )),
            Expression::VariableAccess(name) => {
                if self.manifest_value(name).is_some() {
                    return Err(CompileError::Semantic(format!(
                        "cannot assign to manifest constant {}",
                        name
                    )));
                }
                if let Some(slot) = self.global_slot(name) {
                    self.insns
                        .str_imm(X0, X28, slot * 8, &format!("store global {}", name));
                    return Ok(());
                }
                let offset = self.local_offset(name)?;
                self.insns
                    .str_imm(X0, X29, offset, &format!("store {}", name));
                // The stack home is now authoritative.
                self.registers.remove_variable(name);
                Ok(())
            }
            Expression::Dereference(pointer) => {
                let value = self.scratch.acquire()?;
                self.insns.mov(value, X0, "store value");
                self.emit_expr(pointer)?;
                self.insns.str_imm(value, X0, 0, "store through pointer");
                self.scratch.release(value);
                Ok(())
            }
            Expression::VectorAccess { vector, index } => {
                self.emit_indexed_store(vector, index, 3, false)
            }
            Expression::FloatVectorAccess { vector, index } => {
                self.emit_indexed_store(vector, index, 3, false)
            }
            Expression::CharacterAccess { string, index } => {
                self.emit_indexed_store(string, index, 2, true)
            }
            _ => Err(CompileError::Semantic(
                "unsupported assignment target".to_string(),
            )),
        }
    }

    fn emit_indexed_store(
        &mut self,
        base_expr: &Expression,
        index_expr: &Expression,
        scale: u32,
        narrow: bool,
    ) -> Result<(), CompileError> {
        let value = self.scratch.acquire()?;
        self.insns.mov(value, X0, "store value");
        self.emit_expr(index_expr)?;
        let index = self.scratch.acquire()?;
        self.insns.mov(index, X0, "element index");
        self.emit_expr(base_expr)?;
        self.insns
            .add_reg(X0, X0, index, Shift::Lsl, scale, "element address");
        if narrow {
            self.insns.str_w(value, X0, 0, "store character");
        } else {
            self.insns.str_imm(value, X0, 0, "store element");
        }
        self.scratch.release(index);
        self.scratch.release(value);
        Ok(())
    }

    fn emit_resultis(&mut self, value: &Expression) -> Result<(), CompileError> {
        // A direct self-call in RESULTIS position becomes a back-edge onto
        // the post-prologue entry: fresh arguments in x0..xn, same frame.
        if let Expression::FunctionCall {
            function,
            arguments,
        } = value
            && let Expression::VariableAccess(name) = &**function
            && name == self.current_function()
            && arguments.len() == self.current_param_count()
            && arguments.len() <= 7
        {
            let mut staged = Vec::with_capacity(arguments.len());
            for arg in arguments {
                self.emit_expr(arg)?;
                let temp = self.scratch.acquire()?;
                self.insns.mov(temp, X0, "staged tail argument");
                staged.push(temp);
            }
            for (index, temp) in staged.iter().enumerate() {
                self.insns
                    .mov(X0 + index as u32, *temp, "tail argument register");
            }
            for temp in staged.into_iter().rev() {
                self.scratch.release(temp);
            }
            self.flush_variables();
            let tail = self.current_tail_label().to_string();
            self.note_branch(&tail);
            self.insns.b(&tail, "self tail call");
            return Ok(());
        }

        self.emit_expr(value)?;
        self.flush_variables();
        // Inside a VALOF the value exits to the RESULTIS target; a bare
        // function body exits straight to the return path.
        let label = match self.labels.current_resultis_label() {
            Ok(label) => label.to_string(),
            Err(_) => self.labels.current_return_label()?.to_string(),
        };
        self.note_branch(&label);
        self.insns.b(&label, "yield value");
        Ok(())
    }

    fn emit_for(
        &mut self,
        var: &str,
        from: &Expression,
        to: &Expression,
        by: Option<&Expression>,
        body: &Statement,
    ) -> Result<(), CompileError> {
        self.labels.push_scope(ScopeKind::Loop);
        // The repeat label sits at the increment so LOOP advances the
        // induction variable before re-testing.
        let increment_label = self.labels.current_repeat_label()?.to_string();
        let end_label = self.labels.current_end_label()?.to_string();
        let head_label = self.labels.generate_label("for_head");

        // Induction variable, bound register-first.
        self.emit_expr(from)?;
        let offset = self.allocate_local(var);
        let induction = self
            .registers
            .acquire_for_init(var, offset, &mut self.insns)?;
        self.insns
            .mov(induction, X0, &format!("initialize loop variable {}", var));
        self.registers.mark_dirty(var);

        // Bound and step live in scratch registers for the loop's lifetime.
        self.emit_expr(to)?;
        let limit = self.scratch.acquire()?;
        self.insns.mov(limit, X0, "loop bound");
        let step = self.scratch.acquire()?;
        match by {
            Some(step_expr) => self.emit_expr(step_expr)?,
            None => self.insns.load_immediate(X0, 1, "default step"),
        }
        self.insns.mov(step, X0, "loop step");

        self.control_label_here(&head_label)?;
        let induction = self.registers.acquire(var, offset, &mut self.insns)?;
        self.insns.cmp_reg(induction, limit, "test loop bound");
        self.flush_variables();
        self.note_branch(&end_label);
        self.insns.bgt(&end_label, "loop exhausted");

        self.emit_stmt(body)?;

        self.control_label_here(&increment_label)?;
        let induction = self.registers.acquire(var, offset, &mut self.insns)?;
        self.insns.add_reg(
            induction,
            induction,
            step,
            Shift::Lsl,
            0,
            &format!("advance {}", var),
        );
        self.registers.mark_dirty(var);
        self.flush_variables();
        self.note_branch(&head_label);
        self.insns.b(&head_label, "loop back edge");

        self.control_label_here(&end_label)?;
        self.scratch.release(step);
        self.scratch.release(limit);
        self.labels.pop_scope()
    }

    fn emit_switchon(
        &mut self,
        discriminant: &Expression,
        cases: &[SwitchCase],
        default: Option<&Statement>,
    ) -> Result<(), CompileError> {
        self.labels.push_scope(ScopeKind::Switchon);
        let end_label = self.labels.current_end_label()?.to_string();
        let endcase_label = self.labels.current_endcase_label()?.to_string();
        let default_label = self.labels.generate_label("switch_default");

        self.emit_expr(discriminant)?;
        self.flush_variables();

        let mut table: Vec<(i64, String)> = cases
            .iter()
            .map(|case| (case.value, self.labels.generate_label("case")))
            .collect();

        if table.is_empty() {
            self.note_branch(&default_label);
            self.insns.b(&default_label, "no cases");
        } else if self.is_dense(&table) {
            self.emit_jump_table(&table, &default_label)?;
        } else {
            table.sort_by_key(|(value, _)| *value);
            self.emit_binary_search(&table, &default_label)?;
            // Restore source order for body emission.
            let order: std::collections::HashMap<i64, usize> = cases
                .iter()
                .enumerate()
                .map(|(i, c)| (c.value, i))
                .collect();
            table.sort_by_key(|(value, _)| order[value]);
        }

        for (case, (_, label)) in cases.iter().zip(&table) {
            self.control_label_here(label)?;
            self.emit_stmt(&case.body)?;
            if !ends_with_endcase(&case.body) {
                self.flush_variables();
                self.note_branch(&end_label);
                self.insns.b(&end_label, "leave switch");
            }
        }

        self.control_label_here(&default_label)?;
        if let Some(default_body) = default {
            self.emit_stmt(default_body)?;
        }
        self.flush_variables();
        self.insns.set_pending_label(&endcase_label);
        self.labels
            .define_label(&endcase_label, self.insns.current_offset())?;
        self.control_label_here(&end_label)?;
        self.labels.pop_scope()
    }

    /// Dense when the value span fits `4 * cases + slack`.
    fn is_dense(&self, table: &[(i64, String)]) -> bool {
        let min = table.iter().map(|(v, _)| *v).min().unwrap_or(0);
        let max = table.iter().map(|(v, _)| *v).max().unwrap_or(0);
        max - min <= 4 * table.len() as i64 + self.config().jump_table_slack
    }

    /// Bounds-check, index into a table of B instructions, and jump.
    fn emit_jump_table(
        &mut self,
        table: &[(i64, String)],
        default_label: &str,
    ) -> Result<(), CompileError> {
        let min = table.iter().map(|(v, _)| *v).min().unwrap();
        let max = table.iter().map(|(v, _)| *v).max().unwrap();

        let bound = self.scratch.acquire()?;
        self.insns.load_immediate(bound, min, "lowest case");
        self.insns.cmp_reg(X0, bound, "");
        self.note_branch(default_label);
        self.insns.blt(default_label, "below the table");
        self.insns.load_immediate(bound, max, "highest case");
        self.insns.cmp_reg(X0, bound, "");
        self.note_branch(default_label);
        self.insns.bgt(default_label, "above the table");

        self.insns.load_immediate(bound, min, "");
        let index = self.scratch.acquire()?;
        self.insns.sub_reg(index, X0, bound, "table index");
        let table_label = self.labels.generate_label("jump_table");
        self.note_branch(&table_label);
        self.insns.adr(bound, &table_label, "table base");
        self.insns
            .add_reg(bound, bound, index, Shift::Lsl, 2, "entry address");
        self.insns.br(bound, "dispatch");
        self.scratch.release(index);
        self.scratch.release(bound);

        self.define_here(&table_label)?;
        for value in min..=max {
            let target = table
                .iter()
                .find(|(v, _)| *v == value)
                .map(|(_, label)| label.as_str())
                .unwrap_or(default_label);
            self.note_branch(target);
            self.insns.b(target, "");
        }
        Ok(())
    }

    /// Binary search over sorted case values: test the midpoint, branch
    /// equal to its case, then split.
    fn emit_binary_search(
        &mut self,
        sorted: &[(i64, String)],
        default_label: &str,
    ) -> Result<(), CompileError> {
        if sorted.is_empty() {
            self.note_branch(default_label);
            self.insns.b(default_label, "no match");
            return Ok(());
        }
        let mid = sorted.len() / 2;
        let (value, label) = &sorted[mid];

        let probe = self.scratch.acquire()?;
        self.insns.load_immediate(probe, *value, "case value");
        self.insns.cmp_reg(X0, probe, "");
        self.scratch.release(probe);
        self.note_branch(label);
        self.insns.beq(label, "case match");

        if sorted.len() == 1 {
            self.note_branch(default_label);
            self.insns.b(default_label, "no match");
            return Ok(());
        }

        let lower_label = self.labels.generate_label("switch_lt");
        self.note_branch(&lower_label);
        self.insns.blt(&lower_label, "search lower half");
        self.emit_binary_search(&sorted[mid + 1..], default_label)?;
        self.define_here(&lower_label)?;
        self.emit_binary_search(&sorted[..mid], default_label)
    }
}

fn ends_with_endcase(stmt: &Statement) -> bool {
    match stmt {
        Statement::Endcase => true,
        Statement::Compound(children) => {
            children.last().is_some_and(ends_with_endcase)
        }
        _ => false,
    }
}
