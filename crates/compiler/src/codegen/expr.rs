//! Expression lowering. Every expression leaves its value in x0.
//!
//! Binary operators evaluate the left operand into x0, park it in a scratch
//! register, evaluate the right operand, and recombine. Word subscripts
//! scale by 8, character subscripts by 4. Float operators that survived
//! folding go through runtime thunks with f64 bit patterns in general
//! registers.

use super::CodeGen;
use super::insn::{Cond, Shift, SP, X0, X1, X16, X28, X29};
use crate::CompileError;
use crate::ast::{BinaryOperator, Expression, UnaryOperator};
use crate::codegen::labels::ScopeKind;

/// How a call site reaches its callee.
enum Callee {
    /// A generated function, reached by a relative BL to its label.
    User(String),
    /// A runtime built-in, reached by absolute address in x16.
    Runtime(&'static str),
    /// A computed address: the callee expression is evaluated and parked
    /// below the argument area.
    Indirect,
}

/// Built-in routines callable by their BCPL names.
fn builtin_symbol(name: &str) -> Option<&'static str> {
    Some(match name {
        "WRITES" => "writes",
        "WRITEN" => "writen",
        "WRITEF" => "writef",
        "NEWLINE" => "newline",
        "FINISH" => "finish",
        "STOP" => "stop",
        "RDCH" => "rdch",
        "WRCH" => "wrch",
        "READN" => "readn",
        "FINDINPUT" => "findinput",
        "FINDOUTPUT" => "findoutput",
        "SELECTINPUT" => "selectinput",
        "SELECTOUTPUT" => "selectoutput",
        "ENDREAD" => "endread",
        "ENDWRITE" => "endwrite",
        "GETVEC" => "bcpl_vec",
        "FREEVEC" => "bcpl_vec_free",
        "UNPACKSTRING" => "bcpl_unpack_string",
        "FLOAT" => "bcpl_float",
        "FIX" => "bcpl_trunc",
        _ => return None,
    })
}

fn float_thunk(op: BinaryOperator) -> &'static str {
    match op {
        BinaryOperator::FAdd => "bcpl_fadd",
        BinaryOperator::FSubtract => "bcpl_fsub",
        BinaryOperator::FMultiply => "bcpl_fmul",
        BinaryOperator::FDivide => "bcpl_fdiv",
        BinaryOperator::FEqual => "bcpl_feq",
        BinaryOperator::FNotEqual => "bcpl_fne",
        BinaryOperator::FLess => "bcpl_flt",
        BinaryOperator::FLessEqual => "bcpl_fle",
        BinaryOperator::FGreater => "bcpl_fgt",
        BinaryOperator::FGreaterEqual => "bcpl_fge",
        _ => unreachable!("integer operator lowered through the float path"),
    }
}

fn round16(bytes: usize) -> u32 {
    ((bytes + 15) & !15) as u32
}

impl CodeGen<'_> {
    pub(crate) fn emit_expr(&mut self, expr: &Expression) -> Result<(), CompileError> {
        match expr {
            Expression::NumberLiteral(value) => {
                self.insns.load_immediate(X0, *value, "number literal");
            }
            Expression::CharLiteral(value) => {
                self.insns.load_immediate(X0, *value, "character literal");
            }
            Expression::FloatLiteral(value) => {
                self.insns
                    .load_immediate(X0, value.to_bits() as i64, "float literal");
            }
            Expression::StringLiteral(text) => {
                let label = self.intern_string(text);
                self.note_branch(&label);
                self.insns.adr(X0, &label, "string literal address");
            }
            Expression::VariableAccess(name) => self.emit_variable_read(name)?,
            Expression::UnaryOp { op, operand } => {
                match op {
                    UnaryOperator::Negate => {
                        self.emit_expr(operand)?;
                        self.insns.neg(X0, X0, "");
                    }
                    UnaryOperator::Not => {
                        self.emit_expr(operand)?;
                        self.insns.mvn(X0, X0, "");
                    }
                    UnaryOperator::AddressOf => self.emit_address_of(operand)?,
                }
            }
            Expression::BinaryOp { op, left, right } => {
                if op.is_float() {
                    self.emit_float_binary(*op, left, right)?;
                } else {
                    self.emit_integer_binary(*op, left, right)?;
                }
            }
            Expression::FunctionCall {
                function,
                arguments,
            } => self.emit_call(function, arguments)?,
            Expression::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                let else_label = self.labels.generate_label("cond_else");
                let end_label = self.labels.generate_label("cond_end");
                self.emit_expr(condition)?;
                self.flush_variables();
                self.note_branch(&else_label);
                self.insns.cbz(X0, &else_label, "conditional selects else");
                self.emit_expr(then_expr)?;
                self.flush_variables();
                self.note_branch(&end_label);
                self.insns.b(&end_label, "");
                self.control_label_here(&else_label)?;
                self.emit_expr(else_expr)?;
                self.control_label_here(&end_label)?;
            }
            Expression::Valof(body) => {
                self.labels.push_scope(ScopeKind::Valof);
                let resultis_label = self.labels.current_resultis_label()?.to_string();
                self.emit_stmt(body)?;
                self.control_label_here(&resultis_label)?;
                self.labels.pop_scope()?;
            }
            Expression::Table(items) => {
                self.insns
                    .load_immediate(X0, items.len() as i64, "table size");
                self.call_runtime("bcpl_vec")?;
                let base = self.scratch.acquire()?;
                self.insns.mov(base, X0, "table base");
                for (index, item) in items.iter().enumerate() {
                    self.emit_expr(item)?;
                    self.insns
                        .str_imm(X0, base, 8 * index as i64, "table element");
                }
                self.insns.mov(X0, base, "");
                self.scratch.release(base);
            }
            Expression::VectorConstructor(size) => {
                self.emit_expr(size)?;
                // VEC n spans cells 0..n inclusive.
                self.insns.add_imm(X0, X0, 1, "vector word count");
                self.call_runtime("bcpl_vec")?;
            }
            Expression::Dereference(pointer) => {
                self.emit_expr(pointer)?;
                self.insns.ldr_imm(X0, X0, 0, "load through pointer");
            }
            Expression::VectorAccess { vector, index } => {
                self.emit_indexed_load(vector, index, 3)?;
            }
            Expression::FloatVectorAccess { vector, index } => {
                self.emit_indexed_load(vector, index, 3)?;
            }
            Expression::CharacterAccess { string, index } => {
                self.emit_expr(string)?;
                let base = self.scratch.acquire()?;
                self.insns.mov(base, X0, "string base");
                self.emit_expr(index)?;
                self.insns
                    .add_reg(X0, base, X0, Shift::Lsl, 2, "character address");
                self.insns.ldr_w(X0, X0, 0, "load character");
                self.scratch.release(base);
            }
        }
        Ok(())
    }

    fn emit_variable_read(&mut self, name: &str) -> Result<(), CompileError> {
        if let Some(value) = self.manifest_value(name) {
            self.insns
                .load_immediate(X0, value, &format!("manifest {}", name));
            return Ok(());
        }
        if let Some(slot) = self.global_slot(name) {
            self.insns
                .ldr_imm(X0, X28, slot * 8, &format!("load global {}", name));
            return Ok(());
        }
        if self.is_local(name) {
            let offset = self.local_offset(name)?;
            let reg = self.registers.acquire(name, offset, &mut self.insns)?;
            self.insns.mov(X0, reg, &format!("read {}", name));
            return Ok(());
        }
        if self.is_function(name) {
            // A function used as a value: its code address.
            self.note_branch(name);
            self.insns.adr(X0, name, "function address");
            return Ok(());
        }
        Err(CompileError::Semantic(format!(
            "undefined variable {} in {}",
            name,
            self.current_function()
        )))
    }

    fn emit_address_of(&mut self, operand: &Expression) -> Result<(), CompileError> {
        match operand {
            Expression::VariableAccess(name) => {
                if let Some(slot) = self.global_slot(name) {
                    self.insns
                        .add_imm(X0, X28, (slot * 8) as u32, &format!("address of global {}", name));
                    return Ok(());
                }
                if self.is_local(name) {
                    let offset = self.local_offset(name)?;
                    // The stack home is authoritative once its address
                    // escapes.
                    self.registers.spill_all_dirty(&mut self.insns);
                    self.registers.remove_variable(name);
                    self.insns
                        .add_imm(X0, X29, offset as u32, &format!("address of {}", name));
                    return Ok(());
                }
                Err(CompileError::Semantic(format!(
                    "cannot take the address of {}",
                    name
                )))
            }
            _ => Err(CompileError::Semantic(
                "@ requires a variable operand".to_string(),
            )),
        }
    }

    fn emit_indexed_load(
        &mut self,
        base_expr: &Expression,
        index_expr: &Expression,
        scale: u32,
    ) -> Result<(), CompileError> {
        self.emit_expr(base_expr)?;
        let base = self.scratch.acquire()?;
        self.insns.mov(base, X0, "subscript base");
        self.emit_expr(index_expr)?;
        self.insns
            .add_reg(X0, base, X0, Shift::Lsl, scale, "element address");
        self.insns.ldr_imm(X0, X0, 0, "load element");
        self.scratch.release(base);
        Ok(())
    }

    fn emit_integer_binary(
        &mut self,
        op: BinaryOperator,
        left: &Expression,
        right: &Expression,
    ) -> Result<(), CompileError> {
        self.emit_expr(left)?;
        let lhs = self.scratch.acquire()?;
        self.insns.mov(lhs, X0, "left operand");
        self.emit_expr(right)?;

        match op {
            BinaryOperator::Add => self.insns.add_reg(X0, lhs, X0, Shift::Lsl, 0, ""),
            BinaryOperator::Subtract => self.insns.sub_reg(X0, lhs, X0, ""),
            BinaryOperator::Multiply => self.insns.mul(X0, lhs, X0, ""),
            BinaryOperator::Divide => self.insns.sdiv(X0, lhs, X0, ""),
            BinaryOperator::Remainder => {
                let quotient = self.scratch.acquire()?;
                self.insns.sdiv(quotient, lhs, X0, "quotient");
                self.insns.msub(X0, quotient, X0, lhs, "remainder");
                self.scratch.release(quotient);
            }
            BinaryOperator::LogAnd => self.insns.and(X0, lhs, X0, ""),
            BinaryOperator::LogOr => self.insns.orr(X0, lhs, X0, ""),
            BinaryOperator::Neqv => self.insns.eor(X0, lhs, X0, ""),
            BinaryOperator::Eqv => {
                self.insns.eor(X0, lhs, X0, "");
                self.insns.mvn(X0, X0, "");
            }
            BinaryOperator::ShiftLeft => self.insns.lslv(X0, lhs, X0, ""),
            // Words are signed; right shift preserves the sign bit.
            BinaryOperator::ShiftRight => self.insns.asrv(X0, lhs, X0, ""),
            BinaryOperator::Equal
            | BinaryOperator::NotEqual
            | BinaryOperator::Less
            | BinaryOperator::LessEqual
            | BinaryOperator::Greater
            | BinaryOperator::GreaterEqual => {
                let cond = match op {
                    BinaryOperator::Equal => Cond::Eq,
                    BinaryOperator::NotEqual => Cond::Ne,
                    BinaryOperator::Less => Cond::Lt,
                    BinaryOperator::LessEqual => Cond::Le,
                    BinaryOperator::Greater => Cond::Gt,
                    _ => Cond::Ge,
                };
                self.insns.cmp_reg(lhs, X0, "");
                self.insns.cset(X0, cond, "");
                // BCPL truth is all ones.
                self.insns.neg(X0, X0, "");
            }
            _ => unreachable!("float operator reached the integer path"),
        }
        self.scratch.release(lhs);
        Ok(())
    }

    fn emit_float_binary(
        &mut self,
        op: BinaryOperator,
        left: &Expression,
        right: &Expression,
    ) -> Result<(), CompileError> {
        self.emit_expr(left)?;
        let lhs = self.scratch.acquire()?;
        self.insns.mov(lhs, X0, "left operand");
        self.emit_expr(right)?;
        self.insns.mov(X1, X0, "float right operand");
        self.insns.mov(X0, lhs, "float left operand");
        self.scratch.release(lhs);
        self.call_runtime(float_thunk(op))
    }

    /// Call a runtime built-in with its arguments already in place,
    /// preserving any live scratch registers.
    pub(crate) fn call_runtime(&mut self, symbol: &str) -> Result<(), CompileError> {
        let saved = self.save_live_scratches();
        let address = self.runtime_address(symbol)?;
        self.insns
            .load_immediate(X16, address, &format!("address of {}", symbol));
        self.insns.blr(X16, &format!("call {}", symbol));
        self.restore_scratches(&saved);
        Ok(())
    }

    fn save_live_scratches(&mut self) -> Vec<u32> {
        let used: Vec<u32> = self.scratch.used_registers().to_vec();
        if !used.is_empty() {
            let bytes = round16(used.len() * 8);
            self.insns.sub_imm(SP, SP, bytes, "save live scratch registers");
            for (index, reg) in used.iter().enumerate() {
                self.insns.str_imm(*reg, SP, 8 * index as i64, "");
            }
        }
        used
    }

    fn restore_scratches(&mut self, saved: &[u32]) {
        if saved.is_empty() {
            return;
        }
        for (index, reg) in saved.iter().enumerate() {
            self.insns.ldr_imm(*reg, SP, 8 * index as i64, "");
        }
        let bytes = round16(saved.len() * 8);
        self.insns
            .add_imm(SP, SP, bytes, "restore live scratch registers");
    }

    /// General call: classify the callee, stage arguments through the
    /// outgoing area, load the first eight into x0..x7, and transfer.
    pub(crate) fn emit_call(
        &mut self,
        function: &Expression,
        arguments: &[Expression],
    ) -> Result<(), CompileError> {
        let callee = match function {
            Expression::VariableAccess(name) => {
                if self.is_function(name) {
                    Callee::User(name.clone())
                } else if let Some(symbol) = builtin_symbol(name) {
                    Callee::Runtime(symbol)
                } else if self.is_local(name) || self.global_slot(name).is_some() {
                    Callee::Indirect
                } else {
                    return Err(CompileError::Semantic(format!(
                        "unknown routine {}",
                        name
                    )));
                }
            }
            _ => Callee::Indirect,
        };

        // Memory is the authority across the call.
        self.registers.spill_all_dirty(&mut self.insns);
        let saved = self.save_live_scratches();

        // A computed callee is evaluated first and parked below the saved
        // scratches, above the argument area.
        if matches!(callee, Callee::Indirect) {
            self.emit_expr(function)?;
            self.insns.sub_imm(SP, SP, 16, "park callee address");
            self.insns.str_imm(X0, SP, 0, "");
        }

        let arg_bytes = round16(arguments.len() * 8);
        if arg_bytes > 0 {
            self.insns.sub_imm(SP, SP, arg_bytes, "outgoing argument area");
        }
        for (index, arg) in arguments.iter().enumerate() {
            self.emit_expr(arg)?;
            self.insns
                .str_imm(X0, SP, 8 * index as i64, &format!("stage argument {}", index));
        }
        for index in 0..arguments.len().min(8) {
            self.insns.ldr_imm(
                X0 + index as u32,
                SP,
                8 * index as i64,
                "argument register",
            );
        }

        match &callee {
            Callee::User(name) => {
                self.note_branch(name);
                self.insns.bl(name, &format!("call {}", name));
            }
            Callee::Runtime(symbol) => {
                let address = self.runtime_address(symbol)?;
                self.insns
                    .load_immediate(X16, address, &format!("address of {}", symbol));
                self.insns.blr(X16, &format!("call {}", symbol));
            }
            Callee::Indirect => {
                self.insns
                    .ldr_imm(X16, SP, arg_bytes as i64, "parked callee address");
                self.insns.blr(X16, "indirect call");
            }
        }

        if arg_bytes > 0 {
            self.insns
                .add_imm(SP, SP, arg_bytes, "release argument area");
        }
        if matches!(callee, Callee::Indirect) {
            self.insns.add_imm(SP, SP, 16, "release parked callee");
        }
        self.restore_scratches(&saved);
        Ok(())
    }
}
