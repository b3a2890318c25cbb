//! Recursive-descent parser with precedence-climbing expressions.
//!
//! Statements come in two layers: `parse_statement` first parses a *simple*
//! statement and then checks for a trailing REPEAT / REPEATWHILE /
//! REPEATUNTIL modifier. The ordering matters: a compound statement must not
//! swallow its own postfix modifier.

use crate::CompileError;
use crate::ast::{
    BinaryOperator, Declaration, Expression, FunctionBody, FunctionDeclaration, GlobalBinding,
    ManifestBinding, Program, RepeatKind, Statement, SwitchCase, UnaryOperator, ValueBinding,
};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

/// Binary operator precedence, low to high. Subscripts sit at the top with
/// calls; the conditional arrow is handled separately (right-associative,
/// special syntax).
fn precedence(kind: TokenKind) -> Option<u8> {
    Some(match kind {
        TokenKind::Pipe | TokenKind::Eqv | TokenKind::Neqv => 1,
        TokenKind::Amp => 2,
        TokenKind::Eq
        | TokenKind::Ne
        | TokenKind::Lt
        | TokenKind::Gt
        | TokenKind::Le
        | TokenKind::Ge
        | TokenKind::FloatEq
        | TokenKind::FloatNe
        | TokenKind::FloatLt
        | TokenKind::FloatGt
        | TokenKind::FloatLe
        | TokenKind::FloatGe => 3,
        TokenKind::Lshift | TokenKind::Rshift => 4,
        TokenKind::Plus | TokenKind::Minus | TokenKind::FloatPlus | TokenKind::FloatMinus => 5,
        TokenKind::Star
        | TokenKind::Slash
        | TokenKind::Rem
        | TokenKind::FloatStar
        | TokenKind::FloatSlash => 6,
        TokenKind::Bang | TokenKind::PercentSub | TokenKind::FloatVecSub => 7,
        _ => return None,
    })
}

const UNARY_PRECEDENCE: u8 = 7;

pub struct Parser {
    lexer: Lexer,
    current: Token,
    peek: Token,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self, CompileError> {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token()?;
        let peek = lexer.next_token()?;
        Ok(Parser {
            lexer,
            current,
            peek,
        })
    }

    /// Parse a complete program: a sequence of top-level declarations.
    pub fn parse(source: &str) -> Result<Program, CompileError> {
        let mut parser = Parser::new(source)?;
        let mut program = Program::new();
        while parser.current.kind != TokenKind::Eof {
            program.declarations.push(parser.parse_declaration()?);
        }
        Ok(program)
    }

    fn advance(&mut self) -> Result<(), CompileError> {
        self.current = std::mem::replace(&mut self.peek, self.lexer.next_token()?);
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::Syntax {
            line: self.current.line,
            message: message.into(),
        }
    }

    fn expect(&mut self, kind: TokenKind, context: &str) -> Result<Token, CompileError> {
        if self.current.kind != kind {
            return Err(self.error(format!(
                "expected {} {}, found {}",
                kind, context, self.current.kind
            )));
        }
        let token = self.current.clone();
        self.advance()?;
        Ok(token)
    }

    fn eat(&mut self, kind: TokenKind) -> Result<bool, CompileError> {
        if self.current.kind == kind {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // --- Declarations ---

    fn parse_declaration(&mut self) -> Result<Declaration, CompileError> {
        match self.current.kind {
            TokenKind::KwLet => self.parse_let_declaration(),
            TokenKind::KwGlobal => self.parse_global_declaration(),
            TokenKind::KwManifest => self.parse_manifest_declaration(),
            TokenKind::Identifier if self.current.text == "GET" => self.parse_get_directive(),
            _ => Err(self.error(format!(
                "expected a top-level declaration (LET, GLOBAL, MANIFEST), found {}",
                self.current.kind
            ))),
        }
    }

    fn parse_get_directive(&mut self) -> Result<Declaration, CompileError> {
        self.advance()?; // GET
        let path = self.expect(TokenKind::StringLiteral, "after GET")?;
        Ok(Declaration::Get(path.text))
    }

    fn parse_let_declaration(&mut self) -> Result<Declaration, CompileError> {
        self.expect(TokenKind::KwLet, "to open a declaration")?;
        let name = self.expect(TokenKind::Identifier, "after LET")?.text;

        if self.current.kind == TokenKind::LParen {
            return self.parse_function_declaration(name);
        }

        let mut names = vec![name];
        while self.eat(TokenKind::Comma)? {
            names.push(self.expect(TokenKind::Identifier, "in declaration list")?.text);
        }

        self.expect(TokenKind::Eq, "in LET declaration")?;

        let mut bindings = Vec::with_capacity(names.len());
        for (i, name) in names.into_iter().enumerate() {
            if i > 0 {
                self.expect(TokenKind::Comma, "between LET initializers")?;
            }
            let init = self.parse_expression(0)?;
            bindings.push(ValueBinding {
                name,
                init: Some(init),
            });
        }
        Ok(Declaration::Let(bindings))
    }

    fn parse_function_declaration(&mut self, name: String) -> Result<Declaration, CompileError> {
        self.expect(TokenKind::LParen, "to open the parameter list")?;
        let mut params = Vec::new();
        if self.current.kind != TokenKind::RParen {
            params.push(self.expect(TokenKind::Identifier, "as a parameter name")?.text);
            while self.eat(TokenKind::Comma)? {
                params.push(self.expect(TokenKind::Identifier, "as a parameter name")?.text);
            }
        }
        self.expect(TokenKind::RParen, "after parameters")?;

        let body = match self.current.kind {
            TokenKind::Eq => {
                self.advance()?;
                FunctionBody::Expression(self.parse_expression(0)?)
            }
            TokenKind::KwBe => {
                self.advance()?;
                FunctionBody::Statement(self.parse_statement()?)
            }
            TokenKind::KwValof => FunctionBody::Expression(self.parse_valof()?),
            _ => {
                return Err(self.error(
                    "expected '=', 'BE', or 'VALOF' in function or routine declaration",
                ));
            }
        };

        Ok(Declaration::Function(FunctionDeclaration {
            name,
            params,
            body,
        }))
    }

    fn parse_global_declaration(&mut self) -> Result<Declaration, CompileError> {
        self.expect(TokenKind::KwGlobal, "to open a GLOBAL block")?;
        self.expect(TokenKind::LSection, "after GLOBAL")?;
        let mut globals = Vec::new();
        while self.current.kind != TokenKind::RSection {
            let name = self.expect(TokenKind::Identifier, "in GLOBAL block")?.text;
            self.expect(TokenKind::Colon, "after global name")?;
            let slot = self.expect(TokenKind::IntegerLiteral, "as global slot")?.int_value;
            globals.push(GlobalBinding { name, slot });
            if !self.eat(TokenKind::Semicolon)? {
                self.eat(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::RSection, "to close the GLOBAL block")?;
        Ok(Declaration::Global(globals))
    }

    fn parse_manifest_declaration(&mut self) -> Result<Declaration, CompileError> {
        self.expect(TokenKind::KwManifest, "to open a MANIFEST block")?;
        self.expect(TokenKind::LSection, "after MANIFEST")?;
        let mut manifests = Vec::new();
        while self.current.kind != TokenKind::RSection {
            let name = self.expect(TokenKind::Identifier, "in MANIFEST block")?.text;
            self.expect(TokenKind::Eq, "after manifest name")?;
            let negative = self.eat(TokenKind::Minus)?;
            let value = self
                .expect(TokenKind::IntegerLiteral, "as manifest value")?
                .int_value;
            manifests.push(ManifestBinding {
                name,
                value: if negative { -value } else { value },
            });
            if !self.eat(TokenKind::Semicolon)? {
                self.eat(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::RSection, "to close the MANIFEST block")?;
        Ok(Declaration::Manifest(manifests))
    }

    // --- Statements ---

    /// Parse a simple statement, then fold any postfix repeat modifier
    /// around it.
    pub fn parse_statement(&mut self) -> Result<Statement, CompileError> {
        let body = self.parse_simple_statement()?;

        match self.current.kind {
            TokenKind::KwRepeat => {
                self.advance()?;
                Ok(Statement::Repeat {
                    body: Box::new(body),
                    condition: None,
                    kind: RepeatKind::Repeat,
                })
            }
            TokenKind::KwRepeatWhile => {
                self.advance()?;
                let condition = self.parse_expression(0)?;
                Ok(Statement::Repeat {
                    body: Box::new(body),
                    condition: Some(condition),
                    kind: RepeatKind::RepeatWhile,
                })
            }
            TokenKind::KwRepeatUntil => {
                self.advance()?;
                let condition = self.parse_expression(0)?;
                Ok(Statement::Repeat {
                    body: Box::new(body),
                    condition: Some(condition),
                    kind: RepeatKind::RepeatUntil,
                })
            }
            _ => Ok(body),
        }
    }

    fn parse_simple_statement(&mut self) -> Result<Statement, CompileError> {
        match self.current.kind {
            TokenKind::KwLet => Ok(Statement::Declaration(self.parse_let_declaration()?)),
            TokenKind::KwIf | TokenKind::KwUnless => self.parse_if_statement(),
            TokenKind::KwTest => self.parse_test_statement(),
            TokenKind::KwWhile | TokenKind::KwUntil => self.parse_while_statement(),
            TokenKind::KwFor => self.parse_for_statement(),
            TokenKind::KwSwitchon => self.parse_switchon_statement(),
            TokenKind::KwGoto => {
                self.advance()?;
                Ok(Statement::Goto(self.parse_expression(0)?))
            }
            TokenKind::KwReturn => {
                self.advance()?;
                Ok(Statement::Return)
            }
            TokenKind::KwLoop => {
                self.advance()?;
                Ok(Statement::Loop)
            }
            TokenKind::KwBreak => {
                self.advance()?;
                Ok(Statement::Break)
            }
            TokenKind::KwFinish => {
                self.advance()?;
                Ok(Statement::Finish)
            }
            TokenKind::KwEndcase => {
                self.advance()?;
                Ok(Statement::Endcase)
            }
            TokenKind::KwResultis => {
                self.advance()?;
                Ok(Statement::Resultis(self.parse_expression(0)?))
            }
            TokenKind::LSection | TokenKind::LBrace => self.parse_compound_statement(),
            TokenKind::Identifier if self.peek.kind == TokenKind::Colon => {
                let name = self.current.text.clone();
                self.advance()?; // identifier
                self.advance()?; // colon
                // The body goes through parse_statement so labels stack on
                // postfix repeat loops.
                Ok(Statement::Labeled {
                    name,
                    body: Box::new(self.parse_statement()?),
                })
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_compound_statement(&mut self) -> Result<Statement, CompileError> {
        let closer = match self.current.kind {
            TokenKind::LSection => TokenKind::RSection,
            TokenKind::LBrace => TokenKind::RBrace,
            _ => return Err(self.error("expected '$(' or '{' to open a block")),
        };
        self.advance()?;

        let mut statements = Vec::new();
        while self.current.kind != closer && self.current.kind != TokenKind::Eof {
            statements.push(self.parse_statement()?);
            self.eat(TokenKind::Semicolon)?;
        }
        if self.current.kind != closer {
            return Err(self.error(format!("expected {} to close the block", closer)));
        }
        self.advance()?;
        Ok(Statement::Compound(statements))
    }

    fn parse_if_statement(&mut self) -> Result<Statement, CompileError> {
        let negated = self.current.kind == TokenKind::KwUnless;
        self.advance()?;
        let mut condition = self.parse_expression(0)?;
        self.expect(TokenKind::KwThen, "after the condition")?;
        let then_branch = self.parse_statement()?;

        if negated {
            condition = Expression::UnaryOp {
                op: UnaryOperator::Not,
                operand: Box::new(condition),
            };
        }
        Ok(Statement::If {
            condition,
            then_branch: Box::new(then_branch),
        })
    }

    fn parse_test_statement(&mut self) -> Result<Statement, CompileError> {
        self.expect(TokenKind::KwTest, "to open a TEST statement")?;
        let condition = self.parse_expression(0)?;
        self.expect(TokenKind::KwThen, "after the condition")?;
        let then_branch = self.parse_statement()?;
        let else_branch = if self.eat(TokenKind::KwOr)? {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Statement::Test {
            condition,
            then_branch: Box::new(then_branch),
            else_branch,
        })
    }

    fn parse_while_statement(&mut self) -> Result<Statement, CompileError> {
        let negated = self.current.kind == TokenKind::KwUntil;
        self.advance()?;
        let mut condition = self.parse_expression(0)?;
        self.expect(TokenKind::KwDo, "in the loop header")?;
        let body = self.parse_statement()?;

        if negated {
            condition = Expression::UnaryOp {
                op: UnaryOperator::Not,
                operand: Box::new(condition),
            };
        }
        Ok(Statement::While {
            condition,
            body: Box::new(body),
        })
    }

    fn parse_for_statement(&mut self) -> Result<Statement, CompileError> {
        self.expect(TokenKind::KwFor, "to open a FOR loop")?;
        let var = self.expect(TokenKind::Identifier, "as the loop variable")?.text;
        self.expect(TokenKind::Eq, "after the loop variable")?;
        let from = self.parse_expression(0)?;
        self.expect(TokenKind::KwTo, "in the FOR header")?;
        let to = self.parse_expression(0)?;
        let by = if self.eat(TokenKind::KwBy)? {
            Some(self.parse_expression(0)?)
        } else {
            None
        };
        self.expect(TokenKind::KwDo, "in the FOR header")?;
        let body = self.parse_statement()?;
        Ok(Statement::For {
            var,
            from,
            to,
            by,
            body: Box::new(body),
        })
    }

    fn parse_switchon_statement(&mut self) -> Result<Statement, CompileError> {
        self.expect(TokenKind::KwSwitchon, "to open a SWITCHON statement")?;
        let discriminant = self.parse_expression(0)?;
        self.expect(TokenKind::KwInto, "after the switch value")?;
        self.expect(TokenKind::LSection, "after INTO")?;

        let mut cases = Vec::new();
        let mut default = None;
        while self.current.kind != TokenKind::RSection && self.current.kind != TokenKind::Eof {
            match self.current.kind {
                TokenKind::KwCase => {
                    self.advance()?;
                    let negative = self.eat(TokenKind::Minus)?;
                    let value = self
                        .expect(TokenKind::IntegerLiteral, "as the case value")?
                        .int_value;
                    self.expect(TokenKind::Colon, "after the case value")?;
                    let body = self.parse_statement()?;
                    self.eat(TokenKind::Semicolon)?;
                    cases.push(SwitchCase {
                        value: if negative { -value } else { value },
                        body,
                    });
                }
                TokenKind::KwDefault => {
                    if default.is_some() {
                        return Err(self.error("duplicate DEFAULT in SWITCHON"));
                    }
                    self.advance()?;
                    self.expect(TokenKind::Colon, "after DEFAULT")?;
                    default = Some(Box::new(self.parse_statement()?));
                    self.eat(TokenKind::Semicolon)?;
                }
                _ => {
                    return Err(self.error(format!(
                        "expected CASE or DEFAULT in SWITCHON body, found {}",
                        self.current.kind
                    )));
                }
            }
        }
        self.expect(TokenKind::RSection, "to close the SWITCHON body")?;

        Ok(Statement::Switchon {
            discriminant,
            cases,
            default,
        })
    }

    fn parse_expression_statement(&mut self) -> Result<Statement, CompileError> {
        let expr = self.parse_expression(0)?;

        if matches!(expr, Expression::FunctionCall { .. })
            && self.current.kind != TokenKind::Assign
            && self.current.kind != TokenKind::Comma
        {
            return Ok(Statement::RoutineCall(expr));
        }

        if self.current.kind == TokenKind::Assign || self.current.kind == TokenKind::Comma {
            let mut targets = vec![expr];
            while self.eat(TokenKind::Comma)? {
                targets.push(self.parse_expression(0)?);
            }
            self.expect(TokenKind::Assign, "in assignment")?;
            let mut values = vec![self.parse_expression(0)?];
            while self.eat(TokenKind::Comma)? {
                values.push(self.parse_expression(0)?);
            }
            if targets.len() != values.len() {
                return Err(self.error(format!(
                    "assignment has {} targets but {} values",
                    targets.len(),
                    values.len()
                )));
            }
            return Ok(Statement::Assignment { targets, values });
        }

        Err(self.error("this expression does not form a valid statement"))
    }

    // --- Expressions (precedence climbing) ---

    pub fn parse_expression(&mut self, min_precedence: u8) -> Result<Expression, CompileError> {
        let mut lhs = self.parse_primary()?;

        loop {
            // Right-associative conditional with its own `cond -> a, b`
            // syntax.
            if self.current.kind == TokenKind::CondArrow {
                self.advance()?;
                let then_expr = self.parse_expression(0)?;
                self.expect(TokenKind::Comma, "in conditional expression")?;
                let else_expr = self.parse_expression(0)?;
                lhs = Expression::Conditional {
                    condition: Box::new(lhs),
                    then_expr: Box::new(then_expr),
                    else_expr: Box::new(else_expr),
                };
                continue;
            }

            let Some(prec) = precedence(self.current.kind) else {
                break;
            };
            if prec < min_precedence {
                break;
            }

            let op_kind = self.current.kind;
            self.advance()?;
            let rhs = self.parse_expression(prec + 1)?;

            lhs = match op_kind {
                TokenKind::Bang => Expression::VectorAccess {
                    vector: Box::new(lhs),
                    index: Box::new(rhs),
                },
                TokenKind::PercentSub => Expression::CharacterAccess {
                    string: Box::new(lhs),
                    index: Box::new(rhs),
                },
                TokenKind::FloatVecSub => Expression::FloatVectorAccess {
                    vector: Box::new(lhs),
                    index: Box::new(rhs),
                },
                _ => {
                    let op = BinaryOperator::from_token(op_kind)
                        .expect("precedence table and operator table agree");
                    Expression::binary(op, lhs, rhs)
                }
            };
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expression, CompileError> {
        let mut expr = match self.current.kind {
            TokenKind::At => {
                self.advance()?;
                Expression::UnaryOp {
                    op: UnaryOperator::AddressOf,
                    operand: Box::new(self.parse_expression(UNARY_PRECEDENCE)?),
                }
            }
            TokenKind::Tilde => {
                self.advance()?;
                Expression::UnaryOp {
                    op: UnaryOperator::Not,
                    operand: Box::new(self.parse_expression(UNARY_PRECEDENCE)?),
                }
            }
            TokenKind::Minus => {
                self.advance()?;
                Expression::UnaryOp {
                    op: UnaryOperator::Negate,
                    operand: Box::new(self.parse_expression(UNARY_PRECEDENCE)?),
                }
            }
            TokenKind::Bang => {
                self.advance()?;
                Expression::Dereference(Box::new(self.parse_expression(UNARY_PRECEDENCE)?))
            }
            TokenKind::Identifier => {
                let name = self.current.text.clone();
                self.advance()?;
                Expression::VariableAccess(name)
            }
            TokenKind::IntegerLiteral => {
                let value = self.current.int_value;
                self.advance()?;
                Expression::NumberLiteral(value)
            }
            TokenKind::FloatLiteral => {
                let value = self.current.float_value;
                self.advance()?;
                Expression::FloatLiteral(value)
            }
            TokenKind::StringLiteral => {
                let text = self.current.text.clone();
                self.advance()?;
                Expression::StringLiteral(text)
            }
            TokenKind::CharLiteral => {
                let value = self.current.int_value;
                self.advance()?;
                Expression::CharLiteral(value)
            }
            TokenKind::LParen => {
                self.advance()?;
                let inner = self.parse_expression(0)?;
                self.expect(TokenKind::RParen, "to close the parenthesized expression")?;
                inner
            }
            TokenKind::KwValof => self.parse_valof()?,
            TokenKind::KwVec => {
                self.advance()?;
                Expression::VectorConstructor(Box::new(self.parse_expression(0)?))
            }
            TokenKind::KwTable => {
                self.advance()?;
                let mut items = vec![self.parse_expression(0)?];
                while self.eat(TokenKind::Comma)? {
                    items.push(self.parse_expression(0)?);
                }
                Expression::Table(items)
            }
            TokenKind::KwTrue => {
                self.advance()?;
                Expression::NumberLiteral(-1)
            }
            TokenKind::KwFalse => {
                self.advance()?;
                Expression::NumberLiteral(0)
            }
            _ => {
                return Err(self.error(format!(
                    "unexpected {} in expression",
                    self.current.kind
                )));
            }
        };

        // Postfix call binds tighter than any binary operator; chains like
        // (f(x))(y) keep applying.
        while self.current.kind == TokenKind::LParen {
            expr = self.parse_call(expr)?;
        }
        Ok(expr)
    }

    fn parse_call(&mut self, function: Expression) -> Result<Expression, CompileError> {
        self.expect(TokenKind::LParen, "to open the argument list")?;
        let mut arguments = Vec::new();
        if self.current.kind != TokenKind::RParen {
            loop {
                arguments.push(self.parse_expression(0)?);
                if self.current.kind == TokenKind::RParen {
                    break;
                }
                self.expect(TokenKind::Comma, "between arguments")?;
            }
        }
        self.expect(TokenKind::RParen, "after arguments")?;
        Ok(Expression::FunctionCall {
            function: Box::new(function),
            arguments,
        })
    }

    fn parse_valof(&mut self) -> Result<Expression, CompileError> {
        self.expect(TokenKind::KwValof, "to open a VALOF expression")?;
        let body = self.parse_statement()?;
        Ok(Expression::Valof(Box::new(body)))
    }
}
