//! Abstract syntax tree for BCPL.
//!
//! Three sum types — [`Expression`], [`Statement`], [`Declaration`] — cover
//! every node kind. Ownership runs parent to child; `clone()` is a deep
//! structural copy and `PartialEq` is structural equality, which together
//! give the clone round-trip law the tests rely on.

use crate::token::TokenKind;
use std::fmt;

/// Binary operators. The float set is the `.`-suffixed parallel of the
/// integer set; float comparisons still produce integer truth values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    LogAnd,
    LogOr,
    Eqv,
    Neqv,
    ShiftLeft,
    ShiftRight,
    FAdd,
    FSubtract,
    FMultiply,
    FDivide,
    FEqual,
    FNotEqual,
    FLess,
    FGreater,
    FLessEqual,
    FGreaterEqual,
}

impl BinaryOperator {
    pub fn from_token(kind: TokenKind) -> Option<Self> {
        Some(match kind {
            TokenKind::Plus => BinaryOperator::Add,
            TokenKind::Minus => BinaryOperator::Subtract,
            TokenKind::Star => BinaryOperator::Multiply,
            TokenKind::Slash => BinaryOperator::Divide,
            TokenKind::Rem => BinaryOperator::Remainder,
            TokenKind::Eq => BinaryOperator::Equal,
            TokenKind::Ne => BinaryOperator::NotEqual,
            TokenKind::Lt => BinaryOperator::Less,
            TokenKind::Gt => BinaryOperator::Greater,
            TokenKind::Le => BinaryOperator::LessEqual,
            TokenKind::Ge => BinaryOperator::GreaterEqual,
            TokenKind::Amp => BinaryOperator::LogAnd,
            TokenKind::Pipe => BinaryOperator::LogOr,
            TokenKind::Eqv => BinaryOperator::Eqv,
            TokenKind::Neqv => BinaryOperator::Neqv,
            TokenKind::Lshift => BinaryOperator::ShiftLeft,
            TokenKind::Rshift => BinaryOperator::ShiftRight,
            TokenKind::FloatPlus => BinaryOperator::FAdd,
            TokenKind::FloatMinus => BinaryOperator::FSubtract,
            TokenKind::FloatStar => BinaryOperator::FMultiply,
            TokenKind::FloatSlash => BinaryOperator::FDivide,
            TokenKind::FloatEq => BinaryOperator::FEqual,
            TokenKind::FloatNe => BinaryOperator::FNotEqual,
            TokenKind::FloatLt => BinaryOperator::FLess,
            TokenKind::FloatGt => BinaryOperator::FGreater,
            TokenKind::FloatLe => BinaryOperator::FLessEqual,
            TokenKind::FloatGe => BinaryOperator::FGreaterEqual,
            _ => return None,
        })
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::Less
                | BinaryOperator::Greater
                | BinaryOperator::LessEqual
                | BinaryOperator::GreaterEqual
                | BinaryOperator::FEqual
                | BinaryOperator::FNotEqual
                | BinaryOperator::FLess
                | BinaryOperator::FGreater
                | BinaryOperator::FLessEqual
                | BinaryOperator::FGreaterEqual
        )
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            BinaryOperator::FAdd
                | BinaryOperator::FSubtract
                | BinaryOperator::FMultiply
                | BinaryOperator::FDivide
                | BinaryOperator::FEqual
                | BinaryOperator::FNotEqual
                | BinaryOperator::FLess
                | BinaryOperator::FGreater
                | BinaryOperator::FLessEqual
                | BinaryOperator::FGreaterEqual
        )
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Remainder => "REM",
            BinaryOperator::Equal => "=",
            BinaryOperator::NotEqual => "~=",
            BinaryOperator::Less => "<",
            BinaryOperator::Greater => ">",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::LogAnd => "&",
            BinaryOperator::LogOr => "|",
            BinaryOperator::Eqv => "EQV",
            BinaryOperator::Neqv => "NEQV",
            BinaryOperator::ShiftLeft => "<<",
            BinaryOperator::ShiftRight => ">>",
            BinaryOperator::FAdd => "+.",
            BinaryOperator::FSubtract => "-.",
            BinaryOperator::FMultiply => "*.",
            BinaryOperator::FDivide => "/.",
            BinaryOperator::FEqual => "=.",
            BinaryOperator::FNotEqual => "~=.",
            BinaryOperator::FLess => "<.",
            BinaryOperator::FGreater => ">.",
            BinaryOperator::FLessEqual => "<=.",
            BinaryOperator::FGreaterEqual => ">=.",
        };
        f.write_str(text)
    }
}

/// Unary operators. The indirection form `!e` parses to
/// [`Expression::Dereference`] rather than a `UnaryOp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    /// `-` arithmetic negation.
    Negate,
    /// `~` bitwise/logical complement.
    Not,
    /// `@` address-of.
    AddressOf,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOperator::Negate => "-",
            UnaryOperator::Not => "~",
            UnaryOperator::AddressOf => "@",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    NumberLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    CharLiteral(i64),
    VariableAccess(String),
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    FunctionCall {
        function: Box<Expression>,
        arguments: Vec<Expression>,
    },
    Conditional {
        condition: Box<Expression>,
        then_expr: Box<Expression>,
        else_expr: Box<Expression>,
    },
    /// `TABLE k1, k2, ...` — a fresh word table holding the given values.
    Table(Vec<Expression>),
    /// `VEC e` — a fresh zeroed vector of `e + 1` words.
    VectorConstructor(Box<Expression>),
    /// `VALOF s` — value produced by a statement body via RESULTIS.
    Valof(Box<Statement>),
    /// Free-standing pointer read (the unary `!` once parsed).
    Dereference(Box<Expression>),
    /// `v ! i` — word subscript.
    VectorAccess {
        vector: Box<Expression>,
        index: Box<Expression>,
    },
    /// `s % i` — 32-bit character subscript.
    CharacterAccess {
        string: Box<Expression>,
        index: Box<Expression>,
    },
    /// `v .% i` — float (64-bit) subscript.
    FloatVectorAccess {
        vector: Box<Expression>,
        index: Box<Expression>,
    },
}

impl Expression {
    pub fn number(value: i64) -> Expression {
        Expression::NumberLiteral(value)
    }

    pub fn variable(name: impl Into<String>) -> Expression {
        Expression::VariableAccess(name.into())
    }

    pub fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Expression {
        Expression::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Count of nodes in this subtree; the inlining budget is measured in
    /// these units.
    pub fn node_count(&self) -> usize {
        match self {
            Expression::NumberLiteral(_)
            | Expression::FloatLiteral(_)
            | Expression::StringLiteral(_)
            | Expression::CharLiteral(_)
            | Expression::VariableAccess(_) => 1,
            Expression::UnaryOp { operand, .. } => 1 + operand.node_count(),
            Expression::BinaryOp { left, right, .. } => 1 + left.node_count() + right.node_count(),
            Expression::FunctionCall {
                function,
                arguments,
            } => {
                1 + function.node_count()
                    + arguments.iter().map(Expression::node_count).sum::<usize>()
            }
            Expression::Conditional {
                condition,
                then_expr,
                else_expr,
            } => 1 + condition.node_count() + then_expr.node_count() + else_expr.node_count(),
            Expression::Table(items) => 1 + items.iter().map(Expression::node_count).sum::<usize>(),
            Expression::VectorConstructor(size) => 1 + size.node_count(),
            Expression::Valof(body) => 1 + body.node_count(),
            Expression::Dereference(pointer) => 1 + pointer.node_count(),
            Expression::VectorAccess { vector, index }
            | Expression::FloatVectorAccess { vector, index } => {
                1 + vector.node_count() + index.node_count()
            }
            Expression::CharacterAccess { string, index } => {
                1 + string.node_count() + index.node_count()
            }
        }
    }
}

/// How a postfix repeat loop re-enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatKind {
    /// `C REPEAT` — unconditional.
    Repeat,
    /// `C REPEATWHILE E` — re-enter while E is truthy.
    RepeatWhile,
    /// `C REPEATUNTIL E` — re-enter while E is falsy.
    RepeatUntil,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub value: i64,
    pub body: Statement,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assignment {
        targets: Vec<Expression>,
        values: Vec<Expression>,
    },
    RoutineCall(Expression),
    Compound(Vec<Statement>),
    If {
        condition: Expression,
        then_branch: Box<Statement>,
    },
    Test {
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    Repeat {
        body: Box<Statement>,
        condition: Option<Expression>,
        kind: RepeatKind,
    },
    For {
        var: String,
        from: Expression,
        to: Expression,
        by: Option<Expression>,
        body: Box<Statement>,
    },
    Switchon {
        discriminant: Expression,
        cases: Vec<SwitchCase>,
        default: Option<Box<Statement>>,
    },
    Break,
    Loop,
    Endcase,
    Finish,
    Return,
    Resultis(Expression),
    Goto(Expression),
    Labeled {
        name: String,
        body: Box<Statement>,
    },
    Declaration(Box<Declaration>),
}

impl Statement {
    pub fn empty() -> Statement {
        Statement::Compound(Vec::new())
    }

    pub fn node_count(&self) -> usize {
        match self {
            Statement::Assignment { targets, values } => {
                1 + targets.iter().map(Expression::node_count).sum::<usize>()
                    + values.iter().map(Expression::node_count).sum::<usize>()
            }
            Statement::RoutineCall(call) => 1 + call.node_count(),
            Statement::Compound(children) => {
                1 + children.iter().map(Statement::node_count).sum::<usize>()
            }
            Statement::If {
                condition,
                then_branch,
            } => 1 + condition.node_count() + then_branch.node_count(),
            Statement::Test {
                condition,
                then_branch,
                else_branch,
            } => {
                1 + condition.node_count()
                    + then_branch.node_count()
                    + else_branch.as_ref().map_or(0, |s| s.node_count())
            }
            Statement::While { condition, body } => 1 + condition.node_count() + body.node_count(),
            Statement::Repeat {
                body, condition, ..
            } => 1 + body.node_count() + condition.as_ref().map_or(0, Expression::node_count),
            Statement::For {
                from, to, by, body, ..
            } => {
                1 + from.node_count()
                    + to.node_count()
                    + by.as_ref().map_or(0, Expression::node_count)
                    + body.node_count()
            }
            Statement::Switchon {
                discriminant,
                cases,
                default,
            } => {
                1 + discriminant.node_count()
                    + cases.iter().map(|c| c.body.node_count()).sum::<usize>()
                    + default.as_ref().map_or(0, |s| s.node_count())
            }
            Statement::Break
            | Statement::Loop
            | Statement::Endcase
            | Statement::Finish
            | Statement::Return => 1,
            Statement::Resultis(value) => 1 + value.node_count(),
            Statement::Goto(target) => 1 + target.node_count(),
            Statement::Labeled { body, .. } => 1 + body.node_count(),
            Statement::Declaration(decl) => 1 + decl.node_count(),
        }
    }
}

/// One `name = init` entry of a simple LET.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueBinding {
    pub name: String,
    pub init: Option<Expression>,
}

/// One `name : slot` entry of a GLOBAL block.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalBinding {
    pub name: String,
    pub slot: i64,
}

/// One `name = value` entry of a MANIFEST block.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestBinding {
    pub name: String,
    pub value: i64,
}

/// A function (expression body) or routine (statement body) definition.
/// The body enum guarantees exactly one form is present.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub params: Vec<String>,
    pub body: FunctionBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Expression(Expression),
    Statement(Statement),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Let(Vec<ValueBinding>),
    Function(FunctionDeclaration),
    Global(Vec<GlobalBinding>),
    Manifest(Vec<ManifestBinding>),
    Get(String),
}

impl Declaration {
    pub fn node_count(&self) -> usize {
        match self {
            Declaration::Let(bindings) => {
                1 + bindings
                    .iter()
                    .map(|b| b.init.as_ref().map_or(0, Expression::node_count))
                    .sum::<usize>()
            }
            Declaration::Function(func) => {
                1 + match &func.body {
                    FunctionBody::Expression(expr) => expr.node_count(),
                    FunctionBody::Statement(stmt) => stmt.node_count(),
                }
            }
            Declaration::Global(_) | Declaration::Manifest(_) | Declaration::Get(_) => 1,
        }
    }
}

/// A whole compilation unit: an ordered list of top-level declarations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub declarations: Vec<Declaration>,
}

impl Program {
    pub fn new() -> Self {
        Program {
            declarations: Vec::new(),
        }
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDeclaration> {
        self.declarations.iter().filter_map(|decl| match decl {
            Declaration::Function(func) => Some(func),
            _ => None,
        })
    }

    /// All manifest constants declared anywhere in the program.
    pub fn manifests(&self) -> std::collections::HashMap<String, i64> {
        let mut table = std::collections::HashMap::new();
        for decl in &self.declarations {
            if let Declaration::Manifest(entries) = decl {
                for entry in entries {
                    table.insert(entry.name.clone(), entry.value);
                }
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_is_deep_and_structural() {
        let expr = Expression::binary(
            BinaryOperator::Add,
            Expression::number(1),
            Expression::binary(
                BinaryOperator::Multiply,
                Expression::variable("x"),
                Expression::number(3),
            ),
        );
        let copy = expr.clone();
        assert_eq!(expr, copy);
    }

    #[test]
    fn test_node_count() {
        let expr = Expression::binary(
            BinaryOperator::Add,
            Expression::number(1),
            Expression::number(2),
        );
        assert_eq!(expr.node_count(), 3);
        let stmt = Statement::Resultis(expr);
        assert_eq!(stmt.node_count(), 4);
    }

    #[test]
    fn test_manifest_collection() {
        let program = Program {
            declarations: vec![Declaration::Manifest(vec![ManifestBinding {
                name: "LIMIT".into(),
                value: 14,
            }])],
        };
        assert_eq!(program.manifests().get("LIMIT"), Some(&14));
    }
}
