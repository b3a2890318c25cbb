//! Token definitions for the BCPL surface language.

use std::fmt;

/// Every kind of token the lexer can produce. The set is closed; anything
/// unrecognized becomes `Illegal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,

    // Identifiers and literals
    Identifier,
    IntegerLiteral,
    FloatLiteral,
    StringLiteral,
    CharLiteral,

    // Keywords
    KwLet,
    KwAnd,
    KwBe,
    KwVec,
    KwIf,
    KwThen,
    KwUnless,
    KwTest,
    KwOr,
    KwWhile,
    KwDo,
    KwUntil,
    KwRepeat,
    KwRepeatWhile,
    KwRepeatUntil,
    KwFor,
    KwTo,
    KwBy,
    KwSwitchon,
    KwInto,
    KwCase,
    KwDefault,
    KwEndcase,
    KwGoto,
    KwReturn,
    KwResultis,
    KwBreak,
    KwLoop,
    KwValof,
    KwManifest,
    KwStatic,
    KwGlobal,
    KwTrue,
    KwFalse,
    KwFinish,
    KwTable,

    // Operators
    Assign,       // :=
    Plus,         // +
    Minus,        // -
    Star,         // *
    Slash,        // /
    Rem,          // REM
    Eq,           // =
    Ne,           // ~=
    Lt,           // <
    Gt,           // >
    Le,           // <=
    Ge,           // >=
    Amp,          // &
    Pipe,         // |
    Tilde,        // ~
    Eqv,          // EQV
    Neqv,         // NEQV
    Lshift,       // <<
    Rshift,       // >>
    At,           // @ (address of)
    Bang,         // ! (indirection / vector subscript)
    CondArrow,    // ->
    PercentSub,   // % (character subscript)
    FloatPlus,    // +.
    FloatMinus,   // -.
    FloatStar,    // *.
    FloatSlash,   // /.
    FloatEq,      // =.
    FloatNe,      // ~=.
    FloatLt,      // <.
    FloatGt,      // >.
    FloatLe,      // <=.
    FloatGe,      // >=.
    FloatVecSub,  // .%

    // Delimiters
    LParen,
    RParen,
    LBrace,
    RBrace,
    LSection, // $(
    RSection, // $)
    Comma,
    Colon,
    Semicolon,

    Illegal,
}

impl TokenKind {
    /// Keyword table, including the three operator words lexed through the
    /// identifier path.
    pub fn keyword(text: &str) -> Option<TokenKind> {
        Some(match text {
            "LET" => TokenKind::KwLet,
            "AND" => TokenKind::KwAnd,
            "BE" => TokenKind::KwBe,
            "VEC" => TokenKind::KwVec,
            "IF" => TokenKind::KwIf,
            "THEN" => TokenKind::KwThen,
            "UNLESS" => TokenKind::KwUnless,
            "TEST" => TokenKind::KwTest,
            "OR" => TokenKind::KwOr,
            "WHILE" => TokenKind::KwWhile,
            "DO" => TokenKind::KwDo,
            "UNTIL" => TokenKind::KwUntil,
            "REPEAT" => TokenKind::KwRepeat,
            "REPEATWHILE" => TokenKind::KwRepeatWhile,
            "REPEATUNTIL" => TokenKind::KwRepeatUntil,
            "FOR" => TokenKind::KwFor,
            "TO" => TokenKind::KwTo,
            "BY" => TokenKind::KwBy,
            "SWITCHON" => TokenKind::KwSwitchon,
            "INTO" => TokenKind::KwInto,
            "CASE" => TokenKind::KwCase,
            "DEFAULT" => TokenKind::KwDefault,
            "ENDCASE" => TokenKind::KwEndcase,
            "GOTO" => TokenKind::KwGoto,
            "RETURN" => TokenKind::KwReturn,
            "RESULTIS" => TokenKind::KwResultis,
            "BREAK" => TokenKind::KwBreak,
            "LOOP" => TokenKind::KwLoop,
            "VALOF" => TokenKind::KwValof,
            "MANIFEST" => TokenKind::KwManifest,
            "STATIC" => TokenKind::KwStatic,
            "GLOBAL" => TokenKind::KwGlobal,
            "TRUE" => TokenKind::KwTrue,
            "FALSE" => TokenKind::KwFalse,
            "FINISH" => TokenKind::KwFinish,
            "TABLE" => TokenKind::KwTable,
            "REM" => TokenKind::Rem,
            "EQV" => TokenKind::Eqv,
            "NEQV" => TokenKind::Neqv,
            _ => return None,
        })
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Eof => "end of file",
            TokenKind::Identifier => "identifier",
            TokenKind::IntegerLiteral => "integer literal",
            TokenKind::FloatLiteral => "float literal",
            TokenKind::StringLiteral => "string literal",
            TokenKind::CharLiteral => "character literal",
            TokenKind::KwLet => "LET",
            TokenKind::KwAnd => "AND",
            TokenKind::KwBe => "BE",
            TokenKind::KwVec => "VEC",
            TokenKind::KwIf => "IF",
            TokenKind::KwThen => "THEN",
            TokenKind::KwUnless => "UNLESS",
            TokenKind::KwTest => "TEST",
            TokenKind::KwOr => "OR",
            TokenKind::KwWhile => "WHILE",
            TokenKind::KwDo => "DO",
            TokenKind::KwUntil => "UNTIL",
            TokenKind::KwRepeat => "REPEAT",
            TokenKind::KwRepeatWhile => "REPEATWHILE",
            TokenKind::KwRepeatUntil => "REPEATUNTIL",
            TokenKind::KwFor => "FOR",
            TokenKind::KwTo => "TO",
            TokenKind::KwBy => "BY",
            TokenKind::KwSwitchon => "SWITCHON",
            TokenKind::KwInto => "INTO",
            TokenKind::KwCase => "CASE",
            TokenKind::KwDefault => "DEFAULT",
            TokenKind::KwEndcase => "ENDCASE",
            TokenKind::KwGoto => "GOTO",
            TokenKind::KwReturn => "RETURN",
            TokenKind::KwResultis => "RESULTIS",
            TokenKind::KwBreak => "BREAK",
            TokenKind::KwLoop => "LOOP",
            TokenKind::KwValof => "VALOF",
            TokenKind::KwManifest => "MANIFEST",
            TokenKind::KwStatic => "STATIC",
            TokenKind::KwGlobal => "GLOBAL",
            TokenKind::KwTrue => "TRUE",
            TokenKind::KwFalse => "FALSE",
            TokenKind::KwFinish => "FINISH",
            TokenKind::KwTable => "TABLE",
            TokenKind::Assign => ":=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Rem => "REM",
            TokenKind::Eq => "=",
            TokenKind::Ne => "~=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Le => "<=",
            TokenKind::Ge => ">=",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Tilde => "~",
            TokenKind::Eqv => "EQV",
            TokenKind::Neqv => "NEQV",
            TokenKind::Lshift => "<<",
            TokenKind::Rshift => ">>",
            TokenKind::At => "@",
            TokenKind::Bang => "!",
            TokenKind::CondArrow => "->",
            TokenKind::PercentSub => "%",
            TokenKind::FloatPlus => "+.",
            TokenKind::FloatMinus => "-.",
            TokenKind::FloatStar => "*.",
            TokenKind::FloatSlash => "/.",
            TokenKind::FloatEq => "=.",
            TokenKind::FloatNe => "~=.",
            TokenKind::FloatLt => "<.",
            TokenKind::FloatGt => ">.",
            TokenKind::FloatLe => "<=.",
            TokenKind::FloatGe => ">=.",
            TokenKind::FloatVecSub => ".%",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LSection => "$(",
            TokenKind::RSection => "$)",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Semicolon => ";",
            TokenKind::Illegal => "illegal token",
        };
        f.write_str(text)
    }
}

/// One lexed token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub int_value: i64,
    pub float_value: f64,
    /// 1-indexed source line.
    pub line: u32,
    /// 1-indexed source column of the token's first character.
    pub column: u32,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: u32, column: u32) -> Self {
        Token {
            kind,
            text: text.into(),
            int_value: 0,
            float_value: 0.0,
            line,
            column,
        }
    }

    pub fn integer(value: i64, text: impl Into<String>, line: u32, column: u32) -> Self {
        Token {
            kind: TokenKind::IntegerLiteral,
            text: text.into(),
            int_value: value,
            float_value: 0.0,
            line,
            column,
        }
    }

    pub fn float(value: f64, text: impl Into<String>, line: u32, column: u32) -> Self {
        Token {
            kind: TokenKind::FloatLiteral,
            text: text.into(),
            int_value: 0,
            float_value: value,
            line,
            column,
        }
    }
}
