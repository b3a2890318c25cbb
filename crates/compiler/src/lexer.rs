//! Single-pass lexer for BCPL source.
//!
//! One token per `next_token` call. Whitespace and both comment forms are
//! skipped; operators use maximal munch so `<=.` wins over `<=` and `<`.
//! Construction with a new source string resets all positional state.

use crate::CompileError;
use crate::token::{Token, TokenKind};

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Lex the whole input. The trailing Eof token is not included.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            if token.kind == TokenKind::Eof {
                return Ok(tokens);
            }
            tokens.push(token);
        }
    }

    fn peek(&self) -> char {
        self.source.get(self.pos).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.source.get(self.pos + 1).copied().unwrap_or('\0')
    }

    fn advance(&mut self) -> char {
        let ch = self.peek();
        if ch == '\0' {
            return ch;
        }
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        ch
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.peek().is_whitespace() {
                self.advance();
            }
            if self.peek() == '/' && self.peek_next() == '/' {
                while self.peek() != '\n' && self.peek() != '\0' {
                    self.advance();
                }
            } else if self.peek() == '/' && self.peek_next() == '*' {
                self.advance();
                self.advance();
                // Block comments do not nest.
                while self.peek() != '\0' && !(self.peek() == '*' && self.peek_next() == '/') {
                    self.advance();
                }
                if self.peek() != '\0' {
                    self.advance();
                    self.advance();
                }
            } else {
                return;
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, CompileError> {
        self.skip_whitespace_and_comments();

        if self.pos >= self.source.len() {
            return Ok(Token::new(TokenKind::Eof, "", self.line, self.column));
        }

        let ch = self.peek();
        if ch.is_ascii_alphabetic() || ch == '_' {
            return Ok(self.identifier_or_keyword());
        }
        if ch.is_ascii_digit() || ch == '#' || (ch == '.' && self.peek_next().is_ascii_digit()) {
            return self.number();
        }
        if ch == '"' {
            return self.string_literal();
        }
        if ch == '\'' {
            return self.char_literal();
        }
        Ok(self.operator_or_delimiter())
    }

    fn identifier_or_keyword(&mut self) -> Token {
        let line = self.line;
        let column = self.column;
        let mut text = String::new();
        while self.peek().is_ascii_alphanumeric() || self.peek() == '_' {
            text.push(self.advance());
        }
        match TokenKind::keyword(&text) {
            Some(kind) => {
                let mut token = Token::new(kind, text, line, column);
                if kind == TokenKind::KwTrue {
                    token.int_value = -1;
                }
                token
            }
            None => Token::new(TokenKind::Identifier, text, line, column),
        }
    }

    fn number(&mut self) -> Result<Token, CompileError> {
        let line = self.line;
        let column = self.column;
        let mut text = String::new();
        let mut base = 10u32;

        if self.peek() == '#' {
            text.push(self.advance());
            if self.peek().eq_ignore_ascii_case(&'X') {
                text.push(self.advance());
                base = 16;
            } else {
                base = 8;
            }
        }

        let mut saw_dot = false;
        let mut saw_exponent = false;
        loop {
            let ch = self.peek();
            if ch == '.' {
                if saw_dot || base != 10 || self.peek_next() == '%' {
                    break;
                }
                saw_dot = true;
                text.push(self.advance());
            } else if base == 10 && saw_dot && !saw_exponent && ch.eq_ignore_ascii_case(&'E') {
                saw_exponent = true;
                text.push(self.advance());
                if self.peek() == '+' || self.peek() == '-' {
                    text.push(self.advance());
                }
            } else if ch.is_digit(base) {
                text.push(self.advance());
            } else {
                break;
            }
        }

        if saw_dot || saw_exponent {
            let value: f64 = text.parse().map_err(|_| CompileError::Lexical {
                line,
                column,
                message: format!("malformed float literal '{}'", text),
            })?;
            return Ok(Token::float(value, text, line, column));
        }

        let digits = match base {
            16 => &text[2..],
            8 => &text[1..],
            _ => &text[..],
        };
        if digits.is_empty() {
            return Err(CompileError::Lexical {
                line,
                column,
                message: format!("malformed numeric literal '{}'", text),
            });
        }
        let value = i64::from_str_radix(digits, base).map_err(|_| CompileError::Lexical {
            line,
            column,
            message: format!("malformed numeric literal '{}'", text),
        })?;
        Ok(Token::integer(value, text, line, column))
    }

    fn string_literal(&mut self) -> Result<Token, CompileError> {
        let line = self.line;
        let column = self.column;
        self.advance(); // opening quote
        let mut text = String::new();
        loop {
            match self.peek() {
                '\0' => {
                    return Err(CompileError::Lexical {
                        line,
                        column,
                        message: "unterminated string literal".into(),
                    });
                }
                '"' => {
                    self.advance();
                    return Ok(Token::new(TokenKind::StringLiteral, text, line, column));
                }
                '*' => {
                    self.advance();
                    let escaped = self.advance();
                    text.push(match escaped.to_ascii_lowercase() {
                        'n' => '\n',
                        't' => '\t',
                        's' => ' ',
                        'b' => '\u{8}',
                        'p' => '\u{c}',
                        'c' => '\r',
                        '"' => '"',
                        '*' => '*',
                        // Unknown escapes stand for the character itself.
                        _ => escaped,
                    });
                }
                _ => {
                    text.push(self.advance());
                }
            }
        }
    }

    fn char_literal(&mut self) -> Result<Token, CompileError> {
        let line = self.line;
        let column = self.column;
        self.advance(); // opening quote
        let ch = self.advance();
        if ch == '\0' || self.peek() != '\'' {
            return Err(CompileError::Lexical {
                line,
                column,
                message: "malformed character literal".into(),
            });
        }
        self.advance(); // closing quote
        let mut token = Token::new(TokenKind::CharLiteral, ch.to_string(), line, column);
        token.int_value = ch as i64;
        Ok(token)
    }

    fn operator_or_delimiter(&mut self) -> Token {
        let line = self.line;
        let column = self.column;
        let ch = self.advance();
        let token = |kind: TokenKind, text: &str| Token::new(kind, text, line, column);

        match ch {
            '(' => token(TokenKind::LParen, "("),
            ')' => token(TokenKind::RParen, ")"),
            '{' => token(TokenKind::LBrace, "{"),
            '}' => token(TokenKind::RBrace, "}"),
            ',' => token(TokenKind::Comma, ","),
            ';' => token(TokenKind::Semicolon, ";"),
            '!' => token(TokenKind::Bang, "!"),
            '@' => token(TokenKind::At, "@"),
            '&' => token(TokenKind::Amp, "&"),
            '|' => token(TokenKind::Pipe, "|"),
            '%' => token(TokenKind::PercentSub, "%"),
            '+' => {
                if self.peek() == '.' {
                    self.advance();
                    token(TokenKind::FloatPlus, "+.")
                } else {
                    token(TokenKind::Plus, "+")
                }
            }
            '*' => {
                if self.peek() == '.' {
                    self.advance();
                    token(TokenKind::FloatStar, "*.")
                } else {
                    token(TokenKind::Star, "*")
                }
            }
            '/' => {
                if self.peek() == '.' {
                    self.advance();
                    token(TokenKind::FloatSlash, "/.")
                } else {
                    token(TokenKind::Slash, "/")
                }
            }
            '-' => {
                if self.peek() == '>' {
                    self.advance();
                    token(TokenKind::CondArrow, "->")
                } else if self.peek() == '.' {
                    self.advance();
                    token(TokenKind::FloatMinus, "-.")
                } else {
                    token(TokenKind::Minus, "-")
                }
            }
            ':' => {
                if self.peek() == '=' {
                    self.advance();
                    token(TokenKind::Assign, ":=")
                } else {
                    token(TokenKind::Colon, ":")
                }
            }
            '~' => {
                if self.peek() == '=' {
                    self.advance();
                    if self.peek() == '.' {
                        self.advance();
                        token(TokenKind::FloatNe, "~=.")
                    } else {
                        token(TokenKind::Ne, "~=")
                    }
                } else {
                    token(TokenKind::Tilde, "~")
                }
            }
            '=' => {
                if self.peek() == '.' {
                    self.advance();
                    token(TokenKind::FloatEq, "=.")
                } else {
                    token(TokenKind::Eq, "=")
                }
            }
            '<' => {
                if self.peek() == '=' {
                    self.advance();
                    if self.peek() == '.' {
                        self.advance();
                        token(TokenKind::FloatLe, "<=.")
                    } else {
                        token(TokenKind::Le, "<=")
                    }
                } else if self.peek() == '<' {
                    self.advance();
                    token(TokenKind::Lshift, "<<")
                } else if self.peek() == '.' {
                    self.advance();
                    token(TokenKind::FloatLt, "<.")
                } else {
                    token(TokenKind::Lt, "<")
                }
            }
            '>' => {
                if self.peek() == '=' {
                    self.advance();
                    if self.peek() == '.' {
                        self.advance();
                        token(TokenKind::FloatGe, ">=.")
                    } else {
                        token(TokenKind::Ge, ">=")
                    }
                } else if self.peek() == '>' {
                    self.advance();
                    token(TokenKind::Rshift, ">>")
                } else if self.peek() == '.' {
                    self.advance();
                    token(TokenKind::FloatGt, ">.")
                } else {
                    token(TokenKind::Gt, ">")
                }
            }
            '.' => {
                if self.peek() == '%' {
                    self.advance();
                    token(TokenKind::FloatVecSub, ".%")
                } else {
                    token(TokenKind::Illegal, ".")
                }
            }
            '$' => {
                if self.peek() == '(' {
                    self.advance();
                    token(TokenKind::LSection, "$(")
                } else if self.peek() == ')' {
                    self.advance();
                    token(TokenKind::RSection, "$)")
                } else {
                    token(TokenKind::Illegal, "$")
                }
            }
            other => Token::new(TokenKind::Illegal, other.to_string(), line, column),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_lexing_is_deterministic() {
        let source = r#"LET START() BE $( WRITES("HI*n"); X := #X1F + 2.5E-1 $)"#;
        let first = Lexer::tokenize(source).unwrap();
        let second = Lexer::tokenize(source).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let tokens = Lexer::tokenize("LET fact REPEATWHILE REM x_1").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::KwLet);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].text, "fact");
        assert_eq!(tokens[2].kind, TokenKind::KwRepeatWhile);
        assert_eq!(tokens[3].kind, TokenKind::Rem);
        assert_eq!(tokens[4].text, "x_1");
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        let tokens = Lexer::tokenize("let Let LET").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[2].kind, TokenKind::KwLet);
    }

    #[test]
    fn test_number_bases() {
        let tokens = Lexer::tokenize("42 #17 #X1F #xff").unwrap();
        assert_eq!(tokens[0].int_value, 42);
        assert_eq!(tokens[1].int_value, 0o17);
        assert_eq!(tokens[2].int_value, 0x1F);
        assert_eq!(tokens[3].int_value, 0xFF);
    }

    #[test]
    fn test_float_literals() {
        let tokens = Lexer::tokenize("1.5 2.5E2 3.0E-1").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::FloatLiteral);
        assert_eq!(tokens[0].float_value, 1.5);
        assert_eq!(tokens[1].float_value, 250.0);
        assert_eq!(tokens[2].float_value, 0.3);
    }

    #[test]
    fn test_string_escapes() {
        let tokens = Lexer::tokenize(r#""a*nb*tc*s*"***q""#).unwrap();
        assert_eq!(tokens[0].text, "a\nb\tc \"*q");
    }

    #[test]
    fn test_unterminated_string_is_a_lexical_error() {
        let err = Lexer::tokenize("\"abc").unwrap_err();
        match err {
            crate::CompileError::Lexical { line, .. } => assert_eq!(line, 1),
            other => panic!("expected lexical error, got {other}"),
        }
    }

    #[test]
    fn test_char_literal_value() {
        let tokens = Lexer::tokenize("'A'").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::CharLiteral);
        assert_eq!(tokens[0].int_value, 65);
    }

    #[test]
    fn test_maximal_munch_operators() {
        assert_eq!(
            kinds("<=. <= < << <. := -> -. .% $( $) ~=. ~= ~"),
            vec![
                TokenKind::FloatLe,
                TokenKind::Le,
                TokenKind::Lt,
                TokenKind::Lshift,
                TokenKind::FloatLt,
                TokenKind::Assign,
                TokenKind::CondArrow,
                TokenKind::FloatMinus,
                TokenKind::FloatVecSub,
                TokenKind::LSection,
                TokenKind::RSection,
                TokenKind::FloatNe,
                TokenKind::Ne,
                TokenKind::Tilde,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = Lexer::tokenize("1 // line\n/* block\nstill */ 2").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].int_value, 2);
        assert_eq!(tokens[1].line, 3);
    }

    #[test]
    fn test_line_and_column_tracking() {
        let tokens = Lexer::tokenize("a\n  b").unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn test_illegal_glyph() {
        let tokens = Lexer::tokenize("?").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Illegal);
    }
}
