//! Tokenizer for rule text.
//!
//! Produces a flat token stream with source positions. Comments run from `#`
//! to end of line. The stream always ends with a single [`TokenKind::Eof`]
//! token positioned just past the last character.

use super::ast::{Layer, Position};
use super::error::SourceDiagnostic;

/// Kinds of tokens in rule text.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Lowercase-initial identifier: predicate names and keywords.
    Ident(String),
    /// Uppercase- or underscore-initial identifier.
    Variable(String),
    /// A lone `_`.
    Wildcard,
    /// The `Decl` keyword.
    Decl,
    /// `/name` constant, slash included.
    Name(String),
    Str(String),
    Int(i64),
    Float(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    /// `:-`
    Implies,
    /// `@`
    At,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

impl TokenKind {
    /// Whether this token can start a term.
    pub fn starts_term(&self) -> bool {
        matches!(
            self,
            Self::Variable(_)
                | Self::Wildcard
                | Self::Name(_)
                | Self::Str(_)
                | Self::Int(_)
                | Self::Float(_)
        )
    }
}

/// A token with its surface text and position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: Position,
}

impl Token {
    /// Text as quoted in diagnostics: `'<EOF>'` at end of input.
    pub fn display_text(&self) -> String {
        match self.kind {
            TokenKind::Eof => "'<EOF>'".to_string(),
            _ => format!("'{}'", self.text),
        }
    }
}

/// Tokenize `text` belonging to `layer`.
pub fn tokenize(text: &str, layer: Layer) -> Result<Vec<Token>, SourceDiagnostic> {
    Lexer::new(text, layer).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    layer: Layer,
}

impl Lexer {
    fn new(text: &str, layer: Layer) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
            column: 0,
            layer,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, SourceDiagnostic> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let start = self.here();
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    text: String::new(),
                    position: start,
                });
                return Ok(tokens);
            };

            let begin = self.pos;
            let kind = match c {
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                '[' => self.single(TokenKind::LBracket),
                ']' => self.single(TokenKind::RBracket),
                ',' => self.single(TokenKind::Comma),
                '.' => self.single(TokenKind::Dot),
                '@' => self.single(TokenKind::At),
                '=' => self.single(TokenKind::Eq),
                ':' if self.peek_at(1) == Some('-') => {
                    self.bump();
                    self.bump();
                    TokenKind::Implies
                }
                '!' if self.peek_at(1) == Some('=') => {
                    self.bump();
                    self.bump();
                    TokenKind::Ne
                }
                '<' => self.with_optional_eq(TokenKind::Lt, TokenKind::Le),
                '>' => self.with_optional_eq(TokenKind::Gt, TokenKind::Ge),
                '"' => self.string(start)?,
                '/' => self.name(start)?,
                '-' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number(start)?,
                c if c.is_ascii_digit() => self.number(start)?,
                c if c.is_ascii_lowercase() => {
                    let word = self.word();
                    TokenKind::Ident(word)
                }
                c if c.is_ascii_uppercase() || c == '_' => {
                    let word = self.word();
                    match word.as_str() {
                        "_" => TokenKind::Wildcard,
                        "Decl" => TokenKind::Decl,
                        _ => TokenKind::Variable(word),
                    }
                }
                other => {
                    return Err(SourceDiagnostic::syntax(
                        self.layer,
                        start,
                        "token",
                        format!("token recognition error at: '{other}'"),
                    ));
                }
            };

            let text: String = self.chars[begin..self.pos].iter().collect();
            tokens.push(Token {
                kind,
                text,
                position: start,
            });
        }
    }

    fn here(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        kind
    }

    fn with_optional_eq(&mut self, plain: TokenKind, with_eq: TokenKind) -> TokenKind {
        self.bump();
        if self.peek() == Some('=') {
            self.bump();
            with_eq
        } else {
            plain
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c == '#' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        word
    }

    fn name(&mut self, start: Position) -> Result<TokenKind, SourceDiagnostic> {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c == '/' {
                // A segment separator must be followed by a segment character.
                let next = self.peek_at(1);
                if !next.is_some_and(is_name_char) {
                    break;
                }
                name.push(c);
                self.bump();
            } else if is_name_char(c) && !name.is_empty() {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(SourceDiagnostic::syntax(
                self.layer,
                start,
                "name constant",
                "token recognition error at: '/'",
            ));
        }
        Ok(TokenKind::Name(name))
    }

    fn string(&mut self, start: Position) -> Result<TokenKind, SourceDiagnostic> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(SourceDiagnostic::syntax(
                        self.layer,
                        start,
                        "'\"'",
                        "unterminated string literal",
                    ));
                }
                Some('"') => return Ok(TokenKind::Str(value)),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    Some(other) => {
                        return Err(SourceDiagnostic::syntax(
                            self.layer,
                            start,
                            "escape sequence",
                            format!("invalid escape sequence '\\{other}' in string literal"),
                        ));
                    }
                    None => {
                        return Err(SourceDiagnostic::syntax(
                            self.layer,
                            start,
                            "'\"'",
                            "unterminated string literal",
                        ));
                    }
                },
                Some(c) => value.push(c),
            }
        }
    }

    fn number(&mut self, start: Position) -> Result<TokenKind, SourceDiagnostic> {
        let mut literal = String::new();
        if self.peek() == Some('-') {
            literal.push('-');
            self.bump();
        }
        self.digits(&mut literal);

        let mut is_float = false;
        // `1.` followed by a non-digit is an integer and a statement terminator.
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
            is_float = true;
            literal.push('.');
            self.bump();
            self.digits(&mut literal);
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|d| d.is_ascii_digit()) {
                is_float = true;
                for _ in 0..digit_at {
                    if let Some(c) = self.bump() {
                        literal.push(c);
                    }
                }
                self.digits(&mut literal);
            }
        }

        let invalid = || {
            SourceDiagnostic::syntax(
                self.layer,
                start,
                "number",
                format!("invalid number literal '{literal}'"),
            )
        };
        if is_float {
            literal.parse::<f64>().map(TokenKind::Float).map_err(|_| invalid())
        } else {
            literal.parse::<i64>().map(TokenKind::Int).map_err(|_| invalid())
        }
    }

    fn digits(&mut self, into: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                into.push(c);
                self.bump();
            } else {
                break;
            }
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text, Layer::Policy)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn rule_tokens() {
        assert_eq!(
            kinds("is_safe(X) :- has_flag(X, /reviewed)."),
            vec![
                TokenKind::Ident("is_safe".into()),
                TokenKind::LParen,
                TokenKind::Variable("X".into()),
                TokenKind::RParen,
                TokenKind::Implies,
                TokenKind::Ident("has_flag".into()),
                TokenKind::LParen,
                TokenKind::Variable("X".into()),
                TokenKind::Comma,
                TokenKind::Name("/reviewed".into()),
                TokenKind::RParen,
                TokenKind::Dot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers_and_terminator() {
        assert_eq!(
            kinds("size(3). ratio(-1.5e3)."),
            vec![
                TokenKind::Ident("size".into()),
                TokenKind::LParen,
                TokenKind::Int(3),
                TokenKind::RParen,
                TokenKind::Dot,
                TokenKind::Ident("ratio".into()),
                TokenKind::LParen,
                TokenKind::Float(-1500.0),
                TokenKind::RParen,
                TokenKind::Dot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_wildcards_and_operators() {
        assert_eq!(
            kinds("Decl _ _X <= != >"),
            vec![
                TokenKind::Decl,
                TokenKind::Wildcard,
                TokenKind::Variable("_X".into()),
                TokenKind::Le,
                TokenKind::Ne,
                TokenKind::Gt,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn nested_names_and_comments() {
        assert_eq!(
            kinds("# header\n/lang/rust-2024 # trailing"),
            vec![TokenKind::Name("/lang/rust-2024".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn positions_are_line_and_column() {
        let tokens = tokenize("a.\n  b(X).", Layer::Policy).unwrap();
        assert_eq!(tokens[0].position, Position::new(1, 0));
        assert_eq!(tokens[2].position, Position::new(2, 2));
        let eof = tokens.last().unwrap();
        assert_eq!(eof.position, Position::new(2, 7));
        assert_eq!(eof.display_text(), "'<EOF>'");
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\"b\n""#),
            vec![TokenKind::Str("a\"b\n".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn lexical_errors() {
        let err = tokenize("foo(X) $", Layer::Learned).unwrap_err();
        assert_eq!(err.to_string(), "1:7 token recognition error at: '$'");

        let err = tokenize("note(\"open", Layer::Learned).unwrap_err();
        assert_eq!(err.message, "unterminated string literal");

        let err = tokenize("big(99999999999999999999).", Layer::Learned).unwrap_err();
        assert!(err.message.starts_with("invalid number literal"));
    }
}
