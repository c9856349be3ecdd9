//! Lexer — Tokenizes CEL source code with error recovery.
//!
//! The lexer scans the source string character by character, producing a
//! vector of tokens terminated by [`TokenKind::Eof`]. Key design decisions:
//!
//! - **Error recovery**: On an unexpected character, we record a
//!   `SyntaxError` and skip it, continuing to tokenize the rest. This lets
//!   us report every stray character in a single pass. The pipeline never
//!   hands a token stream with lexical errors to the parser.
//!
//! - **Layout is irrelevant**: Spaces, tabs and line breaks only separate
//!   tokens. Indentation conventions have no effect on the token stream.
//!
//! - **Span tracking**: Every token records its byte offset range in the
//!   source so diagnostics can point at the exact characters.

use crate::errors::Diagnostic;
use crate::token::{Span, Token, TokenKind};

pub struct Lexer<'src> {
    source: &'src str,
    chars: Vec<char>,
    start: usize,    // Start of current token (byte offset)
    current: usize,  // Current position (char index)
    byte_pos: usize, // Current byte position
    tokens: Vec<Token>,
    errors: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            start: 0,
            current: 0,
            byte_pos: 0,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn scan_tokens(&mut self) -> Vec<Token> {
        while !self.is_at_end() {
            self.start = self.byte_pos;
            self.scan_token();
        }
        self.tokens.push(Token::new(
            TokenKind::Eof,
            Span::new(self.byte_pos, self.byte_pos),
        ));
        self.tokens.clone()
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<Diagnostic> {
        self.errors
    }

    fn scan_token(&mut self) {
        let c = self.advance();
        match c {
            // Whitespace
            ' ' | '\t' | '\r' | '\n' => {}

            // Line comments
            '/' if self.peek() == '/' => {
                while !self.is_at_end() && self.peek() != '\n' {
                    self.advance();
                }
            }

            '[' => self.add_token(TokenKind::LBracket),
            ']' => self.add_token(TokenKind::RBracket),
            '{' => self.add_token(TokenKind::LBrace),
            '}' => self.add_token(TokenKind::RBrace),
            ':' => self.add_token(TokenKind::Colon),
            ',' => self.add_token(TokenKind::Comma),
            ';' => self.add_token(TokenKind::Semicolon),

            c if c.is_ascii_digit() => self.number(c),

            c if c.is_ascii_alphabetic() => self.identifier(c),

            _ => {
                self.errors.push(Diagnostic::syntax(
                    format!("unexpected character '{}'", c.escape_debug()),
                    Span::new(self.start, self.byte_pos),
                ));
            }
        }
    }

    // ── Literal scanners ─────────────────────────────────────────────

    fn number(&mut self, first: char) {
        let mut s = String::new();
        s.push(first);
        while !self.is_at_end() && self.peek().is_ascii_digit() {
            s.push(self.advance());
        }

        match s.parse::<i64>() {
            Ok(n) => self.add_token(TokenKind::Number(n)),
            Err(_) => self.errors.push(
                Diagnostic::syntax(
                    format!("integer literal '{}' does not fit in 64 bits", s),
                    Span::new(self.start, self.byte_pos),
                )
                .with_help(format!("the largest literal is {}", i64::MAX)),
            ),
        }
    }

    fn identifier(&mut self, first: char) {
        let mut name = String::new();
        name.push(first);
        while !self.is_at_end() && (self.peek().is_ascii_alphanumeric() || self.peek() == '_') {
            name.push(self.advance());
        }
        self.add_token(TokenKind::Identifier(name));
    }

    // ── Character-level helpers ──────────────────────────────────────

    fn advance(&mut self) -> char {
        let c = self.chars[self.current];
        self.current += 1;
        self.byte_pos += c.len_utf8();
        c
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.chars[self.current]
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }

    fn add_token(&mut self, kind: TokenKind) {
        debug_assert!(self.byte_pos <= self.source.len());
        self.tokens.push(Token::new(kind, Span::new(self.start, self.byte_pos)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn lex(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.scan_tokens();
        assert!(lexer.errors().is_empty(), "Lexer errors: {:?}", lexer.errors());
        tokens.into_iter().map(|t| t.kind).collect()
    }

    fn ident(s: &str) -> TokenKind {
        TokenKind::Identifier(s.into())
    }

    #[test]
    fn test_statement() {
        assert_eq!(
            lex("x: ADD y, 12;"),
            vec![
                ident("x"),
                TokenKind::Colon,
                ident("ADD"),
                ident("y"),
                TokenKind::Comma,
                TokenKind::Number(12),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_gate_and_braces() {
        assert_eq!(
            lex("[main]{}"),
            vec![
                TokenKind::LBracket,
                ident("main"),
                TokenKind::RBracket,
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_layout_does_not_change_tokens() {
        let compact = lex("[g]{a:SET 1;}");
        let spread = lex("[g]\n{\n\ta :  SET\t1 ;\r\n}\n");
        assert_eq!(compact, spread);
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(
            lex("counter step_2 LOOP_Block"),
            vec![
                ident("counter"),
                ident("step_2"),
                ident("LOOP_Block"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            lex("1 // trailing note\n 7"),
            vec![TokenKind::Number(1), TokenKind::Number(7), TokenKind::Eof]
        );
    }

    #[test]
    fn test_spans() {
        let mut lexer = Lexer::new("[ab]");
        let tokens = lexer.scan_tokens();
        assert_eq!(tokens[1].span, Span::new(1, 3));
        assert_eq!(tokens[3].span, Span::new(4, 4));
    }

    #[test]
    fn test_error_recovery() {
        let mut lexer = Lexer::new("x: SET 4 @ 7 #;");
        let tokens = lexer.scan_tokens();
        assert_eq!(tokens.len(), 7); // x : SET 4 7 ; EOF
        assert_eq!(lexer.errors().len(), 2);
        assert!(lexer.errors().iter().all(|e| e.kind == ErrorKind::Syntax));
        assert_eq!(lexer.errors()[0].span, Span::new(9, 10));
    }

    #[test]
    fn test_leading_underscore_rejected() {
        let mut lexer = Lexer::new("_x");
        lexer.scan_tokens();
        assert_eq!(lexer.errors().len(), 1);
    }

    #[test]
    fn test_number_overflow() {
        let mut lexer = Lexer::new("99999999999999999999");
        lexer.scan_tokens();
        assert_eq!(lexer.errors().len(), 1);
        assert!(lexer.errors()[0].message.contains("64 bits"));
    }

    #[test]
    fn test_max_literal() {
        assert_eq!(
            lex("9223372036854775807"),
            vec![TokenKind::Number(i64::MAX), TokenKind::Eof]
        );
    }
}
