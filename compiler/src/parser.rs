//! Parser — recursive descent over the gate/block grammar.
//!
//! ```text
//! program   = { block }
//! block     = gate '{' { statement ';' } '}'
//! gate      = '[' identifier ']'
//! statement = identifier ':' operation args
//! args      = identifier | number
//!           | identifier ',' identifier
//!           | identifier ',' number
//!           | identifier ',' identifier ',' identifier
//! ```
//!
//! The grammar is LL(1): one token of lookahead decides every production.
//! Only the coarse argument shapes above are enforced here; whether a shape
//! suits a particular operation is the semantic analyzer's business.
//!
//! There is no error recovery. The first unexpected token produces a
//! `SyntaxError` and parsing of the unit stops.

use crate::ast::*;
use crate::errors::Diagnostic;
use crate::token::{Span, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    /// A stream without a trailing `Eof` gets one appended.
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last(), Some(t) if t.kind == TokenKind::Eof) {
            let end = tokens.last().map_or(0, |t| t.span.end);
            tokens.push(Token::new(TokenKind::Eof, Span::new(end, end)));
        }
        Self { tokens, current: 0 }
    }

    /// Parse a complete program, stopping at the first syntax error.
    pub fn parse(&mut self) -> Result<Program, Diagnostic> {
        let mut blocks = Vec::new();
        while !self.is_at_end() {
            blocks.push(self.block()?);
        }
        Ok(blocks)
    }

    // ── Blocks ───────────────────────────────────────────────────────

    fn block(&mut self) -> Result<Block, Diagnostic> {
        self.expect(TokenKind::LBracket, "to open a gate")?;
        let (gate, gate_span) = self.expect_identifier("as the gate name")?;
        self.expect(TokenKind::RBracket, "to close the gate")?;
        self.expect(TokenKind::LBrace, "to open the gate's block")?;

        let mut statements = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            statements.push(self.statement()?);
            self.expect(TokenKind::Semicolon, "after a statement")?;
        }
        self.expect(TokenKind::RBrace, "to close the block")?;

        Ok(Block {
            gate,
            gate_span,
            statements,
            origin: Origin::User,
        })
    }

    // ── Statements ───────────────────────────────────────────────────

    fn statement(&mut self) -> Result<Statement, Diagnostic> {
        let (dest, dest_span) = self.expect_identifier("as the statement destination")?;
        self.expect(TokenKind::Colon, "after the destination")?;

        let (word, op_span) = self.expect_identifier("as the operation")?;
        let op = Operation::from_keyword(&word).ok_or_else(|| {
            Diagnostic::syntax(format!("unknown operation '{}'", word), op_span).with_help(
                "operations are SET, ADD, SUB, MUL, DIV, AND, OR, XOR, NOT, SHIFT_LEFT, \
                 SHIFT_RIGHT, COMPARE, JUMP_IF, DISPLAY and LOOP",
            )
        })?;

        let args = self.arg_list()?;
        let end = args.last().map(Arg::span).unwrap_or(op_span);

        Ok(Statement {
            dest,
            dest_span,
            op,
            op_span,
            args,
            span: dest_span.merge(end),
        })
    }

    /// One of the five argument shapes. A number always ends the list.
    fn arg_list(&mut self) -> Result<Vec<Arg>, Diagnostic> {
        let mut args = vec![self.arg()?];
        while self.check(&TokenKind::Comma) {
            let comma = self.current_span();
            let last = args.last().map(|a| (a.as_ident().is_none(), a.span()));
            if let Some((true, span)) = last {
                return Err(Diagnostic::syntax(
                    "a number may only appear as the last argument",
                    span.merge(comma),
                ));
            }
            if args.len() == 3 {
                return Err(Diagnostic::syntax(
                    "a statement takes at most three arguments",
                    comma,
                ));
            }
            self.advance_token();

            let arg = self.arg()?;
            if args.len() == 2 && arg.as_ident().is_none() {
                return Err(Diagnostic::syntax(
                    "the three-argument form takes identifiers only",
                    arg.span(),
                ));
            }
            args.push(arg);
        }
        Ok(args)
    }

    fn arg(&mut self) -> Result<Arg, Diagnostic> {
        let token = self.advance_token();
        match token.kind {
            TokenKind::Identifier(name) => Ok(Arg::Ident(name, token.span)),
            TokenKind::Number(n) => Ok(Arg::Number(n, token.span)),
            other => Err(Diagnostic::syntax(
                format!("expected identifier or number, found {}", other.describe()),
                token.span,
            )),
        }
    }

    // ── Token manipulation ───────────────────────────────────────────

    fn advance_token(&mut self) -> Token {
        let token = self.tokens[self.current].clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.tokens[self.current].kind) == std::mem::discriminant(kind)
    }

    fn expect(&mut self, kind: TokenKind, context: &str) -> Result<(), Diagnostic> {
        if self.check(&kind) {
            self.current += 1;
            Ok(())
        } else {
            let found = &self.tokens[self.current];
            Err(Diagnostic::syntax(
                format!(
                    "expected {} {}, found {}",
                    kind.describe(),
                    context,
                    found.kind.describe()
                ),
                found.span,
            ))
        }
    }

    fn expect_identifier(&mut self, context: &str) -> Result<(String, Span), Diagnostic> {
        let token = self.advance_token();
        match token.kind {
            TokenKind::Identifier(name) => Ok((name, token.span)),
            other => Err(Diagnostic::syntax(
                format!("expected identifier {}, found {}", context, other.describe()),
                token.span,
            )),
        }
    }

    fn current_span(&self) -> Span {
        self.tokens[self.current].span
    }

    fn is_at_end(&self) -> bool {
        matches!(self.tokens[self.current].kind, TokenKind::Eof)
    }
}
