//! Abstract Syntax Tree — gates, blocks and statements.
//!
//! A CEL program is a flat, ordered list of blocks. Every block is opened
//! by a gate (`[name]`) that doubles as a jump target, and holds a list of
//! `dest : OPERATION args` statements. Order matters twice over: it is the
//! order code is emitted in, and the order control falls through in.

use std::fmt;

use crate::token::Span;

/// A complete program is the ordered sequence of its blocks.
pub type Program = Vec<Block>;

/// Where a block came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    User,
    /// Created by lowering (loop gates and their continuation gates).
    Synthesized,
}

/// `[gate] { statement; ... }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub gate: String,
    pub gate_span: Span,
    pub statements: Vec<Statement>,
    pub origin: Origin,
}

/// `dest : OPERATION args`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub dest: String,
    pub dest_span: Span,
    pub op: Operation,
    pub op_span: Span,
    pub args: Vec<Arg>,
    pub span: Span,
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        self.op.kind()
    }
}

/// A statement argument: an identifier reference or a decimal literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Ident(String, Span),
    Number(i64, Span),
}

impl Arg {
    pub fn span(&self) -> Span {
        match self {
            Arg::Ident(_, span) | Arg::Number(_, span) => *span,
        }
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Arg::Ident(name, _) => Some(name),
            Arg::Number(..) => None,
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Ident(name, _) => write!(f, "{}", name),
            Arg::Number(n, _) => write!(f, "{}", n),
        }
    }
}

/// The fixed operation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Not,
    ShiftLeft,
    ShiftRight,
    Compare,
    JumpIf,
    Display,
    Loop,
}

impl Operation {
    pub const ALL: [Operation; 15] = [
        Operation::Set,
        Operation::Add,
        Operation::Sub,
        Operation::Mul,
        Operation::Div,
        Operation::And,
        Operation::Or,
        Operation::Xor,
        Operation::Not,
        Operation::ShiftLeft,
        Operation::ShiftRight,
        Operation::Compare,
        Operation::JumpIf,
        Operation::Display,
        Operation::Loop,
    ];

    /// Case-insensitive lookup of an operation keyword.
    pub fn from_keyword(word: &str) -> Option<Operation> {
        let upper = word.to_ascii_uppercase();
        Self::ALL.into_iter().find(|op| op.keyword() == upper)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Operation::Set => "SET",
            Operation::Add => "ADD",
            Operation::Sub => "SUB",
            Operation::Mul => "MUL",
            Operation::Div => "DIV",
            Operation::And => "AND",
            Operation::Or => "OR",
            Operation::Xor => "XOR",
            Operation::Not => "NOT",
            Operation::ShiftLeft => "SHIFT_LEFT",
            Operation::ShiftRight => "SHIFT_RIGHT",
            Operation::Compare => "COMPARE",
            Operation::JumpIf => "JUMP_IF",
            Operation::Display => "DISPLAY",
            Operation::Loop => "LOOP",
        }
    }

    pub fn kind(self) -> StatementKind {
        match self {
            Operation::Compare => StatementKind::FlagProducing,
            Operation::JumpIf => StatementKind::ControlTransfer,
            Operation::Display => StatementKind::SideEffectOnly,
            Operation::Loop => StatementKind::Sugar,
            _ => StatementKind::ValueProducing,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// What a statement does with its destination.
///
/// Only [`StatementKind::ValueProducing`] statements write storage; for the
/// other kinds the destination identifier is a readability label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    ValueProducing,
    /// `COMPARE`: updates the comparison state.
    FlagProducing,
    /// `JUMP_IF`: reads the comparison state, may branch.
    ControlTransfer,
    /// `DISPLAY`: prints, writes nothing.
    SideEffectOnly,
    /// `LOOP`: removed by lowering.
    Sugar,
}

impl StatementKind {
    pub fn writes_dest(self) -> bool {
        matches!(self, StatementKind::ValueProducing)
    }
}

// ── Pretty-printing ─────────────────────────────────────────────────

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.dest, self.op)?;
        for (i, arg) in self.args.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{}", sep, arg)?;
        }
        Ok(())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}] {{", self.gate)?;
        for stmt in &self.statements {
            writeln!(f, "    {};", stmt)?;
        }
        write!(f, "}}")
    }
}
