//! Semantic analysis — arity checks, the flat symbol table, and static
//! diagnostics.
//!
//! The analyzer walks the lowered program once in declaration order. It
//! never stops at the first problem: every arity, undefined-identifier,
//! divide-by-zero and duplicate-gate error in the unit is collected, and
//! the caller withholds code generation if any were found.
//!
//! # Symbols
//!
//! There is exactly one symbol table for the whole program. Gates are
//! labels, not scopes: `x` in one gate and `x` in another name the same
//! storage cell. A symbol is created the first time a value-producing
//! statement writes it, gets the next free slot, and keeps that slot for
//! the rest of compilation.
//!
//! "Defined before use" is textual: a read is legal if some earlier
//! statement in program order writes the name. Jumps are not followed.
//!
//! # Operand shapes
//!
//! | operation                         | arguments                   |
//! |-----------------------------------|-----------------------------|
//! | `SET`, `NOT`, `DISPLAY`           | `v`                         |
//! | `ADD`, `SUB`, `MUL`, `DIV`        | `v` (in place) or `v, v`    |
//! | `AND`, `OR`, `XOR`, shifts        | `v, v`                      |
//! | `COMPARE`                         | `v, v`                      |
//! | `JUMP_IF`                         | `label, gate`               |
//!
//! `v` is an identifier or a number. The one-operand arithmetic form reads
//! its destination (`x: ADD 1` means `x = x + 1`).

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::debug;

use crate::ast::*;
use crate::errors::Diagnostic;
use crate::token::Span;

// ── Symbol table ────────────────────────────────────────────────────

/// One 64-bit storage cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub slot: usize,
    /// Span of the defining destination.
    pub defined_at: Span,
}

/// Process-wide mapping from identifier to storage slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    index: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the slot of `name`, allocating the next one on first definition.
    pub fn define(&mut self, name: &str, span: Span) -> usize {
        if let Some(&slot) = self.index.get(name) {
            return slot;
        }
        let slot = self.symbols.len();
        self.symbols.push(Symbol {
            name: name.to_string(),
            slot,
            defined_at: span,
        });
        self.index.insert(name.to_string(), slot);
        slot
    }

    pub fn slot(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Symbols in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

// ── Operand shapes ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgClass {
    /// Identifier or number.
    Value,
    /// Identifier only.
    Name,
}

struct Shape {
    forms: &'static [&'static [ArgClass]],
    expected: &'static str,
}

const ONE: &[ArgClass] = &[ArgClass::Value];
const TWO: &[ArgClass] = &[ArgClass::Value, ArgClass::Value];

fn shape_of(op: Operation) -> Shape {
    match op {
        Operation::Set | Operation::Not | Operation::Display => Shape {
            forms: &[ONE],
            expected: "one operand (identifier or number)",
        },
        Operation::Add | Operation::Sub | Operation::Mul | Operation::Div => Shape {
            forms: &[ONE, TWO],
            expected: "one operand (in place) or two operands",
        },
        Operation::And
        | Operation::Or
        | Operation::Xor
        | Operation::ShiftLeft
        | Operation::ShiftRight
        | Operation::Compare => Shape {
            forms: &[TWO],
            expected: "two operands",
        },
        Operation::JumpIf => Shape {
            forms: &[&[ArgClass::Name, ArgClass::Name]],
            expected: "a flag label and a gate name",
        },
        Operation::Loop => Shape {
            forms: &[&[ArgClass::Name, ArgClass::Name, ArgClass::Name]],
            expected: "counter, step and accumulator identifiers",
        },
    }
}

fn matches_form(args: &[Arg], form: &[ArgClass]) -> bool {
    args.len() == form.len()
        && args.iter().zip(form).all(|(arg, class)| match class {
            ArgClass::Value => true,
            ArgClass::Name => matches!(arg, Arg::Ident(..)),
        })
}

/// A source operand read by a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source<'a> {
    Ident(&'a str, Span),
    Number(i64, Span),
}

impl<'a> Source<'a> {
    fn from_arg(arg: &'a Arg) -> Self {
        match arg {
            Arg::Ident(name, span) => Source::Ident(name, *span),
            Arg::Number(n, span) => Source::Number(*n, *span),
        }
    }
}

impl fmt::Display for Source<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Ident(name, _) => f.write_str(name),
            Source::Number(n, _) => write!(f, "{}", n),
        }
    }
}

/// The left/right operands of a binary statement, with the one-operand
/// arithmetic form expanded to `dest, arg`.
pub fn binary_operands(stmt: &Statement) -> Option<(Source<'_>, Source<'_>)> {
    match stmt.args.as_slice() {
        [rhs] if is_in_place(stmt.op) => Some((
            Source::Ident(&stmt.dest, stmt.dest_span),
            Source::from_arg(rhs),
        )),
        [lhs, rhs] => Some((Source::from_arg(lhs), Source::from_arg(rhs))),
        _ => None,
    }
}

/// The single operand of `SET`, `NOT` and `DISPLAY`.
pub fn unary_operand(stmt: &Statement) -> Option<Source<'_>> {
    match stmt.args.as_slice() {
        [arg] => Some(Source::from_arg(arg)),
        _ => None,
    }
}

fn is_in_place(op: Operation) -> bool {
    matches!(
        op,
        Operation::Add | Operation::Sub | Operation::Mul | Operation::Div
    )
}

// ── Analyzer ────────────────────────────────────────────────────────

/// Result of analysis: the symbol table and every diagnostic found.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub symbols: SymbolTable,
    pub diagnostics: Vec<Diagnostic>,
}

impl Analysis {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Analyze a lowered program.
pub fn analyze(program: &Program) -> Analysis {
    let mut analyzer = Analyzer::default();
    analyzer.collect_gates(program);
    for block in program {
        for stmt in &block.statements {
            analyzer.statement(stmt);
        }
    }
    debug!(
        symbols = analyzer.symbols.len(),
        diagnostics = analyzer.diagnostics.len(),
        "analyzed"
    );
    Analysis {
        symbols: analyzer.symbols,
        diagnostics: analyzer.diagnostics,
    }
}

#[derive(Default)]
struct Analyzer {
    symbols: SymbolTable,
    gates: HashSet<String>,
    reported_undefined: HashSet<String>,
    diagnostics: Vec<Diagnostic>,
}

impl Analyzer {
    /// Gates may be referenced before they are declared, so they are all
    /// registered up front.
    fn collect_gates(&mut self, program: &Program) {
        for block in program {
            if !self.gates.insert(block.gate.clone()) {
                self.diagnostics
                    .push(Diagnostic::duplicate_gate(&block.gate, block.gate_span));
            }
        }
    }

    fn statement(&mut self, stmt: &Statement) {
        let shape = shape_of(stmt.op);
        let shape_ok = shape.forms.iter().any(|form| matches_form(&stmt.args, form));

        if stmt.op == Operation::Loop {
            // Well-formed loops never survive lowering.
            self.diagnostics.push(Diagnostic::arity(
                format!(
                    "LOOP expects {}, got {} argument(s)",
                    shape.expected,
                    stmt.args.len()
                ),
                stmt.span,
            ));
            return;
        }

        if !shape_ok {
            self.diagnostics.push(Diagnostic::arity(
                format!(
                    "{} expects {}, got {} argument(s)",
                    stmt.op,
                    shape.expected,
                    stmt.args.len()
                ),
                stmt.span,
            ));
        } else {
            self.check_sources(stmt);
        }

        if stmt.kind().writes_dest() {
            self.symbols.define(&stmt.dest, stmt.dest_span);
        }
    }

    fn check_sources(&mut self, stmt: &Statement) {
        match stmt.op {
            Operation::JumpIf => {
                // The flag label is never resolved; only the target matters.
                if let Some(Arg::Ident(gate, span)) = stmt.args.get(1) {
                    if !self.gates.contains(gate) {
                        self.diagnostics.push(Diagnostic::unknown_gate(gate, *span));
                    }
                }
            }
            Operation::Set | Operation::Not | Operation::Display => {
                if let Some(src) = unary_operand(stmt) {
                    self.read(src);
                }
            }
            _ => {
                if let Some((lhs, rhs)) = binary_operands(stmt) {
                    self.read(lhs);
                    self.read(rhs);
                    if stmt.op == Operation::Div {
                        if let Source::Number(0, span) = rhs {
                            self.diagnostics.push(Diagnostic::divide_by_zero(span));
                        }
                    }
                }
            }
        }
    }

    fn read(&mut self, src: Source<'_>) {
        if let Source::Ident(name, span) = src {
            if !self.symbols.contains(name) && self.reported_undefined.insert(name.to_string()) {
                self.diagnostics.push(Diagnostic::undefined(name, span));
            }
        }
    }
}
