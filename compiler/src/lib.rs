//! CEL Compiler — gate-structured CEL source to x86-64 NASM assembly.
//!
//! # Compiler Pipeline
//!
//! ```text
//! Source Code (.cel)
//!     │
//!     ▼
//! ┌──────────┐
//! │  Lexer    │  Tokens with byte spans; skips whitespace and // comments
//! └────┬─────┘
//!      │
//!      ▼
//! ┌──────────┐
//! │  Parser   │  LL(1) recursive descent, stops at the first syntax error
//! └────┬─────┘
//!      │
//!      ▼
//! ┌──────────┐
//! │  Lower    │  LOOP → synthesized LOOP_Block gate with a back-edge
//! └────┬─────┘
//!      │
//!      ▼
//! ┌──────────┐
//! │  Sema     │  Arity, symbols, undefined names, literal /0, duplicate gates
//! └────┬─────┘
//!      │
//!      ▼
//! ┌──────────┐
//! │  Emitter  │  Flat symbol table → .bss cells, gates → labels
//! └────┬─────┘
//!      │
//!      ▼
//! Assembly (.asm, nasm -f win64 | elf64)
//! ```
//!
//! Lexical and syntax errors end compilation at once. Lowering and analysis
//! collect every diagnostic they find, and code is only emitted for a unit
//! with none.

pub mod asm;
pub mod ast;
pub mod config;
pub mod emitter;
pub mod errors;
pub mod interp;
pub mod lexer;
pub mod logging;
pub mod lower;
pub mod parser;
pub mod sema;
pub mod token;

use tracing::{debug, instrument};

use ast::Program;
use config::Options;
use errors::{CompileFailure, Diagnostic};
use lexer::Lexer;
use parser::Parser;
use sema::SymbolTable;

/// Name used for sources that do not come from a file.
const ANONYMOUS_SOURCE: &str = "<input>";

/// A program that passed every check.
#[derive(Debug, Clone)]
pub struct Checked {
    /// The lowered program.
    pub program: Program,
    pub symbols: SymbolTable,
}

/// A successfully compiled unit.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub program: Program,
    pub symbols: SymbolTable,
    pub asm: asm::AsmUnit,
}

impl Compilation {
    /// The rendered assembly file.
    pub fn assembly(&self) -> String {
        self.asm.to_string()
    }
}

pub fn compile(source: &str, options: &Options) -> Result<Compilation, CompileFailure> {
    compile_named(ANONYMOUS_SOURCE, source, options)
}

/// Compile `source`, naming it `name` in diagnostics.
#[instrument(skip(source, options), fields(target = %options.target))]
pub fn compile_named(
    name: &str,
    source: &str,
    options: &Options,
) -> Result<Compilation, CompileFailure> {
    let Checked { program, symbols } = check_named(name, source)?;
    let asm = emitter::emit(&program, &symbols, options);
    Ok(Compilation {
        program,
        symbols,
        asm,
    })
}

/// Run every stage except emission.
pub fn check(source: &str) -> Result<Checked, CompileFailure> {
    check_named(ANONYMOUS_SOURCE, source)
}

#[instrument(skip(source), fields(bytes = source.len()))]
pub fn check_named(name: &str, source: &str) -> Result<Checked, CompileFailure> {
    let fail = |diagnostics: Vec<Diagnostic>| CompileFailure::new(name, source, diagnostics);

    let program = parse_source(source).map_err(fail)?;
    let (program, mut diagnostics) = lower::lower(program);
    let analysis = sema::analyze(&program);
    diagnostics.extend(analysis.diagnostics);

    if !diagnostics.is_empty() {
        debug!(errors = diagnostics.len(), "checks failed");
        return Err(fail(diagnostics));
    }
    Ok(Checked {
        program,
        symbols: analysis.symbols,
    })
}

/// Lex and parse without lowering. Lexer errors all surface together; the
/// parser contributes at most one.
pub fn parse_source(source: &str) -> Result<Program, Vec<Diagnostic>> {
    let mut lexer = Lexer::new(source);
    let tokens = lexer.scan_tokens();
    let lex_errors = lexer.into_errors();
    if !lex_errors.is_empty() {
        return Err(lex_errors);
    }
    debug!(tokens = tokens.len(), "lexed");

    let program = Parser::new(tokens).parse().map_err(|e| vec![e])?;
    debug!(blocks = program.len(), "parsed");
    Ok(program)
}
