//! CEL compiler CLI entry point.
//!
//! Usage:
//!   celc compile <main.cel> [-o <dir>] [--target win64|sysv]
//!   celc check <main.cel>      (diagnostics only)
//!   celc run <main.cel>        (reference evaluator, prints DISPLAY values)
//!   celc parse <main.cel>      (dump the lowered AST)
//!   celc lex <main.cel>        (dump tokens)

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser as ClapParser, Subcommand};
use miette::{NamedSource, Report};
use thiserror::Error;
use tracing::info;

use cel_compiler::config::{Options, Target, DEFAULT_STEP_LIMIT};
use cel_compiler::errors::{CompileFailure, Diagnostic};
use cel_compiler::interp::RuntimeError;
use cel_compiler::lexer::Lexer;
use cel_compiler::{interp, logging, lower};

#[derive(ClapParser, Debug)]
#[command(name = "celc", about = "Compiler for the CEL gate language", version)]
struct Cli {
    /// Log filter (trace|debug|info|warn|error or an EnvFilter directive)
    #[arg(long, global = true, env = "CELC_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump the token stream
    Lex { path: PathBuf },
    /// Dump the lowered AST
    Parse { path: PathBuf },
    /// Report diagnostics without emitting code
    Check { path: PathBuf },
    /// Write <stem>.asm for the source file
    Compile(CompileArgs),
    /// Execute with the reference evaluator
    Run {
        path: PathBuf,
        /// Abort after this many executed statements
        #[arg(long, default_value_t = DEFAULT_STEP_LIMIT)]
        max_steps: u64,
    },
}

#[derive(clap::Args, Debug)]
struct CompileArgs {
    path: PathBuf,
    /// Output directory
    #[arg(short = 'o', long = "outdir", default_value = ".")]
    outdir: PathBuf,
    /// Calling convention and object format (win64|sysv)
    #[arg(long, env = "CELC_TARGET", default_value_t = Target::Win64)]
    target: Target,
    /// Omit gate banners and statement comments
    #[arg(long, default_value_t = false)]
    no_comments: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("cannot read '{path}'")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("cannot write '{path}'")]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error(transparent)]
    Compile(#[from] Box<CompileFailure>),
    #[error("{error}")]
    Runtime {
        error: RuntimeError,
        src: NamedSource<String>,
    },
}

impl CliError {
    /// sysexits-style status codes.
    fn code(&self) -> i32 {
        match self {
            CliError::Compile(_) => 65,
            CliError::Runtime { .. } => 70,
            CliError::Read { .. } | CliError::Write { .. } => 74,
        }
    }

    fn report(self) -> Report {
        match self {
            CliError::Compile(failure) => Report::new(*failure),
            CliError::Runtime { error, src } => Report::new(error).with_source_code(src),
            other => Report::msg(format!("{}: {}", other, error_source(&other))),
        }
    }
}

fn error_source(err: &CliError) -> String {
    match err {
        CliError::Read { source, .. } | CliError::Write { source, .. } => source.to_string(),
        _ => String::new(),
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init_with_level(cli.log_level.as_deref());

    let code = match try_main(cli.command) {
        Ok(()) => 0,
        Err(e) => {
            let code = e.code();
            eprintln!("{:?}", e.report());
            code
        }
    };
    process::exit(code);
}

fn try_main(command: Command) -> Result<(), CliError> {
    match command {
        Command::Lex { path } => lex(&path),
        Command::Parse { path } => parse(&path),
        Command::Check { path } => {
            let source = read_source(&path)?;
            cel_compiler::check_named(&display_name(&path), &source).map_err(Box::new)?;
            println!("No errors.");
            Ok(())
        }
        Command::Compile(args) => compile(args),
        Command::Run { path, max_steps } => run(&path, max_steps),
    }
}

fn lex(path: &Path) -> Result<(), CliError> {
    let source = read_source(path)?;
    let mut lexer = Lexer::new(&source);
    for token in lexer.scan_tokens() {
        let (line, col) = token.span.line_col(&source);
        println!("{:>4}:{:<3} {}", line, col, token.kind);
    }
    fail_if_any(path, &source, lexer.into_errors())
}

fn parse(path: &Path) -> Result<(), CliError> {
    let source = read_source(path)?;
    let program = cel_compiler::parse_source(&source)
        .map_err(|diagnostics| compile_failure(path, &source, diagnostics))?;
    let (program, diagnostics) = lower::lower(program);
    for block in &program {
        print!("{}", block);
    }
    fail_if_any(path, &source, diagnostics)
}

fn compile(args: CompileArgs) -> Result<(), CliError> {
    let source = read_source(&args.path)?;
    let options = Options {
        target: args.target,
        emit_comments: !args.no_comments,
    };
    let compilation = cel_compiler::compile_named(&display_name(&args.path), &source, &options)
        .map_err(Box::new)?;

    let stem = args
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let output = args.outdir.join(format!("{}.asm", stem));
    fs::create_dir_all(&args.outdir).map_err(|source| CliError::Write {
        source,
        path: args.outdir.clone(),
    })?;
    fs::write(&output, compilation.assembly()).map_err(|source| CliError::Write {
        source,
        path: output.clone(),
    })?;

    info!(output = %output.display(), target = %options.target, "wrote assembly");
    println!("Compiled to {}", output.display());
    Ok(())
}

fn run(path: &Path, max_steps: u64) -> Result<(), CliError> {
    let source = read_source(path)?;
    let checked = cel_compiler::check_named(&display_name(path), &source).map_err(Box::new)?;
    let execution = interp::run(&checked.program, &checked.symbols, max_steps).map_err(|error| {
        CliError::Runtime {
            error,
            src: NamedSource::new(display_name(path), source.clone()),
        }
    })?;
    for value in &execution.output {
        println!("{}", value);
    }
    Ok(())
}

fn read_source(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| CliError::Read {
        source,
        path: path.to_path_buf(),
    })
}

fn display_name(path: &Path) -> String {
    path.display().to_string()
}

fn compile_failure(path: &Path, source: &str, diagnostics: Vec<Diagnostic>) -> CliError {
    CliError::Compile(Box::new(CompileFailure::new(
        display_name(path),
        source,
        diagnostics,
    )))
}

fn fail_if_any(path: &Path, source: &str, diagnostics: Vec<Diagnostic>) -> Result<(), CliError> {
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(compile_failure(path, source, diagnostics))
    }
}
