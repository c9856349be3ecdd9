//! Compilation options.
//!
//! The library takes an [`Options`] value; the `celc` binary fills it from
//! command-line flags and `CELC_*` environment variables.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Platform calling convention and object format the assembly is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Target {
    /// Windows x64 (`nasm -f win64`, MinGW-w64 `printf`).
    #[default]
    Win64,
    /// System V AMD64 (`nasm -f elf64`, glibc `printf` through the PLT).
    SysV,
}

impl Target {
    pub fn name(self) -> &'static str {
        match self {
            Target::Win64 => "win64",
            Target::SysV => "sysv",
        }
    }

    /// The `nasm -f` object format matching this target.
    pub fn nasm_format(self) -> &'static str {
        match self {
            Target::Win64 => "win64",
            Target::SysV => "elf64",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown target '{0}' (expected win64 or sysv)")]
pub struct UnknownTarget(String);

impl FromStr for Target {
    type Err = UnknownTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "win64" | "windows" => Ok(Target::Win64),
            "sysv" | "elf64" | "linux" => Ok(Target::SysV),
            _ => Err(UnknownTarget(s.to_string())),
        }
    }
}

/// Step budget for the reference evaluator.
pub const DEFAULT_STEP_LIMIT: u64 = 10_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub target: Target,
    /// Annotate the assembly with gate banners and the source statement
    /// above each instruction group.
    pub emit_comments: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            target: Target::default(),
            emit_comments: true,
        }
    }
}

impl Options {
    pub fn for_target(target: Target) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }
}
