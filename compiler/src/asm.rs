//! Structured x86-64 assembly and its NASM rendering.
//!
//! The emitter builds an [`AsmUnit`] rather than writing text directly, so
//! tests can inspect instructions and rendering stays in one place. The
//! `Display` impl produces the final `.asm` file. Rendering is a pure
//! function of the unit, which keeps output byte-identical across runs.
//!
//! Naming: storage cells are `var_<name>` and gate labels `gate_<name>`.
//! The prefixes keep user identifiers out of NASM's register and keyword
//! namespace (`rax`, `byte`, ...) and away from `main` and `printf`.

use std::fmt;

use crate::config::Target;

/// Label of the `printf` format string.
pub const FMT_LABEL: &str = "fmt_dec";

/// Byte cell holding the outcome of the latest `COMPARE` (1 = not equal).
pub const CMP_STATE_LABEL: &str = "cel_cmp_state";

/// Stack adjustment for the Win64 frame: 32 bytes of shadow space plus 8 to
/// realign `rsp` to 16 after the return address push.
pub const WIN64_FRAME: i64 = 40;

pub fn var_label(name: &str) -> String {
    format!("var_{}", name)
}

pub fn gate_label(name: &str) -> String {
    format!("gate_{}", name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    Rax,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rsp,
    Rbp,
    Eax,
    Edx,
    Cl,
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reg::Rax => "rax",
            Reg::Rcx => "rcx",
            Reg::Rdx => "rdx",
            Reg::Rsi => "rsi",
            Reg::Rdi => "rdi",
            Reg::Rsp => "rsp",
            Reg::Rbp => "rbp",
            Reg::Eax => "eax",
            Reg::Edx => "edx",
            Reg::Cl => "cl",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Imm(i64),
    /// `qword [var_<name>]`
    Var(String),
    /// `byte [cel_cmp_state]`
    CmpState,
}

impl Operand {
    /// Whether `n` can be encoded as a sign-extended 32-bit immediate.
    pub fn fits_imm32(n: i64) -> bool {
        i32::try_from(n).is_ok()
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(f, "{}", reg),
            Operand::Imm(n) => write!(f, "{}", n),
            Operand::Var(name) => write!(f, "qword [{}]", var_label(name)),
            Operand::CmpState => write!(f, "byte [{}]", CMP_STATE_LABEL),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Imul,
    And,
    Or,
    Xor,
    Cmp,
}

impl fmt::Display for AluOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::Imul => "imul",
            AluOp::And => "and",
            AluOp::Or => "or",
            AluOp::Xor => "xor",
            AluOp::Cmp => "cmp",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Shl,
    Shr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    /// `mov dst, src`
    Mov(Operand, Operand),
    /// Two-operand ALU instruction, `op dst, src`.
    Alu(AluOp, Operand, Operand),
    Not(Operand),
    /// Unsigned `div` of `rdx:rax` by the operand.
    Div(Operand),
    /// Shift `rax` by `cl`.
    Shift(ShiftOp, Reg),
    Setne(Operand),
    Jne(String),
    /// `lea reg, [rel label]`
    LeaRel(Reg, String),
    Call { symbol: String, via_plt: bool },
    Push(Reg),
    Pop(Reg),
    Ret,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Mov(dst, src) => write!(f, "{:<8}{}, {}", "mov", dst, src),
            Instr::Alu(op, dst, src) => write!(f, "{:<8}{}, {}", op.to_string(), dst, src),
            Instr::Not(operand) => write!(f, "{:<8}{}", "not", operand),
            Instr::Div(operand) => write!(f, "{:<8}{}", "div", operand),
            Instr::Shift(ShiftOp::Shl, count) => write!(f, "{:<8}rax, {}", "shl", count),
            Instr::Shift(ShiftOp::Shr, count) => write!(f, "{:<8}rax, {}", "shr", count),
            Instr::Setne(operand) => write!(f, "{:<8}{}", "setne", operand),
            Instr::Jne(gate) => write!(f, "{:<8}{}", "jne", gate_label(gate)),
            Instr::LeaRel(reg, label) => write!(f, "{:<8}{}, [rel {}]", "lea", reg, label),
            Instr::Call { symbol, via_plt } => {
                write!(f, "{:<8}{}", "call", symbol)?;
                if *via_plt {
                    write!(f, " wrt ..plt")?;
                }
                Ok(())
            }
            Instr::Push(reg) => write!(f, "{:<8}{}", "push", reg),
            Instr::Pop(reg) => write!(f, "{:<8}{}", "pop", reg),
            Instr::Ret => f.write_str("ret"),
        }
    }
}

/// One line of the text section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Label(String),
    Comment(String),
    Instr(Instr),
}

/// A read-only data definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDef {
    pub label: String,
    /// NASM `db` operand list, e.g. `"%lld", 10, 0`.
    pub bytes: String,
}

/// An uninitialized storage reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BssDef {
    pub label: String,
    /// `resq` or `resb`.
    pub directive: &'static str,
    pub count: usize,
}

/// A complete assembly file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmUnit {
    pub target: Target,
    pub rodata: Vec<DataDef>,
    pub bss: Vec<BssDef>,
    pub externs: Vec<String>,
    pub entry: String,
    pub text: Vec<Line>,
}

impl AsmUnit {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            rodata: Vec::new(),
            bss: Vec::new(),
            externs: Vec::new(),
            entry: "main".to_string(),
            text: Vec::new(),
        }
    }

    pub fn push(&mut self, instr: Instr) {
        self.text.push(Line::Instr(instr));
    }

    pub fn label(&mut self, label: impl Into<String>) {
        self.text.push(Line::Label(label.into()));
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.text.push(Line::Comment(text.into()));
    }

    /// All instructions in order, without labels or comments.
    pub fn instructions(&self) -> impl Iterator<Item = &Instr> {
        self.text.iter().filter_map(|line| match line {
            Line::Instr(instr) => Some(instr),
            _ => None,
        })
    }

    fn rodata_section(&self) -> &'static str {
        match self.target {
            Target::Win64 => ".rdata",
            Target::SysV => ".rodata",
        }
    }
}

impl fmt::Display for AsmUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "; generated by celc (target: {}, nasm -f {})",
            self.target,
            self.target.nasm_format()
        )?;
        writeln!(f, "bits 64")?;
        writeln!(f, "default rel")?;

        if !self.rodata.is_empty() {
            writeln!(f)?;
            writeln!(f, "section {}", self.rodata_section())?;
            for data in &self.rodata {
                writeln!(f, "    {:<16} db {}", data.label, data.bytes)?;
            }
        }

        if !self.bss.is_empty() {
            writeln!(f)?;
            writeln!(f, "section .bss")?;
            for cell in &self.bss {
                writeln!(f, "    {:<16} {} {}", cell.label, cell.directive, cell.count)?;
            }
        }

        writeln!(f)?;
        writeln!(f, "section .text")?;
        writeln!(f, "    global {}", self.entry)?;
        for name in &self.externs {
            writeln!(f, "    extern {}", name)?;
        }
        writeln!(f)?;
        writeln!(f, "{}:", self.entry)?;
        for line in &self.text {
            match line {
                Line::Label(label) => writeln!(f, "{}:", label)?,
                Line::Comment(text) => writeln!(f, "    ; {}", text)?,
                Line::Instr(instr) => writeln!(f, "    {}", instr)?,
            }
        }

        if self.target == Target::SysV {
            writeln!(f)?;
            writeln!(f, "section .note.GNU-stack noalloc noexec nowrite progbits")?;
        }
        Ok(())
    }
}
