//! Emitter — validated, lowered AST to x86-64 assembly.
//!
//! Every statement maps to a fixed instruction group. Values pass through
//! `rax`; `rcx` holds divisors, shift counts and immediates too wide for a
//! sign-extended 32-bit field:
//!
//! | statement            | instructions                                         |
//! |----------------------|------------------------------------------------------|
//! | `d: SET a`           | `mov rax, a` / `mov [d], rax`                        |
//! | `d: ADD a, b`        | `mov rax, a` / `add rax, b` / `mov [d], rax`         |
//! | `d: DIV a, b`        | `mov rax, a` / `xor edx, edx` / `mov rcx, b` / `div rcx` / `mov [d], rax` |
//! | `d: SHIFT_LEFT a, b` | `mov rax, a` / `mov rcx, b` / `shl rax, cl` / `mov [d], rax` |
//! | `d: NOT a`           | `mov rax, a` / `not rax` / `mov [d], rax`            |
//! | `c: COMPARE a, b`    | `mov rax, a` / `cmp rax, b`                          |
//! | `j: JUMP_IF c, g`    | `jne gate_g`                                         |
//! | `o: DISPLAY a`       | load format and value into the ABI registers, `call printf` |
//!
//! The one-operand arithmetic form (`d: ADD a`) reads `d` as the left
//! operand. `DIV` is an unsigned divide and `SHIFT_RIGHT` a logical shift,
//! even though CEL values are signed.
//!
//! # Comparison state
//!
//! `JUMP_IF` branches on the result of the most recent `COMPARE`. The CPU
//! flags only hold that result until the next flag-clobbering instruction,
//! so the emitter threads a [`FlagState`] through every block. When a
//! `JUMP_IF` is reached with flags that may have been clobbered, it first
//! reloads the result from the `cel_cmp_state` byte. In that case every
//! `COMPARE` in the unit also stores its result there with `setne`. The
//! byte starts at zero, so a `JUMP_IF` that runs before any `COMPARE` falls
//! through.
//!
//! Flag liveness is tracked along program order only. Entering a gate by
//! jump keeps it valid: a `jne` leaves the flags as they were, and they
//! always hold the latest result when it executes.

use tracing::debug;

use crate::asm::*;
use crate::ast::*;
use crate::config::{Options, Target};
use crate::sema::{binary_operands, unary_operand, Source, SymbolTable};

/// Whether the CPU flags hold the result of the latest `COMPARE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagState {
    Clobbered,
    Live,
}

impl FlagState {
    /// The state after `stmt` has executed, starting from `self`.
    pub fn after(self, stmt: &Statement) -> FlagState {
        match stmt.op {
            Operation::Compare | Operation::JumpIf => FlagState::Live,
            // Only `mov` and `not`, which leave the flags alone.
            Operation::Set | Operation::Not => self,
            _ => FlagState::Clobbered,
        }
    }
}

/// Whether some `JUMP_IF` must reload the comparison result from memory.
pub fn needs_saved_state(program: &Program) -> bool {
    let mut flags = FlagState::Clobbered;
    for stmt in program.iter().flat_map(|b| &b.statements) {
        if stmt.op == Operation::JumpIf && flags != FlagState::Live {
            return true;
        }
        flags = flags.after(stmt);
    }
    false
}

/// Emit a validated, lowered program.
pub fn emit(program: &Program, symbols: &SymbolTable, options: &Options) -> AsmUnit {
    let mut emitter = Emitter {
        unit: AsmUnit::new(options.target),
        options,
        save_state: needs_saved_state(program),
    };
    emitter.declare_data(program, symbols);
    emitter.prologue();

    let mut flags = FlagState::Clobbered;
    for block in program {
        flags = emitter.block(block, flags);
    }

    emitter.epilogue();
    debug!(
        lines = emitter.unit.text.len(),
        saved_compare = emitter.save_state,
        "emitted"
    );
    emitter.unit
}

struct Emitter<'a> {
    unit: AsmUnit,
    options: &'a Options,
    save_state: bool,
}

impl Emitter<'_> {
    fn declare_data(&mut self, program: &Program, symbols: &SymbolTable) {
        let displays = program
            .iter()
            .flat_map(|b| &b.statements)
            .any(|s| s.op == Operation::Display);
        if displays {
            // One shared format string serves every DISPLAY site.
            self.unit.rodata.push(DataDef {
                label: FMT_LABEL.to_string(),
                bytes: "\"%lld\", 10, 0".to_string(),
            });
            self.unit.externs.push("printf".to_string());
        }

        for symbol in symbols.iter() {
            self.unit.bss.push(BssDef {
                label: var_label(&symbol.name),
                directive: "resq",
                count: 1,
            });
        }
        if self.save_state {
            self.unit.bss.push(BssDef {
                label: CMP_STATE_LABEL.to_string(),
                directive: "resb",
                count: 1,
            });
        }
    }

    fn prologue(&mut self) {
        match self.options.target {
            Target::Win64 => self.unit.push(Instr::Alu(
                AluOp::Sub,
                Operand::Reg(Reg::Rsp),
                Operand::Imm(WIN64_FRAME),
            )),
            Target::SysV => {
                self.unit.push(Instr::Push(Reg::Rbp));
                self.unit
                    .push(Instr::Mov(Operand::Reg(Reg::Rbp), Operand::Reg(Reg::Rsp)));
            }
        }
    }

    fn epilogue(&mut self) {
        if self.options.emit_comments {
            self.unit.comment("--- exit ---");
        }
        match self.options.target {
            Target::Win64 => self.unit.push(Instr::Alu(
                AluOp::Add,
                Operand::Reg(Reg::Rsp),
                Operand::Imm(WIN64_FRAME),
            )),
            Target::SysV => self.unit.push(Instr::Pop(Reg::Rbp)),
        }
        self.unit.push(Instr::Alu(
            AluOp::Xor,
            Operand::Reg(Reg::Eax),
            Operand::Reg(Reg::Eax),
        ));
        self.unit.push(Instr::Ret);
    }

    fn block(&mut self, block: &Block, mut flags: FlagState) -> FlagState {
        if self.options.emit_comments {
            self.unit.comment(format!("--- Gate [{}] ---", block.gate));
        }
        self.unit.label(gate_label(&block.gate));
        for stmt in &block.statements {
            if self.options.emit_comments {
                self.unit.comment(stmt.to_string());
            }
            self.statement(stmt, flags);
            flags = flags.after(stmt);
        }
        flags
    }

    fn statement(&mut self, stmt: &Statement, flags: FlagState) {
        match stmt.op {
            Operation::Set => {
                if let Some(src) = unary_operand(stmt) {
                    self.load_rax(src);
                    self.store_rax(&stmt.dest);
                }
            }
            Operation::Not => {
                if let Some(src) = unary_operand(stmt) {
                    self.load_rax(src);
                    self.unit.push(Instr::Not(Operand::Reg(Reg::Rax)));
                    self.store_rax(&stmt.dest);
                }
            }
            Operation::Add => self.alu(stmt, AluOp::Add),
            Operation::Sub => self.alu(stmt, AluOp::Sub),
            Operation::Mul => self.alu(stmt, AluOp::Imul),
            Operation::And => self.alu(stmt, AluOp::And),
            Operation::Or => self.alu(stmt, AluOp::Or),
            Operation::Xor => self.alu(stmt, AluOp::Xor),
            Operation::Div => {
                if let Some((lhs, rhs)) = binary_operands(stmt) {
                    self.load_rax(lhs);
                    self.unit.push(Instr::Alu(
                        AluOp::Xor,
                        Operand::Reg(Reg::Edx),
                        Operand::Reg(Reg::Edx),
                    ));
                    self.load(Reg::Rcx, rhs);
                    self.unit.push(Instr::Div(Operand::Reg(Reg::Rcx)));
                    self.store_rax(&stmt.dest);
                }
            }
            Operation::ShiftLeft => self.shift(stmt, ShiftOp::Shl),
            Operation::ShiftRight => self.shift(stmt, ShiftOp::Shr),
            Operation::Compare => {
                if let Some((lhs, rhs)) = binary_operands(stmt) {
                    self.load_rax(lhs);
                    let rhs = self.alu_source(rhs);
                    self.unit
                        .push(Instr::Alu(AluOp::Cmp, Operand::Reg(Reg::Rax), rhs));
                    if self.save_state {
                        self.unit.push(Instr::Setne(Operand::CmpState));
                    }
                }
            }
            Operation::JumpIf => {
                if let Some(gate) = stmt.args.get(1).and_then(Arg::as_ident) {
                    if flags != FlagState::Live {
                        self.unit
                            .push(Instr::Alu(AluOp::Cmp, Operand::CmpState, Operand::Imm(0)));
                    }
                    self.unit.push(Instr::Jne(gate.to_string()));
                }
            }
            Operation::Display => {
                if let Some(src) = unary_operand(stmt) {
                    self.display(src);
                }
            }
            // Rejected by analysis; lowering removes every valid LOOP.
            Operation::Loop => {}
        }
    }

    fn alu(&mut self, stmt: &Statement, op: AluOp) {
        if let Some((lhs, rhs)) = binary_operands(stmt) {
            self.load_rax(lhs);
            let rhs = self.alu_source(rhs);
            self.unit.push(Instr::Alu(op, Operand::Reg(Reg::Rax), rhs));
            self.store_rax(&stmt.dest);
        }
    }

    fn shift(&mut self, stmt: &Statement, op: ShiftOp) {
        if let Some((lhs, rhs)) = binary_operands(stmt) {
            self.load_rax(lhs);
            self.load(Reg::Rcx, rhs);
            self.unit.push(Instr::Shift(op, Reg::Cl));
            self.store_rax(&stmt.dest);
        }
    }

    fn display(&mut self, src: Source<'_>) {
        let (fmt_reg, value_reg, via_plt) = match self.options.target {
            Target::Win64 => (Reg::Rcx, Reg::Rdx, false),
            Target::SysV => (Reg::Rdi, Reg::Rsi, true),
        };
        self.unit.push(Instr::LeaRel(fmt_reg, FMT_LABEL.to_string()));
        self.load(value_reg, src);
        // Variadic call: `al` carries the vector register count.
        self.unit.push(Instr::Alu(
            AluOp::Xor,
            Operand::Reg(Reg::Eax),
            Operand::Reg(Reg::Eax),
        ));
        self.unit.push(Instr::Call {
            symbol: "printf".to_string(),
            via_plt,
        });
    }

    fn load_rax(&mut self, src: Source<'_>) {
        self.load(Reg::Rax, src);
    }

    /// `mov reg, src`; 64-bit immediates are legal for register moves.
    fn load(&mut self, reg: Reg, src: Source<'_>) {
        let operand = match src {
            Source::Ident(name, _) => Operand::Var(name.to_string()),
            Source::Number(n, _) => Operand::Imm(n),
        };
        self.unit.push(Instr::Mov(Operand::Reg(reg), operand));
    }

    /// Right-hand ALU operand, materializing wide immediates in `rcx`.
    fn alu_source(&mut self, src: Source<'_>) -> Operand {
        match src {
            Source::Ident(name, _) => Operand::Var(name.to_string()),
            Source::Number(n, _) if Operand::fits_imm32(n) => Operand::Imm(n),
            Source::Number(n, _) => {
                self.unit
                    .push(Instr::Mov(Operand::Reg(Reg::Rcx), Operand::Imm(n)));
                Operand::Reg(Reg::Rcx)
            }
        }
    }

    fn store_rax(&mut self, dest: &str) {
        self.unit
            .push(Instr::Mov(Operand::Var(dest.to_string()), Operand::Reg(Reg::Rax)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::lower::lower;
    use crate::parser::Parser;
    use crate::sema::analyze;

    fn compile_with(source: &str, options: &Options) -> AsmUnit {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.scan_tokens();
        assert!(lexer.errors().is_empty());
        let program = Parser::new(tokens).parse().expect("Parse failed");
        let (program, lowering) = lower(program);
        assert!(lowering.is_empty());
        let analysis = analyze(&program);
        assert!(analysis.is_ok(), "Analysis failed: {:?}", analysis.diagnostics);
        emit(&program, &analysis.symbols, options)
    }

    fn compile_source(source: &str) -> AsmUnit {
        compile_with(source, &Options::default())
    }

    /// Rendered instructions only.
    fn instrs(unit: &AsmUnit) -> Vec<String> {
        unit.instructions().map(|i| i.to_string()).collect()
    }

    fn body(source: &str) -> Vec<String> {
        // Drop the Win64 prologue and the three-instruction epilogue.
        let all = instrs(&compile_source(source));
        all[1..all.len() - 3].to_vec()
    }

    #[test]
    fn test_set_goes_through_rax() {
        assert_eq!(
            body("[g] { x: SET 5; y: SET x; }"),
            vec![
                "mov     rax, 5",
                "mov     qword [var_x], rax",
                "mov     rax, qword [var_x]",
                "mov     qword [var_y], rax",
            ]
        );
    }

    #[test]
    fn test_in_place_and_two_operand_add() {
        let code = body("[g] { x: SET 1; x: ADD 2; y: ADD x, x; }");
        assert_eq!(
            code[2..],
            [
                "mov     rax, qword [var_x]",
                "add     rax, 2",
                "mov     qword [var_x], rax",
                "mov     rax, qword [var_x]",
                "add     rax, qword [var_x]",
                "mov     qword [var_y], rax",
            ]
        );
    }

    #[test]
    fn test_mul_uses_imul() {
        let code = body("[g] { x: SET 3; x: MUL 7; }");
        assert_eq!(code[3], "imul    rax, 7");
    }

    #[test]
    fn test_div_is_unsigned() {
        let code = body("[g] { x: SET 9; y: SET 2; x: DIV x, y; }");
        assert_eq!(
            code[4..],
            [
                "mov     rax, qword [var_x]",
                "xor     edx, edx",
                "mov     rcx, qword [var_y]",
                "div     rcx",
                "mov     qword [var_x], rax",
            ]
        );
        assert!(!code.iter().any(|l| l.starts_with("idiv") || l.starts_with("cqo")));
    }

    #[test]
    fn test_shifts_use_cl() {
        let code = body("[g] { x: SET 3; y: SHIFT_LEFT x, 2; z: SHIFT_RIGHT y, 1; }");
        assert_eq!(
            code[2..6],
            [
                "mov     rax, qword [var_x]",
                "mov     rcx, 2",
                "shl     rax, cl",
                "mov     qword [var_y], rax",
            ]
        );
        assert_eq!(code[8], "shr     rax, cl");
    }

    #[test]
    fn test_not_is_unary() {
        let code = body("[g] { x: SET 1; x: NOT x; }");
        assert_eq!(
            code[2..],
            [
                "mov     rax, qword [var_x]",
                "not     rax",
                "mov     qword [var_x], rax",
            ]
        );
    }

    #[test]
    fn test_wide_immediate_materialized() {
        let code = body("[g] { x: SET 1; x: ADD 4294967296; }");
        assert_eq!(
            code[2..],
            [
                "mov     rax, qword [var_x]",
                "mov     rcx, 4294967296",
                "add     rax, rcx",
                "mov     qword [var_x], rax",
            ]
        );
    }

    #[test]
    fn test_compare_then_jump_uses_live_flags() {
        let unit = compile_source(
            "[top] { x: SET 1; c: COMPARE x, 0; j: JUMP_IF c, top; }",
        );
        let code = instrs(&unit);
        assert!(code.contains(&"cmp     rax, 0".to_string()));
        assert!(code.contains(&"jne     gate_top".to_string()));
        assert!(!code.iter().any(|l| l.contains("cel_cmp_state")));
        assert!(!unit.bss.iter().any(|b| b.label == CMP_STATE_LABEL));
    }

    #[test]
    fn test_clobbered_flags_are_reloaded() {
        let unit = compile_source(
            "[top] { x: SET 1; c: COMPARE x, 0; x: ADD 1; j: JUMP_IF c, top; }",
        );
        let code = instrs(&unit);
        let setne = code
            .iter()
            .position(|l| l == "setne   byte [cel_cmp_state]")
            .expect("COMPARE must save its result");
        let reload = code
            .iter()
            .position(|l| l == "cmp     byte [cel_cmp_state], 0")
            .expect("JUMP_IF must reload");
        assert!(setne < reload);
        assert_eq!(code[reload + 1], "jne     gate_top");
        assert!(unit.bss.iter().any(|b| b.label == CMP_STATE_LABEL));
    }

    #[test]
    fn test_set_keeps_flags_live_across_blocks() {
        let program = "[a] { x: SET 1; c: COMPARE x, 1; } [b] { y: SET 2; j: JUMP_IF c, a; }";
        let code = instrs(&compile_source(program));
        assert!(!code.iter().any(|l| l.contains("cel_cmp_state")));
    }

    #[test]
    fn test_jump_before_any_compare_reloads() {
        let code = instrs(&compile_source("[a] { j: JUMP_IF c, a; }"));
        assert_eq!(code[1], "cmp     byte [cel_cmp_state], 0");
    }

    #[test]
    fn test_display_win64() {
        let unit = compile_source("[g] { x: SET 42; o: DISPLAY x; }");
        let code = instrs(&unit);
        assert_eq!(
            code[3..7],
            [
                "lea     rcx, [rel fmt_dec]",
                "mov     rdx, qword [var_x]",
                "xor     eax, eax",
                "call    printf",
            ]
        );
        assert_eq!(unit.externs, vec!["printf".to_string()]);
        assert_eq!(unit.rodata.len(), 1);
    }

    #[test]
    fn test_display_sysv() {
        let unit = compile_with(
            "[g] { o: DISPLAY 7; }",
            &Options::for_target(Target::SysV),
        );
        let code = instrs(&unit);
        assert_eq!(
            code,
            vec![
                "push    rbp",
                "mov     rbp, rsp",
                "lea     rdi, [rel fmt_dec]",
                "mov     rsi, 7",
                "xor     eax, eax",
                "call    printf wrt ..plt",
                "pop     rbp",
                "xor     eax, eax",
                "ret",
            ]
        );
    }

    #[test]
    fn test_each_display_is_its_own_call() {
        let code = instrs(&compile_source(
            "[g] { a: SET 1; o: DISPLAY a; o: DISPLAY a; o: DISPLAY 3; }",
        ));
        assert_eq!(code.iter().filter(|l| l.starts_with("call")).count(), 3);
    }

    #[test]
    fn test_no_display_no_printf() {
        let unit = compile_source("[g] { a: SET 1; }");
        assert!(unit.externs.is_empty());
        assert!(unit.rodata.is_empty());
    }

    #[test]
    fn test_storage_per_symbol() {
        let unit = compile_source("[a] { x: SET 1; y: SET 2; } [b] { x: ADD y; }");
        let labels: Vec<&str> = unit.bss.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["var_x", "var_y"]);
    }

    #[test]
    fn test_gates_become_labels_in_order() {
        let unit = compile_source("[first] { } [second] { }");
        let labels: Vec<&str> = unit
            .text
            .iter()
            .filter_map(|l| match l {
                Line::Label(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(labels, vec!["gate_first", "gate_second"]);
    }

    #[test]
    fn test_loop_lowering_emits_back_edge() {
        let text = compile_source(
            "[main] { c: SET 20; s: SET 3; a: SET 1; l: LOOP c, s, a; o: DISPLAY a; }",
        )
        .to_string();
        assert!(text.contains("gate_LOOP_Block:\n"));
        assert!(text.contains("jne     gate_LOOP_Block\n"));
        assert!(text.contains("gate_LOOP_Block_exit:\n"));
    }

    #[test]
    fn test_comments_toggle() {
        let source = "[g] { x: SET 1; }";
        let with = compile_source(source).to_string();
        assert!(with.contains("    ; --- Gate [g] ---\n"));
        assert!(with.contains("    ; x: SET 1\n"));

        let options = Options {
            emit_comments: false,
            ..Options::default()
        };
        let without = compile_with(source, &options).to_string();
        assert!(!without.contains("    ;"));
    }

    #[test]
    fn test_deterministic() {
        let source = "[main] { c: SET 5; s: SET 2; a: SET 1; l: LOOP c, s, a; o: DISPLAY a; }";
        assert_eq!(
            compile_source(source).to_string(),
            compile_source(source).to_string()
        );
    }
}
