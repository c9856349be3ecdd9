//! Lowering — expands `LOOP` into an explicit back-edge gate.
//!
//! `LOOP` is sugar and has no instruction of its own. A well-formed
//! `LOOP counter, step, accumulator` splits its block in two and inserts a
//! synthesized gate in between:
//!
//! ```text
//! [main] { a; n: LOOP counter, step, acc; b; }
//!
//! [main]            { a; }
//! [LOOP_Block]      { acc: MUL acc, step;
//!                     counter: SUB counter, 1;
//!                     comparison: COMPARE counter, 0;
//!                     continue: JUMP_IF comparison, LOOP_Block; }
//! [LOOP_Block_exit] { b; }
//! ```
//!
//! Control falls from `main` into the loop gate, the `JUMP_IF` jumps back
//! while the counter is non-zero, and execution continues into the
//! continuation gate. The continuation only exists when statements follow
//! the `LOOP`. The counter is always decremented by one; `step` only scales
//! the accumulator.
//!
//! Later loops get `LOOP_Block_1`, `LOOP_Block_2`, ... A synthesized name
//! that collides with a user gate is a `DuplicateGateError`, never a silent
//! rename. Malformed `LOOP` statements are left untouched so the analyzer
//! can report their arity.

use std::collections::HashSet;

use tracing::debug;

use crate::ast::*;
use crate::errors::Diagnostic;
use crate::token::Span;

/// Base name of synthesized loop gates.
pub const LOOP_GATE: &str = "LOOP_Block";

/// Suffix of the continuation gate that follows a loop gate.
pub const EXIT_SUFFIX: &str = "_exit";

/// Expand every well-formed `LOOP` in `program`.
pub fn lower(program: Program) -> (Program, Vec<Diagnostic>) {
    let mut lowering = LoopLowering {
        user_gates: program.iter().map(|b| b.gate.clone()).collect(),
        next_index: 0,
        diagnostics: Vec::new(),
    };

    let mut out = Vec::with_capacity(program.len());
    for block in program {
        lowering.lower_block(block, &mut out);
    }
    debug!(
        loops = lowering.next_index,
        blocks = out.len(),
        "lowered loops"
    );
    (out, lowering.diagnostics)
}

struct LoopLowering {
    user_gates: HashSet<String>,
    next_index: usize,
    diagnostics: Vec<Diagnostic>,
}

impl LoopLowering {
    fn lower_block(&mut self, block: Block, out: &mut Program) {
        let total = block.statements.len();
        let mut current = Block {
            gate: block.gate,
            gate_span: block.gate_span,
            statements: Vec::new(),
            origin: block.origin,
        };

        for (i, stmt) in block.statements.into_iter().enumerate() {
            let Some([counter, step, acc]) = loop_operands(&stmt) else {
                current.statements.push(stmt);
                continue;
            };

            let name = self.fresh_gate_name();
            let exit = format!("{}{}", name, EXIT_SUFFIX);
            let has_tail = i + 1 < total;
            if self.user_gates.contains(&name) {
                self.report_collision(&name, stmt.span);
                continue;
            }
            if has_tail && self.user_gates.contains(&exit) {
                self.report_collision(&exit, stmt.span);
                continue;
            }

            debug!(gate = %name, counter = %counter.0, "expanding LOOP");
            let loop_block = synthesize_loop(&name, counter, step, acc, stmt.span);
            let finished = std::mem::replace(
                &mut current,
                Block {
                    gate: exit,
                    gate_span: stmt.span,
                    statements: Vec::new(),
                    origin: Origin::Synthesized,
                },
            );
            out.push(finished);
            out.push(loop_block);
        }

        if current.origin == Origin::User || !current.statements.is_empty() {
            out.push(current);
        }
    }

    fn fresh_gate_name(&mut self) -> String {
        let name = match self.next_index {
            0 => LOOP_GATE.to_string(),
            n => format!("{}_{}", LOOP_GATE, n),
        };
        self.next_index += 1;
        name
    }

    fn report_collision(&mut self, name: &str, span: Span) {
        self.diagnostics.push(
            Diagnostic::duplicate_gate(name, span)
                .with_help(format!("rename the user gate '{}'; it is reserved for LOOP", name)),
        );
    }
}

type Operand = (String, Span);

/// `Some([counter, step, accumulator])` for a `LOOP` with three identifiers.
fn loop_operands(stmt: &Statement) -> Option<[Operand; 3]> {
    if stmt.op != Operation::Loop {
        return None;
    }
    match stmt.args.as_slice() {
        [Arg::Ident(c, cs), Arg::Ident(s, ss), Arg::Ident(a, as_)] => Some([
            (c.clone(), *cs),
            (s.clone(), *ss),
            (a.clone(), *as_),
        ]),
        _ => None,
    }
}

fn synthesize_loop(
    gate: &str,
    (counter, counter_span): Operand,
    (step, step_span): Operand,
    (acc, acc_span): Operand,
    span: Span,
) -> Block {
    let stmt = |dest: &str, dest_span: Span, op: Operation, args: Vec<Arg>| Statement {
        dest: dest.to_string(),
        dest_span,
        op,
        op_span: span,
        args,
        span,
    };

    Block {
        gate: gate.to_string(),
        gate_span: span,
        statements: vec![
            stmt(
                &acc,
                acc_span,
                Operation::Mul,
                vec![Arg::Ident(acc.clone(), acc_span), Arg::Ident(step, step_span)],
            ),
            stmt(
                &counter,
                counter_span,
                Operation::Sub,
                vec![Arg::Ident(counter.clone(), counter_span), Arg::Number(1, span)],
            ),
            stmt(
                "comparison",
                span,
                Operation::Compare,
                vec![Arg::Ident(counter.clone(), counter_span), Arg::Number(0, span)],
            ),
            stmt(
                "continue",
                span,
                Operation::JumpIf,
                vec![
                    Arg::Ident("comparison".to_string(), span),
                    Arg::Ident(gate.to_string(), span),
                ],
            ),
        ],
        origin: Origin::Synthesized,
    }
}
