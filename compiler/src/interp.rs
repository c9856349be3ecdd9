//! Reference evaluator for lowered programs.
//!
//! Executes the same machine the emitter targets: one zero-initialized
//! 64-bit cell per symbol, a single comparison state, and fall-through
//! between blocks in program order. Arithmetic wraps, `DIV` is unsigned,
//! `SHIFT_RIGHT` is logical and shift counts are taken modulo 64.

use std::cmp::Ordering;
use std::collections::HashMap;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;
use tracing::{debug, trace};

use crate::ast::*;
use crate::sema::{binary_operands, unary_operand, Source, SymbolTable};
use crate::token::Span;

#[derive(Error, Debug, Clone, PartialEq, Eq, MietteDiagnostic)]
pub enum RuntimeError {
    #[error("division by zero in gate '{gate}'")]
    #[diagnostic(code(cel::runtime::divide_by_zero))]
    DivideByZero {
        gate: String,
        #[label("divisor is zero here")]
        span: Span,
    },

    #[error("step limit of {limit} exceeded")]
    #[diagnostic(
        code(cel::runtime::step_limit),
        help("the program may not terminate; raise --max-steps to run longer")
    )]
    StepLimit { limit: u64 },

    #[error("'{name}' has no storage")]
    #[diagnostic(code(cel::runtime::unbound_symbol))]
    UnboundSymbol {
        name: String,
        #[label("no storage cell")]
        span: Span,
    },

    #[error("jump to unknown gate '{name}'")]
    #[diagnostic(code(cel::runtime::unknown_gate))]
    UnknownGate {
        name: String,
        #[label("jump target")]
        span: Span,
    },

    #[error("LOOP must be lowered before it can run")]
    #[diagnostic(code(cel::runtime::unlowered_loop))]
    UnloweredLoop {
        #[label]
        span: Span,
    },
}

/// Final state of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Every `DISPLAY`ed value, in order.
    pub output: Vec<i64>,
    /// Cell contents, indexed by symbol slot.
    pub memory: Vec<i64>,
    pub steps: u64,
    names: HashMap<String, usize>,
}

impl Execution {
    pub fn get(&self, name: &str) -> Option<i64> {
        self.names.get(name).map(|&slot| self.memory[slot])
    }
}

/// Run `program` to completion.
///
/// The program must already be lowered and free of diagnostics.
pub fn run(
    program: &Program,
    symbols: &SymbolTable,
    step_limit: u64,
) -> Result<Execution, RuntimeError> {
    let mut machine = Machine {
        symbols,
        gates: program
            .iter()
            .enumerate()
            .map(|(i, b)| (b.gate.as_str(), i))
            .collect(),
        memory: vec![0; symbols.len()],
        comparison: None,
        output: Vec::new(),
        steps: 0,
    };

    let mut block = 0;
    let mut index = 0;
    while let Some(current) = program.get(block) {
        let Some(stmt) = current.statements.get(index) else {
            block += 1;
            index = 0;
            continue;
        };

        if machine.steps >= step_limit {
            return Err(RuntimeError::StepLimit { limit: step_limit });
        }
        machine.steps += 1;

        match machine.step(&current.gate, stmt)? {
            Flow::Next => index += 1,
            Flow::Jump(target) => {
                block = target;
                index = 0;
            }
        }
    }

    debug!(
        steps = machine.steps,
        displayed = machine.output.len(),
        "program finished"
    );
    Ok(Execution {
        output: machine.output,
        memory: machine.memory,
        steps: machine.steps,
        names: symbols.iter().map(|s| (s.name.clone(), s.slot)).collect(),
    })
}

enum Flow {
    Next,
    Jump(usize),
}

struct Machine<'p> {
    symbols: &'p SymbolTable,
    gates: HashMap<&'p str, usize>,
    memory: Vec<i64>,
    /// `None` until the first `COMPARE` runs.
    comparison: Option<Ordering>,
    output: Vec<i64>,
    steps: u64,
}

impl Machine<'_> {
    fn step(&mut self, gate: &str, stmt: &Statement) -> Result<Flow, RuntimeError> {
        trace!(gate, statement = %stmt, "step");
        match stmt.op {
            Operation::Set => {
                let value = self.unary(stmt)?;
                self.store(stmt, value)?;
            }
            Operation::Not => {
                let value = self.unary(stmt)?;
                self.store(stmt, !value)?;
            }
            Operation::Add => self.binary(stmt, i64::wrapping_add)?,
            Operation::Sub => self.binary(stmt, i64::wrapping_sub)?,
            Operation::Mul => self.binary(stmt, i64::wrapping_mul)?,
            Operation::And => self.binary(stmt, |a, b| a & b)?,
            Operation::Or => self.binary(stmt, |a, b| a | b)?,
            Operation::Xor => self.binary(stmt, |a, b| a ^ b)?,
            Operation::ShiftLeft => {
                self.binary(stmt, |a, b| ((a as u64) << (b & 63)) as i64)?
            }
            Operation::ShiftRight => {
                self.binary(stmt, |a, b| ((a as u64) >> (b & 63)) as i64)?
            }
            Operation::Div => {
                let (lhs, rhs) = self.operands(stmt)?;
                if rhs == 0 {
                    return Err(RuntimeError::DivideByZero {
                        gate: gate.to_string(),
                        span: stmt.span,
                    });
                }
                self.store(stmt, ((lhs as u64) / (rhs as u64)) as i64)?;
            }
            Operation::Compare => {
                let (lhs, rhs) = self.operands(stmt)?;
                self.comparison = Some(lhs.cmp(&rhs));
            }
            Operation::JumpIf => {
                let taken = matches!(
                    self.comparison,
                    Some(Ordering::Less | Ordering::Greater)
                );
                if taken {
                    return self.jump(stmt).map(Flow::Jump);
                }
            }
            Operation::Display => {
                let value = self.unary(stmt)?;
                self.output.push(value);
            }
            Operation::Loop => return Err(RuntimeError::UnloweredLoop { span: stmt.span }),
        }
        Ok(Flow::Next)
    }

    fn jump(&self, stmt: &Statement) -> Result<usize, RuntimeError> {
        let (name, span) = match stmt.args.get(1) {
            Some(Arg::Ident(name, span)) => (name.as_str(), *span),
            _ => ("", stmt.span),
        };
        self.gates
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownGate {
                name: name.to_string(),
                span,
            })
    }

    fn binary(
        &mut self,
        stmt: &Statement,
        op: impl Fn(i64, i64) -> i64,
    ) -> Result<(), RuntimeError> {
        let (lhs, rhs) = self.operands(stmt)?;
        self.store(stmt, op(lhs, rhs))
    }

    fn operands(&self, stmt: &Statement) -> Result<(i64, i64), RuntimeError> {
        let (lhs, rhs) = binary_operands(stmt).ok_or(RuntimeError::UnboundSymbol {
            name: stmt.dest.clone(),
            span: stmt.span,
        })?;
        Ok((self.value(lhs)?, self.value(rhs)?))
    }

    fn unary(&self, stmt: &Statement) -> Result<i64, RuntimeError> {
        let src = unary_operand(stmt).ok_or(RuntimeError::UnboundSymbol {
            name: stmt.dest.clone(),
            span: stmt.span,
        })?;
        self.value(src)
    }

    fn value(&self, src: Source<'_>) -> Result<i64, RuntimeError> {
        match src {
            Source::Number(n, _) => Ok(n),
            Source::Ident(name, span) => Ok(self.memory[self.slot(name, span)?]),
        }
    }

    fn store(&mut self, stmt: &Statement, value: i64) -> Result<(), RuntimeError> {
        let slot = self.slot(&stmt.dest, stmt.dest_span)?;
        self.memory[slot] = value;
        Ok(())
    }

    fn slot(&self, name: &str, span: Span) -> Result<usize, RuntimeError> {
        self.symbols
            .slot(name)
            .ok_or_else(|| RuntimeError::UnboundSymbol {
                name: name.to_string(),
                span,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_STEP_LIMIT;
    use crate::lexer::Lexer;
    use crate::lower::lower;
    use crate::parser::Parser;
    use crate::sema::analyze;

    fn execute_with_limit(source: &str, limit: u64) -> Result<Execution, RuntimeError> {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.scan_tokens();
        assert!(lexer.errors().is_empty());
        let program = Parser::new(tokens).parse().expect("Parse failed");
        let (program, lowering) = lower(program);
        assert!(lowering.is_empty());
        let analysis = analyze(&program);
        assert!(analysis.is_ok(), "Analysis failed: {:?}", analysis.diagnostics);
        run(&program, &analysis.symbols, limit)
    }

    fn execute(source: &str) -> Execution {
        execute_with_limit(source, DEFAULT_STEP_LIMIT).expect("Runtime error")
    }

    #[test]
    fn test_power_via_loop() {
        let exec = execute(
            r#"
            [main] {
                counter: SET 20;
                step: SET 3;
                result: SET 1;
                run: LOOP counter, step, result;
                out: DISPLAY result;
            }
        "#,
        );
        assert_eq!(exec.get("result"), Some(3i64.wrapping_pow(20)));
        assert_eq!(exec.get("counter"), Some(0));
        assert_eq!(exec.output, vec![3486784401]);
    }

    #[test]
    fn test_loop_wraps_on_overflow() {
        let exec = execute(
            "[main] { c: SET 41; s: SET 3; a: SET 1; l: LOOP c, s, a; }",
        );
        assert_eq!(exec.get("a"), Some(3i64.wrapping_pow(41)));
    }

    #[test]
    fn test_bitwise_values() {
        let exec = execute(
            r#"
            [main] {
                three: SET 3; two: SET 2; twelve: SET 12; one: SET 1; mask: SET 255;
                a: SHIFT_LEFT three, two;
                b: SHIFT_RIGHT twelve, one;
                c: AND twelve, mask;
                d: NOT one;
                e: OR three, twelve;
                f: XOR three, one;
            }
        "#,
        );
        assert_eq!(exec.get("a"), Some(12));
        assert_eq!(exec.get("b"), Some(6));
        assert_eq!(exec.get("c"), Some(12));
        assert_eq!(exec.get("d"), Some(-2));
        assert_eq!(exec.get("e"), Some(15));
        assert_eq!(exec.get("f"), Some(2));
    }

    #[test]
    fn test_shift_right_is_logical() {
        let exec = execute("[g] { m: NOT 7; one: SET 1; r: SHIFT_RIGHT m, one; }");
        assert_eq!(exec.get("r"), Some(((-8i64 as u64) >> 1) as i64));
    }

    #[test]
    fn test_div_is_unsigned() {
        let exec = execute("[g] { a: NOT 3; b: SET 2; q: DIV a, b; r: SET 7; r: DIV 2; }");
        assert_eq!(exec.get("q"), Some(((-4i64 as u64) / 2) as i64));
        assert_eq!(exec.get("r"), Some(3));
    }

    #[test]
    fn test_in_place_arithmetic() {
        let exec = execute("[g] { x: SET 10; x: ADD 5; x: SUB 3; x: MUL 2; }");
        assert_eq!(exec.get("x"), Some(24));
    }

    #[test]
    fn test_jump_if_not_taken_after_equal() {
        let exec = execute(
            r#"
            [main] { x: SET 5; five: SET 5; c: COMPARE x, five; j: JUMP_IF c, skip; o: DISPLAY 1; }
            [skip] { p: DISPLAY 2; }
        "#,
        );
        assert_eq!(exec.output, vec![1, 2]);
    }

    #[test]
    fn test_jump_if_taken_after_unequal() {
        let exec = execute(
            r#"
            [main] { x: SET 5; six: SET 6; c: COMPARE x, six; j: JUMP_IF c, skip; o: DISPLAY 1; }
            [skip] { p: DISPLAY 2; }
        "#,
        );
        assert_eq!(exec.output, vec![2]);
    }

    #[test]
    fn test_jump_before_compare_falls_through() {
        let exec = execute("[main] { j: JUMP_IF c, main; o: DISPLAY 9; }");
        assert_eq!(exec.output, vec![9]);
        assert_eq!(exec.steps, 2);
    }

    #[test]
    fn test_runtime_divide_by_zero() {
        let err = execute_with_limit("[main] { z: SET 0; x: SET 1; x: DIV x, z; }", 100)
            .expect_err("must fail");
        assert!(matches!(err, RuntimeError::DivideByZero { ref gate, .. } if gate == "main"));
    }

    #[test]
    fn test_step_limit() {
        let err = execute_with_limit(
            "[spin] { one: SET 1; c: COMPARE one, 0; j: JUMP_IF c, spin; }",
            50,
        )
        .expect_err("must not terminate");
        assert_eq!(err, RuntimeError::StepLimit { limit: 50 });
    }

    #[test]
    fn test_cells_shared_across_gates() {
        let exec = execute("[a] { x: SET 1; } [b] { x: ADD 41; o: DISPLAY x; }");
        assert_eq!(exec.output, vec![42]);
    }
}
