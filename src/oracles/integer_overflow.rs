//! SWC-101. Grounded on `original_source/fuzzer/detectors/integer_overflow.py`:
//! an ADD/MUL (overflow) or SUB (underflow) whose tainted result wraps is
//! only a candidate — it is confirmed only once that same candidate
//! reaches a later tainted SSTORE. `NOT; PUSHn 1; ADD` is the compiler's
//! two's-complement negation idiom and is excluded, as is arithmetic that
//! immediately feeds a *COPY instruction's length (string/bytes size
//! bookkeeping, not a value computation).
use super::{operand_tainted, BugOracle, Finding, OracleContext, Swc};
use crate::interpreter::{ExecutionResult, TraceStep};
use std::collections::HashSet;

fn follows_not(trace: &[TraceStep], idx: usize) -> bool {
    idx >= 2 && trace[idx - 2].op == 0x19
}

fn feeds_copy_length(trace: &[TraceStep], idx: usize) -> bool {
    trace.get(idx + 1).is_some_and(|s| matches!(s.op, 0x37 | 0x39 | 0x3c))
}

#[derive(Default)]
pub struct IntegerOverflowOracle {
    overflows: HashSet<usize>,
    underflows: HashSet<usize>,
}

impl BugOracle for IntegerOverflowOracle {
    fn swc(&self) -> Swc {
        Swc::IntegerOverflow
    }

    fn reset(&mut self) {
        self.overflows.clear();
        self.underflows.clear();
    }

    fn check(&mut self, result: &ExecutionResult, ctx: &OracleContext<'_>) -> Vec<Finding> {
        let mut out = Vec::new();
        for (idx, step) in result.trace.iter().enumerate() {
            if step.arithmetic_overflow && (operand_tainted(step, 0) || operand_tainted(step, 1)) {
                match step.op {
                    0x01 | 0x02 if !follows_not(&result.trace, idx) && !feeds_copy_length(&result.trace, idx) => {
                        self.overflows.insert(step.pc);
                    }
                    0x03 if !feeds_copy_length(&result.trace, idx) => {
                        self.underflows.insert(step.pc);
                    }
                    _ => {}
                }
            }
            if step.op == 0x55 && operand_tainted(step, 1) {
                if let Some(pc) = self.overflows.iter().copied().min() {
                    out.push(Finding::new(
                        Swc::IntegerOverflow,
                        result.tx_index,
                        pc,
                        ctx.target,
                        format!("arithmetic overflow at pc {} reaches a storage write at pc {}", pc, step.pc),
                    ));
                }
                if let Some(pc) = self.underflows.iter().copied().min() {
                    out.push(Finding::new(
                        Swc::IntegerOverflow,
                        result.tx_index,
                        pc,
                        ctx.target,
                        format!("arithmetic underflow at pc {} reaches a storage write at pc {}", pc, step.pc),
                    ));
                }
            }
        }
        out
    }
}
