//! SWC-104. Grounded on `original_source/fuzzer/detectors/unhandled_exception.py`
//! (and `unchecked_return_value.py`, the same pattern): a CALL-family
//! success flag that is tainted but never inspected by a later JUMPI
//! before the transaction ends, plus a call output buffer that is never
//! MLOADed back out.
use super::{operand, operand_tainted, BugOracle, Finding, OracleContext, Swc};
use crate::interpreter::ExecutionResult;
use crate::symbolic::TaintKind;
use std::collections::HashSet;

#[derive(Default)]
pub struct UnhandledExceptionOracle {
    /// pc of a CALL-family instruction whose tainted success flag has not
    /// yet been consumed by a JUMPI condition.
    unhandled: HashSet<usize>,
    /// (call pc, out_off, out_len) for a call output buffer not yet MLOADed.
    unread_outputs: Vec<(usize, usize, usize)>,
}

fn is_call(op: u8) -> bool {
    matches!(op, 0xf1 | 0xf2 | 0xf4 | 0xfa)
}

fn clears_state(op: u8) -> bool {
    matches!(op, 0x00 | 0xf3 | 0xff)
}

impl BugOracle for UnhandledExceptionOracle {
    fn swc(&self) -> Swc {
        Swc::UnhandledException
    }

    fn reset(&mut self) {
        self.unhandled.clear();
        self.unread_outputs.clear();
    }

    fn check(&mut self, result: &ExecutionResult, ctx: &OracleContext<'_>) -> Vec<Finding> {
        let mut out = Vec::new();
        for pair in result.trace.windows(2) {
            let (call_step, next_step) = (&pair[0], &pair[1]);
            if !is_call(call_step.op) {
                continue;
            }
            if let Some((out_off, out_len)) = call_step.call_out {
                if out_len > 0 {
                    self.unread_outputs.push((call_step.pc, out_off, out_len));
                }
            }
            let succeeded = operand(next_step, 0).map_or(false, |v| !v.is_zero());
            if succeeded && operand_tainted(next_step, 0) {
                self.unhandled.insert(call_step.pc);
            }
        }
        for step in &result.trace {
            if let Some(offset) = step.mload_offset {
                self.unread_outputs
                    .retain(|&(_, out_off, out_len)| !(offset >= out_off && offset < out_off + out_len));
            }
            if step.op == 0x57 {
                if let Some((expr, _)) = &step.branch {
                    for v in expr.free_vars() {
                        if v.kind == TaintKind::Call {
                            if let Some(call_pc) = v.extra {
                                self.unhandled.remove(&(call_pc as usize));
                            }
                        }
                    }
                }
            }
            if clears_state(step.op) {
                if let Some(call_pc) = self.unhandled.iter().copied().min() {
                    out.push(Finding::new(
                        Swc::UnhandledException,
                        result.tx_index,
                        call_pc,
                        ctx.target,
                        format!("call result at pc {} is never checked before the transaction terminates", call_pc),
                    ));
                }
                for &(call_pc, _, _) in &self.unread_outputs {
                    out.push(Finding::new(
                        Swc::UnhandledException,
                        result.tx_index,
                        call_pc,
                        ctx.target,
                        format!("call output buffer from the call at pc {} is never read back with MLOAD", call_pc),
                    ));
                }
                self.unhandled.clear();
                self.unread_outputs.clear();
            }
        }
        out
    }
}
