//! SWC-110. Grounded on
//! `original_source/fuzzer/detectors/assertion_failure.py`: an attacker
//! transaction reaches an `assert` (compiled to INVALID, 0xfe).
use super::{BugOracle, Finding, OracleContext, Swc};
use crate::error::ExecError;
use crate::interpreter::ExecutionResult;

#[derive(Default)]
pub struct AssertionFailureOracle;

impl BugOracle for AssertionFailureOracle {
    fn swc(&self) -> Swc {
        Swc::AssertionFailure
    }

    fn check(&mut self, result: &ExecutionResult, ctx: &OracleContext<'_>) -> Vec<Finding> {
        let mut out = Vec::new();
        if result.error != Some(ExecError::Invalid) {
            return out;
        }
        if let Some(step) = result.trace.iter().rev().find(|s| s.op == 0xfe) {
            out.push(Finding::new(
                Swc::AssertionFailure,
                result.tx_index,
                step.pc,
                ctx.target,
                format!("assert at pc {} fails for attacker-reachable input", step.pc),
            ));
        }
        out
    }
}
