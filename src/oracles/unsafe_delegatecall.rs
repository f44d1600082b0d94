//! SWC-112. Grounded on
//! `original_source/fuzzer/detectors/unsafe_delegatecall.py`: a
//! DELEGATECALL whose target address comes from attacker-controlled
//! input, letting a caller run arbitrary code in this contract's storage
//! context.
use super::{operand_tainted, BugOracle, Finding, OracleContext, Swc};
use crate::interpreter::ExecutionResult;

#[derive(Default)]
pub struct UnsafeDelegatecallOracle;

impl BugOracle for UnsafeDelegatecallOracle {
    fn swc(&self) -> Swc {
        Swc::UnsafeDelegatecall
    }

    fn check(&mut self, result: &ExecutionResult, ctx: &OracleContext<'_>) -> Vec<Finding> {
        let mut out = Vec::new();
        for step in &result.trace {
            if step.op != 0xf4 {
                continue;
            }
            // DELEGATECALL pops gas, to, inOffset, inLength, outOffset, outLength.
            if operand_tainted(step, 1) {
                out.push(Finding::new(
                    Swc::UnsafeDelegatecall,
                    result.tx_index,
                    step.pc,
                    ctx.target,
                    format!("delegatecall at pc {} targets an attacker-controlled address", step.pc),
                ));
            }
        }
        out
    }
}
