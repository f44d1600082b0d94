//! SWC-124. Grounded on
//! `original_source/fuzzer/detectors/arbitrary_memory_access.py`: an
//! SSTORE whose slot index itself (not just the value written) is
//! attacker-controlled, letting a caller overwrite arbitrary storage
//! slots rather than a fixed, developer-chosen one.
use super::{operand_tainted, BugOracle, Finding, OracleContext, Swc};
use crate::interpreter::ExecutionResult;

#[derive(Default)]
pub struct ArbitraryStorageWriteOracle;

impl BugOracle for ArbitraryStorageWriteOracle {
    fn swc(&self) -> Swc {
        Swc::ArbitraryStorageWrite
    }

    fn check(&mut self, result: &ExecutionResult, ctx: &OracleContext<'_>) -> Vec<Finding> {
        let mut out = Vec::new();
        for step in &result.trace {
            if step.op != 0x55 {
                continue;
            }
            // SSTORE pops slot (top) then value.
            if operand_tainted(step, 0) {
                out.push(Finding::new(
                    Swc::ArbitraryStorageWrite,
                    result.tx_index,
                    step.pc,
                    ctx.target,
                    format!("storage slot written at pc {} is computed from attacker input", step.pc),
                ));
            }
        }
        out
    }
}
