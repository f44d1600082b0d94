//! SWC-132. Grounded on
//! `original_source/fuzzer/detectors/locking_ether.py`: a contract that
//! can receive ether (a transaction carrying value succeeded) but whose
//! static CFG never reaches an opcode capable of sending ether back out.
use super::{BugOracle, Finding, OracleContext, Swc};
use crate::interpreter::ExecutionResult;

#[derive(Default)]
pub struct LockingEtherOracle;

impl BugOracle for LockingEtherOracle {
    fn swc(&self) -> Swc {
        Swc::LockingEther
    }

    fn check(&mut self, result: &ExecutionResult, ctx: &OracleContext<'_>) -> Vec<Finding> {
        let mut out = Vec::new();
        if ctx.can_send_ether {
            return out;
        }
        let received_value = result.error.is_none() && !ctx.tx_value.is_zero();
        if received_value && ctx.is_payable {
            out.push(Finding::new(
                Swc::LockingEther,
                result.tx_index,
                0,
                ctx.target,
                "contract accepts ether but no path can ever send it back out".to_string(),
            ));
        }
        out
    }
}
