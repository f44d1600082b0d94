//! SWC-106. Grounded on
//! `original_source/fuzzer/detectors/unprotected_selfdestruct.py`: not a
//! taint check on the branch guarding SELFDESTRUCT, but a trust check
//! across the whole individual — a SELFDESTRUCT reached by an attacker
//! transaction is only safe if an earlier, non-attacker-sender
//! transaction already passed that attacker's own address in as
//! calldata (i.e. some trusted party explicitly authorized it).
use super::{BugOracle, Finding, OracleContext, Swc};
use crate::interpreter::ExecutionResult;

#[derive(Default)]
pub struct UnprotectedSelfdestructOracle;

impl BugOracle for UnprotectedSelfdestructOracle {
    fn swc(&self) -> Swc {
        Swc::UnprotectedSelfdestruct
    }

    fn check(&mut self, result: &ExecutionResult, ctx: &OracleContext<'_>) -> Vec<Finding> {
        let mut out = Vec::new();
        if result.selfdestructed.is_empty() {
            return out;
        }
        if !ctx.is_attacker_sender || ctx.trusted_addresses.contains(&ctx.attacker) {
            return out;
        }
        if let Some(step) = result.trace.iter().find(|s| s.op == 0xff) {
            out.push(Finding::new(
                Swc::UnprotectedSelfdestruct,
                result.tx_index,
                step.pc,
                ctx.target,
                format!(
                    "selfdestruct at pc {} reached by untrusted attacker account {:?}",
                    step.pc, ctx.attacker
                ),
            ));
        }
        out
    }
}
