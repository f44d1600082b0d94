//! SWC-105. Grounded on `original_source/fuzzer/detectors/leaking_ether.py`:
//! a CALL that sends value back to the same attacker account that sent
//! the current transaction is only a leak if that destination hasn't
//! already paid value in itself (`ctx.spenders`, a legitimate withdrawal
//! pattern) and wasn't already authorized by an earlier, non-attacker
//! transaction's calldata (`ctx.trusted_addresses`).
use super::{address_operand, operand, operand_tainted, BugOracle, Finding, OracleContext, Swc};
use crate::interpreter::ExecutionResult;

#[derive(Default)]
pub struct LeakingEtherOracle;

impl BugOracle for LeakingEtherOracle {
    fn swc(&self) -> Swc {
        Swc::LeakingEther
    }

    fn check(&mut self, result: &ExecutionResult, ctx: &OracleContext<'_>) -> Vec<Finding> {
        let mut out = Vec::new();
        if !ctx.is_attacker_sender {
            return out;
        }
        for step in &result.trace {
            if step.op != 0xf1 {
                continue;
            }
            let to = match address_operand(step, 1) {
                Some(a) => a,
                None => continue,
            };
            if to != ctx.attacker {
                continue;
            }
            let value_suspicious = operand(step, 2).map_or(false, |v| !v.is_zero()) || operand_tainted(step, 2);
            if !value_suspicious {
                continue;
            }
            if ctx.spenders.contains(&to) || ctx.trusted_addresses.contains(&to) {
                continue;
            }
            out.push(Finding::new(
                Swc::LeakingEther,
                result.tx_index,
                step.pc,
                ctx.target,
                format!(
                    "call at pc {} refunds value to the calling attacker account {:?} with no prior deposit or authorization",
                    step.pc, to
                ),
            ));
        }
        out
    }
}
