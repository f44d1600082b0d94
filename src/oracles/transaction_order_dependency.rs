//! SWC-114. Grounded on
//! `original_source/fuzzer/detectors/transaction_order_dependency.py`:
//! unlike the other ten, TOD is not visible in a single trace — it is a
//! property of two transactions from *different* senders racing to write
//! the same storage slot. The oracle accumulates `(slot -> last writer)`
//! across every transaction in a generation and flags a slot the moment a
//! second, different attacker account writes it with a different value.
use super::{operand, BugOracle, Finding, OracleContext, Swc};
use crate::interpreter::ExecutionResult;
use crate::types::{Address, Word};
use std::collections::HashMap;

#[derive(Default)]
pub struct TransactionOrderDependencyOracle {
    last_writer: HashMap<(Address, Word), (Address, Word)>,
}

impl BugOracle for TransactionOrderDependencyOracle {
    fn swc(&self) -> Swc {
        Swc::TransactionOrderDependency
    }

    fn reset(&mut self) {
        self.last_writer.clear();
    }

    fn check(&mut self, result: &ExecutionResult, ctx: &OracleContext<'_>) -> Vec<Finding> {
        let mut out = Vec::new();
        for step in &result.trace {
            if step.op != 0x55 {
                continue;
            }
            let (slot, value) = match (operand(step, 0), operand(step, 1)) {
                (Some(s), Some(v)) => (s, v),
                _ => continue,
            };
            let key = (ctx.target, slot);
            if let Some((prev_writer, prev_value)) = self.last_writer.get(&key) {
                if *prev_writer != ctx.attacker && *prev_value != value {
                    out.push(Finding::new(
                        Swc::TransactionOrderDependency,
                        result.tx_index,
                        step.pc,
                        ctx.target,
                        format!(
                            "slot {:#x} was last written by {:?} and is now overwritten by {:?} with a different value",
                            slot, prev_writer, ctx.attacker
                        ),
                    ));
                }
            }
            self.last_writer.insert(key, (ctx.attacker, value));
        }
        out
    }
}
