//! SWC-107. Grounded on `original_source/fuzzer/detectors/reentrancy.py`:
//! remember every tainted SLOAD's storage slot, then remember any CALL
//! forwarding more than 2300 gas with a positive or tainted value, or
//! whose destination is itself tainted. A later SSTORE to a previously
//! SLOADed slot, or a tainted-destination CALL seen after an SLOAD, both
//! flag the classic checks-effects-interactions violation.
use super::{operand, operand_tainted, BugOracle, Finding, OracleContext, Swc};
use crate::interpreter::ExecutionResult;
use crate::types::Word;
use std::collections::{HashMap, HashSet};

/// Below this, a callee can't do much more than emit a log (EIP-1884's
/// 2300-gas stipend for a bare ether transfer).
const REENTRANCY_GAS_THRESHOLD: u64 = 2300;

#[derive(Default)]
pub struct ReentrancyOracle {
    sloads: HashMap<Word, usize>,
    calls: HashSet<usize>,
}

fn clears_state(op: u8) -> bool {
    matches!(op, 0x00 | 0xf3 | 0xfd | 0xfe | 0xff)
}

impl BugOracle for ReentrancyOracle {
    fn swc(&self) -> Swc {
        Swc::Reentrancy
    }

    fn reset(&mut self) {
        self.sloads.clear();
        self.calls.clear();
    }

    fn check(&mut self, result: &ExecutionResult, ctx: &OracleContext<'_>) -> Vec<Finding> {
        let mut out = Vec::new();
        for step in &result.trace {
            match step.op {
                0x54 => {
                    if operand_tainted(step, 0) {
                        if let Some(slot) = operand(step, 0) {
                            self.sloads.insert(slot, step.pc);
                        }
                    }
                }
                0xf1 if !self.sloads.is_empty() => {
                    let gas = operand(step, 0).map(|w| w.as_u64()).unwrap_or(0);
                    let value_suspicious =
                        operand(step, 2).map_or(false, |v| !v.is_zero()) || operand_tainted(step, 2);
                    if gas > REENTRANCY_GAS_THRESHOLD && value_suspicious {
                        self.calls.insert(step.pc);
                    }
                    if gas > REENTRANCY_GAS_THRESHOLD && operand_tainted(step, 1) {
                        self.calls.insert(step.pc);
                        if let Some(sload_pc) = self.sloads.values().copied().filter(|&p| p < step.pc).min() {
                            out.push(Finding::new(
                                Swc::Reentrancy,
                                result.tx_index,
                                step.pc,
                                ctx.target,
                                format!(
                                    "call at pc {} forwards control to an attacker-chosen address after storage was read at pc {}",
                                    step.pc, sload_pc
                                ),
                            ));
                        }
                    }
                }
                0x55 if !self.calls.is_empty() => {
                    if operand_tainted(step, 0) {
                        if let Some(slot) = operand(step, 0) {
                            if self.sloads.contains_key(&slot) {
                                if let Some(call_pc) = self.calls.iter().copied().filter(|&p| p < step.pc).min() {
                                    out.push(Finding::new(
                                        Swc::Reentrancy,
                                        result.tx_index,
                                        call_pc,
                                        ctx.target,
                                        format!(
                                            "storage slot {:#x} is written at pc {} after being read and exposed to an external call at pc {}",
                                            slot, step.pc, call_pc
                                        ),
                                    ));
                                }
                            }
                        }
                    }
                }
                op if clears_state(op) => {
                    self.sloads.clear();
                    self.calls.clear();
                }
                _ => {}
            }
        }
        out
    }
}
