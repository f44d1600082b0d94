//! SWC-120. Grounded on
//! `original_source/fuzzer/detectors/block_dependency.py`: a JUMPI whose
//! branch condition is derived from BLOCKHASH/COINBASE/TIMESTAMP/NUMBER/
//! DIFFICULTY/GASLIMIT.
use super::{BugOracle, Finding, OracleContext, Swc};
use crate::interpreter::ExecutionResult;

#[derive(Default)]
pub struct BlockDependencyOracle;

impl BugOracle for BlockDependencyOracle {
    fn swc(&self) -> Swc {
        Swc::BlockDependency
    }

    fn check(&mut self, result: &ExecutionResult, ctx: &OracleContext<'_>) -> Vec<Finding> {
        let mut out = Vec::new();
        for step in &result.trace {
            if step.op != 0x57 {
                continue;
            }
            if let Some((expr, _taken)) = &step.branch {
                if expr.contains_block_related() {
                    out.push(Finding::new(
                        Swc::BlockDependency,
                        result.tx_index,
                        step.pc,
                        ctx.target,
                        format!("branch at pc {} depends on block context ({})", step.pc, expr.pretty_print()),
                    ));
                }
            }
        }
        out
    }
}
