//! JSON campaign report (spec.md 6 Outputs). Grounded on the teacher's
//! JSON-serialized result types (`ConciseEVMInput`, coverage structs) for
//! the "serde struct straight to `serde_json::to_writer_pretty`" style.
use crate::coverage::CoverageStats;
use crate::error::{FuzzError, FuzzResult};
use crate::oracles::Finding;
use crate::types::Address;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub generation: u64,
    pub best_fitness: f64,
    pub average_fitness: f64,
    pub instruction_coverage_pct: f64,
    pub branch_coverage_pct: f64,
    pub findings_so_far: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub seed: u64,
    pub target: Address,
    pub generations: Vec<GenerationReport>,
    pub final_coverage: CoverageStats,
    pub total_transactions: u64,
    pub elapsed_secs: f64,
    pub findings: Vec<Finding>,
    /// pc -> the most recent `ExecError` observed there, mirroring
    /// spec.md 6's "errors map keyed by pc".
    pub errors_by_pc: HashMap<usize, String>,
}

impl CampaignReport {
    pub fn to_json_pretty(&self) -> FuzzResult<String> {
        serde_json::to_string_pretty(self).map_err(FuzzError::Json)
    }

    pub fn write_to_file(&self, path: &Path) -> FuzzResult<()> {
        let json = self.to_json_pretty()?;
        std::fs::write(path, json).map_err(FuzzError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_valid_json() {
        let report = CampaignReport {
            seed: 0,
            target: Address::zero(),
            generations: vec![GenerationReport {
                generation: 0,
                best_fitness: 0.1,
                average_fitness: 0.05,
                instruction_coverage_pct: 10.0,
                branch_coverage_pct: 5.0,
                findings_so_far: 0,
            }],
            final_coverage: CoverageStats {
                instructions_covered: 1,
                instructions_total: 10,
                branches_covered: 0,
                branches_total: 2,
            },
            total_transactions: 10,
            elapsed_secs: 1.5,
            findings: vec![],
            errors_by_pc: HashMap::new(),
        };
        let json = report.to_json_pretty().unwrap();
        assert!(json.contains("\"seed\""));
        let _: serde_json::Value = serde_json::from_str(&json).unwrap();
    }
}
