//! Grounded on `original_source/fuzzer/engine/fitness/__init__.py`:
//! fitness rewards newly-covered branch directions, with an optional
//! bonus for exercising a data dependency (a gene reads a storage slot an
//! earlier gene wrote).
use std::collections::HashSet;

use crate::types::Word;

/// `compute_branch_coverage_fitness`: fraction of the target's total
/// JUMPI directions this individual's execution newly covered.
pub fn branch_coverage_fitness(newly_covered: usize, total_branch_directions: usize) -> f64 {
    if total_branch_directions == 0 {
        return 0.0
    }
    newly_covered as f64 / total_branch_directions as f64
}

/// `compute_data_dependency_fitness`: how many storage slots this
/// individual both wrote (in an earlier gene) and read (in a later one),
/// rewarding sequences that actually exercise cross-transaction state.
pub fn data_dependency_fitness(reads: &HashSet<Word>, writes: &HashSet<Word>) -> f64 {
    if writes.is_empty() {
        return 0.0
    }
    reads.intersection(writes).count() as f64 / writes.len() as f64
}

/// `fitness_function`: combine the two scores. Data-dependency is
/// additive and only active when the campaign enables it (source:
/// `settings.py`'s `DATA_DEPENDENCY` toggle).
pub fn fitness_function(branch_score: f64, data_dependency_score: f64, data_dependency_enabled: bool) -> f64 {
    if data_dependency_enabled {
        branch_score + data_dependency_score
    } else {
        branch_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_fitness_is_normalized() {
        assert_eq!(branch_coverage_fitness(2, 4), 0.5);
        assert_eq!(branch_coverage_fitness(0, 0), 0.0);
    }

    #[test]
    fn data_dependency_rewards_overlap() {
        let reads: HashSet<Word> = [Word::from(1u64), Word::from(2u64)].into_iter().collect();
        let writes: HashSet<Word> = [Word::from(2u64), Word::from(3u64)].into_iter().collect();
        assert_eq!(data_dependency_fitness(&reads, &writes), 0.5);
    }
}
