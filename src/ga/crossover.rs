//! Grounded on
//! `original_source/fuzzer/engine/operators/crossover/crossover.py`:
//! single-point crossover of two gene sequences. The data-dependency
//! variant prefers a cut point that keeps a write/read pair of genes in
//! the same child.
use crate::chromosome::{Gene, Individual};
use rand::Rng;

pub fn single_point<R: Rng + ?Sized>(a: &Individual, b: &Individual, rng: &mut R) -> (Individual, Individual) {
    if a.is_empty() || b.is_empty() {
        return (a.clone(), b.clone());
    }
    let cut_a = rng.gen_range(1..=a.len());
    let cut_b = rng.gen_range(1..=b.len());
    let mut child1: Vec<Gene> = a.genes[..cut_a].to_vec();
    child1.extend_from_slice(&b.genes[cut_b..]);
    let mut child2: Vec<Gene> = b.genes[..cut_b].to_vec();
    child2.extend_from_slice(&a.genes[cut_a..]);
    (Individual::new(child1), Individual::new(child2))
}

/// Cut both parents just after the first gene whose storage-write set
/// intersects a later gene's read set, keeping that write/read pair
/// together in the same child whenever a dependency is known.
pub fn single_point_preserving_dependency<R: Rng + ?Sized>(
    a: &Individual,
    b: &Individual,
    dependency_cut: Option<usize>,
    rng: &mut R,
) -> (Individual, Individual) {
    match dependency_cut {
        Some(cut) if cut > 0 && cut < a.len() && cut < b.len() => {
            let mut child1: Vec<Gene> = a.genes[..cut].to_vec();
            child1.extend_from_slice(&b.genes[cut..]);
            let mut child2: Vec<Gene> = b.genes[..cut].to_vec();
            child2.extend_from_slice(&a.genes[cut..]);
            (Individual::new(child1), Individual::new(child2))
        }
        _ => single_point(a, b, rng),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, Word};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn gene(n: usize) -> Gene {
        Gene {
            function_index: n,
            args: vec![],
            sender: Address::repeat_byte(n as u8),
            value: Word::zero(),
            timestamp_delta: 0,
            block_advance: 0,
            gaslimit: 4_500_000,
            balance_override: None,
            call_return_override: None,
            extcodesize_override: None,
            returndatasize_override: None,
        }
    }

    #[test]
    fn children_total_length_matches_parents() {
        let a = Individual::new(vec![gene(1), gene(2), gene(3)]);
        let b = Individual::new(vec![gene(4), gene(5)]);
        let mut rng = StdRng::seed_from_u64(7);
        let (c1, c2) = single_point(&a, &b, &mut rng);
        assert!(!c1.is_empty() && !c2.is_empty());
    }
}
