//! Generation loop (C7). Grounded on
//! `original_source/fuzzer/engine/environment.py`'s per-generation
//! select/crossover/mutate loop, restructured per the Design Notes
//! redesign flag: `evolve` is a pure function from one `Population` to
//! the next, taking already-computed fitness/bonus scores rather than
//! reaching into ambient engine state.
use crate::chromosome::{CallableFunction, Individual, Pools};
use crate::types::{Address, Word};
use rand::Rng;

use super::{crossover, mutation, selection};

#[derive(Debug, Clone)]
pub struct Population {
    pub individuals: Vec<Individual>,
}

impl Population {
    pub fn new(individuals: Vec<Individual>) -> Self {
        Self { individuals }
    }

    pub fn best(&self) -> Option<&Individual> {
        self.individuals
            .iter()
            .max_by(|a, b| {
                a.fitness
                    .unwrap_or(0.0)
                    .partial_cmp(&b.fitness.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    pub fn average_fitness(&self) -> f64 {
        if self.individuals.is_empty() {
            return 0.0
        }
        self.individuals.iter().map(|i| i.fitness.unwrap_or(0.0)).sum::<f64>()
            / self.individuals.len() as f64
    }
}

pub struct GaParams {
    pub population_size: usize,
    pub probability_crossover: f64,
    pub probability_mutation: f64,
    pub selective_pressure: f64,
    pub max_individual_length: usize,
}

/// Produce the next generation from `current`, whose `fitness` fields
/// must already be populated by the caller after executing every
/// individual (GA engine stays decoupled from the interpreter).
#[allow(clippy::too_many_arguments)]
pub fn evolve<R: Rng + ?Sized>(
    current: &Population,
    params: &GaParams,
    data_dependency_bonus: &[f64],
    functions: &[CallableFunction],
    attackers: &[Address],
    max_value: Word,
    gas_limit: u64,
    pools: Option<&Pools>,
    rng: &mut R,
) -> Population {
    if current.individuals.is_empty() || functions.is_empty() {
        return Population::new(Vec::new());
    }
    let mut next = Vec::with_capacity(params.population_size);
    // Elitism: always carry the best individual over unmutated, mirroring
    // `environment.py` keeping the incumbent champion in the next pool.
    if let Some(best) = current.best() {
        next.push(Individual::new(best.genes.clone()));
    }
    while next.len() < params.population_size {
        let i1 = selection::select(&current.individuals, params.selective_pressure, data_dependency_bonus, rng);
        let i2 = selection::select(&current.individuals, params.selective_pressure, data_dependency_bonus, rng);
        let (c1, c2) = if rng.gen_bool(params.probability_crossover) {
            crossover::single_point(&current.individuals[i1], &current.individuals[i2], rng)
        } else {
            (current.individuals[i1].clone(), current.individuals[i2].clone())
        };
        let c1 = mutation::mutate(&c1, params.probability_mutation, functions, attackers, max_value, gas_limit, pools, rng);
        next.push(c1);
        if next.len() < params.population_size {
            let c2 = mutation::mutate(&c2, params.probability_mutation, functions, attackers, max_value, gas_limit, pools, rng);
            next.push(c2);
        }
    }
    next.truncate(params.population_size);
    let _ = params.max_individual_length;
    Population::new(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AbiType;
    use crate::chromosome::random_individual;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn evolve_preserves_population_size() {
        let functions = vec![CallableFunction {
            selector: [1, 2, 3, 4],
            signature: "f(uint256)".to_string(),
            inputs: vec![AbiType::Uint(256)],
            is_payable: false,
        }];
        let attackers = vec![Address::repeat_byte(1), Address::repeat_byte(2)];
        let mut rng = StdRng::seed_from_u64(42);
        let mut individuals: Vec<Individual> = (0..6)
            .map(|_| {
                let mut ind = random_individual(&functions, &attackers, Word::zero(), 3, 4_500_000, None, &mut rng);
                ind.fitness = Some(rng.gen_range(0.0..1.0));
                ind
            })
            .collect();
        individuals[0].fitness = Some(5.0);
        let pop = Population::new(individuals);
        let params = GaParams {
            population_size: 6,
            probability_crossover: 0.9,
            probability_mutation: 0.1,
            selective_pressure: 1.5,
            max_individual_length: 5,
        };
        let next = evolve(&pop, &params, &[0.0; 6], &functions, &attackers, Word::zero(), 4_500_000, None, &mut rng);
        assert_eq!(next.individuals.len(), 6);
    }
}
