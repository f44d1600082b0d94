//! Grounded on
//! `original_source/fuzzer/engine/operators/selection/data_dependency_linear_ranking_selection.py`:
//! Baker (1985) linear ranking selection, with an optional bonus skewing
//! the ranking towards individuals that exercise a data dependency.
use crate::chromosome::Individual;
use rand::Rng;

/// Probability assigned to the individual ranked `rank` (1 = worst,
/// `n` = best) out of `n`, for selective pressure `sp` in `[1.0, 2.0]`.
fn rank_probability(rank: usize, n: usize, sp: f64) -> f64 {
    let n = n as f64;
    let rank = rank as f64;
    (2.0 - sp) / n + (2.0 * rank * (sp - 1.0)) / (n * (n - 1.0).max(1.0))
}

/// Sort indices by ascending fitness (worst first, as the formula
/// expects), then roulette-wheel over the rank probabilities.
fn ranked_indices(population: &[Individual]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..population.len()).collect();
    idx.sort_by(|&a, &b| {
        let fa = population[a].fitness.unwrap_or(0.0);
        let fb = population[b].fitness.unwrap_or(0.0);
        fa.partial_cmp(&fb).unwrap_or(std::cmp::Ordering::Equal)
    });
    idx
}

/// `data_dependency_linear_ranking_selection` with `bonus[i]` a per
/// individual (indexed into `population`) boost in `[0.0, 1.0]`; pass an
/// all-zero slice to fall back to plain linear ranking selection.
pub fn select<R: Rng + ?Sized>(
    population: &[Individual],
    selective_pressure: f64,
    bonus: &[f64],
    rng: &mut R,
) -> usize {
    assert!(!population.is_empty());
    if population.len() == 1 {
        return 0;
    }
    let order = ranked_indices(population);
    let weights: Vec<f64> = order
        .iter()
        .enumerate()
        .map(|(rank, &orig_idx)| {
            let base = rank_probability(rank + 1, population.len(), selective_pressure);
            base + bonus.get(orig_idx).copied().unwrap_or(0.0)
        })
        .collect();
    let total: f64 = weights.iter().sum();
    let mut roll = rng.gen_range(0.0..total.max(f64::EPSILON));
    for (rank, &w) in weights.iter().enumerate() {
        if roll < w {
            return order[rank];
        }
        roll -= w;
    }
    *order.last().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn individual_with_fitness(f: f64) -> Individual {
        let mut ind = Individual::new(vec![]);
        ind.fitness = Some(f);
        ind
    }

    #[test]
    fn higher_fitness_is_selected_more_often() {
        let pop = vec![
            individual_with_fitness(0.0),
            individual_with_fitness(0.0),
            individual_with_fitness(10.0),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let mut best_count = 0;
        for _ in 0..200 {
            if select(&pop, 2.0, &[0.0, 0.0, 0.0], &mut rng) == 2 {
                best_count += 1;
            }
        }
        assert!(best_count > 100);
    }
}
