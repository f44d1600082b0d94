//! Grounded on
//! `original_source/fuzzer/engine/operators/mutation/mutation.py`:
//! per-gene mutation — each gene independently has a chance to be
//! replaced wholesale, or to have one field (an argument, the sender, the
//! value, or the timestamp delta) tweaked in place.
use crate::abi::random_argument;
use crate::chromosome::{random_gene, CallableFunction, Gene, Individual, Pools};
use crate::types::{Address, Word};
use rand::Rng;

enum Tweak {
    Argument,
    Sender,
    Value,
    Timestamp,
    Gaslimit,
    WholeGene,
}

fn pick_tweak<R: Rng + ?Sized>(rng: &mut R) -> Tweak {
    match rng.gen_range(0..6) {
        0 => Tweak::Argument,
        1 => Tweak::Sender,
        2 => Tweak::Value,
        3 => Tweak::Timestamp,
        4 => Tweak::Gaslimit,
        _ => Tweak::WholeGene,
    }
}

/// Draw from `pools` with the same bias `random_gene` uses, falling back
/// to `fresh` when the pool is empty or the coin flip misses.
fn pooled_or<R: Rng + ?Sized, T>(
    pools: Option<&Pools>,
    rng: &mut R,
    sample: impl FnOnce(&Pools, &mut R) -> Option<T>,
    fresh: impl FnOnce(&mut R) -> T,
) -> T {
    const POOL_DRAW_PROBABILITY: f64 = 0.3;
    if let Some(pools) = pools {
        if rng.gen_bool(POOL_DRAW_PROBABILITY) {
            if let Some(v) = sample(pools, rng) {
                return v;
            }
        }
    }
    fresh(rng)
}

#[allow(clippy::too_many_arguments)]
fn mutate_gene<R: Rng + ?Sized>(
    gene: &Gene,
    functions: &[CallableFunction],
    attackers: &[Address],
    max_value: Word,
    gas_limit: u64,
    pools: Option<&Pools>,
    rng: &mut R,
) -> Gene {
    let func = &functions[gene.function_index];
    match pick_tweak(rng) {
        Tweak::Argument if !gene.args.is_empty() => {
            let mut g = gene.clone();
            let idx = rng.gen_range(0..g.args.len());
            g.args[idx] = pooled_or(
                pools,
                rng,
                |p, r| p.sample_argument(func.selector, idx, r),
                |r| random_argument(&func.inputs[idx], r),
            );
            g
        }
        Tweak::Sender => {
            let mut g = gene.clone();
            g.sender = pooled_or(
                pools,
                rng,
                |p, r| p.sample_account(r),
                |r| attackers[r.gen_range(0..attackers.len())],
            );
            g
        }
        Tweak::Value if func.is_payable => {
            let mut g = gene.clone();
            g.value = if max_value.is_zero() {
                Word::zero()
            } else {
                pooled_or(
                    pools,
                    rng,
                    |p, r| p.sample_amount(r).filter(|v| *v <= max_value),
                    |r| Word::from(r.gen_range(0..=max_value.as_u128().min(u64::MAX as u128) as u64)),
                )
            };
            g
        }
        Tweak::Timestamp => {
            let mut g = gene.clone();
            g.timestamp_delta = pooled_or(pools, rng, |p, r| p.sample_timestamp(r), |r| r.gen_range(0..86_400));
            g
        }
        Tweak::Gaslimit => {
            let mut g = gene.clone();
            g.gaslimit = pooled_or(pools, rng, |p, r| p.sample_gaslimit(r), |_| gas_limit);
            g
        }
        _ => random_gene(func, gene.function_index, attackers, max_value, gas_limit, pools, rng),
    }
}

/// Apply per-gene mutation with independent probability `p` per gene,
/// matching `mutation.py`'s gene-at-a-time loop rather than a single
/// mutation per individual.
#[allow(clippy::too_many_arguments)]
pub fn mutate<R: Rng + ?Sized>(
    individual: &Individual,
    p: f64,
    functions: &[CallableFunction],
    attackers: &[Address],
    max_value: Word,
    gas_limit: u64,
    pools: Option<&Pools>,
    rng: &mut R,
) -> Individual {
    let genes = individual
        .genes
        .iter()
        .map(|g| {
            if rng.gen_bool(p) {
                mutate_gene(g, functions, attackers, max_value, gas_limit, pools, rng)
            } else {
                g.clone()
            }
        })
        .collect();
    Individual::new(genes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AbiType;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn zero_probability_mutation_is_identity() {
        let functions = vec![CallableFunction {
            selector: [0; 4],
            signature: "f(uint256)".to_string(),
            inputs: vec![AbiType::Uint(256)],
            is_payable: false,
        }];
        let attackers = vec![Address::repeat_byte(1)];
        let individual = random_gene(
            &functions[0],
            0,
            &attackers,
            Word::zero(),
            4_500_000,
            None,
            &mut StdRng::seed_from_u64(3),
        );
        let ind = Individual::new(vec![individual]);
        let mut rng = StdRng::seed_from_u64(4);
        let mutated = mutate(&ind, 0.0, &functions, &attackers, Word::zero(), 4_500_000, None, &mut rng);
        assert_eq!(mutated, ind);
    }
}
