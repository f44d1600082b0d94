//! Chromosome representation (C7). Grounded on
//! `original_source/fuzzer/engine/components/individual.py`:
//! `Individual.decode()` / `.hash` / `.clone()` /
//! `.get_transaction_data_from_chromosome()`. Per the Design Notes
//! redesign flag ("deeply-mutable-in-place records -> value types with an
//! explicit clone"), `Individual` holds owned `Gene`s and every GA
//! operator takes `&Individual` and returns a new one instead of mutating
//! shared state in place.
use crate::abi::{encode_call, random_argument, ArgValue};
use crate::types::{Address, Word};
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// One transaction's worth of genetic material: which function to call,
/// with which arguments, from which account, carrying how much value.
///
/// The `*_override` fields are the C2 environmental overrides (spec.md
/// 4.2): when present, the interpreter substitutes them for the real
/// on-chain value instead of consulting world state, so the GA can reach
/// branches that depend on values an isolated sandbox can never produce
/// honestly (another contract's balance, a forged external-call result).
#[derive(Debug, Clone, PartialEq)]
pub struct Gene {
    pub function_index: usize,
    pub args: Vec<ArgValue>,
    pub sender: Address,
    pub value: Word,
    /// Seconds added to the simulated block timestamp before this
    /// transaction executes, letting the GA explore TIMESTAMP-dependent
    /// branches (source: `individual.py`'s per-gene `timestamp` field).
    pub timestamp_delta: u64,
    pub block_advance: u64,
    /// Gas made available to the top-level call (source: per-gene
    /// `gaslimit`, distinct from `FuzzerConfig::gas_limit`'s campaign-wide
    /// ceiling).
    pub gaslimit: u64,
    /// BALANCE override, keyed by the queried address.
    pub balance_override: Option<HashMap<Address, Word>>,
    /// CALL/STATICCALL success-flag override, keyed by callee address.
    pub call_return_override: Option<HashMap<Address, Word>>,
    /// EXTCODESIZE override, keyed by the queried address.
    pub extcodesize_override: Option<HashMap<Address, Word>>,
    /// RETURNDATASIZE override, keyed by the just-called address.
    pub returndatasize_override: Option<HashMap<Address, Word>>,
}

impl Gene {
    pub fn encode(&self, selector: [u8; 4]) -> Vec<u8> {
        encode_call(selector, &self.args)
    }
}

/// A candidate transaction sequence: the unit the GA selects, mutates and
/// crosses over. Source field `chromosome` == `genes` here.
#[derive(Debug, Clone, PartialEq)]
pub struct Individual {
    pub genes: Vec<Gene>,
    /// Cached `fitness_function()` result; `None` until evaluated this
    /// generation (source: `individual.py` recomputes lazily too).
    pub fitness: Option<f64>,
}

impl Individual {
    pub fn new(genes: Vec<Gene>) -> Self {
        Self { genes, fitness: None }
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Deterministic identity used for population dedup, mirroring
    /// `Individual.hash` (source hashes the decoded transaction list).
    pub fn dedup_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for gene in &self.genes {
            gene.function_index.hash(&mut hasher);
            gene.sender.hash(&mut hasher);
            gene.value.hash(&mut hasher);
            gene.timestamp_delta.hash(&mut hasher);
            gene.gaslimit.hash(&mut hasher);
            for arg in &gene.args {
                hash_arg(arg, &mut hasher);
            }
        }
        hasher.finish()
    }
}

fn hash_arg(arg: &ArgValue, hasher: &mut DefaultHasher) {
    match arg {
        ArgValue::Word(w) => w.hash(hasher),
        ArgValue::Address(a) => a.hash(hasher),
        ArgValue::Bool(b) => b.hash(hasher),
        ArgValue::Bytes(b) => b.hash(hasher),
        ArgValue::String(s) => s.hash(hasher),
        ArgValue::Array(items) => {
            for item in items {
                hash_arg(item, hasher);
            }
        }
    }
}

/// A function the GA may choose to call, with its resolved arg types and
/// a flag marking whether it can ever be made to move ether.
#[derive(Debug, Clone)]
pub struct CallableFunction {
    pub selector: [u8; 4],
    pub signature: String,
    pub inputs: Vec<crate::abi::AbiType>,
    pub is_payable: bool,
}

/// Campaign-lifetime generator pools (spec.md 4.6): every interesting
/// concrete value the campaign has ever produced or observed, kept around
/// so later generations can resample it instead of only drawing fresh
/// uniform randomness. Grounded on
/// `original_source/fuzzer/engine/components/generator.py`'s per-function
/// and per-address value caches. Each list is capped to bound memory; the
/// cap is generous enough that it only bites on very long campaigns.
const POOL_CAP: usize = 256;

fn push_capped<T>(pool: &mut Vec<T>, value: T) {
    if pool.len() >= POOL_CAP {
        pool.remove(0);
    }
    pool.push(value);
}

#[derive(Debug, Clone, Default)]
pub struct Pools {
    pub arguments: HashMap<[u8; 4], HashMap<usize, Vec<ArgValue>>>,
    pub amounts: Vec<Word>,
    pub gaslimits: Vec<u64>,
    pub accounts: Vec<Address>,
    pub timestamps: Vec<u64>,
    pub blocknumbers: Vec<u64>,
    pub balances: Vec<Word>,
    pub call_returns: HashMap<Address, Vec<Word>>,
    pub extcodesizes: HashMap<Address, Vec<Word>>,
    pub returndatasizes: HashMap<Address, Vec<Word>>,
    pub parameter_array_sizes: HashMap<[u8; 4], HashMap<usize, Vec<usize>>>,
}

impl Pools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_argument(&mut self, selector: [u8; 4], idx: usize, value: ArgValue) {
        if let ArgValue::Array(items) = &value {
            push_capped(
                self.parameter_array_sizes.entry(selector).or_default().entry(idx).or_default(),
                items.len(),
            );
        }
        push_capped(self.arguments.entry(selector).or_default().entry(idx).or_default(), value);
    }

    pub fn record_amount(&mut self, v: Word) {
        push_capped(&mut self.amounts, v);
    }

    pub fn record_gaslimit(&mut self, v: u64) {
        push_capped(&mut self.gaslimits, v);
    }

    pub fn record_account(&mut self, a: Address) {
        push_capped(&mut self.accounts, a);
    }

    pub fn record_timestamp(&mut self, v: u64) {
        push_capped(&mut self.timestamps, v);
    }

    pub fn record_blocknumber(&mut self, v: u64) {
        push_capped(&mut self.blocknumbers, v);
    }

    pub fn record_balance(&mut self, v: Word) {
        push_capped(&mut self.balances, v);
    }

    pub fn record_call_return(&mut self, addr: Address, v: Word) {
        push_capped(self.call_returns.entry(addr).or_default(), v);
    }

    pub fn record_extcodesize(&mut self, addr: Address, v: Word) {
        push_capped(self.extcodesizes.entry(addr).or_default(), v);
    }

    pub fn record_returndatasize(&mut self, addr: Address, v: Word) {
        push_capped(self.returndatasizes.entry(addr).or_default(), v);
    }

    fn sample<'a, T, R: Rng + ?Sized>(pool: &'a [T], rng: &mut R) -> Option<&'a T> {
        if pool.is_empty() {
            None
        } else {
            Some(&pool[rng.gen_range(0..pool.len())])
        }
    }

    pub fn sample_argument<R: Rng + ?Sized>(
        &self,
        selector: [u8; 4],
        idx: usize,
        rng: &mut R,
    ) -> Option<ArgValue> {
        Self::sample(self.arguments.get(&selector)?.get(&idx)?, rng).cloned()
    }

    pub fn sample_amount<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Word> {
        Self::sample(&self.amounts, rng).copied()
    }

    pub fn sample_account<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Address> {
        Self::sample(&self.accounts, rng).copied()
    }

    pub fn sample_timestamp<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u64> {
        Self::sample(&self.timestamps, rng).copied()
    }

    pub fn sample_blocknumber<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u64> {
        Self::sample(&self.blocknumbers, rng).copied()
    }

    pub fn sample_gaslimit<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u64> {
        Self::sample(&self.gaslimits, rng).copied()
    }
}

/// Build one random gene for `function_index`, sampling an attacker
/// account and fresh arguments (source: `generator.py`'s
/// `generate_random_individual`). When `pools` holds prior observations,
/// each field independently has a chance to resample from it instead of
/// drawing fresh randomness, biasing the search toward values that have
/// already proven interesting.
pub fn random_gene<R: Rng + ?Sized>(
    func: &CallableFunction,
    function_index: usize,
    attackers: &[Address],
    max_value: Word,
    gas_limit: u64,
    pools: Option<&Pools>,
    rng: &mut R,
) -> Gene {
    const POOL_DRAW_PROBABILITY: f64 = 0.3;
    let draw_from_pool = |pools: Option<&Pools>, rng: &mut R| -> bool {
        pools.is_some() && rng.gen_bool(POOL_DRAW_PROBABILITY)
    };
    let args = func
        .inputs
        .iter()
        .enumerate()
        .map(|(idx, ty)| {
            if draw_from_pool(pools, rng) {
                if let Some(v) = pools.and_then(|p| p.sample_argument(func.selector, idx, rng)) {
                    return v;
                }
            }
            random_argument(ty, rng)
        })
        .collect();
    let sender = if draw_from_pool(pools, rng) {
        pools.and_then(|p| p.sample_account(rng)).unwrap_or(attackers[rng.gen_range(0..attackers.len())])
    } else {
        attackers[rng.gen_range(0..attackers.len())]
    };
    let value = if func.is_payable && !max_value.is_zero() {
        if draw_from_pool(pools, rng) {
            pools
                .and_then(|p| p.sample_amount(rng))
                .filter(|v| *v <= max_value)
                .unwrap_or_else(|| Word::from(rng.gen_range(0..=max_value.as_u128().min(u64::MAX as u128) as u64)))
        } else {
            Word::from(rng.gen_range(0..=max_value.as_u128().min(u64::MAX as u128) as u64))
        }
    } else {
        Word::zero()
    };
    let timestamp_delta = if draw_from_pool(pools, rng) {
        pools.and_then(|p| p.sample_timestamp(rng)).unwrap_or_else(|| rng.gen_range(0..86_400))
    } else {
        rng.gen_range(0..86_400)
    };
    let block_advance = if draw_from_pool(pools, rng) {
        pools.and_then(|p| p.sample_blocknumber(rng)).unwrap_or_else(|| rng.gen_range(0..10))
    } else {
        rng.gen_range(0..10)
    };
    let gaslimit = if draw_from_pool(pools, rng) {
        pools.and_then(|p| p.sample_gaslimit(rng)).unwrap_or(gas_limit)
    } else {
        gas_limit
    };
    Gene {
        function_index,
        args,
        sender,
        value,
        timestamp_delta,
        block_advance,
        gaslimit,
        balance_override: None,
        call_return_override: None,
        extcodesize_override: None,
        returndatasize_override: None,
    }
}

pub fn random_individual<R: Rng + ?Sized>(
    functions: &[CallableFunction],
    attackers: &[Address],
    max_value: Word,
    max_len: usize,
    gas_limit: u64,
    pools: Option<&Pools>,
    rng: &mut R,
) -> Individual {
    let len = rng.gen_range(1..=max_len.max(1));
    let genes = (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..functions.len());
            random_gene(&functions[idx], idx, attackers, max_value, gas_limit, pools, rng)
        })
        .collect();
    Individual::new(genes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_gene(function_index: usize, args: Vec<ArgValue>, sender: Address) -> Gene {
        Gene {
            function_index,
            args,
            sender,
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
    fn dedup_key_is_stable_and_order_sensitive() {
        let g1 = plain_gene(0, vec![ArgValue::Word(Word::from(1u64))], Address::repeat_byte(1));
        let g2 = plain_gene(1, vec![], Address::repeat_byte(2));
        let a = Individual::new(vec![g1.clone(), g2.clone()]);
        let b = Individual::new(vec![g2, g1]);
        assert_ne!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.dedup_key(), a.clone().dedup_key());
    }

    #[test]
    fn pools_sample_what_was_recorded() {
        let mut pools = Pools::new();
        pools.record_amount(Word::from(42u64));
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        assert_eq!(pools.sample_amount(&mut rng), Some(Word::from(42u64)));
    }
}
