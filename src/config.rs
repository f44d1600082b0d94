//! Campaign configuration. Per the Design Notes redesign flag ("shared
//! per-module state used by detectors and the VM is configuration, not
//! ambient state"), every component below takes a `FuzzerConfig` by
//! reference/clone in its constructor instead of reading globals.
use crate::types::{Address, Fork, Word};
use std::collections::HashSet;
use std::time::Duration;

/// Mirrors `fuzzer/utils/settings.py` in the original implementation, which
/// this crate's CLI flags (`cli/src/main.rs`) are bound to 1:1.
#[derive(Debug, Clone)]
pub struct FuzzerConfig {
    pub fork: Fork,
    pub population_size: usize,
    pub generations: u64,
    pub global_timeout: Option<Duration>,
    pub probability_crossover: f64,
    pub probability_mutation: f64,
    pub max_symbolic_execution: u32,
    pub solver_timeout: Duration,
    pub attacker_accounts: Vec<Address>,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub account_balance: Word,
    pub max_individual_length: usize,
    pub environmental_instrumentation: bool,
    pub remote_fuzzing: bool,
    pub data_dependency: bool,
    pub seed: u64,
    pub work_dir: String,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            fork: Fork::Petersburg,
            population_size: 10,
            generations: 10,
            global_timeout: None,
            probability_crossover: 0.9,
            probability_mutation: 0.1,
            max_symbolic_execution: 10,
            solver_timeout: Duration::from_millis(100),
            attacker_accounts: vec![default_attacker_account()],
            gas_limit: 4_500_000,
            gas_price: 10,
            account_balance: Word::from(100_000_000u64) * Word::from(10u64).pow(Word::from(18u64)),
            max_individual_length: 5,
            environmental_instrumentation: true,
            remote_fuzzing: false,
            data_dependency: false,
            seed: 0,
            work_dir: "./out".to_string(),
        }
    }
}

impl FuzzerConfig {
    pub fn is_attacker(&self, addr: &Address) -> bool {
        self.attacker_accounts.contains(addr)
    }

    pub fn attacker_set(&self) -> HashSet<Address> {
        self.attacker_accounts.iter().copied().collect()
    }
}

/// `0xdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef`, the default attacker used
/// by every concrete scenario in spec.md 8.
pub fn default_attacker_account() -> Address {
    Address::from_slice(&hex::decode("deadbeefdeadbeefdeadbeefdeadbeefdeadbeef").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_attacker_is_the_spec_address() {
        let cfg = FuzzerConfig::default();
        assert_eq!(
            format!("{:x}", cfg.attacker_accounts[0]),
            "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef"
        );
    }
}
