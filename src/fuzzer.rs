//! Top-level campaign orchestration, wiring the bytecode analyzer (C1),
//! interpreter (C2), world state (C3), taint engine (C4), ABI layer (C5),
//! oracle set (C6), GA engine (C7), solver (C8) and coverage tracker (C9)
//! together. Grounded on the source's `fuzzer/engine/environment.py`
//! (the outer generation loop) and `fuzzer/fuzzer.py` (campaign setup).
use crate::abi::{AbiFunction, ArgValue};
use crate::bytecode::Cfg;
use crate::chromosome::{random_individual, CallableFunction, Gene, Individual, Pools};
use crate::config::FuzzerConfig;
use crate::coverage::{self, CoverageStats};
use crate::ga::{self, GaParams, Population};
use crate::interpreter::{BlockContext, Machine, TxOverrides};
use crate::oracles::{Finding, OracleContext, OracleSet};
use crate::report::{CampaignReport, GenerationReport};
use crate::solver;
use crate::symbolic::{TaintKind, Var};
use crate::types::{Address, Word};
use crate::worldstate::WorldState;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

fn callable_functions(abi: &[AbiFunction]) -> Vec<CallableFunction> {
    abi.iter()
        .filter(|f| !f.is_constructor && !f.is_constant)
        .map(|f| CallableFunction {
            selector: f.selector,
            signature: f.signature.clone(),
            inputs: f.inputs.clone(),
            is_payable: f.is_payable,
        })
        .collect()
}

fn build_tx_overrides(gene: &Gene) -> TxOverrides<'_> {
    TxOverrides {
        balance: gene.balance_override.as_ref(),
        call_return: gene.call_return_override.as_ref(),
        extcodesize: gene.extcodesize_override.as_ref(),
        returndatasize: gene.returndatasize_override.as_ref(),
    }
}

/// Every 32-byte word in `calldata` (after the 4-byte selector) whose top
/// 12 bytes are zero is treated as an embedded address, the same loose
/// heuristic SWC-105/SWC-106 use to decide whether a trusted sender has
/// already "vouched for" an address by passing it as an argument.
fn addresses_in_calldata(calldata: &[u8]) -> Vec<Address> {
    let body = if calldata.len() > 4 { &calldata[4..] } else { &[] as &[u8] };
    body.chunks(32)
        .filter(|c| c.len() == 32 && c[..12].iter().all(|&b| b == 0))
        .map(|c| Address::from_slice(&c[12..32]))
        .collect()
}

/// Apply one solved free variable from `solver::negate_branch`'s model to
/// both the spliced seed gene (so the very next generation benefits) and
/// the campaign's generator pools (so the value keeps surfacing in future
/// random individuals too), per spec.md 4.8.
fn apply_solved_value(
    var: &Var,
    word: Word,
    gene: &mut Gene,
    func: &CallableFunction,
    world: &mut WorldState,
    config: &FuzzerConfig,
    pools: &mut Pools,
) {
    match var.kind {
        TaintKind::CallValue => {
            let clamped = word.min(config.account_balance);
            pools.record_amount(clamped);
            gene.value = clamped;
        }
        TaintKind::Caller => {
            let mut buf = [0u8; 32];
            word.to_big_endian(&mut buf);
            let addr = Address::from_slice(&buf[12..32]);
            let account = world.account(addr);
            if account.nonce == 0 && account.code_hash == [0u8; 32] && account.balance.is_zero() {
                world.set_balance(addr, config.account_balance);
            }
            pools.record_account(addr);
            gene.sender = addr;
        }
        TaintKind::Timestamp => {
            let v = word.as_u64();
            pools.record_timestamp(v);
            gene.timestamp_delta = v;
        }
        TaintKind::BlockNumber => {
            let v = word.as_u64();
            pools.record_blocknumber(v);
            gene.block_advance = v;
        }
        TaintKind::Balance => {
            pools.record_balance(word);
        }
        TaintKind::CallDataLoad => {
            if let Some(offset) = var.extra {
                if offset >= 4 {
                    let idx = ((offset - 4) / 32) as usize;
                    pools.record_argument(func.selector, idx, ArgValue::Word(word));
                    if let Some(ArgValue::Word(w)) = gene.args.get_mut(idx) {
                        *w = word;
                    }
                }
            }
        }
        _ => {}
    }
}

pub struct Campaign {
    config: FuzzerConfig,
    world: WorldState,
    cfgs: HashMap<Address, Cfg>,
    target: Address,
    functions: Vec<CallableFunction>,
    oracles: OracleSet,
    pools: Pools,
    rng: StdRng,
    findings: Vec<Finding>,
    errors_by_pc: HashMap<usize, String>,
    tx_counter: u32,
    stagnant_generations: u32,
    best_fitness_ever: f64,
    cancelled: Option<&'static AtomicBool>,
}

impl Campaign {
    /// Deploys `runtime_code` at a fresh address and prepares the GA's
    /// gene pool from `abi`.
    pub fn new(config: FuzzerConfig, abi: Vec<AbiFunction>, runtime_code: Vec<u8>) -> Self {
        let mut world = WorldState::local();
        let target = Address::repeat_byte(0xc0);
        world.deploy(target, &runtime_code);
        for attacker in &config.attacker_accounts {
            world.set_balance(*attacker, config.account_balance);
        }
        let mut cfgs = HashMap::new();
        cfgs.insert(target, Cfg::build(&runtime_code));
        let functions = callable_functions(&abi);
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            oracles: OracleSet::all(),
            pools: Pools::new(),
            findings: Vec::new(),
            errors_by_pc: HashMap::new(),
            tx_counter: 0,
            stagnant_generations: 0,
            best_fitness_ever: 0.0,
            cancelled: None,
            config,
            world,
            cfgs,
            target,
            functions,
        }
    }

    /// Wires in an external cancellation flag (e.g. a SIGINT handler) that
    /// the generation loop polls alongside the configured global timeout.
    pub fn with_cancellation(mut self, flag: &'static AtomicBool) -> Self {
        self.cancelled = Some(flag);
        self
    }

    fn seed_population(&mut self) -> Population {
        let attackers: Vec<Address> = self.config.attacker_accounts.clone();
        let individuals: Vec<Individual> = (0..self.config.population_size)
            .map(|_| {
                random_individual(
                    &self.functions,
                    &attackers,
                    self.config.account_balance,
                    self.config.max_individual_length,
                    self.config.gas_limit,
                    Some(&self.pools),
                    &mut self.rng,
                )
            })
            .collect();
        Population::new(individuals)
    }

    /// Run one individual's transaction sequence from a clean snapshot,
    /// returning (fitness, new findings, reads, writes).
    fn evaluate(&mut self, individual: &Individual) -> (f64, Vec<Finding>, HashSet<Word>, HashSet<Word>) {
        self.oracles.reset();
        let snapshot = self.world.snapshot();
        let before_coverage = coverage::snapshot(&self.cfgs);
        let mut findings = Vec::new();
        let mut reads = HashSet::new();
        let mut writes = HashSet::new();
        let mut block = BlockContext::default();
        let mut trusted_addresses: HashSet<Address> = HashSet::new();
        let mut spenders: HashSet<Address> = HashSet::new();

        for gene in &individual.genes {
            block.timestamp += gene.timestamp_delta;
            block.number += gene.block_advance;
            let func = &self.functions[gene.function_index];
            let calldata = gene.encode(func.selector);
            self.tx_counter += 1;
            let is_attacker_sender = self.config.is_attacker(&gene.sender);
            let overrides = build_tx_overrides(gene);
            let result = Machine::run_transaction(
                &mut self.world,
                &mut self.cfgs,
                &self.config,
                &block,
                overrides,
                self.tx_counter,
                gene.sender,
                self.target,
                gene.value,
                gene.gaslimit,
                calldata.clone(),
            );
            for step in &result.trace {
                if step.op == 0x54 {
                    if let Some(slot) = crate::oracles::operand(step, 0) {
                        reads.insert(slot);
                    }
                }
                if step.op == 0x55 {
                    if let Some(slot) = crate::oracles::operand(step, 0) {
                        writes.insert(slot);
                    }
                }
            }
            if let Some(err) = &result.error {
                let pc = result.trace.iter().find(|s| s.error.is_some()).map(|s| s.pc).unwrap_or(0);
                self.errors_by_pc.entry(pc).or_insert_with(|| format!("{:?}", err));
            }
            let ctx = OracleContext {
                target: self.target,
                attacker: gene.sender,
                can_send_ether: self.cfgs.get(&self.target).map_or(false, |c| c.can_send_ether),
                is_payable: self.functions.iter().any(|f| f.is_payable),
                tx_value: gene.value,
                is_attacker_sender,
                trusted_addresses: &trusted_addresses,
                spenders: &spenders,
            };
            findings.extend(self.oracles.check(&result, &ctx));

            if !is_attacker_sender {
                trusted_addresses.extend(addresses_in_calldata(&calldata));
            }
            if !gene.value.is_zero() {
                spenders.insert(gene.sender);
            }

            self.pools.record_amount(gene.value);
            self.pools.record_gaslimit(gene.gaslimit);
            self.pools.record_account(gene.sender);
            self.pools.record_timestamp(gene.timestamp_delta);
            self.pools.record_blocknumber(gene.block_advance);
            for (idx, arg) in gene.args.iter().enumerate() {
                self.pools.record_argument(func.selector, idx, arg.clone());
            }
            for (_, v) in gene.balance_override.iter().flat_map(|m| m.iter()) {
                self.pools.record_balance(*v);
            }
            for (addr, v) in gene.call_return_override.iter().flat_map(|m| m.iter()) {
                self.pools.record_call_return(*addr, *v);
            }
            for (addr, v) in gene.extcodesize_override.iter().flat_map(|m| m.iter()) {
                self.pools.record_extcodesize(*addr, *v);
            }
            for (addr, v) in gene.returndatasize_override.iter().flat_map(|m| m.iter()) {
                self.pools.record_returndatasize(*addr, *v);
            }
        }

        let new_branches = coverage::new_branch_directions(&before_coverage, &self.cfgs);
        let total_branches = coverage::total_branch_directions(&self.cfgs);
        let branch_score = ga::fitness::branch_coverage_fitness(new_branches, total_branches);
        let dd_score = ga::fitness::data_dependency_fitness(&reads, &writes);
        let fitness = ga::fitness::fitness_function(branch_score, dd_score, self.config.data_dependency);

        self.world.restore(snapshot);
        (fitness, findings, reads, writes)
    }

    pub fn run(mut self) -> CampaignReport {
        let start = Instant::now();
        let mut population = self.seed_population();
        let mut generation_reports = Vec::new();

        for generation in 0..self.config.generations {
            if let Some(timeout) = self.config.global_timeout {
                if start.elapsed() > timeout {
                    break;
                }
            }
            if self.cancelled.is_some_and(|f| f.load(Ordering::SeqCst)) {
                tracing::info!(generation, "campaign interrupted, writing partial report");
                break;
            }

            let mut dd_bonus = vec![0.0f64; population.individuals.len()];
            for (i, individual) in population.individuals.clone().into_iter().enumerate() {
                let (fitness, findings, reads, writes) = self.evaluate(&individual);
                population.individuals[i].fitness = Some(fitness);
                dd_bonus[i] = ga::fitness::data_dependency_fitness(&reads, &writes);
                let elapsed = start.elapsed().as_secs_f64();
                let individual_id = format!("{:016x}", individual.dedup_key());
                self.findings.extend(findings.into_iter().map(|mut f| {
                    f.individual = individual_id.clone();
                    f.time = elapsed;
                    f
                }));
            }

            let coverage_stats = CoverageStats::compute(&self.cfgs);
            generation_reports.push(GenerationReport {
                generation,
                best_fitness: population.best().and_then(|i| i.fitness).unwrap_or(0.0),
                average_fitness: population.average_fitness(),
                instruction_coverage_pct: coverage_stats.instruction_pct(),
                branch_coverage_pct: coverage_stats.branch_pct(),
                findings_so_far: self.findings.len(),
            });

            let current_best = population.best().and_then(|i| i.fitness).unwrap_or(0.0);
            if current_best > self.best_fitness_ever {
                self.best_fitness_ever = current_best;
                self.stagnant_generations = 0;
            } else {
                self.stagnant_generations += 1;
            }

            // Symbolic-execution assisted restart, per spec.md 4.8:
            // negate the first uncovered branch on the current champion's
            // path and splice the result back in as a fresh seed once the
            // GA has stalled for too long.
            if self.stagnant_generations >= self.config.max_symbolic_execution {
                if let Some(seed_genes) = self.try_solve_new_path(&population) {
                    population.individuals.push(Individual::new(seed_genes));
                }
                self.stagnant_generations = 0;
            }

            let params = GaParams {
                population_size: self.config.population_size,
                probability_crossover: self.config.probability_crossover,
                probability_mutation: self.config.probability_mutation,
                selective_pressure: 1.5,
                max_individual_length: self.config.max_individual_length,
            };
            let attackers = self.config.attacker_accounts.clone();
            population = ga::evolve(
                &population,
                &params,
                &dd_bonus,
                &self.functions,
                &attackers,
                self.config.account_balance,
                self.config.gas_limit,
                Some(&self.pools),
                &mut self.rng,
            );
        }

        let final_coverage = CoverageStats::compute(&self.cfgs);
        CampaignReport {
            seed: self.config.seed,
            target: self.target,
            generations: generation_reports,
            final_coverage,
            total_transactions: self.tx_counter as u64,
            elapsed_secs: start.elapsed().as_secs_f64(),
            findings: self.findings,
            errors_by_pc: self.errors_by_pc,
        }
    }

    /// Re-run the population's champion, pick its first branch whose
    /// other direction is unexplored, ask the solver for an input that
    /// flips it, and splice that into a new single-transaction gene.
    /// Returns `None` when nothing is solvable (spec.md 4.8's fallback:
    /// "keep exploring with plain mutation").
    fn try_solve_new_path(&mut self, population: &Population) -> Option<Vec<Gene>> {
        let champion = population.best()?;
        let gene = champion.genes.first()?.clone();
        let func = self.functions.get(gene.function_index)?.clone();
        let calldata = gene.encode(func.selector);
        let mut block = BlockContext::default();
        block.timestamp += gene.timestamp_delta;
        block.number += gene.block_advance;
        self.tx_counter += 1;
        let overrides = build_tx_overrides(&gene);
        let result = Machine::run_transaction(
            &mut self.world,
            &mut self.cfgs,
            &self.config,
            &block,
            overrides,
            self.tx_counter,
            gene.sender,
            self.target,
            gene.value,
            gene.gaslimit,
            calldata,
        );
        let path: Vec<_> = result.trace.iter().filter_map(|s| s.branch.clone()).collect();
        for idx in 0..path.len() {
            if let Some(model) = solver::negate_branch(&path, idx, self.config.solver_timeout) {
                if model.is_empty() {
                    continue;
                }
                let mut entries: Vec<(Var, Word)> = model.into_iter().collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                let mut new_gene = gene.clone();
                for (var, word) in &entries {
                    apply_solved_value(var, *word, &mut new_gene, &func, &mut self.world, &self.config, &mut self.pools);
                }
                return Some(vec![new_gene]);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AbiType;

    fn overflow_abi() -> Vec<AbiFunction> {
        vec![AbiFunction {
            name: "add".to_string(),
            signature: "add(uint256)".to_string(),
            selector: crate::types::function_selector("add(uint256)"),
            inputs: vec![AbiType::Uint(256)],
            is_payable: false,
            is_constant: false,
            is_constructor: false,
        }]
    }

    #[test]
    fn campaign_runs_to_completion_and_reports_coverage() {
        // function add(uint256 x): storage[0] += x; (unchecked)
        // PUSH1 0; SLOAD; PUSH1 0; CALLDATALOAD; ADD; PUSH1 0; SSTORE; STOP
        let code = [
            0x60, 0x00, 0x54, 0x60, 0x04, 0x35, 0x01, 0x60, 0x00, 0x55, 0x00,
        ];
        let mut config = FuzzerConfig::default();
        config.population_size = 4;
        config.generations = 2;
        config.max_symbolic_execution = 100;
        let campaign = Campaign::new(config, overflow_abi(), code.to_vec());
        let report = campaign.run();
        assert_eq!(report.generations.len(), 2);
        assert!(report.total_transactions > 0);
    }
}
