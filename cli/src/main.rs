use anyhow::{Context, Result};
use clap::Parser;
use evm_ga_fuzz::abi::parse_abi_json;
use evm_ga_fuzz::config::{default_attacker_account, FuzzerConfig};
use evm_ga_fuzz::fuzzer::Campaign;
use evm_ga_fuzz::types::{Address, Fork};
use nix::sys::signal::{self, SigHandler, Signal};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signal: nix::libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Evolutionary fuzzer for EVM bytecode.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the deployed runtime bytecode, as a hex string (0x-prefixed or bare).
    #[arg(long)]
    bytecode: PathBuf,

    /// Path to the contract's ABI (standard Solidity JSON array).
    #[arg(long)]
    abi: PathBuf,

    /// Fork rules to honour (homestead, byzantium, petersburg).
    #[arg(long, default_value = "petersburg")]
    fork: String,

    /// GA population size.
    #[arg(long, default_value_t = 10)]
    population_size: usize,

    /// Number of generations to run.
    #[arg(long, default_value_t = 100)]
    generations: u64,

    /// Abort the campaign after this many seconds, regardless of progress.
    #[arg(long)]
    global_timeout_secs: Option<u64>,

    #[arg(long, default_value_t = 0.9)]
    probability_crossover: f64,

    #[arg(long, default_value_t = 0.1)]
    probability_mutation: f64,

    /// Stalled generations before asking the solver for a new path.
    #[arg(long, default_value_t = 10)]
    max_symbolic_execution: u32,

    #[arg(long, default_value_t = 100)]
    solver_timeout_ms: u64,

    /// Comma-separated attacker account addresses (default: 0xdeadbeef...).
    #[arg(long)]
    attacker_accounts: Option<String>,

    #[arg(long, default_value_t = 5)]
    max_individual_length: usize,

    /// Reward argument/storage-slot overlap in the fitness function.
    #[arg(long, default_value_t = false)]
    data_dependency: bool,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Where to write the JSON campaign report.
    #[arg(long, default_value = "campaign_report.json")]
    out: PathBuf,
}

fn parse_bytecode(raw: &str) -> Result<Vec<u8>> {
    let trimmed = raw.trim().strip_prefix("0x").unwrap_or(raw.trim());
    hex::decode(trimmed).context("bytecode is not valid hex")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let bytecode_raw = std::fs::read_to_string(&args.bytecode)
        .with_context(|| format!("reading {}", args.bytecode.display()))?;
    let runtime_code = parse_bytecode(&bytecode_raw)?;

    let abi_raw = std::fs::read_to_string(&args.abi)
        .with_context(|| format!("reading {}", args.abi.display()))?;
    let abi = parse_abi_json(&abi_raw).context("parsing ABI")?;

    let fork = Fork::from_str(&args.fork).context("unknown fork name")?;

    let attacker_accounts = match &args.attacker_accounts {
        Some(csv) => csv
            .split(',')
            .map(|s| Address::from_str(s.trim()).context("parsing attacker address"))
            .collect::<Result<Vec<_>>>()?,
        None => vec![default_attacker_account()],
    };

    let mut config = FuzzerConfig::default();
    config.fork = fork;
    config.population_size = args.population_size;
    config.generations = args.generations;
    config.global_timeout = args.global_timeout_secs.map(Duration::from_secs);
    config.probability_crossover = args.probability_crossover;
    config.probability_mutation = args.probability_mutation;
    config.max_symbolic_execution = args.max_symbolic_execution;
    config.solver_timeout = Duration::from_millis(args.solver_timeout_ms);
    config.attacker_accounts = attacker_accounts;
    config.max_individual_length = args.max_individual_length;
    config.data_dependency = args.data_dependency;
    config.seed = args.seed;

    tracing::info!(
        population_size = config.population_size,
        generations = config.generations,
        "starting campaign"
    );

    unsafe {
        signal::signal(Signal::SIGINT, SigHandler::Handler(on_sigint))
            .context("installing SIGINT handler")?;
    }
    let campaign = Campaign::new(config, abi, runtime_code).with_cancellation(&INTERRUPTED);
    let report = campaign.run();
    if INTERRUPTED.load(Ordering::SeqCst) {
        tracing::warn!("campaign stopped early on Ctrl-C");
    }

    tracing::info!(findings = report.findings.len(), "campaign finished");
    report.write_to_file(&args.out)?;
    println!("wrote report to {}", args.out.display());

    Ok(())
}
