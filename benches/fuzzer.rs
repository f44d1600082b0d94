//! Micro-benchmarks for the hot path of one generation: CFG construction
//! and single-transaction interpretation.
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use evm_ga_fuzz::bytecode::Cfg;
use evm_ga_fuzz::config::FuzzerConfig;
use evm_ga_fuzz::interpreter::{BlockContext, Machine};
use evm_ga_fuzz::types::{Address, Word};
use evm_ga_fuzz::worldstate::WorldState;
use std::collections::HashMap;

// PUSH1 0; SLOAD; PUSH1 4; CALLDATALOAD; ADD; PUSH1 0; SSTORE; STOP, looped
// a handful of times via JUMPI to exercise branch folding in the CFG.
fn loopy_contract() -> Vec<u8> {
    vec![
        0x5b, // JUMPDEST @0
        0x60, 0x00, 0x54, // SLOAD storage[0]
        0x60, 0x04, 0x35, // CALLDATALOAD @4
        0x01, // ADD
        0x60, 0x00, 0x55, // SSTORE
        0x60, 0x04, 0x35, // CALLDATALOAD @4 (loop condition)
        0x15, // ISZERO
        0x60, 0x00, // PUSH1 0
        0x57, // JUMPI back to JUMPDEST
        0x00, // STOP
    ]
}

fn bench_cfg_build(c: &mut Criterion) {
    let code = loopy_contract();
    c.bench_function("cfg_build_small_contract", |b| {
        b.iter(|| black_box(Cfg::build(black_box(&code))));
    });
}

fn bench_run_transaction(c: &mut Criterion) {
    let code = loopy_contract();
    let target = Address::repeat_byte(0xc0);
    let caller = Address::repeat_byte(0xde);
    let config = FuzzerConfig::default();
    let block = BlockContext::default();

    c.bench_function("run_transaction_small_contract", |b| {
        b.iter(|| {
            let mut world = WorldState::local();
            world.deploy(target, &code);
            let mut cfgs = HashMap::new();
            cfgs.insert(target, Cfg::build(&code));
            let mut calldata = vec![0u8; 32];
            calldata[31] = 1;
            black_box(Machine::run_transaction(
                &mut world,
                &mut cfgs,
                &config,
                &block,
                1,
                caller,
                target,
                Word::zero(),
                calldata,
            ));
        });
    });
}

criterion_group!(benches, bench_cfg_build, bench_run_transaction);
criterion_main!(benches);
