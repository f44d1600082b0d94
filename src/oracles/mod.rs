//! Bug oracle set (C6). Per the Design Notes redesign flag ("closed set
//! of eleven named checks, not an open trait hierarchy"), each detector is
//! a small struct implementing `BugOracle`; `OracleSet` owns them as
//! trait objects and iterates once per finished transaction. Grounded
//! module-by-module on `original_source/fuzzer/detectors/*.py`.
mod arbitrary_storage_write;
mod assertion_failure;
mod block_dependency;
mod integer_overflow;
mod leaking_ether;
mod locking_ether;
mod reentrancy;
mod transaction_order_dependency;
mod unhandled_exception;
mod unprotected_selfdestruct;
mod unsafe_delegatecall;

use crate::interpreter::ExecutionResult;
use crate::types::{Address, Word};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The eleven SWC identifiers named in spec.md 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Swc {
    IntegerOverflow,       // SWC-101
    UnhandledException,    // SWC-104
    LeakingEther,           // SWC-105
    UnprotectedSelfdestruct, // SWC-106
    Reentrancy,             // SWC-107
    AssertionFailure,       // SWC-110
    UnsafeDelegatecall,     // SWC-112
    TransactionOrderDependency, // SWC-114
    BlockDependency,        // SWC-120
    ArbitraryStorageWrite,  // SWC-124
    LockingEther,           // SWC-132
}

impl Swc {
    pub fn code(self) -> &'static str {
        match self {
            Swc::IntegerOverflow => "SWC-101",
            Swc::UnhandledException => "SWC-104",
            Swc::LeakingEther => "SWC-105",
            Swc::UnprotectedSelfdestruct => "SWC-106",
            Swc::Reentrancy => "SWC-107",
            Swc::AssertionFailure => "SWC-110",
            Swc::UnsafeDelegatecall => "SWC-112",
            Swc::TransactionOrderDependency => "SWC-114",
            Swc::BlockDependency => "SWC-120",
            Swc::ArbitraryStorageWrite => "SWC-124",
            Swc::LockingEther => "SWC-132",
        }
    }

    /// Matches the `self.severity` each Python detector in
    /// `original_source/fuzzer/detectors/` sets on its own findings.
    pub fn severity(self) -> Severity {
        match self {
            Swc::IntegerOverflow => Severity::High,
            Swc::UnhandledException => Severity::Medium,
            Swc::LeakingEther => Severity::High,
            Swc::UnprotectedSelfdestruct => Severity::High,
            Swc::Reentrancy => Severity::High,
            Swc::AssertionFailure => Severity::Medium,
            Swc::UnsafeDelegatecall => Severity::High,
            Swc::TransactionOrderDependency => Severity::Medium,
            Swc::BlockDependency => Severity::Medium,
            Swc::ArbitraryStorageWrite => Severity::High,
            Swc::LockingEther => Severity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub swc: Swc,
    pub tx_index: u32,
    pub pc: usize,
    pub contract: Address,
    pub description: String,
    pub severity: Severity,
    /// Which individual (its GA-level identity, stamped by the campaign
    /// after collection) first produced this finding.
    pub individual: String,
    /// Campaign-elapsed seconds when this finding was first observed,
    /// stamped by the campaign after collection.
    pub time: f64,
}

impl Finding {
    pub fn new(swc: Swc, tx_index: u32, pc: usize, contract: Address, description: String) -> Self {
        Self {
            swc,
            tx_index,
            pc,
            contract,
            description,
            severity: swc.severity(),
            individual: String::new(),
            time: 0.0,
        }
    }
}

/// Per-transaction context an oracle needs beyond the raw trace: who the
/// target is, whether it is payable and whether the static CFG ever
/// reaches an ether-sending opcode. `trusted_addresses` accumulates, over
/// an individual's gene sequence, every 20-byte address the attacker has
/// already supplied as calldata — SWC-105/SWC-106 only fire once a
/// non-attacker-sender transaction routes ether or ownership through one
/// of those addresses.
pub struct OracleContext<'a> {
    pub target: Address,
    pub attacker: Address,
    pub can_send_ether: bool,
    pub is_payable: bool,
    pub tx_value: Word,
    pub is_attacker_sender: bool,
    pub trusted_addresses: &'a HashSet<Address>,
    /// Addresses that have, in an earlier or the current transaction,
    /// already paid value into the target — SWC-105 exempts a refund to
    /// one of them from being treated as a leak.
    pub spenders: &'a HashSet<Address>,
}

pub trait BugOracle {
    fn swc(&self) -> Swc;
    /// Called once per finished transaction with its full trace.
    fn check(&mut self, result: &ExecutionResult, ctx: &OracleContext<'_>) -> Vec<Finding>;
    /// Called once at campaign start / whenever a target is re-deployed,
    /// so per-contract oracle state (e.g. observed storage writers) does
    /// not leak across unrelated runs.
    fn reset(&mut self) {}
}

/// Owns all eleven detectors and dispatches each finished transaction to
/// all of them, deduplicating findings by `(swc, pc)`.
pub struct OracleSet {
    oracles: Vec<Box<dyn BugOracle>>,
    seen: std::collections::HashSet<(Swc, usize)>,
}

impl OracleSet {
    pub fn all() -> Self {
        let oracles: Vec<Box<dyn BugOracle>> = vec![
            Box::new(integer_overflow::IntegerOverflowOracle::default()),
            Box::new(unhandled_exception::UnhandledExceptionOracle::default()),
            Box::new(leaking_ether::LeakingEtherOracle::default()),
            Box::new(unprotected_selfdestruct::UnprotectedSelfdestructOracle::default()),
            Box::new(reentrancy::ReentrancyOracle::default()),
            Box::new(assertion_failure::AssertionFailureOracle::default()),
            Box::new(unsafe_delegatecall::UnsafeDelegatecallOracle::default()),
            Box::new(transaction_order_dependency::TransactionOrderDependencyOracle::default()),
            Box::new(block_dependency::BlockDependencyOracle::default()),
            Box::new(arbitrary_storage_write::ArbitraryStorageWriteOracle::default()),
            Box::new(locking_ether::LockingEtherOracle::default()),
        ];
        Self {
            oracles,
            seen: std::collections::HashSet::new(),
        }
    }

    pub fn reset(&mut self) {
        self.seen.clear();
        for o in &mut self.oracles {
            o.reset();
        }
    }

    pub fn check(&mut self, result: &ExecutionResult, ctx: &OracleContext<'_>) -> Vec<Finding> {
        let mut out = Vec::new();
        for oracle in &mut self.oracles {
            for finding in oracle.check(result, ctx) {
                if self.seen.insert((finding.swc, finding.pc)) {
                    out.push(finding);
                }
            }
        }
        out
    }
}

/// Concrete value of the operand `idx_from_top` slots below the top of
/// the pre-execution stack (0 = top, the first value this opcode pops).
pub(crate) fn operand(step: &crate::interpreter::TraceStep, idx_from_top: usize) -> Option<Word> {
    let len = step.stack_before.len();
    if idx_from_top >= len {
        return None;
    }
    Some(step.stack_before[len - 1 - idx_from_top])
}

/// Whether that same operand slot is tainted (attacker-influenced).
pub(crate) fn operand_tainted(step: &crate::interpreter::TraceStep, idx_from_top: usize) -> bool {
    step.stack_taint.get(idx_from_top).copied().unwrap_or(false)
}

/// Reads an operand as the lower 20 bytes of its 256-bit word, the way
/// the EVM itself truncates any value used as an address.
pub(crate) fn address_operand(step: &crate::interpreter::TraceStep, idx_from_top: usize) -> Option<Address> {
    operand(step, idx_from_top).map(|w| {
        let mut buf = [0u8; 32];
        w.to_big_endian(&mut buf);
        Address::from_slice(&buf[12..32])
    })
}
