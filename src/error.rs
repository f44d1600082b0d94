//! Error taxonomy. Tier 1 (internal/fuzzer bugs) is `FuzzError::Internal`,
//! tier 2 (target execution failures, never fatal) is `ExecError`, carried
//! inside a trace step rather than propagated as a `Result` error. See
//! spec.md 7 and SPEC_FULL.md 7.
use thiserror::Error;

/// Tier-1 error: an invariant the fuzzer itself relies on was violated.
/// Re-raised to the caller; the campaign aborts.
#[derive(Debug, Error)]
pub enum FuzzError {
    #[error("ABI encoding failure for {function}: {reason}")]
    AbiEncoding { function: String, reason: String },

    #[error("solver error: {0}")]
    Solver(String),

    #[error("bytecode analysis error: {0}")]
    Analysis(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FuzzResult<T> = Result<T, FuzzError>;

/// Tier-2: a target-execution failure. Never fatal; stored on the trace
/// step and consumed by oracles / pool pruning.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExecError {
    Revert,
    Invalid,
    StackUnderflow,
    StackOverflow,
    OutOfGas,
    InvalidJump,
    WriteProtection,
    OutOfOffset,
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
