//! Symbolic/taint subsystem (C4): bit-vector expressions plus the
//! per-transaction shadow-stack taint engine built on top of them.
pub mod expr;
pub mod taint;

pub use expr::{BinOp, Expr, TaintKind, UnOp, Var};
pub use taint::{TaintEngine, TaintList, TaintRecord};
