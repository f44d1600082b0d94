pub mod analyzer;
pub mod iterator;

pub use analyzer::{BasicBlock, Cfg};
pub use iterator::instructions;
