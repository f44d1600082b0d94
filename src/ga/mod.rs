//! Evolutionary search engine (C7): population, selection, crossover,
//! mutation and the fitness function driving them, per spec.md 4.7.
pub mod crossover;
pub mod engine;
pub mod fitness;
pub mod mutation;
pub mod selection;

pub use engine::{evolve, GaParams, Population};
