pub mod commands;
pub mod config;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod extractor;
pub mod interpreter;
pub mod runner;

#[cfg(test)]
mod test_support;

pub use executor::Judge;
