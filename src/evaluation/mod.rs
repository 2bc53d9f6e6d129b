pub mod evaluator;
pub mod metrics;
