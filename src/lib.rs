pub mod config;
pub mod domain;
pub mod evaluation;
pub mod infrastructure;
pub mod model;
pub mod pipeline;
pub mod preprocessing;
pub mod training;
