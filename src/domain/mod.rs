pub mod dataset;
pub mod entities;
pub mod errors;
pub mod genres;
