pub mod callbacks;
pub mod trainer;
