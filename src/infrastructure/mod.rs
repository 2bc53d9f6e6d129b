pub mod augmentation;
pub mod persistence;
