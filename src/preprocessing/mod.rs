pub mod features;
pub mod loader;
pub mod mel;
