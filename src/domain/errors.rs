use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Audio processing error: {0}")]
    Audio(#[from] dasp_rs::AudioError),
    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Progress template error: {0}")]
    Template(#[from] indicatif::style::TemplateError),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("No samples could be extracted from {0}")]
    EmptyDataset(String),
    #[error("Stratified split impossible: {0}")]
    StratifiedSplit(String),
    #[error("Feature extraction failed: {0}")]
    Feature(String),
}
