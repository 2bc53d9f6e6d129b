use crate::domain::errors::AppError;
use crate::domain::genres::{GENRES, GenreSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tch::Device;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub features: FeatureConfig,
    pub training: TrainingConfig,
    pub augmentation: AugmentationConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub sample_rate: u32,
    pub n_mels: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    pub time_frames: usize,
    /// Dynamic range kept below the clip peak, in dB.
    pub top_db: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub test_size: f64,
    pub seed: u64,
    pub l2_penalty: f64,
    pub lr_factor: f64,
    pub lr_patience: usize,
    pub min_lr: f64,
    pub early_stop_patience: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    pub enabled: bool,
    /// Degrees.
    pub rotation_range: f64,
    pub width_shift_range: f64,
    pub height_shift_range: f64,
    pub zoom_range: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub device: String,
    pub output_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            data_dir: PathBuf::from("data/genres_original"),
            genres: GENRES.iter().map(|g| g.to_string()).collect(),
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            sample_rate: 22050,
            n_mels: 128,
            n_fft: 2048,
            hop_length: 512,
            time_frames: 250,
            top_db: 80.0,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            batch_size: 32,
            epochs: 100,
            learning_rate: 1e-4,
            test_size: 0.2,
            seed: 42,
            l2_penalty: 1e-3,
            lr_factor: 0.2,
            lr_patience: 5,
            min_lr: 1e-5,
            early_stop_patience: 10,
        }
    }
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        AugmentationConfig {
            enabled: true,
            rotation_range: 10.0,
            width_shift_range: 0.1,
            height_shift_range: 0.1,
            zoom_range: 0.1,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            device: "cuda_if_available".to_string(),
            output_path: PathBuf::from("enhanced_music_genre_classifier.ot"),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let config_str = fs::read_to_string(path)?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self, AppError> {
        let config: Config = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path` if it exists, otherwise falls back to the built-in defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        if path.exists() {
            log::info!("Loading config from {}", path.display());
            Self::from_file(path)
        } else {
            log::info!("No config at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let invalid = |msg: &str| Err(AppError::InvalidConfig(msg.to_string()));

        if self.data.genres.is_empty() {
            return invalid("data.genres must not be empty");
        }
        let f = &self.features;
        if f.sample_rate == 0 || f.n_mels == 0 || f.n_fft == 0 || f.hop_length == 0 || f.time_frames == 0 {
            return invalid("feature sizes must be non-zero");
        }
        if f.top_db <= 0.0 {
            return invalid("features.top_db must be positive");
        }
        let t = &self.training;
        if t.batch_size == 0 || t.epochs == 0 {
            return invalid("training.batch_size and training.epochs must be non-zero");
        }
        if !(t.test_size > 0.0 && t.test_size < 1.0) {
            return invalid("training.test_size must be in (0, 1)");
        }
        if t.learning_rate <= 0.0 || t.min_lr < 0.0 {
            return invalid("learning rates must be positive");
        }
        if !(t.lr_factor > 0.0 && t.lr_factor < 1.0) {
            return invalid("training.lr_factor must be in (0, 1)");
        }
        let a = &self.augmentation;
        if a.zoom_range < 0.0 || a.zoom_range >= 1.0 {
            return invalid("augmentation.zoom_range must be in [0, 1)");
        }
        self.device()?;
        Ok(())
    }

    pub fn genres(&self) -> GenreSet {
        GenreSet::new(self.data.genres.iter().cloned())
    }

    pub fn device(&self) -> Result<Device, AppError> {
        match self.model.device.as_str() {
            "cuda_if_available" => Ok(Device::cuda_if_available()),
            "cuda" | "cuda:0" => Ok(Device::Cuda(0)),
            "cpu" => Ok(Device::Cpu),
            other => Err(AppError::InvalidConfig(format!(
                "invalid device specification '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_constants() {
        let config = Config::default();
        assert_eq!(config.features.sample_rate, 22050);
        assert_eq!(config.features.n_mels, 128);
        assert_eq!(config.features.n_fft, 2048);
        assert_eq!(config.features.hop_length, 512);
        assert_eq!(config.features.time_frames, 250);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.training.epochs, 100);
        assert_eq!(config.genres().len(), 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [data]
            data_dir = "/tmp/gtzan"
            genres = ["jazz", "rock"]

            [training]
            epochs = 3

            [model]
            device = "cpu"
            "#,
        )
        .unwrap();
        assert_eq!(config.data.data_dir, PathBuf::from("/tmp/gtzan"));
        assert_eq!(config.genres().names(), &["jazz".to_string(), "rock".to_string()]);
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.device().unwrap(), Device::Cpu);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Config::from_toml("[training]\ntest_size = 1.5"),
            Err(AppError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_toml("[data]\ngenres = []"),
            Err(AppError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_toml("[model]\ndevice = \"tpu\""),
            Err(AppError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_toml("[training]\nepochs = \"many\""),
            Err(AppError::ConfigParse(_))
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_or_default("/definitely/not/here/config.toml").unwrap();
        assert_eq!(config.training.learning_rate, 1e-4);
    }
}
