use crate::domain::errors::AppError;
use crate::domain::genres::GenreSet;
use crate::model::cnn::GenreCnn;
use crate::training::trainer::TrainingHistory;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tch::Device;

/// Written next to the weights so a consumer can rebuild the network and
/// label its outputs without re-deriving the genre order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub genres: GenreSet,
    pub input_shape: [i64; 3],
    pub num_classes: i64,
    pub test_accuracy: Option<f64>,
    pub history: Option<TrainingHistory>,
}

pub fn manifest_path(weights_path: &Path) -> PathBuf {
    weights_path.with_extension("json")
}

pub fn save_model(model: &GenreCnn, manifest: &ModelManifest, weights_path: &Path) -> Result<(), AppError> {
    if let Some(parent) = weights_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    model.save(weights_path)?;

    let json = serde_json::to_string_pretty(manifest)?;
    let mut file = File::create(manifest_path(weights_path))?;
    file.write_all(json.as_bytes())?;
    log::info!(
        "Saved model to {} (manifest {})",
        weights_path.display(),
        manifest_path(weights_path).display()
    );
    Ok(())
}

pub fn load_manifest(weights_path: &Path) -> Result<ModelManifest, AppError> {
    let json = fs::read_to_string(manifest_path(weights_path))?;
    Ok(serde_json::from_str(&json)?)
}

pub fn load_model(weights_path: &Path, device: Device) -> Result<(GenreCnn, ModelManifest), AppError> {
    let manifest = load_manifest(weights_path)?;
    if manifest.genres.len() as i64 != manifest.num_classes {
        return Err(AppError::InvalidConfig(format!(
            "manifest lists {} genres for {} classes",
            manifest.genres.len(),
            manifest.num_classes
        )));
    }
    let model = GenreCnn::load(device, manifest.input_shape, manifest.num_classes, weights_path)?;
    Ok((model, manifest))
}
