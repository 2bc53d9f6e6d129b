use crate::config::Config;
use crate::domain::errors::AppError;
use crate::evaluation::evaluator::{EvaluationReport, evaluate_model};
use crate::infrastructure::persistence::{ModelManifest, save_model};
use crate::model::cnn::GenreCnn;
use crate::preprocessing::features::{ExtractionReport, FeatureExtractor};
use crate::training::trainer::{Trainer, TrainingHistory};
use std::path::PathBuf;

#[derive(Debug)]
pub struct RunSummary {
    pub extraction: ExtractionReport,
    pub train_size: usize,
    pub test_size: usize,
    pub history: TrainingHistory,
    pub evaluation: EvaluationReport,
    pub model_path: PathBuf,
}

/// Extract, split, build, train, evaluate and save.
pub fn run(config: &Config) -> Result<RunSummary, AppError> {
    let genres = config.genres();
    let extractor = FeatureExtractor::new(config.features.clone());

    log::info!("Extracting features from {}", config.data.data_dir.display());
    let (dataset, extraction) = extractor.extract_dir(&config.data.data_dir, &genres)?;
    log::info!(
        "Extracted {} samples, skipped {} files, {} zero-variance clips",
        extraction.extracted,
        extraction.skipped.len(),
        extraction.degenerate.len()
    );

    let split = dataset.stratified_split(config.training.test_size, config.training.seed)?;
    let (train_size, test_size) = (split.train.len(), split.test.len());

    let device = config.device()?;
    let (h, w, c) = extractor.feature_shape();
    let input_shape = [h as i64, w as i64, c as i64];
    let model = GenreCnn::new(device, input_shape, genres.len() as i64)?
        .with_l2_penalty(config.training.l2_penalty);
    log::info!("Built model for input {input_shape:?} on {device:?}");

    let mut trainer = Trainer::new(&model, config.training.clone(), &config.augmentation);
    let history = trainer.train(&split.train, &split.test)?;

    let evaluation = evaluate_model(&model, &split.test, &genres, config.training.batch_size as i64)?;

    let manifest = ModelManifest {
        genres,
        input_shape,
        num_classes: model.num_classes(),
        test_accuracy: Some(evaluation.test_accuracy),
        history: Some(history.clone()),
    };
    save_model(&model, &manifest, &config.model.output_path)?;

    Ok(RunSummary {
        extraction,
        train_size,
        test_size,
        history,
        evaluation,
        model_path: config.model.output_path.clone(),
    })
}
