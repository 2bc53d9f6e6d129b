use crate::config::FeatureConfig;
use crate::domain::dataset::LabeledDataset;
use crate::domain::entities::{AudioClip, LabeledSample, SpectrogramFeature};
use crate::domain::errors::AppError;
use crate::domain::genres::GenreSet;
use crate::preprocessing::loader::AudioLoader;
use crate::preprocessing::mel::{MelSpectrogram, power_to_db};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array2, Axis, s};
use std::fs;
use std::path::{Path, PathBuf};

const MIN_STD: f32 = 1e-8;

/// What happened to one input file. `degenerate` marks a zero-variance clip
/// that became an all-zero feature.
#[derive(Debug)]
pub enum FileOutcome {
    Extracted { sample: LabeledSample, degenerate: bool },
    Skipped { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Audit trail of an extraction run.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub extracted: usize,
    pub skipped: Vec<SkippedFile>,
    /// Files whose spectrogram had no variance and became all-zero features.
    pub degenerate: Vec<PathBuf>,
}

pub struct FeatureExtractor {
    config: FeatureConfig,
    loader: AudioLoader,
    mel: MelSpectrogram,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        let loader = AudioLoader::new(config.sample_rate);
        let mel = MelSpectrogram::new(config.sample_rate, config.n_fft, config.hop_length, config.n_mels);
        FeatureExtractor { config, loader, mel }
    }

    /// `(n_mels, time_frames, 1)`
    pub fn feature_shape(&self) -> (usize, usize, usize) {
        (self.config.n_mels, self.config.time_frames, 1)
    }

    /// Runs the feature pipeline on a decoded clip. The flag is true when the
    /// clip had zero variance and the feature was zero-filled.
    pub fn extract_clip(&self, clip: &AudioClip) -> Result<(SpectrogramFeature, bool), AppError> {
        if clip.samples.is_empty() {
            return Err(AppError::Feature("clip has no samples".to_string()));
        }
        if clip.samples.iter().any(|s| !s.is_finite()) {
            return Err(AppError::Feature("clip contains non-finite samples".to_string()));
        }

        let mel = self.mel.compute(&clip.samples);
        let db = power_to_db(&mel, self.config.top_db);
        let (standardized, degenerate) = standardize(db);
        let fitted = fit_frames(standardized, self.config.time_frames);
        Ok((SpectrogramFeature::new(fitted.insert_axis(Axis(2))), degenerate))
    }

    pub fn extract_file(&self, path: &Path, label: usize) -> FileOutcome {
        let result = self.loader.load(path).and_then(|clip| {
            log::debug!("{}: {:.2}s at {} Hz", file_name(path), clip.duration_secs(), clip.sample_rate);
            self.extract_clip(&clip)
        });

        match result {
            Ok((feature, degenerate)) => FileOutcome::Extracted {
                sample: LabeledSample::new(feature, label),
                degenerate,
            },
            Err(e) => FileOutcome::Skipped {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        }
    }

    /// Walks `<root>/<genre>/*.wav` for every genre in order. A missing genre
    /// directory is fatal; a file that fails to decode is skipped and reported.
    pub fn extract_dir(
        &self,
        root: &Path,
        genres: &GenreSet,
    ) -> Result<(LabeledDataset, ExtractionReport), AppError> {
        let mut files = Vec::new();
        for (label, genre) in genres.iter() {
            let mut genre_files = wav_files(&root.join(genre))?;
            genre_files.sort();
            log::debug!("{genre}: {} wav files", genre_files.len());
            files.extend(genre_files.into_iter().map(|p| (p, label)));
        }

        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                .progress_chars("#>-"),
        );
        pb.set_message("Extracting features");

        let mut report = ExtractionReport::default();
        let mut samples = Vec::with_capacity(files.len());
        for (path, label) in files {
            match self.extract_file(&path, label) {
                FileOutcome::Extracted { sample, degenerate } => {
                    if degenerate {
                        log::warn!("{} has zero variance, using an all-zero feature", file_name(&path));
                        report.degenerate.push(path);
                    }
                    samples.push(sample);
                }
                FileOutcome::Skipped { path, reason } => {
                    log::warn!("Error processing {}: {}", file_name(&path), reason);
                    report.skipped.push(SkippedFile { path, reason });
                }
            }
            pb.inc(1);
        }
        pb.finish_with_message("Feature extraction completed!");

        report.extracted = samples.len();
        if samples.is_empty() {
            return Err(AppError::EmptyDataset(root.display().to_string()));
        }
        Ok((LabeledDataset::new(samples, genres.len()), report))
    }
}

fn wav_files(dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_wav = path.extension().and_then(|e| e.to_str()) == Some("wav");
        if is_wav && path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Zero mean, unit variance over the whole clip. A clip with (near) zero
/// variance comes back centered, i.e. all zeros, and flagged.
pub fn standardize(mut spec: Array2<f32>) -> (Array2<f32>, bool) {
    let mean = spec.mean().unwrap_or(0.0);
    let std = spec.std(0.0);
    if !(std > MIN_STD) {
        spec.fill(0.0);
        return (spec, true);
    }
    spec.mapv_inplace(|v| (v - mean) / std);
    (spec, false)
}

/// Truncates to the first `frames` columns or zero-pads on the right.
pub fn fit_frames(spec: Array2<f32>, frames: usize) -> Array2<f32> {
    let (bins, current) = spec.dim();
    if current == frames {
        return spec;
    }
    if current > frames {
        return spec.slice(s![.., ..frames]).to_owned();
    }
    let mut fitted = Array2::<f32>::zeros((bins, frames));
    fitted.slice_mut(s![.., ..current]).assign(&spec);
    fitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn noise(n: usize) -> Vec<f32> {
        let mut state = 12345u32;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
            })
            .collect()
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(FeatureConfig::default())
    }

    #[test]
    fn shape_is_fixed_for_any_duration() {
        let extractor = extractor();
        for seconds in [0.25f32, 1.0, 7.0] {
            let n = (22050.0 * seconds) as usize;
            let clip = AudioClip::new(noise(n), 22050);
            let (feature, degenerate) = extractor.extract_clip(&clip).unwrap();
            assert_eq!(feature.shape(), (128, 250, 1));
            assert!(!degenerate);
        }
    }

    #[test]
    fn long_clips_are_standardized() {
        // 250 frames exactly: 1 + len / 512 == 250
        let clip = AudioClip::new(noise(249 * 512), 22050);
        let (feature, _) = extractor().extract_clip(&clip).unwrap();
        assert_abs_diff_eq!(feature.mean(), 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(feature.std(), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn silent_clip_becomes_zero_feature() {
        let clip = AudioClip::new(vec![0.0; 22050], 22050);
        let (feature, degenerate) = extractor().extract_clip(&clip).unwrap();
        assert!(degenerate);
        assert_eq!(feature.shape(), (128, 250, 1));
        assert!(feature.data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn empty_and_non_finite_clips_are_errors() {
        let extractor = extractor();
        assert!(extractor.extract_clip(&AudioClip::new(Vec::new(), 22050)).is_err());
        assert!(extractor.extract_clip(&AudioClip::new(vec![f32::NAN; 4096], 22050)).is_err());
    }

    #[test]
    fn exact_length_is_unchanged() {
        let spec = Array2::from_shape_fn((3, 250), |(i, j)| (i * 1000 + j) as f32);
        let fitted = fit_frames(spec.clone(), 250);
        assert_eq!(fitted, spec);
    }

    #[test]
    fn longer_is_truncated_shorter_is_padded() {
        let spec = Array2::from_shape_fn((2, 300), |(_, j)| j as f32 + 1.0);
        let truncated = fit_frames(spec, 250);
        assert_eq!(truncated.dim(), (2, 250));
        assert_eq!(truncated[[1, 249]], 250.0);

        let spec = Array2::from_elem((2, 10), 5.0);
        let padded = fit_frames(spec, 250);
        assert_eq!(padded.dim(), (2, 250));
        assert_eq!(padded[[0, 9]], 5.0);
        assert!(padded.slice(s![.., 10..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn standardize_flags_constant_input() {
        let (out, degenerate) = standardize(Array2::from_elem((4, 4), -3.0));
        assert!(degenerate);
        assert!(out.iter().all(|&v| v == 0.0));

        let (out, degenerate) = standardize(Array2::from_shape_vec((1, 4), vec![1.0, 2.0, 3.0, 4.0]).unwrap());
        assert!(!degenerate);
        assert_abs_diff_eq!(out.mean().unwrap(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out.std(0.0), 1.0, epsilon = 1e-5);
    }
}
