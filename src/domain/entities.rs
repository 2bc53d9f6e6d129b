use ndarray::Array3;

/// Mono waveform at a known sample rate. Lives only while one file is processed.
#[derive(Debug)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        AudioClip { samples, sample_rate }
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Standardized log-mel spectrogram laid out as (mel bins, frames, channel).
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrogramFeature {
    pub data: Array3<f32>,
}

impl SpectrogramFeature {
    pub fn new(data: Array3<f32>) -> Self {
        SpectrogramFeature { data }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn mean(&self) -> f32 {
        self.data.mean().unwrap_or(0.0)
    }

    pub fn std(&self) -> f32 {
        self.data.std(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct LabeledSample {
    pub feature: SpectrogramFeature,
    pub label: usize,
}

impl LabeledSample {
    pub fn new(feature: SpectrogramFeature, label: usize) -> Self {
        LabeledSample { feature, label }
    }
}
