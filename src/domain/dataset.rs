use crate::domain::entities::LabeledSample;
use crate::domain::errors::AppError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tch::{Kind, Tensor};

/// In-memory collection of extracted features and their genre indices.
#[derive(Debug, Clone, Default)]
pub struct LabeledDataset {
    samples: Vec<LabeledSample>,
    num_classes: usize,
}

#[derive(Debug)]
pub struct Split {
    pub train: LabeledDataset,
    pub test: LabeledDataset,
}

impl LabeledDataset {
    pub fn new(samples: Vec<LabeledSample>, num_classes: usize) -> Self {
        LabeledDataset { samples, num_classes }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn samples(&self) -> &[LabeledSample] {
        &self.samples
    }

    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }

    /// Per-sample shape, taken from the first sample.
    pub fn feature_shape(&self) -> Option<(usize, usize, usize)> {
        self.samples.first().map(|s| s.feature.shape())
    }

    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_classes];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }

    /// Stacks every feature into a channels-last `(N, H, W, C)` float tensor.
    pub fn features_tensor(&self) -> Result<Tensor, AppError> {
        let (h, w, c) = self
            .feature_shape()
            .ok_or_else(|| AppError::EmptyDataset("dataset".to_string()))?;
        let mut flat = Vec::with_capacity(self.samples.len() * h * w * c);
        for sample in &self.samples {
            if sample.feature.shape() != (h, w, c) {
                return Err(AppError::Feature(format!(
                    "inconsistent feature shape {:?}, expected {:?}",
                    sample.feature.shape(),
                    (h, w, c)
                )));
            }
            flat.extend(sample.feature.data.iter().copied());
        }
        Ok(Tensor::from_slice(&flat).view([
            self.samples.len() as i64,
            h as i64,
            w as i64,
            c as i64,
        ]))
    }

    pub fn label_tensor(&self) -> Tensor {
        let labels: Vec<i64> = self.samples.iter().map(|s| s.label as i64).collect();
        Tensor::from_slice(&labels)
    }

    /// One-hot `(N, num_classes)` float labels.
    pub fn one_hot_labels(&self) -> Tensor {
        self.label_tensor()
            .one_hot(self.num_classes as i64)
            .to_kind(Kind::Float)
    }

    /// Splits into train/test partitions that each keep every class's share of
    /// the whole dataset. Each class contributes `round(count * test_size)`
    /// samples to the test side, clamped so both sides get at least one.
    pub fn stratified_split(self, test_size: f64, seed: u64) -> Result<Split, AppError> {
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(AppError::StratifiedSplit(format!(
                "test_size must be in (0, 1), got {test_size}"
            )));
        }
        if self.samples.is_empty() {
            return Err(AppError::StratifiedSplit("dataset is empty".to_string()));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); self.num_classes];
        for (i, sample) in self.samples.iter().enumerate() {
            by_class[sample.label].push(i);
        }

        let mut in_test = vec![false; self.samples.len()];
        for (class, indices) in by_class.iter_mut().enumerate() {
            if indices.is_empty() {
                continue;
            }
            if indices.len() < 2 {
                return Err(AppError::StratifiedSplit(format!(
                    "class {class} has {} sample(s), need at least 2",
                    indices.len()
                )));
            }
            indices.shuffle(&mut rng);
            let n_test = ((indices.len() as f64 * test_size).round() as usize)
                .clamp(1, indices.len() - 1);
            for &i in indices.iter().take(n_test) {
                in_test[i] = true;
            }
        }

        let mut train = Vec::new();
        let mut test = Vec::new();
        for (sample, is_test) in self.samples.into_iter().zip(in_test) {
            if is_test {
                test.push(sample);
            } else {
                train.push(sample);
            }
        }
        train.shuffle(&mut rng);
        test.shuffle(&mut rng);

        Ok(Split {
            train: LabeledDataset::new(train, self.num_classes),
            test: LabeledDataset::new(test, self.num_classes),
        })
    }
}
