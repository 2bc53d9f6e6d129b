use crate::config::{AugmentationConfig, TrainingConfig};
use crate::domain::dataset::LabeledDataset;
use crate::domain::errors::AppError;
use crate::infrastructure::augmentation::Augmenter;
use crate::model::cnn::GenreCnn;
use crate::training::callbacks::{EarlyStopDecision, EarlyStopping, ReduceLrOnPlateau};
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tch::nn::OptimizerConfig;
use tch::{Kind, Tensor, nn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
    pub best_epoch: Option<usize>,
    pub stopped_early: bool,
}

/// Mean categorical cross-entropy of one-hot `targets` against `logits`.
pub fn categorical_cross_entropy(logits: &Tensor, targets: &Tensor) -> Tensor {
    -(targets * logits.log_softmax(-1, Kind::Float))
        .sum_dim_intlist(-1, false, Kind::Float)
        .mean(Kind::Float)
}

fn correct_count(logits: &Tensor, targets: &Tensor) -> i64 {
    logits
        .argmax(-1, false)
        .eq_tensor(&targets.argmax(-1, false))
        .sum(Kind::Int64)
        .int64_value(&[])
}

/// Loss (cross-entropy plus the L2 penalty) and accuracy in inference mode.
pub fn evaluate(
    model: &GenreCnn,
    xs: &Tensor,
    ys: &Tensor,
    batch_size: i64,
) -> Result<(f64, f64), AppError> {
    let n = xs.size()[0];
    if n == 0 {
        return Err(AppError::EmptyDataset("evaluation set".to_string()));
    }
    let device = model.device();
    tch::no_grad(|| {
        let mut loss_sum = 0.0;
        let mut correct = 0;
        for (bx, by) in xs.split(batch_size, 0).iter().zip(ys.split(batch_size, 0).iter()) {
            let bx = bx.to_device(device);
            let by = by.to_device(device);
            let logits = model.logits_t(&bx, false);
            loss_sum += categorical_cross_entropy(&logits, &by).double_value(&[]) * bx.size()[0] as f64;
            correct += correct_count(&logits, &by);
        }
        let loss = loss_sum / n as f64 + model.l2_loss().double_value(&[]);
        Ok((loss, correct as f64 / n as f64))
    })
}

pub struct Trainer<'a> {
    model: &'a GenreCnn,
    config: TrainingConfig,
    augmenter: Augmenter,
    rng: StdRng,
}

impl<'a> Trainer<'a> {
    pub fn new(model: &'a GenreCnn, config: TrainingConfig, augmentation: &AugmentationConfig) -> Self {
        let augmenter = Augmenter::new(augmentation, config.seed);
        let rng = StdRng::seed_from_u64(config.seed);
        Trainer { model, config, augmenter, rng }
    }

    /// Fits the model on `train`, validating on `validation` after every epoch.
    /// On return the model holds the weights of the best validation-accuracy
    /// epoch.
    pub fn train(
        &mut self,
        train: &LabeledDataset,
        validation: &LabeledDataset,
    ) -> Result<TrainingHistory, AppError> {
        let xs = train.features_tensor()?;
        let ys = train.one_hot_labels();
        let val_xs = validation.features_tensor()?;
        let val_ys = validation.one_hot_labels();
        let device = self.model.device();
        let batch_size = self.config.batch_size as i64;

        let mut lr = self.config.learning_rate;
        let mut opt = nn::Adam::default().build(self.model.var_store(), lr)?;
        let mut reduce_lr = ReduceLrOnPlateau::new(
            self.config.lr_factor,
            self.config.lr_patience,
            self.config.min_lr,
        );
        let mut early_stop = EarlyStopping::new(self.config.early_stop_patience);
        let mut best_weights = None;
        let mut history = TrainingHistory::default();

        log::info!(
            "Training on {} samples, validating on {} (augmentations: {:?})",
            train.len(),
            validation.len(),
            self.augmenter.names()
        );

        let mut order: Vec<i64> = (0..train.len() as i64).collect();
        let steps = train.len().div_ceil(self.config.batch_size) as u64;

        for epoch in 0..self.config.epochs {
            order.shuffle(&mut self.rng);

            let pb = ProgressBar::new(steps);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                    .progress_chars("#>-"),
            );
            pb.set_message(format!("Epoch {}/{}", epoch + 1, self.config.epochs));

            let mut loss_sum = 0.0;
            let mut correct = 0;
            let mut seen = 0usize;
            for chunk in order.chunks(self.config.batch_size) {
                pb.inc(1);
                // Batch norm needs more than one value per channel in train mode.
                if chunk.len() < 2 {
                    continue;
                }
                let idx = Tensor::from_slice(chunk);
                let bx = self.augmenter.augment(&xs.index_select(0, &idx)).to_device(device);
                let by = ys.index_select(0, &idx).to_device(device);

                let logits = self.model.logits_t(&bx, true);
                let loss = categorical_cross_entropy(&logits, &by) + self.model.l2_loss();
                opt.backward_step(&loss);

                loss_sum += loss.double_value(&[]) * chunk.len() as f64;
                correct += correct_count(&logits, &by);
                seen += chunk.len();
            }
            pb.finish_and_clear();

            let train_loss = if seen > 0 { loss_sum / seen as f64 } else { f64::NAN };
            let train_acc = if seen > 0 { correct as f64 / seen as f64 } else { 0.0 };
            let (val_loss, val_acc) = evaluate(self.model, &val_xs, &val_ys, batch_size)?;
            if !train_loss.is_finite() || !val_loss.is_finite() {
                log::warn!("Epoch {}: non-finite loss (train {train_loss}, val {val_loss})", epoch + 1);
            }

            log::info!(
                "Epoch {}/{}: loss {:.4} - accuracy {:.4} - val_loss {:.4} - val_accuracy {:.4} - lr {:.1e}",
                epoch + 1,
                self.config.epochs,
                train_loss,
                train_acc,
                val_loss,
                val_acc,
                lr
            );
            history.epochs.push(EpochRecord {
                epoch: epoch + 1,
                loss: train_loss,
                accuracy: train_acc,
                val_loss,
                val_accuracy: val_acc,
                learning_rate: lr,
            });

            if let Some(new_lr) = reduce_lr.on_epoch_end(val_loss, lr) {
                log::info!("Reducing learning rate to {new_lr:.1e}");
                lr = new_lr;
                opt.set_lr(lr);
            }

            match early_stop.on_epoch_end(epoch + 1, val_acc) {
                EarlyStopDecision::Improved => best_weights = Some(self.model.snapshot()),
                EarlyStopDecision::Continue => {}
                EarlyStopDecision::Stop => {
                    log::info!(
                        "Early stopping at epoch {}, best val_accuracy {:.4} at epoch {:?}",
                        epoch + 1,
                        early_stop.best(),
                        early_stop.best_epoch()
                    );
                    history.stopped_early = true;
                    break;
                }
            }
        }

        if let Some(weights) = best_weights {
            log::info!("Restoring weights from epoch {:?}", early_stop.best_epoch());
            self.model.restore(&weights)?;
        }
        history.best_epoch = early_stop.best_epoch();
        Ok(history)
    }
}
