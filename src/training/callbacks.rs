//! Epoch-end controllers for the training loop: learning-rate reduction on a
//! validation-loss plateau, and early stopping on validation accuracy.

/// Multiplies the learning rate by `factor` once `patience` epochs pass
/// without `val_loss` improving by more than `min_delta`. Never goes below
/// `min_lr`.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_lr: f64,
    min_delta: f64,
    best: f64,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(factor: f64, patience: usize, min_lr: f64) -> Self {
        ReduceLrOnPlateau {
            factor,
            patience,
            min_lr,
            min_delta: 1e-4,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// Returns the new learning rate when a reduction happens.
    pub fn on_epoch_end(&mut self, val_loss: f64, current_lr: f64) -> Option<f64> {
        if val_loss < self.best - self.min_delta {
            self.best = val_loss;
            self.wait = 0;
            return None;
        }
        self.wait += 1;
        if self.wait < self.patience {
            return None;
        }
        self.wait = 0;
        if current_lr > self.min_lr {
            Some((current_lr * self.factor).max(self.min_lr))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStopDecision {
    /// This epoch is the best so far; its weights should be kept.
    Improved,
    Continue,
    Stop,
}

/// Stops after `patience` epochs without `val_accuracy` improving.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        EarlyStopping {
            patience,
            best: f64::NEG_INFINITY,
            best_epoch: None,
            wait: 0,
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn on_epoch_end(&mut self, epoch: usize, val_accuracy: f64) -> EarlyStopDecision {
        if val_accuracy > self.best {
            self.best = val_accuracy;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return EarlyStopDecision::Improved;
        }
        self.wait += 1;
        if self.wait >= self.patience {
            EarlyStopDecision::Stop
        } else {
            EarlyStopDecision::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lr_drops_after_patience_epochs_without_improvement() {
        let mut reduce = ReduceLrOnPlateau::new(0.2, 5, 1e-5);
        let mut lr = 1e-4;
        assert_eq!(reduce.on_epoch_end(1.0, lr), None);
        for _ in 0..4 {
            assert_eq!(reduce.on_epoch_end(1.0, lr), None);
        }
        lr = reduce.on_epoch_end(1.0, lr).unwrap();
        assert!((lr - 2e-5).abs() < 1e-12);

        // wait counter restarts after a reduction
        for _ in 0..4 {
            assert_eq!(reduce.on_epoch_end(1.0, lr), None);
        }
        lr = reduce.on_epoch_end(1.0, lr).unwrap();
        assert_eq!(lr, 1e-5);

        for _ in 0..4 {
            reduce.on_epoch_end(1.0, lr);
        }
        assert_eq!(reduce.on_epoch_end(1.0, lr), None);
    }

    #[test]
    fn improvement_resets_plateau_counter() {
        let mut reduce = ReduceLrOnPlateau::new(0.2, 2, 1e-5);
        reduce.on_epoch_end(1.0, 1e-4);
        reduce.on_epoch_end(1.0, 1e-4);
        assert_eq!(reduce.on_epoch_end(0.5, 1e-4), None);
        assert_eq!(reduce.on_epoch_end(0.5, 1e-4), None);
        assert!(reduce.on_epoch_end(0.5, 1e-4).is_some());
    }

    #[test]
    fn tiny_loss_changes_do_not_count() {
        let mut reduce = ReduceLrOnPlateau::new(0.5, 1, 0.0);
        reduce.on_epoch_end(1.0, 1.0);
        assert_eq!(reduce.on_epoch_end(1.0 - 1e-6, 1.0), Some(0.5));
    }

    #[test]
    fn early_stop_tracks_best_epoch() {
        let mut stop = EarlyStopping::new(3);
        assert_eq!(stop.on_epoch_end(0, 0.2), EarlyStopDecision::Improved);
        assert_eq!(stop.on_epoch_end(1, 0.5), EarlyStopDecision::Improved);
        assert_eq!(stop.on_epoch_end(2, 0.5), EarlyStopDecision::Continue);
        assert_eq!(stop.on_epoch_end(3, 0.4), EarlyStopDecision::Continue);
        assert_eq!(stop.on_epoch_end(4, 0.1), EarlyStopDecision::Stop);
        assert_eq!(stop.best_epoch(), Some(1));
        assert_eq!(stop.best(), 0.5);
    }

    #[test]
    fn early_stop_counter_resets_on_improvement() {
        let mut stop = EarlyStopping::new(2);
        stop.on_epoch_end(0, 0.3);
        assert_eq!(stop.on_epoch_end(1, 0.3), EarlyStopDecision::Continue);
        assert_eq!(stop.on_epoch_end(2, 0.6), EarlyStopDecision::Improved);
        assert_eq!(stop.on_epoch_end(3, 0.6), EarlyStopDecision::Continue);
        assert_eq!(stop.on_epoch_end(4, 0.6), EarlyStopDecision::Stop);
    }
}
