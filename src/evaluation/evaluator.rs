use crate::domain::dataset::LabeledDataset;
use crate::domain::errors::AppError;
use crate::domain::genres::GenreSet;
use crate::evaluation::metrics::{ClassificationReport, ConfusionMatrix};
use crate::model::cnn::GenreCnn;
use crate::training::trainer::categorical_cross_entropy;
use serde::Serialize;
use std::fmt;
use tch::Tensor;

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub test_loss: f64,
    pub test_accuracy: f64,
    pub confusion: ConfusionMatrix,
    pub report: ClassificationReport,
}

/// Argmax class per row of `(N, num_classes)` scores.
pub fn predicted_classes(scores: &Tensor) -> Result<Vec<usize>, AppError> {
    let classes = Vec::<i64>::try_from(scores.argmax(-1, false))?;
    Ok(classes.into_iter().map(|c| c as usize).collect())
}

/// Scores the test set in one batched inference pass; the loss and the
/// predictions come from the same logits.
pub fn evaluate_model(
    model: &GenreCnn,
    test: &LabeledDataset,
    genres: &GenreSet,
    batch_size: i64,
) -> Result<EvaluationReport, AppError> {
    let xs = test.features_tensor()?;
    let ys = test.one_hot_labels();
    let logits = model.predict_logits(&xs, batch_size);
    let test_loss = tch::no_grad(|| {
        categorical_cross_entropy(&logits, &ys).double_value(&[]) + model.l2_loss().double_value(&[])
    });

    let y_pred = predicted_classes(&logits)?;
    let confusion = ConfusionMatrix::new(&test.labels(), &y_pred, genres.len());
    let report = ClassificationReport::new(&confusion, genres);

    Ok(EvaluationReport {
        test_loss,
        test_accuracy: confusion.accuracy(),
        confusion,
        report,
    })
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Test Accuracy: {:.2}%", self.test_accuracy * 100.0)?;
        writeln!(f, "\nConfusion Matrix:")?;
        write!(f, "{}", self.confusion)?;
        writeln!(f, "\nClassification Report:")?;
        write!(f, "{}", self.report)
    }
}
