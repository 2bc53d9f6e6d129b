use crate::domain::genres::GenreSet;
use serde::Serialize;
use std::fmt;

/// Rows are true classes, columns predicted classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(y_true: &[usize], y_pred: &[usize], num_classes: usize) -> Self {
        let mut counts = vec![vec![0; num_classes]; num_classes];
        for (&t, &p) in y_true.iter().zip(y_pred) {
            counts[t][p] += 1;
        }
        ConfusionMatrix { counts }
    }

    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    pub fn get(&self, true_class: usize, predicted: usize) -> usize {
        self.counts[true_class][predicted]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.num_classes()).map(|i| self.counts[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    pub fn support(&self, class: usize) -> usize {
        self.counts[class].iter().sum()
    }

    pub fn predicted(&self, class: usize) -> usize {
        self.counts.iter().map(|row| row[class]).sum()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .counts
            .iter()
            .flatten()
            .max()
            .map_or(1, |m| m.to_string().len());
        for (i, row) in self.counts.iter().enumerate() {
            let open = if i == 0 { "[[" } else { " [" };
            let close = if i + 1 == self.counts.len() { "]]" } else { "]" };
            let cells: Vec<String> = row.iter().map(|c| format!("{c:>width$}")).collect();
            writeln!(f, "{open}{}{close}", cells.join(" "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class precision/recall/F1 plus accuracy, macro and weighted averages.
/// A zero denominator yields 0.0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

impl ClassificationReport {
    pub fn new(matrix: &ConfusionMatrix, genres: &GenreSet) -> Self {
        let classes: Vec<ClassMetrics> = (0..matrix.num_classes())
            .map(|c| {
                let tp = matrix.get(c, c);
                let precision = ratio(tp, matrix.predicted(c));
                let recall = ratio(tp, matrix.support(c));
                ClassMetrics {
                    label: genres.name(c).map_or_else(|| c.to_string(), str::to_string),
                    precision,
                    recall,
                    f1: f1(precision, recall),
                    support: matrix.support(c),
                }
            })
            .collect();

        let total = matrix.total();
        let n = classes.len().max(1) as f64;
        let macro_avg = ClassMetrics {
            label: "macro avg".to_string(),
            precision: classes.iter().map(|m| m.precision).sum::<f64>() / n,
            recall: classes.iter().map(|m| m.recall).sum::<f64>() / n,
            f1: classes.iter().map(|m| m.f1).sum::<f64>() / n,
            support: total,
        };
        let weighted = |get: fn(&ClassMetrics) -> f64| {
            if total == 0 {
                0.0
            } else {
                classes.iter().map(|m| get(m) * m.support as f64).sum::<f64>() / total as f64
            }
        };
        let weighted_avg = ClassMetrics {
            label: "weighted avg".to_string(),
            precision: weighted(|m| m.precision),
            recall: weighted(|m| m.recall),
            f1: weighted(|m| m.f1),
            support: total,
        };

        ClassificationReport {
            classes,
            accuracy: matrix.accuracy(),
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|m| m.label.len())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(12);
        let row = |f: &mut fmt::Formatter<'_>, m: &ClassMetrics| {
            writeln!(
                f,
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                m.label, m.precision, m.recall, m.f1, m.support
            )
        };

        writeln!(f, "{:>width$} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support")?;
        writeln!(f)?;
        for m in &self.classes {
            row(f, m)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        row(f, &self.macro_avg)?;
        row(f, &self.weighted_avg)
    }
}
