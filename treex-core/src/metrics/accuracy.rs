use super::{ratio, Metric};
use crate::error::{Result, TreexError};
use crate::tensor::Tensor;

/// Fraction of examples whose highest-scoring class equals the label.
///
/// `preds` holds class scores on the last axis. `target` is integer labels
/// shaped like `preds` without that axis, or one-hot rows shaped like `preds`.
#[derive(Debug, Clone, PartialEq)]
pub struct Accuracy {
    name: String,
}

impl Default for Accuracy {
    fn default() -> Self {
        Accuracy {
            name: "accuracy".to_string(),
        }
    }
}

impl Accuracy {
    pub fn new() -> Self {
        Accuracy::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Metric for Accuracy {
    fn name(&self) -> &str {
        &self.name
    }

    fn statistic_names(&self) -> &[&'static str] {
        &["correct", "count"]
    }

    fn batch_statistics(&self, target: &Tensor, preds: &Tensor) -> Result<Vec<f32>> {
        let predicted = preds.argmax();
        let labels = if target.shape() == preds.shape() {
            target.argmax()
        } else {
            target.detach()
        };
        if labels.shape() != predicted.shape() {
            return Err(TreexError::shape(
                self.name.as_str(),
                predicted.shape(),
                target.shape(),
                "Accuracy",
            ));
        }
        let correct = predicted
            .data()
            .iter()
            .zip(labels.data())
            .filter(|(p, l)| p == l)
            .count();
        Ok(vec![correct as f32, labels.numel() as f32])
    }

    fn reduce(&self, statistics: &[f32]) -> f32 {
        match statistics {
            [correct, count] => ratio(*correct, *count),
            _ => f32::NAN,
        }
    }
}
