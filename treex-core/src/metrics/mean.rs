use super::{ratio, Metric};
use crate::error::Result;
use crate::tensor::Tensor;

/// Running mean of every element of `preds`; `target` is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct Mean {
    name: String,
}

impl Mean {
    pub fn new(name: impl Into<String>) -> Self {
        Mean { name: name.into() }
    }
}

impl Metric for Mean {
    fn name(&self) -> &str {
        &self.name
    }

    fn statistic_names(&self) -> &[&'static str] {
        &["total", "count"]
    }

    fn batch_statistics(&self, _target: &Tensor, preds: &Tensor) -> Result<Vec<f32>> {
        Ok(vec![preds.data().iter().sum(), preds.numel() as f32])
    }

    fn reduce(&self, statistics: &[f32]) -> f32 {
        match statistics {
            [total, count] => ratio(*total, *count),
            _ => f32::NAN,
        }
    }
}
