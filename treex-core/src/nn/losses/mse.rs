use super::Loss;
use crate::error::{Result, TreexError};
use crate::tensor::Tensor;

/// Mean squared error: the mean of `(preds - target)^2` over every element.
///
/// Per example this is the squared error averaged over the non-batch axes,
/// so the batch mean coincides with the element mean.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanSquaredError {
    name: String,
    weight: f32,
}

impl Default for MeanSquaredError {
    fn default() -> Self {
        MeanSquaredError {
            name: "mean_squared_error".to_string(),
            weight: 1.0,
        }
    }
}

impl MeanSquaredError {
    pub fn new() -> Self {
        MeanSquaredError::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }
}

impl Loss for MeanSquaredError {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn call(&self, target: &Tensor, preds: &Tensor) -> Result<Tensor> {
        if target.shape() != preds.shape() {
            return Err(TreexError::shape(
                self.name.as_str(),
                preds.shape(),
                target.shape(),
                "MeanSquaredError",
            ));
        }
        preds.sub(target)?.square()?.mean()
    }
}

#[cfg(test)]
#[path = "mse_test.rs"]
mod tests;
