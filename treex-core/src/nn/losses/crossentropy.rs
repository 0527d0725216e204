use super::Loss;
use crate::error::{Result, TreexError};
use crate::tensor::{create::one_hot, Tensor};

/// Softmax cross-entropy between logits and class targets.
///
/// `preds` holds logits with classes on the last axis. `target` is either
/// integer labels (stored as `f32`) with the shape of `preds` minus its last
/// axis, or a distribution with the same shape as `preds`.
#[derive(Debug, Clone, PartialEq)]
pub struct Crossentropy {
    name: String,
    weight: f32,
}

impl Default for Crossentropy {
    fn default() -> Self {
        Crossentropy {
            name: "crossentropy".to_string(),
            weight: 1.0,
        }
    }
}

impl Crossentropy {
    pub fn new() -> Self {
        Crossentropy::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    fn target_distribution(&self, target: &Tensor, preds: &Tensor) -> Result<Tensor> {
        if target.shape() == preds.shape() {
            return Ok(target.detach());
        }
        match preds.shape().split_last() {
            Some((&classes, leading)) if leading == target.shape() => Ok(one_hot(target, classes)),
            _ => Err(TreexError::shape(
                self.name.as_str(),
                "labels shaped like preds without the class axis",
                target.shape(),
                "Crossentropy",
            )),
        }
    }
}

impl Loss for Crossentropy {
    fn name(&self) -> &str {
        &self.name
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn call(&self, target: &Tensor, preds: &Tensor) -> Result<Tensor> {
        let distribution = self.target_distribution(target, preds)?;
        let last = preds.rank().saturating_sub(1);
        distribution
            .mul(&preds.log_softmax()?)?
            .sum_axes(&[last], false)?
            .mean()?
            .neg()
    }
}

#[cfg(test)]
#[path = "crossentropy_test.rs"]
mod tests;
