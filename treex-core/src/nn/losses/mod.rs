// src/nn/losses/mod.rs

//! Loss functions.
//!
//! A loss maps a `(target, preds)` batch to a scalar, the mean of its
//! per-example values. The result stays traced when `preds` is, so losses
//! can be differentiated with [`value_and_grad`](crate::autograd::value_and_grad).

pub mod crossentropy;
pub mod mse;

pub use crossentropy::Crossentropy;
pub use mse::MeanSquaredError;

use crate::error::Result;
use crate::tensor::Tensor;
use std::fmt::Debug;

pub trait Loss: Debug + Send + Sync {
    /// Base name; the accumulated value is logged as `<name>_loss`.
    fn name(&self) -> &str;

    /// Factor applied to this loss in the weighted total.
    fn weight(&self) -> f32 {
        1.0
    }

    /// Mean loss over the batch as a rank-0 tensor.
    fn call(&self, target: &Tensor, preds: &Tensor) -> Result<Tensor>;
}

/// Number of examples in a batch: the leading axis, or 1 for a scalar.
pub fn batch_size(preds: &Tensor) -> usize {
    preds.shape().first().copied().unwrap_or(1)
}
