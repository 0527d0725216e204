// src/metrics/mod.rs

//! Metrics and the resettable loss/metric accumulators.
//!
//! A [`Metric`] turns one batch into a fixed list of sufficient statistics
//! (e.g. number correct and number seen). Accumulators add those statistics
//! up across batches and only divide in `compute`, so results do not depend
//! on batch order or on how the data was split into batches.

pub mod accumulators;
pub mod accuracy;
pub mod mean;

pub use accumulators::{Losses, LossesAndMetrics, Metrics};
pub use accuracy::Accuracy;
pub use mean::Mean;

use crate::error::Result;
use crate::tensor::Tensor;
use std::fmt::Debug;

pub trait Metric: Debug + Send + Sync {
    /// Name the reduced value is logged under.
    fn name(&self) -> &str;

    /// Names of the running statistics, in the order of
    /// [`batch_statistics`](Metric::batch_statistics).
    fn statistic_names(&self) -> &[&'static str];

    /// Sufficient statistics of one batch. Combining batches is plain
    /// element-wise addition.
    fn batch_statistics(&self, target: &Tensor, preds: &Tensor) -> Result<Vec<f32>>;

    /// Final value from accumulated statistics. Returns `NaN` when nothing
    /// was accumulated.
    fn reduce(&self, statistics: &[f32]) -> f32;
}

/// `total / count`, or `NaN` for an empty accumulator.
pub fn ratio(total: f32, count: f32) -> f32 {
    if count == 0.0 {
        f32::NAN
    } else {
        total / count
    }
}
