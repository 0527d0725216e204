use super::{ratio, Metric};
use crate::error::{Result, TreexError};
use crate::nn::losses::{batch_size, Loss};
use crate::tensor::Tensor;
use crate::tree::{KeyPath, Leaf, Leaves, Tree};
use crate::types::LeafKind;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Named running statistics stored as rank-0 `MetricState` leaves.
#[derive(Debug, Clone, PartialEq)]
struct Accumulator {
    log_name: String,
    names: Vec<&'static str>,
    statistics: Vec<Leaf>,
}

impl Accumulator {
    fn new(log_name: String, names: &[&'static str]) -> Self {
        let statistics = names
            .iter()
            .map(|_| Leaf::new(LeafKind::MetricState, Tensor::scalar(0.0)))
            .collect();
        Accumulator {
            log_name,
            names: names.to_vec(),
            statistics,
        }
    }

    fn reset(&self) -> Self {
        Accumulator::new(self.log_name.clone(), &self.names)
    }

    fn values(&self) -> Result<Vec<f32>> {
        self.statistics
            .iter()
            .zip(&self.names)
            .map(|(leaf, name)| {
                let path = format!("{}/{}", self.log_name, name);
                leaf.require_array(&path)?.item()
            })
            .collect()
    }

    /// Adds one batch's statistics to the running ones.
    fn add(&self, batch: &[f32]) -> Result<Self> {
        if batch.len() != self.names.len() {
            return Err(TreexError::structure(
                self.log_name.as_str(),
                format!("statistics {:?}", self.names),
                format!("{} values", batch.len()),
            ));
        }
        let statistics = self
            .values()?
            .iter()
            .zip(batch)
            .zip(&self.statistics)
            .map(|((running, new), leaf)| leaf.with_array(Tensor::scalar(running + new)))
            .collect();
        Ok(Accumulator {
            statistics,
            ..self.clone()
        })
    }
}

impl Tree for Accumulator {
    fn flatten_into(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>) {
        let node = prefix.child(&self.log_name);
        for (name, leaf) in self.names.iter().zip(&self.statistics) {
            leaf.flatten_into(&node.child(name), out);
        }
    }

    fn unflatten_from(&self, leaves: &mut Leaves) -> Result<Self> {
        let statistics = self
            .statistics
            .iter()
            .map(|leaf| leaf.unflatten_from(leaves))
            .collect::<Result<Vec<_>>>()?;
        Ok(Accumulator {
            statistics,
            ..self.clone()
        })
    }
}

/// Picks `base`, or `base_2`, `base_3`, ... if the name is taken.
fn unique_name<'a>(taken: impl Iterator<Item = &'a str> + Clone, base: &str) -> String {
    let is_taken = |candidate: &str| taken.clone().any(|t| t == candidate);
    if !is_taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|i| format!("{}_{}", base, i))
        .find(|candidate| !is_taken(candidate.as_str()))
        .unwrap_or_else(|| base.to_string())
}

const LOSS_STATISTICS: [&str; 2] = ["total", "count"];

/// A weighted sum of losses with one running mean per loss plus one for the
/// weighted total.
///
/// Every loss is logged as `<name>_loss`, the weighted total as `loss`. Each
/// batch contributes `batch_loss * batch_size` to the running total and
/// `batch_size` to the running count.
#[derive(Debug, Clone)]
pub struct Losses {
    losses: Vec<Arc<dyn Loss>>,
    accumulators: Vec<Accumulator>,
    total: Accumulator,
}

impl Default for Losses {
    fn default() -> Self {
        Losses {
            losses: Vec::new(),
            accumulators: Vec::new(),
            total: Accumulator::new("loss".to_string(), &LOSS_STATISTICS),
        }
    }
}

impl Losses {
    pub fn new() -> Self {
        Losses::default()
    }

    /// Appends a loss term. A repeated name gets a numeric suffix.
    pub fn add(mut self, loss: impl Loss + 'static) -> Self {
        let base = format!("{}_loss", loss.name());
        let log_name = unique_name(
            self.accumulators
                .iter()
                .map(|a| a.log_name.as_str())
                .chain(std::iter::once("loss")),
            &base,
        );
        self.accumulators
            .push(Accumulator::new(log_name, &LOSS_STATISTICS));
        self.losses.push(Arc::new(loss));
        self
    }

    pub fn len(&self) -> usize {
        self.losses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.losses.is_empty()
    }

    pub fn reset(&self) -> Self {
        Losses {
            losses: self.losses.clone(),
            accumulators: self.accumulators.iter().map(Accumulator::reset).collect(),
            total: self.total.reset(),
        }
    }

    /// Computes the weighted total loss of one batch and folds every term
    /// into its accumulator.
    ///
    /// # Returns
    /// The weighted total as a rank-0 tensor (traced when `preds` is) and the
    /// updated accumulators.
    pub fn loss_and_update(&self, target: &Tensor, preds: &Tensor) -> Result<(Tensor, Self)> {
        let n = batch_size(preds) as f32;
        let mut total: Option<Tensor> = None;
        let mut accumulators = Vec::with_capacity(self.losses.len());
        for (loss, acc) in self.losses.iter().zip(&self.accumulators) {
            let value = loss.call(target, preds)?;
            if value.numel() != 1 {
                return Err(TreexError::shape(
                    acc.log_name.as_str(),
                    "a scalar loss",
                    value.shape(),
                    "loss_and_update",
                ));
            }
            accumulators.push(acc.add(&[value.item()? * n, n])?);
            let weighted = value.mul_scalar(loss.weight())?;
            total = Some(match total {
                None => weighted,
                Some(sum) => sum.add(&weighted)?,
            });
        }
        let total = total.unwrap_or_else(|| Tensor::scalar(0.0));
        let total_acc = self.total.add(&[total.item()? * n, n])?;
        Ok((
            total,
            Losses {
                losses: self.losses.clone(),
                accumulators,
                total: total_acc,
            },
        ))
    }

    pub fn update(&self, target: &Tensor, preds: &Tensor) -> Result<Self> {
        self.loss_and_update(target, preds).map(|(_, losses)| losses)
    }

    /// Running mean of every loss and of the weighted total; `NaN` if nothing
    /// was accumulated since the last reset.
    pub fn compute(&self) -> Result<BTreeMap<String, f32>> {
        let mut logs = BTreeMap::new();
        for acc in self.accumulators.iter().chain(std::iter::once(&self.total)) {
            let values = acc.values()?;
            logs.insert(acc.log_name.clone(), ratio(values[0], values[1]));
        }
        Ok(logs)
    }
}

impl Tree for Losses {
    fn flatten_into(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>) {
        for acc in &self.accumulators {
            acc.flatten_into(prefix, out);
        }
        self.total.flatten_into(prefix, out);
    }

    fn unflatten_from(&self, leaves: &mut Leaves) -> Result<Self> {
        let accumulators = self
            .accumulators
            .iter()
            .map(|acc| acc.unflatten_from(leaves))
            .collect::<Result<Vec<_>>>()?;
        let total = self.total.unflatten_from(leaves)?;
        Ok(Losses {
            losses: self.losses.clone(),
            accumulators,
            total,
        })
    }
}

/// A collection of metrics, each with its own running statistics.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    metrics: Vec<Arc<dyn Metric>>,
    accumulators: Vec<Accumulator>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    /// Appends a metric. A repeated name gets a numeric suffix.
    pub fn add(mut self, metric: impl Metric + 'static) -> Self {
        let log_name = unique_name(
            self.accumulators.iter().map(|a| a.log_name.as_str()),
            metric.name(),
        );
        self.accumulators
            .push(Accumulator::new(log_name, metric.statistic_names()));
        self.metrics.push(Arc::new(metric));
        self
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn reset(&self) -> Self {
        Metrics {
            metrics: self.metrics.clone(),
            accumulators: self.accumulators.iter().map(Accumulator::reset).collect(),
        }
    }

    pub fn update(&self, target: &Tensor, preds: &Tensor) -> Result<Self> {
        let accumulators = self
            .metrics
            .iter()
            .zip(&self.accumulators)
            .map(|(metric, acc)| acc.add(&metric.batch_statistics(target, preds)?))
            .collect::<Result<Vec<_>>>()?;
        Ok(Metrics {
            metrics: self.metrics.clone(),
            accumulators,
        })
    }

    pub fn compute(&self) -> Result<BTreeMap<String, f32>> {
        let mut logs = BTreeMap::new();
        for (metric, acc) in self.metrics.iter().zip(&self.accumulators) {
            logs.insert(acc.log_name.clone(), metric.reduce(&acc.values()?));
        }
        Ok(logs)
    }
}

impl Tree for Metrics {
    fn flatten_into(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>) {
        for acc in &self.accumulators {
            acc.flatten_into(prefix, out);
        }
    }

    fn unflatten_from(&self, leaves: &mut Leaves) -> Result<Self> {
        let accumulators = self
            .accumulators
            .iter()
            .map(|acc| acc.unflatten_from(leaves))
            .collect::<Result<Vec<_>>>()?;
        Ok(Metrics {
            metrics: self.metrics.clone(),
            accumulators,
        })
    }
}

/// Losses and metrics updated together from the same `(target, preds)`.
///
/// ```text
/// lm = LossesAndMetrics::new(Losses::new().add(Crossentropy::new()),
///                            Metrics::new().add(Accuracy::new())).reset()
/// (loss, lm) = lm.loss_and_update(&y, &logits)?
/// lm.compute()? == {"accuracy": .., "crossentropy_loss": .., "loss": ..}
/// ```
#[derive(Debug, Clone, Default)]
pub struct LossesAndMetrics {
    losses: Losses,
    metrics: Metrics,
}

impl LossesAndMetrics {
    pub fn new(losses: Losses, metrics: Metrics) -> Self {
        LossesAndMetrics { losses, metrics }
    }

    pub fn losses(&self) -> &Losses {
        &self.losses
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Every accumulator back to zero sum and zero count.
    pub fn reset(&self) -> Self {
        LossesAndMetrics {
            losses: self.losses.reset(),
            metrics: self.metrics.reset(),
        }
    }

    pub fn update(&self, target: &Tensor, preds: &Tensor) -> Result<Self> {
        self.loss_and_update(target, preds).map(|(_, lm)| lm)
    }

    pub fn loss_and_update(&self, target: &Tensor, preds: &Tensor) -> Result<(Tensor, Self)> {
        let (loss, losses) = self.losses.loss_and_update(target, preds)?;
        let metrics = self.metrics.update(target, preds)?;
        Ok((loss, LossesAndMetrics { losses, metrics }))
    }

    /// All loss and metric logs in one map. Does not change any state, so it
    /// can be called repeatedly.
    pub fn compute(&self) -> Result<BTreeMap<String, f32>> {
        let mut logs = self.losses.compute()?;
        for (name, value) in self.metrics.compute()? {
            if logs.contains_key(&name) {
                log::warn!("metric '{}' shadows a loss log of the same name", name);
            }
            logs.insert(name, value);
        }
        Ok(logs)
    }
}

impl Tree for LossesAndMetrics {
    fn flatten_into(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>) {
        self.losses.flatten_into(&prefix.child("losses"), out);
        self.metrics.flatten_into(&prefix.child("metrics"), out);
    }

    fn unflatten_from(&self, leaves: &mut Leaves) -> Result<Self> {
        Ok(LossesAndMetrics {
            losses: self.losses.unflatten_from(leaves)?,
            metrics: self.metrics.unflatten_from(leaves)?,
        })
    }
}

#[cfg(test)]
#[path = "accumulators_test.rs"]
mod tests;
