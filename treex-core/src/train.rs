//! Training-step building blocks.
//!
//! The free functions spell out one training iteration over explicit values:
//! isolate the parameters, differentiate a loss that merges them back into
//! the module, feed the gradients to the optimizer and merge the new
//! parameters in. [`Model`] bundles the same values into one tree and adds
//! retrace detection on every step.

use crate::autograd::value_and_grad;
use crate::error::{Result, TreexError};
use crate::key_seq::{Key, KeySeq};
use crate::metrics::{Losses, LossesAndMetrics, Metrics};
use crate::nn::Module;
use crate::optim::Optimizer;
use crate::tensor::Tensor;
use crate::tree::{KeyPath, Leaf, Leaves, RetraceDetector, Tree};
use crate::types::LeafKind;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Initializes `module` from `seed` and a sample batch, then the optimizer
/// from the module's parameters.
pub fn init_step<M: Module>(
    module: &M,
    optimizer: &Optimizer,
    seed: impl Into<Key>,
    x: &Tensor,
) -> Result<(M, Optimizer)> {
    let module = module.init(seed, x)?;
    let optimizer = optimizer.init(&module.parameters()?)?;
    Ok((module, optimizer))
}

pub fn reset_step(losses_and_metrics: &LossesAndMetrics) -> LossesAndMetrics {
    losses_and_metrics.reset()
}

/// Runs the module on `x` and scores the predictions against `y`.
///
/// `params`, when given, is merged into `module` first, which is how
/// differentiated parameters get into the forward pass.
///
/// # Returns
/// `(loss, updated_module, updated_losses_and_metrics)`.
pub fn loss_fn<M: Module>(
    params: Option<&M>,
    key: Option<Key>,
    module: &M,
    losses_and_metrics: &LossesAndMetrics,
    x: &Tensor,
    y: &Tensor,
) -> Result<(Tensor, M, LossesAndMetrics)> {
    let module = match params {
        Some(params) => module.merge(params)?,
        None => module.clone(),
    };
    let (preds, module) = module.apply(key, x)?;
    let (loss, losses_and_metrics) = losses_and_metrics.loss_and_update(y, &preds)?;
    Ok((loss, module, losses_and_metrics))
}

/// One optimization step on the batch `(x, y)`.
pub fn train_step<M: Module>(
    key: Key,
    module: &M,
    optimizer: &Optimizer,
    losses_and_metrics: &LossesAndMetrics,
    x: &Tensor,
    y: &Tensor,
) -> Result<(M, Optimizer, LossesAndMetrics)> {
    let params = module.parameters()?;
    let (loss, (module, losses_and_metrics), grads) = value_and_grad(&params, |params| {
        let (loss, module, lm) = loss_fn(Some(params), Some(key), module, losses_and_metrics, x, y)?;
        Ok((loss, (module, lm)))
    })?;
    log::trace!("train_step loss {:?}", loss.item().ok());
    let (params, optimizer) = optimizer.update(&grads, &params)?;
    let module = module.merge(&params)?;
    Ok((module, optimizer, losses_and_metrics))
}

/// Scores the batch `(x, y)` without updating any parameter.
pub fn test_step<M: Module>(
    module: &M,
    losses_and_metrics: &LossesAndMetrics,
    x: &Tensor,
    y: &Tensor,
) -> Result<LossesAndMetrics> {
    let (_, _, losses_and_metrics) = loss_fn(None, None, module, losses_and_metrics, x, y)?;
    Ok(losses_and_metrics)
}

type Detectors = Arc<Mutex<BTreeMap<&'static str, RetraceDetector>>>;

/// A module together with everything needed to train it: a key stream, an
/// optimizer and the loss/metric accumulators.
///
/// All step methods return a new `Model`. Clones share one set of retrace
/// detectors, so a training loop that rebinds the model after every step
/// sees the trace count of each step grow only when the signature of its
/// inputs changes.
#[derive(Debug, Clone)]
pub struct Model<M: Module> {
    keys: KeySeq,
    module: M,
    optimizer: Optimizer,
    losses_and_metrics: LossesAndMetrics,
    detectors: Detectors,
}

impl<M: Module> Model<M> {
    pub fn new(
        seed: impl Into<Key>,
        module: M,
        optimizer: Optimizer,
        losses: Losses,
        metrics: Metrics,
    ) -> Self {
        Model {
            keys: KeySeq::new(seed),
            module,
            optimizer,
            losses_and_metrics: LossesAndMetrics::new(losses, metrics),
            detectors: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn optimizer(&self) -> &Optimizer {
        &self.optimizer
    }

    pub fn losses_and_metrics(&self) -> &LossesAndMetrics {
        &self.losses_and_metrics
    }

    /// Current loss and metric values.
    pub fn logs(&self) -> Result<BTreeMap<String, f32>> {
        self.losses_and_metrics.compute()
    }

    /// How many times `step` (`"init_step"`, `"train_step"`, ...) was traced.
    pub fn traces(&self, step: &str) -> usize {
        self.lock_detectors()
            .get(step)
            .map_or(0, RetraceDetector::traces)
    }

    fn lock_detectors(&self) -> MutexGuard<'_, BTreeMap<&'static str, RetraceDetector>> {
        match self.detectors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Retrace detector lock was poisoned. Recovering.");
                poisoned.into_inner()
            }
        }
    }

    fn check_retrace<T: Tree + ?Sized>(&self, step: &'static str, inputs: &T) {
        self.lock_detectors()
            .entry(step)
            .or_insert_with(|| RetraceDetector::new(step))
            .check(inputs);
    }

    fn batch_signature(x: &Tensor, y: Option<&Tensor>) -> (Leaf, Leaf) {
        let y = match y {
            Some(y) => Leaf::new(LeafKind::State, y.detach()),
            None => Leaf::empty(LeafKind::State),
        };
        (Leaf::new(LeafKind::State, x.detach()), y)
    }

    /// Initializes module, optimizer and accumulators from a sample batch.
    pub fn init_step(&self, x: &Tensor) -> Result<Self> {
        self.check_retrace("init_step", &(self.clone(), Self::batch_signature(x, None)));
        let mut keys = self.keys.clone();
        let module_key = keys.next()?;
        let (module, optimizer) = init_step(&self.module, &self.optimizer, module_key, x)?;
        Ok(Model {
            keys,
            module,
            optimizer,
            losses_and_metrics: self.losses_and_metrics.reset(),
            detectors: Arc::clone(&self.detectors),
        })
    }

    pub fn reset_step(&self) -> Self {
        Model {
            losses_and_metrics: reset_step(&self.losses_and_metrics),
            ..self.clone()
        }
    }

    pub fn train_step(&self, x: &Tensor, y: &Tensor) -> Result<Self> {
        self.check_retrace("train_step", &(self.clone(), Self::batch_signature(x, Some(y))));
        if !self.optimizer.is_initialized() {
            return Err(TreexError::missing("optimizer", "train_step called before init_step"));
        }
        let mut keys = self.keys.clone();
        let loss_key = keys.next()?;
        let (module, optimizer, losses_and_metrics) = train_step(
            loss_key,
            &self.module,
            &self.optimizer,
            &self.losses_and_metrics,
            x,
            y,
        )?;
        Ok(Model {
            keys,
            module,
            optimizer,
            losses_and_metrics,
            detectors: Arc::clone(&self.detectors),
        })
    }

    pub fn test_step(&self, x: &Tensor, y: &Tensor) -> Result<Self> {
        self.check_retrace("test_step", &(self.clone(), Self::batch_signature(x, Some(y))));
        let losses_and_metrics = test_step(&self.module, &self.losses_and_metrics, x, y)?;
        Ok(Model {
            losses_and_metrics,
            ..self.clone()
        })
    }

    /// Predicted class per example, computed in evaluation mode.
    pub fn predict(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.module.eval().call(x)?.argmax())
    }

    pub fn train(&self) -> Self {
        Model {
            module: self.module.train(),
            ..self.clone()
        }
    }

    pub fn eval(&self) -> Self {
        Model {
            module: self.module.eval(),
            ..self.clone()
        }
    }
}

impl<M: Module> Tree for Model<M> {
    fn flatten_into(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>) {
        self.keys.flatten_into(&prefix.child("keys"), out);
        self.module.flatten_into(&prefix.child("module"), out);
        self.optimizer.flatten_into(&prefix.child("optimizer"), out);
        self.losses_and_metrics
            .flatten_into(&prefix.child("losses_and_metrics"), out);
    }

    fn unflatten_from(&self, leaves: &mut Leaves) -> Result<Self> {
        Ok(Model {
            keys: self.keys.unflatten_from(leaves)?,
            module: self.module.unflatten_from(leaves)?,
            optimizer: self.optimizer.unflatten_from(leaves)?,
            losses_and_metrics: self.losses_and_metrics.unflatten_from(leaves)?,
            detectors: Arc::clone(&self.detectors),
        })
    }
}

#[cfg(test)]
#[path = "train_test.rs"]
mod tests;
