use crate::error::{Result, TreexError};
use crate::nn::context::Context;
use crate::nn::init;
use crate::nn::module::Module;
use crate::tensor::Tensor;
use crate::tree::{KeyPath, Leaf, Leaves, Tree};
use crate::types::LeafKind;

/// Hyperparameters of a [`BatchNorm`] layer.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormConfig {
    /// Decay of the running statistics: `running = momentum * running + (1 - momentum) * batch`.
    pub momentum: f32,
    pub epsilon: f32,
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        BatchNormConfig {
            momentum: 0.99,
            epsilon: 1e-5,
        }
    }
}

impl BatchNormConfig {
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }
}

/// Batch normalization over every axis but the last.
///
/// `scale` and `bias` are `Parameter` leaves; `mean` and `var` are running
/// `BatchStat` leaves, updated on every training-mode forward pass and used
/// instead of the batch statistics in evaluation mode.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNorm {
    config: BatchNormConfig,
    scale: Leaf,
    bias: Leaf,
    mean: Leaf,
    var: Leaf,
    initialized: bool,
    training: bool,
}

impl Default for BatchNorm {
    fn default() -> Self {
        BatchNorm {
            config: BatchNormConfig::default(),
            scale: Leaf::empty(LeafKind::Parameter),
            bias: Leaf::empty(LeafKind::Parameter),
            mean: Leaf::empty(LeafKind::BatchStat),
            var: Leaf::empty(LeafKind::BatchStat),
            initialized: false,
            training: true,
        }
    }
}

impl BatchNorm {
    pub fn new() -> Self {
        BatchNorm::default()
    }

    pub fn from_config(config: BatchNormConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.momentum) || config.epsilon <= 0.0 {
            return Err(TreexError::InvalidConfig(format!(
                "BatchNorm needs momentum in [0, 1] and a positive epsilon, got {:?}",
                config
            )));
        }
        Ok(BatchNorm {
            config,
            ..BatchNorm::default()
        })
    }

    pub fn running_mean(&self) -> Option<&Tensor> {
        self.mean.array()
    }

    pub fn running_var(&self) -> Option<&Tensor> {
        self.var.array()
    }

    fn features(ctx: &Context, x: &Tensor, operation: &str) -> Result<usize> {
        x.shape()
            .last()
            .copied()
            .ok_or_else(|| TreexError::shape(ctx.path().to_string(), "rank >= 1", x.shape(), operation))
    }
}

impl Tree for BatchNorm {
    fn flatten_into(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>) {
        self.scale.flatten_into(&prefix.child("scale"), out);
        self.bias.flatten_into(&prefix.child("bias"), out);
        self.mean.flatten_into(&prefix.child("mean"), out);
        self.var.flatten_into(&prefix.child("var"), out);
    }

    fn unflatten_from(&self, leaves: &mut Leaves) -> Result<Self> {
        Ok(BatchNorm {
            scale: self.scale.unflatten_from(leaves)?,
            bias: self.bias.unflatten_from(leaves)?,
            mean: self.mean.unflatten_from(leaves)?,
            var: self.var.unflatten_from(leaves)?,
            ..self.clone()
        })
    }
}

impl Module for BatchNorm {
    fn initialize(&self, ctx: &mut Context, x: &Tensor) -> Result<Self> {
        let features = Self::features(ctx, x, "BatchNorm init")?;
        log::debug!("BatchNorm '{}': {} features", ctx.path(), features);
        Ok(BatchNorm {
            scale: Leaf::parameter(init::ones(&[features])),
            bias: Leaf::parameter(init::zeros(&[features])),
            mean: Leaf::batch_stat(init::zeros(&[features])),
            var: Leaf::batch_stat(init::ones(&[features])),
            initialized: true,
            ..self.clone()
        })
    }

    fn forward(&self, ctx: &mut Context, x: &Tensor) -> Result<(Tensor, Self)> {
        let path = ctx.path().to_string();
        let scale = self.scale.require_array(&format!("{}/scale", path))?;
        let bias = self.bias.require_array(&format!("{}/bias", path))?;
        let running_mean = self.mean.require_array(&format!("{}/mean", path))?;
        let running_var = self.var.require_array(&format!("{}/var", path))?;
        let features = Self::features(ctx, x, "BatchNorm forward")?;
        if features != scale.numel() {
            return Err(TreexError::shape(path, scale.shape(), x.shape(), "BatchNorm forward"));
        }

        let axes: Vec<usize> = (0..x.rank() - 1).collect();
        let (mean, var, updated) = if self.training {
            let mean = x.mean_axes(&axes, false)?;
            let var = x.sub(&mean)?.square()?.mean_axes(&axes, false)?;
            let m = self.config.momentum;
            let new_mean = running_mean
                .mul_scalar(m)?
                .add(&mean.detach().mul_scalar(1.0 - m)?)?;
            let new_var = running_var
                .mul_scalar(m)?
                .add(&var.detach().mul_scalar(1.0 - m)?)?;
            let updated = BatchNorm {
                mean: self.mean.with_array(new_mean),
                var: self.var.with_array(new_var),
                ..self.clone()
            };
            (mean, var, updated)
        } else {
            (running_mean.clone(), running_var.clone(), self.clone())
        };

        let std = var.add_scalar(self.config.epsilon)?.sqrt()?;
        let y = x.sub(&mean)?.div(&std)?.mul(scale)?.add(bias)?;
        Ok((y, updated))
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn with_training(&self, training: bool) -> Self {
        BatchNorm {
            training,
            ..self.clone()
        }
    }
}

#[cfg(test)]
#[path = "batch_norm_test.rs"]
mod tests;
