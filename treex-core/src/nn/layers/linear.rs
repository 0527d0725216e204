use crate::error::{Result, TreexError};
use crate::nn::context::Context;
use crate::nn::init;
use crate::nn::module::Module;
use crate::tensor::Tensor;
use crate::tree::{KeyPath, Leaf, Leaves, Tree};
use crate::types::LeafKind;

/// Hyperparameters of a [`Linear`] layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Size of each output sample.
    pub features_out: usize,
    /// Size of each input sample. `None` infers it from the sample input at
    /// init time; `Some(n)` makes init fail on any other input width.
    pub features_in: Option<usize>,
    /// If `true`, the layer learns an additive bias.
    pub use_bias: bool,
}

impl LinearConfig {
    pub fn new(features_out: usize) -> Self {
        LinearConfig {
            features_out,
            features_in: None,
            use_bias: true,
        }
    }

    pub fn with_features_in(mut self, features_in: usize) -> Self {
        self.features_in = Some(features_in);
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }
}

/// Applies a linear transformation to the last axis: `y = x @ kernel + bias`.
///
/// The kernel has shape `[features_in, features_out]` and the bias
/// `[features_out]`; both are `Parameter` leaves.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    config: LinearConfig,
    kernel: Leaf,
    bias: Leaf,
    initialized: bool,
    training: bool,
}

impl Linear {
    /// Creates an uninitialized layer with `features_out` outputs.
    pub fn new(features_out: usize) -> Self {
        Linear::from_config(LinearConfig::new(features_out))
    }

    pub fn from_config(config: LinearConfig) -> Self {
        Linear {
            config,
            kernel: Leaf::empty(LeafKind::Parameter),
            bias: Leaf::empty(LeafKind::Parameter),
            initialized: false,
            training: true,
        }
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    pub fn kernel(&self) -> Option<&Tensor> {
        self.kernel.array()
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.array()
    }

    fn input_width(&self, ctx: &Context, x: &Tensor, operation: &str) -> Result<usize> {
        let width = x
            .shape()
            .last()
            .copied()
            .ok_or_else(|| TreexError::shape(ctx.path().to_string(), "rank >= 1", x.shape(), operation))?;
        if let Some(expected) = self.config.features_in {
            if expected != width {
                return Err(TreexError::shape(
                    ctx.path().to_string(),
                    format!("[.., {}]", expected),
                    x.shape(),
                    operation,
                ));
            }
        }
        Ok(width)
    }
}

impl Tree for Linear {
    fn flatten_into(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>) {
        self.kernel.flatten_into(&prefix.child("kernel"), out);
        if self.config.use_bias {
            self.bias.flatten_into(&prefix.child("bias"), out);
        }
    }

    fn unflatten_from(&self, leaves: &mut Leaves) -> Result<Self> {
        let kernel = self.kernel.unflatten_from(leaves)?;
        let bias = if self.config.use_bias {
            self.bias.unflatten_from(leaves)?
        } else {
            self.bias.clone()
        };
        Ok(Linear {
            kernel,
            bias,
            ..self.clone()
        })
    }
}

impl Module for Linear {
    fn initialize(&self, ctx: &mut Context, x: &Tensor) -> Result<Self> {
        let features_in = self.input_width(ctx, x, "Linear init")?;
        let features_out = self.config.features_out;
        let key = ctx.next_key("Linear init")?;
        let kernel = init::lecun_normal(key, &[features_in, features_out], features_in)?;
        log::debug!("Linear '{}': kernel [{}, {}]", ctx.path(), features_in, features_out);
        let bias = if self.config.use_bias {
            Leaf::parameter(init::zeros(&[features_out]))
        } else {
            Leaf::empty(LeafKind::Parameter)
        };
        Ok(Linear {
            kernel: Leaf::parameter(kernel),
            bias,
            initialized: true,
            ..self.clone()
        })
    }

    fn forward(&self, ctx: &mut Context, x: &Tensor) -> Result<(Tensor, Self)> {
        let path = ctx.path().to_string();
        let kernel = self.kernel.require_array(&format!("{}/kernel", path))?;
        let features_in = self.input_width(ctx, x, "Linear forward")?;
        let features_out = self.config.features_out;
        if kernel.shape() != [features_in, features_out] {
            return Err(TreexError::shape(
                format!("{}/kernel", path),
                [features_in, features_out],
                kernel.shape(),
                "Linear forward",
            ));
        }
        // Collapse leading axes, multiply, restore them.
        let mut out_shape = x.shape().to_vec();
        let rows = x.numel() / features_in.max(1);
        let flat = x.reshape(&[rows, features_in])?;
        let mut y = flat.matmul(kernel)?;
        if self.config.use_bias {
            let bias = self.bias.require_array(&format!("{}/bias", path))?;
            if bias.shape() != [features_out] {
                return Err(TreexError::shape(
                    format!("{}/bias", path),
                    [features_out],
                    bias.shape(),
                    "Linear forward",
                ));
            }
            y = y.add(bias)?;
        }
        if let Some(last) = out_shape.last_mut() {
            *last = features_out;
        }
        Ok((y.reshape(&out_shape)?, self.clone()))
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn with_training(&self, training: bool) -> Self {
        Linear {
            training,
            ..self.clone()
        }
    }
}

#[cfg(test)]
#[path = "linear_test.rs"]
mod tests;
