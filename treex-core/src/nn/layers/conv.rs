use crate::error::{Result, TreexError};
use crate::nn::context::Context;
use crate::nn::init;
use crate::nn::module::Module;
use crate::tensor::{Padding, Tensor};
use crate::tree::{KeyPath, Leaf, Leaves, Tree};
use crate::types::LeafKind;

/// Hyperparameters of a [`Conv`] layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvConfig {
    pub features_out: usize,
    pub kernel_size: [usize; 2],
    pub strides: [usize; 2],
    pub padding: Padding,
    pub use_bias: bool,
    /// Expected input channels; `None` infers them at init time.
    pub features_in: Option<usize>,
}

impl ConvConfig {
    pub fn new(features_out: usize, kernel_size: [usize; 2]) -> Self {
        ConvConfig {
            features_out,
            kernel_size,
            strides: [1, 1],
            padding: Padding::Same,
            use_bias: true,
            features_in: None,
        }
    }

    pub fn with_strides(mut self, strides: [usize; 2]) -> Self {
        self.strides = strides;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn with_features_in(mut self, features_in: usize) -> Self {
        self.features_in = Some(features_in);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.kernel_size.contains(&0) || self.strides.contains(&0) || self.features_out == 0 {
            return Err(TreexError::InvalidConfig(format!(
                "Conv needs positive features, kernel size and strides, got {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// 2-D convolution over NHWC inputs.
///
/// Kernel shape is `[kh, kw, features_in, features_out]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Conv {
    config: ConvConfig,
    kernel: Leaf,
    bias: Leaf,
    initialized: bool,
    training: bool,
}

impl Conv {
    pub fn new(features_out: usize, kernel_size: [usize; 2]) -> Self {
        Conv {
            config: ConvConfig::new(features_out, kernel_size),
            kernel: Leaf::empty(LeafKind::Parameter),
            bias: Leaf::empty(LeafKind::Parameter),
            initialized: false,
            training: true,
        }
    }

    pub fn from_config(config: ConvConfig) -> Result<Self> {
        config.validate()?;
        Ok(Conv {
            config,
            ..Conv::new(0, [0, 0])
        })
    }

    pub fn config(&self) -> &ConvConfig {
        &self.config
    }

    pub fn kernel(&self) -> Option<&Tensor> {
        self.kernel.array()
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.array()
    }

    fn input_channels(&self, ctx: &Context, x: &Tensor, operation: &str) -> Result<usize> {
        if x.rank() != 4 {
            return Err(TreexError::shape(
                ctx.path().to_string(),
                "[batch, height, width, channels]",
                x.shape(),
                operation,
            ));
        }
        let channels = x.shape()[3];
        if let Some(expected) = self.config.features_in {
            if expected != channels {
                return Err(TreexError::shape(
                    ctx.path().to_string(),
                    format!("[.., .., .., {}]", expected),
                    x.shape(),
                    operation,
                ));
            }
        }
        Ok(channels)
    }
}

impl Tree for Conv {
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
        Ok(Conv {
            kernel,
            bias,
            ..self.clone()
        })
    }
}

impl Module for Conv {
    fn initialize(&self, ctx: &mut Context, x: &Tensor) -> Result<Self> {
        self.config.validate()?;
        let channels = self.input_channels(ctx, x, "Conv init")?;
        let [kh, kw] = self.config.kernel_size;
        let out = self.config.features_out;
        let key = ctx.next_key("Conv init")?;
        let kernel = init::lecun_normal(key, &[kh, kw, channels, out], kh * kw * channels)?;
        log::debug!("Conv '{}': kernel [{}, {}, {}, {}]", ctx.path(), kh, kw, channels, out);
        let bias = if self.config.use_bias {
            Leaf::parameter(init::zeros(&[out]))
        } else {
            Leaf::empty(LeafKind::Parameter)
        };
        Ok(Conv {
            kernel: Leaf::parameter(kernel),
            bias,
            initialized: true,
            ..self.clone()
        })
    }

    fn forward(&self, ctx: &mut Context, x: &Tensor) -> Result<(Tensor, Self)> {
        let path = ctx.path().to_string();
        let kernel = self.kernel.require_array(&format!("{}/kernel", path))?;
        let channels = self.input_channels(ctx, x, "Conv forward")?;
        let [kh, kw] = self.config.kernel_size;
        let features_out = self.config.features_out;
        if kernel.shape() != [kh, kw, channels, features_out] {
            return Err(TreexError::shape(
                format!("{}/kernel", path),
                [kh, kw, channels, features_out],
                kernel.shape(),
                "Conv forward",
            ));
        }
        let mut y = x.conv2d(kernel, self.config.strides, self.config.padding)?;
        if self.config.use_bias {
            let bias = self.bias.require_array(&format!("{}/bias", path))?;
            if bias.shape() != [features_out] {
                return Err(TreexError::shape(
                    format!("{}/bias", path),
                    [features_out],
                    bias.shape(),
                    "Conv forward",
                ));
            }
            y = y.add(bias)?;
        }
        Ok((y, self.clone()))
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn with_training(&self, training: bool) -> Self {
        Conv {
            training,
            ..self.clone()
        }
    }
}

#[cfg(test)]
#[path = "conv_test.rs"]
mod tests;
