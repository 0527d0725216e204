use crate::error::{Result, TreexError};
use crate::nn::context::Context;
use crate::nn::module::Module;
use crate::tensor::Tensor;
use crate::tree::{KeyPath, Leaf, Leaves, Tree};
use rand_distr::{Bernoulli, Distribution};

/// Randomly zeroes inputs with probability `rate` during training and
/// rescales the survivors by `1 / (1 - rate)`. Identity in evaluation mode.
///
/// The mask is drawn from the key passed to `apply`; in training mode a call
/// without a key fails with [`TreexError::MissingState`].
#[derive(Debug, Clone, PartialEq)]
pub struct Dropout {
    rate: f32,
    initialized: bool,
    training: bool,
}

impl Dropout {
    /// # Errors
    /// [`TreexError::InvalidConfig`] unless `0 <= rate < 1`.
    pub fn new(rate: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(TreexError::InvalidConfig(format!(
                "Dropout rate must be in [0, 1), got {}",
                rate
            )));
        }
        Ok(Dropout {
            rate,
            initialized: false,
            training: true,
        })
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }
}

impl Tree for Dropout {
    fn flatten_into(&self, _prefix: &KeyPath, _out: &mut Vec<(KeyPath, Leaf)>) {}

    fn unflatten_from(&self, _leaves: &mut Leaves) -> Result<Self> {
        Ok(self.clone())
    }
}

impl Module for Dropout {
    fn initialize(&self, _ctx: &mut Context, _x: &Tensor) -> Result<Self> {
        Ok(Dropout {
            initialized: true,
            ..self.clone()
        })
    }

    fn forward(&self, ctx: &mut Context, x: &Tensor) -> Result<(Tensor, Self)> {
        if !self.training || self.rate == 0.0 {
            return Ok((x.clone(), self.clone()));
        }
        let key = ctx.next_key("Dropout in training mode")?;
        let keep = 1.0 - self.rate;
        let bernoulli = Bernoulli::new(keep as f64)
            .map_err(|e| TreexError::InvalidConfig(format!("Dropout keep probability {}: {}", keep, e)))?;
        let mut rng = key.rng();
        let scale = 1.0 / keep;
        let mask = Tensor::from_fn(x.shape(), |_| {
            if bernoulli.sample(&mut rng) {
                scale
            } else {
                0.0
            }
        });
        Ok((x.mul(&mask)?, self.clone()))
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn with_training(&self, training: bool) -> Self {
        Dropout {
            training,
            ..self.clone()
        }
    }
}

#[cfg(test)]
#[path = "dropout_test.rs"]
mod tests;
