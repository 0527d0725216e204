use super::transform::{check_learning_rate, zeros_like_all, GradientTransformation, TransformState};
use crate::error::{Result, TreexError};
use crate::tensor::Tensor;

/// Hyperparameters of [`Sgd`].
#[derive(Debug, Clone, PartialEq)]
pub struct SgdConfig {
    pub learning_rate: f32,
    /// Momentum factor; `0.0` disables the `trace` slot entirely.
    pub momentum: f32,
    pub nesterov: bool,
    /// L2 penalty added to the gradient before momentum.
    pub weight_decay: f32,
}

impl SgdConfig {
    pub fn new(learning_rate: f32) -> Self {
        SgdConfig {
            learning_rate,
            momentum: 0.0,
            nesterov: false,
            weight_decay: 0.0,
        }
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_nesterov(mut self, nesterov: bool) -> Self {
        self.nesterov = nesterov;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

/// Stochastic gradient descent with optional momentum and weight decay.
///
/// ```text
/// g = grad + weight_decay * param
/// trace = momentum * trace + g
/// update = -lr * (nesterov ? g + momentum * trace : trace)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Sgd {
    config: SgdConfig,
}

impl Sgd {
    pub fn new(config: SgdConfig) -> Result<Self> {
        check_learning_rate(config.learning_rate)?;
        if !(0.0..1.0).contains(&config.momentum) {
            return Err(TreexError::InvalidConfig(format!(
                "SGD momentum must be in [0, 1), got {}",
                config.momentum
            )));
        }
        if config.weight_decay < 0.0 {
            return Err(TreexError::InvalidConfig(format!(
                "SGD weight decay must be non-negative, got {}",
                config.weight_decay
            )));
        }
        if config.nesterov && config.momentum == 0.0 {
            return Err(TreexError::InvalidConfig(
                "Nesterov momentum requires a positive momentum".to_string(),
            ));
        }
        Ok(Sgd { config })
    }

    pub fn config(&self) -> &SgdConfig {
        &self.config
    }

    fn uses_trace(&self) -> bool {
        self.config.momentum > 0.0
    }
}

/// Plain gradient descent: `update = -learning_rate * grad`.
pub fn sgd(learning_rate: f32) -> Result<Sgd> {
    Sgd::new(SgdConfig::new(learning_rate))
}

impl GradientTransformation for Sgd {
    fn init(&self, params: &[Tensor]) -> Result<TransformState> {
        let slots = if self.uses_trace() {
            vec![("trace".to_string(), zeros_like_all(params))]
        } else {
            Vec::new()
        };
        Ok(TransformState::new(slots))
    }

    fn update(
        &self,
        grads: &[Tensor],
        state: TransformState,
        params: &[Tensor],
    ) -> Result<(Vec<Tensor>, TransformState)> {
        let SgdConfig {
            learning_rate,
            momentum,
            nesterov,
            weight_decay,
        } = self.config;

        let mut directions = Vec::with_capacity(grads.len());
        let mut traces = Vec::new();
        let previous = if self.uses_trace() {
            Some(state.slot("trace")?)
        } else {
            None
        };

        for (i, (grad, param)) in grads.iter().zip(params).enumerate() {
            let mut g = grad.clone();
            if weight_decay != 0.0 {
                g = g.add(&param.mul_scalar(weight_decay)?)?;
            }
            let direction = match previous {
                Some(previous) => {
                    let trace = previous[i].mul_scalar(momentum)?.add(&g)?;
                    let direction = if nesterov {
                        g.add(&trace.mul_scalar(momentum)?)?
                    } else {
                        trace.clone()
                    };
                    traces.push(trace);
                    direction
                }
                None => g,
            };
            directions.push(direction);
        }

        let updates = directions
            .iter()
            .map(|d| d.mul_scalar(-learning_rate))
            .collect::<Result<Vec<_>>>()?;
        let slots = if self.uses_trace() {
            vec![("trace".to_string(), traces)]
        } else {
            Vec::new()
        };
        Ok((
            updates,
            TransformState {
                count: state.count + 1,
                slots,
            },
        ))
    }
}

#[cfg(test)]
#[path = "sgd_test.rs"]
mod tests;
