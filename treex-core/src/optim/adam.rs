use super::transform::{check_learning_rate, zeros_like_all, GradientTransformation, TransformState};
use crate::error::{Result, TreexError};
use crate::tensor::Tensor;

/// Hyperparameters of [`Adam`].
#[derive(Debug, Clone, PartialEq)]
pub struct AdamConfig {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    pub weight_decay: f32,
    /// `true` applies weight decay directly to the update (AdamW) instead of
    /// adding it to the gradient.
    pub decoupled_weight_decay: bool,
}

impl AdamConfig {
    pub fn new(learning_rate: f32) -> Self {
        AdamConfig {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
            decoupled_weight_decay: false,
        }
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_decoupled_weight_decay(mut self, decoupled: bool) -> Self {
        self.decoupled_weight_decay = decoupled;
        self
    }
}

/// Adam with bias-corrected first (`mu`) and second (`nu`) moment estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct Adam {
    config: AdamConfig,
}

impl Adam {
    pub fn new(config: AdamConfig) -> Result<Self> {
        check_learning_rate(config.learning_rate)?;
        if !(0.0..1.0).contains(&config.beta1) || !(0.0..1.0).contains(&config.beta2) {
            return Err(TreexError::InvalidConfig(format!(
                "Adam betas must be in [0, 1), got ({}, {})",
                config.beta1, config.beta2
            )));
        }
        if config.eps <= 0.0 {
            return Err(TreexError::InvalidConfig(format!(
                "Adam epsilon must be positive, got {}",
                config.eps
            )));
        }
        if config.weight_decay < 0.0 {
            return Err(TreexError::InvalidConfig(format!(
                "Adam weight decay must be non-negative, got {}",
                config.weight_decay
            )));
        }
        Ok(Adam { config })
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }
}

pub fn adam(learning_rate: f32) -> Result<Adam> {
    Adam::new(AdamConfig::new(learning_rate))
}

/// Adam with decoupled weight decay.
pub fn adamw(learning_rate: f32, weight_decay: f32) -> Result<Adam> {
    Adam::new(
        AdamConfig::new(learning_rate)
            .with_weight_decay(weight_decay)
            .with_decoupled_weight_decay(true),
    )
}

impl GradientTransformation for Adam {
    fn init(&self, params: &[Tensor]) -> Result<TransformState> {
        Ok(TransformState::new(vec![
            ("mu".to_string(), zeros_like_all(params)),
            ("nu".to_string(), zeros_like_all(params)),
        ]))
    }

    fn update(
        &self,
        grads: &[Tensor],
        state: TransformState,
        params: &[Tensor],
    ) -> Result<(Vec<Tensor>, TransformState)> {
        let c = &self.config;
        let count = state.count + 1;
        let bias_correction1 = 1.0 - c.beta1.powi(count as i32);
        let bias_correction2 = 1.0 - c.beta2.powi(count as i32);
        let mu_prev = state.slot("mu")?;
        let nu_prev = state.slot("nu")?;

        let mut updates = Vec::with_capacity(grads.len());
        let mut mus = Vec::with_capacity(grads.len());
        let mut nus = Vec::with_capacity(grads.len());
        for (i, (grad, param)) in grads.iter().zip(params).enumerate() {
            let g = if c.weight_decay != 0.0 && !c.decoupled_weight_decay {
                grad.add(&param.mul_scalar(c.weight_decay)?)?
            } else {
                grad.clone()
            };
            let mu = mu_prev[i].mul_scalar(c.beta1)?.add(&g.mul_scalar(1.0 - c.beta1)?)?;
            let nu = nu_prev[i]
                .mul_scalar(c.beta2)?
                .add(&g.square()?.mul_scalar(1.0 - c.beta2)?)?;
            let mu_hat = mu.mul_scalar(1.0 / bias_correction1)?;
            let nu_hat = nu.mul_scalar(1.0 / bias_correction2)?;
            let mut step = mu_hat.div(&nu_hat.sqrt()?.add_scalar(c.eps)?)?;
            if c.weight_decay != 0.0 && c.decoupled_weight_decay {
                step = step.add(&param.mul_scalar(c.weight_decay)?)?;
            }
            updates.push(step.mul_scalar(-c.learning_rate)?);
            mus.push(mu);
            nus.push(nu);
        }

        Ok((
            updates,
            TransformState {
                count,
                slots: vec![("mu".to_string(), mus), ("nu".to_string(), nus)],
            },
        ))
    }
}

#[cfg(test)]
#[path = "adam_test.rs"]
mod tests;
