use crate::error::{Result, TreexError};
use crate::key_seq::Key;
use crate::tensor::{self, Tensor};
use rand_distr::{Distribution, Normal, Uniform};

/// LeCun normal initialization: `N(0, 1 / fan_in)`.
///
/// Default kernel initializer of [`Linear`](crate::nn::Linear) and
/// [`Conv`](crate::nn::Conv).
///
/// # Arguments
/// * `key`: The key the values are derived from.
/// * `shape`: Shape of the created tensor.
/// * `fan_in`: Number of inputs feeding each output unit.
pub fn lecun_normal(key: Key, shape: &[usize], fan_in: usize) -> Result<Tensor> {
    if fan_in == 0 {
        return Err(TreexError::InvalidConfig(
            "lecun_normal requires a positive fan_in".to_string(),
        ));
    }
    let std = (1.0 / fan_in as f32).sqrt();
    normal(key, shape, std)
}

/// Samples `N(0, std^2)` values.
pub fn normal(key: Key, shape: &[usize], std: f32) -> Result<Tensor> {
    let dist = Normal::new(0.0f32, std)
        .map_err(|e| TreexError::InvalidConfig(format!("invalid normal std {}: {}", std, e)))?;
    let mut rng = key.rng();
    Ok(Tensor::from_fn(shape, |_| dist.sample(&mut rng)))
}

/// Samples values uniformly from `[low, high)`.
pub fn uniform(key: Key, shape: &[usize], low: f32, high: f32) -> Result<Tensor> {
    if !(low < high) {
        return Err(TreexError::InvalidConfig(format!(
            "uniform requires low < high, got [{}, {})",
            low, high
        )));
    }
    let dist = Uniform::new(low, high);
    let mut rng = key.rng();
    Ok(Tensor::from_fn(shape, |_| dist.sample(&mut rng)))
}

/// Fills with zeros (default bias initializer).
pub fn zeros(shape: &[usize]) -> Tensor {
    tensor::zeros(shape)
}

/// Fills with ones.
pub fn ones(shape: &[usize]) -> Tensor {
    tensor::ones(shape)
}

#[cfg(test)]
#[path = "init_test.rs"]
mod tests;
