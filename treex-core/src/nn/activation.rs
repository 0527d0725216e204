//! Plain-function stages for [`Sequential`](crate::model::Sequential).
//!
//! A [`Lambda`] wraps a stateless tensor function. It owns no leaves, so
//! adding one to a container never changes the container's treedef beyond
//! the stage index it occupies.

use crate::error::{Result, TreexError};
use crate::tensor::Tensor;
use std::fmt;
use std::sync::Arc;

type StageFn = dyn Fn(&Tensor) -> Result<Tensor> + Send + Sync;

/// A named, stateless tensor function.
#[derive(Clone)]
pub struct Lambda {
    name: String,
    f: Arc<StageFn>,
}

impl Lambda {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&Tensor) -> Result<Tensor> + Send + Sync + 'static,
    ) -> Self {
        Lambda {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, x: &Tensor) -> Result<Tensor> {
        (self.f)(x)
    }
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lambda({})", self.name)
    }
}

pub fn relu() -> Lambda {
    Lambda::new("relu", Tensor::relu)
}

pub fn sigmoid() -> Lambda {
    Lambda::new("sigmoid", Tensor::sigmoid)
}

pub fn tanh() -> Lambda {
    Lambda::new("tanh", Tensor::tanh)
}

/// Averages over `axes`, dropping them. `mean_over(vec![1, 2])` is global
/// average pooling for NHWC inputs.
pub fn mean_over(axes: Vec<usize>) -> Lambda {
    Lambda::new(format!("mean_over{:?}", axes), move |x: &Tensor| {
        x.mean_axes(&axes, false)
    })
}

/// Collapses every axis after the first into one: `[n, a, b, ..] -> [n, a * b * ..]`.
pub fn flatten() -> Lambda {
    Lambda::new("flatten", |x: &Tensor| {
        let batch = *x
            .shape()
            .first()
            .ok_or_else(|| TreexError::shape("", "rank >= 1", x.shape(), "flatten"))?;
        let rest: usize = x.shape()[1..].iter().product();
        x.reshape(&[batch, rest])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relu_stage() -> Result<(), TreexError> {
        let x = Tensor::new(vec![-1.0, 0.5, 2.0], vec![3])?;
        let y = relu().call(&x)?;
        assert_eq!(y.data(), &[0.0, 0.5, 2.0]);
        Ok(())
    }

    #[test]
    fn test_flatten_keeps_batch_axis() -> Result<(), TreexError> {
        let x = Tensor::zeros(&[2, 3, 4, 5]);
        let y = flatten().call(&x)?;
        assert_eq!(y.shape(), &[2, 60]);
        Ok(())
    }

    #[test]
    fn test_flatten_rejects_scalar() {
        let err = flatten().call(&Tensor::scalar(1.0)).unwrap_err();
        assert!(err.is_shape_error());
    }

    #[test]
    fn test_mean_over_spatial_axes() -> Result<(), TreexError> {
        let x = Tensor::new((0..8).map(|v| v as f32).collect(), vec![1, 2, 2, 2])?;
        let y = mean_over(vec![1, 2]).call(&x)?;
        assert_eq!(y.shape(), &[1, 2]);
        // channel 0: 0, 2, 4, 6; channel 1: 1, 3, 5, 7
        assert_eq!(y.data(), &[3.0, 4.0]);
        Ok(())
    }

    #[test]
    fn test_debug_shows_name() {
        assert_eq!(format!("{:?}", tanh()), "Lambda(tanh)");
    }
}
