// src/tensor/mod.rs

use crate::autograd::tape::{Tape, Trace};
use crate::error::{Result, TreexError};
use std::fmt;
use std::sync::Arc;

pub mod broadcast_utils;
pub mod create;
pub(crate) mod kernels;

pub use create::{full, one_hot, ones, ones_like, zeros, zeros_like};
pub use kernels::Padding;

/// An immutable, row-major `f32` n-dimensional array.
///
/// Cloning a `Tensor` is cheap: the buffer lives behind an `Arc` and is never
/// mutated after construction. A tensor may additionally carry a trace that
/// links it to a node of a live gradient [`Tape`]; operations on traced
/// tensors are recorded so their gradients can be computed later. Equality
/// only looks at shape and values, never at the trace.
#[derive(Clone)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Arc<[f32]>,
    pub(crate) trace: Option<Trace>,
}

impl Tensor {
    /// Creates a new tensor from row-major data and a shape.
    ///
    /// # Errors
    /// Returns [`TreexError::TensorCreation`] if `data.len()` does not match the
    /// number of elements implied by `shape`.
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(TreexError::TensorCreation {
                data_len: data.len(),
                shape,
            });
        }
        Ok(Tensor {
            shape,
            data: data.into(),
            trace: None,
        })
    }

    /// A rank-0 tensor holding `value`.
    pub fn scalar(value: f32) -> Self {
        Tensor {
            shape: Vec::new(),
            data: vec![value].into(),
            trace: None,
        }
    }

    /// Builds a tensor by evaluating `f` at every flat index.
    pub fn from_fn(shape: &[usize], f: impl FnMut(usize) -> f32) -> Self {
        let n: usize = shape.iter().product();
        let data: Vec<f32> = (0..n).map(f).collect();
        Tensor {
            shape: shape.to_vec(),
            data: data.into(),
            trace: None,
        }
    }

    /// Internal constructor for kernels whose output length is known to be right.
    pub(crate) fn from_parts(data: Vec<f32>, shape: Vec<usize>) -> Self {
        debug_assert_eq!(data.len(), shape.iter().product::<usize>());
        Tensor {
            shape,
            data: data.into(),
            trace: None,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Row-major view of the values.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.data.to_vec()
    }

    /// Returns the single value of a one-element tensor.
    pub fn item(&self) -> Result<f32> {
        if self.data.len() != 1 {
            return Err(TreexError::shape("", "one element", self.shape(), "item"));
        }
        Ok(self.data[0])
    }

    /// Returns a copy of this tensor that is not linked to any gradient tape.
    pub fn detach(&self) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: Arc::clone(&self.data),
            trace: None,
        }
    }

    /// `true` if this tensor is linked to a tape that is still recording.
    pub fn is_traced(&self) -> bool {
        self.live_trace().is_some()
    }

    pub(crate) fn live_trace(&self) -> Option<(Arc<Tape>, usize)> {
        self.trace.as_ref().and_then(Trace::upgrade)
    }

    pub(crate) fn with_trace(mut self, trace: Trace) -> Tensor {
        self.trace = Some(trace);
        self
    }

    /// Checks that this tensor has the expected shape, reporting `path` and
    /// `operation` on mismatch.
    pub fn expect_shape(&self, expected: &[usize], path: &str, operation: &str) -> Result<()> {
        if self.shape != expected {
            return Err(TreexError::shape(path, expected, &self.shape, operation));
        }
        Ok(())
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 8;
        write!(f, "Tensor(shape={:?}, ", self.shape)?;
        if self.data.len() <= PREVIEW {
            write!(f, "data={:?}", &self.data[..])?;
        } else {
            write!(f, "data={:?}...", &self.data[..PREVIEW])?;
        }
        if self.trace.is_some() {
            write!(f, ", traced")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
#[path = "tensor_test.rs"]
mod tests;
