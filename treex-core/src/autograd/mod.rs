//! Minimal reverse-mode differentiation over [`Tensor`](crate::Tensor) values.
//!
//! A [`Tape`] records every operation whose operands are traced. Gradients of
//! a scalar with respect to the watched leaves are obtained by walking the
//! tape backwards. [`value_and_grad`] lifts this to whole parameter trees.

pub mod backward_op;
pub mod grad;
pub(crate) mod ops;
pub mod tape;

pub use backward_op::BackwardOp;
pub use grad::{grad, value_and_grad};
pub use tape::{Gradients, Tape};

#[cfg(test)]
#[path = "autograd_test.rs"]
mod tests;
