// src/optim/mod.rs

//! Optimizers over parameter trees.
//!
//! A [`GradientTransformation`] is the pure numeric rule (SGD, Adam, or any
//! caller closure via [`from_fn`]); the [`Optimizer`] wrapper bridges it to
//! trees and threads its state from step to step.

pub mod adam;
pub mod optimizer;
pub mod sgd;
pub mod transform;

pub use adam::{adam, adamw, Adam, AdamConfig};
pub use optimizer::Optimizer;
pub use sgd::{sgd, Sgd, SgdConfig};
pub use transform::{from_fn, FnTransformation, GradientTransformation, TransformState};
