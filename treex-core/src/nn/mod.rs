// src/nn/mod.rs
// Neural network building blocks: the Module trait, layers, losses and initializers.

pub mod activation;
pub mod context;
pub mod init;
pub mod layers;
pub mod losses;
pub mod module;
pub mod summary;

// Re-export common items
pub use activation::Lambda;
pub use context::Context;
pub use layers::{BatchNorm, BatchNormConfig, Conv, ConvConfig, Dropout, Linear, LinearConfig};
pub use losses::{Crossentropy, Loss, MeanSquaredError};
pub use module::{DynModule, Module};
pub use summary::tabulate;
