// src/nn/layers/mod.rs
// Layers with their own leaves (Linear, Conv, ...) and stateless ones (Dropout).

pub mod batch_norm;
pub mod conv;
pub mod dropout;
pub mod linear;

// Re-export key layer structs
pub use batch_norm::{BatchNorm, BatchNormConfig};
pub use conv::{Conv, ConvConfig};
pub use dropout::Dropout;
pub use linear::{Linear, LinearConfig};
