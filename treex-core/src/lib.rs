//! Tree-structured neural network modules.
//!
//! Modules, optimizers and loss/metric accumulators are immutable trees of
//! typed leaves. Every operation returns a new value; filtering and merging
//! move leaf values between trees of the same structure, which is what lets
//! gradients, optimizer updates and running statistics flow through one
//! training step.

pub mod autograd;
pub mod error;
pub mod key_seq;
pub mod metrics;
pub mod model;
pub mod nn;
pub mod optim;
pub mod tensor;
pub mod train;
pub mod tree;
pub mod types;
pub mod utils;

pub use autograd::{grad, value_and_grad};
pub use error::{Result, TreexError};
pub use key_seq::{Key, KeySeq};
pub use metrics::{Accuracy, Losses, LossesAndMetrics, Mean, Metric, Metrics};
pub use model::Sequential;
pub use nn::{
    BatchNorm, Conv, Crossentropy, Dropout, Lambda, Linear, Loss, MeanSquaredError, Module,
};
pub use optim::{GradientTransformation, Optimizer};
pub use tensor::{Padding, Tensor};
pub use tree::{KeyPath, Leaf, RetraceDetector, Tree, TreeDef, Value};
pub use types::{Filter, LeafKind};
