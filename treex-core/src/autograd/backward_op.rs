use crate::error::Result;
use crate::tensor::Tensor;
use std::fmt::Debug;

/// Defines the interface for the backward pass of a differentiable tensor operation.
///
/// Every operation that produces a traced tensor stores an implementation of
/// this trait on the tape, together with the tape positions of its inputs.
/// During the backward walk it receives dL/dOutput and returns dL/dInput for
/// each input, in the same order as the inputs were recorded.
///
/// Implementations only hold detached tensors, so evaluating them never
/// records new nodes.
pub trait BackwardOp: Debug + Send + Sync {
    /// Computes the gradients of the operation's inputs given `grad_output`.
    ///
    /// # Arguments
    /// * `grad_output`: dL/dOutput, shaped like the operation's output.
    ///
    /// # Returns
    /// One gradient per input, each shaped like the corresponding input.
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Tensor>>;
}
