use crate::error::{Result, TreexError};
use crate::tensor::Tensor;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Internal bookkeeping of a [`GradientTransformation`].
///
/// `slots` holds one named group of tensors per kind of per-parameter state
/// (e.g. `mu` and `nu` for Adam), each with exactly one tensor per parameter,
/// in parameter order. `count` is the number of updates applied so far.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransformState {
    pub count: u32,
    pub slots: Vec<(String, Vec<Tensor>)>,
}

impl TransformState {
    pub fn new(slots: Vec<(String, Vec<Tensor>)>) -> Self {
        TransformState { count: 0, slots }
    }

    /// Per-parameter tensors of the slot called `name`.
    ///
    /// # Errors
    /// [`TreexError::MissingState`] if the slot does not exist.
    pub fn slot(&self, name: &str) -> Result<&[Tensor]> {
        self.slots
            .iter()
            .find(|(slot, _)| slot == name)
            .map(|(_, tensors)| tensors.as_slice())
            .ok_or_else(|| TreexError::missing(name, "optimizer slot was never initialized"))
    }

    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|(name, _)| name.as_str())
    }
}

/// A pure optimizer rule: `(grads, state, params) -> (updates, new_state)`.
///
/// Implementations only see the present parameter tensors, in flattening
/// order. The [`Optimizer`](super::Optimizer) wrapper takes care of mapping
/// them to and from parameter trees and of applying `params + updates`.
pub trait GradientTransformation: Debug + Send + Sync {
    /// Creates the initial state for `params`.
    fn init(&self, params: &[Tensor]) -> Result<TransformState>;

    /// Computes one update per parameter.
    ///
    /// # Returns
    /// The additive updates (same shapes as `params`) and the new state.
    fn update(
        &self,
        grads: &[Tensor],
        state: TransformState,
        params: &[Tensor],
    ) -> Result<(Vec<Tensor>, TransformState)>;
}

type InitFn = dyn Fn(&[Tensor]) -> Result<TransformState> + Send + Sync;
type UpdateFn =
    dyn Fn(&[Tensor], TransformState, &[Tensor]) -> Result<(Vec<Tensor>, TransformState)> + Send + Sync;

/// A transformation built from two closures. See [`from_fn`].
#[derive(Clone)]
pub struct FnTransformation {
    init: Arc<InitFn>,
    update: Arc<UpdateFn>,
}

impl Debug for FnTransformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnTransformation")
    }
}

impl GradientTransformation for FnTransformation {
    fn init(&self, params: &[Tensor]) -> Result<TransformState> {
        (self.init)(params)
    }

    fn update(
        &self,
        grads: &[Tensor],
        state: TransformState,
        params: &[Tensor],
    ) -> Result<(Vec<Tensor>, TransformState)> {
        (self.update)(grads, state, params)
    }
}

/// Wraps caller-supplied `init` and `update` closures as a transformation.
pub fn from_fn<I, U>(init: I, update: U) -> FnTransformation
where
    I: Fn(&[Tensor]) -> Result<TransformState> + Send + Sync + 'static,
    U: Fn(&[Tensor], TransformState, &[Tensor]) -> Result<(Vec<Tensor>, TransformState)>
        + Send
        + Sync
        + 'static,
{
    FnTransformation {
        init: Arc::new(init),
        update: Arc::new(update),
    }
}

/// Zero tensors shaped like `params`, the usual initial slot value.
pub fn zeros_like_all(params: &[Tensor]) -> Vec<Tensor> {
    params.iter().map(crate::tensor::zeros_like).collect()
}

/// Checks that `learning_rate` is finite and non-negative.
pub(crate) fn check_learning_rate(learning_rate: f32) -> Result<()> {
    if !learning_rate.is_finite() || learning_rate < 0.0 {
        return Err(TreexError::InvalidConfig(format!(
            "learning rate must be finite and non-negative, got {}",
            learning_rate
        )));
    }
    Ok(())
}
