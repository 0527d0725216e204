use super::context::Context;
use crate::error::{Result, TreexError};
use crate::key_seq::{Key, KeySeq};
use crate::tensor::Tensor;
use crate::tree::{self, KeyPath, Leaf, Leaves, Tree, TreeDef};
use crate::types::Filter;
use std::fmt::Debug;

/// The base trait for all neural network modules (layers, containers, etc.).
///
/// A module is an immutable tree of typed leaves. Every operation returns a
/// new module instead of mutating the receiver; callers rebind the result.
/// Once initialized, the treedef of a module never changes: `train`, `eval`,
/// `apply`, `merge` and the filtering projections only replace leaf values.
///
/// Implementors provide [`initialize`](Module::initialize) and
/// [`forward`](Module::forward) plus the mode/initialization accessors; the
/// public operations (`init`, `apply`, `parameters`, `merge`, ...) are
/// provided on top of them.
pub trait Module: Tree + Clone + Debug + Send + Sync + 'static {
    /// Allocates every leaf for an input like `x` and returns the initialized
    /// module. Draws keys from `ctx` for random initialization.
    ///
    /// # Errors
    /// [`TreexError::ShapeMismatch`] if `x` does not fit the configured
    /// hyperparameters.
    fn initialize(&self, ctx: &mut Context, x: &Tensor) -> Result<Self>;

    /// Runs the forward computation.
    ///
    /// Returns the output together with the module carrying any updated
    /// non-trainable state (e.g. batch statistics).
    fn forward(&self, ctx: &mut Context, x: &Tensor) -> Result<(Tensor, Self)>;

    fn is_initialized(&self) -> bool;

    fn is_training(&self) -> bool;

    /// Returns a copy with the mode flag set on this module and every
    /// sub-module.
    fn with_training(&self, training: bool) -> Self;

    /// Initializes all leaves from `seed` and a sample input.
    ///
    /// Deterministic: the same seed and input always give the same leaves.
    fn init(&self, seed: impl Into<Key>, x: &Tensor) -> Result<Self> {
        let mut ctx = Context::new(Some(KeySeq::new(seed)));
        let module = self.initialize(&mut ctx, x)?;
        log::debug!(
            "Initialized module with {} leaves for input {:?}",
            module.treedef().len(),
            x.shape()
        );
        Ok(module)
    }

    /// Runs the module on `x`.
    ///
    /// `key` seeds the randomness of stochastic layers; in training mode a
    /// layer that needs randomness fails with [`TreexError::MissingState`]
    /// when no key is given.
    ///
    /// # Errors
    /// [`TreexError::MissingState`] if the module was never initialized.
    fn apply(&self, key: Option<Key>, x: &Tensor) -> Result<(Tensor, Self)> {
        if !self.is_initialized() {
            return Err(TreexError::missing(
                KeyPath::root().to_string(),
                "apply called before init",
            ));
        }
        let mut ctx = Context::new(key.map(KeySeq::new));
        self.forward(&mut ctx, x)
    }

    /// Runs the module without a key and discards state updates.
    fn call(&self, x: &Tensor) -> Result<Tensor> {
        self.apply(None, x).map(|(y, _)| y)
    }

    /// Projection onto the `Parameter` leaves; every other slot is absent.
    fn parameters(&self) -> Result<Self> {
        tree::filter(self, Filter::parameters())
    }

    fn batch_stats(&self) -> Result<Self> {
        tree::filter(self, Filter::batch_stats())
    }

    fn states(&self) -> Result<Self> {
        tree::filter(self, Filter::states())
    }

    fn filter(&self, filter: impl Into<Filter>) -> Result<Self> {
        tree::filter(self, filter)
    }

    /// Takes every present leaf value of `other`, keeping the receiver's
    /// value where `other` is absent.
    ///
    /// # Errors
    /// [`TreexError::StructureMismatch`] if the treedefs differ.
    fn merge(&self, other: &Self) -> Result<Self> {
        tree::merge(self, other)
    }

    fn train(&self) -> Self {
        self.with_training(true)
    }

    fn eval(&self) -> Self {
        self.with_training(false)
    }

    fn treedef(&self) -> TreeDef {
        tree::treedef(self)
    }
}

/// Object-safe mirror of [`Module`], so containers can hold heterogeneous
/// sub-modules as `Box<dyn DynModule>`.
pub trait DynModule: Debug + Send + Sync {
    fn flatten_dyn(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>);
    fn unflatten_dyn(&self, leaves: &mut Leaves) -> Result<Box<dyn DynModule>>;
    fn initialize_dyn(&self, ctx: &mut Context, x: &Tensor) -> Result<Box<dyn DynModule>>;
    fn forward_dyn(&self, ctx: &mut Context, x: &Tensor) -> Result<(Tensor, Box<dyn DynModule>)>;
    fn with_training_dyn(&self, training: bool) -> Box<dyn DynModule>;
    fn is_initialized_dyn(&self) -> bool;
    fn is_training_dyn(&self) -> bool;
    fn clone_dyn(&self) -> Box<dyn DynModule>;
}

impl<M: Module> DynModule for M {
    fn flatten_dyn(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>) {
        self.flatten_into(prefix, out)
    }

    fn unflatten_dyn(&self, leaves: &mut Leaves) -> Result<Box<dyn DynModule>> {
        Ok(Box::new(self.unflatten_from(leaves)?))
    }

    fn initialize_dyn(&self, ctx: &mut Context, x: &Tensor) -> Result<Box<dyn DynModule>> {
        Ok(Box::new(self.initialize(ctx, x)?))
    }

    fn forward_dyn(&self, ctx: &mut Context, x: &Tensor) -> Result<(Tensor, Box<dyn DynModule>)> {
        let (y, module) = self.forward(ctx, x)?;
        Ok((y, Box::new(module)))
    }

    fn with_training_dyn(&self, training: bool) -> Box<dyn DynModule> {
        Box::new(self.with_training(training))
    }

    fn is_initialized_dyn(&self) -> bool {
        self.is_initialized()
    }

    fn is_training_dyn(&self) -> bool {
        self.is_training()
    }

    fn clone_dyn(&self) -> Box<dyn DynModule> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn DynModule> {
    fn clone(&self) -> Self {
        self.clone_dyn()
    }
}

#[cfg(test)]
#[path = "module_test.rs"]
mod tests;
