use crate::error::Result;
use crate::nn::activation::Lambda;
use crate::nn::context::Context;
use crate::nn::module::{DynModule, Module};
use crate::tensor::Tensor;
use crate::tree::{KeyPath, Leaf, Leaves, Tree};

/// One step of a [`Sequential`] pipeline.
#[derive(Debug, Clone)]
pub enum Stage {
    /// A sub-module with its own leaves and state.
    Module(Box<dyn DynModule>),
    /// A stateless function; contributes no leaves.
    Function(Lambda),
}

/// Runs its stages in order, feeding the output of stage `i` to stage `i + 1`.
///
/// Leaves of stage `i` live under `layers/{i}/...`. Every stage's updated
/// state is collected into the returned container.
#[derive(Debug, Clone)]
pub struct Sequential {
    stages: Vec<Stage>,
    initialized: bool,
    training: bool,
}

impl Default for Sequential {
    fn default() -> Self {
        Sequential {
            stages: Vec::new(),
            initialized: false,
            training: true,
        }
    }
}

impl Sequential {
    pub fn new() -> Self {
        Sequential::default()
    }

    /// Appends a sub-module.
    pub fn add(mut self, module: impl Module) -> Self {
        self.stages.push(Stage::Module(Box::new(module)));
        self
    }

    /// Appends a plain-function stage.
    pub fn add_fn(mut self, f: Lambda) -> Self {
        self.stages.push(Stage::Function(f));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    fn stage_name(index: usize) -> String {
        format!("layers/{}", index)
    }
}

impl Tree for Sequential {
    fn flatten_into(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>) {
        for (i, stage) in self.stages.iter().enumerate() {
            if let Stage::Module(m) = stage {
                m.flatten_dyn(&prefix.child(Self::stage_name(i)), out);
            }
        }
    }

    fn unflatten_from(&self, leaves: &mut Leaves) -> Result<Self> {
        let stages = self
            .stages
            .iter()
            .map(|stage| match stage {
                Stage::Module(m) => Ok(Stage::Module(m.unflatten_dyn(leaves)?)),
                Stage::Function(f) => Ok(Stage::Function(f.clone())),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Sequential {
            stages,
            ..self.clone()
        })
    }
}

impl Module for Sequential {
    fn initialize(&self, ctx: &mut Context, x: &Tensor) -> Result<Self> {
        let mut stages = Vec::with_capacity(self.stages.len());
        let mut current = x.clone();
        for (i, stage) in self.stages.iter().enumerate() {
            match stage {
                Stage::Module(m) => {
                    // Later stages are initialized on the output of the earlier ones.
                    let (initialized, y) = ctx.scoped(Self::stage_name(i), |ctx| {
                        let initialized = m.initialize_dyn(ctx, &current)?;
                        let (y, _) = initialized.forward_dyn(ctx, &current)?;
                        Ok((initialized, y))
                    })?;
                    stages.push(Stage::Module(initialized));
                    current = y;
                }
                Stage::Function(f) => {
                    current = ctx.scoped(Self::stage_name(i), |_| f.call(&current))?;
                    stages.push(stage.clone());
                }
            }
        }
        Ok(Sequential {
            stages,
            initialized: true,
            ..self.clone()
        })
    }

    fn forward(&self, ctx: &mut Context, x: &Tensor) -> Result<(Tensor, Self)> {
        let mut stages = Vec::with_capacity(self.stages.len());
        let mut current = x.clone();
        for (i, stage) in self.stages.iter().enumerate() {
            match stage {
                Stage::Module(m) => {
                    let (y, updated) = ctx.scoped(Self::stage_name(i), |ctx| m.forward_dyn(ctx, &current))?;
                    stages.push(Stage::Module(updated));
                    current = y;
                }
                Stage::Function(f) => {
                    current = ctx.scoped(Self::stage_name(i), |_| f.call(&current))?;
                    stages.push(stage.clone());
                }
            }
        }
        Ok((
            current,
            Sequential {
                stages,
                ..self.clone()
            },
        ))
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn with_training(&self, training: bool) -> Self {
        let stages = self
            .stages
            .iter()
            .map(|stage| match stage {
                Stage::Module(m) => Stage::Module(m.with_training_dyn(training)),
                Stage::Function(f) => Stage::Function(f.clone()),
            })
            .collect();
        Sequential {
            stages,
            initialized: self.initialized,
            training,
        }
    }
}

#[cfg(test)]
#[path = "sequential_test.rs"]
mod tests;
