use super::transform::{GradientTransformation, TransformState};
use crate::error::{Result, TreexError};
use crate::tensor::Tensor;
use crate::tree::{self, KeyPath, Leaf, Leaves, Tree, TreeDef, Value};
use crate::types::LeafKind;
use std::sync::Arc;

/// Parameter layout captured at `init` plus the transformation's state laid
/// out as leaves mirroring that layout.
#[derive(Debug, Clone)]
struct OptimizerState {
    params_def: TreeDef,
    /// Shape of every params slot that was present at `init`.
    shapes: Vec<Option<Vec<usize>>>,
    count: Leaf,
    /// One leaf per params slot for every slot name; absent where the
    /// params slot was absent.
    slots: Vec<(String, Vec<Leaf>)>,
}

impl OptimizerState {
    fn present_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.shapes
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| i)
    }

    /// Collects the leaves into the compact form the transformation sees.
    fn to_transform_state(&self) -> Result<TransformState> {
        let count = self.count.require_array("count")?.item()?;
        let mut slots = Vec::with_capacity(self.slots.len());
        for (name, leaves) in &self.slots {
            let tensors = self
                .present_indices()
                .map(|i| {
                    let path = slot_path(name, &self.params_def.entries()[i].0);
                    leaves[i].require_array(path.as_str()).map(Tensor::clone)
                })
                .collect::<Result<Vec<_>>>()?;
            slots.push((name.clone(), tensors));
        }
        Ok(TransformState {
            count: count as u32,
            slots,
        })
    }

    /// Spreads a compact state back over the params layout.
    fn with_transform_state(&self, state: TransformState) -> Result<OptimizerState> {
        let present: Vec<usize> = self.present_indices().collect();
        let mut slots = Vec::with_capacity(state.slots.len());
        for (name, tensors) in state.slots {
            if tensors.len() != present.len() {
                return Err(TreexError::structure(
                    name,
                    format!("{} tensors", present.len()),
                    format!("{} tensors", tensors.len()),
                ));
            }
            let mut leaves = vec![Leaf::empty(LeafKind::OptState); self.shapes.len()];
            for (&i, t) in present.iter().zip(tensors) {
                leaves[i] = Leaf::new(LeafKind::OptState, t.detach());
            }
            slots.push((name, leaves));
        }
        Ok(OptimizerState {
            count: Leaf::new(LeafKind::OptState, Tensor::scalar(state.count as f32)),
            slots,
            ..self.clone()
        })
    }
}

fn slot_path(slot: &str, param: &KeyPath) -> KeyPath {
    if param.as_str().is_empty() {
        KeyPath::root().child(slot)
    } else {
        KeyPath::root().child(slot).child(param.as_str())
    }
}

/// Tree-structured wrapper around a [`GradientTransformation`].
///
/// `init(params)` records the params treedef, presence mask and shapes and
/// asks the transformation for its initial state. `update(grads, params)`
/// checks `grads` and `params` against that record, calls the
/// transformation exactly once and returns `params + updates` together with
/// the optimizer carrying the new state. Slots absent in `params` (for
/// example everything but the parameters of `module.parameters()`) are left
/// untouched.
///
/// The state is exposed as `OptState` leaves at `count` and
/// `<slot>/<param path>`.
#[derive(Debug, Clone)]
pub struct Optimizer {
    transform: Arc<dyn GradientTransformation>,
    state: Option<OptimizerState>,
}

impl Optimizer {
    pub fn new(transform: impl GradientTransformation + 'static) -> Self {
        Optimizer {
            transform: Arc::new(transform),
            state: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Number of updates applied since `init`.
    pub fn step_count(&self) -> Option<u32> {
        let state = self.state.as_ref()?;
        let count = state.count.array()?.item().ok()?;
        Some(count as u32)
    }

    /// Allocates the optimizer state for `params`.
    ///
    /// # Errors
    /// Any error of the transformation's `init`.
    pub fn init<P: Tree>(&self, params: &P) -> Result<Self> {
        let flat = tree::flatten(params);
        let shapes: Vec<Option<Vec<usize>>> = flat
            .iter()
            .map(|(_, leaf)| leaf.array().map(|t| t.shape().to_vec()))
            .collect();
        let present: Vec<Tensor> = flat
            .iter()
            .filter_map(|(_, leaf)| leaf.array().map(Tensor::detach))
            .collect();
        let inner = self.transform.init(&present)?;
        log::debug!(
            "Optimizer init: {} of {} leaves trainable, slots {:?}",
            present.len(),
            flat.len(),
            inner.slot_names().collect::<Vec<_>>()
        );
        let layout = OptimizerState {
            params_def: tree::treedef(params),
            shapes,
            count: Leaf::empty(LeafKind::OptState),
            slots: Vec::new(),
        };
        Ok(Optimizer {
            transform: Arc::clone(&self.transform),
            state: Some(layout.with_transform_state(inner)?),
        })
    }

    /// Applies one optimization step.
    ///
    /// # Returns
    /// `(new_params, new_optimizer)`.
    ///
    /// # Errors
    /// * [`TreexError::MissingState`] if called before `init`.
    /// * [`TreexError::StructureMismatch`] if `grads` or `params` differ in
    ///   treedef from the params seen at `init`, or lack a value where one was
    ///   present at `init`.
    /// * [`TreexError::ShapeMismatch`] if a gradient or parameter changed shape.
    pub fn update<P: Tree>(&self, grads: &P, params: &P) -> Result<(P, Self)> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| TreexError::missing("optimizer", "update called before init"))?;
        state.params_def.check_same(&tree::treedef(grads))?;
        state.params_def.check_same(&tree::treedef(params))?;

        let grad_leaves = tree::flatten(grads);
        let param_leaves = tree::flatten(params);
        let mut g = Vec::new();
        let mut p = Vec::new();
        for i in state.present_indices() {
            let path = grad_leaves[i].0.to_string();
            let expected = state.shapes[i].as_deref().unwrap_or_default();
            let grad = grad_leaves[i]
                .1
                .array()
                .ok_or_else(|| TreexError::structure(&path, "a gradient", "an absent leaf"))?;
            let param = param_leaves[i]
                .1
                .array()
                .ok_or_else(|| TreexError::structure(&path, "a parameter", "an absent leaf"))?;
            grad.expect_shape(expected, &path, "optimizer update (gradient)")?;
            param.expect_shape(expected, &path, "optimizer update (parameter)")?;
            g.push(grad.detach());
            p.push(param.detach());
        }

        let (updates, inner) = self.transform.update(&g, state.to_transform_state()?, &p)?;
        if updates.len() != p.len() {
            return Err(TreexError::Internal(format!(
                "gradient transformation returned {} updates for {} parameters",
                updates.len(),
                p.len()
            )));
        }

        let mut new_values = updates.iter().zip(&p).map(|(u, p)| p.add(u));
        let present: Vec<bool> = state.shapes.iter().map(Option::is_some).collect();
        let mut next = Vec::with_capacity(param_leaves.len());
        for ((path, leaf), is_present) in param_leaves.iter().zip(present) {
            if !is_present {
                next.push(leaf.clone());
                continue;
            }
            let value = new_values
                .next()
                .ok_or_else(|| TreexError::Internal("ran out of updates".to_string()))??;
            let shape = leaf.array().map(Tensor::shape).unwrap_or_default();
            value.expect_shape(shape, path.as_str(), "optimizer update (result)")?;
            next.push(leaf.with_value(Some(Value::Array(value.detach()))));
        }
        let new_params = tree::unflatten(params, next)?;
        log::trace!("Optimizer step {} applied to {} leaves", inner.count, p.len());
        Ok((
            new_params,
            Optimizer {
                transform: Arc::clone(&self.transform),
                state: Some(state.with_transform_state(inner)?),
            },
        ))
    }
}

impl Tree for Optimizer {
    fn flatten_into(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>) {
        let Some(state) = &self.state else {
            return;
        };
        state.count.flatten_into(&prefix.child("count"), out);
        for (name, leaves) in &state.slots {
            for ((param_path, _), leaf) in state.params_def.entries().iter().zip(leaves) {
                let path = slot_path(name, param_path);
                leaf.flatten_into(&prefix.child(path.as_str()), out);
            }
        }
    }

    fn unflatten_from(&self, leaves: &mut Leaves) -> Result<Self> {
        let Some(state) = &self.state else {
            return Ok(self.clone());
        };
        let count = state.count.unflatten_from(leaves)?;
        let slots = state
            .slots
            .iter()
            .map(|(name, slot_leaves)| {
                let rebuilt = slot_leaves
                    .iter()
                    .map(|leaf| leaf.unflatten_from(leaves))
                    .collect::<Result<Vec<_>>>()?;
                Ok((name.clone(), rebuilt))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Optimizer {
            transform: Arc::clone(&self.transform),
            state: Some(OptimizerState {
                count,
                slots,
                ..state.clone()
            }),
        })
    }
}

#[cfg(test)]
#[path = "optimizer_test.rs"]
mod tests;
