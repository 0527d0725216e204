use super::*;
use crate::nn::{BatchNorm, Linear, LinearConfig};
use crate::tensor::{ones, zeros};
use crate::types::LeafKind;

/// A hand-written composite: dense layer followed by batch norm.
#[derive(Debug, Clone, PartialEq)]
struct DenseBlock {
    dense: Linear,
    norm: BatchNorm,
    initialized: bool,
    training: bool,
}

impl DenseBlock {
    fn new(features: usize) -> Self {
        DenseBlock {
            dense: Linear::new(features),
            norm: BatchNorm::new(),
            initialized: false,
            training: true,
        }
    }
}

impl Tree for DenseBlock {
    fn flatten_into(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>) {
        self.dense.flatten_into(&prefix.child("dense"), out);
        self.norm.flatten_into(&prefix.child("norm"), out);
    }

    fn unflatten_from(&self, leaves: &mut Leaves) -> Result<Self> {
        Ok(DenseBlock {
            dense: self.dense.unflatten_from(leaves)?,
            norm: self.norm.unflatten_from(leaves)?,
            ..self.clone()
        })
    }
}

impl Module for DenseBlock {
    fn initialize(&self, ctx: &mut Context, x: &Tensor) -> Result<Self> {
        let dense = ctx.scoped("dense", |ctx| self.dense.initialize(ctx, x))?;
        let (h, _) = ctx.scoped("dense", |ctx| dense.forward(ctx, x))?;
        let norm = ctx.scoped("norm", |ctx| self.norm.initialize(ctx, &h))?;
        Ok(DenseBlock {
            dense,
            norm,
            initialized: true,
            ..self.clone()
        })
    }

    fn forward(&self, ctx: &mut Context, x: &Tensor) -> Result<(Tensor, Self)> {
        let (h, dense) = ctx.scoped("dense", |ctx| self.dense.forward(ctx, x))?;
        let (y, norm) = ctx.scoped("norm", |ctx| self.norm.forward(ctx, &h))?;
        Ok((
            y.relu()?,
            DenseBlock {
                dense,
                norm,
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
        DenseBlock {
            dense: self.dense.with_training(training),
            norm: self.norm.with_training(training),
            initialized: self.initialized,
            training,
        }
    }
}

fn present_paths(tree: &DenseBlock) -> Vec<String> {
    tree::flatten(tree)
        .into_iter()
        .filter(|(_, leaf)| leaf.is_present())
        .map(|(p, _)| p.as_str().to_string())
        .collect()
}

#[test]
fn test_nested_paths() -> Result<()> {
    let block = DenseBlock::new(3).init(0, &zeros(&[2, 4]))?;
    let paths: Vec<String> = block.treedef().paths().map(|p| p.as_str().to_string()).collect();
    assert_eq!(
        paths,
        vec![
            "dense/kernel",
            "dense/bias",
            "norm/scale",
            "norm/bias",
            "norm/mean",
            "norm/var"
        ]
    );
    Ok(())
}

#[test]
fn test_init_is_deterministic_and_preserves_treedef() -> Result<()> {
    let block = DenseBlock::new(3);
    let x = ones(&[2, 4]);
    let a = block.init(5, &x)?;
    let b = block.init(5, &x)?;
    assert_eq!(a, b);
    assert_eq!(a.treedef(), block.treedef());
    assert_ne!(block.init(6, &x)?, a);
    // Re-initializing an initialized module gives the same leaves again.
    assert_eq!(a.init(5, &x)?, a);
    Ok(())
}

#[test]
fn test_apply_before_init_is_state_error() {
    let err = DenseBlock::new(3).apply(None, &ones(&[2, 4])).unwrap_err();
    assert!(err.is_state_error());
}

#[test]
fn test_projections_select_leaf_kinds() -> Result<()> {
    let block = DenseBlock::new(3).init(0, &ones(&[2, 4]))?;
    assert_eq!(
        present_paths(&block.parameters()?),
        vec!["dense/kernel", "dense/bias", "norm/scale", "norm/bias"]
    );
    assert_eq!(present_paths(&block.batch_stats()?), vec!["norm/mean", "norm/var"]);
    assert_eq!(present_paths(&block.states()?), vec!["norm/mean", "norm/var"]);
    assert!(present_paths(&block.filter(LeafKind::Rng)?).is_empty());
    for projection in [block.parameters()?, block.batch_stats()?, block.states()?] {
        assert_eq!(projection.treedef(), block.treedef());
    }
    Ok(())
}

#[test]
fn test_merge_parameters_and_states_rebuilds_module() -> Result<()> {
    let block = DenseBlock::new(3).init(0, &ones(&[2, 4]))?;
    let empty = tree::filter(&block, Filter::only(&[]))?;
    let rebuilt = empty.merge(&block.parameters()?)?.merge(&block.states()?)?;
    assert_eq!(rebuilt, block);
    assert_eq!(block.merge(&block.parameters()?)?, block);
    Ok(())
}

#[test]
fn test_merge_with_different_structure_is_structure_error() -> Result<()> {
    let with_bias = Linear::new(2).init(0, &ones(&[1, 2]))?;
    let without_bias = Linear::from_config(LinearConfig::new(2).with_bias(false)).init(0, &ones(&[1, 2]))?;
    let err = with_bias.merge(&without_bias).unwrap_err();
    assert!(err.is_structure_error());
    Ok(())
}

#[test]
fn test_apply_returns_updated_state_and_call_discards_it() -> Result<()> {
    let block = DenseBlock::new(2).init(0, &ones(&[3, 2]))?;
    let x = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 2.0, 2.0], vec![3, 2])?;
    let (y, updated) = block.apply(None, &x)?;
    assert_eq!(y, block.call(&x)?);
    assert_eq!(updated.parameters()?, block.parameters()?);
    assert_ne!(updated.batch_stats()?, block.batch_stats()?);
    Ok(())
}

#[test]
fn test_train_eval_cascade() -> Result<()> {
    let block = DenseBlock::new(2).init(0, &ones(&[1, 2]))?;
    let eval = block.eval();
    assert!(!eval.is_training());
    assert!(!eval.dense.is_training());
    assert!(!eval.norm.is_training());
    assert!(eval.train().norm.is_training());
    assert_eq!(tree::leaves(&eval), tree::leaves(&block));
    Ok(())
}

#[test]
fn test_dyn_module_forwards_to_module() -> Result<()> {
    let layer = Linear::new(2).init(0, &ones(&[1, 3]))?;
    let boxed: Box<dyn DynModule> = Box::new(layer.clone());
    let copy = boxed.clone();
    assert!(copy.is_initialized_dyn());
    let mut out = Vec::new();
    copy.flatten_dyn(&KeyPath::root().child("inner"), &mut out);
    assert_eq!(out[0].0.as_str(), "inner/kernel");
    let (y, _) = copy.forward_dyn(&mut Context::without_keys(), &ones(&[1, 3]))?;
    assert_eq!(y, layer.call(&ones(&[1, 3]))?);
    assert!(!copy.with_training_dyn(false).is_training_dyn());
    Ok(())
}

#[test]
fn test_context_scopes_and_keys() {
    let mut ctx = Context::without_keys();
    assert!(!ctx.has_keys());
    let err = ctx
        .scoped("outer", |ctx| ctx.scoped("inner", |ctx| ctx.next_key("test")))
        .unwrap_err();
    assert!(err.to_string().contains("outer/inner"));
    assert_eq!(ctx.path(), &KeyPath::root());

    // Tensor ops carry no path; the innermost scope supplies it.
    let err = ctx
        .scoped("block", |ctx| ctx.scoped("dense", |_| zeros(&[2, 3]).matmul(&zeros(&[2, 3]))))
        .unwrap_err();
    assert!(err.is_shape_error());
    assert!(err.to_string().contains("'block/dense'"));

    let mut keyed = Context::new(Some(KeySeq::new(1)));
    let a = keyed.next_key("a");
    let b = keyed.next_key("b");
    assert!(a.is_ok() && b.is_ok());
    assert_ne!(a.ok(), b.ok());
}
