use super::*;
use crate::autograd::grad;
use crate::tensor::zeros;
use crate::tree;
use crate::utils::testing::check_tensor_near;

fn batch() -> Result<Tensor> {
    Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2])
}

#[test]
fn test_init_allocates_parameters_and_statistics() -> Result<()> {
    let bn = BatchNorm::new().init(0, &zeros(&[4, 3]))?;
    let flat = tree::flatten(&bn);
    let described: Vec<(&str, LeafKind)> = flat.iter().map(|(p, l)| (p.as_str(), l.kind())).collect();
    assert_eq!(
        described,
        vec![
            ("scale", LeafKind::Parameter),
            ("bias", LeafKind::Parameter),
            ("mean", LeafKind::BatchStat),
            ("var", LeafKind::BatchStat),
        ]
    );
    assert_eq!(bn.running_mean(), Some(&zeros(&[3])));
    assert_eq!(bn.running_var(), Some(&Tensor::ones(&[3])));
    Ok(())
}

#[test]
fn test_training_forward_normalizes_and_updates_statistics() -> Result<()> {
    let bn = BatchNorm::new().init(0, &batch()?)?;
    let (y, updated) = bn.apply(None, &batch()?)?;
    check_tensor_near(&y, &[2, 2], &[-1.0, -1.0, 1.0, 1.0], 1e-4);
    check_tensor_near(updated.running_mean().ok_or_else(|| TreexError::Internal("mean".into()))?, &[2], &[0.02, 0.03], 1e-6);
    check_tensor_near(updated.running_var().ok_or_else(|| TreexError::Internal("var".into()))?, &[2], &[1.0, 1.0], 1e-6);
    assert_eq!(updated.treedef(), bn.treedef());
    // Only the statistics move.
    assert_eq!(updated.parameters()?, bn.parameters()?);
    Ok(())
}

#[test]
fn test_eval_forward_uses_running_statistics() -> Result<()> {
    let bn = BatchNorm::new().init(0, &batch()?)?.eval();
    let (y, updated) = bn.apply(None, &batch()?)?;
    check_tensor_near(&y, &[2, 2], &[1.0, 2.0, 3.0, 4.0], 1e-4);
    assert_eq!(updated, bn);
    Ok(())
}

#[test]
fn test_momentum_controls_running_update() -> Result<()> {
    let config = BatchNormConfig::default().with_momentum(0.0);
    let bn = BatchNorm::from_config(config)?.init(0, &batch()?)?;
    let (_, updated) = bn.apply(None, &batch()?)?;
    check_tensor_near(updated.running_mean().ok_or_else(|| TreexError::Internal("mean".into()))?, &[2], &[2.0, 3.0], 1e-6);
    Ok(())
}

#[test]
fn test_batch_stats_projection() -> Result<()> {
    let bn = BatchNorm::new().init(0, &zeros(&[2, 2]))?;
    let stats = bn.batch_stats()?;
    let present: Vec<bool> = tree::leaves(&stats).iter().map(Leaf::is_present).collect();
    assert_eq!(present, vec![false, false, true, true]);
    assert_eq!(bn.merge(&stats)?, bn);
    Ok(())
}

#[test]
fn test_bias_gradient_counts_examples() -> Result<()> {
    let bn = BatchNorm::new().init(0, &batch()?)?;
    let (grads, updated) = grad(&bn.parameters()?, |params| {
        let (y, updated) = bn.merge(params)?.apply(None, &batch()?)?;
        Ok((y.sum()?, updated))
    })?;
    let bias_grad = tree::flatten(&grads)
        .into_iter()
        .find(|(p, _)| p.as_str() == "bias")
        .and_then(|(_, l)| l.array().cloned())
        .ok_or_else(|| TreexError::Internal("no bias grad".into()))?;
    check_tensor_near(&bias_grad, &[2], &[2.0, 2.0], 1e-5);
    // Running statistics come back as plain values.
    assert!(!updated.running_mean().map_or(false, Tensor::is_traced));
    Ok(())
}

#[test]
fn test_feature_mismatch_is_shape_error() -> Result<()> {
    let bn = BatchNorm::new().init(0, &zeros(&[2, 3]))?;
    assert!(bn.call(&zeros(&[2, 4])).unwrap_err().is_shape_error());
    assert!(bn.init(0, &Tensor::scalar(1.0)).unwrap_err().is_shape_error());
    Ok(())
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = BatchNorm::from_config(BatchNormConfig::default().with_momentum(1.5)).unwrap_err();
    assert!(matches!(err, TreexError::InvalidConfig(_)));
}
