use super::*;
use crate::metrics::{Accuracy, Mean};
use crate::nn::losses::{Crossentropy, MeanSquaredError};
use crate::tree;
use approx::assert_relative_eq;

fn column(values: &[f32]) -> Result<Tensor, TreexError> {
    Tensor::new(values.to_vec(), vec![values.len(), 1])
}

fn mse_losses() -> LossesAndMetrics {
    LossesAndMetrics::new(Losses::new().add(MeanSquaredError::new()), Metrics::new())
}

#[test]
fn test_compute_after_reset_is_nan() -> Result<(), TreexError> {
    let lm = LossesAndMetrics::new(
        Losses::new().add(Crossentropy::new()),
        Metrics::new().add(Accuracy::new()),
    )
    .reset();
    let logs = lm.compute()?;
    assert_eq!(logs.len(), 3);
    assert!(logs["crossentropy_loss"].is_nan());
    assert!(logs["loss"].is_nan());
    assert!(logs["accuracy"].is_nan());
    Ok(())
}

#[test]
fn test_two_batches_give_total_sum_over_total_count() -> Result<(), TreexError> {
    let target = Tensor::zeros(&[4, 1]);
    let b1 = column(&[1.0; 4])?;
    let b2 = column(&[2.0f32.sqrt(); 4])?;

    let lm = mse_losses().reset();
    let (l1, lm) = lm.loss_and_update(&target, &b1)?;
    let (l2, lm) = lm.loss_and_update(&target, &b2)?;
    assert_relative_eq!(l1.item()?, 1.0, epsilon = 1e-5);
    assert_relative_eq!(l2.item()?, 2.0, epsilon = 1e-5);

    let logs = lm.compute()?;
    assert_relative_eq!(logs["mean_squared_error_loss"], 1.5, epsilon = 1e-5);
    assert_relative_eq!(logs["loss"], 1.5, epsilon = 1e-5);
    Ok(())
}

#[test]
fn test_order_and_partition_invariance() -> Result<(), TreexError> {
    let target4 = Tensor::zeros(&[4, 1]);
    let b1 = column(&[1.0; 4])?;
    let b2 = column(&[2.0f32.sqrt(); 4])?;

    let forward = mse_losses()
        .reset()
        .update(&target4, &b1)?
        .update(&target4, &b2)?
        .compute()?;
    let backward = mse_losses()
        .reset()
        .update(&target4, &b2)?
        .update(&target4, &b1)?
        .compute()?;

    let mut joined = vec![1.0; 4];
    joined.extend(vec![2.0f32.sqrt(); 4]);
    let whole = mse_losses()
        .reset()
        .update(&Tensor::zeros(&[8, 1]), &column(&joined)?)?
        .compute()?;

    for logs in [&backward, &whole] {
        assert_relative_eq!(logs["loss"], forward["loss"], epsilon = 1e-5);
    }
    assert_relative_eq!(whole["loss"], 1.5, epsilon = 1e-5);
    Ok(())
}

#[test]
fn test_compute_is_repeatable() -> Result<(), TreexError> {
    let lm = mse_losses().update(&Tensor::zeros(&[2, 1]), &column(&[1.0, 3.0])?)?;
    assert_eq!(lm.compute()?, lm.compute()?);
    Ok(())
}

#[test]
fn test_weighted_total() -> Result<(), TreexError> {
    let losses = Losses::new()
        .add(MeanSquaredError::new())
        .add(MeanSquaredError::new().with_name("scaled").with_weight(0.5));
    let target = Tensor::zeros(&[2, 1]);
    let preds = column(&[2.0, 2.0])?;
    let (total, losses) = losses.loss_and_update(&target, &preds)?;
    // 4.0 + 0.5 * 4.0
    assert_relative_eq!(total.item()?, 6.0, epsilon = 1e-5);
    let logs = losses.compute()?;
    assert_relative_eq!(logs["mean_squared_error_loss"], 4.0, epsilon = 1e-5);
    assert_relative_eq!(logs["scaled_loss"], 4.0, epsilon = 1e-5);
    assert_relative_eq!(logs["loss"], 6.0, epsilon = 1e-5);
    Ok(())
}

#[test]
fn test_duplicate_names_get_suffix() -> Result<(), TreexError> {
    let metrics = Metrics::new().add(Accuracy::new()).add(Accuracy::new());
    let logs = metrics.compute()?;
    let names: Vec<&String> = logs.keys().collect();
    assert_eq!(names, vec!["accuracy", "accuracy_2"]);
    Ok(())
}

#[test]
fn test_accuracy_accumulates_counts() -> Result<(), TreexError> {
    let metrics = Metrics::new().add(Accuracy::new());
    let logits = Tensor::new(vec![0.1, 0.9, 0.8, 0.2], vec![2, 2])?;
    let labels = Tensor::new(vec![1.0, 1.0], vec![2])?;
    let metrics = metrics.update(&labels, &logits)?;
    assert_relative_eq!(metrics.compute()?["accuracy"], 0.5);

    let all_right = Tensor::new(vec![1.0, 0.0], vec![2])?;
    let metrics = metrics.update(&all_right, &logits)?;
    assert_relative_eq!(metrics.compute()?["accuracy"], 0.75);
    Ok(())
}

#[test]
fn test_mean_metric() -> Result<(), TreexError> {
    let metrics = Metrics::new().add(Mean::new("activation"));
    let metrics = metrics
        .update(&Tensor::scalar(0.0), &Tensor::new(vec![1.0, 2.0, 3.0], vec![3])?)?
        .update(&Tensor::scalar(0.0), &Tensor::new(vec![6.0], vec![1])?)?;
    assert_relative_eq!(metrics.compute()?["activation"], 3.0);
    Ok(())
}

#[test]
fn test_reset_preserves_treedef_and_zeroes_state() -> Result<(), TreexError> {
    let lm = LossesAndMetrics::new(
        Losses::new().add(Crossentropy::new()),
        Metrics::new().add(Accuracy::new()),
    );
    let logits = Tensor::new(vec![0.1, 0.9], vec![1, 2])?;
    let labels = Tensor::new(vec![1.0], vec![1])?;
    let updated = lm.update(&labels, &logits)?;
    let reset = updated.reset();

    assert_eq!(tree::treedef(&updated), tree::treedef(&reset));
    for leaf in tree::leaves(&reset) {
        assert_eq!(leaf.kind(), LeafKind::MetricState);
        assert_eq!(leaf.array(), Some(&Tensor::scalar(0.0)));
    }
    let paths: Vec<String> = tree::treedef(&reset)
        .paths()
        .map(|p| p.as_str().to_string())
        .collect();
    assert_eq!(
        paths,
        vec![
            "losses/crossentropy_loss/total",
            "losses/crossentropy_loss/count",
            "losses/loss/total",
            "losses/loss/count",
            "metrics/accuracy/correct",
            "metrics/accuracy/count",
        ]
    );
    Ok(())
}

#[test]
fn test_loss_is_differentiable_through_update() -> Result<(), TreexError> {
    let lm = mse_losses();
    let target = Tensor::zeros(&[2, 1]);
    let (value, lm, grads) = crate::autograd::value_and_grad(&Leaf::parameter(column(&[1.0, 3.0])?), |p| {
        lm.loss_and_update(&target, p.require_array("preds")?)
    })?;
    assert_relative_eq!(value.item()?, 5.0, epsilon = 1e-5);
    // Accumulator leaves are plain values, not traced.
    assert!(tree::leaves(&lm).iter().all(|l| !l.array().map_or(false, Tensor::is_traced)));
    let g = grads.array().cloned().ok_or_else(|| TreexError::Internal("no grad".into()))?;
    assert_relative_eq!(g.data()[0], 1.0, epsilon = 1e-5);
    assert_relative_eq!(g.data()[1], 3.0, epsilon = 1e-5);
    Ok(())
}

#[test]
fn test_missing_accumulator_is_state_error() -> Result<(), TreexError> {
    let lm = mse_losses();
    let filtered = tree::filter(&lm, crate::types::Filter::parameters())?;
    let err = filtered.compute().unwrap_err();
    assert!(err.is_state_error());
    Ok(())
}
