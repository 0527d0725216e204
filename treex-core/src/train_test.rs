use super::*;
use crate::metrics::Accuracy;
use crate::model::Sequential;
use crate::nn::activation;
use crate::nn::{Crossentropy, Dropout, Linear, MeanSquaredError};
use crate::optim::sgd;
use crate::tensor::zeros;
use crate::tree;
use crate::types::Filter;

fn regression_data() -> Result<(Tensor, Tensor)> {
    let x = Tensor::new(vec![1.0, 2.0, -1.0, 0.5], vec![4, 1])?;
    let y = x.mul_scalar(2.0)?;
    Ok((x, y))
}

fn mse() -> LossesAndMetrics {
    LossesAndMetrics::new(Losses::new().add(MeanSquaredError::new()), Metrics::new())
}

fn classifier() -> Result<Model<Sequential>> {
    let module = Sequential::new()
        .add(Linear::new(8))
        .add_fn(activation::relu())
        .add(Dropout::new(0.2)?)
        .add(Linear::new(3));
    Ok(Model::new(
        0,
        module,
        Optimizer::new(sgd(0.05)?),
        Losses::new().add(Crossentropy::new()),
        Metrics::new().add(Accuracy::new()),
    ))
}

fn class_batch(n: usize) -> Result<(Tensor, Tensor)> {
    let x = Tensor::from_fn(&[n, 2], |i| ((i * 7) % 5) as f32 - 2.0);
    let y = Tensor::from_fn(&[n], |i| (i % 3) as f32);
    Ok((x, y))
}

#[test]
fn test_init_step_initializes_module_and_optimizer() -> Result<()> {
    let (x, _) = regression_data()?;
    let (module, optimizer) = init_step(&Linear::new(1), &Optimizer::new(sgd(0.1)?), 0, &x)?;
    assert!(module.is_initialized());
    assert_eq!(optimizer.step_count(), Some(0));
    Ok(())
}

#[test]
fn test_train_steps_reduce_loss() -> Result<()> {
    let (x, y) = regression_data()?;
    let (mut module, mut optimizer) = init_step(&Linear::new(1), &Optimizer::new(sgd(0.1)?), 0, &x)?;
    let lm = mse().reset();
    let (initial, _, _) = loss_fn(None, None, &module, &lm, &x, &y)?;
    let mut keys = KeySeq::new(1);
    for _ in 0..30 {
        let (m, o, _) = train_step(keys.next()?, &module, &optimizer, &lm, &x, &y)?;
        module = m;
        optimizer = o;
    }
    let (last, _, _) = loss_fn(None, None, &module, &lm, &x, &y)?;
    assert!(last.item()? < initial.item()? * 0.1, "{:?} -> {:?}", initial, last);
    assert_eq!(optimizer.step_count(), Some(30));
    Ok(())
}

#[test]
fn test_train_step_updates_accumulators_with_pre_update_loss() -> Result<()> {
    let (x, y) = regression_data()?;
    let (module, optimizer) = init_step(&Linear::new(1), &Optimizer::new(sgd(0.1)?), 0, &x)?;
    let lm = mse().reset();
    let (before, _, _) = loss_fn(None, None, &module, &lm, &x, &y)?;
    let (_, _, lm) = train_step(Key::new(0), &module, &optimizer, &lm, &x, &y)?;
    let logs = lm.compute()?;
    approx::assert_relative_eq!(logs["loss"], before.item()?, epsilon = 1e-5);
    Ok(())
}

#[test]
fn test_test_step_leaves_parameters_alone() -> Result<()> {
    let (x, y) = regression_data()?;
    let module = Linear::new(1).init(0, &x)?;
    let lm = test_step(&module, &mse().reset(), &x, &y)?;
    assert!(!lm.compute()?["loss"].is_nan());
    assert!(reset_step(&lm).compute()?["loss"].is_nan());
    Ok(())
}

#[test]
fn test_model_train_step_before_init_is_state_error() -> Result<()> {
    let (x, y) = class_batch(6)?;
    let err = classifier()?.train_step(&x, &y).unwrap_err();
    assert!(err.is_state_error());
    Ok(())
}

#[test]
fn test_model_loop_logs_and_counts_traces() -> Result<()> {
    let (x, y) = class_batch(6)?;
    let mut model = classifier()?.init_step(&x)?;
    assert!(model.logs()?["loss"].is_nan());
    for _ in 0..3 {
        model = model.train_step(&x, &y)?;
    }
    let logs = model.logs()?;
    assert!(logs["crossentropy_loss"].is_finite());
    assert!(logs["accuracy"] >= 0.0 && logs["accuracy"] <= 1.0);
    assert_eq!(model.traces("init_step"), 1);
    assert_eq!(model.traces("train_step"), 1);
    assert_eq!(model.optimizer().step_count(), Some(3));

    let (x_small, y_small) = class_batch(4)?;
    let model = model.train_step(&x_small, &y_small)?;
    assert_eq!(model.traces("train_step"), 2);

    let model = model.eval().reset_step().test_step(&x, &y)?;
    assert_eq!(model.traces("test_step"), 1);
    assert!(model.logs()?["accuracy"].is_finite());
    Ok(())
}

#[test]
fn test_test_step_in_training_mode_needs_key_for_dropout() -> Result<()> {
    let (x, y) = class_batch(6)?;
    let model = classifier()?.init_step(&x)?;
    assert!(model.test_step(&x, &y).unwrap_err().is_state_error());
    assert!(model.eval().test_step(&x, &y).is_ok());
    Ok(())
}

#[test]
fn test_predict_returns_class_indices() -> Result<()> {
    let (x, _) = class_batch(5)?;
    let model = classifier()?.init_step(&x)?;
    let preds = model.predict(&x)?;
    assert_eq!(preds.shape(), &[5]);
    assert!(preds.data().iter().all(|&c| c == 0.0 || c == 1.0 || c == 2.0));
    // predict does not switch the stored module to eval mode.
    assert!(model.module().is_training());
    Ok(())
}

#[test]
fn test_model_tree_layout() -> Result<()> {
    let (x, _) = class_batch(2)?;
    let model = classifier()?.init_step(&x)?;
    let paths: Vec<String> = tree::treedef(&model).paths().map(|p| p.as_str().to_string()).collect();
    assert_eq!(paths[0], "keys/key");
    assert!(paths.contains(&"module/layers/0/kernel".to_string()));
    assert!(paths.contains(&"module/layers/3/bias".to_string()));
    assert!(paths.contains(&"optimizer/count".to_string()));
    assert!(paths.contains(&"losses_and_metrics/metrics/accuracy/correct".to_string()));

    let params = tree::filter(&model, Filter::parameters())?;
    assert_eq!(tree::treedef(&params), tree::treedef(&model));
    let restored = tree::merge(&params, &tree::filter(&model, Filter::states())?)?;
    assert_eq!(tree::leaves(&restored), tree::leaves(&model));
    Ok(())
}

#[test]
fn test_init_step_is_deterministic() -> Result<()> {
    let (x, _) = class_batch(3)?;
    let a = classifier()?.init_step(&x)?;
    let b = classifier()?.init_step(&x)?;
    assert_eq!(tree::leaves(&a), tree::leaves(&b));
    let zero_input = classifier()?.init_step(&zeros(&[3, 2]))?;
    assert_eq!(tree::leaves(zero_input.module()), tree::leaves(a.module()));
    Ok(())
}
