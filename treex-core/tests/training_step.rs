use approx::assert_relative_eq;
use treex_core::metrics::{Losses, LossesAndMetrics, Metrics};
use treex_core::nn::activation;
use treex_core::optim::{sgd, Optimizer};
use treex_core::train::{init_step, train_step};
use treex_core::tree;
use treex_core::utils::testing::check_tensor_near;
use treex_core::{Key, Linear, MeanSquaredError, Module, Result, Sequential, Tensor};

mod common;
use common::{array_at, init_logging, with_arrays};

fn two_layer() -> Sequential {
    Sequential::new()
        .add(Linear::new(2))
        .add_fn(activation::relu())
        .add(Linear::new(1))
}

#[test]
fn test_sgd_step_matches_hand_computed_gradients() -> Result<()> {
    init_logging();
    let x = Tensor::new(vec![1.0, 2.0], vec![1, 2])?;
    let y = Tensor::new(vec![0.5], vec![1, 1])?;

    let (module, optimizer) = init_step(&two_layer(), &Optimizer::new(sgd(0.1)?), 0, &x)?;
    let module = with_arrays(
        &module,
        &[
            ("layers/0/kernel", Tensor::new(vec![0.5, -1.0, 0.25, 1.0], vec![2, 2])?),
            ("layers/2/kernel", Tensor::new(vec![2.0, -1.0], vec![2, 1])?),
            ("layers/2/bias", Tensor::new(vec![0.5], vec![1])?),
        ],
    )?;
    // h = relu(x @ W1) = [1, 1], y_hat = h @ W2 + b2 = 1.5, loss = (1.5 - 0.5)^2
    check_tensor_near(&module.call(&x)?, &[1, 1], &[1.5], 1e-6);

    let losses = LossesAndMetrics::new(Losses::new().add(MeanSquaredError::new()), Metrics::new());
    let (module, optimizer, losses) = train_step(Key::new(0), &module, &optimizer, &losses, &x, &y)?;

    // dL/dy_hat = 2, dW2 = h^T * 2, dh = 2 * W2, dW1 = x^T dh
    check_tensor_near(&array_at(&module, "layers/0/kernel")?, &[2, 2], &[0.1, -0.8, -0.55, 1.4], 1e-5);
    check_tensor_near(&array_at(&module, "layers/0/bias")?, &[2], &[-0.4, 0.2], 1e-5);
    check_tensor_near(&array_at(&module, "layers/2/kernel")?, &[2, 1], &[1.8, -1.2], 1e-5);
    check_tensor_near(&array_at(&module, "layers/2/bias")?, &[1], &[0.3], 1e-5);

    assert_relative_eq!(losses.compute()?["loss"], 1.0, epsilon = 1e-5);
    assert_eq!(optimizer.step_count(), Some(1));
    Ok(())
}

#[test]
fn test_shapes_are_stable_across_modes_and_projections() -> Result<()> {
    let x = Tensor::zeros(&[3, 4]);
    let module = two_layer().init(42, &x)?;
    let signature = tree::signature(&module);
    for variant in [module.train(), module.eval(), module.merge(&module.parameters()?)?] {
        assert_eq!(tree::signature(&variant), signature);
    }
    let params = module.parameters()?;
    assert_eq!(tree::treedef(&params), tree::treedef(&module));
    for ((_, a), (_, b)) in tree::flatten(&params).iter().zip(tree::flatten(&module).iter()) {
        assert_eq!(a.value().map(|v| v.shape()), b.value().map(|v| v.shape()));
    }
    Ok(())
}

#[test]
fn test_init_depends_only_on_seed_and_shape() -> Result<()> {
    let a = two_layer().init(5, &Tensor::zeros(&[2, 3]))?;
    let b = two_layer().init(5, &Tensor::ones(&[7, 3]))?;
    let c = two_layer().init(6, &Tensor::zeros(&[2, 3]))?;
    assert_eq!(tree::leaves(&a), tree::leaves(&b));
    assert_ne!(tree::leaves(&a), tree::leaves(&c));
    Ok(())
}

#[test]
fn test_merge_of_parameters_is_identity() -> Result<()> {
    let module = Sequential::new()
        .add(Linear::new(3))
        .add(treex_core::BatchNorm::new())
        .init(1, &Tensor::ones(&[4, 2]))?;
    let merged = module.merge(&module.parameters()?)?;
    assert_eq!(tree::leaves(&merged), tree::leaves(&module));
    let merged = module.merge(&module.states()?)?;
    assert_eq!(tree::leaves(&merged), tree::leaves(&module));
    Ok(())
}
