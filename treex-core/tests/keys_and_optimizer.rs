use treex_core::metrics::{Accuracy, Losses, Metrics};
use treex_core::nn::activation;
use treex_core::optim::{adamw, sgd, Optimizer};
use treex_core::train::Model;
use treex_core::tree::{self, Leaf};
use treex_core::{BatchNorm, Conv, Crossentropy, Key, KeySeq, Linear, LeafKind, Module, Result, Sequential, Tensor};

mod common;
use common::init_logging;

#[test]
fn test_key_seq_replays_from_seed() -> Result<()> {
    let mut a = KeySeq::new(2024);
    let mut b = KeySeq::new(2024);
    let first = a.split(3)?;
    let again = b.split(3)?;
    assert_eq!(first, again);

    let second = a.split(3)?;
    assert_ne!(first, second);
    assert!(first.iter().all(|k| !second.contains(k)));
    Ok(())
}

#[test]
fn test_key_split_does_not_consume_the_key() {
    let key = Key::new(17);
    let children = key.split(2);
    assert_eq!(key, Key::new(17));
    assert_eq!(children, key.split(2));
    assert_ne!(children[0], children[1]);
}

#[test]
fn test_optimizer_rejects_gradients_missing_a_leaf() -> Result<()> {
    let module = Linear::new(2).init(0, &Tensor::zeros(&[1, 3]))?;
    let params = module.parameters()?;
    let optimizer = Optimizer::new(sgd(0.1)?).init(&params)?;

    let leaves: Vec<Leaf> = tree::flatten(&params)
        .into_iter()
        .map(|(path, leaf)| {
            if path.as_str() == "bias" {
                Leaf::empty(LeafKind::Parameter)
            } else {
                leaf
            }
        })
        .collect();
    let grads = tree::unflatten(&params, leaves)?;
    let err = optimizer.update(&grads, &params).unwrap_err();
    assert!(err.is_structure_error());
    assert!(err.to_string().contains("bias"));
    Ok(())
}

fn images(n: usize) -> Result<(Tensor, Tensor)> {
    // Class 1 images are bright in the top half, class 0 in the bottom half.
    let x = Tensor::from_fn(&[n, 6, 6, 1], |i| {
        let example = i / 36;
        let row = (i % 36) / 6;
        let bright_top = example % 2 == 1;
        if (row < 3) == bright_top {
            1.0
        } else {
            0.0
        }
    });
    let y = Tensor::from_fn(&[n], |i| (i % 2) as f32);
    Ok((x, y))
}

#[test]
fn test_conv_model_trains_without_retracing() -> Result<()> {
    init_logging();
    let module = Sequential::new()
        .add(Conv::new(4, [3, 3]))
        .add(BatchNorm::new())
        .add_fn(activation::relu())
        .add_fn(activation::flatten())
        .add(Linear::new(2));
    let model = Model::new(
        7,
        module,
        Optimizer::new(adamw(0.01, 1e-4)?),
        Losses::new().add(Crossentropy::new()),
        Metrics::new().add(Accuracy::new()),
    );
    let (x, y) = images(8)?;
    let mut model = model.init_step(&x)?;
    let mut first_loss = None;
    for _ in 0..15 {
        model = model.reset_step().train_step(&x, &y)?;
        first_loss.get_or_insert(model.logs()?["loss"]);
    }
    let last_loss = model.logs()?["loss"];
    let first_loss = first_loss.unwrap_or(f32::NAN);
    assert!(last_loss < first_loss, "{} -> {}", first_loss, last_loss);
    assert_eq!(model.traces("train_step"), 1);

    let eval = model.eval().reset_step().test_step(&x, &y)?;
    let accuracy = eval.logs()?["accuracy"];
    assert!((0.0..=1.0).contains(&accuracy));
    assert_eq!(model.predict(&x)?.shape(), &[8]);
    Ok(())
}
