//! # Convolutional classifier trained with `Model`
//!
//! Trains a small convolutional network on synthetic 14x14 "digits" (each of
//! the ten classes is a bar at its own row or column, plus noise) using the
//! full step cycle:
//!
//! 1.  **Model definition**: a `Sequential` of `Conv`, `BatchNorm`, `Dropout`,
//!     `relu`, global average pooling and a final `Linear` layer, wrapped in a
//!     `Model` with `adamw`, `Crossentropy` and `Accuracy`.
//! 2.  **`init_step`** on a sample batch, then a `tabulate` summary.
//! 3.  **Epoch loop**: `train()` + `reset_step()` + `train_step` on random
//!     batches, then `eval()` + `reset_step()` + `test_step` on held-out data.
//! 4.  **Retrace report**: every step should be traced exactly once.
//!
//! ## Running
//! `RUST_LOG=info cargo run --example mnist_cnn`

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use treex_core::metrics::{Accuracy, Losses, Metrics};
use treex_core::nn::{activation, tabulate, BatchNorm, Conv, ConvConfig, Crossentropy, Dropout, Linear};
use treex_core::optim::{adamw, Optimizer};
use treex_core::train::Model;
use treex_core::{Key, Result, Sequential, Tensor};

const SIDE: usize = 14;
const CLASSES: usize = 10;
const EPOCHS: usize = 3;
const BATCH_SIZE: usize = 32;
const STEPS_PER_EPOCH: usize = 20;
const SEED: u64 = 420;

/// `n` noisy images and their labels, drawn from `key`.
fn synthetic_digits(key: Key, n: usize) -> Result<(Tensor, Tensor)> {
    let mut rng = key.rng();
    let labels: Vec<usize> = (0..n).map(|_| rng.gen_range(0..CLASSES)).collect();
    let mut pixels = Vec::with_capacity(n * SIDE * SIDE);
    for &label in &labels {
        let line = 2 + (label % 5) * 2;
        for row in 0..SIDE {
            for col in 0..SIDE {
                let on_bar = if label < 5 { row == line } else { col == line };
                let base = if on_bar { 1.0 } else { 0.0 };
                let noise: f32 = rng.gen_range(-0.2..0.2);
                pixels.push(base + noise);
            }
        }
    }
    let x = Tensor::new(pixels, vec![n, SIDE, SIDE, 1])?;
    let y = Tensor::new(labels.iter().map(|&l| l as f32).collect(), vec![n])?;
    Ok((x, y))
}

/// Rows `indices` of `x` (rank 4) and `y` (rank 1).
fn gather(x: &Tensor, y: &Tensor, indices: &[usize]) -> Result<(Tensor, Tensor)> {
    let row = SIDE * SIDE;
    let mut xs = Vec::with_capacity(indices.len() * row);
    let mut ys = Vec::with_capacity(indices.len());
    for &i in indices {
        xs.extend_from_slice(&x.data()[i * row..(i + 1) * row]);
        ys.push(y.data()[i]);
    }
    Ok((
        Tensor::new(xs, vec![indices.len(), SIDE, SIDE, 1])?,
        Tensor::new(ys, vec![indices.len()])?,
    ))
}

fn format_logs(logs: &BTreeMap<String, f32>, suffix: &str) -> String {
    logs.iter()
        .map(|(name, value)| format!("{}{}: {:.4}", name, suffix, value))
        .collect::<Vec<_>>()
        .join(", ")
}

fn main() -> Result<()> {
    env_logger::init();

    let (x_train, y_train) = synthetic_digits(Key::new(SEED), 512)?;
    let (x_test, y_test) = synthetic_digits(Key::new(SEED + 1), 128)?;
    println!("x_train: {:?}", x_train.shape());
    println!("x_test: {:?}", x_test.shape());

    let module = Sequential::new()
        .add(Conv::from_config(ConvConfig::new(8, [3, 3]).with_strides([2, 2]))?)
        .add(BatchNorm::new())
        .add(Dropout::new(0.05)?)
        .add_fn(activation::relu())
        .add(Conv::from_config(ConvConfig::new(16, [3, 3]).with_strides([2, 2]))?)
        .add(BatchNorm::new())
        .add(Dropout::new(0.1)?)
        .add_fn(activation::relu())
        .add_fn(activation::mean_over(vec![1, 2]))
        .add(Linear::new(CLASSES));

    let model = Model::new(
        SEED,
        module,
        Optimizer::new(adamw(1e-2, 1e-4)?),
        Losses::new().add(Crossentropy::new()),
        Metrics::new().add(Accuracy::new()),
    );

    let all: Vec<usize> = (0..BATCH_SIZE).collect();
    let (x_sample, _) = gather(&x_train, &y_train, &all)?;
    let mut model = model.init_step(&x_sample)?;
    println!("{}", tabulate(model.module()));

    let mut rng = StdRng::seed_from_u64(SEED);
    let train_size = x_train.shape()[0];
    let test_size = x_test.shape()[0];
    for epoch in 0..EPOCHS {
        model = model.train().reset_step();
        for _ in 0..STEPS_PER_EPOCH {
            let idx: Vec<usize> = (0..BATCH_SIZE).map(|_| rng.gen_range(0..train_size)).collect();
            let (x, y) = gather(&x_train, &y_train, &idx)?;
            model = model.train_step(&x, &y)?;
        }
        let train_logs = model.logs()?;

        model = model.eval().reset_step();
        for start in (0..test_size).step_by(BATCH_SIZE) {
            let idx: Vec<usize> = (start..(start + BATCH_SIZE).min(test_size)).collect();
            let (x, y) = gather(&x_test, &y_test, &idx)?;
            model = model.test_step(&x, &y)?;
        }
        let test_logs = model.logs()?;
        log::info!("epoch {} done", epoch);
        println!(
            "[{}] {}, {}",
            epoch,
            format_logs(&train_logs, ""),
            format_logs(&test_logs, "_valid")
        );
    }

    let (x, y) = gather(&x_test, &y_test, &all)?;
    let predictions = model.predict(&x)?;
    let correct = predictions
        .data()
        .iter()
        .zip(y.data())
        .filter(|(p, t)| p == t)
        .count();
    println!("predicted {}/{} of the first test batch correctly", correct, BATCH_SIZE);
    for step in ["init_step", "train_step", "test_step"] {
        println!("{} traced {} time(s)", step, model.traces(step));
    }
    Ok(())
}
