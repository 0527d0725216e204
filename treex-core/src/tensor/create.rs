use super::Tensor;

/// Creates a tensor filled with zeros.
pub fn zeros(shape: &[usize]) -> Tensor {
    full(shape, 0.0)
}

/// Creates a tensor filled with ones.
pub fn ones(shape: &[usize]) -> Tensor {
    full(shape, 1.0)
}

/// Creates a tensor filled with `value`.
pub fn full(shape: &[usize], value: f32) -> Tensor {
    let n: usize = shape.iter().product();
    Tensor::from_parts(vec![value; n], shape.to_vec())
}

/// Zeros with the shape of `other`.
pub fn zeros_like(other: &Tensor) -> Tensor {
    zeros(other.shape())
}

/// Ones with the shape of `other`.
pub fn ones_like(other: &Tensor) -> Tensor {
    ones(other.shape())
}

/// One-hot encodes integer labels (stored as `f32`) into `[labels.., num_classes]`.
///
/// Labels outside `0..num_classes` produce an all-zero row.
pub fn one_hot(labels: &Tensor, num_classes: usize) -> Tensor {
    let mut shape = labels.shape().to_vec();
    shape.push(num_classes);
    let mut data = vec![0.0; labels.numel() * num_classes];
    for (row, &label) in labels.data().iter().enumerate() {
        if label >= 0.0 && (label as usize) < num_classes {
            data[row * num_classes + label as usize] = 1.0;
        }
    }
    Tensor::from_parts(data, shape)
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Tensor {
        zeros(shape)
    }

    pub fn ones(shape: &[usize]) -> Tensor {
        ones(shape)
    }

    pub fn full(shape: &[usize], value: f32) -> Tensor {
        full(shape, value)
    }
}
