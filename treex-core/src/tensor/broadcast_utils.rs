use crate::error::{Result, TreexError};
use crate::tensor::Tensor;

/// Computes the broadcast shape of two shapes (NumPy rules, aligned on the right).
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i + a.len() >= rank { a[i + a.len() - rank] } else { 1 };
        let db = if i + b.len() >= rank { b[i + b.len() - rank] } else { 1 };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return Err(TreexError::shape("", a, b, "broadcast")),
        };
    }
    Ok(out)
}

/// Row-major strides of `shape`.
pub(crate) fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Strides of `shape` viewed as `out_shape`, with zero stride on broadcast axes.
fn broadcast_strides(shape: &[usize], out_shape: &[usize]) -> Vec<usize> {
    let own = contiguous_strides(shape);
    let offset = out_shape.len() - shape.len();
    (0..out_shape.len())
        .map(|i| {
            if i < offset || shape[i - offset] == 1 {
                0
            } else {
                own[i - offset]
            }
        })
        .collect()
}

/// Applies `f` element-wise over the broadcast of `a` and `b`.
pub(crate) fn broadcast_zip(
    a: &Tensor,
    b: &Tensor,
    f: impl Fn(f32, f32) -> f32,
) -> Result<Tensor> {
    if a.shape() == b.shape() {
        let data = a.data().iter().zip(b.data()).map(|(&x, &y)| f(x, y)).collect();
        return Ok(Tensor::from_parts(data, a.shape().to_vec()));
    }
    let out_shape = broadcast_shapes(a.shape(), b.shape())?;
    let sa = broadcast_strides(a.shape(), &out_shape);
    let sb = broadcast_strides(b.shape(), &out_shape);
    let n: usize = out_shape.iter().product();
    let mut index = vec![0usize; out_shape.len()];
    let mut data = Vec::with_capacity(n);
    for _ in 0..n {
        let ia: usize = index.iter().zip(&sa).map(|(i, s)| i * s).sum();
        let ib: usize = index.iter().zip(&sb).map(|(i, s)| i * s).sum();
        data.push(f(a.data()[ia], b.data()[ib]));
        // advance the multi-index
        for axis in (0..out_shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < out_shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    Ok(Tensor::from_parts(data, out_shape))
}

impl Tensor {
    /// Reduces a (gradient) tensor to `target_shape` by summing along the
    /// broadcast dimensions.
    ///
    /// This is the backward counterpart of broadcasting.
    pub fn reduce_to_shape(&self, target_shape: &[usize]) -> Result<Tensor> {
        if self.shape() == target_shape {
            return Ok(self.detach());
        }
        let rank = self.rank();
        if rank < target_shape.len() {
            return Err(TreexError::Internal(format!(
                "Cannot reduce shape {:?} to target {:?}: current rank < target rank.",
                self.shape(),
                target_shape
            )));
        }
        let rank_diff = rank - target_shape.len();
        let mut axes: Vec<usize> = (0..rank_diff).collect();
        for (i, &target_dim) in target_shape.iter().enumerate() {
            let current = self.shape()[rank_diff + i];
            if current != target_dim {
                if target_dim != 1 {
                    return Err(TreexError::Internal(format!(
                        "Cannot reduce shape {:?} to {:?}: incompatible dim {}",
                        self.shape(),
                        target_shape,
                        i
                    )));
                }
                axes.push(rank_diff + i);
            }
        }
        let summed = super::kernels::sum_axes(self, &axes, false);
        Ok(Tensor::from_parts(summed.to_vec(), target_shape.to_vec()))
    }
}
