//! Raw numeric kernels. Inputs and outputs are plain, untraced tensors; the
//! differentiable wrappers in `autograd::ops` decide what to record.

use super::broadcast_utils::contiguous_strides;
use super::Tensor;

/// Spatial padding mode of a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Padding {
    /// Output spatial size is `ceil(input / stride)`.
    #[default]
    Same,
    /// No padding; only full windows are used.
    Valid,
}

/// Output size and leading padding of one convolved spatial axis.
pub(crate) fn conv_axis(input: usize, kernel: usize, stride: usize, padding: Padding) -> (usize, usize) {
    match padding {
        Padding::Valid => {
            if input < kernel {
                (0, 0)
            } else {
                ((input - kernel) / stride + 1, 0)
            }
        }
        Padding::Same => {
            let out = input.div_ceil(stride);
            if out == 0 {
                return (0, 0);
            }
            let total = ((out - 1) * stride + kernel).saturating_sub(input);
            (out, total / 2)
        }
    }
}

pub(crate) fn sum_axes(t: &Tensor, axes: &[usize], keep_dims: bool) -> Tensor {
    let shape = t.shape();
    let mut reduced_shape: Vec<usize> = shape.to_vec();
    for &a in axes {
        reduced_shape[a] = 1;
    }
    let out_strides = contiguous_strides(&reduced_shape);
    let n_out: usize = reduced_shape.iter().product();
    let mut out = vec![0.0f32; n_out];
    let mut index = vec![0usize; shape.len()];
    for &v in t.data() {
        let mut offset = 0;
        for axis in 0..shape.len() {
            if reduced_shape[axis] != 1 {
                offset += index[axis] * out_strides[axis];
            }
        }
        out[offset] += v;
        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    let final_shape = if keep_dims {
        reduced_shape
    } else {
        shape
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &d)| d)
            .collect()
    };
    Tensor::from_parts(out, final_shape)
}

/// `[m, k] x [k, n] -> [m, n]`.
pub(crate) fn matmul(a: &Tensor, b: &Tensor) -> Tensor {
    let (m, k) = (a.shape()[0], a.shape()[1]);
    let n = b.shape()[1];
    let (ad, bd) = (a.data(), b.data());
    let mut out = vec![0.0f32; m * n];
    for i in 0..m {
        for p in 0..k {
            let av = ad[i * k + p];
            if av == 0.0 {
                continue;
            }
            let row = &bd[p * n..(p + 1) * n];
            for (o, &bv) in out[i * n..(i + 1) * n].iter_mut().zip(row) {
                *o += av * bv;
            }
        }
    }
    Tensor::from_parts(out, vec![m, n])
}

pub(crate) fn transpose2d(a: &Tensor) -> Tensor {
    let (m, n) = (a.shape()[0], a.shape()[1]);
    let d = a.data();
    let mut out = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            out[j * m + i] = d[i * n + j];
        }
    }
    Tensor::from_parts(out, vec![n, m])
}

/// Geometry of an NHWC convolution with an HWIO kernel.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConvGeometry {
    pub batch: usize,
    pub in_hw: [usize; 2],
    pub in_channels: usize,
    pub kernel_hw: [usize; 2],
    pub out_channels: usize,
    pub stride: [usize; 2],
    pub pad: [usize; 2],
    pub out_hw: [usize; 2],
}

impl ConvGeometry {
    pub fn new(x_shape: &[usize], w_shape: &[usize], stride: [usize; 2], padding: Padding) -> Self {
        let (oh, ph) = conv_axis(x_shape[1], w_shape[0], stride[0], padding);
        let (ow, pw) = conv_axis(x_shape[2], w_shape[1], stride[1], padding);
        ConvGeometry {
            batch: x_shape[0],
            in_hw: [x_shape[1], x_shape[2]],
            in_channels: x_shape[3],
            kernel_hw: [w_shape[0], w_shape[1]],
            out_channels: w_shape[3],
            stride,
            pad: [ph, pw],
            out_hw: [oh, ow],
        }
    }

    pub fn output_shape(&self) -> Vec<usize> {
        vec![self.batch, self.out_hw[0], self.out_hw[1], self.out_channels]
    }

    /// Visits every (output position, kernel tap) pair that lands inside the input.
    /// The callback receives `(x_offset, w_offset, y_offset)` of the first
    /// channel; channel strides are `1` for x/y and `out_channels` for w rows.
    fn for_each_tap(&self, mut f: impl FnMut(usize, usize, usize)) {
        let [h, w] = self.in_hw;
        let c = self.in_channels;
        let o = self.out_channels;
        for n in 0..self.batch {
            for oy in 0..self.out_hw[0] {
                for ox in 0..self.out_hw[1] {
                    let y_off = ((n * self.out_hw[0] + oy) * self.out_hw[1] + ox) * o;
                    for ky in 0..self.kernel_hw[0] {
                        let iy = (oy * self.stride[0] + ky) as isize - self.pad[0] as isize;
                        if iy < 0 || iy as usize >= h {
                            continue;
                        }
                        for kx in 0..self.kernel_hw[1] {
                            let ix = (ox * self.stride[1] + kx) as isize - self.pad[1] as isize;
                            if ix < 0 || ix as usize >= w {
                                continue;
                            }
                            let x_off = ((n * h + iy as usize) * w + ix as usize) * c;
                            let w_off = (ky * self.kernel_hw[1] + kx) * c * o;
                            f(x_off, w_off, y_off);
                        }
                    }
                }
            }
        }
    }
}

pub(crate) fn conv2d(x: &Tensor, w: &Tensor, g: &ConvGeometry) -> Tensor {
    let (c, o) = (g.in_channels, g.out_channels);
    let (xd, wd) = (x.data(), w.data());
    let out_shape = g.output_shape();
    let mut out = vec![0.0f32; out_shape.iter().product()];
    g.for_each_tap(|x_off, w_off, y_off| {
        for ci in 0..c {
            let xv = xd[x_off + ci];
            let w_row = &wd[w_off + ci * o..w_off + (ci + 1) * o];
            for (yv, &wv) in out[y_off..y_off + o].iter_mut().zip(w_row) {
                *yv += xv * wv;
            }
        }
    });
    Tensor::from_parts(out, out_shape)
}

/// Returns `(grad_x, grad_w)` of a convolution given the output gradient.
pub(crate) fn conv2d_backward(
    x: &Tensor,
    w: &Tensor,
    grad_y: &Tensor,
    g: &ConvGeometry,
) -> (Tensor, Tensor) {
    let (c, o) = (g.in_channels, g.out_channels);
    let (xd, wd, gd) = (x.data(), w.data(), grad_y.data());
    let mut gx = vec![0.0f32; x.numel()];
    let mut gw = vec![0.0f32; w.numel()];
    g.for_each_tap(|x_off, w_off, y_off| {
        let gy = &gd[y_off..y_off + o];
        for ci in 0..c {
            let row = w_off + ci * o;
            let mut acc = 0.0;
            for oi in 0..o {
                acc += gy[oi] * wd[row + oi];
                gw[row + oi] += gy[oi] * xd[x_off + ci];
            }
            gx[x_off + ci] += acc;
        }
    });
    (
        Tensor::from_parts(gx, x.shape().to_vec()),
        Tensor::from_parts(gw, w.shape().to_vec()),
    )
}

/// Numerically stable log-softmax over the last axis.
pub(crate) fn log_softmax_last(t: &Tensor) -> Tensor {
    let classes = t.shape().last().copied().unwrap_or(1);
    let mut out = Vec::with_capacity(t.numel());
    for row in t.data().chunks(classes.max(1)) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let lse = max + row.iter().map(|v| (v - max).exp()).sum::<f32>().ln();
        out.extend(row.iter().map(|v| v - lse));
    }
    Tensor::from_parts(out, t.shape().to_vec())
}

/// Index of the maximum along the last axis, as `f32`.
pub(crate) fn argmax_last(t: &Tensor) -> Tensor {
    let classes = t.shape().last().copied().unwrap_or(1).max(1);
    let data: Vec<f32> = t
        .data()
        .chunks(classes)
        .map(|row| {
            let mut best = 0;
            for (i, &v) in row.iter().enumerate() {
                if v > row[best] {
                    best = i;
                }
            }
            best as f32
        })
        .collect();
    let shape = if t.rank() == 0 {
        Vec::new()
    } else {
        t.shape()[..t.rank() - 1].to_vec()
    };
    Tensor::from_parts(data, shape)
}
