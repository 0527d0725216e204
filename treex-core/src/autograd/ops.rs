//! Differentiable tensor operations.
//!
//! Each operation computes its value with the raw kernels and, if any operand
//! is traced, records a [`BackwardOp`] on that operand's tape.

use super::backward_op::BackwardOp;
use super::tape::Tape;
use crate::error::{Result, TreexError};
use crate::tensor::broadcast_utils::broadcast_zip;
use crate::tensor::kernels::{self, ConvGeometry, Padding};
use crate::tensor::{zeros, Tensor};
use std::sync::Arc;

/// Attaches `op` to `output` when at least one input is traced.
fn record<Op: BackwardOp + 'static>(
    output: Tensor,
    inputs: &[&Tensor],
    operation: &str,
    make_op: impl FnOnce() -> Op,
) -> Result<Tensor> {
    let mut tape: Option<Arc<Tape>> = None;
    let mut ids = Vec::with_capacity(inputs.len());
    for input in inputs {
        match input.live_trace() {
            Some((t, id)) => {
                match &tape {
                    Some(existing) if !Arc::ptr_eq(existing, &t) => {
                        return Err(TreexError::TapeMismatch {
                            operation: operation.to_string(),
                        })
                    }
                    Some(_) => {}
                    None => tape = Some(t),
                }
                ids.push(Some(id));
            }
            None => ids.push(None),
        }
    }
    match tape {
        None => Ok(output),
        Some(tape) => {
            let trace = tape.record(ids, Arc::new(make_op()));
            Ok(output.with_trace(trace))
        }
    }
}

// --- Backward operations ---

#[derive(Debug)]
struct AddBackward {
    a_shape: Vec<usize>,
    b_shape: Vec<usize>,
    b_sign: f32,
}

impl BackwardOp for AddBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Tensor>> {
        let ga = grad_output.reduce_to_shape(&self.a_shape)?;
        let gb = grad_output.reduce_to_shape(&self.b_shape)?;
        let gb = if self.b_sign < 0.0 { gb.neg()? } else { gb };
        Ok(vec![ga, gb])
    }
}

#[derive(Debug)]
struct MulBackward {
    a: Tensor,
    b: Tensor,
}

impl BackwardOp for MulBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Tensor>> {
        let ga = grad_output.mul(&self.b)?.reduce_to_shape(self.a.shape())?;
        let gb = grad_output.mul(&self.a)?.reduce_to_shape(self.b.shape())?;
        Ok(vec![ga, gb])
    }
}

#[derive(Debug)]
struct DivBackward {
    a: Tensor,
    b: Tensor,
}

impl BackwardOp for DivBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Tensor>> {
        let ga = grad_output.div(&self.b)?.reduce_to_shape(self.a.shape())?;
        // d(a/b)/db = -a / b^2
        let b_sq = self.b.square()?;
        let gb = grad_output
            .mul(&self.a)?
            .div(&b_sq)?
            .neg()?
            .reduce_to_shape(self.b.shape())?;
        Ok(vec![ga, gb])
    }
}

/// Element-wise op whose local derivative was computed during the forward pass.
#[derive(Debug)]
struct ElementwiseBackward {
    local_grad: Tensor,
}

impl BackwardOp for ElementwiseBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Tensor>> {
        Ok(vec![grad_output.mul(&self.local_grad)?])
    }
}

#[derive(Debug)]
struct ScaleBackward {
    factor: f32,
}

impl BackwardOp for ScaleBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Tensor>> {
        Ok(vec![grad_output.mul_scalar(self.factor)?])
    }
}

#[derive(Debug)]
struct MatmulBackward {
    a: Tensor,
    b: Tensor,
}

impl BackwardOp for MatmulBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Tensor>> {
        let ga = kernels::matmul(grad_output, &kernels::transpose2d(&self.b));
        let gb = kernels::matmul(&kernels::transpose2d(&self.a), grad_output);
        Ok(vec![ga, gb])
    }
}

#[derive(Debug)]
struct ReshapeBackward {
    input_shape: Vec<usize>,
}

impl BackwardOp for ReshapeBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Tensor>> {
        Ok(vec![grad_output.reshape(&self.input_shape)?])
    }
}

#[derive(Debug)]
struct SumAxesBackward {
    input_shape: Vec<usize>,
    axes: Vec<usize>,
}

impl BackwardOp for SumAxesBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Tensor>> {
        let mut kept = self.input_shape.clone();
        for &a in &self.axes {
            kept[a] = 1;
        }
        let grad = grad_output.reshape(&kept)?;
        let expanded = broadcast_zip(&grad, &zeros(&self.input_shape), |g, _| g)?;
        Ok(vec![expanded])
    }
}

#[derive(Debug)]
struct LogSoftmaxBackward {
    softmax: Tensor,
}

impl BackwardOp for LogSoftmaxBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Tensor>> {
        // dx = g - softmax * sum(g, last axis)
        let last = grad_output.rank().saturating_sub(1);
        let g_sum = kernels::sum_axes(grad_output, &[last], true);
        let correction = self.softmax.mul(&g_sum)?;
        Ok(vec![grad_output.sub(&correction)?])
    }
}

#[derive(Debug)]
struct Conv2dBackward {
    x: Tensor,
    w: Tensor,
    geometry: ConvGeometry,
}

impl BackwardOp for Conv2dBackward {
    fn backward(&self, grad_output: &Tensor) -> Result<Vec<Tensor>> {
        let (gx, gw) = kernels::conv2d_backward(&self.x, &self.w, grad_output, &self.geometry);
        Ok(vec![gx, gw])
    }
}

// --- Tensor methods ---

impl Tensor {
    /// Element-wise addition with broadcasting.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        let out = broadcast_zip(self, other, |a, b| a + b)?;
        record(out, &[self, other], "add", || AddBackward {
            a_shape: self.shape().to_vec(),
            b_shape: other.shape().to_vec(),
            b_sign: 1.0,
        })
    }

    /// Element-wise subtraction with broadcasting.
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        let out = broadcast_zip(self, other, |a, b| a - b)?;
        record(out, &[self, other], "sub", || AddBackward {
            a_shape: self.shape().to_vec(),
            b_shape: other.shape().to_vec(),
            b_sign: -1.0,
        })
    }

    /// Element-wise multiplication with broadcasting.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        let out = broadcast_zip(self, other, |a, b| a * b)?;
        record(out, &[self, other], "mul", || MulBackward {
            a: self.detach(),
            b: other.detach(),
        })
    }

    /// Element-wise division with broadcasting.
    pub fn div(&self, other: &Tensor) -> Result<Tensor> {
        let out = broadcast_zip(self, other, |a, b| a / b)?;
        record(out, &[self, other], "div", || DivBackward {
            a: self.detach(),
            b: other.detach(),
        })
    }

    pub fn add_scalar(&self, value: f32) -> Result<Tensor> {
        let out = self.map_values(|v| v + value);
        record(out, &[self], "add_scalar", || ScaleBackward { factor: 1.0 })
    }

    pub fn mul_scalar(&self, factor: f32) -> Result<Tensor> {
        let out = self.map_values(|v| v * factor);
        record(out, &[self], "mul_scalar", || ScaleBackward { factor })
    }

    pub fn neg(&self) -> Result<Tensor> {
        self.mul_scalar(-1.0)
    }

    /// Matrix product of two rank-2 tensors.
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        if self.rank() != 2 || other.rank() != 2 || self.shape()[1] != other.shape()[0] {
            return Err(TreexError::shape("", self.shape(), other.shape(), "matmul"));
        }
        let out = kernels::matmul(self, other);
        record(out, &[self, other], "matmul", || MatmulBackward {
            a: self.detach(),
            b: other.detach(),
        })
    }

    /// Returns a tensor with the same values and a new shape.
    pub fn reshape(&self, shape: &[usize]) -> Result<Tensor> {
        let n: usize = shape.iter().product();
        if n != self.numel() {
            return Err(TreexError::shape("", shape, self.shape(), "reshape"));
        }
        let out = Tensor::from_parts(self.to_vec(), shape.to_vec());
        record(out, &[self], "reshape", || ReshapeBackward {
            input_shape: self.shape().to_vec(),
        })
    }

    /// Sums over `axes`.
    pub fn sum_axes(&self, axes: &[usize], keep_dims: bool) -> Result<Tensor> {
        if let Some(&bad) = axes.iter().find(|&&a| a >= self.rank()) {
            return Err(TreexError::shape("", self.shape(), bad, "sum_axes"));
        }
        let out = kernels::sum_axes(self, axes, keep_dims);
        record(out, &[self], "sum_axes", || SumAxesBackward {
            input_shape: self.shape().to_vec(),
            axes: axes.to_vec(),
        })
    }

    /// Averages over `axes`.
    pub fn mean_axes(&self, axes: &[usize], keep_dims: bool) -> Result<Tensor> {
        let count: usize = axes
            .iter()
            .filter_map(|&a| self.shape().get(a))
            .product();
        self.sum_axes(axes, keep_dims)?
            .mul_scalar(1.0 / count.max(1) as f32)
    }

    /// Sum of all elements as a rank-0 tensor.
    pub fn sum(&self) -> Result<Tensor> {
        let axes: Vec<usize> = (0..self.rank()).collect();
        self.sum_axes(&axes, false)
    }

    /// Mean of all elements as a rank-0 tensor.
    pub fn mean(&self) -> Result<Tensor> {
        let axes: Vec<usize> = (0..self.rank()).collect();
        self.mean_axes(&axes, false)
    }

    pub fn relu(&self) -> Result<Tensor> {
        self.unary("relu", |x| x.max(0.0), |x, _| if x > 0.0 { 1.0 } else { 0.0 })
    }

    pub fn sigmoid(&self) -> Result<Tensor> {
        self.unary("sigmoid", |x| 1.0 / (1.0 + (-x).exp()), |_, y| y * (1.0 - y))
    }

    pub fn tanh(&self) -> Result<Tensor> {
        self.unary("tanh", f32::tanh, |_, y| 1.0 - y * y)
    }

    pub fn exp(&self) -> Result<Tensor> {
        self.unary("exp", f32::exp, |_, y| y)
    }

    pub fn log(&self) -> Result<Tensor> {
        self.unary("log", f32::ln, |x, _| 1.0 / x)
    }

    pub fn sqrt(&self) -> Result<Tensor> {
        self.unary("sqrt", f32::sqrt, |_, y| 0.5 / y)
    }

    pub fn square(&self) -> Result<Tensor> {
        self.unary("square", |x| x * x, |x, _| 2.0 * x)
    }

    /// Log-softmax over the last axis.
    pub fn log_softmax(&self) -> Result<Tensor> {
        let out = kernels::log_softmax_last(self);
        record(out.clone(), &[self], "log_softmax", || LogSoftmaxBackward {
            softmax: out.map_values(f32::exp),
        })
    }

    /// 2-D convolution of an NHWC input with an HWIO kernel.
    pub fn conv2d(&self, kernel: &Tensor, strides: [usize; 2], padding: Padding) -> Result<Tensor> {
        if self.rank() != 4 || kernel.rank() != 4 {
            return Err(TreexError::shape("", "rank 4 input and kernel", (self.shape(), kernel.shape()), "conv2d"));
        }
        if self.shape()[3] != kernel.shape()[2] {
            return Err(TreexError::shape("", kernel.shape()[2], self.shape()[3], "conv2d input channels"));
        }
        if strides.contains(&0) {
            return Err(TreexError::InvalidConfig("conv2d strides must be positive".to_string()));
        }
        let geometry = ConvGeometry::new(self.shape(), kernel.shape(), strides, padding);
        let out = kernels::conv2d(self, kernel, &geometry);
        record(out, &[self, kernel], "conv2d", || Conv2dBackward {
            x: self.detach(),
            w: kernel.detach(),
            geometry,
        })
    }

    /// Index of the largest value along the last axis. Not differentiable.
    pub fn argmax(&self) -> Tensor {
        kernels::argmax_last(self)
    }

    /// Applies `f` to every value without recording anything.
    pub fn map_values(&self, f: impl Fn(f32) -> f32) -> Tensor {
        let data = self.data().iter().map(|&v| f(v)).collect();
        Tensor::from_parts(data, self.shape().to_vec())
    }

    fn unary(
        &self,
        operation: &str,
        f: impl Fn(f32) -> f32,
        local: impl Fn(f32, f32) -> f32,
    ) -> Result<Tensor> {
        let out = self.map_values(f);
        record(out.clone(), &[self], operation, || {
            let data = self
                .data()
                .iter()
                .zip(out.data())
                .map(|(&x, &y)| local(x, y))
                .collect();
            ElementwiseBackward {
                local_grad: Tensor::from_parts(data, self.shape().to_vec()),
            }
        })
    }
}
