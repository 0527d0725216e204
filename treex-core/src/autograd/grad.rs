use super::tape::Tape;
use crate::error::{Result, TreexError};
use crate::tensor::{zeros_like, Tensor};
use crate::tree::{self, Tree};

/// Evaluates `f(params)` and differentiates its scalar output with respect to
/// every present array leaf of `params`.
///
/// `f` returns the scalar to differentiate together with an auxiliary value
/// (typically the updated module and metric state). Leaves of `params` that
/// are absent stay absent in the returned gradient tree; present leaves that
/// do not influence the output get a zero gradient.
///
/// # Returns
/// `(value, aux, grads)`, where `grads` has the same treedef as `params`.
///
/// # Errors
/// * [`TreexError::ShapeMismatch`] if `f` returns a non-scalar value.
/// * Any error raised by `f`.
pub fn value_and_grad<P, A, F>(params: &P, f: F) -> Result<(Tensor, A, P)>
where
    P: Tree,
    F: FnOnce(&P) -> Result<(Tensor, A)>,
{
    let tape = Tape::new();
    let traced = tree::map_arrays(params, |_, t| Ok(tape.watch(t)))?;

    let (value, aux) = f(&traced)?;
    if value.numel() != 1 {
        return Err(TreexError::shape("", "a scalar", value.shape(), "value_and_grad"));
    }

    let grads = if value.is_traced() {
        Some(tape.gradients(&value)?)
    } else {
        log::debug!("value_and_grad: output does not depend on any parameter");
        None
    };
    let grad_tree = tree::map_arrays(&traced, |_, t| {
        let g = grads.as_ref().and_then(|g| g.get(t));
        Ok(g.map(Tensor::detach).unwrap_or_else(|| zeros_like(t)))
    })?;
    log::trace!("value_and_grad recorded {} tape nodes", tape.len());
    Ok((value.detach(), aux, grad_tree))
}

/// Like [`value_and_grad`] but returns only `(grads, aux)`.
pub fn grad<P, A, F>(params: &P, f: F) -> Result<(P, A)>
where
    P: Tree,
    F: FnOnce(&P) -> Result<(Tensor, A)>,
{
    let (_, aux, grads) = value_and_grad(params, f)?;
    Ok((grads, aux))
}
