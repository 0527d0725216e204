use treex_core::tree::{self, Tree};
use treex_core::{Result, Tensor, TreexError};

/// Array stored at `path`, if the slot exists and is present.
#[allow(dead_code)]
pub fn array_at<T: Tree>(tree: &T, path: &str) -> Result<Tensor> {
    tree::flatten(tree)
        .into_iter()
        .find(|(p, _)| p.as_str() == path)
        .and_then(|(_, leaf)| leaf.array().cloned())
        .ok_or_else(|| TreexError::missing(path, "no array at this path"))
}

/// Replaces the arrays at the given paths, keeping every other leaf.
#[allow(dead_code)]
pub fn with_arrays<T: Tree>(tree: &T, values: &[(&str, Tensor)]) -> Result<T> {
    tree::map_arrays(tree, |path, t| {
        Ok(values
            .iter()
            .find(|(p, _)| *p == path.as_str())
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| t.clone()))
    })
}

#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
