use crate::error::{Result, TreexError};
use crate::key_seq::{Key, KeySeq};
use crate::tree::KeyPath;
use std::fmt;

/// Per-call state threaded through `initialize` and `forward`.
///
/// Carries the key stream available to stochastic layers and the path of the
/// module currently running, so errors can name the offending sub-module.
#[derive(Debug, Clone)]
pub struct Context {
    keys: Option<KeySeq>,
    path: KeyPath,
}

impl Context {
    pub fn new(keys: Option<KeySeq>) -> Self {
        Context {
            keys,
            path: KeyPath::root(),
        }
    }

    /// A context with no randomness available.
    pub fn without_keys() -> Self {
        Context::new(None)
    }

    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    pub fn has_keys(&self) -> bool {
        self.keys.is_some()
    }

    /// Draws the next key for the current module.
    ///
    /// # Errors
    /// [`TreexError::MissingState`] if the call was made without a key.
    pub fn next_key(&mut self, purpose: &str) -> Result<Key> {
        match self.keys.as_mut() {
            Some(keys) => keys.next(),
            None => Err(TreexError::missing(
                self.path.to_string(),
                format!("{} needs a random key but none was supplied", purpose),
            )),
        }
    }

    /// Runs `f` with the path extended by `name`. Errors raised inside
    /// without a path are reported at the scope's path.
    pub fn scoped<R>(&mut self, name: impl fmt::Display, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let parent = std::mem::replace(&mut self.path, KeyPath::root());
        self.path = parent.child(name);
        let result = f(self).map_err(|e| e.at_path(&self.path));
        self.path = parent;
        result
    }
}
