//! Deterministic, splittable pseudo-random keys.

use crate::error::{Result, TreexError};
use crate::tree::{KeyPath, Leaf, Leaves, Tree};
use crate::types::LeafKind;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

/// A pseudo-random key.
///
/// Keys are plain values: deriving new keys never changes the key they were
/// derived from, and the same key always derives the same children.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key(u64);

impl Key {
    pub fn new(seed: u64) -> Self {
        Key(seed)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Derives `n` independent child keys.
    pub fn split(&self, n: usize) -> Vec<Key> {
        let mut rng = self.rng();
        (0..n).map(|_| Key(rng.gen())).collect()
    }

    /// A random generator seeded by this key, for sampling values.
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.0)
    }
}

impl From<u64> for Key {
    fn from(seed: u64) -> Self {
        Key(seed)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:#018x})", self.0)
    }
}

/// A stream of keys that advances every time a key is drawn.
///
/// Drawing splits the current key into a successor and the issued key(s), so
/// no issued key is ever handed out twice, while a `KeySeq` rebuilt from the
/// same seed replays the same sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySeq {
    key: Leaf,
}

impl KeySeq {
    pub fn new(key: impl Into<Key>) -> Self {
        KeySeq {
            key: Leaf::new(LeafKind::Rng, key.into()),
        }
    }

    /// The current (not yet consumed) key, if present.
    pub fn current(&self) -> Option<Key> {
        self.key.key()
    }

    /// Draws one key and advances the stream.
    ///
    /// # Errors
    /// [`TreexError::MissingState`] if the key slot is absent.
    pub fn next(&mut self) -> Result<Key> {
        Ok(self.split(1)?[0])
    }

    /// Draws `n` keys and advances the stream once.
    ///
    /// # Errors
    /// [`TreexError::MissingState`] if the key slot is absent.
    pub fn split(&mut self, n: usize) -> Result<Vec<Key>> {
        let current = self.require_current()?;
        let mut derived = current.split(n + 1);
        let successor = derived.remove(0);
        self.key = self.key.with_value(Some(successor.into()));
        Ok(derived)
    }

    fn require_current(&self) -> Result<Key> {
        self.current()
            .ok_or_else(|| TreexError::missing("key", "the key sequence was filtered out or never seeded"))
    }
}

impl Tree for KeySeq {
    fn flatten_into(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>) {
        self.key.flatten_into(&prefix.child("key"), out);
    }

    fn unflatten_from(&self, leaves: &mut Leaves) -> Result<Self> {
        Ok(KeySeq {
            key: self.key.unflatten_from(leaves)?,
        })
    }
}

#[cfg(test)]
#[path = "key_seq_test.rs"]
mod tests;
