use super::{KeyPath, Leaves, Tree};
use crate::error::{Result, TreexError};
use crate::key_seq::Key;
use crate::tensor::Tensor;
use crate::types::LeafKind;

/// The value stored in a leaf slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Array(Tensor),
    Key(Key),
}

impl Value {
    /// Shape of the value; keys are rank-0.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Value::Array(t) => t.shape().to_vec(),
            Value::Key(_) => Vec::new(),
        }
    }
}

impl From<Tensor> for Value {
    fn from(t: Tensor) -> Self {
        Value::Array(t)
    }
}

impl From<Key> for Value {
    fn from(k: Key) -> Self {
        Value::Key(k)
    }
}

/// A typed slot in a tree: a [`LeafKind`] plus an optional value.
///
/// `None` is the explicit absent placeholder. It appears before
/// initialization and in filtered projections, and it keeps the slot (and
/// therefore the treedef) in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    kind: LeafKind,
    value: Option<Value>,
}

impl Leaf {
    pub fn new(kind: LeafKind, value: impl Into<Value>) -> Self {
        Leaf {
            kind,
            value: Some(value.into()),
        }
    }

    /// An absent slot of the given kind.
    pub fn empty(kind: LeafKind) -> Self {
        Leaf { kind, value: None }
    }

    pub fn parameter(t: Tensor) -> Self {
        Leaf::new(LeafKind::Parameter, t)
    }

    pub fn batch_stat(t: Tensor) -> Self {
        Leaf::new(LeafKind::BatchStat, t)
    }

    pub fn kind(&self) -> LeafKind {
        self.kind
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    pub fn array(&self) -> Option<&Tensor> {
        match &self.value {
            Some(Value::Array(t)) => Some(t),
            _ => None,
        }
    }

    pub fn key(&self) -> Option<Key> {
        match &self.value {
            Some(Value::Key(k)) => Some(*k),
            _ => None,
        }
    }

    /// Same kind, new value.
    pub fn with_value(&self, value: Option<Value>) -> Leaf {
        Leaf {
            kind: self.kind,
            value,
        }
    }

    /// Same kind, new array value.
    pub fn with_array(&self, t: Tensor) -> Leaf {
        self.with_value(Some(Value::Array(t)))
    }

    /// Returns the array value or a [`TreexError::MissingState`] naming `path`.
    pub fn require_array(&self, path: &str) -> Result<&Tensor> {
        match &self.value {
            Some(Value::Array(t)) => Ok(t),
            Some(Value::Key(_)) => Err(TreexError::structure(path, "an array", "a key")),
            None => Err(TreexError::missing(
                path,
                format!("{} leaf has no value (module not initialized?)", self.kind),
            )),
        }
    }
}

impl Tree for Leaf {
    fn flatten_into(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>) {
        out.push((prefix.clone(), self.clone()));
    }

    fn unflatten_from(&self, leaves: &mut Leaves) -> Result<Self> {
        leaves.take(self)
    }
}
