//! Container-tree adapter.
//!
//! Any structured value that implements [`Tree`] can be flattened into an
//! ordered list of `(path, leaf)` pairs and rebuilt from a list of leaves.
//! The static part of the value (hyperparameters, mode flags, the shape of
//! the structure) stays in the template it is rebuilt from; only leaf values
//! travel through the flat list. Everything that needs to walk a tree
//! (filtering, merging, gradients, optimizer updates, retrace detection) is
//! written once against this trait.

mod leaf;
pub mod retrace;

pub use leaf::{Leaf, Value};
pub use retrace::RetraceDetector;

use crate::error::{Result, TreexError};
use crate::tensor::Tensor;
use crate::types::{Filter, LeafKind};
use std::fmt;

/// Slash-separated name of a slot inside a tree, e.g. `layers/0/kernel`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPath(String);

impl KeyPath {
    pub fn root() -> Self {
        KeyPath(String::new())
    }

    /// Path of a named child of this node.
    pub fn child(&self, name: impl fmt::Display) -> KeyPath {
        if self.0.is_empty() {
            KeyPath(name.to_string())
        } else {
            KeyPath(format!("{}/{}", self.0, name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// A value that can be flattened into leaves and rebuilt from them.
///
/// Implementations must visit their leaves in the same fixed order in both
/// methods, and `unflatten_from` must consume exactly the leaves that
/// `flatten_into` produced.
pub trait Tree {
    /// Appends this node's leaves, depth-first, with their full paths.
    fn flatten_into(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>);

    /// Rebuilds a value with this value's static structure and the next
    /// leaves from `leaves`.
    fn unflatten_from(&self, leaves: &mut Leaves) -> Result<Self>
    where
        Self: Sized;
}

/// Cursor over the leaves handed to [`Tree::unflatten_from`].
#[derive(Debug)]
pub struct Leaves {
    items: std::vec::IntoIter<Leaf>,
    paths: Vec<KeyPath>,
    position: usize,
}

impl Leaves {
    fn new(items: Vec<Leaf>, paths: Vec<KeyPath>) -> Self {
        Leaves {
            items: items.into_iter(),
            paths,
            position: 0,
        }
    }

    /// Takes the leaf for `slot`, checking that its kind matches.
    pub fn take(&mut self, slot: &Leaf) -> Result<Leaf> {
        let path = self.current_path();
        let leaf = self.items.next().ok_or_else(|| {
            TreexError::structure(path.to_string(), "a leaf", "end of leaves")
        })?;
        self.position += 1;
        if leaf.kind() != slot.kind() {
            return Err(TreexError::structure(
                path.to_string(),
                slot.kind().to_string(),
                leaf.kind().to_string(),
            ));
        }
        Ok(leaf)
    }

    fn current_path(&self) -> KeyPath {
        self.paths.get(self.position).cloned().unwrap_or_default()
    }

    fn remaining(&self) -> usize {
        self.items.len()
    }
}

/// The structural shape of a tree: its leaf paths and kinds, in order.
///
/// Two values with equal treedefs can be merged, zipped and fed to the same
/// compiled step without retracing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TreeDef {
    entries: Vec<(KeyPath, LeafKind)>,
}

impl TreeDef {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(KeyPath, LeafKind)] {
        &self.entries
    }

    pub fn paths(&self) -> impl Iterator<Item = &KeyPath> {
        self.entries.iter().map(|(p, _)| p)
    }

    /// Checks that `other` has the same structure, naming the first
    /// differing slot otherwise.
    pub fn check_same(&self, other: &TreeDef) -> Result<()> {
        for (mine, theirs) in self.entries.iter().zip(&other.entries) {
            if mine != theirs {
                return Err(TreexError::structure(
                    mine.0.to_string(),
                    format!("{} '{}'", mine.1, mine.0),
                    format!("{} '{}'", theirs.1, theirs.0),
                ));
            }
        }
        if self.entries.len() != other.entries.len() {
            let path = self
                .entries
                .get(other.entries.len())
                .or_else(|| other.entries.get(self.entries.len()))
                .map(|(p, _)| p.to_string())
                .unwrap_or_default();
            return Err(TreexError::structure(
                path,
                format!("{} leaves", self.entries.len()),
                format!("{} leaves", other.entries.len()),
            ));
        }
        Ok(())
    }
}

/// Treedef plus the presence and shape of every leaf.
///
/// This is what a tracing compiler keys its cache on: any change here means a
/// step function would have to be traced again.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    treedef: TreeDef,
    slots: Vec<Option<Vec<usize>>>,
}

impl Signature {
    pub fn treedef(&self) -> &TreeDef {
        &self.treedef
    }

    /// First slot whose presence or shape differs from `other`, if any.
    pub fn first_difference(&self, other: &Signature) -> Option<String> {
        if let Err(e) = self.treedef.check_same(&other.treedef) {
            return Some(e.to_string());
        }
        self.slots
            .iter()
            .zip(&other.slots)
            .zip(self.treedef.paths())
            .find(|((a, b), _)| a != b)
            .map(|((a, b), path)| format!("'{}' changed from {:?} to {:?}", path, a, b))
    }
}

// --- Generic tree functions ---

/// Flattens `tree` into `(path, leaf)` pairs.
pub fn flatten<T: Tree + ?Sized>(tree: &T) -> Vec<(KeyPath, Leaf)> {
    let mut out = Vec::new();
    tree.flatten_into(&KeyPath::root(), &mut out);
    out
}

/// Flattens `tree` and returns only the leaves.
pub fn leaves<T: Tree + ?Sized>(tree: &T) -> Vec<Leaf> {
    flatten(tree).into_iter().map(|(_, leaf)| leaf).collect()
}

pub fn treedef<T: Tree + ?Sized>(tree: &T) -> TreeDef {
    TreeDef {
        entries: flatten(tree)
            .into_iter()
            .map(|(path, leaf)| (path, leaf.kind()))
            .collect(),
    }
}

pub fn signature<T: Tree + ?Sized>(tree: &T) -> Signature {
    let flat = flatten(tree);
    let slots = flat
        .iter()
        .map(|(_, leaf)| leaf.value().map(Value::shape))
        .collect();
    let entries = flat.into_iter().map(|(p, leaf)| (p, leaf.kind())).collect();
    Signature {
        treedef: TreeDef { entries },
        slots,
    }
}

/// Rebuilds a value shaped like `template` from `leaves`.
///
/// # Errors
/// [`TreexError::StructureMismatch`] if the number of leaves or any leaf
/// kind does not match the template.
pub fn unflatten<T: Tree>(template: &T, leaves: Vec<Leaf>) -> Result<T> {
    let paths: Vec<KeyPath> = flatten(template).into_iter().map(|(p, _)| p).collect();
    if paths.len() != leaves.len() {
        return Err(TreexError::structure(
            "",
            format!("{} leaves", paths.len()),
            format!("{} leaves", leaves.len()),
        ));
    }
    let mut cursor = Leaves::new(leaves, paths);
    let rebuilt = template.unflatten_from(&mut cursor)?;
    if cursor.remaining() != 0 {
        return Err(TreexError::Internal(format!(
            "{} leaves left over after unflatten",
            cursor.remaining()
        )));
    }
    Ok(rebuilt)
}

/// Rebuilds `tree` with every leaf replaced by `f(path, leaf)`.
pub fn map_leaves<T: Tree>(
    tree: &T,
    mut f: impl FnMut(&KeyPath, &Leaf) -> Result<Leaf>,
) -> Result<T> {
    let mapped = flatten(tree)
        .iter()
        .map(|(path, leaf)| f(path, leaf))
        .collect::<Result<Vec<_>>>()?;
    unflatten(tree, mapped)
}

/// Rebuilds `tree` with `f` applied to every present array value.
pub fn map_arrays<T: Tree>(
    tree: &T,
    mut f: impl FnMut(&KeyPath, &Tensor) -> Result<Tensor>,
) -> Result<T> {
    map_leaves(tree, |path, leaf| match leaf.array() {
        Some(t) => Ok(leaf.with_value(Some(Value::Array(f(path, t)?)))),
        None => Ok(leaf.clone()),
    })
}

/// Keeps the values of leaves whose kind is in `filter`; every other slot
/// becomes the absent placeholder. The treedef is unchanged.
pub fn filter<T: Tree>(tree: &T, filter: impl Into<Filter>) -> Result<T> {
    let filter = filter.into();
    map_leaves(tree, |_, leaf| {
        if filter.contains(leaf.kind()) {
            Ok(leaf.clone())
        } else {
            Ok(leaf.with_value(None))
        }
    })
}

/// For every slot takes `other`'s value when present, else `base`'s.
///
/// # Errors
/// [`TreexError::StructureMismatch`] if the two treedefs differ, and
/// [`TreexError::ShapeMismatch`] if a slot present in both trees changes shape.
pub fn merge<T: Tree>(base: &T, other: &T) -> Result<T> {
    let ours = flatten(base);
    let theirs = flatten(other);
    treedef(base).check_same(&treedef(other))?;
    let merged = ours
        .into_iter()
        .zip(theirs)
        .map(|((path, mine), (_, other))| match (mine.value(), other.value()) {
            (Some(a), Some(b)) if a.shape() != b.shape() => Err(TreexError::shape(
                path.as_str(),
                a.shape(),
                b.shape(),
                "merge",
            )),
            (_, Some(_)) => Ok(other),
            _ => Ok(mine),
        })
        .collect::<Result<Vec<_>>>()?;
    unflatten(base, merged)
}

// --- Tree impls for tuples ---

macro_rules! impl_tree_for_tuple {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: Tree),+> Tree for ($($name,)+) {
            fn flatten_into(&self, prefix: &KeyPath, out: &mut Vec<(KeyPath, Leaf)>) {
                $( self.$idx.flatten_into(&prefix.child($idx), out); )+
            }

            fn unflatten_from(&self, leaves: &mut Leaves) -> Result<Self> {
                Ok(($( self.$idx.unflatten_from(leaves)?, )+))
            }
        }
    };
}

impl_tree_for_tuple!(A 0, B 1);
impl_tree_for_tuple!(A 0, B 1, C 2);
impl_tree_for_tuple!(A 0, B 1, C 2, D 3);

#[cfg(test)]
#[path = "tree_test.rs"]
mod tests;
