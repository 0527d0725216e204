use thiserror::Error;

/// Custom error type for the treex framework.
///
/// The three families callers usually match on are shape errors (a tensor does
/// not fit the configured hyperparameters), structure errors (two trees that
/// should align do not) and state errors (an operation needs state that is not
/// there yet). All of them are configuration or programming bugs: they are
/// raised at the point of detection and never retried.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum TreexError {
    #[error("Shape mismatch at '{path}': expected {expected}, got {actual} during operation {operation}")]
    ShapeMismatch {
        path: String,
        expected: String,
        actual: String,
        operation: String,
    },

    #[error("Structure mismatch at '{path}': expected {expected}, got {actual}")]
    StructureMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Missing state at '{path}': {reason}")]
    MissingState { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tensor creation error: data length {data_len} does not match shape {shape:?}")]
    TensorCreation { data_len: usize, shape: Vec<usize> },

    #[error("Values from two different gradient traces were combined in {operation}")]
    TapeMismatch { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TreexError {
    /// Shorthand for a [`TreexError::ShapeMismatch`] with `Debug`-formatted shapes.
    pub fn shape(
        path: impl Into<String>,
        expected: impl std::fmt::Debug,
        actual: impl std::fmt::Debug,
        operation: impl Into<String>,
    ) -> Self {
        TreexError::ShapeMismatch {
            path: path.into(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
            operation: operation.into(),
        }
    }

    /// Shorthand for a [`TreexError::StructureMismatch`].
    pub fn structure(
        path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        TreexError::StructureMismatch {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Shorthand for a [`TreexError::MissingState`].
    pub fn missing(path: impl Into<String>, reason: impl Into<String>) -> Self {
        TreexError::MissingState {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Fills in `path` on errors raised without one (tensor ops have no
    /// notion of where in a tree they run). Errors that already name a
    /// path are returned unchanged.
    pub fn at_path(self, path: impl std::fmt::Display) -> Self {
        match self {
            TreexError::ShapeMismatch { path: p, expected, actual, operation } if p.is_empty() => {
                TreexError::ShapeMismatch { path: path.to_string(), expected, actual, operation }
            }
            TreexError::StructureMismatch { path: p, expected, actual } if p.is_empty() => {
                TreexError::StructureMismatch { path: path.to_string(), expected, actual }
            }
            TreexError::MissingState { path: p, reason } if p.is_empty() => {
                TreexError::MissingState { path: path.to_string(), reason }
            }
            other => other,
        }
    }

    /// Returns `true` for shape errors.
    pub fn is_shape_error(&self) -> bool {
        matches!(self, TreexError::ShapeMismatch { .. })
    }

    /// Returns `true` for structure errors.
    pub fn is_structure_error(&self) -> bool {
        matches!(self, TreexError::StructureMismatch { .. })
    }

    /// Returns `true` for state errors.
    pub fn is_state_error(&self) -> bool {
        matches!(self, TreexError::MissingState { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = TreexError> = std::result::Result<T, E>;
