use std::fmt;

use kiln_common::Position;

/// Errors raised while lowering a foreign parse tree.
///
/// A transform never produces a partial tree: the first unmappable node
/// aborts the whole compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformError {
    /// A foreign node kind (or shape) outside the supported subset.
    UnsupportedSyntax {
        position: Position,
        description: String,
    },
}

impl TransformError {
    pub fn unsupported(position: Position, description: impl Into<String>) -> Self {
        TransformError::UnsupportedSyntax {
            position,
            description: description.into(),
        }
    }

    pub fn position(&self) -> Position {
        match self {
            TransformError::UnsupportedSyntax { position, .. } => *position,
        }
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::UnsupportedSyntax { description, .. } => {
                write!(f, "unsupported syntax: {}", description)
            }
        }
    }
}

impl std::error::Error for TransformError {}
