//! Inference errors.
//!
//! `IncompatibleAssignment`, `ReturnTypeMismatch` and `BranchTypeMismatch`
//! are raised the moment they are detected. `Unresolved` is only raised by
//! strict finalisation, once the fixed-point driver gives up.

use std::fmt;

use kiln_ast::NodeId;
use kiln_common::{Position, TypeRef};

/// A node still without a type when inference stopped.
#[derive(Clone, Debug, PartialEq)]
pub struct UnresolvedNode {
    pub node: NodeId,
    pub description: String,
    pub position: Position,
    /// Description of the parent node, for context.
    pub parent: Option<String>,
    /// Why the last attempt failed, when the node itself knew.
    pub reason: Option<String>,
}

impl fmt::Display for UnresolvedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.position, self.description)?;
        if let Some(parent) = &self.parent {
            write!(f, " (in {})", parent)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum InferenceError {
    /// Nodes left deferred after the fixed-point bound was reached.
    Unresolved(Vec<UnresolvedNode>),
    /// A value assigned to a variable whose type is already bound to
    /// something it does not widen to.
    IncompatibleAssignment {
        name: String,
        bound: TypeRef,
        found: TypeRef,
        position: Position,
    },
    /// A method body (or `return` value) that does not fit the declared
    /// return type.
    ReturnTypeMismatch {
        method: String,
        declared: TypeRef,
        found: TypeRef,
        position: Position,
    },
    /// An `if` whose two branches produce different non-void types.
    BranchTypeMismatch {
        then_type: TypeRef,
        else_type: TypeRef,
        position: Position,
    },
}

impl InferenceError {
    /// The primary source position of the error.
    pub fn position(&self) -> Position {
        match self {
            InferenceError::Unresolved(nodes) => nodes
                .iter()
                .map(|n| n.position)
                .find(|p| p.line != 0)
                .unwrap_or_default(),
            InferenceError::IncompatibleAssignment { position, .. }
            | InferenceError::ReturnTypeMismatch { position, .. }
            | InferenceError::BranchTypeMismatch { position, .. } => *position,
        }
    }

    /// The unresolved nodes, for `Unresolved`; empty otherwise.
    pub fn unresolved(&self) -> &[UnresolvedNode] {
        match self {
            InferenceError::Unresolved(nodes) => nodes,
            _ => &[],
        }
    }
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceError::Unresolved(nodes) => {
                write!(f, "could not infer types for {} node(s)", nodes.len())?;
                for node in nodes {
                    write!(f, "\n  {}", node)?;
                }
                Ok(())
            }
            InferenceError::IncompatibleAssignment {
                name, bound, found, ..
            } => write!(
                f,
                "cannot assign {} to `{}`, which is already {}",
                found, name, bound
            ),
            InferenceError::ReturnTypeMismatch {
                method,
                declared,
                found,
                ..
            } => write!(
                f,
                "method `{}` returns {} but produces {}",
                method, declared, found
            ),
            InferenceError::BranchTypeMismatch {
                then_type,
                else_type,
                ..
            } => write!(
                f,
                "if branches disagree: then is {}, else is {}",
                then_type, else_type
            ),
        }
    }
}

impl std::error::Error for InferenceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_lists_every_node() {
        let err = InferenceError::Unresolved(vec![
            UnresolvedNode {
                node: NodeId(3),
                description: "Local a".into(),
                position: Position::line(2),
                parent: Some("LocalAssignment b".into()),
                reason: Some("local `a` has no known type".into()),
            },
            UnresolvedNode {
                node: NodeId(5),
                description: "Local b".into(),
                position: Position::default(),
                parent: None,
                reason: None,
            },
        ]);
        assert_eq!(
            err.to_string(),
            "could not infer types for 2 node(s)\n  \
             line 2: Local a (in LocalAssignment b): local `a` has no known type\n  \
             line ?: Local b"
        );
        assert_eq!(err.position().line, 2);
    }

    #[test]
    fn incompatible_assignment_message() {
        let err = InferenceError::IncompatibleAssignment {
            name: "x".into(),
            bound: TypeRef::int(),
            found: TypeRef::string(),
            position: Position::line(4),
        };
        assert_eq!(
            err.to_string(),
            "cannot assign string to `x`, which is already int"
        );
    }
}
