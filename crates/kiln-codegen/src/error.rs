//! Code generation errors.

use std::fmt;

use kiln_common::{Position, RuntimeCategory, TypeRef};

/// What went wrong while lowering a node.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    /// A node kind with no lowering in this position.
    UnsupportedNode(String),
    /// A primitive operator applied to the wrong number of operands.
    PrimitiveArity {
        op: String,
        expected: usize,
        found: usize,
    },
    /// An array operation applied to the wrong number of operands.
    ArrayArity {
        op: String,
        expected: usize,
        found: usize,
    },
    /// The backend has no instruction for this operator on this category.
    UnsupportedPrimitiveOp {
        op: String,
        category: RuntimeCategory,
    },
    /// A return whose value category does not match the method's.
    UnknownReturnCategory {
        method: String,
        declared: TypeRef,
        found: TypeRef,
    },
    /// A node reached code generation without an inferred type.
    UnresolvedType(String),
    /// An `if` or loop condition that is neither a comparison nor boolean.
    UnsupportedCondition(TypeRef),
    /// `self`, an instance field or an instance call in a static method.
    StaticContext(String),
    /// A local the current method never declared.
    UnknownLocal(String),
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileErrorKind::UnsupportedNode(what) => {
                write!(f, "cannot compile {}", what)
            }
            CompileErrorKind::PrimitiveArity {
                op,
                expected,
                found,
            } => write!(
                f,
                "operator `{}` takes {} operand(s), got {}",
                op, expected, found
            ),
            CompileErrorKind::ArrayArity {
                op,
                expected,
                found,
            } => write!(
                f,
                "array operation `{}` takes {} argument(s), got {}",
                op, expected, found
            ),
            CompileErrorKind::UnsupportedPrimitiveOp { op, category } => {
                write!(f, "operator `{}` is not supported on {}", op, category)
            }
            CompileErrorKind::UnknownReturnCategory {
                method,
                declared,
                found,
            } => write!(
                f,
                "cannot return {} from `{}`, which returns {}",
                found, method, declared
            ),
            CompileErrorKind::UnresolvedType(node) => {
                write!(f, "no type was inferred for {}", node)
            }
            CompileErrorKind::UnsupportedCondition(ty) => {
                write!(f, "a condition must be boolean or a comparison, found {}", ty)
            }
            CompileErrorKind::StaticContext(what) => {
                write!(f, "{} is not available in a static method", what)
            }
            CompileErrorKind::UnknownLocal(name) => write!(f, "unknown local `{}`", name),
        }
    }
}

/// A [`CompileErrorKind`] tied to the node it was raised for.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub position: Position,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, position: Position) -> Self {
        CompileError { kind, position }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for CompileError {}
