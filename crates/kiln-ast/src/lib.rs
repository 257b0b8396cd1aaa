//! Kiln AST: the internal typed tree and the transform that builds it.
//!
//! The front end is external: it hands us an already-parsed
//! [`foreign::ForeignNode`] tree. [`transform::transform`] maps each foreign
//! node kind onto exactly one internal [`node::NodeKind`], producing an
//! arena-backed [`node::Ast`] rooted at a `Script` node.
//!
//! # Architecture
//!
//! - [`foreign`]: the foreign parse tree (serde-deserialisable) and builders
//! - [`node`]: the node arena, node kinds, parent links, inferred-type slots
//! - [`transform`]: foreign tree -> internal AST
//! - [`error`]: transform errors

pub mod error;
pub mod foreign;
pub mod node;
pub mod transform;

pub use error::TransformError;
pub use foreign::{ForeignKind, ForeignNode};
pub use node::{Ast, Literal, MethodDef, Node, NodeId, NodeKind, Signature};
pub use transform::{transform, Transformer};
