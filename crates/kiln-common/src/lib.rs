//! Shared types for the Kiln compiler.
//!
//! Every stage of the pipeline (transform, inference, code generation)
//! speaks in terms of the types defined here:
//!
//! - [`span`]: source positions and the line index used to compute them
//! - [`ty`]: nominal type references, runtime categories, resolved method
//!   signatures

pub mod span;
pub mod ty;

pub use span::{LineIndex, Position};
pub use ty::{is_print, DispatchKind, MethodSignature, RuntimeCategory, TypeRef, PRINT_FUNCTIONS};
