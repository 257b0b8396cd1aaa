//! Kiln type checker: fixed-point local type inference.
//!
//! Types flow from literals, declared signatures and host reflection into
//! locals, fields and call results. A node whose inputs are not known yet
//! is deferred and retried until a sweep makes no progress.
//!
//! # Architecture
//!
//! - [`typer`]: the type registry (known types, scope tables, method
//!   cache) and the fixed-point driver
//! - [`infer`]: per-node inference rules
//! - [`host`]: host reflection (`HostReflection`) and a table-driven host
//! - [`resolve`]: assignability and overload selection
//! - [`builtins`]: built-in types and primitive operator signatures
//! - [`error`]: inference errors
//! - [`diagnostics`]: ariadne rendering of inference errors

pub mod builtins;
pub mod diagnostics;
pub mod error;
pub mod host;
pub mod infer;
pub mod resolve;
pub mod typer;

use kiln_ast::Ast;

pub use error::{InferenceError, UnresolvedNode};
pub use host::{HostClass, HostReflection, HostTypes};
pub use typer::{InferOptions, InferStats, Typer};

/// Infer types for `ast` with a fresh [`Typer`].
///
/// On success every resolved node carries its `inferred_type`; in
/// non-strict mode some nodes may still have none.
pub fn infer_all(
    ast: &mut Ast,
    host: &dyn HostReflection,
    options: &InferOptions,
) -> Result<InferStats, InferenceError> {
    Typer::new(host).infer_all(ast, options)
}
