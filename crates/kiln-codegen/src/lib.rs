//! Kiln code generation: a target-independent dispatcher over a typed AST
//! and the backends it drives.
//!
//! The dispatcher ([`compile::compile`]) walks each class and method,
//! keeping the operand-stack discipline that every expression leaves
//! exactly one value (none when its type is `void`). Backends only see a
//! flat sequence of [`Backend`] calls.
//!
//! # Architecture
//!
//! - [`backend`]: the `Backend` trait, labels, branch conditions and the
//!   default label/jump lowering of structured control flow
//! - [`compile`]: the dispatcher from typed nodes to backend calls
//! - [`bytecode`]: the stack-machine backend, its assembler and a
//!   reference interpreter for the emitted code
//! - [`text`]: a C-like source backend
//! - [`error`]: code generation errors

pub mod backend;
pub mod bytecode;
pub mod compile;
pub mod error;
pub mod text;

pub use backend::{ArrayOp, Backend, CompareOp, Condition, IfFrame, Label, LoopFrame};
pub use bytecode::BytecodeBackend;
pub use compile::compile;
pub use error::{CompileError, CompileErrorKind};
pub use text::TextBackend;
