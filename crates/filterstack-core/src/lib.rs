//! filterstack core: transport-agnostic call primitives and error types.
//!
//! This crate defines the pieces every filter is built on: composable call
//! errors, one-shot closures, the per-thread execution context, the per-call
//! combiner that serializes closures, and op batches. It carries no channel,
//! config or transport logic so it can be reused by any stack.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Fallible paths
//! surface as [`FilterStackError`]/[`Result`] or as a [`CallError`] handed to
//! a closure.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod batch;
pub mod closure;
pub mod combiner;
pub mod error;
pub mod exec_ctx;

pub use batch::{Metadata, OpBatch, RecvOp, RecvSlot};
pub use closure::{Closure, ClosureSlot};
pub use combiner::{CallCombiner, CallCombinerClosureList};
pub use error::{CallError, FilterStackError, Result, StatusCode};
pub use exec_ctx::ExecCtx;
