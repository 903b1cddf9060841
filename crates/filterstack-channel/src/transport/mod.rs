//! Transport seam consumed by the terminal `connected` filter.

pub mod inproc;

use std::sync::Arc;

use filterstack_core::error::Result;
use filterstack_core::{CallCombiner, OpBatch};

use crate::stack::ChannelOp;

pub use inproc::{InProcMode, InProcStream, InProcTransport};

pub trait Transport: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Open a stream for one call. Completions for that stream are scheduled
    /// through `call_combiner`.
    fn init_stream(&self, path: &str, call_combiner: Arc<CallCombiner>) -> Result<Arc<dyn Stream>>;

    fn perform_op(&self, op: ChannelOp);
}

pub trait Stream: Send + Sync {
    /// Accept a batch. Called holding the call combiner; the hold stays with
    /// the caller, completions are started through the combiner.
    fn perform_stream_op(&self, batch: OpBatch);
}
