//! Op batches: one unit of requested call work plus its completion closures.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use crate::closure::Closure;
use crate::combiner::{CallCombiner, CallCombinerClosureList};
use crate::error::{CallError, StatusCode};

/// Trailing metadata key holding the status name.
pub const STATUS_KEY: &str = "rpc-status";
/// Trailing metadata key holding the status message.
pub const MESSAGE_KEY: &str = "rpc-message";

/// Ordered key/value metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trailing metadata describing a final status.
    pub fn with_status(code: StatusCode, message: &str) -> Self {
        let mut md = Self::new();
        md.insert(STATUS_KEY, code.as_str());
        if !message.is_empty() {
            md.insert(MESSAGE_KEY, message);
        }
        md
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared landing spot for received data.
///
/// The caller creates it, the transport fills it before running the ready
/// closure, and interceptors may peek at it in between.
#[derive(Debug)]
pub struct RecvSlot<T> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for RecvSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for RecvSlot<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> RecvSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill(&self, value: Option<T>) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub fn take(&self) -> Option<T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Inspect the current content without taking it.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_ref())
    }

    pub fn is_filled(&self) -> bool {
        self.with(|v| v.is_some())
    }
}

/// A receive operation: where to put the data and what to run once it is there.
#[derive(Debug)]
pub struct RecvOp<T> {
    pub slot: RecvSlot<T>,
    pub ready: Closure,
}

impl<T> RecvOp<T> {
    pub fn new(slot: RecvSlot<T>, ready: Closure) -> Self {
        Self { slot, ready }
    }
}

/// One set of requested operations on a call.
#[derive(Debug, Default)]
pub struct OpBatch {
    pub send_initial_metadata: Option<Metadata>,
    pub send_message: Option<Bytes>,
    /// Half-close: no more messages will be sent.
    pub send_trailing_metadata: Option<Metadata>,
    pub recv_initial_metadata: Option<RecvOp<Metadata>>,
    pub recv_message: Option<RecvOp<Bytes>>,
    pub recv_trailing_metadata: Option<RecvOp<Metadata>>,
    pub cancel_stream: Option<CallError>,
    /// Runs once the transport has accepted (or failed) the non-recv ops.
    pub on_complete: Option<Closure>,
}

impl OpBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_initial_metadata(mut self, md: Metadata) -> Self {
        self.send_initial_metadata = Some(md);
        self
    }

    pub fn send_message(mut self, payload: impl Into<Bytes>) -> Self {
        self.send_message = Some(payload.into());
        self
    }

    pub fn send_trailing_metadata(mut self, md: Metadata) -> Self {
        self.send_trailing_metadata = Some(md);
        self
    }

    pub fn recv_initial_metadata(mut self, slot: RecvSlot<Metadata>, ready: Closure) -> Self {
        self.recv_initial_metadata = Some(RecvOp::new(slot, ready));
        self
    }

    pub fn recv_message(mut self, slot: RecvSlot<Bytes>, ready: Closure) -> Self {
        self.recv_message = Some(RecvOp::new(slot, ready));
        self
    }

    pub fn recv_trailing_metadata(mut self, slot: RecvSlot<Metadata>, ready: Closure) -> Self {
        self.recv_trailing_metadata = Some(RecvOp::new(slot, ready));
        self
    }

    pub fn cancel_stream(mut self, error: CallError) -> Self {
        self.cancel_stream = Some(error);
        self
    }

    pub fn on_complete(mut self, closure: Closure) -> Self {
        self.on_complete = Some(closure);
        self
    }

    /// Size of the outgoing message, if any.
    pub fn send_message_len(&self) -> Option<usize> {
        self.send_message.as_ref().map(Bytes::len)
    }

    /// Collect every completion of this batch with `error` attached.
    ///
    /// Send payloads are discarded; nothing is forwarded.
    pub fn into_failure_closures(self, error: CallError) -> CallCombinerClosureList {
        let mut list = CallCombinerClosureList::new();
        if let Some(op) = self.recv_initial_metadata {
            list.add(op.ready, Some(error.clone()), "failing recv_initial_metadata_ready");
        }
        if let Some(op) = self.recv_message {
            list.add(op.ready, Some(error.clone()), "failing recv_message_ready");
        }
        if let Some(op) = self.recv_trailing_metadata {
            list.add(op.ready, Some(error.clone()), "failing recv_trailing_metadata_ready");
        }
        if let Some(closure) = self.on_complete {
            list.add(closure, Some(error), "failing on_complete");
        }
        list
    }

    /// Fail the whole batch. Must be called holding `combiner`; yields it.
    pub fn finish_with_failure(self, error: CallError, combiner: &CallCombiner) {
        tracing::debug!(%error, "failing op batch");
        self.into_failure_closures(error).run_closures(combiner);
    }
}
