//! In-process transport.
//!
//! `Manual` streams park receives until the owner pushes data or completes
//! them directly, which lets tests pick the completion order. `Echo` streams
//! reflect every sent message back and finish with OK trailers once the
//! client half-closes. Both modes answer `recv_initial_metadata` right away
//! with empty metadata.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use dashmap::DashMap;

use filterstack_core::error::{CallError, Result, StatusCode};
use filterstack_core::{
    CallCombiner, CallCombinerClosureList, ExecCtx, Metadata, OpBatch, RecvOp,
};

use crate::stack::ChannelOp;
use crate::transport::{Stream, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InProcMode {
    Manual,
    Echo,
}

pub struct InProcTransport {
    mode: InProcMode,
    streams: DashMap<u64, Weak<InProcStream>>,
    next_id: AtomicU64,
    disconnected: Mutex<Option<CallError>>,
}

impl InProcTransport {
    pub fn new(mode: InProcMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            streams: DashMap::new(),
            next_id: AtomicU64::new(1),
            disconnected: Mutex::new(None),
        })
    }

    pub fn manual() -> Arc<Self> {
        Self::new(InProcMode::Manual)
    }

    pub fn echo() -> Arc<Self> {
        Self::new(InProcMode::Echo)
    }

    pub fn mode(&self) -> InProcMode {
        self.mode
    }

    pub fn stream(&self, id: u64) -> Option<Arc<InProcStream>> {
        self.streams.get(&id).and_then(|w| w.value().upgrade())
    }

    /// Most recently opened stream that is still alive.
    pub fn last_stream(&self) -> Option<Arc<InProcStream>> {
        self.streams
            .iter()
            .filter_map(|e| e.value().upgrade())
            .max_by_key(|s| s.id)
    }

    pub fn live_streams(&self) -> usize {
        self.streams.iter().filter(|e| e.value().strong_count() > 0).count()
    }

    pub fn disconnect_error(&self) -> Option<CallError> {
        self.disconnected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for InProcTransport {
    fn name(&self) -> &'static str {
        "inproc"
    }

    fn init_stream(&self, path: &str, call_combiner: Arc<CallCombiner>) -> Result<Arc<dyn Stream>> {
        self.streams.retain(|_, w| w.strong_count() > 0);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stream = Arc::new(InProcStream {
            id,
            path: path.to_owned(),
            mode: self.mode,
            combiner: call_combiner,
            state: Mutex::new(StreamState::default()),
        });
        if let Some(error) = self.disconnect_error() {
            stream.fail(error);
        }
        self.streams.insert(id, Arc::downgrade(&stream));
        tracing::trace!(stream = id, path, mode = ?self.mode, "inproc stream opened");
        Ok(stream)
    }

    fn perform_op(&self, op: ChannelOp) {
        if let Some(error) = op.disconnect_with_error {
            let first = {
                let mut d = self.disconnected.lock().unwrap_or_else(PoisonError::into_inner);
                if d.is_none() {
                    *d = Some(error.clone());
                    true
                } else {
                    false
                }
            };
            if first {
                tracing::debug!(%error, "inproc transport disconnected");
                let live: Vec<_> = self.streams.iter().filter_map(|e| e.value().upgrade()).collect();
                for stream in live {
                    stream.fail(error.clone());
                }
            }
        }
        if let Some(done) = op.on_consumed {
            ExecCtx::run(done, None);
        }
    }
}

#[derive(Default)]
struct StreamState {
    cancelled: Option<CallError>,
    sent_initial_metadata: Option<Metadata>,
    sent_messages: Vec<Bytes>,
    half_closed: bool,
    inbound: VecDeque<Bytes>,
    inbound_trailing: Option<Metadata>,
    trailing_delivered: bool,
    recv_message: Option<RecvOp<Bytes>>,
    recv_trailing: Option<RecvOp<Metadata>>,
}

impl StreamState {
    /// Match parked receives with inbound data. Messages drain before trailers.
    fn pump(&mut self, ready: &mut CallCombinerClosureList) {
        if let Some(op) = self.recv_message.take() {
            if let Some(msg) = self.inbound.pop_front() {
                op.slot.fill(Some(msg));
                ready.add(op.ready, None, "recv_message_ready");
            } else if self.inbound_trailing.is_some() {
                op.slot.fill(None);
                ready.add(op.ready, None, "recv_message_ready at end of stream");
            } else {
                self.recv_message = Some(op);
            }
        }

        if self.recv_message.is_none() && self.inbound.is_empty() && self.inbound_trailing.is_some() {
            if let Some(op) = self.recv_trailing.take() {
                op.slot.fill(self.inbound_trailing.clone());
                self.trailing_delivered = true;
                ready.add(op.ready, None, "recv_trailing_metadata_ready");
            }
        }
    }

    fn fail_pending(&mut self, error: &CallError, ready: &mut CallCombinerClosureList) {
        if let Some(op) = self.recv_message.take() {
            ready.add(op.ready, Some(error.clone()), "failing pending recv_message_ready");
        }
        if let Some(op) = self.recv_trailing.take() {
            ready.add(op.ready, Some(error.clone()), "failing pending recv_trailing_metadata_ready");
        }
    }
}

pub struct InProcStream {
    id: u64,
    path: String,
    mode: InProcMode,
    combiner: Arc<CallCombiner>,
    state: Mutex<StreamState>,
}

impl InProcStream {
    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn sent_messages(&self) -> Vec<Bytes> {
        self.lock().sent_messages.clone()
    }

    pub fn sent_initial_metadata(&self) -> Option<Metadata> {
        self.lock().sent_initial_metadata.clone()
    }

    pub fn is_half_closed(&self) -> bool {
        self.lock().half_closed
    }

    pub fn cancel_error(&self) -> Option<CallError> {
        self.lock().cancelled.clone()
    }

    pub fn has_pending_recv_message(&self) -> bool {
        self.lock().recv_message.is_some()
    }

    pub fn has_pending_recv_trailing_metadata(&self) -> bool {
        self.lock().recv_trailing.is_some()
    }

    /// Queue an inbound message; delivered to the next parked receive.
    pub fn push_message(&self, msg: impl Into<Bytes>) {
        let mut ready = CallCombinerClosureList::new();
        {
            let mut st = self.lock();
            if st.cancelled.is_some() || st.inbound_trailing.is_some() {
                tracing::warn!(stream = self.id, "inbound message after end of stream dropped");
                return;
            }
            st.inbound.push_back(msg.into());
            st.pump(&mut ready);
        }
        ready.run_closures_without_yielding(&self.combiner);
    }

    /// Queue trailers; delivered once every inbound message was received.
    pub fn push_trailing_metadata(&self, md: Metadata) {
        let mut ready = CallCombinerClosureList::new();
        {
            let mut st = self.lock();
            if st.inbound_trailing.is_some() || st.cancelled.is_some() {
                tracing::warn!(stream = self.id, "duplicate trailing metadata ignored");
                return;
            }
            st.inbound_trailing = Some(md);
            st.pump(&mut ready);
        }
        ready.run_closures_without_yielding(&self.combiner);
    }

    /// Complete the parked `recv_message` right now, bypassing the inbound queue.
    ///
    /// Returns false when no receive is parked.
    pub fn complete_recv_message(&self, msg: Option<Bytes>) -> bool {
        let Some(op) = self.lock().recv_message.take() else {
            return false;
        };
        op.slot.fill(msg);
        self.combiner.start(op.ready, None, "recv_message_ready");
        true
    }

    /// Complete the parked `recv_trailing_metadata` right now, even if a
    /// message receive is still outstanding.
    pub fn complete_recv_trailing_metadata(&self, md: Metadata) -> bool {
        let op = {
            let mut st = self.lock();
            if st.trailing_delivered {
                tracing::warn!(stream = self.id, "trailing metadata already delivered");
                return false;
            }
            let Some(op) = st.recv_trailing.take() else {
                return false;
            };
            st.inbound_trailing = Some(md.clone());
            st.trailing_delivered = true;
            op
        };
        op.slot.fill(Some(md));
        self.combiner.start(op.ready, None, "recv_trailing_metadata_ready");
        true
    }

    /// Transport-side failure: every parked and future op completes with `error`.
    pub fn fail(&self, error: CallError) {
        let mut ready = CallCombinerClosureList::new();
        {
            let mut st = self.lock();
            if st.cancelled.is_some() {
                return;
            }
            tracing::debug!(stream = self.id, %error, "inproc stream failed");
            st.cancelled = Some(error.clone());
            st.fail_pending(&error, &mut ready);
        }
        ready.run_closures_without_yielding(&self.combiner);
    }

    fn accept(&self, st: &mut StreamState, batch: OpBatch, ready: &mut CallCombinerClosureList) {
        let OpBatch {
            send_initial_metadata,
            send_message,
            send_trailing_metadata,
            recv_initial_metadata,
            recv_message,
            recv_trailing_metadata,
            cancel_stream: _,
            on_complete,
        } = batch;
        let echo = self.mode == InProcMode::Echo;

        if let Some(md) = send_initial_metadata {
            st.sent_initial_metadata = Some(md);
        }
        if let Some(msg) = send_message {
            if echo {
                st.inbound.push_back(msg.clone());
            }
            st.sent_messages.push(msg);
        }
        if send_trailing_metadata.is_some() {
            st.half_closed = true;
            if echo && st.inbound_trailing.is_none() {
                st.inbound_trailing = Some(Metadata::with_status(StatusCode::Ok, ""));
            }
        }

        if let Some(op) = recv_initial_metadata {
            op.slot.fill(Some(Metadata::new()));
            ready.add(op.ready, None, "recv_initial_metadata_ready");
        }
        if let Some(op) = recv_message {
            if let Some(stale) = st.recv_message.replace(op) {
                ready.add(stale.ready, Some(already_pending("recv_message")), "failing stale recv_message_ready");
            }
        }
        if let Some(op) = recv_trailing_metadata {
            if st.trailing_delivered {
                ready.add(op.ready, Some(already_pending("recv_trailing_metadata")), "trailing metadata already delivered");
            } else if let Some(stale) = st.recv_trailing.replace(op) {
                ready.add(stale.ready, Some(already_pending("recv_trailing_metadata")), "failing stale recv_trailing_metadata_ready");
            }
        }
        if let Some(done) = on_complete {
            ready.add(done, None, "on_complete");
        }

        st.pump(ready);
    }
}

fn already_pending(op: &str) -> CallError {
    CallError::with_code(StatusCode::Internal, format!("{op} already requested on this stream"))
}

impl Stream for InProcStream {
    fn perform_stream_op(&self, mut batch: OpBatch) {
        let mut ready = CallCombinerClosureList::new();
        {
            let mut st = self.lock();
            if let Some(error) = batch.cancel_stream.take() {
                let on_complete = batch.on_complete.take();
                let error = match st.cancelled.clone() {
                    Some(existing) => existing,
                    None => {
                        tracing::debug!(stream = self.id, %error, "inproc stream cancelled");
                        st.cancelled = Some(error.clone());
                        st.fail_pending(&error, &mut ready);
                        error
                    }
                };
                ready.extend(batch.into_failure_closures(error));
                if let Some(done) = on_complete {
                    ready.add(done, None, "cancel_stream on_complete");
                }
            } else if let Some(error) = st.cancelled.clone() {
                ready.extend(batch.into_failure_closures(error));
            } else {
                self.accept(&mut st, batch, &mut ready);
            }
        }
        ready.run_closures_without_yielding(&self.combiner);
    }
}
