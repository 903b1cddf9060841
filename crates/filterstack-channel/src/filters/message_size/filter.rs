use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use filterstack_core::error::{CallError, FilterStackError, Result, StatusCode};
use filterstack_core::{CallCombiner, Closure, ClosureSlot, OpBatch, RecvSlot};

use crate::config::ChannelArgs;
use crate::filters::message_size::parser::{
    exceeds, MessageSizeLimits, MessageSizeParsedConfig, PARSER_NAME,
};
use crate::stack::{
    CallElement, CallElementArgs, CallNext, ChannelElement, ChannelElementArgs, ChannelFilter,
};

pub const FILTER_NAME: &str = "message_size";

/// Channel defaults. A minimal stack is unbounded both ways.
pub fn limits_from_channel_args(args: &ChannelArgs) -> MessageSizeLimits {
    if args.want_minimal_stack() {
        return MessageSizeLimits::UNBOUNDED;
    }
    MessageSizeLimits {
        max_send_size: args.max_send_message_length(),
        max_recv_size: args.max_receive_message_length(),
    }
}

/// Rejects oversized outbound messages and flags oversized inbound ones.
#[derive(Debug, Default)]
pub struct MessageSizeFilter;

impl ChannelFilter for MessageSizeFilter {
    fn name(&self) -> &'static str {
        FILTER_NAME
    }

    fn init_channel_elem(&self, args: &ChannelElementArgs<'_>) -> Result<Box<dyn ChannelElement>> {
        if args.is_last {
            return Err(FilterStackError::ChannelBuild(
                "message_size filter cannot be the last element".into(),
            ));
        }
        let parser_index = args.config.service_config_parsers().index_of(PARSER_NAME);
        if parser_index.is_none() {
            tracing::warn!("message_size parser not registered, per-method limits disabled");
        }
        Ok(Box::new(MessageSizeChannelElem {
            limits: limits_from_channel_args(args.channel_args),
            parser_index,
        }))
    }
}

struct MessageSizeChannelElem {
    limits: MessageSizeLimits,
    parser_index: Option<usize>,
}

impl ChannelElement for MessageSizeChannelElem {
    fn init_call_elem(&self, args: &CallElementArgs<'_>) -> Result<Box<dyn CallElement>> {
        let method = self
            .parser_index
            .and_then(|i| MessageSizeParsedConfig::from_call_context(args.context, i));
        let limits = match method {
            Some(cfg) => self.limits.tightened_by(cfg.limits()),
            None => self.limits,
        };
        tracing::trace!(
            path = args.path,
            max_send = limits.max_send_size,
            max_recv = limits.max_recv_size,
            "message size limits for call"
        );
        Ok(Box::new(MessageSizeCallElem {
            combiner: Arc::clone(args.call_combiner),
            state: Arc::new(Mutex::new(CallState::new(limits))),
        }))
    }
}

struct CallState {
    limits: MessageSizeLimits,
    /// Receive-size violation, merged into the trailing status.
    error: Option<CallError>,
    recv_message: Option<RecvSlot<Bytes>>,
    next_recv_message_ready: ClosureSlot,
    original_recv_trailing_metadata_ready: ClosureSlot,
    /// Bumped per intercepted receive; a substitute only owns the original
    /// saved under its own generation.
    recv_message_generation: u64,
    recv_trailing_metadata_generation: u64,
    seen_recv_trailing_metadata: bool,
    recv_trailing_metadata_error: Option<CallError>,
}

impl CallState {
    fn new(limits: MessageSizeLimits) -> Self {
        Self {
            limits,
            error: None,
            recv_message: None,
            next_recv_message_ready: ClosureSlot::new(),
            original_recv_trailing_metadata_ready: ClosureSlot::new(),
            recv_message_generation: 0,
            recv_trailing_metadata_generation: 0,
            seen_recv_trailing_metadata: false,
            recv_trailing_metadata_error: None,
        }
    }
}

type SharedState = Arc<Mutex<CallState>>;

fn lock(state: &Mutex<CallState>) -> MutexGuard<'_, CallState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MessageSizeCallElem {
    combiner: Arc<CallCombiner>,
    state: SharedState,
}

impl MessageSizeCallElem {
    pub fn limits(&self) -> MessageSizeLimits {
        lock(&self.state).limits
    }
}

impl CallElement for MessageSizeCallElem {
    fn start_batch(&self, mut batch: OpBatch, next: CallNext<'_>) {
        let max_send = lock(&self.state).limits.max_send_size;
        if let Some(len) = batch.send_message_len() {
            if exceeds(len, max_send) {
                tracing::debug!(len, max = max_send, "outbound message over limit, failing batch");
                batch.finish_with_failure(
                    CallError::with_code(
                        StatusCode::ResourceExhausted,
                        format!("Sent message larger than max ({len} vs. {max_send})"),
                    ),
                    &self.combiner,
                );
                return;
            }
        }

        let mut stale = Vec::new();
        {
            let mut st = lock(&self.state);
            if let Some(op) = batch.recv_message.as_mut() {
                st.recv_message_generation += 1;
                let ours = recv_message_ready(&self.state, &self.combiner, st.recv_message_generation);
                let original = std::mem::replace(&mut op.ready, ours);
                if let Some(prev) = st.next_recv_message_ready.set(original) {
                    stale.push(prev);
                }
                st.recv_message = Some(op.slot.clone());
            }
            if let Some(op) = batch.recv_trailing_metadata.as_mut() {
                st.recv_trailing_metadata_generation += 1;
                let ours = recv_trailing_metadata_ready(
                    &self.state,
                    &self.combiner,
                    st.recv_trailing_metadata_generation,
                );
                let original = std::mem::replace(&mut op.ready, ours);
                if let Some(prev) = st.original_recv_trailing_metadata_ready.set(original) {
                    stale.push(prev);
                }
            }
        }
        for prev in stale {
            tracing::error!(closure = prev.name(), "receive started while the previous one is still pending");
            self.combiner.start(
                prev,
                Some(CallError::with_code(StatusCode::Internal, "superseded by a newer receive")),
                "failing superseded receive",
            );
        }

        next.start_batch(batch);
    }
}

fn recv_message_ready(state: &SharedState, combiner: &Arc<CallCombiner>, generation: u64) -> Closure {
    let state = Arc::clone(state);
    let combiner = Arc::clone(combiner);
    Closure::new("message_size recv_message_ready", move |error| {
        if lock(&state).recv_message_generation != generation {
            tracing::debug!(generation, error = ?error, "superseded recv_message_ready discarded");
            combiner.stop("superseded recv_message_ready");
            return;
        }
        on_recv_message_ready(&state, &combiner, error)
    })
}

fn recv_trailing_metadata_ready(
    state: &SharedState,
    combiner: &Arc<CallCombiner>,
    generation: u64,
) -> Closure {
    let state = Arc::clone(state);
    let combiner = Arc::clone(combiner);
    Closure::new("message_size recv_trailing_metadata_ready", move |error| {
        if lock(&state).recv_trailing_metadata_generation != generation {
            tracing::debug!(generation, error = ?error, "superseded recv_trailing_metadata_ready discarded");
            combiner.stop("superseded recv_trailing_metadata_ready");
            return;
        }
        on_recv_trailing_metadata_ready(&state, &combiner, error)
    })
}

/// Re-entry point for a deferred trailing closure. It never defers again.
fn resume_recv_trailing_metadata_ready(state: &SharedState, combiner: &Arc<CallCombiner>) -> Closure {
    let state = Arc::clone(state);
    let combiner = Arc::clone(combiner);
    Closure::new("message_size resume recv_trailing_metadata_ready", move |error| {
        finish_recv_trailing_metadata(&state, &combiner, error)
    })
}

fn on_recv_message_ready(state: &SharedState, combiner: &Arc<CallCombiner>, error: Option<CallError>) {
    let mut error = error;
    let (next, resume) = {
        let mut st = lock(state);
        let max = st.limits.max_recv_size;
        let received = st
            .recv_message
            .take()
            .and_then(|slot| slot.with(|m| m.map(Bytes::len)));
        if let Some(len) = received {
            if exceeds(len, max) {
                tracing::debug!(len, max, "inbound message over limit");
                let violation = CallError::with_code(
                    StatusCode::ResourceExhausted,
                    format!("Received message larger than max ({len} vs. {max})"),
                );
                error = CallError::compose(error, Some(violation));
                st.error = error.clone();
            }
        }
        let next = st.next_recv_message_ready.take();
        let resume = if st.seen_recv_trailing_metadata {
            st.seen_recv_trailing_metadata = false;
            Some(st.recv_trailing_metadata_error.take())
        } else {
            None
        };
        (next, resume)
    };

    if let Some(trailing_error) = resume {
        combiner.start(
            resume_recv_trailing_metadata_ready(state, combiner),
            trailing_error,
            "continue recv_trailing_metadata_ready",
        );
    }
    match next {
        Some(next) => next.run(error),
        None => {
            tracing::error!("recv_message_ready fired with no saved continuation");
            combiner.stop("orphan recv_message_ready");
        }
    }
}

fn on_recv_trailing_metadata_ready(
    state: &SharedState,
    combiner: &Arc<CallCombiner>,
    error: Option<CallError>,
) {
    {
        let mut st = lock(state);
        if st.next_recv_message_ready.is_set() {
            st.seen_recv_trailing_metadata = true;
            st.recv_trailing_metadata_error = error;
            drop(st);
            tracing::debug!("deferring recv_trailing_metadata_ready until after recv_message_ready");
            combiner.stop("deferring recv_trailing_metadata_ready until after recv_message_ready");
            return;
        }
    }
    finish_recv_trailing_metadata(state, combiner, error);
}

fn finish_recv_trailing_metadata(
    state: &SharedState,
    combiner: &Arc<CallCombiner>,
    error: Option<CallError>,
) {
    let (original, error) = {
        let mut st = lock(state);
        let error = CallError::compose(error, st.error.clone());
        (st.original_recv_trailing_metadata_ready.take(), error)
    };
    match original {
        Some(original) => original.run(error),
        None => {
            tracing::error!("recv_trailing_metadata_ready fired with no saved continuation");
            combiner.stop("orphan recv_trailing_metadata_ready");
        }
    }
}
