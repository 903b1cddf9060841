use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use bytes::Bytes;
use tokio::sync::oneshot;

use filterstack_core::batch::{MESSAGE_KEY, STATUS_KEY};
use filterstack_core::error::{CallError, Result, StatusCode};
use filterstack_core::{CallCombiner, Closure, Metadata, OpBatch, RecvOp, RecvSlot};

use crate::service_config::CallContext;
use crate::stack::{CallElementArgs, CallStack, ChannelStack};

/// Final outcome of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStatus {
    pub code: StatusCode,
    pub message: String,
}

impl CallStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, "")
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    pub fn from_error(error: &CallError) -> Self {
        match error.find_status() {
            Some((code, message)) => Self::new(code, message),
            None => Self::new(StatusCode::Unknown, error.to_string()),
        }
    }

    /// An error on the trailing completion wins over the received trailers.
    pub fn from_trailing(error: Option<&CallError>, md: Option<&Metadata>) -> Self {
        if let Some(error) = error {
            return Self::from_error(error);
        }
        let Some(md) = md else {
            return Self::new(StatusCode::Unknown, "no trailing metadata received");
        };
        match md.get(STATUS_KEY) {
            Some(code) => Self::new(
                StatusCode::parse(code).unwrap_or(StatusCode::Unknown),
                md.get(MESSAGE_KEY).unwrap_or_default(),
            ),
            None => Self::new(StatusCode::Unknown, "trailing metadata without status"),
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

type StatusCell = Arc<Mutex<Option<CallStatus>>>;

fn record_status(cell: &StatusCell, status: CallStatus) {
    let mut slot = cell.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        tracing::debug!(%status, "call finished");
        *slot = Some(status);
    }
}

/// Result of [`Call::unary`].
#[derive(Debug)]
pub struct UnaryResponse {
    pub message: Option<Bytes>,
    pub status: CallStatus,
}

/// One RPC on a channel.
///
/// Application completions passed to [`Call::start_batch`] run holding the
/// call combiner, which is yielded right after each of them returns. Dropping
/// the last handle cancels the call unless it was cancelled already; every
/// completion still pending then fires with `CANCELLED` before the stack goes
/// away.
#[derive(Clone)]
pub struct Call {
    inner: Arc<CallInner>,
}

struct CallInner {
    path: String,
    combiner: Arc<CallCombiner>,
    stack: Arc<CallStack>,
    context: CallContext,
    final_status: StatusCell,
}

impl Call {
    pub(crate) fn new(channel_stack: &ChannelStack, path: &str, context: CallContext) -> Result<Self> {
        let combiner = Arc::new(CallCombiner::new());
        let stack = channel_stack.create_call_stack(&CallElementArgs {
            path,
            call_combiner: &combiner,
            context: &context,
        })?;
        tracing::trace!(path, elements = stack.len(), "call created");
        Ok(Self {
            inner: Arc::new(CallInner {
                path: path.to_owned(),
                combiner,
                stack: Arc::new(stack),
                context,
                final_status: Arc::new(Mutex::new(None)),
            }),
        })
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn call_combiner(&self) -> &Arc<CallCombiner> {
        &self.inner.combiner
    }

    pub fn context(&self) -> &CallContext {
        &self.inner.context
    }

    pub fn final_status(&self) -> Option<CallStatus> {
        self.inner
            .final_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Submit a batch. It enters the stack once the combiner is free.
    pub fn start_batch(&self, mut batch: OpBatch) {
        let combiner = &self.inner.combiner;

        if let Some(RecvOp { slot, ready }) = batch.recv_initial_metadata.take() {
            batch.recv_initial_metadata = Some(RecvOp::new(
                slot,
                yield_after(ready, combiner, "surface recv_initial_metadata_ready"),
            ));
        }
        if let Some(RecvOp { slot, ready }) = batch.recv_message.take() {
            batch.recv_message = Some(RecvOp::new(
                slot,
                yield_after(ready, combiner, "surface recv_message_ready"),
            ));
        }
        if let Some(RecvOp { slot, ready }) = batch.recv_trailing_metadata.take() {
            let wrapped = self.trailing_wrapper(slot.clone(), ready);
            batch.recv_trailing_metadata = Some(RecvOp::new(slot, wrapped));
        }
        let user_on_complete = batch.on_complete.take();
        batch.on_complete = Some(self.on_complete_wrapper(user_on_complete, batch.send_message.is_some()));

        let inner = Arc::clone(&self.inner);
        combiner.start(
            Closure::new("surface start batch", move |_| inner.stack.start_batch(batch)),
            None,
            "start batch",
        );
    }

    pub fn cancel(&self) {
        self.cancel_with_error(CallError::cancelled());
    }

    /// Cancel once; later calls are ignored.
    pub fn cancel_with_error(&self, error: CallError) {
        if self.inner.combiner.cancel_error().is_some() {
            return;
        }
        tracing::debug!(path = %self.inner.path, %error, "cancelling call");
        record_status(&self.inner.final_status, CallStatus::from_error(&error));
        self.inner.combiner.cancel(error.clone());
        self.start_batch(OpBatch::new().cancel_stream(error));
    }

    /// Send one request, half-close, and wait for the response and status.
    pub async fn unary(&self, request: impl Into<Bytes>) -> UnaryResponse {
        let (msg_tx, msg_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        let message = RecvSlot::new();
        let received = message.clone();
        let batch = OpBatch::new()
            .send_initial_metadata(Metadata::new())
            .send_message(request)
            .send_trailing_metadata(Metadata::new())
            .recv_initial_metadata(RecvSlot::new(), Closure::noop("unary recv_initial_metadata_ready"))
            .recv_message(
                message,
                Closure::new("unary recv_message_ready", move |_| {
                    let _ = msg_tx.send(received.take());
                }),
            )
            .recv_trailing_metadata(
                RecvSlot::new(),
                Closure::new("unary recv_trailing_metadata_ready", move |_| {
                    let _ = done_tx.send(());
                }),
            );
        self.start_batch(batch);

        let message = msg_rx.await.ok().flatten();
        let _ = done_rx.await;
        let status = self.final_status().unwrap_or_else(|| {
            CallStatus::new(StatusCode::Internal, "call completed without a status")
        });
        UnaryResponse { message, status }
    }

    fn trailing_wrapper(&self, slot: RecvSlot<Metadata>, user: Closure) -> Closure {
        let combiner = Arc::clone(&self.inner.combiner);
        let final_status = Arc::clone(&self.inner.final_status);
        Closure::new("surface recv_trailing_metadata_ready", move |error| {
            let status = slot.with(|md| CallStatus::from_trailing(error.as_ref(), md));
            record_status(&final_status, status);
            user.run(error);
            combiner.stop("surface recv_trailing_metadata_ready");
        })
    }

    /// A failed send cancels the call with the failure.
    fn on_complete_wrapper(&self, user: Option<Closure>, sends_message: bool) -> Closure {
        let combiner = Arc::clone(&self.inner.combiner);
        let call: Weak<CallInner> = Arc::downgrade(&self.inner);
        Closure::new("surface on_complete", move |error| {
            if let Some(user) = user {
                user.run(error.clone());
            }
            if let (true, Some(error), Some(inner)) = (sends_message, error, call.upgrade()) {
                Call { inner }.cancel_with_error(error);
            }
            combiner.stop("surface on_complete");
        })
    }
}

impl Drop for CallInner {
    fn drop(&mut self) {
        if self.combiner.cancel_error().is_some() {
            return;
        }
        let error = CallError::cancelled();
        tracing::debug!(path = %self.path, "call dropped, cancelling stream");
        self.combiner.cancel(error.clone());
        // Keeps the elements alive until their parked closures have run.
        let stack = Arc::clone(&self.stack);
        self.combiner.start(
            Closure::new("surface teardown", move |_| {
                stack.start_batch(OpBatch::new().cancel_stream(error))
            }),
            None,
            "call teardown",
        );
    }
}

fn yield_after(user: Closure, combiner: &Arc<CallCombiner>, reason: &'static str) -> Closure {
    let combiner = Arc::clone(combiner);
    Closure::new(reason, move |error| {
        user.run(error);
        combiner.stop(reason);
    })
}
