//! Per-call execution serializer.
//!
//! Every closure touching a call's filter state runs while holding that call's
//! combiner. `start` acquires it (or queues behind the holder), `stop` hands it
//! to the next queued closure in FIFO order. The holder yields exactly once,
//! either by calling `stop` or by passing the hold on to another closure.
//!
//! Mutable call state guarded by `std::sync::Mutex` is therefore never
//! contended; the locks only make the state `Sync`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::closure::Closure;
use crate::error::CallError;
use crate::exec_ctx::ExecCtx;

struct Queued {
    closure: Closure,
    error: Option<CallError>,
    reason: &'static str,
}

#[derive(Default)]
struct State {
    active: bool,
    queue: VecDeque<Queued>,
    cancel_error: Option<CallError>,
    notify_on_cancel: Option<Closure>,
}

#[derive(Default)]
pub struct CallCombiner {
    state: Mutex<State>,
}

impl CallCombiner {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock means a closure panicked; the queue itself is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `closure` holding the combiner, queueing it if another closure holds it.
    pub fn start(&self, closure: Closure, error: Option<CallError>, reason: &'static str) {
        let mut st = self.lock();
        if st.active {
            st.queue.push_back(Queued { closure, error, reason });
            tracing::trace!(reason, queued = st.queue.len(), "call combiner busy, closure queued");
            return;
        }
        st.active = true;
        drop(st);
        tracing::trace!(reason, "call combiner acquired");
        ExecCtx::run(closure, error);
    }

    /// Yield the combiner. The next queued closure, if any, inherits it.
    pub fn stop(&self, reason: &'static str) {
        let mut st = self.lock();
        if !st.active {
            tracing::error!(reason, "call combiner stop without a holder");
            return;
        }
        match st.queue.pop_front() {
            Some(next) => {
                drop(st);
                tracing::trace!(reason, next = next.reason, "call combiner handed off");
                ExecCtx::run(next.closure, next.error);
            }
            None => {
                st.active = false;
                tracing::trace!(reason, "call combiner idle");
            }
        }
    }

    /// Whether some closure currently holds the combiner.
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Record cancellation. Only the first error sticks.
    pub fn cancel(&self, error: CallError) {
        let mut st = self.lock();
        if st.cancel_error.is_some() {
            return;
        }
        st.cancel_error = Some(error.clone());
        let notify = st.notify_on_cancel.take();
        drop(st);
        tracing::debug!(%error, "call combiner cancelled");
        if let Some(closure) = notify {
            ExecCtx::run(closure, Some(error));
        }
    }

    pub fn cancel_error(&self) -> Option<CallError> {
        self.lock().cancel_error.clone()
    }

    /// Register a closure to run when the call is cancelled.
    ///
    /// Already cancelled: `closure` runs right away with the cancellation error.
    /// Otherwise it replaces the previous registration, which runs with no error.
    /// Passing `None` clears the registration.
    pub fn set_notify_on_cancel(&self, closure: Option<Closure>) {
        let mut st = self.lock();
        if let Some(error) = st.cancel_error.clone() {
            drop(st);
            if let Some(closure) = closure {
                ExecCtx::run(closure, Some(error));
            }
            return;
        }
        let prev = std::mem::replace(&mut st.notify_on_cancel, closure);
        drop(st);
        if let Some(prev) = prev {
            ExecCtx::run(prev, None);
        }
    }
}

/// Fails anything still queued with the cancellation error.
///
/// Filter and surface closures capture the combiner, so a non-empty queue
/// normally keeps it alive; calls are torn down by cancelling their stream
/// instead. This only catches closures queued by code holding no such
/// reference.
impl Drop for CallCombiner {
    fn drop(&mut self) {
        let st = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        let queue = std::mem::take(&mut st.queue);
        let notify = st.notify_on_cancel.take();
        let cancel = st.cancel_error.clone().unwrap_or_else(CallError::cancelled);

        if !queue.is_empty() {
            tracing::warn!(count = queue.len(), "call combiner dropped with queued closures");
        }
        for q in queue {
            let error = CallError::compose(q.error, Some(cancel.clone()));
            ExecCtx::run(q.closure, error);
        }
        if let Some(closure) = notify {
            ExecCtx::run(closure, None);
        }
    }
}

/// Closures to be run on behalf of one batch.
///
/// [`run_closures`](Self::run_closures) starts all but the first through the
/// combiner and runs the first directly, so it inherits the caller's hold.
#[derive(Default)]
pub struct CallCombinerClosureList {
    closures: Vec<Queued>,
}

impl CallCombinerClosureList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, closure: Closure, error: Option<CallError>, reason: &'static str) {
        self.closures.push(Queued { closure, error, reason });
    }

    pub fn len(&self) -> usize {
        self.closures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closures.is_empty()
    }

    /// Move every closure of `other` to the end of this list.
    pub fn extend(&mut self, other: CallCombinerClosureList) {
        self.closures.extend(other.closures);
    }

    /// Run every closure and give up the caller's hold.
    ///
    /// Must be called while holding `combiner`. With no closures the hold is
    /// released right away.
    pub fn run_closures(self, combiner: &CallCombiner) {
        let mut it = self.closures.into_iter();
        let Some(first) = it.next() else {
            combiner.stop("no closures to run");
            return;
        };
        for q in it {
            combiner.start(q.closure, q.error, q.reason);
        }
        tracing::trace!(reason = first.reason, "running closure with inherited hold");
        ExecCtx::run(first.closure, first.error);
    }

    /// Start every closure through the combiner, keeping the caller's hold.
    pub fn run_closures_without_yielding(self, combiner: &CallCombiner) {
        for q in self.closures {
            combiner.start(q.closure, q.error, q.reason);
        }
    }
}
