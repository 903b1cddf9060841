//! Per-thread execution context.
//!
//! The first [`ExecCtx::run`] on a thread executes its closure inline, then
//! drains every closure scheduled while it ran. Nested calls only enqueue, so
//! chains of hand-offs (combiner stop -> next closure -> stop -> ...) run as a
//! loop instead of growing the stack.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::closure::Closure;
use crate::error::CallError;

type Pending = VecDeque<(Closure, Option<CallError>)>;

thread_local! {
    // Some(_) while a drain loop is active on this thread.
    static PENDING: RefCell<Option<Pending>> = const { RefCell::new(None) };
}

pub struct ExecCtx;

impl ExecCtx {
    /// Run `closure` now, or after the closure currently executing on this thread.
    pub fn run(closure: Closure, error: Option<CallError>) {
        let deferred = PENDING.with(|p| {
            let mut p = p.borrow_mut();
            match p.as_mut() {
                Some(queue) => {
                    queue.push_back((closure, error));
                    None
                }
                None => {
                    *p = Some(VecDeque::new());
                    Some((closure, error))
                }
            }
        });

        let Some((closure, error)) = deferred else {
            return;
        };

        let _guard = DrainGuard;
        closure.run(error);
        while let Some((next, err)) = PENDING.with(|p| p.borrow_mut().as_mut().and_then(|q| q.pop_front())) {
            next.run(err);
        }
    }

    /// Whether a drain loop is active on this thread.
    pub fn is_active() -> bool {
        PENDING.with(|p| p.borrow().is_some())
    }
}

// Resets the thread state even if a closure unwinds.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let leftover = PENDING.with(|p| p.borrow_mut().take());
        if let Some(leftover) = leftover {
            if !leftover.is_empty() {
                tracing::error!(count = leftover.len(), "exec ctx unwound with pending closures");
            }
        }
    }
}
