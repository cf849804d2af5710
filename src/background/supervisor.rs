//! Supervised fire-and-forget work spawned from request handlers.
//!
//! Every unit is counted from the moment it is spawned until it finishes or
//! panics, so shutdown can wait for the count to reach zero. A panicking unit
//! is logged and otherwise ignored.

use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    idle: Notify,
    outstanding: AtomicUsize,
    panicked: AtomicU64,
}

/// Decrements the outstanding count when the unit is dropped, however it ends.
struct OutstandingGuard(Arc<Inner>);

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        if self.0.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[derive(Clone, Default)]
pub struct TaskSupervisor {
    inner: Arc<Inner>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` on its own tokio task. Never blocks and never fails.
    pub fn spawn<F>(&self, name: &'static str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        let guard = OutstandingGuard(Arc::clone(&self.inner));

        tokio::spawn(async move {
            let guard = guard;
            if let Err(payload) = AssertUnwindSafe(work).catch_unwind().await {
                guard.0.panicked.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    task = name,
                    panic = %panic_message(payload.as_ref()),
                    "Background task panicked"
                );
            }
        });
    }

    /// Units spawned but not yet finished
    pub fn outstanding_count(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Units that ended in a panic since startup
    pub fn panicked_count(&self) -> u64 {
        self.inner.panicked.load(Ordering::Relaxed)
    }

    /// Wait until no spawned unit is outstanding.
    ///
    /// Callers stop producing new work first; units spawned while draining
    /// are waited for too, but a steady stream of them can keep this pending.
    pub async fn drain(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a completion in between is not missed
            notified.as_mut().enable();

            if self.outstanding_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
