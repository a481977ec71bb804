//! Timer-driven work: debounced notification and deferred dispatch.
//!
//! Both run as `tokio` local tasks because the store is single-threaded
//! (`!Send`). Callers that enable either must drive the store from inside a
//! [`tokio::task::LocalSet`].
//!
//! # Debounce
//!
//! ```text
//! dispatch ─┐      dispatch ─┐      dispatch ─┐
//!           ▼                ▼                ▼
//!       schedule ──abort── schedule ──abort── schedule ──(period)──► notify
//! ```
//!
//! At most one notification is pending per store. Scheduling aborts the
//! previous one, so a burst delivers only the final state, once.
//!
//! Outside a `LocalSet` nothing is spawned and
//! [`StoreError::NoLocalRuntime`] is returned instead.

use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use futures::future::LocalBoxFuture;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::core::EventSelector;
use crate::error::{Result, StoreError};
use crate::store::WeakStore;

/// Spawn `task` on the current `LocalSet`.
///
/// `spawn_local` panics when no `LocalSet` is running; that panic is caught
/// and reported as `NoLocalRuntime`.
fn try_spawn_local<F>(task: F) -> Result<JoinHandle<()>>
where
    F: Future<Output = ()> + 'static,
{
    if tokio::runtime::Handle::try_current().is_err() {
        return Err(StoreError::NoLocalRuntime);
    }
    panic::catch_unwind(AssertUnwindSafe(|| tokio::task::spawn_local(task)))
        .map_err(|_| StoreError::NoLocalRuntime)
}

/// Holds the single pending debounced notification of a store.
#[derive(Default)]
pub(crate) struct DeferredNotifier {
    pending: RefCell<Option<JoinHandle<()>>>,
}

impl DeferredNotifier {
    pub fn new() -> Self {
        Self {
            pending: RefCell::new(None),
        }
    }

    /// Schedule a notification for `event_type` after `period`, replacing any
    /// pending one.
    pub fn schedule(&self, store: WeakStore, event_type: String, period: Duration) -> Result<()> {
        self.cancel();

        trace!(event_type = %event_type, ?period, "scheduling deferred notification");
        let handle = try_spawn_local(async move {
            tokio::time::sleep(period).await;
            match store.upgrade() {
                Some(store) => store.notify_now(&event_type),
                None => debug!("store dropped before deferred notification"),
            }
        })?;

        *self.pending.borrow_mut() = Some(handle);
        Ok(())
    }

    /// Abort the pending notification, if any.
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.borrow_mut().take() {
            handle.abort();
        }
    }

    /// Whether a notification is still waiting for its timer.
    pub fn is_pending(&self) -> bool {
        self.pending
            .borrow()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for DeferredNotifier {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for DeferredNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredNotifier")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Chain a dispatch to the resolution of `future`.
///
/// There is no caller left to receive an error once the future resolves, so
/// failures are logged.
pub(crate) fn dispatch_when_ready(
    store: WeakStore,
    future: LocalBoxFuture<'static, EventSelector>,
    payload: Value,
) -> Result<()> {
    try_spawn_local(async move {
        let selector = future.await;
        let Some(store) = store.upgrade() else {
            debug!(?selector, "store dropped before deferred dispatch resolved");
            return;
        };
        if let Err(e) = store.dispatch(selector, payload) {
            warn!(error = %e, "deferred dispatch failed");
        }
    })?;
    Ok(())
}
