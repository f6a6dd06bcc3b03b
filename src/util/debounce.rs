//! Restartable one-shot timer used to coalesce bursts of trigger events.
//!
//! [`Debouncer::reset`] cancels any pending fire and schedules a new one after
//! the quiet window. Once the window elapses the action runs exactly once on
//! the blocking pool and the debouncer goes idle until the next reset. An
//! action that has already started is never interrupted.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

type Action = Arc<dyn Fn() + Send + Sync + 'static>;

pub struct Debouncer {
    action: Action,
    quiet: Duration,
    runtime: Handle,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Creates an idle debouncer. Nothing is scheduled until [`reset`](Self::reset).
    ///
    /// `runtime` is the Tokio runtime the timer lives on; `reset` may be called
    /// from any thread, including non-runtime threads such as a file watcher's.
    pub fn new<F>(runtime: Handle, quiet: Duration, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            action: Arc::new(action),
            quiet,
            runtime,
            pending: Mutex::new(None),
        }
    }

    /// Cancels a not-yet-fired action and schedules a fresh one.
    pub fn reset(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = pending.take() {
            handle.abort();
        }

        let action = Arc::clone(&self.action);
        let quiet = self.quiet;
        *pending = Some(self.runtime.spawn(async move {
            tokio::time::sleep(quiet).await;
            // Detached from this task so a later abort() cannot cut it short.
            tokio::task::spawn_blocking(move || action());
        }));
        tracing::debug!(quiet_ms = quiet.as_millis() as u64, "Debounce timer reset");
    }

    /// Cancels a pending fire, if any. Already running actions finish.
    pub fn stop(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = pending.take() {
            handle.abort();
        }
    }

    /// Returns true while a fire is scheduled but has not happened yet.
    pub fn is_pending(&self) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("quiet", &self.quiet)
            .field("pending", &self.is_pending())
            .finish()
    }
}
