//! Dedicated runtime for async tools.
//!
//! A single-threaded tokio runtime parked on its own OS thread. Blocking
//! callers spawn a future onto it and wait on a [`Handoff`] with a deadline,
//! so an async tool never needs the caller's thread to be inside a runtime.

use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;
use tracing::{debug, error};

use super::handoff::Handoff;
use super::types::BridgeError;

/// Owned runtime for driving async tools from blocking threads
pub struct ToolRuntime {
    handle: Handle,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ToolRuntime {
    /// Start the runtime thread.
    pub fn start() -> Result<Self, BridgeError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                error!(error = %e, "Failed to build tool runtime");
                BridgeError::NoExecutionContext(format!("failed to build tool runtime: {e}"))
            })?;
        let handle = runtime.handle().clone();
        let (stop, stopped) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("orderflow-tools".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = stopped.await;
                });
                debug!("Tool runtime stopped");
            })
            .map_err(|e| {
                error!(error = %e, "Failed to spawn tool runtime thread");
                BridgeError::NoExecutionContext(format!("failed to spawn tool runtime: {e}"))
            })?;

        Ok(Self {
            handle,
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    /// Drive `future` to completion on the tool runtime, blocking the
    /// calling thread for at most `timeout`. `None` on timeout, in which
    /// case the future is aborted.
    pub fn run<F>(&self, future: F, timeout: Duration) -> Option<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let slot = Arc::new(Handoff::new());
        let filler = Arc::clone(&slot);
        let task = self.handle.spawn(async move {
            filler.fill(future.await);
        });

        let output = blocking_wait(|| slot.take_timeout(timeout));
        if output.is_none() {
            task.abort();
        }
        output
    }
}

impl Drop for ToolRuntime {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        // Detached: the thread exits as soon as the stop signal lands.
        drop(self.thread.take());
    }
}

impl std::fmt::Debug for ToolRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRuntime").finish_non_exhaustive()
    }
}

/// Block the current thread in `f`.
///
/// On a multi-threaded runtime the wait goes through `block_in_place` so a
/// worker thread hands its queued tasks off before blocking; blocking-pool
/// and plain threads just run `f`.
pub(crate) fn blocking_wait<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}
