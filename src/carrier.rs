// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Blocking bridge onto a dedicated single-threaded tokio runtime.
//!
//! An [`EventLoopCarrier`] owns one background OS thread running a
//! current-thread runtime. Synchronous callers submit futures with
//! [`EventLoopCarrier::run`] and block until the future completes or the
//! deadline passes. Completion is delivered over a `flume` channel, which
//! can be awaited on the runtime side and waited on with a timeout from
//! plain threads.
//!
//! ```text
//! caller thread                       carrier thread (current_thread rt)
//! ─────────────                       ───────────────────────────────────
//! run(timeout, fut) ── spawn ───────► task: fut.await
//!      │                                   │
//!      └── recv_timeout ◄──── flume ───────┘ JoinHandle output
//! ```
//!
//! Every resource created while running on a carrier (sockets, child
//! processes, spawned reader tasks) stays on that carrier's thread and is
//! dropped when the carrier stops.

use std::future::Future;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;

/// Default bound on joining the carrier thread during [`EventLoopCarrier::stop`].
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll interval while waiting for the carrier thread to exit.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Errors raised by the carrier itself, as opposed to the work it runs.
#[derive(Error, Debug)]
pub enum CarrierError {
    #[error("Failed to start carrier '{name}': {message}")]
    Spawn { name: String, message: String },

    #[error("Carrier stopped")]
    Stopped,

    #[error("Blocking run called from the carrier's own thread")]
    Reentrant,

    #[error("Timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("Task cancelled before completion")]
    TaskCancelled,

    #[error("Carrier thread '{name}' did not exit within {}ms", .timeout.as_millis())]
    JoinTimeout { name: String, timeout: Duration },
}

/// Live state of a started carrier.
struct Running {
    handle: Handle,
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<()>,
    thread_id: ThreadId,
}

/// A background thread running a cooperative scheduler, with a blocking
/// submit-and-wait bridge.
pub struct EventLoopCarrier {
    /// Carrier name (used for the thread name and logs).
    name: String,

    /// Bound on joining the thread during `stop`.
    join_timeout: Duration,

    /// Present while the thread is running.
    running: Mutex<Option<Running>>,
}

impl EventLoopCarrier {
    /// Create a carrier. The thread is not spawned until [`start`](Self::start).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            running: Mutex::new(None),
        }
    }

    /// Set the bound on joining the thread during `stop`.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Get the carrier name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the background thread is running.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.thread.is_finished())
    }

    /// Spawn the background thread if it is not already running.
    pub fn start(&self) -> Result<(), CarrierError> {
        let mut running = self.running.lock();

        if let Some(current) = running.as_ref() {
            if !current.thread.is_finished() {
                return Ok(());
            }
        }
        // A thread that exited on its own leaves a stale entry behind.
        if let Some(stale) = running.take() {
            let _ = stale.thread.join();
        }

        let (ready_tx, ready_rx) = flume::bounded::<Result<Handle, String>>(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let name = self.name.clone();

        let thread = thread::Builder::new()
            .name(format!("toolbridge-{}", self.name))
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(runtime.handle().clone()));

                // Park on the shutdown signal; spawned work runs meanwhile.
                // A dropped sender counts as a shutdown request.
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });

                tracing::debug!(carrier = %name, "carrier loop exiting");
                runtime.shutdown_timeout(Duration::from_millis(500));
            })
            .map_err(|e| CarrierError::Spawn {
                name: self.name.clone(),
                message: e.to_string(),
            })?;

        let handle = match ready_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(message)) => {
                let _ = thread.join();
                return Err(CarrierError::Spawn {
                    name: self.name.clone(),
                    message,
                });
            }
            Err(_) => {
                let _ = thread.join();
                return Err(CarrierError::Spawn {
                    name: self.name.clone(),
                    message: "carrier thread exited during startup".to_string(),
                });
            }
        };

        let thread_id = thread.thread().id();
        *running = Some(Running {
            handle,
            shutdown: shutdown_tx,
            thread,
            thread_id,
        });

        tracing::debug!(carrier = %self.name, "carrier started");
        Ok(())
    }

    /// Run `work` on the carrier and block until it completes or `timeout`
    /// elapses.
    ///
    /// Errors returned by `work` are passed through unchanged. On timeout the
    /// task is aborted at its next await point; the abort is best-effort.
    pub fn run<F, T, E>(&self, timeout: Duration, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<CarrierError> + Send + 'static,
    {
        let handle = {
            let running = self.running.lock();
            let running = running.as_ref().ok_or(CarrierError::Stopped)?;
            if thread::current().id() == running.thread_id {
                return Err(CarrierError::Reentrant.into());
            }
            running.handle.clone()
        };

        let (done_tx, done_rx) = flume::bounded(1);
        let task = handle.spawn(work);
        let abort = task.abort_handle();

        // Forward the JoinHandle's output so panics surface as values.
        handle.spawn(async move {
            let _ = done_tx.send_async(task.await).await;
        });

        match done_rx.recv_timeout(timeout) {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => {
                let payload = join_err.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                Err(CarrierError::TaskPanicked(message).into())
            }
            Ok(Err(_)) => Err(CarrierError::TaskCancelled.into()),
            Err(flume::RecvTimeoutError::Timeout) => {
                abort.abort();
                tracing::debug!(
                    carrier = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "unit of work timed out, abort requested"
                );
                Err(CarrierError::TimedOut(timeout).into())
            }
            // The runtime shut down and dropped the forwarding task.
            Err(flume::RecvTimeoutError::Disconnected) => Err(CarrierError::Stopped.into()),
        }
    }

    /// Stop the scheduler and join the thread, waiting at most the join timeout.
    pub fn stop(&self) -> Result<(), CarrierError> {
        let running = {
            let mut guard = self.running.lock();
            match guard.as_ref() {
                None => return Ok(()),
                Some(r) if thread::current().id() == r.thread_id => {
                    return Err(CarrierError::Reentrant);
                }
                Some(_) => {}
            }
            guard.take()
        };

        let Some(running) = running else {
            return Ok(());
        };

        let _ = running.shutdown.send(());

        let deadline = Instant::now() + self.join_timeout;
        while !running.thread.is_finished() {
            if Instant::now() >= deadline {
                tracing::error!(
                    carrier = %self.name,
                    timeout_ms = self.join_timeout.as_millis() as u64,
                    "carrier thread did not exit; leaking it"
                );
                return Err(CarrierError::JoinTimeout {
                    name: self.name.clone(),
                    timeout: self.join_timeout,
                });
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        let _ = running.thread.join();
        tracing::debug!(carrier = %self.name, "carrier stopped");
        Ok(())
    }
}

impl Drop for EventLoopCarrier {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!(carrier = %self.name, error = %e, "carrier stop failed during drop");
        }
    }
}

impl std::fmt::Debug for EventLoopCarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopCarrier")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("work failed: {0}")]
        Work(String),
        #[error(transparent)]
        Carrier(#[from] CarrierError),
    }

    fn started(name: &str) -> EventLoopCarrier {
        let carrier = EventLoopCarrier::new(name);
        carrier.start().unwrap();
        carrier
    }

    #[test]
    fn test_start_is_idempotent() {
        let carrier = EventLoopCarrier::new("idempotent");
        assert!(!carrier.is_running());
        carrier.start().unwrap();
        carrier.start().unwrap();
        assert!(carrier.is_running());
        carrier.stop().unwrap();
        assert!(!carrier.is_running());
    }

    #[test]
    fn test_run_returns_value() {
        let carrier = started("value");
        let value: Result<u32, TestError> =
            carrier.run(Duration::from_secs(1), async { Ok(41 + 1) });
        assert_eq!(value.unwrap(), 42);
    }

    #[test]
    fn test_run_passes_errors_through() {
        let carrier = started("errors");
        let result: Result<(), TestError> = carrier.run(Duration::from_secs(1), async {
            Err(TestError::Work("boom".to_string()))
        });
        assert!(matches!(result, Err(TestError::Work(msg)) if msg == "boom"));
    }

    #[test]
    fn test_run_executes_on_carrier_thread() {
        let carrier = started("thread");
        let caller = thread::current().id();
        let worker: Result<ThreadId, TestError> = carrier.run(Duration::from_secs(1), async {
            Ok(thread::current().id())
        });
        assert_ne!(worker.unwrap(), caller);
    }

    #[test]
    fn test_run_times_out() {
        let carrier = started("timeout");
        let start = Instant::now();
        let result: Result<(), TestError> = carrier.run(Duration::from_millis(50), async {
            std::future::pending::<()>().await;
            Ok(())
        });
        assert!(matches!(
            result,
            Err(TestError::Carrier(CarrierError::TimedOut(_)))
        ));
        assert!(start.elapsed() < Duration::from_secs(1));

        // The carrier keeps serving after a timed-out unit.
        let value: Result<u8, TestError> = carrier.run(Duration::from_secs(1), async { Ok(7) });
        assert_eq!(value.unwrap(), 7);
    }

    #[test]
    fn test_run_surfaces_panics() {
        let carrier = started("panic");
        let explode = true;
        let result: Result<(), TestError> = carrier.run(Duration::from_secs(1), async move {
            if explode {
                panic!("exploded");
            }
            Ok(())
        });
        match result {
            Err(TestError::Carrier(CarrierError::TaskPanicked(msg))) => {
                assert!(msg.contains("exploded"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_run_after_stop_fails() {
        let carrier = started("stopped");
        carrier.stop().unwrap();
        let result: Result<(), TestError> = carrier.run(Duration::from_secs(1), async { Ok(()) });
        assert!(matches!(
            result,
            Err(TestError::Carrier(CarrierError::Stopped))
        ));
    }

    #[test]
    fn test_stop_is_idempotent_and_restartable() {
        let carrier = started("restart");
        carrier.stop().unwrap();
        carrier.stop().unwrap();
        carrier.start().unwrap();
        let value: Result<&str, TestError> =
            carrier.run(Duration::from_secs(1), async { Ok("again") });
        assert_eq!(value.unwrap(), "again");
    }

    #[test]
    fn test_reentrant_run_is_rejected() {
        let carrier = Arc::new(started("reentrant"));
        let inner = Arc::clone(&carrier);
        let result: Result<Result<(), TestError>, TestError> =
            carrier.run(Duration::from_secs(1), async move {
                Ok(inner.run(Duration::from_secs(1), async { Ok(()) }))
            });
        assert!(matches!(
            result.unwrap(),
            Err(TestError::Carrier(CarrierError::Reentrant))
        ));
    }

    #[test]
    fn test_concurrent_runs_from_many_threads() {
        let carrier = Arc::new(started("concurrent"));
        let handles: Vec<_> = (0..16u64)
            .map(|i| {
                let carrier = Arc::clone(&carrier);
                thread::spawn(move || {
                    let result: Result<u64, TestError> =
                        carrier.run(Duration::from_secs(5), async move {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            Ok(i * 2)
                        });
                    result.unwrap()
                })
            })
            .collect();

        let mut results: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort_unstable();
        assert_eq!(results, (0..16u64).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_stop_reports_join_timeout() {
        let carrier = EventLoopCarrier::new("stuck").with_join_timeout(Duration::from_millis(20));
        carrier.start().unwrap();

        // Block the carrier thread itself so it cannot observe the shutdown signal.
        let _: Result<(), TestError> = carrier.run(Duration::from_millis(10), async {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        });

        let result = carrier.stop();
        assert!(matches!(result, Err(CarrierError::JoinTimeout { .. })));
    }
}
