//! Signal-driven graceful shutdown.
//!
//! `Running -> Draining -> Stopped`: on a termination signal the listener is
//! told to stop accepting and given a grace period to finish in-flight
//! requests, then supervised background work is drained. The two steps run
//! in that order because in-flight requests may still spawn background work.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tracing::{error, info};

use crate::background::TaskSupervisor;

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("Shutdown coordinator already started")]
    AlreadyStarted,
    #[error("Listener failed: {0}")]
    Listener(#[from] std::io::Error),
    #[error("Listener task failed: {0}")]
    ListenerTask(#[from] JoinError),
    #[error("In-flight requests did not finish within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ShutdownState {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

impl ShutdownState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ShutdownState::Running,
            1 => ShutdownState::Draining,
            _ => ShutdownState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownState::Running => "running",
            ShutdownState::Draining => "draining",
            ShutdownState::Stopped => "stopped",
        }
    }
}

/// Read-only view of the coordinator's state, cheap to clone into handlers.
#[derive(Clone)]
pub struct ShutdownStatus(Arc<AtomicU8>);

impl ShutdownStatus {
    pub fn get(&self) -> ShutdownState {
        ShutdownState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move forward to `next`; never moves backwards.
    fn advance(&self, next: ShutdownState) {
        self.0.fetch_max(next as u8, Ordering::AcqRel);
    }
}

/// Resolves when the coordinator asks the listener to stop accepting.
pub struct StopSignal(oneshot::Receiver<()>);

impl StopSignal {
    pub async fn wait(self) {
        // A dropped sender also means stop
        let _ = self.0.await;
    }
}

/// Something that accepts inbound work until told to stop.
///
/// After `stop` resolves the implementation stops accepting new connections,
/// finishes the in-flight ones and returns.
pub trait Listener: Send + 'static {
    fn serve(
        self,
        stop: StopSignal,
    ) -> impl Future<Output = std::io::Result<()>> + Send + 'static;
}

pub struct ShutdownCoordinator {
    grace: Duration,
    status: ShutdownStatus,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            status: ShutdownStatus(Arc::new(AtomicU8::new(ShutdownState::Running as u8))),
        }
    }

    pub fn status(&self) -> ShutdownStatus {
        self.status.clone()
    }

    pub fn state(&self) -> ShutdownState {
        self.status.get()
    }

    /// Serve `listener` until `signal` resolves, then shut down gracefully.
    ///
    /// Returns once the listener has stopped and every supervised task has
    /// finished. A listener that overruns the grace period yields
    /// [`ShutdownError::Timeout`], but background work is still drained first.
    pub async fn run<S, L>(
        &self,
        signal: S,
        listener: L,
        supervisor: &TaskSupervisor,
    ) -> Result<(), ShutdownError>
    where
        S: Future<Output = ()>,
        L: Listener,
    {
        if self.status.get() != ShutdownState::Running {
            return Err(ShutdownError::AlreadyStarted);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let mut server = tokio::spawn(listener.serve(StopSignal(stop_rx)));

        tokio::pin!(signal);
        let early_exit = tokio::select! {
            _ = &mut signal => None,
            joined = &mut server => Some(joined),
        };

        self.status.advance(ShutdownState::Draining);

        let listener_result = match early_exit {
            Some(joined) => {
                error!("Listener stopped before any shutdown signal");
                flatten(joined)
            }
            None => {
                info!(grace_seconds = self.grace.as_secs_f64(), "Stopping listener");
                let _ = stop_tx.send(());

                match tokio::time::timeout(self.grace, &mut server).await {
                    Ok(joined) => flatten(joined),
                    Err(_) => {
                        server.abort();
                        error!(
                            grace_seconds = self.grace.as_secs_f64(),
                            "In-flight requests did not finish within the grace period"
                        );
                        Err(ShutdownError::Timeout(self.grace))
                    }
                }
            }
        };

        info!(
            outstanding = supervisor.outstanding_count(),
            "Completing background tasks"
        );
        supervisor.drain().await;

        self.status.advance(ShutdownState::Stopped);
        info!("Shutdown drained");
        listener_result
    }
}

fn flatten(joined: Result<std::io::Result<()>, JoinError>) -> Result<(), ShutdownError> {
    Ok(joined??)
}

/// Resolves on Ctrl+C / SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(signal = "interrupt", "Shutdown signal received"),
        _ = terminate => info!(signal = "terminate", "Shutdown signal received"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    /// Simulates a server with one request in flight when the stop arrives;
    /// that request schedules background work before it completes.
    struct InFlightListener {
        supervisor: TaskSupervisor,
        work_done: Arc<AtomicBool>,
    }

    impl Listener for InFlightListener {
        async fn serve(self, stop: StopSignal) -> std::io::Result<()> {
            stop.wait().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            let done = Arc::clone(&self.work_done);
            self.supervisor.spawn("late-work", async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                done.store(true, Ordering::SeqCst);
            });
            Ok(())
        }
    }

    struct StuckListener;

    impl Listener for StuckListener {
        async fn serve(self, stop: StopSignal) -> std::io::Result<()> {
            stop.wait().await;
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct FailingListener;

    impl Listener for FailingListener {
        async fn serve(self, _stop: StopSignal) -> std::io::Result<()> {
            Err(std::io::Error::other("accept failed"))
        }
    }

    #[tokio::test]
    async fn test_run_drains_work_spawned_by_in_flight_requests() {
        let supervisor = TaskSupervisor::new();
        let work_done = Arc::new(AtomicBool::new(false));
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let status = coordinator.status();
        assert_eq!(status.get(), ShutdownState::Running);

        let (signal_tx, signal_rx) = oneshot::channel::<()>();
        let listener = InFlightListener {
            supervisor: supervisor.clone(),
            work_done: Arc::clone(&work_done),
        };

        let run = tokio::spawn({
            let supervisor = supervisor.clone();
            async move {
                coordinator
                    .run(
                        async {
                            let _ = signal_rx.await;
                        },
                        listener,
                        &supervisor,
                    )
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!run.is_finished());
        assert_eq!(status.get(), ShutdownState::Running);

        signal_tx.send(()).unwrap();
        run.await.unwrap().unwrap();

        assert!(work_done.load(Ordering::SeqCst));
        assert_eq!(supervisor.outstanding_count(), 0);
        assert_eq!(status.get(), ShutdownState::Stopped);
    }

    #[tokio::test]
    async fn test_run_reports_timeout_but_still_drains() {
        let supervisor = TaskSupervisor::new();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        supervisor.spawn("pending-mail", async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        let result = coordinator
            .run(std::future::ready(()), StuckListener, &supervisor)
            .await;

        assert!(matches!(result, Err(ShutdownError::Timeout(_))));
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
    }

    #[tokio::test]
    async fn test_listener_error_is_propagated() {
        let supervisor = TaskSupervisor::new();
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));

        let result = coordinator
            .run(std::future::pending::<()>(), FailingListener, &supervisor)
            .await;

        assert!(matches!(result, Err(ShutdownError::Listener(_))));
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
    }

    #[tokio::test]
    async fn test_run_is_single_use() {
        let supervisor = TaskSupervisor::new();
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));

        let listener = InFlightListener {
            supervisor: supervisor.clone(),
            work_done: Arc::new(AtomicBool::new(false)),
        };
        coordinator
            .run(std::future::ready(()), listener, &supervisor)
            .await
            .unwrap();

        let again = coordinator
            .run(std::future::ready(()), StuckListener, &supervisor)
            .await;
        assert!(matches!(again, Err(ShutdownError::AlreadyStarted)));
    }

    #[test]
    fn test_state_only_moves_forward() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let status = coordinator.status();

        status.advance(ShutdownState::Stopped);
        status.advance(ShutdownState::Draining);
        assert_eq!(status.get(), ShutdownState::Stopped);
        assert_eq!(status.get().as_str(), "stopped");
    }
}
