//! Graceful Shutdown Manager
//!
//! Coordinates the end of a scheduler run (and of the daemon around it):
//! stop accepting work, cancel everything that was handed a token, then give
//! registered work a bounded amount of time to drain.
//!
//! ## Usage
//!
//! ```ignore
//! let shutdown = ShutdownController::with_timeout(Duration::from_secs(30));
//!
//! let token = shutdown.token();
//! let guard = shutdown.register_task();
//! tokio::spawn(async move {
//!     let _guard = guard;
//!     work(token).await;
//! });
//!
//! shutdown.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default drain timeout in seconds
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// How often the drain loop re-checks the active task count
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shutdown phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Shutdown initiated - new work is refused
    Stopping,
    /// Tokens cancelled, waiting for registered work to finish
    Draining,
    /// Drain timeout exceeded - remaining work is abandoned
    Terminating,
    /// Shutdown complete
    Terminated,
}

impl ShutdownPhase {
    fn from_u32(raw: u32) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Stopping,
            2 => Self::Draining,
            3 => Self::Terminating,
            _ => Self::Terminated,
        }
    }
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Draining => write!(f, "Draining"),
            Self::Terminating => write!(f, "Terminating"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Shutdown controller for coordinating graceful shutdown
pub struct ShutdownController {
    cancel_token: CancellationToken,
    phase: AtomicU32,
    shutdown_initiated: AtomicBool,
    active_tasks: AtomicU32,
    timeout: Duration,
}

impl ShutdownController {
    /// Create a controller with the default drain timeout
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS))
    }

    /// Create a controller with a custom drain timeout
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            cancel_token: CancellationToken::new(),
            phase: AtomicU32::new(ShutdownPhase::Running as u32),
            shutdown_initiated: AtomicBool::new(false),
            active_tasks: AtomicU32::new(0),
            timeout,
        })
    }

    /// Child token, cancelled when shutdown starts
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u32(self.phase.load(Ordering::SeqCst))
    }

    /// Whether new work may still be started
    #[must_use]
    pub fn is_accepting_work(&self) -> bool {
        self.phase() == ShutdownPhase::Running
    }

    /// Register a unit of work the drain phase has to wait for.
    ///
    /// The guard owns a reference to the controller so it can travel into a
    /// spawned task.
    pub fn register_task(self: &Arc<Self>) -> TaskGuard {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            controller: Arc::clone(self),
        }
    }

    /// Number of registered units still running
    #[must_use]
    pub fn active_task_count(&self) -> u32 {
        self.active_tasks.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.store(phase as u32, Ordering::SeqCst);
        debug!(phase = %phase, "Shutdown phase changed");
    }

    /// Initiate graceful shutdown
    ///
    /// 1. Refuse new work
    /// 2. Cancel every token handed out
    /// 3. Wait for registered work, at most `timeout`
    ///
    /// Returns the number of units still active when the wait ended.
    pub async fn shutdown(&self) -> u32 {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already initiated");
            return self.active_task_count();
        }

        info!(
            active_tasks = self.active_task_count(),
            timeout_ms = self.timeout.as_millis() as u64,
            "Initiating graceful shutdown"
        );

        self.set_phase(ShutdownPhase::Stopping);
        self.set_phase(ShutdownPhase::Draining);
        self.cancel_token.cancel();

        let drain_start = std::time::Instant::now();
        let remaining = loop {
            let active = self.active_task_count();
            if active == 0 {
                debug!("All registered tasks drained");
                break 0;
            }

            let elapsed = drain_start.elapsed();
            if elapsed >= self.timeout {
                warn!(
                    active_tasks = active,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Shutdown timeout exceeded, abandoning remaining tasks"
                );
                self.set_phase(ShutdownPhase::Terminating);
                break active;
            }

            tokio::time::sleep(DRAIN_POLL_INTERVAL.min(self.timeout - elapsed)).await;
        };

        self.set_phase(ShutdownPhase::Terminated);
        info!(remaining, "Shutdown complete");
        remaining
    }
}

/// Guard for tracking active tasks
///
/// Decrements the active task count when dropped.
pub struct TaskGuard {
    controller: Arc<ShutdownController>,
}

impl TaskGuard {
    /// Child token of the controller
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.controller.token()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.controller.active_tasks.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
