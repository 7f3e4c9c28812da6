//! Cooperative shutdown for the consumer tasks
//!
//! The coordinator listens for SIGTERM/SIGINT and flips a watch channel.
//! Consumers hold a [`ShutdownHandle`] and check it between messages, so a
//! message that is already being processed always runs to completion. After
//! signalling, the coordinator waits up to the drain timeout for every
//! registered task to report completion.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

/// Default time allowed for consumers to finish their in-flight message
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_millis(DEFAULT_DRAIN_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Default)]
struct TaskCounts {
    registered: AtomicUsize,
    completed: AtomicUsize,
}

pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    shutdown_tx: watch::Sender<bool>,
    tasks: Arc<TaskCounts>,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            shutdown_tx,
            tasks: Arc::new(TaskCounts::default()),
        }
    }

    /// Register a task that should be waited for during shutdown
    pub fn register_task(&self, task_name: &str) -> ShutdownHandle {
        let total = self.tasks.registered.fetch_add(1, Ordering::SeqCst) + 1;
        info!(task_name = %task_name, total_tasks = total, "Task registered for shutdown");

        ShutdownHandle {
            task_name: task_name.to_string(),
            shutdown_rx: self.shutdown_tx.subscribe(),
            tasks: Arc::clone(&self.tasks),
        }
    }

    /// Signal every registered task to stop after its current message
    pub fn trigger(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("Shutdown triggered");
        }
    }

    /// Completes on SIGTERM or SIGINT (Ctrl+C elsewhere)
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        Ok(())
    }

    /// Wait until all registered tasks completed or the drain timeout passed
    ///
    /// Returns `true` when every task reported completion.
    pub async fn wait_for_tasks(&self) -> bool {
        let registered = self.tasks.registered.load(Ordering::SeqCst);
        let start = tokio::time::Instant::now();
        let deadline = start + self.config.drain_timeout;

        info!(
            timeout_ms = self.config.drain_timeout.as_millis() as u64,
            registered_tasks = registered,
            "Waiting for tasks to drain"
        );

        loop {
            let completed = self.tasks.completed.load(Ordering::SeqCst);
            if completed >= registered {
                info!(
                    completed_tasks = completed,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "All tasks completed"
                );
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    completed_tasks = completed,
                    remaining_tasks = registered - completed,
                    "Drain timeout exceeded"
                );
                return false;
            }

            sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(ShutdownConfig::default())
    }
}

/// Per-task view of the shutdown signal
#[derive(Clone)]
pub struct ShutdownHandle {
    task_name: String,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Arc<TaskCounts>,
}

impl ShutdownHandle {
    /// Non-blocking check, used between messages
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Report that this task has stopped
    pub fn notify_complete(&self) {
        let completed = self.tasks.completed.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            task_name = %self.task_name,
            completed_tasks = completed,
            registered_tasks = self.tasks.registered.load(Ordering::SeqCst),
            "Task completed shutdown"
        );
    }
}
