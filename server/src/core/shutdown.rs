//! Centralized shutdown management

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use super::constants::SHUTDOWN_TIMEOUT_SECS;
use crate::data::SqliteService;

/// Coordinates graceful shutdown of background tasks and the database
#[derive(Clone)]
pub struct ShutdownService {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    database: Arc<SqliteService>,
}

impl ShutdownService {
    pub fn new(database: Arc<SqliteService>) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
            handles: Arc::new(Mutex::new(Vec::new())),
            database,
        }
    }

    /// Register a background task handle to be awaited during shutdown
    pub async fn register(&self, handle: JoinHandle<()>) {
        self.handles.lock().await.push(handle);
    }

    pub async fn register_all(&self, handles: impl IntoIterator<Item = JoinHandle<()>>) {
        self.handles.lock().await.extend(handles);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Trigger shutdown and wait for registered tasks
    ///
    /// Order:
    /// 1. Signal all tasks to stop reading new records
    /// 2. Wait for consumers and backend workers to flush pending batches
    /// 3. Checkpoint and close the debug history database
    pub async fn shutdown(&self) {
        tracing::debug!("Initiating graceful shutdown...");
        self.trigger();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        tracing::debug!(count = handles.len(), "Waiting for background tasks to finish...");

        let timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(_) => tracing::debug!("All background tasks completed"),
            Err(_) => tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Timeout waiting for background tasks"
            ),
        }

        if let Err(e) = self.database.checkpoint().await {
            tracing::warn!(error = %e, "SQLite checkpoint failed");
        }
        self.database.close().await;

        tracing::debug!("Shutdown complete");
    }

    /// Owned future resolving once shutdown is triggered (for axum graceful shutdown)
    pub fn wait(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.rx.clone();
        async move {
            let _ = rx.wait_for(|&v| v).await;
        }
    }

    /// Trigger on Ctrl+C or SIGTERM
    pub fn install_signal_handlers(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                        tracing::error!(error = %e, "Failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
                _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
            }

            service.trigger();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_shutdown() -> ShutdownService {
        ShutdownService::new(Arc::new(SqliteService::in_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn test_shutdown_trigger() {
        let shutdown = make_shutdown().await;
        let rx = shutdown.subscribe();
        assert!(!*rx.borrow());
        shutdown.trigger();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_shutdown_wait_returns_after_trigger() {
        let shutdown = make_shutdown().await;
        let handle = tokio::spawn(shutdown.wait());
        tokio::task::yield_now().await;

        shutdown.trigger();

        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_awaits_registered_tasks() {
        let shutdown = make_shutdown().await;
        let mut rx = shutdown.subscribe();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        shutdown
            .register(tokio::spawn(async move {
                let _ = rx.wait_for(|&v| v).await;
                let _ = done_tx.send(());
            }))
            .await;

        shutdown.shutdown().await;
        assert!(done_rx.await.is_ok());
    }
}
