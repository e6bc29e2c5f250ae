//! Background maintenance task
//!
//! Periodically runs session compression on a shared store. The store's
//! operation lock already serializes the sweep against foreground calls,
//! so the task never observes (or creates) a half-archived session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::HierarchicalStore;

/// Handle to a spawned maintenance loop. Dropping the handle stops the
/// loop at its next wakeup; [`MaintenanceScheduler::shutdown`] stops it
/// promptly and waits for the task to finish.
pub struct MaintenanceScheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MaintenanceScheduler {
    /// Spawn the compression sweep on the current tokio runtime
    pub fn spawn(store: Arc<HierarchicalStore>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so a fresh store is
            // not swept before anything has aged
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // compress_old_sessions blocks on the op lock;
                        // hand it to the blocking pool
                        let store = Arc::clone(&store);
                        let result = tokio::task::spawn_blocking(move || {
                            store.compress_old_sessions()
                        })
                        .await;
                        match result {
                            Ok(Ok(report)) if report.sessions > 0 => {
                                tracing::info!(
                                    sessions = report.sessions,
                                    records = report.records,
                                    "maintenance sweep archived sessions"
                                );
                            }
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => {
                                tracing::warn!("maintenance sweep failed: {}", e);
                            }
                            Err(e) => {
                                tracing::warn!("maintenance task panicked: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::debug!("maintenance scheduler shutting down");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signal the loop to stop and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordInput;
    use crate::store::{MemoryBackend, StoreConfig};
    use chrono::Duration as ChronoDuration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scheduler_archives_aged_records() {
        let store = Arc::new(HierarchicalStore::with_config(
            Box::new(MemoryBackend::new()),
            StoreConfig {
                // Everything is immediately eligible for archival
                warm_to_cold: ChronoDuration::zero(),
                auto_compress_threshold: 1000,
                ..StoreConfig::default()
            },
        ));
        store
            .add(RecordInput {
                created_at: Some(chrono::Utc::now() - ChronoDuration::seconds(1)),
                ..RecordInput::text("to be archived in the background")
            })
            .unwrap();

        let scheduler =
            MaintenanceScheduler::spawn(Arc::clone(&store), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.shutdown().await;

        let stats = store.stats().unwrap();
        assert_eq!(stats.warm_count, 0);
        assert!(stats.cold_sessions >= 1);
        assert_eq!(stats.records_archived, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_stops_the_loop() {
        let store = Arc::new(HierarchicalStore::new(Box::new(MemoryBackend::new())));
        let scheduler = MaintenanceScheduler::spawn(store, Duration::from_millis(10));
        scheduler.shutdown().await;
    }
}
