use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::metrics::ConnectionMetrics;
use crate::sorting_station::SortingStation;

/// Background task removing idle connections from every messenger
pub struct ReaperTask {
    config: WebSocketConfig,
    sorting_station: Arc<SortingStation>,
    shutdown: broadcast::Receiver<()>,
}

impl ReaperTask {
    pub fn new(
        config: WebSocketConfig,
        sorting_station: Arc<SortingStation>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            sorting_station,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval.max(1));
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        cleanup_timer.tick().await;

        tracing::info!(
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = self.config.connection_timeout,
            "Reaper task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Reaper task received shutdown signal");
                    break;
                }
                _ = cleanup_timer.tick() => {
                    self.reap().await;
                }
            }
        }

        tracing::info!("Reaper task stopped");
    }

    /// One cleanup round; returns the number of removed connections
    pub async fn reap(&self) -> usize {
        let timeout_secs = self.config.connection_timeout;
        let mut removed = 0;

        for messenger in self.sorting_station.messengers() {
            removed += messenger.cleanup_stale_connections(timeout_secs).await;
        }

        ConnectionMetrics::record_reaped(removed);
        ConnectionMetrics::set_totals(
            self.sorting_station.total_connections(),
            self.sorting_station.total_channels(),
        );

        if removed > 0 {
            tracing::info!(removed, timeout_secs, "Cleaned up stale connections");
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryConfig;
    use crate::websocket::OutboundMessage;
    use tokio::sync::mpsc;

    fn station() -> Arc<SortingStation> {
        let station = SortingStation::new(DeliveryConfig::default());
        station.create_messenger("abc", "one").unwrap();
        station.create_messenger("def", "two").unwrap();
        Arc::new(station)
    }

    #[tokio::test]
    async fn test_reaper_task_shutdown() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = ReaperTask::new(WebSocketConfig::default(), station(), shutdown_rx);

        let handle = tokio::spawn(async move {
            task.run().await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn test_reap_covers_every_messenger() {
        let station = station();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let mut receivers = Vec::new();
        for apikey in ["abc", "def"] {
            let messenger = station.get_messenger_by_apikey(apikey).unwrap();
            let (tx, rx) = mpsc::channel::<OutboundMessage>(4);
            let stale = messenger.register(None, tx.clone());
            stale.set_last_activity(chrono::Utc::now() - chrono::Duration::seconds(600));
            messenger.register(None, tx);
            receivers.push(rx);
        }

        let task = ReaperTask::new(WebSocketConfig::default(), station.clone(), shutdown_rx);

        assert_eq!(task.reap().await, 2);
        assert_eq!(station.total_connections(), 2);
        assert_eq!(task.reap().await, 0);

        // Reaped connections are told to close
        for rx in receivers.iter_mut() {
            assert!(matches!(rx.try_recv(), Ok(OutboundMessage::Close)));
        }
    }
}
