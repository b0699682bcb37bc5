//! Live log fan-out

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::models::LogLine;

/// Lines buffered per deployment channel before a lagged subscriber starts
/// losing the oldest ones.
const CHANNEL_CAPACITY: usize = 256;

/// Per-deployment broadcast of live log lines. Publishing never blocks;
/// subscribers attached after a line was published do not see it (the durable
/// log in the store is the catch-up source).
#[derive(Debug, Clone, Default)]
pub struct LogHub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<LogLine>>>>,
}

impl LogHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a line to whoever is listening on this deployment's channel
    pub async fn publish(&self, line: LogLine) {
        let channels = self.channels.read().await;
        if let Some(sender) = channels.get(&line.deployment_id) {
            // Err means no active receivers, which is fine.
            let _ = sender.send(line);
        }
    }

    /// Attach to a deployment's live log stream
    pub async fn subscribe(&self, deployment_id: &str) -> broadcast::Receiver<LogLine> {
        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(deployment_id) {
                return sender.subscribe();
            }
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(deployment_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop the channel for a deployment that no longer needs fan-out.
    /// Called once the deployment is terminal and its last subscriber is gone.
    pub async fn reap(&self, deployment_id: &str) {
        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(deployment_id) {
            if sender.receiver_count() == 0 {
                channels.remove(deployment_id);
            }
        }
    }

    /// Number of live channels, used by tests and the health endpoint
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogLineLevel;

    fn line(id: &str, message: &str) -> LogLine {
        LogLine::new(id, LogLineLevel::Info, None, message)
    }

    #[tokio::test]
    async fn subscriber_sees_lines_published_after_attach() {
        let hub = LogHub::new();
        hub.publish(line("d-1", "before attach")).await;

        let mut rx = hub.subscribe("d-1").await;
        hub.publish(line("d-1", "after attach")).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "after attach");
    }

    #[tokio::test]
    async fn channels_are_isolated_per_deployment() {
        let hub = LogHub::new();
        let mut rx_a = hub.subscribe("a").await;
        let _rx_b = hub.subscribe("b").await;

        hub.publish(line("b", "for b only")).await;
        hub.publish(line("a", "for a")).await;

        assert_eq!(rx_a.recv().await.unwrap().message, "for a");
    }

    #[tokio::test]
    async fn lagged_subscriber_drops_oldest_lines() {
        let hub = LogHub::new();
        let mut rx = hub.subscribe("d-1").await;

        for i in 0..CHANNEL_CAPACITY + 10 {
            hub.publish(line("d-1", &format!("line {}", i))).await;
        }

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                assert_eq!(missed as usize, 10);
            }
            other => panic!("expected lag, got {:?}", other),
        }
        // After the lag report the stream resumes at the oldest retained line.
        assert_eq!(rx.recv().await.unwrap().message, "line 10");
    }

    #[tokio::test]
    async fn reap_removes_idle_channels_only() {
        let hub = LogHub::new();
        let rx = hub.subscribe("d-1").await;
        hub.reap("d-1").await;
        assert_eq!(hub.channel_count().await, 1);

        drop(rx);
        hub.reap("d-1").await;
        assert_eq!(hub.channel_count().await, 0);
    }
}
