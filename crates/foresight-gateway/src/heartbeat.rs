//! Periodic heartbeat events

use foresight_core::dispatch::{LiveDispatcher, PushEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::hub::BroadcastHub;

/// Publish a `heartbeat` every `interval` until the hub closes
pub fn spawn_heartbeat(hub: Arc<BroadcastHub>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if hub.is_closed() {
                break;
            }
            let event = PushEvent::heartbeat(hub.active_connections());
            if let Err(e) = hub.broadcast(event).await {
                tracing::debug!(error = %e, "Heartbeat stopped");
                break;
            }
        }
        tracing::debug!("Heartbeat task finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_reports_connections() {
        let hub = Arc::new(BroadcastHub::new(8));
        let mut sub = hub.subscribe().unwrap();
        let handle = spawn_heartbeat(hub.clone(), Duration::from_secs(30));

        match sub.next().await.unwrap() {
            PushEvent::Heartbeat {
                active_connections, ..
            } => assert_eq!(active_connections, 1),
            other => panic!("unexpected {other:?}"),
        }

        hub.close();
        tokio::time::advance(Duration::from_secs(31)).await;
        handle.await.unwrap();
    }
}
