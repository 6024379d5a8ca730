//! Live push hub
//!
//! A `tokio::sync::broadcast` channel fans [`PushEvent`]s out to every SSE
//! and WebSocket subscriber. Publishing with no subscribers succeeds with
//! zero receivers; publishing after [`LiveDispatcher::close`] fails. Closing
//! also ends every open subscription.

use async_trait::async_trait;
use foresight_core::dispatch::{LiveDispatcher, PushEvent};
use foresight_core::{ForesightError, Result as CoreResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Broadcast-backed [`LiveDispatcher`]
#[derive(Debug)]
pub struct BroadcastHub {
    tx: broadcast::Sender<PushEvent>,
    shutdown: watch::Sender<bool>,
    connections: Arc<AtomicUsize>,
}

impl BroadcastHub {
    /// `capacity` events are buffered per subscriber before it lags
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            tx,
            shutdown,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Register a subscriber; `None` once the hub is closed
    pub fn subscribe(&self) -> Option<Subscription> {
        if self.is_closed() {
            return None;
        }
        let total = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(connections = total, "Subscriber connected");
        Some(Subscription {
            rx: self.tx.subscribe(),
            shutdown: self.shutdown.subscribe(),
            _guard: ConnectionGuard {
                connections: self.connections.clone(),
            },
        })
    }
}

#[async_trait]
impl LiveDispatcher for BroadcastHub {
    async fn broadcast(&self, event: PushEvent) -> CoreResult<usize> {
        if self.is_closed() {
            return Err(ForesightError::DispatchFailed("push hub is closed".into()));
        }
        let kind = event.event_type();
        // A send error only means nobody is listening right now.
        let receivers = self.tx.send(event).unwrap_or(0);
        tracing::debug!(event = kind, receivers, "Event published");
        Ok(receivers)
    }

    fn active_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::info!(
                connections = self.active_connections(),
                "Push hub closed"
            );
        }
    }
}

struct ConnectionGuard {
    connections: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let left = self.connections.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        tracing::debug!(connections = left, "Subscriber disconnected");
    }
}

/// One subscriber's view of the hub; counts as a connection while alive
pub struct Subscription {
    rx: broadcast::Receiver<PushEvent>,
    shutdown: watch::Receiver<bool>,
    _guard: ConnectionGuard,
}

impl Subscription {
    /// Next event, or `None` once the hub closes. Lagged events are skipped.
    pub async fn next(&mut self) -> Option<PushEvent> {
        loop {
            if *self.shutdown.borrow() {
                return None;
            }
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return None;
                    }
                }
                received = self.rx.recv() => match received {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Subscriber lagging; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }
}
