//! Connection manager — the named-channel fan-out sink for outbound
//! frames.
//!
//! Subscribers are opaque: a channel id maps to a set of bounded mpsc
//! senders. Broadcast takes a snapshot of the subscriber table, then
//! awaits each send; a slow subscriber therefore suspends the
//! broadcasting run, which is the intended backpressure. Delivery is
//! best-effort: nothing is buffered across connection drops.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use relay_domain::event::EventFrame;

/// Frames buffered per subscriber before broadcast suspends.
const SUBSCRIBER_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Attach a subscriber to a channel; frames arrive on the receiver.
    async fn connect(&self, channel_id: &str) -> (SubscriberId, mpsc::Receiver<EventFrame>);

    async fn disconnect(&self, channel_id: &str, subscriber: SubscriberId);

    /// Deliver a frame to every subscriber of the channel, in order,
    /// suspending while any subscriber's buffer is full.
    async fn broadcast(&self, channel_id: &str, frame: EventFrame);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-process channel manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fan-out over in-process channels; WebSocket and SSE handlers attach
/// their send loops as subscribers.
#[derive(Default)]
pub struct ChannelManager {
    channels: RwLock<HashMap<String, Vec<(SubscriberId, mpsc::Sender<EventFrame>)>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, channel_id: &str) -> usize {
        self.channels
            .read()
            .get(channel_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ConnectionManager for ChannelManager {
    async fn connect(&self, channel_id: &str) -> (SubscriberId, mpsc::Receiver<EventFrame>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = SubscriberId(Uuid::new_v4());
        self.channels
            .write()
            .entry(channel_id.to_string())
            .or_default()
            .push((id, tx));
        (id, rx)
    }

    async fn disconnect(&self, channel_id: &str, subscriber: SubscriberId) {
        let mut channels = self.channels.write();
        if let Some(subs) = channels.get_mut(channel_id) {
            subs.retain(|(id, _)| *id != subscriber);
            if subs.is_empty() {
                channels.remove(channel_id);
            }
        }
    }

    async fn broadcast(&self, channel_id: &str, frame: EventFrame) {
        // Snapshot under the read lock; never await while holding it.
        let senders: Vec<(SubscriberId, mpsc::Sender<EventFrame>)> = self
            .channels
            .read()
            .get(channel_id)
            .map(|subs| subs.clone())
            .unwrap_or_default();

        let mut dropped = Vec::new();
        for (id, tx) in senders {
            if tx.send(frame.clone()).await.is_err() {
                dropped.push(id);
            }
        }

        if !dropped.is_empty() {
            let mut channels = self.channels.write();
            if let Some(subs) = channels.get_mut(channel_id) {
                subs.retain(|(id, _)| !dropped.contains(id));
                if subs.is_empty() {
                    channels.remove(channel_id);
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// No-op sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Discards every frame; the CLI sink for headless runs.
#[derive(Default)]
pub struct NoopManager;

#[async_trait]
impl ConnectionManager for NoopManager {
    async fn connect(&self, _channel_id: &str) -> (SubscriberId, mpsc::Receiver<EventFrame>) {
        let (_tx, rx) = mpsc::channel(1);
        (SubscriberId(Uuid::new_v4()), rx)
    }

    async fn disconnect(&self, _channel_id: &str, _subscriber: SubscriberId) {}

    async fn broadcast(&self, _channel_id: &str, _frame: EventFrame) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(run: &str) -> EventFrame {
        EventFrame::close("ch", "t", run)
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers_in_order() {
        let manager = ChannelManager::new();
        let (_a, mut rx_a) = manager.connect("ch").await;
        let (_b, mut rx_b) = manager.connect("ch").await;

        manager.broadcast("ch", frame("r1")).await;
        manager.broadcast("ch", frame("r2")).await;

        assert_eq!(rx_a.recv().await.unwrap().run_id, "r1");
        assert_eq!(rx_a.recv().await.unwrap().run_id, "r2");
        assert_eq!(rx_b.recv().await.unwrap().run_id, "r1");
        assert_eq!(rx_b.recv().await.unwrap().run_id, "r2");
    }

    #[tokio::test]
    async fn broadcast_to_empty_channel_is_a_noop() {
        let manager = ChannelManager::new();
        manager.broadcast("nobody", frame("r1")).await;
    }

    #[tokio::test]
    async fn disconnect_removes_subscriber() {
        let manager = ChannelManager::new();
        let (id, mut rx) = manager.connect("ch").await;
        manager.disconnect("ch", id).await;
        assert_eq!(manager.subscriber_count("ch"), 0);

        manager.broadcast("ch", frame("r1")).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned_on_broadcast() {
        let manager = ChannelManager::new();
        let (_id, rx) = manager.connect("ch").await;
        drop(rx);
        manager.broadcast("ch", frame("r1")).await;
        assert_eq!(manager.subscriber_count("ch"), 0);
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let manager = ChannelManager::new();
        let (_a, mut rx_a) = manager.connect("alpha").await;
        let (_b, mut rx_b) = manager.connect("beta").await;

        manager.broadcast("alpha", frame("r1")).await;
        assert_eq!(rx_a.recv().await.unwrap().run_id, "r1");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn noop_manager_discards_frames() {
        let manager = NoopManager;
        let (_id, mut rx) = manager.connect("ch").await;
        manager.broadcast("ch", frame("r1")).await;
        assert!(rx.try_recv().is_err());
    }
}
