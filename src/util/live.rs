//! In-memory server-push hub.
//!
//! Maps a channel name to a broadcast sender. Subscribers each get their own receiver;
//! publishing fans out to whoever is connected at that moment. Nothing is persisted, and a
//! subscriber that falls more than `capacity` events behind skips the ones it missed.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

pub const ACTIVITY_CHANNEL: &str = "activity";
pub const CHARTS_CHANNEL: &str = "charts";

#[must_use]
pub fn user_channel(user_id: i32) -> String {
    format!("user:{user_id}")
}

/// Channels clients may subscribe to.
#[must_use]
pub fn is_known_channel(channel: &str) -> bool {
    match channel {
        ACTIVITY_CHANNEL | CHARTS_CHANNEL => true,
        other => other
            .strip_prefix("user:")
            .is_some_and(|id| id.parse::<i32>().is_ok_and(|id| id > 0)),
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LiveEvent {
    /// SSE event name
    pub event: String,
    pub data: serde_json::Value,
}

impl LiveEvent {
    /// # Errors
    /// Fails if the payload can't be turned into JSON.
    pub fn new<T: Serialize>(event: &str, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            event: event.to_owned(),
            data: serde_json::to_value(payload)?,
        })
    }
}

pub struct LiveHub {
    channels: Mutex<HashMap<String, broadcast::Sender<LiveEvent>>>,
    capacity: usize,
}

impl LiveHub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<LiveEvent> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Sends an event to everyone subscribed to `channel`.
    ///
    /// # Returns
    /// How many subscribers received it. Channels found without subscribers are dropped.
    pub fn publish(&self, channel: &str, event: LiveEvent) -> usize {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = channels.get(channel) else {
            return 0;
        };

        if let Ok(delivered) = sender.send(event) {
            debug!(channel, delivered, "Published live event");
            delivered
        } else {
            channels.remove(channel);
            0
        }
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: i64) -> LiveEvent {
        LiveEvent::new("tick", &n).unwrap()
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let hub = LiveHub::new(8);
        assert_eq!(hub.publish(ACTIVITY_CHANNEL, event(1)), 0);
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives_the_event() {
        let hub = LiveHub::new(8);
        let mut a = hub.subscribe(ACTIVITY_CHANNEL);
        let mut b = hub.subscribe(ACTIVITY_CHANNEL);

        assert_eq!(hub.publish(ACTIVITY_CHANNEL, event(1)), 2);
        assert_eq!(a.recv().await.unwrap(), event(1));
        assert_eq!(b.recv().await.unwrap(), event(1));
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let hub = LiveHub::new(8);
        let mut charts = hub.subscribe(CHARTS_CHANNEL);
        let _activity = hub.subscribe(ACTIVITY_CHANNEL);

        hub.publish(ACTIVITY_CHANNEL, event(1));
        hub.publish(CHARTS_CHANNEL, event(2));
        assert_eq!(charts.recv().await.unwrap(), event(2));
    }

    #[test]
    fn idle_channels_are_dropped_on_publish() {
        let hub = LiveHub::new(8);
        drop(hub.subscribe("user:4"));
        assert_eq!(hub.channel_count(), 1);

        assert_eq!(hub.publish("user:4", event(1)), 0);
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscribers_skip_ahead() {
        let hub = LiveHub::new(2);
        let mut rx = hub.subscribe(CHARTS_CHANNEL);
        for n in 0..5 {
            hub.publish(CHARTS_CHANNEL, event(n));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap(), event(3));
    }

    #[test]
    fn known_channels() {
        assert!(is_known_channel("activity"));
        assert!(is_known_channel("charts"));
        assert!(is_known_channel(&user_channel(12)));
        assert!(!is_known_channel("user:"));
        assert!(!is_known_channel("user:-1"));
        assert!(!is_known_channel("admin"));
    }
}
