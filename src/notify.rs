use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-activity change notifications.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for an activity. Creates the channel if needed.
    pub fn subscribe(&self, activity_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(activity_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    ///
    /// A channel whose receivers are all gone is dropped here, and a deleted
    /// activity's channel is always dropped.
    pub fn send(&self, activity_id: Ulid, event: &Event) {
        let Some(sender) = self.channels.get(&activity_id).map(|s| s.value().clone()) else {
            return;
        };
        let _ = sender.send(event.clone());
        if matches!(event, Event::ActivityDeleted { .. }) {
            self.channels.remove(&activity_id);
        } else {
            self.channels
                .remove_if(&activity_id, |_, s| s.receiver_count() == 0);
        }
    }

    /// Number of activities with a live channel.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
