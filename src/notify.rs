use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::ReminderStatus;

const CHANNEL_CAPACITY: usize = 256;

/// Something UI listeners may want to re-render for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    ConflictDetected { conflict_id: String, priority: u8 },
    ConflictResolved { conflict_id: String },
    NotificationAdded { id: Ulid },
    NotificationRemoved { id: Ulid },
    ReminderStatusChanged { id: Ulid, status: ReminderStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Conflicts,
    Notifications,
    Reminders,
}

impl ServiceEvent {
    pub fn topic(&self) -> Topic {
        match self {
            ServiceEvent::ConflictDetected { .. } | ServiceEvent::ConflictResolved { .. } => {
                Topic::Conflicts
            }
            ServiceEvent::NotificationAdded { .. } | ServiceEvent::NotificationRemoved { .. } => {
                Topic::Notifications
            }
            ServiceEvent::ReminderStatusChanged { .. } => Topic::Reminders,
        }
    }
}

/// Broadcast hub for service events, one channel per topic.
pub struct NotifyHub {
    channels: DashMap<Topic, broadcast::Sender<ServiceEvent>>,
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

    /// Subscribe to a topic. Creates the channel if needed.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<ServiceEvent> {
        let sender = self
            .channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, event: ServiceEvent) {
        if let Some(sender) = self.channels.get(&event.topic()) {
            let _ = sender.send(event);
        }
    }
}
