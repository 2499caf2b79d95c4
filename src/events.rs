//! Lifecycle notifications published after every successful transition.
//!
//! Publishing is fire-and-forget: a transition never fails because nobody is
//! listening, and a subscriber that falls behind loses the oldest events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::participant::ParticipantStatus;
use crate::models::progress::ProgressStatus;
use crate::models::session::SessionStatus;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    SessionStatusChanged {
        session_id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
        at: DateTime<Utc>,
    },
    ParticipantStatusChanged {
        session_id: Uuid,
        participant_id: Uuid,
        from: ParticipantStatus,
        to: ParticipantStatus,
        at: DateTime<Utc>,
    },
    AttemptStarted {
        session_id: Uuid,
        participant_id: Uuid,
        test_id: Uuid,
        at: DateTime<Utc>,
    },
    AttemptFinished {
        session_id: Uuid,
        participant_id: Uuid,
        test_id: Uuid,
        status: ProgressStatus,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: LifecycleEvent) {
        // No receivers is the common case outside of tests.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let event = LifecycleEvent::SessionStatusChanged {
            session_id: Uuid::new_v4(),
            from: SessionStatus::Draft,
            to: SessionStatus::Active,
            at: Utc::now(),
        };

        bus.publish(event.clone());

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(LifecycleEvent::AttemptStarted {
            session_id: Uuid::new_v4(),
            participant_id: Uuid::new_v4(),
            test_id: Uuid::new_v4(),
            at: Utc::now(),
        });
    }
}
