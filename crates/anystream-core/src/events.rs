//! Application event bus.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel. The channel is
//! bounded: each subscriber has a queue of `capacity` events and a
//! subscriber that falls behind loses the oldest ones (it observes
//! `RecvError::Lagged(n)` and resumes from the oldest event still held).
//! Publishers never block. A ring buffer of recent events lets late joiners
//! catch up.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::{MediaRefId, PlaybackStateId, UserId};

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// EventCategory
// ---------------------------------------------------------------------------

/// Audience category for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    /// Operator events (sessions, imports).
    Admin,
    /// Events relevant to the owning user.
    User,
}

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // -- Streaming sessions --------------------------------------------------
    SessionStarted {
        token: PlaybackStateId,
        media_ref_id: MediaRefId,
        user_id: UserId,
    },
    SessionStateChanged {
        token: PlaybackStateId,
        state: String,
    },
    SessionStopped {
        token: PlaybackStateId,
        output_deleted: bool,
        error: Option<String>,
    },
    PlaybackStateDeleted {
        state_id: PlaybackStateId,
        media_ref_id: MediaRefId,
    },

    // -- Import --------------------------------------------------------------
    ImportStarted {
        root: String,
    },
    ImportCompleted {
        root: String,
        imported: u64,
        skipped: u64,
        failed: u64,
    },
    MediaRefRefreshed {
        media_ref_id: MediaRefId,
    },
    PreviewsGenerated {
        media_ref_id: MediaRefId,
        count: usize,
    },
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped, categorised event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub category: EventCategory,
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(category: EventCategory, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            category,
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Bounded broadcast channel with a ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus whose subscribers each buffer up to `capacity`
    /// events before dropping the oldest.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers and keep it in the ring
    /// buffer.
    pub fn broadcast(&self, category: EventCategory, payload: EventPayload) {
        let event = Event::new(category, payload);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
