//! Transcode lifecycle events.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late subscribers can catch up.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::{TranscodeJobId, VideoId};

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    TranscodeQueued {
        job_id: TranscodeJobId,
        video_id: VideoId,
        quality: String,
    },
    TranscodeStarted {
        job_id: TranscodeJobId,
        video_id: VideoId,
        quality: String,
        worker: usize,
    },
    TranscodeCompleted {
        job_id: TranscodeJobId,
        video_id: VideoId,
        quality: String,
        file_size: u64,
    },
    TranscodeFailed {
        job_id: TranscodeJobId,
        video_id: VideoId,
        quality: String,
        error: String,
        cancelled: bool,
    },
}

impl EventPayload {
    pub fn job_id(&self) -> TranscodeJobId {
        match self {
            Self::TranscodeQueued { job_id, .. }
            | Self::TranscodeStarted { job_id, .. }
            | Self::TranscodeCompleted { job_id, .. }
            | Self::TranscodeFailed { job_id, .. } => *job_id,
        }
    }

    pub fn video_id(&self) -> VideoId {
        match self {
            Self::TranscodeQueued { video_id, .. }
            | Self::TranscodeStarted { video_id, .. }
            | Self::TranscodeCompleted { video_id, .. }
            | Self::TranscodeFailed { video_id, .. } => *video_id,
        }
    }

    /// Whether the job reached a terminal state with this event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TranscodeCompleted { .. } | Self::TranscodeFailed { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer.
    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // Ignore send errors (no subscribers).
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.tx.receiver_count())
            .field("recent", &self.recent.read().len())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(job_id: TranscodeJobId) -> EventPayload {
        EventPayload::TranscodeQueued {
            job_id,
            video_id: VideoId::new(42),
            quality: "720p".into(),
        }
    }

    #[test]
    fn broadcast_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let job_id = TranscodeJobId::new();
        bus.broadcast(queued(job_id));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.payload.job_id(), job_id);
        assert_eq!(event.payload.video_id(), VideoId::new(42));
        assert!(!event.payload.is_terminal());
    }

    #[test]
    fn recent_events_capped() {
        let bus = EventBus::new(256);
        let job_id = TranscodeJobId::new();

        for _ in 0..150 {
            bus.broadcast(queued(job_id));
        }

        assert_eq!(bus.recent_events(200).len(), MAX_RECENT_EVENTS);
    }

    #[test]
    fn recent_events_newest_first() {
        let bus = EventBus::new(16);
        let job_id = TranscodeJobId::new();
        bus.broadcast(queued(job_id));
        bus.broadcast(EventPayload::TranscodeCompleted {
            job_id,
            video_id: VideoId::new(42),
            quality: "720p".into(),
            file_size: 1024,
        });

        let recent = bus.recent_events(1);
        assert_eq!(recent.len(), 1);
        assert!(recent[0].payload.is_terminal());
    }

    #[test]
    fn no_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.broadcast(EventPayload::TranscodeFailed {
            job_id: TranscodeJobId::new(),
            video_id: VideoId::new(7),
            quality: "bogus".into(),
            error: "quality preset not found: bogus".into(),
            cancelled: false,
        });
    }

    #[test]
    fn payload_serializes_with_tag() {
        let json = serde_json::to_value(queued(TranscodeJobId::new())).unwrap();
        assert_eq!(json["type"], "transcode_queued");
        assert_eq!(json["video_id"], 42);
        assert_eq!(json["quality"], "720p");
    }
}
