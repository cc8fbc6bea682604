//! Event types for the Chanter event system
//!
//! Events are broadcast on a `tokio::sync::broadcast` channel owned by the
//! queue registry. The presentation layer (outside this core) subscribes and
//! turns them into user-visible messages.

use crate::types::ChannelId;
use serde::{Deserialize, Serialize};

/// Chanter event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// A track started streaming on a channel
    TrackStarted {
        channel_id: ChannelId,
        title: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A track finished (naturally or via skip)
    TrackFinished {
        channel_id: ChannelId,
        title: String,
        skipped: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Pending queue contents changed (add/remove/clear/shuffle)
    QueueChanged {
        channel_id: ChannelId,
        size: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The active session recovered from a transient failure
    StreamRestarted {
        channel_id: ChannelId,
        attempt: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback ended with an error (terminal failure or restarts exhausted)
    PlaybackFailed {
        channel_id: ChannelId,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A channel was torn down after the idle timeout
    IdleTimeout {
        channel_id: ChannelId,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PlayerEvent {
    /// The channel this event belongs to
    pub fn channel_id(&self) -> ChannelId {
        match self {
            PlayerEvent::TrackStarted { channel_id, .. }
            | PlayerEvent::TrackFinished { channel_id, .. }
            | PlayerEvent::QueueChanged { channel_id, .. }
            | PlayerEvent::StreamRestarted { channel_id, .. }
            | PlayerEvent::PlaybackFailed { channel_id, .. }
            | PlayerEvent::IdleTimeout { channel_id, .. } => *channel_id,
        }
    }
}
