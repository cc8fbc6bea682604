//! Queue items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resolver::TrackInfo;

/// One track in a channel's queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Stable identity across persistence round-trips
    pub guid: Uuid,

    /// What the user asked for. Empty when the item was started from a
    /// direct URL with no resolvable reference.
    pub source_ref: String,

    /// Direct stream URL captured at resolution time; may have expired
    pub stream_url: Option<String>,

    /// Platform identifier of the resolved track
    pub source_id: Option<String>,

    /// Display title
    pub title: String,

    /// Who queued it
    pub requested_by: String,

    /// Reported track length
    pub duration_secs: Option<u64>,

    /// When the item entered the queue
    pub enqueued_at: DateTime<Utc>,

    /// When streaming began; `None` while the item is still pending
    pub started_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Create a pending item with only what the user typed.
    pub fn new(source_ref: String, title: String, requested_by: String) -> Self {
        QueueItem {
            guid: Uuid::new_v4(),
            source_ref,
            stream_url: None,
            source_id: None,
            title,
            requested_by,
            duration_secs: None,
            enqueued_at: Utc::now(),
            started_at: None,
        }
    }

    /// Create a pending item enriched with resolver metadata.
    pub fn with_info(source_ref: String, requested_by: String, info: TrackInfo) -> Self {
        QueueItem {
            guid: Uuid::new_v4(),
            source_ref,
            stream_url: info.stream_url,
            source_id: info.source_id,
            title: info.title,
            requested_by,
            duration_secs: info.duration_secs,
            enqueued_at: Utc::now(),
            started_at: None,
        }
    }
}
