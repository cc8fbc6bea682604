//! Queue registry
//!
//! One queue per channel, created on demand. The registry owns the event
//! bus every queue and session publishes on, and restores persisted queue
//! contents the first time a channel is touched after a host restart.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use chanter_common::config::Settings;
use chanter_common::events::PlayerEvent;
use chanter_common::ChannelId;

use crate::db;
use crate::playback::queue::PlaybackQueue;
use crate::resolver::SourceResolver;

const EVENT_BUS_CAPACITY: usize = 128;

/// Owns every channel's playback queue
pub struct QueueRegistry {
    db: SqlitePool,
    resolver: Arc<dyn SourceResolver>,
    settings: Settings,
    queues: RwLock<HashMap<ChannelId, Arc<PlaybackQueue>>>,
    event_tx: broadcast::Sender<PlayerEvent>,
}

impl QueueRegistry {
    pub fn new(db: SqlitePool, resolver: Arc<dyn SourceResolver>, settings: Settings) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        QueueRegistry {
            db,
            resolver,
            settings,
            queues: RwLock::new(HashMap::new()),
            event_tx,
        }
    }

    /// Subscribe to the player event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<PlayerEvent> {
        self.event_tx.clone()
    }

    /// The queue for a channel, if one exists.
    pub async fn get(&self, channel: ChannelId) -> Option<Arc<PlaybackQueue>> {
        self.queues.read().await.get(&channel).cloned()
    }

    /// The queue for a channel, creating and restoring it on first touch.
    pub async fn get_or_create(&self, channel: ChannelId) -> Arc<PlaybackQueue> {
        if let Some(queue) = self.get(channel).await {
            return queue;
        }

        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.get(&channel) {
            return queue.clone();
        }

        let queue = PlaybackQueue::new(
            channel,
            self.db.clone(),
            self.resolver.clone(),
            self.settings.stream.clone(),
            self.event_tx.clone(),
        );

        match db::load_channel(&self.db, channel).await {
            Ok(items) if !items.is_empty() => {
                info!(channel = %channel, count = items.len(), "restored persisted queue");
                queue.restore(items).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(channel = %channel, error = %e, "could not restore persisted queue");
            }
        }

        queues.insert(channel, queue.clone());
        queue
    }

    /// Tear a channel down and forget its queue.
    pub async fn remove(&self, channel: ChannelId) {
        let queue = self.queues.write().await.remove(&channel);
        if let Some(queue) = queue {
            queue.stop_and_cleanup().await;
        }
    }

    /// Channels that currently have a queue.
    pub async fn channels(&self) -> Vec<ChannelId> {
        self.queues.read().await.keys().copied().collect()
    }
}
