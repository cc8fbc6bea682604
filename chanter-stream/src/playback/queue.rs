//! Per-channel playback queue
//!
//! The in-memory queue is authoritative. Every mutation is mirrored to the
//! database on a best-effort basis so a host restart can restore pending
//! items; a failed write is logged and never blocks playback.
//!
//! Queue advancement is driven by a watcher task attached to each streaming
//! session: when the session's playing flag drops, the watcher calls
//! [`PlaybackQueue::handle_session_end`], which emits `TrackFinished` and
//! starts the next track. Skip and teardown reuse the same path, so there is
//! exactly one place that advances the queue.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use chrono::Utc;
use rand::seq::SliceRandom;
use sqlx::SqlitePool;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use chanter_common::config::StreamSettings;
use chanter_common::events::PlayerEvent;
use chanter_common::{ChannelId, Error, Result};

use crate::db;
use crate::playback::item::QueueItem;
use crate::playback::pipeline::StreamPipeline;
use crate::resolver::SourceResolver;
use crate::transport::VoiceSink;

/// Queue and session state for one channel
pub struct PlaybackQueue {
    channel_id: ChannelId,
    db: SqlitePool,
    resolver: Arc<dyn SourceResolver>,
    settings: StreamSettings,
    event_tx: broadcast::Sender<PlayerEvent>,
    // Handle to ourselves for the session watcher task.
    self_ref: Weak<PlaybackQueue>,
    inner: RwLock<QueueInner>,
}

struct QueueInner {
    pending: VecDeque<QueueItem>,
    current: Option<QueueItem>,
    playing: bool,
    skipped: bool,
    sink: Option<Arc<dyn VoiceSink>>,
    pipeline: Option<Arc<StreamPipeline>>,
    next_order: i64,
}

impl PlaybackQueue {
    pub(crate) fn new(
        channel_id: ChannelId,
        db: SqlitePool,
        resolver: Arc<dyn SourceResolver>,
        settings: StreamSettings,
        event_tx: broadcast::Sender<PlayerEvent>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| PlaybackQueue {
            channel_id,
            db,
            resolver,
            settings,
            event_tx,
            self_ref: self_ref.clone(),
            inner: RwLock::new(QueueInner {
                pending: VecDeque::new(),
                current: None,
                playing: false,
                skipped: false,
                sink: None,
                pipeline: None,
                next_order: 0,
            }),
        })
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Seed the queue from persisted rows and normalize their stored order.
    pub(crate) async fn restore(&self, items: Vec<QueueItem>) {
        {
            let mut inner = self.inner.write().await;
            inner.next_order = (items.len() as i64) * 10;
            inner.pending = items.clone().into();
        }
        if let Err(e) = db::replace_channel(&self.db, self.channel_id, &items).await {
            warn!(channel = %self.channel_id, error = %e, "could not normalize restored queue");
        }
    }

    /// Append an item to the pending queue.
    ///
    /// Always succeeds; a failed persistence write only costs restart
    /// durability for this item.
    pub async fn add(&self, item: QueueItem) {
        let (order, size) = {
            let mut inner = self.inner.write().await;
            inner.next_order += 10;
            inner.pending.push_back(item.clone());
            (inner.next_order, inner.pending.len())
        };

        if let Err(e) = db::insert_item(&self.db, self.channel_id, &item, order).await {
            warn!(channel = %self.channel_id, error = %e, "could not persist queue item");
        }
        self.emit_queue_changed(size);
    }

    /// Resolve metadata for a reference and enqueue the resulting item.
    pub async fn add_with_metadata(
        &self,
        source_ref: String,
        requested_by: String,
    ) -> Result<QueueItem> {
        let info = self.resolver.metadata(&source_ref).await?;
        let item = QueueItem::with_info(source_ref, requested_by, info);
        self.add(item.clone()).await;
        Ok(item)
    }

    /// Pop the next pending item and make it current.
    pub async fn next(&self) -> Option<QueueItem> {
        let (item, size) = {
            let mut inner = self.inner.write().await;
            let item = inner.pending.pop_front()?;
            inner.current = Some(item.clone());
            (item, inner.pending.len())
        };

        if let Err(e) = db::delete_item(&self.db, item.guid).await {
            warn!(channel = %self.channel_id, error = %e, "could not unpersist queue item");
        }
        self.emit_queue_changed(size);
        Some(item)
    }

    /// Remove a pending item by its zero-based position.
    pub async fn remove(&self, index: usize) -> Result<QueueItem> {
        let (item, size) = {
            let mut inner = self.inner.write().await;
            let Some(item) = inner.pending.remove(index) else {
                return Err(Error::InvalidInput(format!(
                    "no queue item at position {index}"
                )));
            };
            (item, inner.pending.len())
        };

        if let Err(e) = db::delete_item(&self.db, item.guid).await {
            warn!(channel = %self.channel_id, error = %e, "could not unpersist queue item");
        }
        self.emit_queue_changed(size);
        Ok(item)
    }

    /// Drop every pending item and forget the current one.
    ///
    /// An active session keeps streaming; stopping it is a separate call.
    pub async fn clear(&self) {
        {
            let mut inner = self.inner.write().await;
            inner.pending.clear();
            inner.current = None;
        }
        if let Err(e) = db::clear_channel(&self.db, self.channel_id).await {
            warn!(channel = %self.channel_id, error = %e, "could not clear persisted queue");
        }
        self.emit_queue_changed(0);
    }

    /// Shuffle the pending items in place.
    pub async fn shuffle(&self) {
        let (snapshot, size) = {
            let mut inner = self.inner.write().await;
            inner
                .pending
                .make_contiguous()
                .shuffle(&mut rand::thread_rng());
            let snapshot: Vec<QueueItem> = inner.pending.iter().cloned().collect();
            let size = snapshot.len();
            (snapshot, size)
        };

        if let Err(e) = db::replace_channel(&self.db, self.channel_id, &snapshot).await {
            warn!(channel = %self.channel_id, error = %e, "could not persist shuffled order");
        }
        self.emit_queue_changed(size);
    }

    /// Snapshot of the pending items in play order.
    pub async fn list(&self) -> Vec<QueueItem> {
        self.inner.read().await.pending.iter().cloned().collect()
    }

    pub async fn size(&self) -> usize {
        self.inner.read().await.pending.len()
    }

    /// The track currently streaming, if any.
    pub async fn current(&self) -> Option<QueueItem> {
        self.inner.read().await.current.clone()
    }

    pub async fn is_playing(&self) -> bool {
        self.inner.read().await.playing
    }

    pub async fn has_active_session(&self) -> bool {
        self.inner.read().await.pipeline.is_some()
    }

    /// Whether a new session may start on this channel.
    ///
    /// A stale playing flag from a session that already wound down does not
    /// block a new start.
    pub async fn can_start_playing(&self) -> bool {
        let inner = self.inner.read().await;
        !inner.playing
            || inner
                .pipeline
                .as_ref()
                .map_or(true, |p| !p.is_playing())
    }

    /// Start a streaming session on this channel.
    ///
    /// `url` is the already-resolved stream URL for the current track (or a
    /// direct URL when nothing is queued). The session's restart loop
    /// re-resolves from the current track's source reference.
    pub async fn start_playback(&self, url: String, sink: Arc<dyn VoiceSink>) -> Result<()> {
        let mut inner = self.inner.write().await;

        let busy = inner.playing
            && inner
                .pipeline
                .as_ref()
                .map_or(false, |p| p.is_playing());
        if busy {
            return Err(Error::InvalidState("channel is already streaming".into()));
        }

        let source_ref = inner
            .current
            .as_ref()
            .map(|c| c.source_ref.clone())
            .unwrap_or_else(|| url.clone());

        let pipeline = Arc::new(StreamPipeline::new(
            self.channel_id,
            self.settings.clone(),
            self.resolver.clone(),
            sink.clone(),
            source_ref,
            self.event_tx.clone(),
        ));
        pipeline.start(url).await?;

        if let Some(current) = inner.current.as_mut() {
            current.started_at = Some(Utc::now());
        }
        let title = inner
            .current
            .as_ref()
            .map(|c| c.title.clone())
            .unwrap_or_else(|| "direct stream".to_string());
        inner.sink = Some(sink);
        inner.pipeline = Some(pipeline.clone());
        inner.playing = true;
        inner.skipped = false;
        drop(inner);

        if let Some(queue) = self.self_ref.upgrade() {
            let watched = pipeline;
            tokio::spawn(async move {
                watched.stopped().await;
                queue.handle_session_end(&watched).await;
            });
        }

        self.emit(PlayerEvent::TrackStarted {
            channel_id: self.channel_id,
            title,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Attach a sink and start streaming the next pending track.
    ///
    /// This is the host-facing entry point; queue advancement after the
    /// first track is handled internally.
    pub async fn play(&self, sink: Arc<dyn VoiceSink>) -> Result<()> {
        if !self.can_start_playing().await {
            return Err(Error::InvalidState("channel is already streaming".into()));
        }
        {
            let mut inner = self.inner.write().await;
            inner.sink = Some(sink.clone());
        }
        if self.next().await.is_none() {
            return Err(Error::InvalidState("queue is empty".into()));
        }
        let url = self.fresh_stream_url().await?;
        self.start_playback(url, sink).await
    }

    /// Stop the current track and let the watcher advance to the next one.
    pub async fn skip(&self) -> Result<()> {
        let pipeline = {
            let mut inner = self.inner.write().await;
            let Some(pipeline) = inner.pipeline.clone() else {
                return Err(Error::InvalidState("nothing is playing".into()));
            };
            inner.skipped = true;
            pipeline
        };

        pipeline.stop().await;
        Ok(())
    }

    /// Finish the ended session and start the next pending track.
    ///
    /// Called by the watcher attached in [`start_playback`]. The pipeline
    /// identity check makes this a no-op for sessions that were superseded
    /// or detached by [`stop_and_cleanup`], so the queue never advances
    /// twice for one ending.
    async fn handle_session_end(&self, ended: &Arc<StreamPipeline>) {
        let (finished, skipped) = {
            let mut inner = self.inner.write().await;
            let still_ours = inner
                .pipeline
                .as_ref()
                .map_or(false, |p| Arc::ptr_eq(p, ended));
            if !still_ours {
                return;
            }
            inner.pipeline = None;
            inner.playing = false;
            let skipped = std::mem::take(&mut inner.skipped);
            (inner.current.take(), skipped)
        };

        if let Some(item) = finished {
            self.emit(PlayerEvent::TrackFinished {
                channel_id: self.channel_id,
                title: item.title,
                skipped,
                timestamp: Utc::now(),
            });
        }

        if let Err(e) = self.play_next().await {
            warn!(channel = %self.channel_id, error = %e, "could not advance queue");
        }
    }

    /// Pop the next track, resolve a fresh URL, and start it.
    ///
    /// Returns a boxed future rather than being an `async fn` so the
    /// recursion through `start_playback`'s spawned watcher holds a concrete
    /// `Send` type; the self-referential opaque async type cannot otherwise
    /// be proven `Send` across that `tokio::spawn`.
    fn play_next(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.next().await.is_none() {
                debug!(channel = %self.channel_id, "queue drained");
                return Ok(());
            }

            let sink = self.inner.read().await.sink.clone();
            let Some(sink) = sink else {
                return Err(Error::InvalidState("no voice sink attached".into()));
            };

            let url = self.fresh_stream_url().await?;
            self.start_playback(url, sink).await
        })
    }

    /// Resolve a playable URL for the current track.
    ///
    /// Stream URLs expire, so tracks with a source reference are re-resolved
    /// here rather than reusing the URL captured at enqueue time.
    async fn fresh_stream_url(&self) -> Result<String> {
        let current = self.inner.read().await.current.clone();
        let Some(current) = current else {
            return Err(Error::InvalidState("no current track".into()));
        };

        if current.source_ref.is_empty() {
            return current
                .stream_url
                .ok_or_else(|| Error::InvalidState("track has no stream URL".into()));
        }
        self.resolver.resolve(&current.source_ref).await
    }

    /// Stop playback, disconnect the sink, and forget the current track.
    ///
    /// Never fails; disconnect problems are logged. The pipeline is detached
    /// before it is stopped so the watcher cannot advance the queue during
    /// teardown.
    pub async fn stop_and_cleanup(&self) {
        let (pipeline, sink) = {
            let mut inner = self.inner.write().await;
            inner.playing = false;
            inner.skipped = false;
            inner.current = None;
            (inner.pipeline.take(), inner.sink.take())
        };

        if let Some(pipeline) = pipeline {
            pipeline.stop().await;
        }
        if let Some(sink) = sink {
            if let Err(e) = sink.disconnect().await {
                warn!(channel = %self.channel_id, error = %e, "voice disconnect failed");
            }
        }
        info!(channel = %self.channel_id, "channel torn down");
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_queue_changed(&self, size: usize) {
        self.emit(PlayerEvent::QueueChanged {
            channel_id: self.channel_id,
            size,
            timestamp: Utc::now(),
        });
    }
}
