//! Supervised streaming session
//!
//! One [`StreamPipeline`] owns three tasks:
//!
//! * the frame pump ([`pump`]), which runs the decoder subprocess, encodes
//!   PCM into Opus frames, and pushes them into the transport sink
//! * the health check ([`health`]), which watches for stalls and a
//!   not-ready transport
//! * the supervisor ([`supervise`]), which turns reported errors into
//!   restarts or a terminal shutdown
//!
//! The tasks talk over two channels: errors flow to the supervisor, restart
//! grants flow back to the pump. A shared cancellation token ends all three.

mod health;
mod pump;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chanter_common::config::StreamSettings;
use chanter_common::events::PlayerEvent;
use chanter_common::{ChannelId, Error, Result};

use crate::codec::FrameCodec;
use crate::error::StreamError;
use crate::resolver::SourceResolver;
use crate::transport::VoiceSink;

const ERROR_CHANNEL_CAPACITY: usize = 16;

/// State shared by the pump, health, and supervisor tasks
pub(crate) struct PipelineShared {
    pub(crate) channel_id: ChannelId,
    pub(crate) settings: StreamSettings,
    pub(crate) resolver: Arc<dyn SourceResolver>,
    pub(crate) sink: Arc<dyn VoiceSink>,
    pub(crate) source_ref: String,
    pub(crate) cancel: CancellationToken,
    pub(crate) playing_tx: watch::Sender<bool>,
    epoch: Instant,
    last_frame_ms: AtomicU64,
    pub(crate) restarts: AtomicU32,
    pub(crate) restart_pending: AtomicBool,
    pub(crate) dropped_frames: AtomicU64,
    last_error: Mutex<Option<StreamError>>,
    event_tx: broadcast::Sender<PlayerEvent>,
}

impl PipelineShared {
    /// Record that a frame just reached the transport.
    pub(crate) fn touch_frame_clock(&self) {
        self.last_frame_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Time since the last frame reached the transport.
    pub(crate) fn frame_age(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_frame_ms.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(last))
    }

    pub(crate) fn is_playing(&self) -> bool {
        *self.playing_tx.borrow()
    }

    /// Stop every task of this session without waiting for them.
    pub(crate) fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn emit(&self, event: PlayerEvent) {
        // A send error only means nobody is subscribed right now.
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn record_error(&self, err: StreamError) {
        let mut guard = match self.last_error.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(err);
    }

    fn error_snapshot(&self) -> Option<StreamError> {
        let guard = match self.last_error.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone()
    }
}

/// One streaming session for one channel
pub struct StreamPipeline {
    shared: Arc<PipelineShared>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl StreamPipeline {
    pub(crate) fn new(
        channel_id: ChannelId,
        settings: StreamSettings,
        resolver: Arc<dyn SourceResolver>,
        sink: Arc<dyn VoiceSink>,
        source_ref: String,
        event_tx: broadcast::Sender<PlayerEvent>,
    ) -> Self {
        let (playing_tx, _) = watch::channel(false);

        StreamPipeline {
            shared: Arc::new(PipelineShared {
                channel_id,
                settings,
                resolver,
                sink,
                source_ref,
                cancel: CancellationToken::new(),
                playing_tx,
                epoch: Instant::now(),
                last_frame_ms: AtomicU64::new(0),
                restarts: AtomicU32::new(0),
                restart_pending: AtomicBool::new(false),
                dropped_frames: AtomicU64::new(0),
                last_error: Mutex::new(None),
                event_tx,
            }),
            tasks: tokio::sync::Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Launch the session against a resolved stream URL.
    ///
    /// A pipeline starts at most once; restarts happen inside the pump, not
    /// by calling this again.
    pub(crate) async fn start(&self, url: String) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidState("session already started".into()));
        }

        let codec = FrameCodec::new(self.shared.settings.bitrate_bps)
            .map_err(|e| Error::Playback(e.to_string()))?;

        self.shared.playing_tx.send_replace(true);
        self.shared.touch_frame_clock();

        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let (restart_tx, restart_rx) = mpsc::channel(1);

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(pump::run(
            self.shared.clone(),
            codec,
            url,
            error_tx.clone(),
            restart_rx,
        )));
        tasks.push(tokio::spawn(health::run(self.shared.clone(), error_tx)));
        tasks.push(tokio::spawn(supervise(
            self.shared.clone(),
            error_rx,
            restart_tx,
        )));

        info!(channel = %self.shared.channel_id, "streaming session started");
        Ok(())
    }

    /// Stop the session and wait for its tasks to finish. Idempotent.
    pub async fn stop(&self) {
        self.shared.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(channel = %self.shared.channel_id, error = %e, "pipeline task aborted");
                }
            }
        }

        self.shared.playing_tx.send_replace(false);
        if let Err(e) = self.shared.sink.set_speaking(false).await {
            debug!(channel = %self.shared.channel_id, error = %e, "speaking reset failed during stop");
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.shared.channel_id
    }

    pub fn is_playing(&self) -> bool {
        self.shared.is_playing()
    }

    /// Wait until the session is no longer playing.
    ///
    /// Returns immediately for a session that never started.
    pub async fn stopped(&self) {
        let mut rx = self.shared.playing_tx.subscribe();
        let _ = rx.wait_for(|playing| !*playing).await;
    }

    /// How many restarts the supervisor has granted so far.
    pub fn restart_count(&self) -> u32 {
        self.shared.restarts.load(Ordering::SeqCst)
    }

    /// Frames dropped because the transport channel stayed full.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped_frames.load(Ordering::Relaxed)
    }

    /// The error that ended the session, if any.
    pub fn last_error(&self) -> Option<StreamError> {
        self.shared.error_snapshot()
    }
}

/// Turn reported errors into restarts or a terminal shutdown.
///
/// Recoverable errors consume the restart budget; once `max_restarts`
/// attempts have been counted the session stops with `RestartsExhausted`.
/// While a restart is pending, further recoverable errors are ignored so a
/// burst of health-check failures cannot drain the budget in one incident.
async fn supervise(
    shared: Arc<PipelineShared>,
    mut error_rx: mpsc::Receiver<StreamError>,
    restart_tx: mpsc::Sender<()>,
) {
    loop {
        let err = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            received = error_rx.recv() => match received {
                Some(err) => err,
                None => break,
            },
        };

        if err.is_recoverable() {
            if shared.restart_pending.swap(true, Ordering::SeqCst) {
                debug!(channel = %shared.channel_id, error = %err, "restart already pending, error ignored");
                continue;
            }

            let attempt = shared.restarts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt >= shared.settings.max_restarts {
                let exhausted = StreamError::RestartsExhausted { attempts: attempt };
                warn!(channel = %shared.channel_id, attempts = attempt, "restart budget exhausted, stopping session");
                shared.emit(PlayerEvent::PlaybackFailed {
                    channel_id: shared.channel_id,
                    reason: exhausted.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                shared.record_error(exhausted);
                shared.shutdown();
                break;
            }

            warn!(channel = %shared.channel_id, attempt, error = %err, "restarting stream");
            shared.emit(PlayerEvent::StreamRestarted {
                channel_id: shared.channel_id,
                attempt,
                timestamp: chrono::Utc::now(),
            });
            let _ = restart_tx.send(()).await;
        } else {
            if err.is_normal_end() {
                info!(channel = %shared.channel_id, "stream completed");
            } else {
                warn!(channel = %shared.channel_id, error = %err, "stream failed");
                shared.emit(PlayerEvent::PlaybackFailed {
                    channel_id: shared.channel_id,
                    reason: err.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                shared.record_error(err);
            }
            shared.shutdown();
            break;
        }
    }
}
