//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

use chanter_common::config::{IdleSettings, Settings, StreamSettings};
use chanter_common::events::PlayerEvent;
use chanter_common::{Error, Result};
use chanter_stream::db;
use chanter_stream::resolver::{SourceResolver, TrackInfo};
use chanter_stream::transport::{IdleNotifier, OpusFrame, PresenceReset, VoiceSink};
use chanter_common::ChannelId;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    db::init_schema(&pool).await.expect("schema");
    pool
}

/// Write an executable stand-in for the decoder binary.
///
/// The script receives the usual decoder arguments and ignores them; its
/// stdout is what the frame pump consumes as raw PCM.
pub fn write_decoder_script(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("decoder.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod script");
    path.to_string_lossy().into_owned()
}

/// Decoder that emits half a second of silence and exits.
pub fn finite_decoder(dir: &TempDir) -> String {
    write_decoder_script(dir, "exec head -c 96000 /dev/zero")
}

/// Decoder that streams silence until killed.
pub fn endless_decoder(dir: &TempDir) -> String {
    write_decoder_script(dir, "exec cat /dev/zero")
}

/// Settings tuned for fast tests, streaming through the given decoder.
pub fn test_settings(decoder_bin: String) -> Settings {
    Settings {
        stream: StreamSettings {
            decoder_bin,
            ready_wait_secs: 2,
            read_timeout_secs: 2,
            send_timeout_ms: 20,
            health_grace_secs: 1,
            health_interval_secs: 1,
            stall_secs: 2,
            max_restarts: 3,
            restart_delay_secs: 0,
            ..StreamSettings::default()
        },
        idle: IdleSettings {
            timeout_secs: 1,
            scan_interval_secs: 1,
        },
    }
}

/// Voice sink that counts what reaches it and drains frames in background.
pub struct TestSink {
    ready: AtomicBool,
    speaking: AtomicBool,
    disconnects: AtomicUsize,
    frames_seen: Arc<AtomicUsize>,
    frame_tx: mpsc::Sender<OpusFrame>,
}

impl TestSink {
    pub fn new() -> Arc<Self> {
        let (frame_tx, mut frame_rx) = mpsc::channel::<OpusFrame>(256);
        let frames_seen = Arc::new(AtomicUsize::new(0));
        let counter = frames_seen.clone();
        tokio::spawn(async move {
            while frame_rx.recv().await.is_some() {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        Arc::new(TestSink {
            ready: AtomicBool::new(true),
            speaking: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
            frames_seen,
            frame_tx,
        })
    }

    pub fn frames_received(&self) -> usize {
        self.frames_seen.load(Ordering::Relaxed)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceSink for TestSink {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn set_speaking(&self, speaking: bool) -> Result<()> {
        self.speaking.store(speaking, Ordering::SeqCst);
        Ok(())
    }

    fn frames(&self) -> mpsc::Sender<OpusFrame> {
        self.frame_tx.clone()
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Resolver that never touches the network.
pub struct TestResolver;

#[async_trait]
impl SourceResolver for TestResolver {
    async fn resolve(&self, reference: &str) -> Result<String> {
        if reference.is_empty() {
            return Err(Error::InvalidInput("empty reference".into()));
        }
        Ok(format!("http://resolved/{reference}"))
    }

    async fn metadata(&self, reference: &str) -> Result<TrackInfo> {
        Ok(TrackInfo {
            title: format!("Track {reference}"),
            duration_secs: Some(180),
            source_id: Some(format!("id-{reference}")),
            stream_url: Some(format!("http://resolved/{reference}")),
        })
    }
}

/// Host double that counts presence clears and idle notices.
#[derive(Default)]
pub struct CountingHost {
    pub presence_clears: AtomicUsize,
    pub idle_notices: AtomicUsize,
}

#[async_trait]
impl PresenceReset for CountingHost {
    async fn clear_presence(&self, _channel: ChannelId) -> Result<()> {
        self.presence_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl IdleNotifier for CountingHost {
    async fn notify_idle(&self, _channel: ChannelId) -> Result<()> {
        self.idle_notices.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Receive events until one matches, failing after five seconds.
pub async fn expect_event<F>(
    rx: &mut broadcast::Receiver<PlayerEvent>,
    what: &str,
    matches: F,
) -> PlayerEvent
where
    F: Fn(&PlayerEvent) -> bool,
{
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("event bus closed while waiting for {what}")
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {what} event within {deadline:?}"))
}
