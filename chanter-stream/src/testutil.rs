//! In-memory doubles for unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use chanter_common::config::StreamSettings;
use chanter_common::{Error, Result};

use crate::resolver::{SourceResolver, TrackInfo};
use crate::transport::{OpusFrame, VoiceSink};

/// Voice sink backed by an in-process channel.
pub(crate) struct MockSink {
    ready: AtomicBool,
    speaking: AtomicBool,
    frame_tx: mpsc::Sender<OpusFrame>,
    frame_rx: Mutex<Option<mpsc::Receiver<OpusFrame>>>,
}

impl MockSink {
    pub(crate) fn new(capacity: usize) -> Self {
        let (frame_tx, frame_rx) = mpsc::channel(capacity);
        MockSink {
            ready: AtomicBool::new(true),
            speaking: AtomicBool::new(false),
            frame_tx,
            frame_rx: Mutex::new(Some(frame_rx)),
        }
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub(crate) fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Take the receiving end of the frame channel.
    ///
    /// Dropping the returned receiver makes later sends fail, which is how
    /// tests simulate a transport that closed underneath the session.
    pub(crate) fn take_receiver(&self) -> mpsc::Receiver<OpusFrame> {
        self.frame_rx
            .lock()
            .unwrap()
            .take()
            .expect("frame receiver already taken")
    }
}

#[async_trait]
impl VoiceSink for MockSink {
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
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Resolver that hands back a fixed URL without touching the network.
pub(crate) struct MockResolver {
    url: String,
    fail: AtomicBool,
    pub(crate) resolve_calls: AtomicUsize,
}

impl MockResolver {
    pub(crate) fn new(url: impl Into<String>) -> Self {
        MockResolver {
            url: url.into(),
            fail: AtomicBool::new(false),
            resolve_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceResolver for MockResolver {
    async fn resolve(&self, reference: &str) -> Result<String> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::NotFound(format!("no source for '{reference}'")));
        }
        Ok(self.url.clone())
    }

    async fn metadata(&self, reference: &str) -> Result<TrackInfo> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::NotFound(format!("no source for '{reference}'")));
        }
        Ok(TrackInfo {
            title: format!("Track {reference}"),
            duration_secs: Some(180),
            source_id: Some(format!("id-{reference}")),
            stream_url: Some(self.url.clone()),
        })
    }
}

/// Stream settings with timings collapsed for fast tests.
pub(crate) fn fast_stream_settings() -> StreamSettings {
    StreamSettings {
        read_timeout_secs: 1,
        send_timeout_ms: 20,
        health_grace_secs: 1,
        health_interval_secs: 1,
        stall_secs: 1,
        restart_delay_secs: 0,
        ..StreamSettings::default()
    }
}
