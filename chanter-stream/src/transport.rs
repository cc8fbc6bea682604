//! Transport seams
//!
//! The streaming core never talks to a voice backend directly. It pushes
//! encoded frames into a [`VoiceSink`] and reports idle teardown through
//! [`PresenceReset`] and [`IdleNotifier`]. Hosts implement these traits for
//! their gateway; tests implement them in memory.

use async_trait::async_trait;
use tokio::sync::mpsc;

use chanter_common::{ChannelId, Result};

/// One encoded 20 ms Opus frame ready for the wire
#[derive(Debug, Clone)]
pub struct OpusFrame {
    pub data: Vec<u8>,
}

impl OpusFrame {
    pub fn new(data: Vec<u8>) -> Self {
        OpusFrame { data }
    }
}

/// Outbound voice connection for one channel
#[async_trait]
pub trait VoiceSink: Send + Sync {
    /// Whether the sink can currently accept frames
    fn is_ready(&self) -> bool;

    /// Toggle the speaking indicator on the transport
    async fn set_speaking(&self, speaking: bool) -> Result<()>;

    /// Channel that carries encoded frames to the transport
    fn frames(&self) -> mpsc::Sender<OpusFrame>;

    /// Tear down the voice connection
    async fn disconnect(&self) -> Result<()>;
}

/// Clears any now-playing presence a host shows for a channel
#[async_trait]
pub trait PresenceReset: Send + Sync {
    async fn clear_presence(&self, channel: ChannelId) -> Result<()>;
}

/// Lets a host tell users why their channel went quiet
#[async_trait]
pub trait IdleNotifier: Send + Sync {
    async fn notify_idle(&self, channel: ChannelId) -> Result<()>;
}
