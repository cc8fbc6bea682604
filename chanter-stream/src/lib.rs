//! Chanter streaming core
//!
//! Per-channel playback queues feeding supervised Opus streaming sessions.
//! A session decodes a source URL through an external decoder subprocess,
//! encodes 20 ms frames, and pushes them into a host-provided transport sink.
//! Sessions are monitored for stalls and restarted within a bounded budget;
//! idle channels are torn down by a background monitor.

pub mod codec;
pub mod db;
pub mod error;
pub mod playback;
pub mod resolver;
pub mod transport;

pub use chanter_common::{ChannelId, Error, Result};
pub use error::{ErrorClass, StreamError};

#[cfg(test)]
pub(crate) mod testutil;
