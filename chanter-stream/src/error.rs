//! Streaming error taxonomy
//!
//! Every failure inside a streaming session is tagged with an [`ErrorClass`]
//! that decides how the supervisor reacts: construction errors abort startup,
//! terminal errors end the session, recoverable errors trigger a restart.

use thiserror::Error;

pub use chanter_common::{Error, Result};

/// How the supervisor should react to a [`StreamError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Session could not be assembled; reported to the caller, never retried
    Construction,
    /// Session must end; no restart is attempted
    Terminal,
    /// Transient fault; the session may restart from the same source
    Recoverable,
}

/// Errors produced inside a streaming session
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// The Opus encoder could not be allocated or configured
    #[error("failed to allocate encoder: {0}")]
    EncoderInit(String),

    /// The decoder subprocess could not be spawned
    #[error("failed to spawn decoder: {0}")]
    DecoderSpawn(String),

    /// The transport sink never became ready within the startup window
    #[error("transport sink not ready")]
    TransportNotReady,

    /// The outbound frame channel was closed by the transport
    #[error("transport channel closed")]
    TransportClosed,

    /// The audio source connection dropped mid-stream
    #[error("source connection closed: {0}")]
    SourceClosed(String),

    /// The source reference could not be resolved to a playable URL
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// The decoder reached the end of the source; a normal outcome
    #[error("end of stream")]
    EndOfStream,

    /// PCM could not be encoded into an Opus frame
    #[error("frame encoding failed: {0}")]
    Encode(String),

    /// The health-check loop flagged the session as unhealthy
    #[error("stream health check failed: {0}")]
    HealthCheck(String),

    /// A read from the decoder took longer than the configured timeout
    #[error("timed out waiting for audio data")]
    ReadTimeout,

    /// The restart budget was spent without the session recovering
    #[error("max restarts exceeded after {attempts} attempts")]
    RestartsExhausted { attempts: u32 },
}

impl StreamError {
    /// The supervisor reaction class for this error
    pub fn class(&self) -> ErrorClass {
        match self {
            StreamError::EncoderInit(_) => ErrorClass::Construction,
            StreamError::HealthCheck(_) | StreamError::ReadTimeout => ErrorClass::Recoverable,
            StreamError::DecoderSpawn(_)
            | StreamError::TransportNotReady
            | StreamError::TransportClosed
            | StreamError::SourceClosed(_)
            | StreamError::InvalidSource(_)
            | StreamError::EndOfStream
            | StreamError::Encode(_)
            | StreamError::RestartsExhausted { .. } => ErrorClass::Terminal,
        }
    }

    /// Whether a restart may recover from this error
    pub fn is_recoverable(&self) -> bool {
        self.class() == ErrorClass::Recoverable
    }

    /// Whether this error is the normal end of a track rather than a fault
    pub fn is_normal_end(&self) -> bool {
        matches!(self, StreamError::EndOfStream)
    }
}
