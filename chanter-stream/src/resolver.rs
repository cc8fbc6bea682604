//! Source resolution
//!
//! Turns user-supplied references (search terms, page URLs) into direct
//! stream URLs and track metadata. The production implementation shells out
//! to yt-dlp; the trait keeps the queue and pipeline testable without it.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use chanter_common::{Error, Result};

/// Metadata for a resolved track
#[derive(Debug, Clone)]
pub struct TrackInfo {
    /// Display title
    pub title: String,
    /// Track length, when the source reports one
    pub duration_secs: Option<u64>,
    /// Stable identifier on the source platform
    pub source_id: Option<String>,
    /// Direct stream URL valid at resolution time
    pub stream_url: Option<String>,
}

/// Resolves source references into playable URLs and metadata
#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Resolve a reference to a direct stream URL.
    ///
    /// Stream URLs expire, so this is called again right before each
    /// playback start rather than cached long-term.
    async fn resolve(&self, reference: &str) -> Result<String>;

    /// Fetch title and duration for a reference.
    async fn metadata(&self, reference: &str) -> Result<TrackInfo>;
}

/// Resolver backed by the yt-dlp command-line tool
pub struct YtDlpResolver {
    binary: String,
}

#[derive(Debug, Deserialize)]
struct YtDlpOutput {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    url: Option<String>,
}

impl YtDlpResolver {
    pub fn new() -> Self {
        Self::with_binary("yt-dlp")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        YtDlpResolver {
            binary: binary.into(),
        }
    }

    async fn probe(&self, reference: &str) -> Result<YtDlpOutput> {
        debug!(reference, "probing source");

        let output = Command::new(&self.binary)
            .arg("-j")
            .arg("--no-playlist")
            .args(["-f", "bestaudio/best"])
            .arg(reference)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::InvalidInput(format!(
                "could not resolve '{}': {}",
                reference,
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Internal(format!("unreadable resolver output: {e}")))
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceResolver for YtDlpResolver {
    async fn resolve(&self, reference: &str) -> Result<String> {
        let probed = self.probe(reference).await?;
        probed
            .url
            .ok_or_else(|| Error::NotFound(format!("no stream URL for '{reference}'")))
    }

    async fn metadata(&self, reference: &str) -> Result<TrackInfo> {
        let probed = self.probe(reference).await?;
        Ok(TrackInfo {
            title: probed.title.unwrap_or_else(|| reference.to_string()),
            duration_secs: probed.duration.map(|d| d as u64),
            source_id: probed.id,
            stream_url: probed.url,
        })
    }
}
