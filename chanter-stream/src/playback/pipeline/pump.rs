//! Frame pump
//!
//! Runs the decoder subprocess, slices its PCM output into 20 ms quanta,
//! encodes each quantum, and pushes the frames into the transport sink.
//! When the supervisor grants a restart the pump re-resolves the source and
//! spawns a fresh decoder; the Opus encoder itself is reused across attempts.

use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use chanter_common::config::StreamSettings;

use crate::codec::{FrameCodec, QUANTUM_BYTES, READ_QUANTA, SAMPLE_RATE};
use crate::error::StreamError;
use crate::transport::OpusFrame;

use super::PipelineShared;

const READY_POLL: Duration = Duration::from_millis(100);

/// How one decoding attempt ended
enum PumpExit {
    /// Decoder output ran dry; the track finished
    Completed,
    /// Session was cancelled from outside
    Cancelled,
    /// Attempt died with an error the supervisor must judge
    Failed(StreamError),
}

enum Readiness {
    Ready,
    TimedOut,
    Cancelled,
}

pub(super) async fn run(
    shared: Arc<PipelineShared>,
    mut codec: FrameCodec,
    initial_url: String,
    error_tx: mpsc::Sender<StreamError>,
    mut restart_rx: mpsc::Receiver<()>,
) {
    let mut url = Some(initial_url);

    loop {
        // A new attempt is underway; the supervisor may grant again.
        shared.restart_pending.store(false, Ordering::SeqCst);

        let stream_url = match url.take() {
            Some(resolved) => resolved,
            None => match shared.resolver.resolve(&shared.source_ref).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    let _ = error_tx
                        .send(StreamError::InvalidSource(e.to_string()))
                        .await;
                    if !wait_for_restart(&shared, &mut restart_rx).await {
                        break;
                    }
                    continue;
                }
            },
        };

        match transcode(&shared, &mut codec, &stream_url).await {
            PumpExit::Cancelled => break,
            PumpExit::Completed => {
                let _ = error_tx.send(StreamError::EndOfStream).await;
                break;
            }
            PumpExit::Failed(err) => {
                let _ = error_tx.send(err).await;
                if !wait_for_restart(&shared, &mut restart_rx).await {
                    break;
                }
            }
        }
    }

    let dropped = shared.dropped_frames.load(Ordering::Relaxed);
    if dropped > 0 {
        info!(channel = %shared.channel_id, dropped, "frames dropped during session");
    }
    if let Err(e) = shared.sink.set_speaking(false).await {
        debug!(channel = %shared.channel_id, error = %e, "speaking reset failed");
    }
    shared.playing_tx.send_replace(false);
}

/// Block until the supervisor grants a restart or the session is cancelled.
async fn wait_for_restart(shared: &PipelineShared, restart_rx: &mut mpsc::Receiver<()>) -> bool {
    tokio::select! {
        _ = shared.cancel.cancelled() => false,
        received = restart_rx.recv() => {
            if received.is_none() {
                return false;
            }
            tokio::select! {
                _ = shared.cancel.cancelled() => false,
                _ = tokio::time::sleep(shared.settings.restart_delay()) => true,
            }
        }
    }
}

/// Run one decoder attempt to completion.
///
/// The child is killed on every exit path; `kill_on_drop` is only the
/// backstop for task panics.
async fn transcode(
    shared: &Arc<PipelineShared>,
    codec: &mut FrameCodec,
    url: &str,
) -> PumpExit {
    let mut child = match spawn_decoder(&shared.settings, url) {
        Ok(child) => child,
        Err(e) => return PumpExit::Failed(e),
    };

    let stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => {
            let _ = child.kill().await;
            return PumpExit::Failed(StreamError::DecoderSpawn("stdout not captured".into()));
        }
    };

    let exit = stream_frames(shared, codec, stdout).await;

    if let Err(e) = child.kill().await {
        debug!(channel = %shared.channel_id, error = %e, "decoder kill failed");
    }
    if let Err(e) = shared.sink.set_speaking(false).await {
        debug!(channel = %shared.channel_id, error = %e, "speaking reset failed");
    }

    exit
}

fn spawn_decoder(settings: &StreamSettings, url: &str) -> Result<Child, StreamError> {
    Command::new(&settings.decoder_bin)
        .args(["-reconnect", "1"])
        .args(["-reconnect_streamed", "1"])
        .args(["-reconnect_delay_max", "5"])
        .arg("-i")
        .arg(url)
        .args(["-f", "s16le"])
        .arg("-ar")
        .arg(SAMPLE_RATE.to_string())
        .args(["-ac", "2"])
        .args(["-loglevel", "warning"])
        .arg("pipe:1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| StreamError::DecoderSpawn(e.to_string()))
}

/// Pump PCM from `pcm` into the sink until the source ends or fails.
async fn stream_frames<R: AsyncRead + Unpin>(
    shared: &Arc<PipelineShared>,
    codec: &mut FrameCodec,
    mut pcm: R,
) -> PumpExit {
    match wait_until_ready(shared).await {
        Readiness::Ready => {}
        Readiness::TimedOut => return PumpExit::Failed(StreamError::TransportNotReady),
        Readiness::Cancelled => return PumpExit::Cancelled,
    }

    if let Err(e) = shared.sink.set_speaking(true).await {
        warn!(channel = %shared.channel_id, error = %e, "could not raise speaking indicator");
    }

    shared.touch_frame_clock();

    let mut buf = vec![0u8; READ_QUANTA * QUANTUM_BYTES];
    let mut pending: Vec<u8> = Vec::with_capacity(READ_QUANTA * QUANTUM_BYTES);

    loop {
        let read = tokio::select! {
            _ = shared.cancel.cancelled() => return PumpExit::Cancelled,
            read = tokio::time::timeout(shared.settings.read_timeout(), pcm.read(&mut buf)) => read,
        };

        let n = match read {
            Ok(Ok(0)) => {
                // Flush the trailing partial quantum, padded with silence.
                if !pending.is_empty() {
                    if let Err(e) = encode_and_send(shared, codec, &pending).await {
                        return PumpExit::Failed(e);
                    }
                }
                return PumpExit::Completed;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return PumpExit::Failed(StreamError::SourceClosed(e.to_string())),
            Err(_) => return PumpExit::Failed(StreamError::ReadTimeout),
        };

        pending.extend_from_slice(&buf[..n]);
        while pending.len() >= QUANTUM_BYTES {
            let quantum: Vec<u8> = pending.drain(..QUANTUM_BYTES).collect();
            if let Err(e) = encode_and_send(shared, codec, &quantum).await {
                return PumpExit::Failed(e);
            }
        }
    }
}

/// Encode one quantum and push it to the sink.
///
/// A full transport channel is not an error: the frame is dropped and
/// counted, keeping the pump realtime instead of building backlog.
async fn encode_and_send(
    shared: &Arc<PipelineShared>,
    codec: &mut FrameCodec,
    quantum: &[u8],
) -> Result<(), StreamError> {
    let encoded = codec.encode_quantum(quantum)?;
    let frames = shared.sink.frames();

    match tokio::time::timeout(
        shared.settings.send_timeout(),
        frames.send(OpusFrame::new(encoded)),
    )
    .await
    {
        Ok(Ok(())) => {
            shared.touch_frame_clock();
            Ok(())
        }
        Ok(Err(_)) => Err(StreamError::TransportClosed),
        Err(_) => {
            let dropped = shared.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(channel = %shared.channel_id, dropped, "frame dropped on full transport channel");
            Ok(())
        }
    }
}

/// Poll the sink until it reports ready, up to the configured wait.
async fn wait_until_ready(shared: &PipelineShared) -> Readiness {
    let deadline = Instant::now() + shared.settings.ready_wait();
    while !shared.sink.is_ready() {
        if Instant::now() >= deadline {
            return Readiness::TimedOut;
        }
        tokio::select! {
            _ = shared.cancel.cancelled() => return Readiness::Cancelled,
            _ = tokio::time::sleep(READY_POLL) => {}
        }
    }
    Readiness::Ready
}
