//! Session health check
//!
//! Periodically inspects the frame clock and the transport sink. A session
//! that has produced no frames past the stall threshold, or whose sink went
//! unready, is reported to the supervisor as a recoverable fault. The check
//! starts only after a grace period so slow startups are not misread as
//! stalls.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::error::StreamError;

use super::PipelineShared;

pub(super) async fn run(shared: Arc<PipelineShared>, error_tx: mpsc::Sender<StreamError>) {
    tokio::select! {
        _ = shared.cancel.cancelled() => return,
        _ = tokio::time::sleep(shared.settings.health_grace()) => {}
    }

    let mut ticker = tokio::time::interval(shared.settings.health_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if !shared.is_playing() {
            return;
        }

        let fault = if !shared.sink.is_ready() {
            Some("transport sink not ready".to_string())
        } else {
            let age = shared.frame_age();
            if age > shared.settings.stall_threshold() {
                Some(format!("no frames produced for {}s", age.as_secs()))
            } else {
                None
            }
        };

        if let Some(reason) = fault {
            warn!(channel = %shared.channel_id, reason, "stream health check failed");
            if error_tx.send(StreamError::HealthCheck(reason)).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::pipeline::StreamPipeline;
    use crate::testutil::{fast_stream_settings, MockResolver, MockSink};
    use chanter_common::config::StreamSettings;
    use chanter_common::ChannelId;
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn shared_with(sink: Arc<MockSink>, settings: StreamSettings) -> Arc<PipelineShared> {
        let (event_tx, _) = broadcast::channel(16);
        let pipeline = StreamPipeline::new(
            ChannelId(8),
            settings,
            Arc::new(MockResolver::new("http://test/stream")),
            sink,
            "ref".into(),
            event_tx,
        );
        pipeline.shared.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_frame_clock_raises_a_fault() {
        let sink = Arc::new(MockSink::new(4));
        let shared = shared_with(sink, fast_stream_settings());
        shared.playing_tx.send_replace(true);
        shared.touch_frame_clock();

        let (error_tx, mut error_rx) = mpsc::channel(16);
        tokio::spawn(run(shared.clone(), error_tx));

        let err = tokio::time::timeout(Duration::from_secs(30), error_rx.recv())
            .await
            .expect("health check never fired")
            .expect("error channel closed");
        match err {
            StreamError::HealthCheck(reason) => assert!(reason.contains("no frames")),
            other => panic!("unexpected error: {other:?}"),
        }
        shared.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn unready_sink_raises_a_fault() {
        let sink = Arc::new(MockSink::new(4));
        let shared = shared_with(sink.clone(), fast_stream_settings());
        shared.playing_tx.send_replace(true);
        shared.touch_frame_clock();
        sink.set_ready(false);

        let (error_tx, mut error_rx) = mpsc::channel(16);
        tokio::spawn(run(shared.clone(), error_tx));

        let err = tokio::time::timeout(Duration::from_secs(30), error_rx.recv())
            .await
            .expect("health check never fired")
            .expect("error channel closed");
        match err {
            StreamError::HealthCheck(reason) => assert!(reason.contains("not ready")),
            other => panic!("unexpected error: {other:?}"),
        }
        shared.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn a_healthy_session_stays_quiet() {
        let sink = Arc::new(MockSink::new(4));
        let settings = StreamSettings {
            stall_secs: 3600,
            ..fast_stream_settings()
        };
        let shared = shared_with(sink, settings);
        shared.playing_tx.send_replace(true);
        shared.touch_frame_clock();

        let (error_tx, mut error_rx) = mpsc::channel(16);
        tokio::spawn(run(shared.clone(), error_tx));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(error_rx.try_recv().is_err());
        shared.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn the_check_exits_once_playback_stops() {
        let sink = Arc::new(MockSink::new(4));
        let shared = shared_with(sink, fast_stream_settings());
        // playing stays false, so the first tick must end the loop

        let (error_tx, _error_rx) = mpsc::channel(16);
        let task = tokio::spawn(run(shared.clone(), error_tx));

        tokio::time::timeout(Duration::from_secs(30), task)
            .await
            .expect("health check did not exit")
            .unwrap();
    }
}
