//! Idle monitor against a live streaming session.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use chanter_common::events::PlayerEvent;
use chanter_common::ChannelId;
use chanter_stream::playback::{IdleMonitor, QueueRegistry};

use helpers::*;

#[tokio::test]
async fn idle_channels_are_torn_down() -> Result<()> {
    init_tracing();
    let pool = create_test_db().await;
    let dir = TempDir::new()?;
    let settings = test_settings(endless_decoder(&dir));

    let registry = Arc::new(QueueRegistry::new(
        pool,
        Arc::new(TestResolver),
        settings.clone(),
    ));
    let host = Arc::new(CountingHost::default());
    let monitor = IdleMonitor::new(
        registry.clone(),
        host.clone(),
        host.clone(),
        settings.idle.clone(),
    );

    let channel = ChannelId(1);
    let queue = registry.get_or_create(channel).await;
    queue
        .add_with_metadata("background-music".into(), "tester".into())
        .await?;

    let sink = TestSink::new();
    let mut events = registry.subscribe();
    queue.play(sink.clone()).await?;
    expect_event(&mut events, "TrackStarted", |e| {
        matches!(e, PlayerEvent::TrackStarted { .. })
    })
    .await;

    monitor.update_activity(channel).await;
    tokio::time::sleep(Duration::from_millis(1200)).await;
    monitor.scan().await;

    expect_event(&mut events, "IdleTimeout", |e| {
        matches!(e, PlayerEvent::IdleTimeout { .. })
    })
    .await;
    assert!(registry.get(channel).await.is_none());
    assert!(!monitor.is_tracked(channel).await);
    assert_eq!(host.presence_clears.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(host.idle_notices.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(sink.disconnect_count(), 1);
    Ok(())
}

#[tokio::test]
async fn recent_activity_keeps_the_channel_alive() -> Result<()> {
    init_tracing();
    let pool = create_test_db().await;
    let dir = TempDir::new()?;
    let settings = test_settings(endless_decoder(&dir));

    let registry = Arc::new(QueueRegistry::new(
        pool,
        Arc::new(TestResolver),
        settings.clone(),
    ));
    let host = Arc::new(CountingHost::default());
    let monitor = IdleMonitor::new(
        registry.clone(),
        host.clone(),
        host.clone(),
        settings.idle.clone(),
    );

    let channel = ChannelId(2);
    let queue = registry.get_or_create(channel).await;
    queue
        .add_with_metadata("still-listening".into(), "tester".into())
        .await?;

    let sink = TestSink::new();
    let mut events = registry.subscribe();
    queue.play(sink).await?;
    expect_event(&mut events, "TrackStarted", |e| {
        matches!(e, PlayerEvent::TrackStarted { .. })
    })
    .await;

    monitor.update_activity(channel).await;
    monitor.scan().await;

    assert!(registry.get(channel).await.is_some());
    assert!(monitor.is_tracked(channel).await);
    assert!(queue.is_playing().await);
    assert_eq!(host.idle_notices.load(std::sync::atomic::Ordering::SeqCst), 0);

    queue.stop_and_cleanup().await;
    Ok(())
}
