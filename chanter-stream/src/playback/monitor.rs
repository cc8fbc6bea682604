//! Idle channel monitor
//!
//! Tracks the last user activity per channel and periodically tears down
//! channels that stayed quiet past the idle timeout. Teardown goes through
//! the registry so the queue, the session, and the voice connection are all
//! released together; the host is told through [`PresenceReset`] and
//! [`IdleNotifier`] so it can update whatever its users see.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use chanter_common::config::IdleSettings;
use chanter_common::events::PlayerEvent;
use chanter_common::ChannelId;

use crate::playback::registry::QueueRegistry;
use crate::transport::{IdleNotifier, PresenceReset};

/// Background monitor that tears down idle channels
pub struct IdleMonitor {
    registry: Arc<QueueRegistry>,
    presence: Arc<dyn PresenceReset>,
    notifier: Arc<dyn IdleNotifier>,
    settings: IdleSettings,
    last_activity: RwLock<HashMap<ChannelId, Instant>>,
    event_tx: broadcast::Sender<PlayerEvent>,
}

impl IdleMonitor {
    pub fn new(
        registry: Arc<QueueRegistry>,
        presence: Arc<dyn PresenceReset>,
        notifier: Arc<dyn IdleNotifier>,
        settings: IdleSettings,
    ) -> Self {
        let event_tx = registry.event_sender();
        IdleMonitor {
            registry,
            presence,
            notifier,
            settings,
            last_activity: RwLock::new(HashMap::new()),
            event_tx,
        }
    }

    /// Record user activity on a channel, resetting its idle clock.
    pub async fn update_activity(&self, channel: ChannelId) {
        self.last_activity
            .write()
            .await
            .insert(channel, Instant::now());
    }

    /// Stop tracking a channel, e.g. after an explicit disconnect.
    pub async fn remove_channel(&self, channel: ChannelId) {
        self.last_activity.write().await.remove(&channel);
    }

    pub async fn is_tracked(&self, channel: ChannelId) -> bool {
        self.last_activity.read().await.contains_key(&channel)
    }

    /// Run the scan loop until the returned handle is aborted.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.settings.scan_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.scan().await;
            }
        })
    }

    /// One pass over the tracked channels.
    pub async fn scan(&self) {
        let timeout = self.settings.timeout();
        let expired: Vec<ChannelId> = {
            let activity = self.last_activity.read().await;
            activity
                .iter()
                .filter(|(_, seen)| seen.elapsed() >= timeout)
                .map(|(channel, _)| *channel)
                .collect()
        };

        for channel in expired {
            let Some(queue) = self.registry.get(channel).await else {
                debug!(channel = %channel, "idle channel has no queue, untracking");
                self.remove_channel(channel).await;
                continue;
            };

            if !queue.is_playing().await {
                debug!(channel = %channel, "idle channel is not streaming, untracking");
                self.remove_channel(channel).await;
                continue;
            }

            info!(channel = %channel, "idle timeout reached, tearing channel down");
            self.registry.remove(channel).await;

            if let Err(e) = self.presence.clear_presence(channel).await {
                warn!(channel = %channel, error = %e, "could not clear presence");
            }
            if let Err(e) = self.notifier.notify_idle(channel).await {
                warn!(channel = %channel, error = %e, "could not deliver idle notice");
            }

            let _ = self.event_tx.send(PlayerEvent::IdleTimeout {
                channel_id: channel,
                timestamp: chrono::Utc::now(),
            });
            self.remove_channel(channel).await;
        }
    }
}
