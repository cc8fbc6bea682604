//! Playback orchestration
//!
//! A [`QueueRegistry`] owns one [`PlaybackQueue`] per channel. Each queue
//! drives at most one [`StreamPipeline`] at a time and advances itself when
//! the session ends. The [`IdleMonitor`] tears down channels nobody uses.

pub mod item;
pub mod monitor;
pub mod pipeline;
pub mod queue;
pub mod registry;

pub use item::QueueItem;
pub use monitor::IdleMonitor;
pub use pipeline::StreamPipeline;
pub use queue::PlaybackQueue;
pub use registry::QueueRegistry;
