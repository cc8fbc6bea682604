//! # Chanter Common Library
//!
//! Shared code for the Chanter streaming core:
//! - Error types
//! - Event types (PlayerEvent enum)
//! - Channel identifiers
//! - Configuration loading

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
pub use types::ChannelId;
