//! # guild-jukebox
//!
//! Multi-guild music queue and playback coordinator for Discord bots.
//!
//! - [`sources`] turns a URL or free-text query into song metadata
//! - [`audio`] keeps one queue and player per guild and drives the voice stream
//! - [`bot`] wires the registry to the Discord gateway

pub mod audio;
pub mod bot;
pub mod cache;
pub mod config;
pub mod error;
pub mod sources;

pub use audio::{MusicQueueManager, MusicStatus};
pub use config::Config;
pub use error::{MusicError, Result};
pub use sources::{SongMetadata, SongResolver, Source};
