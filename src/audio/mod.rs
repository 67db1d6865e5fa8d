//! # Audio Module
//!
//! Per-guild playback: queues, the player state machine, and the registry
//! that owns one player per guild.
//!
//! ## Architecture
//!
//! ### [`queue`] - Guild Queue
//! - Explicit current slot plus an ordered list of upcoming songs
//! - "Play next" insertion, tail shuffle, multi-skip, clear
//!
//! ### [`player`] - Player
//! - `Idle → Playing ⇄ Paused → Stopped → Idle` state machine
//! - Serializes every mutation of its guild's queue behind one lock
//! - Drives the voice stream without holding that lock across I/O
//!
//! ### [`manager`] - Registry
//! - Maps guild ids to players, creating them on demand
//! - Resolves queries outside the per-guild lock, with a timeout
//! - Evicts idle, empty players
//!
//! ### [`connection`] / [`events`]
//! - Seam to the voice transport (songbird in production)
//! - Broadcast of now-playing / stopped notifications
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guild_jukebox::audio::MusicQueueManager;
//! use serenity::all::GuildId;
//!
//! # async fn example(manager: MusicQueueManager) -> guild_jukebox::error::Result<()> {
//! let guild_id = GuildId::new(123456789);
//!
//! manager.add_to_queue(guild_id, "never gonna give you up", false, false).await?;
//! manager.pause(guild_id).await?;
//! manager.resume(guild_id).await?;
//! manager.skip(guild_id, 1).await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod events;
pub mod manager;
pub mod player;
pub mod queue;

use serde::Serialize;
use std::fmt;

pub use connection::{SongbirdConnector, StreamConnection, StreamSignal, VoiceConnector};
pub use events::{EventBus, PlayerEvent, PlayerEventKind};
pub use manager::MusicQueueManager;
pub use player::{AddOutcome, NowPlaying, Player, QueueSnapshot, SkipOutcome};
pub use queue::GuildQueue;

/// Estado de reproducción de una guild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum MusicStatus {
    /// No stream open; the queue holds nothing to play.
    #[default]
    Idle,
    Playing,
    Paused,
    /// Playback ended and the connection is being released.
    Stopped,
}

impl MusicStatus {
    /// Playing or paused: a song occupies the current slot.
    pub fn is_active(&self) -> bool {
        matches!(self, MusicStatus::Playing | MusicStatus::Paused)
    }
}

impl fmt::Display for MusicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MusicStatus::Idle => "idle",
            MusicStatus::Playing => "playing",
            MusicStatus::Paused => "paused",
            MusicStatus::Stopped => "stopped",
        };
        f.write_str(label)
    }
}
