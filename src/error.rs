//! Error types for guild-jukebox.
//!
//! Every failure is scoped to a single guild; none of them is fatal to the
//! process. Operations that return one of these leave the guild's queue and
//! player exactly as they were before the call, except where documented
//! (connection failures tear the session down).

use std::time::Duration;

use thiserror::Error;

/// Main error type for queue, player and resolver operations.
#[derive(Debug, Error)]
pub enum MusicError {
    /// The query could not be turned into a playable song.
    #[error("could not resolve query: {0}")]
    Resolution(String),

    /// Playlist URLs are recognised but not expanded.
    #[error("playlists are not supported: {0}")]
    UnsupportedPlaylist(String),

    /// The URL host does not belong to any known backend.
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    /// Resolution did not finish in time.
    #[error("resolution timed out after {}", humantime::format_duration(*.0))]
    ResolutionTimeout(Duration),

    /// Shuffle needs at least two upcoming entries.
    #[error("not enough songs to shuffle: {upcoming} upcoming")]
    InsufficientQueue { upcoming: usize },

    /// Skip count outside `1..=remaining`.
    #[error("cannot skip {requested} songs, {available} available")]
    OutOfRange { requested: i64, available: usize },

    /// Command not valid in the current player state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The voice stream could not be opened, driven or closed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The queue reached its configured size limit.
    #[error("queue is full (max {max} songs)")]
    QueueFull { max: usize },

    /// Nothing to remove.
    #[error("queue is empty")]
    EmptyQueue,

    /// The session was stopped while this request was in flight.
    #[error("playback was stopped before the song could be queued")]
    Cancelled,

    /// HTTP request to a backend failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend returned a payload we could not decode.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MusicError {
    /// True for failures produced while resolving a query.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            Self::Resolution(_)
                | Self::UnsupportedPlaylist(_)
                | Self::UnsupportedSource(_)
                | Self::ResolutionTimeout(_)
                | Self::Http(_)
                | Self::Json(_)
        )
    }
}

/// Result alias used across the crate.
pub type Result<T, E = MusicError> = std::result::Result<T, E>;
