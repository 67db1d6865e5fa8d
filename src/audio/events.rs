use chrono::{DateTime, Utc};
use serenity::model::id::GuildId;
use tokio::sync::broadcast;
use tracing::trace;

use crate::sources::SongMetadata;

/// What changed in a guild's playback.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEventKind {
    /// A song started streaming.
    NowPlaying(SongMetadata),
    Paused,
    Resumed,
    /// Playback ended: queue exhausted, cleared, or stopped.
    Stopped,
    /// The stream failed; playback was torn down.
    Errored(String),
}

/// Notificación para la capa de presentación
#[derive(Debug, Clone)]
pub struct PlayerEvent {
    pub guild_id: GuildId,
    pub at: DateTime<Utc>,
    pub kind: PlayerEventKind,
}

/// Fan-out of player events to any number of subscribers.
///
/// Slow subscribers lag and miss events rather than blocking playback.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, guild_id: GuildId, kind: PlayerEventKind) {
        let event = PlayerEvent {
            guild_id,
            at: Utc::now(),
            kind,
        };
        // Sin suscriptores el evento se descarta
        if self.tx.send(event).is_err() {
            trace!("Evento sin suscriptores en guild {}", guild_id);
        }
    }
}
