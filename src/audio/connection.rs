//! Voice stream seam.
//!
//! A [`VoiceConnector`] opens one [`StreamConnection`] per guild session. The
//! connection is owned by the guild's Player and nothing else writes to it.
//! Natural end-of-track and stream failures travel back to the Player as
//! [`StreamSignal`]s tagged with the token passed to `play`, so a signal for
//! a track that was already replaced can be recognised and dropped.

use async_trait::async_trait;
use serenity::model::id::GuildId;
use songbird::{
    input::{Input, YoutubeDl},
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{MusicError, Result};
use crate::sources::SongMetadata;

/// Señales que el stream envía al player
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    Ended { token: u64 },
    Failed { token: u64, reason: String },
}

pub type SignalSender = mpsc::UnboundedSender<StreamSignal>;

/// Opens streaming connections for guilds.
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(&self, guild_id: GuildId, signals: SignalSender) -> Result<Box<dyn StreamConnection>>;
}

/// One guild's open audio stream.
#[async_trait]
pub trait StreamConnection: Send + Sync {
    /// Replaces whatever is streaming with `song`, starting at its offset.
    async fn play(&mut self, song: &SongMetadata, token: u64) -> Result<()>;

    async fn pause(&mut self) -> Result<()>;

    async fn resume(&mut self) -> Result<()>;

    /// Playback position of the current track, if the transport knows it.
    async fn position(&self) -> Option<Duration>;

    /// Stops streaming and releases the transport.
    async fn close(&mut self);
}

/// Conector sobre las llamadas de voz de songbird
///
/// Joining and leaving voice channels belongs to the command layer; this
/// connector only streams into a call that already exists.
pub struct SongbirdConnector {
    songbird: Arc<Songbird>,
    http: reqwest::Client,
    volume: f32,
}

impl SongbirdConnector {
    pub fn new(songbird: Arc<Songbird>, volume: f32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            songbird,
            http,
            volume,
        })
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn connect(&self, guild_id: GuildId, signals: SignalSender) -> Result<Box<dyn StreamConnection>> {
        let call = self
            .songbird
            .get(guild_id)
            .ok_or_else(|| MusicError::Connection(format!("no hay llamada de voz activa en guild {}", guild_id)))?;

        info!("🔗 Stream abierto en guild {}", guild_id);
        Ok(Box::new(SongbirdStream {
            guild_id,
            call,
            http: self.http.clone(),
            volume: self.volume,
            signals,
            current: None,
        }))
    }
}

struct SongbirdStream {
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    http: reqwest::Client,
    volume: f32,
    signals: SignalSender,
    current: Option<TrackHandle>,
}

/// Posición desde la que retomar una canción, si no es el inicio
fn seek_target(song: &SongMetadata) -> Option<Duration> {
    let offset = song.offset();
    (!song.is_live() && !offset.is_zero()).then_some(offset)
}

fn control_error(err: impl std::fmt::Display) -> MusicError {
    MusicError::Connection(err.to_string())
}

#[async_trait]
impl StreamConnection for SongbirdStream {
    async fn play(&mut self, song: &SongMetadata, token: u64) -> Result<()> {
        if let Some(previous) = self.current.take() {
            let _ = previous.stop();
        }

        // yt-dlp entiende tanto YouTube como SoundCloud
        let input: Input = YoutubeDl::new(self.http.clone(), song.url().to_string()).into();
        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(input)
        };

        handle.set_volume(self.volume).map_err(control_error)?;
        if let Some(offset) = seek_target(song) {
            // El seek espera a que el input esté listo; no bloquea el play
            let track = handle.clone();
            let guild_id = self.guild_id;
            tokio::spawn(async move {
                if let Err(e) = track.seek_async(offset).await {
                    warn!("⚠️ No se pudo retomar en {:?} en guild {}: {}", offset, guild_id, e);
                }
            });
        }

        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    token,
                    signals: self.signals.clone(),
                },
            )
            .map_err(control_error)?;
        handle
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackErrorNotifier {
                    token,
                    signals: self.signals.clone(),
                },
            )
            .map_err(control_error)?;

        debug!("🎵 Reproduciendo {} en guild {} (token {})", song.title(), self.guild_id, token);
        self.current = Some(handle);
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        match &self.current {
            Some(track) => track.pause().map_err(control_error),
            None => Err(MusicError::Connection("no hay track activo".into())),
        }
    }

    async fn resume(&mut self) -> Result<()> {
        match &self.current {
            Some(track) => track.play().map_err(control_error),
            None => Err(MusicError::Connection("no hay track activo".into())),
        }
    }

    async fn position(&self) -> Option<Duration> {
        let track = self.current.as_ref()?;
        track.get_info().await.ok().map(|state| state.position)
    }

    async fn close(&mut self) {
        if let Some(track) = self.current.take() {
            let _ = track.stop();
        }
        self.call.lock().await.stop();
        info!("🔌 Stream cerrado en guild {}", self.guild_id);
    }
}

/// Avisa al player cuando un track termina
struct TrackEndNotifier {
    token: u64,
    signals: SignalSender,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        if self.signals.send(StreamSignal::Ended { token: self.token }).is_err() {
            debug!("Player ya no existe, fin de track ignorado");
        }
        None
    }
}

/// Avisa al player cuando un track falla
struct TrackErrorNotifier {
    token: u64,
    signals: SignalSender,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let reason = match ctx {
            EventContext::Track(tracks) => tracks
                .first()
                .map(|(state, _)| format!("{:?}", state.playing))
                .unwrap_or_else(|| "error de track".to_string()),
            _ => "error de track".to_string(),
        };
        warn!("❌ Error de stream (token {}): {}", self.token, reason);
        let _ = self.signals.send(StreamSignal::Failed {
            token: self.token,
            reason,
        });
        None
    }
}
