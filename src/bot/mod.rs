//! # Bot Module
//!
//! Gateway glue between Discord and the [`MusicQueueManager`].
//!
//! Command parsing and message rendering live outside this crate; here the
//! bot only keeps playback consistent with what Discord reports:
//!
//! - On `ready`, starts the background maintenance task (cache cleanup)
//! - On `voice_state_update`, stops a guild's playback when the bot is
//!   disconnected from its voice channel
//!
//! Player notifications are consumed by [`log_events`], which the binary
//! spawns next to the gateway client.

use serenity::{
    all::{Context, EventHandler, GuildId, Ready, VoiceState},
    async_trait,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{MusicQueueManager, PlayerEvent, PlayerEventKind},
    cache::MetadataCache,
};

/// Handler de eventos del gateway
pub struct JukeboxBot {
    manager: Arc<MusicQueueManager>,
    maintenance_interval: Duration,
    maintenance_started: AtomicBool,
}

impl JukeboxBot {
    pub fn new(manager: Arc<MusicQueueManager>, maintenance_interval: Duration) -> Self {
        Self {
            manager,
            maintenance_interval,
            maintenance_started: AtomicBool::new(false),
        }
    }

    async fn handle_disconnect(&self, guild_id: GuildId) {
        info!("🔌 Bot desconectado en guild {}", guild_id);
        match self.manager.stop(guild_id).await {
            Ok(removed) => debug!("Cola de guild {} descartada ({} canciones)", guild_id, removed),
            Err(e) => error!("Error al detener reproducción: {:?}", e),
        }
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        // `ready` se repite en cada reconexión
        if self.maintenance_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let cache = self.manager.resolver().cache().clone();
        let interval = self.maintenance_interval;
        tokio::spawn(async move {
            maintenance_tasks(cache, interval).await;
        });
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id {
            return;
        }

        if old.is_some() && new.channel_id.is_none() {
            if let Some(guild_id) = new.guild_id {
                self.handle_disconnect(guild_id).await;
            }
        }
    }
}

async fn maintenance_tasks(cache: MetadataCache, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // El primer tick es inmediato
    interval.tick().await;

    loop {
        interval.tick().await;

        cache.cleanup_old_entries();

        let metrics = cache.metrics();
        info!(
            "🧹 Tareas de mantenimiento completadas (cache: {} entradas, {:.0}% aciertos)",
            cache.len(),
            metrics.hit_rate() * 100.0
        );
    }
}

/// Registra cada evento de reproducción hasta que el bus se cierre
pub async fn log_events(mut rx: broadcast::Receiver<PlayerEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match &event.kind {
                PlayerEventKind::NowPlaying(song) => info!(
                    "🎶 [{}] Ahora suena: {} - {} ({})",
                    event.guild_id,
                    song.title(),
                    song.artist(),
                    if song.is_live() {
                        "en vivo".to_string()
                    } else {
                        humantime::format_duration(song.length()).to_string()
                    }
                ),
                PlayerEventKind::Paused => info!("⏸️ [{}] En pausa", event.guild_id),
                PlayerEventKind::Resumed => info!("▶️ [{}] Reanudado", event.guild_id),
                PlayerEventKind::Stopped => info!("⏹️ [{}] Reproducción terminada", event.guild_id),
                PlayerEventKind::Errored(reason) => warn!("❌ [{}] Error de reproducción: {}", event.guild_id, reason),
            },
            Err(RecvError::Lagged(missed)) => warn!("⚠️ Se perdieron {} eventos de reproducción", missed),
            Err(RecvError::Closed) => break,
        }
    }
}
