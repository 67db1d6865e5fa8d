use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{
    connection::VoiceConnector,
    events::{EventBus, PlayerEvent},
    player::{AddOutcome, IdleHook, NowPlaying, Player, QueueSnapshot, SkipOutcome},
    MusicStatus,
};
use crate::config::Config;
use crate::error::{MusicError, Result};
use crate::sources::{SongMetadata, SongResolver};

type Registry = Arc<DashMap<GuildId, Arc<Player>>>;

/// Registro de players, uno por guild
///
/// Built once at startup and handed to whatever dispatches commands. Players
/// are created on demand and evicted once idle with an empty queue and no
/// request in flight; a later call simply gets a fresh idle player.
pub struct MusicQueueManager {
    players: Registry,
    resolver: SongResolver,
    connector: Arc<dyn VoiceConnector>,
    events: EventBus,
    max_queue_size: usize,
    resolve_timeout: Duration,
}

impl MusicQueueManager {
    pub fn new(config: &Config, resolver: SongResolver, connector: Arc<dyn VoiceConnector>) -> Self {
        Self {
            players: Arc::new(DashMap::new()),
            resolver,
            connector,
            events: EventBus::new(config.event_buffer),
            max_queue_size: config.max_queue_size,
            resolve_timeout: config.resolve_timeout,
        }
    }

    fn spawn_player(&self, guild_id: GuildId) -> Arc<Player> {
        let registry = Arc::downgrade(&self.players);
        let on_idle: IdleHook = Box::new(move |guild_id| {
            if let Some(players) = registry.upgrade() {
                evict(&players, guild_id);
            }
        });

        Player::spawn(
            guild_id,
            self.max_queue_size,
            Arc::clone(&self.connector),
            self.events.clone(),
            Some(on_idle),
        )
    }

    /// Player de la guild, creándolo si no existe
    ///
    /// Only commands go through here; each one evicts the player again if it
    /// ends idle and empty. Reads use `existing` and never register a player.
    pub(crate) fn get(&self, guild_id: GuildId) -> Arc<Player> {
        let entry = self
            .players
            .entry(guild_id)
            .or_insert_with(|| self.spawn_player(guild_id));
        Arc::clone(entry.value())
    }

    fn existing(&self, guild_id: GuildId) -> Option<Arc<Player>> {
        self.players.get(&guild_id).map(|entry| Arc::clone(entry.value()))
    }

    fn evict_if_idle(&self, guild_id: GuildId) {
        evict(&self.players, guild_id);
    }

    /// Resuelve una búsqueda y agrega el resultado a la cola
    ///
    /// Resolution runs outside the guild's lock and is bounded by the
    /// configured timeout. If the guild is stopped while it runs, the result
    /// is discarded with [`MusicError::Cancelled`].
    pub async fn add_to_queue(
        &self,
        guild_id: GuildId,
        query: &str,
        shuffle: bool,
        next: bool,
    ) -> Result<AddOutcome> {
        let ticket = {
            let entry = self
                .players
                .entry(guild_id)
                .or_insert_with(|| self.spawn_player(guild_id));
            entry.value().ticket()
        };

        let result = match tokio::time::timeout(self.resolve_timeout, self.resolver.resolve(query)).await {
            Err(_) => Err(MusicError::ResolutionTimeout(self.resolve_timeout)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(songs)) => {
                ticket
                    .player()
                    .enqueue(songs, next, shuffle, ticket.epoch())
                    .await
            }
        };

        drop(ticket);
        self.evict_if_idle(guild_id);

        match &result {
            Ok(outcome) => info!(
                "➕ {} canciones agregadas en guild {} (posición {})",
                outcome.songs.len(),
                guild_id,
                outcome.position
            ),
            Err(e) => warn!("⚠️ No se pudo agregar '{}' en guild {}: {}", query, guild_id, e),
        }
        result
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<()> {
        let result = self.get(guild_id).pause().await;
        self.evict_if_idle(guild_id);
        result
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<()> {
        let result = self.get(guild_id).resume().await;
        self.evict_if_idle(guild_id);
        result
    }

    /// Salta `n` canciones contando la actual
    pub async fn skip(&self, guild_id: GuildId, n: i64) -> Result<SkipOutcome> {
        let result = self.get(guild_id).skip(n).await;
        self.evict_if_idle(guild_id);
        result
    }

    pub async fn shuffle(&self, guild_id: GuildId) -> Result<usize> {
        let result = self.get(guild_id).shuffle();
        self.evict_if_idle(guild_id);
        result
    }

    pub async fn clear(&self, guild_id: GuildId, include_current: bool) -> Result<usize> {
        let result = self.get(guild_id).clear(include_current).await;
        self.evict_if_idle(guild_id);
        result
    }

    /// Detiene la guild y descarta las búsquedas pendientes
    pub async fn stop(&self, guild_id: GuildId) -> Result<usize> {
        let result = self.get(guild_id).stop().await;
        self.evict_if_idle(guild_id);
        result
    }

    /// Cola de la guild, actual primero; vacía si no hay player
    pub fn queue(&self, guild_id: GuildId) -> Vec<SongMetadata> {
        self.existing(guild_id)
            .map(|player| player.songs())
            .unwrap_or_default()
    }

    pub fn status(&self, guild_id: GuildId) -> MusicStatus {
        self.existing(guild_id)
            .map(|player| player.status())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, guild_id: GuildId) -> QueueSnapshot {
        self.existing(guild_id)
            .map(|player| player.snapshot())
            .unwrap_or_default()
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> Option<NowPlaying> {
        let player = self.existing(guild_id)?;
        player.now_playing().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Guilds con un player registrado
    pub fn active_guilds(&self) -> Vec<GuildId> {
        self.players.iter().map(|entry| *entry.key()).collect()
    }

    pub fn resolver(&self) -> &SongResolver {
        &self.resolver
    }

    /// Detiene todas las guilds; usado al apagar el bot
    pub async fn shutdown(&self) {
        let players: Vec<Arc<Player>> = self
            .players
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        info!("🛑 Deteniendo {} players", players.len());
        for player in players {
            if let Err(e) = player.stop().await {
                warn!("⚠️ Error al detener guild {}: {}", player.guild_id(), e);
            }
            self.evict_if_idle(player.guild_id());
        }
    }
}

fn evict(players: &DashMap<GuildId, Arc<Player>>, guild_id: GuildId) {
    if players.remove_if(&guild_id, |_, player| player.is_evictable()).is_some() {
        debug!("🧹 Player de guild {} liberado", guild_id);
    }
}
