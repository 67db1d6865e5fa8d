//! Per-guild player.
//!
//! All mutations of a guild's queue and status go through one synchronous
//! lock around the player state. That guard is never held across an `.await`.
//! Stream I/O happens afterwards in `reconcile`, which serializes on
//! a separate async lock that guards only the connection, reads the desired
//! state and applies it. Because every mutation is followed by a reconcile,
//! the last one to run always sees the latest state.
//!
//! Two counters keep stale work out:
//! - the track token changes whenever the current song changes; completion
//!   and failure signals carry the token of the track they belong to.
//! - the session epoch changes on every stop; an enqueue carries the epoch
//!   seen when its request started and is refused if it moved.

use parking_lot::Mutex;
use serde::Serialize;
use serenity::model::id::GuildId;
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use super::{
    connection::{SignalSender, StreamConnection, StreamSignal, VoiceConnector},
    events::{EventBus, PlayerEventKind},
    queue::GuildQueue,
    MusicStatus,
};
use crate::error::{MusicError, Result};
use crate::sources::SongMetadata;

/// Called with the guild id each time the player settles in `Idle`.
pub type IdleHook = Box<dyn Fn(GuildId) + Send + Sync>;

/// Resultado de agregar canciones
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddOutcome {
    pub songs: Vec<SongMetadata>,
    /// Index of the first added song in the flat queue view.
    pub position: usize,
    /// True when this add started playback.
    pub started: bool,
}

/// Resultado de saltar canciones
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkipOutcome {
    pub skipped: usize,
    pub now_playing: Option<SongMetadata>,
}

/// Read model of a guild's queue for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub status: MusicStatus,
    pub current: Option<SongMetadata>,
    pub upcoming: Vec<SongMetadata>,
    /// Remaining known playback time; live songs do not count.
    pub total_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlaying {
    pub song: SongMetadata,
    /// `None` for live streams.
    pub position: Option<Duration>,
}

struct PlayerState {
    queue: GuildQueue,
    status: MusicStatus,
    epoch: u64,
    token: u64,
    pending: usize,
}

/// What the stream is actually doing.
#[derive(Default)]
struct StreamSlot {
    connection: Option<Box<dyn StreamConnection>>,
    token: Option<u64>,
    paused: bool,
}

/// What the stream should be doing, read under the state lock.
struct Desired {
    token: u64,
    song: Option<SongMetadata>,
    paused: bool,
}

pub struct Player {
    guild_id: GuildId,
    state: Mutex<PlayerState>,
    stream: AsyncMutex<StreamSlot>,
    connector: Arc<dyn VoiceConnector>,
    events: EventBus,
    signals: SignalSender,
    on_idle: Option<IdleHook>,
}

/// Marks an `add_to_queue` in flight for a player.
///
/// Holds the session epoch seen when the request started and keeps the
/// player from being evicted until dropped.
pub(crate) struct EnqueueTicket {
    player: Arc<Player>,
    epoch: u64,
}

impl EnqueueTicket {
    pub(crate) fn player(&self) -> &Arc<Player> {
        &self.player
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Drop for EnqueueTicket {
    fn drop(&mut self) {
        let mut state = self.player.state.lock();
        state.pending = state.pending.saturating_sub(1);
    }
}

impl Player {
    /// Crea un player en `Idle` y arranca su tarea de señales
    pub fn spawn(
        guild_id: GuildId,
        max_queue_size: usize,
        connector: Arc<dyn VoiceConnector>,
        events: EventBus,
        on_idle: Option<IdleHook>,
    ) -> Arc<Self> {
        let (signals, rx) = mpsc::unbounded_channel();
        let player = Arc::new(Self {
            guild_id,
            state: Mutex::new(PlayerState {
                queue: GuildQueue::new(max_queue_size),
                status: MusicStatus::Idle,
                epoch: 0,
                token: 0,
                pending: 0,
            }),
            stream: AsyncMutex::new(StreamSlot::default()),
            connector,
            events,
            signals,
            on_idle,
        });

        tokio::spawn(Self::listen(Arc::downgrade(&player), rx));
        debug!("🆕 Player creado para guild {}", guild_id);
        player
    }

    /// Entrega las señales del stream al player mientras exista
    async fn listen(player: Weak<Player>, mut rx: mpsc::UnboundedReceiver<StreamSignal>) {
        while let Some(signal) = rx.recv().await {
            let Some(player) = player.upgrade() else {
                break;
            };

            match signal {
                StreamSignal::Ended { token } => {
                    if let Err(e) = player.on_track_end(token).await {
                        warn!("⚠️ Error al avanzar tras fin de track en guild {}: {}", player.guild_id, e);
                    }
                }
                StreamSignal::Failed { token, reason } => player.on_stream_failure(token, reason).await,
            }
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub(crate) fn ticket(self: &Arc<Self>) -> EnqueueTicket {
        let mut state = self.state.lock();
        state.pending += 1;
        EnqueueTicket {
            player: Arc::clone(self),
            epoch: state.epoch,
        }
    }

    /// Inserta canciones ya resueltas y arranca la reproducción si estaba parado
    pub(crate) async fn enqueue(
        &self,
        songs: Vec<SongMetadata>,
        next: bool,
        shuffle_after: bool,
        epoch: u64,
    ) -> Result<AddOutcome> {
        let (position, started) = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                debug!("🚫 Sesión detenida en guild {}, se descartan {} canciones", self.guild_id, songs.len());
                return Err(MusicError::Cancelled);
            }

            let had_current = state.queue.current().is_some();
            let index = state.queue.add_all(songs.clone(), next)?;

            if shuffle_after {
                if let Err(e) = state.queue.shuffle_tail() {
                    debug!("Mezcla omitida en guild {}: {}", self.guild_id, e);
                }
            }

            let started = !state.status.is_active();
            if started {
                state.queue.promote();
                state.status = MusicStatus::Playing;
                state.token += 1;
            }

            (index + usize::from(had_current), started)
        };

        if started {
            self.reconcile().await?;
        }

        Ok(AddOutcome {
            songs,
            position,
            started,
        })
    }

    /// Pausa la reproducción actual
    pub(crate) async fn pause(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match state.status {
                MusicStatus::Playing => state.status = MusicStatus::Paused,
                MusicStatus::Paused => return Err(MusicError::InvalidState("already paused")),
                _ => return Err(MusicError::InvalidState("nothing is playing")),
            }
        }

        info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
        self.events.emit(self.guild_id, PlayerEventKind::Paused);
        self.reconcile().await
    }

    /// Reanuda la reproducción
    pub(crate) async fn resume(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match state.status {
                MusicStatus::Paused => state.status = MusicStatus::Playing,
                MusicStatus::Playing => return Err(MusicError::InvalidState("already playing")),
                _ => return Err(MusicError::InvalidState("nothing is playing")),
            }
        }

        info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
        self.events.emit(self.guild_id, PlayerEventKind::Resumed);
        self.reconcile().await
    }

    /// Salta `n` canciones, contando la actual
    pub(crate) async fn skip(&self, n: i64) -> Result<SkipOutcome> {
        let outcome = {
            let mut state = self.state.lock();
            let available = state.queue.len();
            let count = usize::try_from(n)
                .ok()
                .filter(|count| *count >= 1)
                .ok_or(MusicError::OutOfRange { requested: n, available })?;

            let skipped = state.queue.advance(count)?;
            state.token += 1;

            let now_playing = state.queue.current().cloned();
            state.status = if now_playing.is_some() {
                MusicStatus::Playing
            } else {
                MusicStatus::Stopped
            };

            SkipOutcome { skipped, now_playing }
        };

        info!("⏭️ {} canciones saltadas en guild {}", outcome.skipped, self.guild_id);
        if outcome.now_playing.is_none() {
            self.events.emit(self.guild_id, PlayerEventKind::Stopped);
        }
        self.reconcile().await?;
        Ok(outcome)
    }

    /// Mezcla las siguientes canciones
    pub(crate) fn shuffle(&self) -> Result<usize> {
        self.state.lock().queue.shuffle_tail()
    }

    /// Limpia la cola; con `include_current` también detiene la reproducción
    pub(crate) async fn clear(&self, include_current: bool) -> Result<usize> {
        let removed = {
            let mut state = self.state.lock();
            let nothing_to_remove = if include_current {
                state.queue.is_empty()
            } else {
                state.queue.upcoming_len() == 0
            };
            if nothing_to_remove {
                return Err(MusicError::EmptyQueue);
            }

            let removed = state.queue.clear(include_current);
            if include_current {
                state.token += 1;
                state.status = MusicStatus::Stopped;
            }
            removed
        };

        if include_current {
            self.events.emit(self.guild_id, PlayerEventKind::Stopped);
            self.reconcile().await?;
        }
        Ok(removed)
    }

    /// Detiene todo: vacía la cola, cierra el stream y cancela lo pendiente
    pub(crate) async fn stop(&self) -> Result<usize> {
        let (removed, was_active) = {
            let mut state = self.state.lock();
            let removed = state.queue.clear(true);
            let was_active = state.status.is_active();
            state.epoch += 1;
            state.token += 1;
            state.status = MusicStatus::Stopped;
            (removed, was_active)
        };

        info!("⏹️ Reproducción detenida en guild {} ({} canciones removidas)", self.guild_id, removed);
        if was_active {
            self.events.emit(self.guild_id, PlayerEventKind::Stopped);
        }
        self.reconcile().await?;
        Ok(removed)
    }

    /// Fin natural de un track: avanza como `skip(1)` sin reportar cola vacía
    pub(crate) async fn on_track_end(&self, token: u64) -> Result<()> {
        let next = {
            let mut state = self.state.lock();
            if state.token != token || !state.status.is_active() {
                debug!("Fin de track obsoleto en guild {} (token {})", self.guild_id, token);
                return Ok(());
            }

            if state.queue.advance(1).is_err() {
                state.queue.clear(true);
            }
            state.token += 1;

            let next = state.queue.current().cloned();
            state.status = if next.is_some() {
                MusicStatus::Playing
            } else {
                MusicStatus::Stopped
            };
            next
        };

        match &next {
            Some(song) => debug!("🎵 Siguiente en guild {}: {}", self.guild_id, song.title()),
            None => {
                info!("📭 Cola terminada en guild {}", self.guild_id);
                self.events.emit(self.guild_id, PlayerEventKind::Stopped);
            }
        }
        self.reconcile().await
    }

    /// Falla reportada por el stream de forma asíncrona
    pub(crate) async fn on_stream_failure(&self, token: u64, reason: String) {
        let mut slot = self.stream.lock().await;
        if self.state.lock().token != token {
            debug!("Falla de stream obsoleta en guild {} (token {})", self.guild_id, token);
            return;
        }

        let connection = slot.connection.take();
        let _ = self
            .fail_session(&mut slot, connection, token, MusicError::Connection(reason))
            .await;
    }

    /// Lleva el stream al estado deseado
    async fn reconcile(&self) -> Result<()> {
        let mut slot = self.stream.lock().await;
        let Desired { token, song, paused } = self.desired();

        let Some(song) = song else {
            Self::release(&mut slot).await;
            drop(slot);
            self.settle_idle();
            return Ok(());
        };

        let mut connection = match slot.connection.take() {
            Some(connection) => connection,
            None => {
                slot.token = None;
                slot.paused = false;
                match self.connector.connect(self.guild_id, self.signals.clone()).await {
                    Ok(connection) => connection,
                    Err(e) => return self.fail_session(&mut slot, None, token, e).await,
                }
            }
        };

        match self.apply(&mut slot, &mut *connection, &song, token, paused).await {
            Ok(()) => {
                slot.connection = Some(connection);
                Ok(())
            }
            Err(e) => self.fail_session(&mut slot, Some(connection), token, e).await,
        }
    }

    async fn apply(
        &self,
        slot: &mut StreamSlot,
        connection: &mut dyn StreamConnection,
        song: &SongMetadata,
        token: u64,
        paused: bool,
    ) -> Result<()> {
        if slot.token != Some(token) {
            connection.play(song, token).await?;
            slot.token = Some(token);
            slot.paused = false;
            info!("🎵 Reproduciendo en guild {}: {}", self.guild_id, song.title());
            self.events.emit(self.guild_id, PlayerEventKind::NowPlaying(song.clone()));
        }

        if paused && !slot.paused {
            connection.pause().await?;
            slot.paused = true;

            if let Some(position) = connection.position().await {
                let mut state = self.state.lock();
                if state.token == token {
                    state.queue.record_offset(position);
                }
            }
        } else if !paused && slot.paused {
            connection.resume().await?;
            slot.paused = false;
        }

        Ok(())
    }

    fn desired(&self) -> Desired {
        let state = self.state.lock();
        Desired {
            token: state.token,
            song: state.queue.current().cloned(),
            paused: state.status == MusicStatus::Paused,
        }
    }

    async fn release(slot: &mut StreamSlot) {
        if let Some(mut connection) = slot.connection.take() {
            connection.close().await;
        }
        slot.token = None;
        slot.paused = false;
    }

    /// Desmonta la sesión tras un error de conexión
    ///
    /// Only tears down when `token` is still current; a failure that belongs
    /// to a replaced track just drops the connection so the next reconcile
    /// reopens it.
    async fn fail_session(
        &self,
        slot: &mut StreamSlot,
        connection: Option<Box<dyn StreamConnection>>,
        token: u64,
        err: MusicError,
    ) -> Result<()> {
        let err = match err {
            MusicError::Connection(_) => err,
            other => MusicError::Connection(other.to_string()),
        };

        let torn_down = {
            let mut state = self.state.lock();
            if state.token == token {
                state.queue.clear(true);
                state.epoch += 1;
                state.token += 1;
                state.status = MusicStatus::Stopped;
                true
            } else {
                false
            }
        };

        if let Some(mut connection) = connection {
            connection.close().await;
        }
        slot.token = None;
        slot.paused = false;

        if !torn_down {
            warn!("⚠️ Error de conexión obsoleto en guild {}: {}", self.guild_id, err);
            return Ok(());
        }

        error!("❌ Error de conexión en guild {}: {}", self.guild_id, err);
        self.events.emit(self.guild_id, PlayerEventKind::Errored(err.to_string()));
        self.events.emit(self.guild_id, PlayerEventKind::Stopped);
        self.settle_idle();
        Err(err)
    }

    /// `Stopped → Idle` una vez liberada la conexión
    fn settle_idle(&self) {
        let idle = {
            let mut state = self.state.lock();
            if state.queue.current().is_none() && !state.status.is_active() {
                state.status = MusicStatus::Idle;
                true
            } else {
                false
            }
        };

        if idle {
            debug!("💤 Player inactivo en guild {}", self.guild_id);
            if let Some(hook) = &self.on_idle {
                hook(self.guild_id);
            }
        }
    }

    pub fn status(&self) -> MusicStatus {
        self.state.lock().status
    }

    /// Cola completa, actual primero
    pub fn songs(&self) -> Vec<SongMetadata> {
        self.state.lock().queue.songs()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock();
        QueueSnapshot {
            status: state.status,
            current: state.queue.current().cloned(),
            upcoming: state.queue.upcoming().cloned().collect(),
            total_duration: state.queue.total_duration(),
        }
    }

    /// Canción actual y su posición de reproducción
    pub async fn now_playing(&self) -> Option<NowPlaying> {
        let song = self.state.lock().queue.current().cloned()?;
        if song.is_live() {
            return Some(NowPlaying { song, position: None });
        }

        let reported = {
            let slot = self.stream.lock().await;
            match &slot.connection {
                Some(connection) => connection.position().await,
                None => None,
            }
        };

        let position = reported.unwrap_or(song.offset()).min(song.length());
        Some(NowPlaying {
            song,
            position: Some(position),
        })
    }

    /// Idle, empty, and no `add_to_queue` in flight.
    pub fn is_evictable(&self) -> bool {
        let state = self.state.lock();
        state.status == MusicStatus::Idle && state.queue.is_empty() && state.pending == 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::connection::fake::{FakeConnector, StreamCall};
    use crate::sources::tests::song;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    /// Polls `check` until it holds, yielding to spawned tasks in between.
    pub(crate) async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn player_with(connector: &FakeConnector, events: &EventBus, on_idle: Option<IdleHook>) -> Arc<Player> {
        Player::spawn(GuildId::new(1), 100, Arc::new(connector.clone()), events.clone(), on_idle)
    }

    fn player(connector: &FakeConnector) -> Arc<Player> {
        player_with(connector, &EventBus::new(32), None)
    }

    async fn add(player: &Arc<Player>, title: &str) -> Result<AddOutcome> {
        let ticket = player.ticket();
        player.enqueue(vec![song(title)], false, false, ticket.epoch()).await
    }

    fn titles(player: &Player) -> Vec<String> {
        player.songs().iter().map(|s| s.title().to_string()).collect()
    }

    fn drain(rx: &mut broadcast::Receiver<crate::audio::PlayerEvent>) -> Vec<PlayerEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn first_enqueue_starts_playback() {
        let connector = FakeConnector::default();
        let player = player(&connector);

        let outcome = add(&player, "a").await.unwrap();
        assert!(outcome.started);
        assert_eq!(outcome.position, 0);
        assert_eq!(player.status(), MusicStatus::Playing);

        let token = connector.last_token().unwrap();
        assert_eq!(
            connector.calls(),
            vec![StreamCall::Connect, StreamCall::Play { title: "a".into(), token }]
        );
    }

    #[tokio::test]
    async fn enqueue_while_playing_does_not_restart() {
        let connector = FakeConnector::default();
        let player = player(&connector);
        add(&player, "a").await.unwrap();
        add(&player, "b").await.unwrap();

        let ticket = player.ticket();
        let outcome = player
            .enqueue(vec![song("x")], true, false, ticket.epoch())
            .await
            .unwrap();

        assert!(!outcome.started);
        assert_eq!(outcome.position, 1);
        assert_eq!(titles(&player), ["a", "x", "b"]);
        assert_eq!(connector.calls().len(), 2);
    }

    #[tokio::test]
    async fn enqueue_with_shuffle_keeps_current() {
        let connector = FakeConnector::default();
        let player = player(&connector);
        for title in ["a", "b", "c", "d"] {
            add(&player, title).await.unwrap();
        }

        let ticket = player.ticket();
        player
            .enqueue(vec![song("e")], false, true, ticket.epoch())
            .await
            .unwrap();

        let queued = titles(&player);
        assert_eq!(queued[0], "a");
        let mut rest = queued[1..].to_vec();
        rest.sort();
        assert_eq!(rest, ["b", "c", "d", "e"]);
        assert_eq!(player.status(), MusicStatus::Playing);
    }

    #[tokio::test]
    async fn pause_twice_is_invalid_and_records_offset() {
        let connector = FakeConnector::default();
        let player = player(&connector);
        add(&player, "a").await.unwrap();

        player.pause().await.unwrap();
        let err = player.pause().await.unwrap_err();
        assert!(matches!(err, MusicError::InvalidState("already paused")));
        assert_eq!(player.status(), MusicStatus::Paused);
        assert_eq!(player.snapshot().current.unwrap().offset(), Duration::from_secs(30));

        player.resume().await.unwrap();
        assert!(matches!(player.resume().await, Err(MusicError::InvalidState("already playing"))));
        assert_eq!(connector.calls()[2..].to_vec(), vec![StreamCall::Pause, StreamCall::Resume]);
    }

    #[tokio::test]
    async fn pause_without_playback_is_invalid() {
        let player = player(&FakeConnector::default());
        assert!(matches!(player.pause().await, Err(MusicError::InvalidState(_))));
        assert!(matches!(player.resume().await, Err(MusicError::InvalidState(_))));
        assert_eq!(player.status(), MusicStatus::Idle);
    }

    #[tokio::test]
    async fn skip_out_of_range_changes_nothing() {
        let connector = FakeConnector::default();
        let player = player(&connector);
        add(&player, "a").await.unwrap();
        add(&player, "b").await.unwrap();

        assert!(matches!(player.skip(3).await, Err(MusicError::OutOfRange { requested: 3, available: 2 })));
        assert!(matches!(player.skip(0).await, Err(MusicError::OutOfRange { .. })));
        assert!(matches!(player.skip(-2).await, Err(MusicError::OutOfRange { requested: -2, .. })));
        assert_eq!(titles(&player), ["a", "b"]);
        assert_eq!(player.status(), MusicStatus::Playing);
    }

    #[tokio::test]
    async fn skip_to_end_releases_connection() {
        let connector = FakeConnector::default();
        let player = player(&connector);
        add(&player, "a").await.unwrap();
        add(&player, "b").await.unwrap();

        let outcome = player.skip(1).await.unwrap();
        assert_eq!(outcome.now_playing.unwrap().title(), "b");

        let outcome = player.skip(1).await.unwrap();
        assert!(outcome.now_playing.is_none());
        assert_eq!(player.status(), MusicStatus::Idle);
        assert_eq!(connector.calls().last(), Some(&StreamCall::Close));
        assert!(player.is_evictable());
    }

    #[tokio::test]
    async fn track_end_advances_and_ignores_stale_tokens() {
        let connector = FakeConnector::default();
        let player = player(&connector);
        add(&player, "a").await.unwrap();
        add(&player, "b").await.unwrap();
        add(&player, "c").await.unwrap();
        let first = connector.last_token().unwrap();

        connector.finish_current();
        wait_for(|| titles(&player) == ["b", "c"] && connector.last_token() != Some(first)).await;
        let second = connector.last_token();

        // Late signal for "a" must not skip "b"
        player.on_track_end(first).await.unwrap();
        assert_eq!(titles(&player), ["b", "c"]);

        connector.finish_current();
        wait_for(|| titles(&player) == ["c"] && connector.last_token() != second).await;
        connector.finish_current();
        wait_for(|| player.status() == MusicStatus::Idle).await;
        assert!(player.songs().is_empty());
    }

    #[tokio::test]
    async fn clear_upcoming_keeps_playing() {
        let connector = FakeConnector::default();
        let player = player(&connector);
        for title in ["a", "b", "c"] {
            add(&player, title).await.unwrap();
        }

        assert_eq!(player.clear(false).await.unwrap(), 2);
        assert_eq!(player.status(), MusicStatus::Playing);
        assert!(matches!(player.clear(false).await, Err(MusicError::EmptyQueue)));

        assert_eq!(player.clear(true).await.unwrap(), 1);
        assert_eq!(player.status(), MusicStatus::Idle);
        assert!(matches!(player.clear(true).await, Err(MusicError::EmptyQueue)));
    }

    #[tokio::test]
    async fn stop_cancels_enqueues_from_older_sessions() {
        let connector = FakeConnector::default();
        let player = player(&connector);
        add(&player, "a").await.unwrap();

        let ticket = player.ticket();
        assert_eq!(player.stop().await.unwrap(), 1);
        assert_eq!(player.status(), MusicStatus::Idle);

        let err = player
            .enqueue(vec![song("late")], false, false, ticket.epoch())
            .await
            .unwrap_err();
        assert!(matches!(err, MusicError::Cancelled));
        assert!(player.songs().is_empty());

        // pending ticket blocks eviction until dropped
        assert!(!player.is_evictable());
        drop(ticket);
        assert!(player.is_evictable());
    }

    #[tokio::test]
    async fn connect_failure_tears_session_down() {
        let connector = FakeConnector::default();
        connector.fail_connect(true);
        let events = EventBus::new(32);
        let mut rx = events.subscribe();
        let player = player_with(&connector, &events, None);

        let err = add(&player, "a").await.unwrap_err();
        assert!(matches!(err, MusicError::Connection(_)));
        assert_eq!(player.status(), MusicStatus::Idle);
        assert!(player.songs().is_empty());

        let kinds = drain(&mut rx);
        assert!(matches!(kinds.as_slice(), [PlayerEventKind::Errored(_), PlayerEventKind::Stopped]));

        // the next request starts a fresh session
        connector.fail_connect(false);
        assert!(add(&player, "b").await.unwrap().started);
    }

    #[tokio::test]
    async fn stream_failure_signal_stops_playback() {
        let connector = FakeConnector::default();
        let player = player(&connector);
        add(&player, "a").await.unwrap();
        add(&player, "b").await.unwrap();

        let token = connector.last_token().unwrap();
        connector.signal(StreamSignal::Failed {
            token,
            reason: "decoder died".into(),
        });

        wait_for(|| player.status() == MusicStatus::Idle).await;
        assert!(player.songs().is_empty());
        assert_eq!(connector.calls().last(), Some(&StreamCall::Close));
    }

    #[tokio::test]
    async fn play_failure_is_reported_to_caller() {
        let connector = FakeConnector::default();
        connector.fail_play(true);
        let player = player(&connector);

        assert!(matches!(add(&player, "a").await, Err(MusicError::Connection(_))));
        assert_eq!(player.status(), MusicStatus::Idle);
        assert_eq!(connector.calls(), vec![StreamCall::Connect, StreamCall::Close]);
    }

    #[tokio::test]
    async fn events_follow_playback() {
        let connector = FakeConnector::default();
        let events = EventBus::new(32);
        let mut rx = events.subscribe();
        let player = player_with(&connector, &events, None);

        add(&player, "a").await.unwrap();
        player.pause().await.unwrap();
        player.resume().await.unwrap();
        player.stop().await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                PlayerEventKind::NowPlaying(song("a")),
                PlayerEventKind::Paused,
                PlayerEventKind::Resumed,
                PlayerEventKind::Stopped,
            ]
        );
    }

    #[tokio::test]
    async fn idle_hook_fires_after_release() {
        let connector = FakeConnector::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hook: IdleHook = Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let player = player_with(&connector, &EventBus::new(8), Some(hook));

        add(&player, "a").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        player.skip(1).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn now_playing_reports_position() {
        let connector = FakeConnector::default();
        let player = player(&connector);
        assert!(player.now_playing().await.is_none());

        add(&player, "a").await.unwrap();
        let now = player.now_playing().await.unwrap();
        assert_eq!(now.song.title(), "a");
        assert_eq!(now.position, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn snapshot_totals_remaining_time() {
        let connector = FakeConnector::default();
        let player = player(&connector);
        add(&player, "a").await.unwrap();
        add(&player, "b").await.unwrap();

        let snapshot = player.snapshot();
        assert_eq!(snapshot.status, MusicStatus::Playing);
        assert_eq!(snapshot.current.unwrap().title(), "a");
        assert_eq!(snapshot.upcoming.len(), 1);
        assert_eq!(snapshot.total_duration, Duration::from_secs(360));
    }
}
