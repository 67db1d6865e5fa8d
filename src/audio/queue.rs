use rand::seq::SliceRandom;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use crate::error::{MusicError, Result};
use crate::sources::SongMetadata;

/// Cola de una guild: la canción actual separada de las siguientes.
///
/// Indices exposed to callers follow the flat view `[current, upcoming..]`,
/// so index 0 is the current song whenever one is set.
#[derive(Debug, Clone)]
pub struct GuildQueue {
    current: Option<SongMetadata>,
    upcoming: VecDeque<SongMetadata>,
    max_size: usize,
}

impl GuildQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            current: None,
            upcoming: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega una canción al final, o justo después de la actual si `at_front`
    ///
    /// Returns the song's index in the upcoming list.
    pub fn add(&mut self, song: SongMetadata, at_front: bool) -> Result<usize> {
        self.add_all(vec![song], at_front)
    }

    /// Agrega varias canciones conservando su orden
    ///
    /// With `at_front` the batch lands at upcoming indices `0..k`, ahead of
    /// entries that were already queued "next". Fails without changes when
    /// the batch does not fit.
    pub fn add_all(&mut self, songs: Vec<SongMetadata>, at_front: bool) -> Result<usize> {
        if self.len() + songs.len() > self.max_size {
            return Err(MusicError::QueueFull { max: self.max_size });
        }

        let count = songs.len();
        let index = if at_front {
            for (offset, song) in songs.into_iter().enumerate() {
                self.upcoming.insert(offset, song);
            }
            0
        } else {
            let index = self.upcoming.len();
            self.upcoming.extend(songs);
            index
        };

        info!("➕ Agregadas {} canciones a la cola (posición {})", count, index);
        Ok(index)
    }

    /// Mezcla las siguientes canciones; la actual no se mueve
    ///
    /// Returns how many entries were shuffled.
    pub fn shuffle_tail(&mut self) -> Result<usize> {
        let upcoming = self.upcoming.len();
        if upcoming < 2 {
            return Err(MusicError::InsufficientQueue { upcoming });
        }

        let mut rng = rand::thread_rng();
        self.upcoming.make_contiguous().shuffle(&mut rng);
        info!("🔀 Cola mezclada ({} canciones)", upcoming);
        Ok(upcoming)
    }

    /// Descarta la actual y las `n - 1` siguientes, promoviendo la `n`-ésima
    ///
    /// Fails with `OutOfRange` (queue untouched) when `n` is zero or larger
    /// than the number of songs including the current one.
    pub fn advance(&mut self, n: usize) -> Result<usize> {
        let available = self.len();
        if n == 0 || n > available {
            return Err(MusicError::OutOfRange {
                requested: n as i64,
                available,
            });
        }

        let mut remaining = n;
        if self.current.take().is_some() {
            remaining -= 1;
        }
        self.upcoming.drain(..remaining);
        self.current = self.upcoming.pop_front();

        match &self.current {
            Some(song) => debug!("⏭️ Saltadas {} canciones, ahora: {}", n, song.title()),
            None => debug!("⏭️ Saltadas {} canciones, cola vacía", n),
        }
        Ok(n)
    }

    /// Vacía las siguientes canciones, y la actual si `include_current`
    pub fn clear(&mut self, include_current: bool) -> usize {
        let mut removed = self.upcoming.len();
        self.upcoming.clear();

        if include_current && self.current.take().is_some() {
            removed += 1;
        }

        info!("🗑️ Cola limpiada: {} canciones removidas", removed);
        removed
    }

    /// Sube la primera de las siguientes al hueco actual si está vacío
    pub fn promote(&mut self) -> Option<&SongMetadata> {
        if self.current.is_none() {
            self.current = self.upcoming.pop_front();
        }
        self.current.as_ref()
    }

    /// Guarda la posición de reproducción de la canción actual
    pub(crate) fn record_offset(&mut self, offset: Duration) {
        if let Some(current) = self.current.as_mut() {
            current.set_offset(offset);
        }
    }

    pub fn current(&self) -> Option<&SongMetadata> {
        self.current.as_ref()
    }

    pub fn upcoming(&self) -> impl Iterator<Item = &SongMetadata> {
        self.upcoming.iter()
    }

    pub fn upcoming_len(&self) -> usize {
        self.upcoming.len()
    }

    /// Total de canciones, incluida la actual
    pub fn len(&self) -> usize {
        self.upcoming.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.upcoming.is_empty()
    }

    /// Vista plana: actual primero, luego las siguientes
    pub fn songs(&self) -> Vec<SongMetadata> {
        self.current.iter().chain(self.upcoming.iter()).cloned().collect()
    }

    /// Duración restante conocida; los directos no suman
    pub fn total_duration(&self) -> Duration {
        let remaining_current = self
            .current
            .as_ref()
            .filter(|c| !c.is_live())
            .map(|c| c.length().saturating_sub(c.offset()))
            .unwrap_or_default();

        self.upcoming
            .iter()
            .filter(|song| !song.is_live())
            .map(|song| song.length())
            .sum::<Duration>()
            + remaining_current
    }
}
