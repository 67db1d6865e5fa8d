//! # Sources Module
//!
//! Turns raw user queries into playable [`SongMetadata`].
//!
//! The [`SongResolver`] dispatches over a closed set of backends, one per
//! [`Source`]. Every backend exposes the same capability set
//! ([`TrackBackend`]): free-text search, lookup by id, and URL
//! classification. Backends return loosely-typed [`BackendTrack`] records; the
//! resolver validates them and is the only place a [`SongMetadata`] is built.
//!
//! | query shape                     | backend     |
//! |---------------------------------|-------------|
//! | `https://youtube.com/...`       | YouTube     |
//! | `https://soundcloud.com/...`    | SoundCloud  |
//! | any other `http(s)` URL         | rejected    |
//! | free text                       | YouTube search |

pub mod soundcloud;
pub mod youtube;

use async_trait::async_trait;
use serde::Serialize;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::MetadataCache;
use crate::config::Config;
use crate::error::{MusicError, Result};

pub use soundcloud::SoundCloudClient;
pub use youtube::YouTubeClient;

/// Placeholder used when a backend reports no artist/uploader.
pub const UNKNOWN_ARTIST: &str = "Unknown artist";

/// Backend que produjo una canción
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Source {
    YouTube,
    SoundCloud,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::YouTube => "youtube",
            Source::SoundCloud => "soundcloud",
        }
    }

    /// Backend que atiende un host, si alguno lo reconoce
    pub fn from_host(host: &str) -> Option<Self> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if youtube::HOSTS.contains(&host.as_str()) {
            Some(Source::YouTube)
        } else if soundcloud::HOSTS.contains(&host.as_str()) {
            Some(Source::SoundCloud)
        } else {
            None
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the playlist a song was submitted with.
///
/// Reserved: the resolver never populates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistRef {
    pub id: String,
    pub title: String,
}

/// A fully-resolved, playable track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SongMetadata {
    title: String,
    artist: String,
    url: String,
    length: Duration,
    offset: Duration,
    is_live: bool,
    thumbnail_url: Option<String>,
    source: Source,
    playlist: Option<PlaylistRef>,
}

impl SongMetadata {
    /// Valida un resultado de backend y lo convierte en canción
    fn from_backend(track: BackendTrack, source: Source) -> Result<Self> {
        let title = track.title.trim().to_string();
        if title.is_empty() {
            return Err(MusicError::Resolution(format!("{} devolvió una canción sin título", source)));
        }

        let url = track.url.trim().to_string();
        if url.is_empty() {
            return Err(MusicError::Resolution(format!("{} devolvió '{}' sin URL", source, title)));
        }

        let artist = track
            .artist
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());

        // Longitud en segundos enteros; 0 solo para directos
        let length = Duration::from_secs(track.length.unwrap_or_default().as_secs());
        if length.is_zero() && !track.is_live {
            return Err(MusicError::Resolution(format!("'{}' no tiene duración conocida", title)));
        }

        Ok(Self {
            title,
            artist,
            url,
            length,
            offset: Duration::ZERO,
            is_live: track.is_live,
            thumbnail_url: track.thumbnail_url.filter(|t| !t.is_empty()),
            source,
            playlist: None,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn artist(&self) -> &str {
        &self.artist
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn length(&self) -> Duration {
        self.length
    }
    pub fn offset(&self) -> Duration {
        self.offset
    }
    pub fn is_live(&self) -> bool {
        self.is_live
    }
    pub fn thumbnail_url(&self) -> Option<&str> {
        self.thumbnail_url.as_deref()
    }
    pub fn source(&self) -> Source {
        self.source
    }
    pub fn playlist(&self) -> Option<&PlaylistRef> {
        self.playlist.as_ref()
    }

    /// Posición desde la que reanudar; solo la cola la modifica al pausar
    pub(crate) fn set_offset(&mut self, offset: Duration) {
        self.offset = if self.is_live {
            Duration::ZERO
        } else {
            offset.min(self.length)
        };
    }
}

/// Raw track data as reported by a backend, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendTrack {
    pub title: String,
    pub artist: Option<String>,
    pub url: String,
    pub length: Option<Duration>,
    pub is_live: bool,
    pub thumbnail_url: Option<String>,
}

/// Clasificación de una URL dentro de un backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlKind {
    /// Single track, identified by a backend-specific id.
    Track(String),
    Playlist,
    /// Live stream, identified like a track.
    Live(String),
    Invalid,
}

/// Capability set every resolver backend implements.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackBackend: Send + Sync {
    /// Best match for a free-text query (first provider-ranked result).
    async fn search_by_text(&self, text: &str) -> Result<BackendTrack>;

    /// Metadata for an id previously returned by `classify_url`.
    async fn lookup_by_id(&self, id: &str) -> Result<BackendTrack>;

    /// Classifies a URL whose host belongs to this backend.
    fn classify_url(&self, url: &Url) -> UrlKind;
}

/// Stateless query resolver shared by every guild.
#[derive(Clone)]
pub struct SongResolver {
    youtube: Arc<dyn TrackBackend>,
    soundcloud: Arc<dyn TrackBackend>,
    cache: MetadataCache,
}

impl SongResolver {
    /// Construye el resolver con los clientes HTTP reales
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::with_backends(
            Arc::new(YouTubeClient::new(config.youtube_api_key.clone())?),
            Arc::new(SoundCloudClient::new(config.soundcloud_client_id.clone())?),
            MetadataCache::new(config.cache_size, config.cache_ttl),
        ))
    }

    pub fn with_backends(
        youtube: Arc<dyn TrackBackend>,
        soundcloud: Arc<dyn TrackBackend>,
        cache: MetadataCache,
    ) -> Self {
        Self {
            youtube,
            soundcloud,
            cache,
        }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    fn backend(&self, source: Source) -> &dyn TrackBackend {
        match source {
            Source::YouTube => self.youtube.as_ref(),
            Source::SoundCloud => self.soundcloud.as_ref(),
        }
    }

    /// Resolves a query into one or more songs, in playback order.
    ///
    /// Never returns an empty vector: either at least one song or an error.
    pub async fn resolve(&self, query: &str) -> Result<Vec<SongMetadata>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MusicError::Resolution("la búsqueda está vacía".into()));
        }

        let song = match parse_url(query) {
            Some(url) => self.resolve_url(&url).await?,
            None => self.search(query).await?,
        };

        info!("🎯 Resuelto '{}' → {} ({})", query, song.title(), song.source());
        Ok(vec![song])
    }

    async fn resolve_url(&self, url: &Url) -> Result<SongMetadata> {
        let host = url.host_str().unwrap_or_default();
        let source = Source::from_host(host).ok_or_else(|| {
            warn!("🚫 Host no soportado: {}", host);
            MusicError::UnsupportedSource(host.to_string())
        })?;

        match self.backend(source).classify_url(url) {
            UrlKind::Track(id) => self.lookup(source, &id, false).await,
            UrlKind::Live(id) => self.lookup(source, &id, true).await,
            UrlKind::Playlist => Err(MusicError::UnsupportedPlaylist(url.to_string())),
            UrlKind::Invalid => Err(MusicError::Resolution(format!(
                "'{}' no es un enlace válido de {}",
                url, source
            ))),
        }
    }

    async fn lookup(&self, source: Source, id: &str, live: bool) -> Result<SongMetadata> {
        let key = (source, id.to_string());
        // Un enlace de directo siempre se consulta: el cache guarda grabaciones
        if !live {
            if let Some(song) = self.cache.get(&key) {
                debug!("📦 Cache hit para {}:{}", source, id);
                return Ok(song);
            }
        }

        let mut track = self.backend(source).lookup_by_id(id).await?;
        track.is_live |= live;
        let song = SongMetadata::from_backend(track, source)?;

        // Los directos cambian de estado, no se guardan
        if !song.is_live() {
            self.cache.insert(key, song.clone());
        }
        Ok(song)
    }

    async fn search(&self, text: &str) -> Result<SongMetadata> {
        debug!("🔍 Búsqueda por texto: {}", text);
        let track = self.backend(Source::YouTube).search_by_text(text).await?;
        SongMetadata::from_backend(track, Source::YouTube)
    }
}

/// Parses `query` as an http(s) URL; anything else is free text.
fn parse_url(query: &str) -> Option<Url> {
    Url::parse(query)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn backend_track(title: &str, secs: u64) -> BackendTrack {
        BackendTrack {
            title: title.to_string(),
            artist: Some("Artist".into()),
            url: format!("https://www.youtube.com/watch?v={}", title),
            length: Some(Duration::from_secs(secs)),
            is_live: false,
            thumbnail_url: None,
        }
    }

    /// Builds a song the way the resolver would.
    pub(crate) fn song(title: &str) -> SongMetadata {
        SongMetadata::from_backend(backend_track(title, 180), Source::YouTube).unwrap()
    }

    fn cache() -> MetadataCache {
        MetadataCache::new(16, Duration::from_secs(60))
    }

    fn resolver(youtube: MockTrackBackend, soundcloud: MockTrackBackend) -> SongResolver {
        SongResolver::with_backends(Arc::new(youtube), Arc::new(soundcloud), cache())
    }

    #[test]
    fn rejects_untitled_and_zero_length_tracks() {
        let mut track = backend_track("", 10);
        assert!(SongMetadata::from_backend(track.clone(), Source::YouTube).is_err());

        track.title = "ok".into();
        track.length = Some(Duration::ZERO);
        assert!(SongMetadata::from_backend(track.clone(), Source::YouTube).is_err());

        track.is_live = true;
        let song = SongMetadata::from_backend(track, Source::YouTube).unwrap();
        assert!(song.is_live());
        assert_eq!(song.length(), Duration::ZERO);
    }

    #[test]
    fn missing_artist_gets_placeholder() {
        let mut track = backend_track("song", 10);
        track.artist = Some("   ".into());
        let song = SongMetadata::from_backend(track, Source::SoundCloud).unwrap();
        assert_eq!(song.artist(), UNKNOWN_ARTIST);
        assert_eq!(song.source(), Source::SoundCloud);
        assert!(song.playlist().is_none());
    }

    #[test]
    fn url_detection_requires_http_scheme() {
        assert!(parse_url("https://youtu.be/dQw4w9WgXcQ").is_some());
        assert!(parse_url("never gonna give you up").is_none());
        assert!(parse_url("artist: song").is_none());
        assert!(parse_url("mailto:someone@example.com").is_none());
    }

    #[tokio::test]
    async fn free_text_goes_to_youtube_search() {
        let mut youtube = MockTrackBackend::new();
        youtube
            .expect_search_by_text()
            .withf(|text| text == "lofi beats")
            .times(1)
            .returning(|_| Ok(backend_track("lofi", 200)));
        let resolver = resolver(youtube, MockTrackBackend::new());

        let songs = resolver.resolve("  lofi beats ").await.unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].title(), "lofi");
        assert_eq!(songs[0].source(), Source::YouTube);
    }

    #[tokio::test]
    async fn soundcloud_urls_dispatch_to_soundcloud() {
        let mut soundcloud = MockTrackBackend::new();
        soundcloud
            .expect_classify_url()
            .returning(|_| UrlKind::Track("https://soundcloud.com/a/b".into()));
        soundcloud
            .expect_lookup_by_id()
            .times(1)
            .returning(|_| Ok(backend_track("cloud", 90)));
        let resolver = resolver(MockTrackBackend::new(), soundcloud);

        let songs = resolver.resolve("https://soundcloud.com/a/b").await.unwrap();
        assert_eq!(songs[0].source(), Source::SoundCloud);
    }

    #[tokio::test]
    async fn playlists_fail_explicitly() {
        let mut youtube = MockTrackBackend::new();
        youtube.expect_classify_url().returning(|_| UrlKind::Playlist);
        let resolver = resolver(youtube, MockTrackBackend::new());

        let err = resolver
            .resolve("https://www.youtube.com/playlist?list=PL123")
            .await
            .unwrap_err();
        assert!(matches!(err, MusicError::UnsupportedPlaylist(_)));
    }

    #[tokio::test]
    async fn invalid_links_and_unknown_hosts_fail() {
        let mut youtube = MockTrackBackend::new();
        youtube.expect_classify_url().returning(|_| UrlKind::Invalid);
        let resolver = resolver(youtube, MockTrackBackend::new());

        let err = resolver.resolve("https://youtube.com/feed/trending").await.unwrap_err();
        assert!(matches!(err, MusicError::Resolution(_)));

        let err = resolver.resolve("https://example.com/song.mp3").await.unwrap_err();
        assert!(matches!(err, MusicError::UnsupportedSource(host) if host == "example.com"));
    }

    #[tokio::test]
    async fn live_urls_are_marked_live() {
        let mut youtube = MockTrackBackend::new();
        youtube
            .expect_classify_url()
            .returning(|_| UrlKind::Live("abcdefghijk".into()));
        youtube.expect_lookup_by_id().returning(|_| {
            let mut track = backend_track("radio", 0);
            track.length = None;
            Ok(track)
        });
        let resolver = resolver(youtube, MockTrackBackend::new());

        let songs = resolver.resolve("https://youtube.com/live/abcdefghijk").await.unwrap();
        assert!(songs[0].is_live());
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn lookups_are_cached() {
        let mut youtube = MockTrackBackend::new();
        youtube
            .expect_classify_url()
            .returning(|_| UrlKind::Track("dQw4w9WgXcQ".into()));
        youtube
            .expect_lookup_by_id()
            .times(1)
            .returning(|_| Ok(backend_track("rick", 212)));
        let resolver = resolver(youtube, MockTrackBackend::new());

        let url = "https://youtu.be/dQw4w9WgXcQ";
        let first = resolver.resolve(url).await.unwrap();
        let second = resolver.resolve(url).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.cache().metrics().hits, 1);
    }

    #[tokio::test]
    async fn live_link_ignores_cached_recording() {
        let mut youtube = MockTrackBackend::new();
        youtube.expect_classify_url().returning(|url| {
            if url.path().starts_with("/live/") {
                UrlKind::Live("dQw4w9WgXcQ".into())
            } else {
                UrlKind::Track("dQw4w9WgXcQ".into())
            }
        });
        youtube
            .expect_lookup_by_id()
            .times(2)
            .returning(|_| Ok(backend_track("rick", 212)));
        let resolver = resolver(youtube, MockTrackBackend::new());

        let recorded = resolver.resolve("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await.unwrap();
        assert!(!recorded[0].is_live());
        assert_eq!(resolver.cache().len(), 1);

        let live = resolver.resolve("https://www.youtube.com/live/dQw4w9WgXcQ").await.unwrap();
        assert!(live[0].is_live());

        // the recording stays cached for watch links
        let again = resolver.resolve("https://youtu.be/dQw4w9WgXcQ").await.unwrap();
        assert!(!again[0].is_live());
    }

    #[tokio::test]
    async fn backend_errors_propagate() {
        let mut youtube = MockTrackBackend::new();
        youtube
            .expect_search_by_text()
            .returning(|_| Err(MusicError::Resolution("sin resultados".into())));
        let resolver = resolver(youtube, MockTrackBackend::new());

        let err = resolver.resolve("nothing matches").await.unwrap_err();
        assert!(err.is_resolution_failure());
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let resolver = resolver(MockTrackBackend::new(), MockTrackBackend::new());
        assert!(matches!(resolver.resolve("   ").await, Err(MusicError::Resolution(_))));
    }
}
