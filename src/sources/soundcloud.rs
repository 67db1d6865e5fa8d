use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

use super::{BackendTrack, TrackBackend, UrlKind};
use crate::error::{MusicError, Result};

/// Hosts served by this backend.
pub const HOSTS: &[&str] = &[
    "soundcloud.com",
    "www.soundcloud.com",
    "m.soundcloud.com",
    "on.soundcloud.com",
];

const API_BASE: &str = "https://api-v2.soundcloud.com";

/// First path segments that are SoundCloud pages, not user profiles.
const RESERVED_PATHS: &[&str] = &[
    "discover", "search", "stream", "charts", "you", "upload", "settings", "messages", "pages",
];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    collection: Vec<ScTrack>,
}

/// Respuesta de `/resolve`; `kind` decide qué tipo de recurso es
#[derive(Debug, Deserialize)]
struct Resolved {
    kind: String,
    #[serde(flatten)]
    rest: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ScTrack {
    title: String,
    permalink_url: String,
    /// Milliseconds.
    duration: Option<u64>,
    artwork_url: Option<String>,
    user: Option<ScUser>,
    publisher_metadata: Option<PublisherMetadata>,
}

#[derive(Debug, Deserialize)]
struct ScUser {
    username: String,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublisherMetadata {
    artist: Option<String>,
}

impl From<ScTrack> for BackendTrack {
    fn from(track: ScTrack) -> Self {
        let artist = track
            .publisher_metadata
            .and_then(|p| p.artist)
            .filter(|a| !a.trim().is_empty());
        let (username, avatar) = match track.user {
            Some(user) => (Some(user.username), user.avatar_url),
            None => (None, None),
        };

        BackendTrack {
            title: track.title,
            artist: artist.or(username),
            url: track.permalink_url,
            length: track.duration.map(Duration::from_millis),
            is_live: false,
            thumbnail_url: track.artwork_url.or(avatar),
        }
    }
}

/// Cliente de la API v2 de SoundCloud
pub struct SoundCloudClient {
    client_id: String,
    client: reqwest::Client,
}

impl SoundCloudClient {
    pub fn new(client_id: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client_id, client })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        if self.client_id.is_empty() {
            return Err(MusicError::Resolution("SOUNDCLOUD_CLIENT_ID no está configurado".into()));
        }

        let response = self
            .client
            .get(format!("{}/{}", API_BASE, endpoint))
            .query(query)
            .query(&[("client_id", self.client_id.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MusicError::Resolution("recurso de SoundCloud no encontrado".into()));
        }
        if !status.is_success() {
            error!("❌ SoundCloud API error: {}", status);
            return Err(MusicError::Resolution(format!("SoundCloud API respondió {}", status)));
        }

        Ok(response.json().await?)
    }

    fn resolved_to_track(resolved: Resolved, id: &str) -> Result<BackendTrack> {
        match resolved.kind.as_str() {
            "track" => {
                let track: ScTrack = serde_json::from_value(resolved.rest)?;
                Ok(track.into())
            }
            "playlist" | "system-playlist" => Err(MusicError::UnsupportedPlaylist(id.to_string())),
            other => Err(MusicError::Resolution(format!(
                "{} apunta a un recurso '{}', no a una canción",
                id, other
            ))),
        }
    }
}

#[async_trait]
impl TrackBackend for SoundCloudClient {
    async fn search_by_text(&self, text: &str) -> Result<BackendTrack> {
        info!("🔍 Buscando en SoundCloud: {}", text);

        let response: SearchResponse = self
            .get_json("search/tracks", &[("q", text), ("limit", "5")])
            .await?;

        response
            .collection
            .into_iter()
            .next()
            .map(BackendTrack::from)
            .ok_or_else(|| MusicError::Resolution(format!("sin resultados para '{}'", text)))
    }

    /// `id` is the track's permalink URL.
    async fn lookup_by_id(&self, id: &str) -> Result<BackendTrack> {
        debug!("📊 Resolviendo enlace de SoundCloud {}", id);

        let resolved: Resolved = self.get_json("resolve", &[("url", id)]).await?;
        Self::resolved_to_track(resolved, id)
    }

    fn classify_url(&self, url: &Url) -> UrlKind {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        // Enlaces cortos: el tipo real se conoce al resolver
        if host == "on.soundcloud.com" {
            return match segments.as_slice() {
                [_code] => UrlKind::Track(url.to_string()),
                _ => UrlKind::Invalid,
            };
        }

        let canonical = |path: &[&str]| format!("https://soundcloud.com/{}", path.join("/"));

        match segments.as_slice() {
            [user, ..] if RESERVED_PATHS.contains(user) => UrlKind::Invalid,
            [_, "sets", _] | [_, "sets", _, _] => UrlKind::Playlist,
            [_, "sets"] => UrlKind::Invalid,
            [_, track] if !matches!(*track, "tracks" | "albums" | "reposts" | "likes" | "followers" | "following") => {
                UrlKind::Track(canonical(&segments))
            }
            // Enlace privado: /usuario/cancion/s-XXXX
            [_, _, secret] if secret.starts_with("s-") => UrlKind::Track(canonical(&segments)),
            _ => UrlKind::Invalid,
        }
    }
}
