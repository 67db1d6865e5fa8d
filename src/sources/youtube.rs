use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::{sync::LazyLock, time::Duration};
use tracing::{debug, error, info};
use url::Url;

use super::{BackendTrack, TrackBackend, UrlKind};
use crate::error::{MusicError, Result};

/// Hosts served by this backend.
pub const HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
];

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Candidates requested per search; only the first one is used.
const SEARCH_CANDIDATES: &str = "5";

static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("video id regex"));

static ISO_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$").expect("duration regex")
});

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<Video>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Video {
    id: String,
    snippet: Snippet,
    content_details: Option<ContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    channel_title: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
    live_broadcast_content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: Option<String>,
}

/// Cliente de la API de datos de YouTube v3
pub struct YouTubeClient {
    api_key: String,
    client: reqwest::Client,
}

impl YouTubeClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { api_key, client })
    }

    fn require_key(&self) -> Result<&str> {
        if self.api_key.is_empty() {
            return Err(MusicError::Resolution("YOUTUBE_API_KEY no está configurada".into()));
        }
        Ok(&self.api_key)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let key = self.require_key()?;
        let response = self
            .client
            .get(format!("{}/{}", API_BASE, endpoint))
            .query(query)
            .query(&[("key", key)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("❌ YouTube API error: {} - {}", status, body);
            return Err(MusicError::Resolution(format!("YouTube API respondió {}", status)));
        }

        Ok(response.json().await?)
    }

    /// Extracts the 11-character video id from a watch/short/embed URL.
    pub fn extract_video_id(url: &Url) -> Option<String> {
        let host = url.host_str()?.to_ascii_lowercase();
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let candidate = if host == "youtu.be" {
            segments.first().map(|s| s.to_string())
        } else {
            match segments.as_slice() {
                ["watch"] => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                ["shorts" | "embed" | "live" | "v", id] => Some(id.to_string()),
                _ => None,
            }
        };

        candidate.filter(|id| VIDEO_ID.is_match(id))
    }

    /// Parses an ISO 8601 duration such as `PT1H2M3S`.
    pub fn parse_duration(raw: &str) -> Option<Duration> {
        let caps = ISO_DURATION.captures(raw)?;
        let part = |i: usize| -> Option<u64> {
            match caps.get(i) {
                Some(m) => m.as_str().parse().ok(),
                None => Some(0),
            }
        };

        // Valores absurdos del proveedor no deben desbordar
        let secs = [(1, 86_400u64), (2, 3_600), (3, 60), (4, 1)]
            .into_iter()
            .try_fold(0u64, |total, (group, unit)| {
                part(group)?.checked_mul(unit)?.checked_add(total)
            })?;
        Some(Duration::from_secs(secs))
    }

    fn video_to_track(video: Video) -> BackendTrack {
        let is_live = video.snippet.live_broadcast_content.as_deref() == Some("live");
        let thumbnails = video.snippet.thumbnails;
        let thumbnail_url = thumbnails
            .high
            .or(thumbnails.medium)
            .or(thumbnails.default)
            .map(|t| t.url);

        BackendTrack {
            url: format!("https://www.youtube.com/watch?v={}", video.id),
            title: video.snippet.title,
            artist: video.snippet.channel_title,
            length: video
                .content_details
                .and_then(|d| d.duration)
                .and_then(|d| Self::parse_duration(&d)),
            is_live,
            thumbnail_url,
        }
    }
}

#[async_trait]
impl TrackBackend for YouTubeClient {
    async fn search_by_text(&self, text: &str) -> Result<BackendTrack> {
        info!("🔍 Buscando en YouTube: {}", text);

        let response: SearchResponse = self
            .get_json(
                "search",
                &[
                    ("part", "snippet"),
                    ("q", text),
                    ("type", "video"),
                    ("maxResults", SEARCH_CANDIDATES),
                    ("order", "relevance"),
                ],
            )
            .await?;

        // El primer resultado es el mejor según el ranking de YouTube
        let video_id = response
            .items
            .into_iter()
            .find_map(|item| item.id.video_id)
            .ok_or_else(|| MusicError::Resolution(format!("sin resultados para '{}'", text)))?;

        self.lookup_by_id(&video_id).await
    }

    async fn lookup_by_id(&self, id: &str) -> Result<BackendTrack> {
        debug!("📊 Obteniendo info del video {}", id);

        let response: VideosResponse = self
            .get_json("videos", &[("part", "snippet,contentDetails"), ("id", id)])
            .await?;

        response
            .items
            .into_iter()
            .next()
            .map(Self::video_to_track)
            .ok_or_else(|| MusicError::Resolution(format!("video {} no encontrado", id)))
    }

    fn classify_url(&self, url: &Url) -> UrlKind {
        let is_live_path = url
            .path_segments()
            .and_then(|mut s| s.next())
            .is_some_and(|first| first == "live");

        if let Some(id) = Self::extract_video_id(url) {
            return if is_live_path { UrlKind::Live(id) } else { UrlKind::Track(id) };
        }

        let is_playlist = url.path().trim_end_matches('/') == "/playlist"
            && url.query_pairs().any(|(k, v)| k == "list" && !v.is_empty());
        if is_playlist {
            UrlKind::Playlist
        } else {
            UrlKind::Invalid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classify(raw: &str) -> UrlKind {
        let client = YouTubeClient::new(String::new()).unwrap();
        client.classify_url(&Url::parse(raw).unwrap())
    }

    #[test]
    fn test_youtube_url_classification() {
        let id = "dQw4w9WgXcQ".to_string();
        assert_eq!(classify("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), UrlKind::Track(id.clone()));
        assert_eq!(classify("https://youtu.be/dQw4w9WgXcQ?t=42"), UrlKind::Track(id.clone()));
        assert_eq!(classify("https://music.youtube.com/watch?v=dQw4w9WgXcQ&list=RD1"), UrlKind::Track(id.clone()));
        assert_eq!(classify("https://youtube.com/shorts/dQw4w9WgXcQ"), UrlKind::Track(id.clone()));
        assert_eq!(classify("https://www.youtube.com/live/dQw4w9WgXcQ"), UrlKind::Live(id));
        assert_eq!(classify("https://www.youtube.com/playlist?list=PLx0sYbCqOb8TBPRdmBHs5Iftvv9TPboYG"), UrlKind::Playlist);
        assert_eq!(classify("https://www.youtube.com/watch?v=short"), UrlKind::Invalid);
        assert_eq!(classify("https://www.youtube.com/feed/trending"), UrlKind::Invalid);
        assert_eq!(classify("https://www.youtube.com/playlist"), UrlKind::Invalid);
    }

    #[test]
    fn parses_iso_durations() {
        assert_eq!(YouTubeClient::parse_duration("PT3M32S"), Some(Duration::from_secs(212)));
        assert_eq!(YouTubeClient::parse_duration("PT1H"), Some(Duration::from_secs(3600)));
        assert_eq!(YouTubeClient::parse_duration("P1DT1S"), Some(Duration::from_secs(86_401)));
        assert_eq!(YouTubeClient::parse_duration("P0D"), Some(Duration::ZERO));
        assert_eq!(YouTubeClient::parse_duration("3:32"), None);
        assert_eq!(YouTubeClient::parse_duration("P213503982334601D"), None);
        assert_eq!(YouTubeClient::parse_duration("PT99999999999999999999S"), None);
    }

    #[test]
    fn maps_video_payload() {
        let payload = r#"{
            "items": [{
                "id": "dQw4w9WgXcQ",
                "snippet": {
                    "title": "Never Gonna Give You Up",
                    "channelTitle": "Rick Astley",
                    "liveBroadcastContent": "none",
                    "thumbnails": {
                        "medium": {"url": "https://i.ytimg.com/mq.jpg"},
                        "default": {"url": "https://i.ytimg.com/d.jpg"}
                    }
                },
                "contentDetails": {"duration": "PT3M33S"}
            }]
        }"#;
        let response: VideosResponse = serde_json::from_str(payload).unwrap();
        let track = YouTubeClient::video_to_track(response.items.into_iter().next().unwrap());

        assert_eq!(track.title, "Never Gonna Give You Up");
        assert_eq!(track.artist.as_deref(), Some("Rick Astley"));
        assert_eq!(track.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(track.length, Some(Duration::from_secs(213)));
        assert_eq!(track.thumbnail_url.as_deref(), Some("https://i.ytimg.com/mq.jpg"));
        assert!(!track.is_live);
    }

    #[test]
    fn live_broadcasts_are_flagged() {
        let payload = r#"{"id": "jfKfPfyJRdk", "snippet": {"title": "lofi radio", "liveBroadcastContent": "live"},
                          "contentDetails": {"duration": "P0D"}}"#;
        let video: Video = serde_json::from_str(payload).unwrap();
        let track = YouTubeClient::video_to_track(video);
        assert!(track.is_live);
        assert_eq!(track.length, Some(Duration::ZERO));
    }

    #[test]
    fn search_skips_non_video_items() {
        let payload = r#"{"items": [{"id": {"kind": "youtube#channel"}}, {"id": {"videoId": "abc"}}]}"#;
        let response: SearchResponse = serde_json::from_str(payload).unwrap();
        let first = response.items.into_iter().find_map(|i| i.id.video_id);
        assert_eq!(first.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn missing_api_key_is_a_resolution_error() {
        let client = YouTubeClient::new(String::new()).unwrap();
        let err = client.lookup_by_id("dQw4w9WgXcQ").await.unwrap_err();
        assert!(matches!(err, MusicError::Resolution(_)));
    }
}
