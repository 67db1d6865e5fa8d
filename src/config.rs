use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,

    // Backends
    pub youtube_api_key: String,
    pub soundcloud_client_id: String,

    // Cola y reproducción
    pub max_queue_size: usize,
    pub default_volume: f32,
    pub event_buffer: usize,

    // Resolución
    #[serde(with = "humantime_serde_compat")]
    pub resolve_timeout: Duration,
    pub cache_size: usize,
    #[serde(with = "humantime_serde_compat")]
    pub cache_ttl: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,

            // Backends (opcionales: sin clave el backend falla al resolver)
            youtube_api_key: std::env::var("YOUTUBE_API_KEY").unwrap_or_default(),
            soundcloud_client_id: std::env::var("SOUNDCLOUD_CLIENT_ID").unwrap_or_default(),

            // Cola y reproducción
            max_queue_size: env_or("MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            default_volume: env_or("DEFAULT_VOLUME", defaults.default_volume)?,
            event_buffer: env_or("EVENT_BUFFER", defaults.event_buffer)?,

            // Resolución
            resolve_timeout: env_duration_or("RESOLVE_TIMEOUT", defaults.resolve_timeout)?,
            cache_size: env_or("CACHE_SIZE", defaults.cache_size)?,
            cache_ttl: env_duration_or("CACHE_TTL", defaults.cache_ttl)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0.0 and 2.0
    /// - Queue, cache and event buffer sizes must be greater than 0
    /// - Resolve timeout and cache TTL must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.default_volume < 0.0 || self.default_volume > 2.0 {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.cache_size == 0 {
            anyhow::bail!("Cache size must be greater than 0");
        }

        if self.event_buffer == 0 {
            anyhow::bail!("Event buffer must be greater than 0");
        }

        if self.resolve_timeout.is_zero() {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        if self.cache_ttl.is_zero() {
            anyhow::bail!("Cache TTL must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and API keys are reported only as present/absent.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Backends: YouTube key={}, SoundCloud client={}\n  \
            Queue: {} max, {}% vol, {} buffered events\n  \
            Resolver: {} timeout, cache {} entries / {} ttl",
            present(&self.youtube_api_key),
            present(&self.soundcloud_client_id),
            self.max_queue_size,
            (self.default_volume * 100.0) as u32,
            self.event_buffer,
            humantime::format_duration(self.resolve_timeout),
            self.cache_size,
            humantime::format_duration(self.cache_ttl),
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            youtube_api_key: String::new(),
            soundcloud_client_id: String::new(),
            max_queue_size: 1000,
            default_volume: 0.5,
            event_buffer: 64,
            resolve_timeout: Duration::from_secs(15),
            cache_size: 100,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {}: {}", key, val)),
        _ => Ok(default),
    }
}

fn env_duration_or(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => humantime::parse_duration(val.trim())
            .with_context(|| format!("Duración inválida para {}: {}", key, val)),
        _ => Ok(default),
    }
}

fn present(value: &str) -> &'static str {
    if value.is_empty() {
        "no"
    } else {
        "yes"
    }
}

/// Serializa duraciones en formato humantime ("15s", "1h").
mod humantime_serde_compat {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
