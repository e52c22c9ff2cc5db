//! Configuration types for Pithos
//!
//! Backend credentials and endpoints come from `PITHOS_*` environment
//! variables. A backend is configured only when its endpoint variable is
//! present; credentials for a configured backend are mandatory. Tunables
//! fall back to defaults when unset.

use crate::error::{PithosError, PithosResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub bot_channel: Option<BotChannelConfig>,
    #[serde(default)]
    pub video_host: Option<VideoHostConfig>,
    #[serde(default)]
    pub photo_host: Option<PhotoHostConfig>,
    #[serde(default)]
    pub tuning: Tuning,
}

/// Chat-bot file channel backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotChannelConfig {
    pub api_base: String,
    pub bot_token: String,
    pub channel_id: String,
}

/// Video-hosting API backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoHostConfig {
    pub api_base: String,
    pub access_token: String,
}

/// Photo-hosting API backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoHostConfig {
    pub api_base: String,
    pub api_key: String,
    #[serde(default)]
    pub album_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tuning {
    /// How long decoded tables/indexes stay memoized.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Cache memory budget in bytes; oldest-by-expiry entries are evicted
    /// past this.
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: usize,
    /// Per-backend-call timeout; an elapsed call counts as unavailable.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Gzip level, 0-9.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_cache_max_bytes() -> usize {
    64 * 1024 * 1024
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_compression_level() -> u32 {
    6
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_bytes: default_cache_max_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
            compression_level: default_compression_level(),
        }
    }
}

impl Tuning {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Read configuration from the environment.
    pub fn from_env() -> PithosResult<Self> {
        let bot_channel = match env_opt("PITHOS_BOT_API_BASE") {
            Some(api_base) => Some(BotChannelConfig {
                api_base,
                bot_token: env_required("PITHOS_BOT_TOKEN")?,
                channel_id: env_required("PITHOS_BOT_CHANNEL")?,
            }),
            None => None,
        };

        let video_host = match env_opt("PITHOS_VIDEO_API_BASE") {
            Some(api_base) => Some(VideoHostConfig {
                api_base,
                access_token: env_required("PITHOS_VIDEO_TOKEN")?,
            }),
            None => None,
        };

        let photo_host = match env_opt("PITHOS_PHOTO_API_BASE") {
            Some(api_base) => Some(PhotoHostConfig {
                api_base,
                api_key: env_required("PITHOS_PHOTO_KEY")?,
                album_id: env_opt("PITHOS_PHOTO_ALBUM"),
            }),
            None => None,
        };

        Ok(Self {
            bot_channel,
            video_host,
            photo_host,
            tuning: Tuning {
                cache_ttl_secs: env_parse("PITHOS_CACHE_TTL_SECS", default_cache_ttl_secs())?,
                cache_max_bytes: env_parse("PITHOS_CACHE_MAX_BYTES", default_cache_max_bytes())?,
                request_timeout_secs: env_parse(
                    "PITHOS_REQUEST_TIMEOUT_SECS",
                    default_request_timeout_secs(),
                )?,
                compression_level: env_parse(
                    "PITHOS_COMPRESSION_LEVEL",
                    default_compression_level(),
                )?,
            },
        })
    }

    /// True when at least one remote backend has credentials.
    pub fn has_backends(&self) -> bool {
        self.bot_channel.is_some() || self.video_host.is_some() || self.photo_host.is_some()
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_required(key: &str) -> PithosResult<String> {
    env_opt(key).ok_or_else(|| PithosError::Configuration(format!("{} is not set", key)))
}

fn env_parse<T: FromStr>(key: &str, default: T) -> PithosResult<T> {
    match env_opt(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| PithosError::Configuration(format!("{} has an invalid value", key))),
        None => Ok(default),
    }
}
