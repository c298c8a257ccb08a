use anyhow::{Context, Result};
use chrono_tz::Tz;
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    pub db: DbConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// AEMET OpenData access and pacing.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_upstream_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_min_interval")]
    pub min_request_interval_seconds: f64,
    #[serde(default = "default_retry_after_cap")]
    pub retry_after_cap_seconds: u64,
}

impl UpstreamConfig {
    /// The configured key, or `None` while it still holds the placeholder.
    pub fn api_key(&self) -> Option<&str> {
        let key = self.api_key.trim();
        if key.is_empty() || key.starts_with("__SET_VIA_ENV") {
            None
        } else {
            Some(key)
        }
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_secs_f64(self.min_request_interval_seconds.max(0.0))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    pub fn retry_after_cap(&self) -> Duration {
        Duration::from_secs(self.retry_after_cap_seconds.max(1))
    }
}

fn default_upstream_timeout() -> u64 {
    20
}

fn default_min_interval() -> f64 {
    2.0
}

fn default_retry_after_cap() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub current_month_freshness_hours: i64,
    pub latest_lookback_days: i64,
    pub warm_cache_hours: i64,
    pub warm_cache_interval_minutes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            current_month_freshness_hours: 24,
            latest_lookback_days: 720,
            warm_cache_hours: 720,
            warm_cache_interval_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    pub background_enabled: bool,
    pub max_attempts: u32,
    pub drive_by_max_windows: usize,
    pub api_calls_per_window: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            background_enabled: true,
            max_attempts: 4,
            drive_by_max_windows: 2,
            api_calls_per_window: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    pub local_timezone: String,
    pub max_playback_frames: usize,
}

impl AnalyticsConfig {
    pub fn timezone(&self) -> Result<Tz> {
        self.local_timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("invalid analytics.local_timezone '{}'", self.local_timezone))
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            local_timezone: "Europe/Madrid".to_string(),
            max_playback_frames: 1500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub url: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("AWC__").split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let cfg: Config = figment.extract().context("failed to extract configuration")?;
        cfg.analytics.timezone()?;
        Ok(cfg)
    }
}
