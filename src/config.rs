use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::endpoint::EndpointConfig;
use crate::error::{LinkError, Result};

/// Client-side tunables. Everything has a deployment-tested default and an
/// environment override; a `.env` file is honored for development.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Websocket endpoint of the voice server.
    pub server_url: String,
    /// Capacity of each jitter buffer, in blocks/frames.
    pub queue_capacity: usize,
    /// Fixed wait between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Inbound silence tolerated before a liveness probe.
    pub idle_timeout: Duration,
    /// How long a probe may wait for any inbound traffic.
    pub probe_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8000/ws".to_string(),
            queue_capacity: 100,
            reconnect_delay: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(20),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

impl ClientConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Ok(Self {
            server_url: env_or("VOICELINK_URL", defaults.server_url)?,
            queue_capacity: env_or("VOICELINK_QUEUE_CAPACITY", defaults.queue_capacity)?,
            reconnect_delay: secs_env_or("VOICELINK_RECONNECT_SECS", defaults.reconnect_delay)?,
            idle_timeout: secs_env_or("VOICELINK_IDLE_TIMEOUT_SECS", defaults.idle_timeout)?,
            probe_timeout: secs_env_or("VOICELINK_PROBE_TIMEOUT_SECS", defaults.probe_timeout)?,
        })
    }
}

/// Server-side tunables, including the endpoint hysteresis. The onset
/// debounce defaults to a single frame while the release needs 25; the
/// asymmetry is deliberate (fast reaction to speech, tolerance for pauses)
/// but stays tunable here.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub endpoint: EndpointConfig,
    /// When set, finalized utterances are written here as WAV + JSON.
    pub archive_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            endpoint: EndpointConfig::default(),
            archive_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        let endpoint_defaults = defaults.endpoint.clone();
        Ok(Self {
            bind_addr: env_or("VOICELINK_BIND", defaults.bind_addr)?,
            endpoint: EndpointConfig {
                threshold: env_or("VOICELINK_VAD_THRESHOLD", endpoint_defaults.threshold)?,
                trigger_frames: env_or(
                    "VOICELINK_TRIGGER_FRAMES",
                    endpoint_defaults.trigger_frames,
                )?,
                end_frames: env_or("VOICELINK_END_FRAMES", endpoint_defaults.end_frames)?,
                pre_roll_frames: env_or(
                    "VOICELINK_PRE_ROLL_FRAMES",
                    endpoint_defaults.pre_roll_frames,
                )?,
            },
            archive_dir: std::env::var("VOICELINK_ARCHIVE_DIR").ok().map(PathBuf::from),
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| {
            log::error!("invalid value for {key}: {raw:?}");
            LinkError::Config(format!("{key}={raw:?}: {e}"))
        }),
        Err(_) => Ok(default),
    }
}

fn secs_env_or(key: &str, default: Duration) -> Result<Duration> {
    Ok(Duration::from_secs(env_or(key, default.as_secs())?))
}
