//! Client configuration
//!
//! An optional TOML file overlays the defaults; a few environment variables
//! overlay the file. Every field can be omitted.

use crate::audio::PcmFormat;
use crate::capture::CaptureConfig;
use crate::endpoint::EndpointConfig;
use crate::network::NetworkConfig;
use crate::protocol::{Dialect, SessionConfig};
use crate::queue::{MessageQueue, OverflowPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub endpoint: EndpointFileConfig,
    pub queue: QueueConfig,
    pub network: NetworkFileConfig,
    pub capture: CaptureFileConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// WebSocket endpoint of the voice service
    pub url: String,
    /// Appended to the url as `bot_id=<id>` when set
    pub bot_id: Option<String>,
    /// Sent as `Authorization: Bearer <token>`
    pub access_token: Option<String>,
    pub dialect: Dialect,
    pub voice_id: Option<String>,
    pub speech_rate: i32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: "wss://ws.coze.cn/v1/chat".to_string(),
            bot_id: None,
            access_token: None,
            dialect: Dialect::Coze,
            voice_id: None,
            speech_rate: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u16,
    pub chunk_bytes: usize,
    /// PulseAudio source name, default source when unset
    pub input_device: Option<String>,
    /// PulseAudio sink name, default sink when unset
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            bit_depth: 16,
            chunk_bytes: 1024,
            input_device: None,
            output_device: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointFileConfig {
    pub voice_threshold: f32,
    pub silence_ms: u64,
}

impl Default for EndpointFileConfig {
    fn default() -> Self {
        Self {
            voice_threshold: 100.0,
            silence_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    pub producer_wait_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            overflow: OverflowPolicy::DropOldest,
            producer_wait_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkFileConfig {
    pub receive_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub send_timeout_ms: u64,
    pub send_retry_delay_ms: u64,
    pub max_send_failures: u32,
    pub max_malformed: u32,
}

impl Default for NetworkFileConfig {
    fn default() -> Self {
        Self {
            receive_timeout_secs: 60,
            poll_interval_ms: 10,
            send_timeout_ms: 5000,
            send_retry_delay_ms: 50,
            max_send_failures: 5,
            max_malformed: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureFileConfig {
    pub idle_poll_ms: u64,
    pub max_read_failures: u32,
    pub failure_pause_ms: u64,
}

impl Default for CaptureFileConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: 100,
            max_read_failures: 10,
            failure_pause_ms: 1000,
        }
    }
}

impl Config {
    /// Load from `path` if given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                let config = Self::from_toml(&content).map_err(|source| ConfigError::Toml {
                    path: path.to_path_buf(),
                    source,
                })?;
                info!("Loaded config from {}", path.display());
                config
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Overlay `VOICELINK_*` variables; empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(url) = get("VOICELINK_URL") {
            self.service.url = url;
        }
        if let Some(token) = get("VOICELINK_TOKEN") {
            self.service.access_token = Some(token);
        }
        if let Some(bot_id) = get("VOICELINK_BOT_ID") {
            self.service.bot_id = Some(bot_id);
        }
        if let Some(voice_id) = get("VOICELINK_VOICE_ID") {
            self.service.voice_id = Some(voice_id);
        }
    }

    /// Service url with the bot id query parameter
    pub fn service_url(&self) -> String {
        match &self.service.bot_id {
            Some(bot_id) => {
                let sep = if self.service.url.contains('?') { '&' } else { '?' };
                format!("{}{}bot_id={}", self.service.url, sep, bot_id)
            }
            None => self.service.url.clone(),
        }
    }

    pub fn pcm_format(&self) -> PcmFormat {
        PcmFormat {
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::pcm(
            self.audio.sample_rate,
            u16::from(self.audio.channels),
            self.audio.bit_depth,
            self.service.voice_id.clone(),
            self.service.speech_rate,
        )
    }

    pub fn queue(&self) -> MessageQueue {
        MessageQueue::new(
            self.queue.capacity,
            Duration::from_millis(self.queue.producer_wait_ms),
            self.queue.overflow,
        )
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            chunk_bytes: self.audio.chunk_bytes,
            idle_poll: Duration::from_millis(self.capture.idle_poll_ms),
            max_read_failures: self.capture.max_read_failures,
            failure_pause: Duration::from_millis(self.capture.failure_pause_ms),
            endpoint: EndpointConfig {
                voice_threshold: self.endpoint.voice_threshold,
                silence: Duration::from_millis(self.endpoint.silence_ms),
            },
        }
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            receive_timeout: Duration::from_secs(self.network.receive_timeout_secs),
            poll_interval: Duration::from_millis(self.network.poll_interval_ms),
            send_timeout: Duration::from_millis(self.network.send_timeout_ms),
            send_retry_delay: Duration::from_millis(self.network.send_retry_delay_ms),
            max_send_failures: self.network.max_send_failures,
            max_malformed: self.network.max_malformed,
            dialect: self.service.dialect,
            ..NetworkConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        let capture = config.capture_config();
        assert_eq!(capture.chunk_bytes, 1024);
        assert_eq!(capture.endpoint.voice_threshold, 100.0);
        assert_eq!(capture.endpoint.silence, Duration::from_millis(1500));

        let network = config.network_config();
        assert_eq!(network.receive_timeout, Duration::from_secs(60));
        assert_eq!(network.max_send_failures, 5);
        assert_eq!(network.send_timeout, Duration::from_secs(5));
        assert_eq!(network.dialect, Dialect::Coze);

        assert_eq!(config.queue().capacity(), 1024);
        assert_eq!(config.service_url(), "wss://ws.coze.cn/v1/chat");
    }

    #[test]
    fn test_partial_file_overlays_defaults() {
        let config = Config::from_toml(
            r#"
            [service]
            url = "ws://localhost:8080/chat?lang=en"
            bot_id = "42"
            dialect = "generic"

            [queue]
            capacity = 8
            overflow = "drop_newest"

            [endpoint]
            silence_ms = 800
            "#,
        )
        .unwrap();

        assert_eq!(config.service_url(), "ws://localhost:8080/chat?lang=en&bot_id=42");
        assert_eq!(config.service.dialect, Dialect::Generic);
        assert_eq!(config.queue.overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.queue.producer_wait_ms, 20);
        assert_eq!(config.capture_config().endpoint.silence, Duration::from_millis(800));
        assert_eq!(config.audio.sample_rate, 16000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("VOICELINK_TOKEN", "pat_secret"),
            ("VOICELINK_BOT_ID", "7"),
            ("VOICELINK_URL", ""),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.service.access_token.as_deref(), Some("pat_secret"));
        assert_eq!(config.service_url(), "wss://ws.coze.cn/v1/chat?bot_id=7");
        assert!(config.service.voice_id.is_none());
    }

    #[test]
    fn test_session_config_follows_audio_section() {
        let mut config = Config::default();
        config.audio.sample_rate = 24000;
        config.service.voice_id = Some("v1".to_string());

        let session = config.session_config();
        assert_eq!(session.input_audio.sample_rate, 24000);
        assert_eq!(session.input_audio.channel, 1);
        assert_eq!(session.output_audio.pcm_config.sample_rate, 24000);
        assert_eq!(session.output_audio.voice_id.as_deref(), Some("v1"));
    }

    #[test]
    fn test_bad_file_is_an_error() {
        assert!(Config::from_toml("[queue]\ncapacity = \"many\"").is_err());
        match Config::load(Some(Path::new("/nonexistent/voicelink.toml"))) {
            Err(ConfigError::Io { .. }) => {}
            other => panic!("Unexpected result: {:?}", other),
        }
    }
}
