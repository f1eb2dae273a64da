//! Wire protocol for the conversational voice service
//!
//! Every message is a JSON envelope `{"id", "event_type", "data"}`. Two sets of
//! event names are in use: the generic names and the ones spoken by the hosted
//! Coze chat endpoint. Inbound parsing accepts both; outbound naming follows
//! the configured [`Dialect`].

use crate::codec;
use crate::events::{ControlEvent, QueueItem};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Outbound naming scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[default]
    Generic,
    Coze,
}

impl Dialect {
    pub fn session_update(&self) -> &'static str {
        match self {
            Self::Generic => "session.update",
            Self::Coze => "chat.update",
        }
    }

    pub fn audio_append(&self) -> &'static str {
        match self {
            Self::Generic => "input_audio.append",
            Self::Coze => "input_audio_buffer.append",
        }
    }

    pub fn audio_complete(&self) -> &'static str {
        match self {
            Self::Generic => "input_audio.complete",
            Self::Coze => "input_audio_buffer.complete",
        }
    }
}

/// Errors while interpreting inbound messages
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event {0} is missing field {1}")]
    MissingField(String, &'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputAudioConfig {
    pub format: String,
    pub codec: String,
    pub sample_rate: u32,
    pub channel: u16,
    pub bit_depth: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PcmConfig {
    pub sample_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputAudioConfig {
    pub codec: String,
    pub pcm_config: PcmConfig,
    pub speech_rate: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

/// Audio format and voice parameters sent when the service creates the session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionConfig {
    pub input_audio: InputAudioConfig,
    pub output_audio: OutputAudioConfig,
}

impl SessionConfig {
    pub fn pcm(
        sample_rate: u32,
        channels: u16,
        bit_depth: u16,
        voice_id: Option<String>,
        speech_rate: i32,
    ) -> Self {
        Self {
            input_audio: InputAudioConfig {
                format: "pcm".to_string(),
                codec: "pcm".to_string(),
                sample_rate,
                channel: channels,
                bit_depth,
            },
            output_audio: OutputAudioConfig {
                codec: "pcm".to_string(),
                pcm_config: PcmConfig { sample_rate },
                speech_rate,
                voice_id,
            },
        }
    }
}

/// Generates session-unique event ids: `<unix-ms>-<counter>-<random>`
#[derive(Debug, Default)]
pub struct EventIds {
    counter: AtomicU64,
}

impl EventIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let suffix: u16 = rand::random_range(1000..10000);
        format!("{}-{}-{}", ms, n, suffix)
    }
}

/// Serialize a queue item into its outbound envelope.
///
/// Returns `None` for items that are local-only (`SessionTerminated`).
pub fn outbound_message(item: &QueueItem, dialect: Dialect, ids: &EventIds) -> Option<Value> {
    let msg = match item {
        QueueItem::Audio(frame) => json!({
            "id": ids.next_id(),
            "event_type": dialect.audio_append(),
            "data": { "delta": codec::encode(&frame.pcm) }
        }),
        QueueItem::Control(ControlEvent::AudioComplete) => json!({
            "id": ids.next_id(),
            "event_type": dialect.audio_complete(),
        }),
        QueueItem::Control(ControlEvent::SessionConfigReady(config)) => json!({
            "id": ids.next_id(),
            "event_type": dialect.session_update(),
            "data": config,
        }),
        QueueItem::Control(ControlEvent::SessionTerminated) => return None,
    };
    Some(msg)
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event_type: String,
    #[serde(default)]
    data: Value,
}

/// Inbound events the session reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    SessionCreated,
    SessionUpdated,
    SessionCompleted,
    /// Synthesized speech chunk, still base64
    AudioDelta { content: String },
    AudioCompleted,
    /// Anything else; ignored for forward compatibility
    Other(String),
}

impl InboundEvent {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let event = match envelope.event_type.as_str() {
            "session.created" | "chat.created" => Self::SessionCreated,
            "session.updated" | "chat.updated" => Self::SessionUpdated,
            "session.completed" | "chat.completed" => Self::SessionCompleted,
            "audio.delta" | "conversation.audio.delta" => {
                let content = envelope.data["content"]
                    .as_str()
                    .ok_or(ProtocolError::MissingField(envelope.event_type.clone(), "content"))?;
                Self::AudioDelta { content: content.to_string() }
            }
            "audio.completed" | "conversation.audio.completed" => Self::AudioCompleted,
            other => Self::Other(other.to_string()),
        };
        Ok(event)
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::SessionCreated => "session.created",
            Self::SessionUpdated => "session.updated",
            Self::SessionCompleted => "session.completed",
            Self::AudioDelta { .. } => "audio.delta",
            Self::AudioCompleted => "audio.completed",
            Self::Other(tag) => tag,
        }
    }
}
