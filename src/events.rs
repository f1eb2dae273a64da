//! Items exchanged between the capture worker and the network loop

use crate::protocol::SessionConfig;

/// One chunk of captured PCM (16-bit LE mono)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Monotonic capture sequence number
    pub seq: u64,
    pub pcm: Vec<u8>,
}

/// Control markers carried in-band with the audio
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// Local endpoint: the user stopped speaking
    AudioComplete,
    /// Session configuration to transmit once the service created the session
    SessionConfigReady(SessionConfig),
    /// Local shutdown request. Never transmitted.
    SessionTerminated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    Audio(AudioFrame),
    Control(ControlEvent),
}

impl QueueItem {
    pub fn is_audio(&self) -> bool {
        matches!(self, QueueItem::Audio(_))
    }
}

impl From<AudioFrame> for QueueItem {
    fn from(frame: AudioFrame) -> Self {
        QueueItem::Audio(frame)
    }
}

impl From<ControlEvent> for QueueItem {
    fn from(event: ControlEvent) -> Self {
        QueueItem::Control(event)
    }
}
