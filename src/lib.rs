//! voicelink - half-duplex voice client for conversational speech services
//!
//! The microphone is streamed to the service while listening; synthesized
//! speech is played back while speaking, never both at once.

#![forbid(unsafe_code)]

pub mod audio;
pub mod capture;
pub mod codec;
pub mod config;
pub mod display;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod network;
pub mod playback;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod transport;
