//! Audio hardware
//!
//! The session talks to the microphone and speaker through the [`Microphone`]
//! and [`Speaker`] traits. The PulseAudio implementations use the simple API
//! with 16-bit little-endian mono PCM, which is what the voice service
//! expects on both directions.

use crate::error::Severity;
use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::{Context, FlagSet as ContextFlagSet, State as ContextState};
use libpulse_binding::def::Retval;
use libpulse_binding::error::PAErr;
use libpulse_binding::mainloop::standard::{IterateResult, Mainloop};
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

/// Errors from audio hardware
#[derive(Debug, Clone, thiserror::Error)]
pub enum AudioError {
    #[error("failed to open {device}: {reason}")]
    Init { device: String, reason: String },

    #[error("short read: {got} of {want} bytes")]
    ShortRead { got: usize, want: usize },

    #[error("device wrote nothing")]
    NothingWritten,

    #[error("PulseAudio error: {0}")]
    Pulse(#[from] PAErr),

    #[error("Audio error: {0}")]
    Other(String),
}

impl AudioError {
    pub fn severity(&self) -> Severity {
        match self {
            AudioError::Init { .. } => Severity::Degraded,
            _ => Severity::Transient,
        }
    }
}

/// Blocking PCM source. Closed on drop.
pub trait Microphone: Send {
    /// Fill `buf` with PCM, returning the number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, AudioError>;
}

/// Blocking PCM sink. Closed on drop.
pub trait Speaker: Send {
    /// Queue `pcm` for playback, returning the number of bytes accepted.
    fn write(&mut self, pcm: &[u8]) -> Result<usize, AudioError>;

    /// Wait until everything written has been played.
    fn drain(&mut self) -> Result<(), AudioError> {
        Ok(())
    }
}

impl Microphone for Box<dyn Microphone> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
        (**self).read(buf)
    }
}

impl Speaker for Box<dyn Speaker> {
    fn write(&mut self, pcm: &[u8]) -> Result<usize, AudioError> {
        (**self).write(pcm)
    }

    fn drain(&mut self) -> Result<(), AudioError> {
        (**self).drain()
    }
}

/// Stream parameters shared by capture and playback
#[derive(Debug, Clone)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u8,
}

impl PcmFormat {
    fn spec(&self) -> Spec {
        Spec {
            format: Format::S16le,
            channels: self.channels,
            rate: self.sample_rate,
        }
    }
}

fn open_simple(
    app_name: &str,
    direction: Direction,
    device: Option<&str>,
    description: &str,
    format: &PcmFormat,
) -> Result<Simple, AudioError> {
    let spec = format.spec();
    if !spec.is_valid() {
        return Err(AudioError::Init {
            device: device.unwrap_or("default").to_string(),
            reason: format!("invalid sample spec {:?}", format),
        });
    }
    Simple::new(
        None, // default server
        app_name,
        direction,
        device,
        description,
        &spec,
        None, // default channel map
        None, // default buffering
    )
    .map_err(|e| AudioError::Init {
        device: device.unwrap_or("default").to_string(),
        reason: ToString::to_string(&e),
    })
}

/// Microphone backed by a PulseAudio record stream
pub struct PulseMicrophone {
    simple: Simple,
}

impl PulseMicrophone {
    pub fn open(app_name: &str, device: Option<&str>, format: &PcmFormat) -> Result<Self, AudioError> {
        let simple = open_simple(app_name, Direction::Record, device, "record", format)?;
        info!("🎤 Microphone open ({})", device.unwrap_or("default"));
        Ok(Self { simple })
    }
}

impl Microphone for PulseMicrophone {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
        // The simple API only returns once the whole buffer is filled
        self.simple.read(buf)?;
        Ok(buf.len())
    }
}

/// Speaker backed by a PulseAudio playback stream
pub struct PulseSpeaker {
    simple: Simple,
}

impl PulseSpeaker {
    pub fn open(app_name: &str, device: Option<&str>, format: &PcmFormat) -> Result<Self, AudioError> {
        let simple = open_simple(app_name, Direction::Playback, device, "playback", format)?;
        info!("🔊 Speaker open ({})", device.unwrap_or("default"));
        Ok(Self { simple })
    }
}

impl Speaker for PulseSpeaker {
    fn write(&mut self, pcm: &[u8]) -> Result<usize, AudioError> {
        self.simple.write(pcm)?;
        Ok(pcm.len())
    }

    fn drain(&mut self) -> Result<(), AudioError> {
        self.simple.drain()?;
        Ok(())
    }
}

/// A PulseAudio source or sink
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub name: String,
    pub description: String,
    pub sample_rate: u32,
    pub channels: u8,
    /// True for sinks (speakers), false for sources
    pub is_output: bool,
    /// Source that mirrors a sink's output rather than a real input
    pub is_monitor: bool,
}

/// List sources and sinks known to the PulseAudio server.
pub fn list_devices() -> Result<Vec<AudioDevice>, AudioError> {
    let mut mainloop =
        Mainloop::new().ok_or_else(|| AudioError::Other("failed to create mainloop".to_string()))?;
    let mut context = Context::new(&mainloop, "voicelink-device-lister")
        .ok_or_else(|| AudioError::Other("failed to create context".to_string()))?;
    context.connect(None, ContextFlagSet::NOFLAGS, None)?;

    loop {
        iterate(&mut mainloop)?;
        match context.get_state() {
            ContextState::Ready => break,
            ContextState::Failed | ContextState::Terminated => {
                return Err(AudioError::Other("connection to PulseAudio failed".to_string()));
            }
            _ => {}
        }
    }

    let devices = Rc::new(RefCell::new(Vec::new()));
    // Sources and sinks each report End once
    let pending = Rc::new(RefCell::new(2u8));
    let introspector = context.introspect();

    let (found, left) = (devices.clone(), pending.clone());
    let _sources = introspector.get_source_info_list(move |result| match result {
        ListResult::Item(info) => {
            if let (Some(name), Some(description)) = (info.name.as_ref(), info.description.as_ref()) {
                found.borrow_mut().push(AudioDevice {
                    name: name.to_string(),
                    description: description.to_string(),
                    sample_rate: info.sample_spec.rate,
                    channels: info.sample_spec.channels,
                    is_output: false,
                    is_monitor: info.monitor_of_sink.is_some(),
                });
            }
        }
        ListResult::End | ListResult::Error => *left.borrow_mut() -= 1,
    });

    let (found, left) = (devices.clone(), pending.clone());
    let _sinks = introspector.get_sink_info_list(move |result| match result {
        ListResult::Item(info) => {
            if let (Some(name), Some(description)) = (info.name.as_ref(), info.description.as_ref()) {
                found.borrow_mut().push(AudioDevice {
                    name: name.to_string(),
                    description: description.to_string(),
                    sample_rate: info.sample_spec.rate,
                    channels: info.sample_spec.channels,
                    is_output: true,
                    is_monitor: false,
                });
            }
        }
        ListResult::End | ListResult::Error => *left.borrow_mut() -= 1,
    });

    while *pending.borrow() > 0 {
        iterate(&mut mainloop)?;
    }

    context.disconnect();
    mainloop.quit(Retval(0));

    let devices = devices.borrow().clone();
    debug!("Found {} audio devices", devices.len());
    Ok(devices)
}

fn iterate(mainloop: &mut Mainloop) -> Result<(), AudioError> {
    match mainloop.iterate(true) {
        IterateResult::Quit(_) | IterateResult::Err(_) => {
            Err(AudioError::Other("mainloop iterate failed".to_string()))
        }
        IterateResult::Success(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let init = AudioError::Init {
            device: "default".to_string(),
            reason: "no server".to_string(),
        };
        assert_eq!(init.severity(), Severity::Degraded);
        assert_eq!(AudioError::ShortRead { got: 10, want: 1024 }.severity(), Severity::Transient);
        assert_eq!(AudioError::NothingWritten.severity(), Severity::Transient);
    }

    #[test]
    fn test_invalid_spec_is_init_error() {
        let format = PcmFormat { sample_rate: 0, channels: 1 };
        match PulseSpeaker::open("voicelink-test", None, &format) {
            Err(AudioError::Init { reason, .. }) => assert!(reason.contains("invalid sample spec")),
            Err(other) => panic!("Unexpected error: {:?}", other),
            Ok(_) => panic!("opened a stream with a zero sample rate"),
        }
    }
}
