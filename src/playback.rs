//! Playback worker
//!
//! Not a thread: the network loop calls [`PlaybackWorker::play`] inline for
//! every synthesized speech chunk. The speaker is opened on first use.

use crate::audio::{AudioError, Speaker};
use tracing::{debug, info, warn};

/// Opens the speaker; called again after a failed open
pub type SpeakerFactory = Box<dyn FnMut() -> Result<Box<dyn Speaker>, AudioError> + Send>;

pub struct PlaybackWorker {
    open_speaker: SpeakerFactory,
    speaker: Option<Box<dyn Speaker>>,
    bytes_played: u64,
}

impl PlaybackWorker {
    pub fn new(open_speaker: SpeakerFactory) -> Self {
        Self {
            open_speaker,
            speaker: None,
            bytes_played: 0,
        }
    }

    /// Write decoded PCM to the speaker, returning the bytes accepted.
    ///
    /// A zero-byte write is an error.
    pub fn play(&mut self, pcm: &[u8]) -> Result<usize, AudioError> {
        if self.speaker.is_none() {
            self.speaker = Some((self.open_speaker)()?);
            info!("🔊 Speaker ready");
        }
        let Some(speaker) = self.speaker.as_mut() else {
            return Err(AudioError::Other("speaker not open".to_string()));
        };

        let written = speaker.write(pcm)?;
        if written == 0 {
            return Err(AudioError::NothingWritten);
        }
        self.bytes_played += written as u64;
        debug!("Played {} bytes", written);
        Ok(written)
    }

    pub fn bytes_played(&self) -> u64 {
        self.bytes_played
    }

    pub fn is_open(&self) -> bool {
        self.speaker.is_some()
    }

    /// Let queued audio finish and release the speaker.
    pub fn close(&mut self) {
        if let Some(mut speaker) = self.speaker.take() {
            if let Err(e) = speaker.drain() {
                warn!("Speaker drain failed: {}", e);
            }
            info!("🔊 Speaker closed");
        }
    }
}

impl Drop for PlaybackWorker {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Speaker that records every write
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSpeaker {
        pub written: Arc<Mutex<Vec<Vec<u8>>>>,
        pub accept_nothing: bool,
    }

    impl Speaker for RecordingSpeaker {
        fn write(&mut self, pcm: &[u8]) -> Result<usize, AudioError> {
            if self.accept_nothing {
                return Ok(0);
            }
            self.written.lock().unwrap().push(pcm.to_vec());
            Ok(pcm.len())
        }
    }

    pub(crate) fn factory(speaker: RecordingSpeaker) -> SpeakerFactory {
        Box::new(move || Ok(Box::new(speaker.clone()) as Box<dyn Speaker>))
    }

    #[test]
    fn test_lazy_open_and_write() {
        let speaker = RecordingSpeaker::default();
        let mut playback = PlaybackWorker::new(factory(speaker.clone()));
        assert!(!playback.is_open());

        assert_eq!(playback.play(&[0x00, 0x01]).unwrap(), 2);
        assert!(playback.is_open());
        assert_eq!(*speaker.written.lock().unwrap(), vec![vec![0x00, 0x01]]);
        assert_eq!(playback.bytes_played(), 2);
    }

    #[test]
    fn test_zero_byte_write_is_failure() {
        let speaker = RecordingSpeaker { accept_nothing: true, ..Default::default() };
        let mut playback = PlaybackWorker::new(factory(speaker));
        assert!(matches!(playback.play(&[1, 2]), Err(AudioError::NothingWritten)));
        assert_eq!(playback.bytes_played(), 0);
    }

    #[test]
    fn test_open_failure_is_retried_on_next_chunk() {
        let attempts = Arc::new(Mutex::new(0));
        let speaker = RecordingSpeaker::default();
        let open: SpeakerFactory = {
            let attempts = attempts.clone();
            let speaker = speaker.clone();
            Box::new(move || {
                let mut n = attempts.lock().unwrap();
                *n += 1;
                if *n == 1 {
                    Err(AudioError::Init { device: "default".to_string(), reason: "busy".to_string() })
                } else {
                    Ok(Box::new(speaker.clone()) as Box<dyn Speaker>)
                }
            })
        };
        let mut playback = PlaybackWorker::new(open);

        assert!(matches!(playback.play(&[1]), Err(AudioError::Init { .. })));
        assert!(!playback.is_open());
        assert_eq!(playback.play(&[2]).unwrap(), 1);
        assert_eq!(*attempts.lock().unwrap(), 2);
        assert_eq!(*speaker.written.lock().unwrap(), vec![vec![2]]);
    }
}
