//! Local voice-activity endpointing
//!
//! A simple energy gate: a chunk whose mean absolute amplitude exceeds the
//! threshold counts as voiced. After voice has been seen, a run of quiet chunks
//! lasting `silence` (wall clock, measured from the last voiced chunk) closes
//! the utterance. Nothing is gated: the caller still transmits every chunk.

use std::time::{Duration, Instant};

/// Mean absolute amplitude of 16-bit signed little-endian PCM.
///
/// A trailing odd byte is ignored. Returns 0.0 for an empty chunk.
pub fn mean_abs_amplitude(pcm: &[u8]) -> f32 {
    let samples = pcm.chunks_exact(2);
    let count = samples.len();
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = samples
        .map(|s| u64::from(i16::from_le_bytes([s[0], s[1]]).unsigned_abs()))
        .sum();
    sum as f32 / count as f32
}

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Mean absolute amplitude above which a chunk counts as voiced
    pub voice_threshold: f32,
    /// Silence after voice that closes an utterance
    pub silence: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            voice_threshold: 100.0,
            silence: Duration::from_millis(1500),
        }
    }
}

/// Detector state; owned by the capture worker, never shared.
#[derive(Debug)]
pub struct EndpointDetector {
    cfg: EndpointConfig,
    voice_seen: bool,
    last_voiced: Option<Instant>,
    silence: Duration,
}

impl EndpointDetector {
    pub fn new(cfg: EndpointConfig) -> Self {
        Self {
            cfg,
            voice_seen: false,
            last_voiced: None,
            silence: Duration::ZERO,
        }
    }

    /// Feed one chunk's amplitude observed at `now`.
    ///
    /// Returns `true` exactly once per utterance, on the chunk where the
    /// accumulated silence reaches the configured duration.
    pub fn observe(&mut self, amplitude: f32, now: Instant) -> bool {
        if amplitude > self.cfg.voice_threshold {
            self.voice_seen = true;
            self.last_voiced = Some(now);
            self.silence = Duration::ZERO;
            return false;
        }

        if !self.voice_seen {
            return false;
        }

        let since = self.last_voiced.unwrap_or(now);
        self.silence = now.saturating_duration_since(since);
        if self.silence >= self.cfg.silence {
            self.reset();
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.voice_seen = false;
        self.last_voiced = None;
        self.silence = Duration::ZERO;
    }

    pub fn voice_seen(&self) -> bool {
        self.voice_seen
    }

    /// Silence accumulated since the last voiced chunk of the open utterance
    pub fn silence(&self) -> Duration {
        self.silence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: Duration = Duration::from_millis(32);

    fn pcm(sample: i16, n: usize) -> Vec<u8> {
        std::iter::repeat(sample.to_le_bytes()).take(n).flatten().collect()
    }

    /// Run a sequence of amplitudes spaced one chunk apart and collect the
    /// indices where an endpoint fired.
    fn endpoints(amplitudes: &[f32]) -> Vec<usize> {
        let mut det = EndpointDetector::new(EndpointConfig::default());
        let t0 = Instant::now();
        amplitudes
            .iter()
            .enumerate()
            .filter_map(|(i, &a)| det.observe(a, t0 + CHUNK * i as u32).then_some(i))
            .collect()
    }

    #[test]
    fn test_amplitude_handles_sign_and_extremes() {
        assert_eq!(mean_abs_amplitude(&[]), 0.0);
        assert_eq!(mean_abs_amplitude(&pcm(-200, 8)), 200.0);
        assert_eq!(mean_abs_amplitude(&pcm(i16::MIN, 2)), 32768.0);

        let mut mixed = pcm(100, 1);
        mixed.extend(pcm(-300, 1));
        mixed.push(0xFF); // dangling byte
        assert_eq!(mean_abs_amplitude(&mixed), 200.0);
    }

    #[test]
    fn test_no_endpoint_before_voice() {
        assert!(endpoints(&[0.0; 200]).is_empty());
    }

    #[test]
    fn test_one_endpoint_per_utterance() {
        let silent_chunks = (1500 / 32) + 2;
        let mut seq = vec![500.0; 3];
        seq.extend(vec![10.0; silent_chunks]);
        seq.extend(vec![800.0; 5]);
        seq.extend(vec![10.0; silent_chunks * 3]);

        let fired = endpoints(&seq);
        assert_eq!(fired.len(), 2, "fired at {:?}", fired);
        // 1.5s after the last voiced chunk (index 2) is index 2 + 47
        assert_eq!(fired[0], 2 + 47);
    }

    #[test]
    fn test_short_pause_does_not_endpoint() {
        let mut seq = vec![500.0; 3];
        seq.extend(vec![0.0; 20]); // 640ms
        seq.extend(vec![500.0; 3]);
        seq.extend(vec![0.0; 20]);
        assert!(endpoints(&seq).is_empty());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut seq = vec![100.0; 3];
        seq.extend(vec![0.0; 100]);
        assert!(endpoints(&seq).is_empty());
    }

    #[test]
    fn test_reset_after_endpoint() {
        let mut det = EndpointDetector::new(EndpointConfig::default());
        let t0 = Instant::now();
        assert!(!det.observe(1000.0, t0));
        assert!(det.voice_seen());
        assert!(!det.observe(0.0, t0 + Duration::from_millis(1000)));
        assert_eq!(det.silence(), Duration::from_millis(1000));
        assert!(det.observe(0.0, t0 + Duration::from_millis(1500)));
        assert!(!det.voice_seen());
        assert_eq!(det.silence(), Duration::ZERO);
        assert!(!det.observe(0.0, t0 + Duration::from_secs(10)));
    }
}
