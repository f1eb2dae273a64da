//! Capture worker
//!
//! Owns the microphone on a dedicated OS thread. While the session is
//! listening it reads fixed-size chunks, queues every chunk as an
//! [`AudioFrame`], and adds an `AudioComplete` marker whenever the local
//! endpoint detector closes an utterance. It never changes session state.

use crate::audio::{AudioError, Microphone};
use crate::endpoint::{mean_abs_amplitude, EndpointConfig, EndpointDetector};
use crate::error::Severity;
use crate::events::{AudioFrame, ControlEvent, QueueItem};
use crate::queue::{EnqueueOutcome, MessageQueue};
use crate::session::SharedSession;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Opens the microphone each time the capture thread starts
pub type MicrophoneFactory = Arc<dyn Fn() -> Result<Box<dyn Microphone>, AudioError> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Bytes per microphone read
    pub chunk_bytes: usize,
    /// Longest wait between checks of the session state while not listening
    pub idle_poll: Duration,
    /// Consecutive read failures before the worker pauses
    pub max_read_failures: u32,
    pub failure_pause: Duration,
    pub endpoint: EndpointConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: 1024,
            idle_poll: Duration::from_millis(100),
            max_read_failures: 10,
            failure_pause: Duration::from_secs(1),
            endpoint: EndpointConfig::default(),
        }
    }
}

/// Counters shared with the network loop for the session report
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub frames: AtomicU64,
    pub endpoints: AtomicU64,
    pub dropped: AtomicU64,
    pub read_failures: AtomicU64,
}

/// Per-thread capture state
pub struct CaptureLoop<M> {
    mic: M,
    cfg: CaptureConfig,
    detector: EndpointDetector,
    queue: Arc<MessageQueue>,
    session: Arc<SharedSession>,
    stats: Arc<CaptureStats>,
    next_seq: Arc<AtomicU64>,
    buf: Vec<u8>,
    consecutive_failures: u32,
    listening: bool,
}

impl<M: Microphone> CaptureLoop<M> {
    pub fn new(
        mic: M,
        cfg: CaptureConfig,
        queue: Arc<MessageQueue>,
        session: Arc<SharedSession>,
        stats: Arc<CaptureStats>,
        next_seq: Arc<AtomicU64>,
    ) -> Self {
        let buf = vec![0u8; cfg.chunk_bytes];
        Self {
            mic,
            detector: EndpointDetector::new(cfg.endpoint.clone()),
            cfg,
            queue,
            session,
            stats,
            next_seq,
            buf,
            consecutive_failures: 0,
            listening: false,
        }
    }

    /// Capture until the session terminates.
    pub fn run(&mut self) {
        info!("🎤 Capture loop started ({} byte chunks)", self.cfg.chunk_bytes);
        loop {
            let state = self.session.wait_for_capture(self.cfg.idle_poll);
            if state.terminated {
                break;
            }
            self.set_listening(state.capturing);
            if !state.capturing {
                continue;
            }

            match self.read_chunk() {
                Ok(()) => {
                    self.consecutive_failures = 0;
                    let now = Instant::now();
                    let chunk = self.buf.clone();
                    self.process_chunk(chunk, now);
                }
                Err(e) => self.on_read_error(e),
            }
        }
        info!("🎤 Capture loop stopped");
    }

    /// Track capture pauses. An utterance never spans a pause, so the
    /// detector starts fresh each time capturing resumes.
    fn set_listening(&mut self, capturing: bool) {
        if capturing && !self.listening {
            debug!("Capture resumed, endpoint detector reset");
            self.detector.reset();
        }
        self.listening = capturing;
    }

    fn read_chunk(&mut self) -> Result<(), AudioError> {
        let want = self.buf.len();
        let got = self.mic.read(&mut self.buf)?;
        if got < want {
            return Err(AudioError::ShortRead { got, want });
        }
        Ok(())
    }

    fn on_read_error(&mut self, e: AudioError) {
        self.stats.read_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures += 1;
        warn!("Microphone read failed ({}/{}): {}", self.consecutive_failures, self.cfg.max_read_failures, e);

        if self.consecutive_failures >= self.cfg.max_read_failures {
            error!(
                "Microphone failed {} times in a row, pausing capture for {:?}",
                self.consecutive_failures, self.cfg.failure_pause
            );
            std::thread::sleep(self.cfg.failure_pause);
            self.consecutive_failures = 0;
        }
    }

    /// Queue one captured chunk and run endpointing on it.
    pub fn process_chunk(&mut self, pcm: Vec<u8>, now: Instant) {
        let amplitude = mean_abs_amplitude(&pcm);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        debug!("Chunk {} amplitude {:.1}", seq, amplitude);

        self.emit(AudioFrame { seq, pcm }.into());
        self.stats.frames.fetch_add(1, Ordering::Relaxed);

        if self.detector.observe(amplitude, now) {
            info!("🔇 Endpoint after chunk {}", seq);
            self.emit(ControlEvent::AudioComplete.into());
            self.stats.endpoints.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn emit(&self, item: QueueItem) {
        match self.queue.enqueue(item) {
            EnqueueOutcome::Queued => {}
            EnqueueOutcome::Evicted(_) | EnqueueOutcome::Rejected(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Message queue full, dropped an item ({} total)", self.queue.dropped());
            }
        }
    }
}

/// Starts, restarts and joins the capture thread on behalf of the network loop
pub struct CaptureWorker {
    cfg: CaptureConfig,
    open_mic: MicrophoneFactory,
    queue: Arc<MessageQueue>,
    session: Arc<SharedSession>,
    stats: Arc<CaptureStats>,
    next_seq: Arc<AtomicU64>,
    handle: Option<JoinHandle<Result<(), AudioError>>>,
    disabled: bool,
}

impl CaptureWorker {
    pub fn new(
        cfg: CaptureConfig,
        open_mic: MicrophoneFactory,
        queue: Arc<MessageQueue>,
        session: Arc<SharedSession>,
    ) -> Self {
        Self {
            cfg,
            open_mic,
            queue,
            session,
            stats: Arc::new(CaptureStats::default()),
            next_seq: Arc::new(AtomicU64::new(0)),
            handle: None,
            disabled: false,
        }
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// True once the microphone failed to open; capture stays off for the session
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Start the capture thread unless it is running or capture is disabled.
    ///
    /// Returns whether a capture thread is running afterwards.
    pub fn ensure_running(&mut self) -> bool {
        if let Some(e) = self.poll_fault() {
            warn!("Previous capture thread failed: {}", e);
        }
        if self.disabled {
            return false;
        }
        if self.is_running() {
            return true;
        }

        let open_mic = self.open_mic.clone();
        let cfg = self.cfg.clone();
        let queue = self.queue.clone();
        let session = self.session.clone();
        let stats = self.stats.clone();
        let next_seq = self.next_seq.clone();

        let spawned = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let mic = open_mic().map_err(|e| {
                    error!("🎤 Microphone unavailable, capture disabled: {}", e);
                    e
                })?;
                CaptureLoop::new(mic, cfg, queue, session, stats, next_seq).run();
                Ok(())
            });

        match spawned {
            Ok(handle) => {
                info!("Capture thread started");
                self.handle = Some(handle);
                true
            }
            Err(e) => {
                error!("Failed to spawn capture thread: {}", e);
                self.disabled = true;
                false
            }
        }
    }

    /// Collect the result of a capture thread that has exited.
    ///
    /// A thread that could not open the microphone disables capture and its
    /// error is returned once.
    pub fn poll_fault(&mut self) -> Option<AudioError> {
        if self.is_running() || self.handle.is_none() {
            return None;
        }
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                if e.severity() == Severity::Degraded {
                    self.disabled = true;
                }
                Some(e)
            }
            Err(_) => {
                self.disabled = true;
                Some(AudioError::Other("capture thread panicked".to_string()))
            }
        }
    }

    /// Join the capture thread. The session must already be terminated,
    /// otherwise the thread keeps running and this blocks.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Joining capture thread");
            match handle.join() {
                Ok(Ok(())) | Ok(Err(_)) => {}
                Err(_) => error!("Capture thread panicked"),
            }
        }
    }
}
