//! Network loop
//!
//! One cooperative loop owns the socket for the whole session and alternates
//! between two duties:
//! - drain: move queued frames and markers onto the socket, in order;
//! - receive: wait a bounded time for the next inbound event and dispatch it.
//!
//! The loop is the only writer of session transitions. Playback runs inline.

use crate::capture::CaptureWorker;
use crate::codec;
use crate::display::{DisplayStatus, StatusDisplay};
use crate::error::Severity;
use crate::events::{ControlEvent, QueueItem};
use crate::playback::PlaybackWorker;
use crate::protocol::{self, Dialect, EventIds, InboundEvent, ProtocolError, SessionConfig};
use crate::queue::MessageQueue;
use crate::session::{Phase, SharedSession};
use crate::transport::{Transport, TransportError};
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Inbound silence after which the connection is considered dead
    pub receive_timeout: Duration,
    /// Longest single wait for inbound data while the queue is empty
    pub poll_interval: Duration,
    /// Longest wait for a single send to be accepted by the socket
    pub send_timeout: Duration,
    /// Pause after a failed send before trying again
    pub send_retry_delay: Duration,
    /// Consecutive send failures that end the session
    pub max_send_failures: u32,
    /// Consecutive unparseable inbound messages that end the session
    pub max_malformed: u32,
    /// Queue items sent per drain pass before checking the socket again
    pub drain_batch: usize,
    pub dialect: Dialect,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
            send_timeout: Duration::from_secs(5),
            send_retry_delay: Duration::from_millis(50),
            max_send_failures: 5,
            max_malformed: 5,
            drain_batch: 32,
            dialect: Dialect::Generic,
        }
    }
}

/// Conditions that end a session abnormally
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no message from the service for {0:?}")]
    ReceiveTimeout(Duration),

    #[error("{attempts} consecutive send failures, last: {last}")]
    SendFailures { attempts: u32, last: TransportError },

    #[error("protocol desync: {0} malformed messages in a row")]
    ProtocolDesync(u32),

    #[error("connection closed by the service")]
    ConnectionClosed,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SessionError {
    pub fn severity(&self) -> Severity {
        Severity::Fatal
    }
}

/// How a session ended normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The service completed the session
    Completed,
    /// A local shutdown request reached the head of the queue
    LocalShutdown,
}

/// Counters logged when the session ends
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub endpoints_sent: u64,
    pub configs_sent: u64,
    pub send_retries: u64,
    pub items_dropped: u64,
    pub deltas_played: u64,
    pub playback_failures: u64,
    pub decode_failures: u64,
    pub ignored_events: u64,
}

/// Requests a graceful local shutdown from another task
#[derive(Clone)]
pub struct ShutdownHandle {
    queue: Arc<MessageQueue>,
}

impl ShutdownHandle {
    /// Ends the session after everything already queued has been sent.
    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.queue.enqueue_control(ControlEvent::SessionTerminated);
    }
}

pub struct NetworkLoop<T, D> {
    transport: T,
    display: D,
    session: Arc<SharedSession>,
    queue: Arc<MessageQueue>,
    capture: CaptureWorker,
    playback: PlaybackWorker,
    session_config: SessionConfig,
    cfg: NetworkConfig,
    ids: EventIds,
    report: SessionReport,
    send_failures: u32,
    malformed: u32,
    last_inbound: Instant,
}

impl<T: Transport, D: StatusDisplay> NetworkLoop<T, D> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: T,
        display: D,
        session: Arc<SharedSession>,
        queue: Arc<MessageQueue>,
        capture: CaptureWorker,
        playback: PlaybackWorker,
        session_config: SessionConfig,
        cfg: NetworkConfig,
    ) -> Self {
        Self {
            transport,
            display,
            session,
            queue,
            capture,
            playback,
            session_config,
            cfg,
            ids: EventIds::new(),
            report: SessionReport::default(),
            send_failures: 0,
            malformed: 0,
            last_inbound: Instant::now(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { queue: self.queue.clone() }
    }

    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the session to its end, then release the hardware and the socket.
    pub async fn run(&mut self) -> Result<SessionEnd, SessionError> {
        info!("Session started");
        self.display.show_status(DisplayStatus::Idle);
        self.last_inbound = Instant::now();

        let result = self.run_duties().await;
        match &result {
            Ok(end) => info!("Session ended: {:?}", end),
            Err(e) => error!("Session failed: {}", e),
        }

        self.teardown().await;
        result
    }

    async fn run_duties(&mut self) -> Result<SessionEnd, SessionError> {
        loop {
            self.check_capture();
            if let Some(end) = self.drain_duty().await? {
                return Ok(end);
            }
            if let Some(end) = self.receive_duty().await? {
                return Ok(end);
            }
        }
    }

    fn check_capture(&mut self) {
        if let Some(e) = self.capture.poll_fault() {
            error!("Capture unavailable for this session: {}", e);
            if self.session.pause_capture().phase() == Phase::Idle {
                self.display.show_status(DisplayStatus::Idle);
            }
        }
    }

    /// Hand the microphone back to the user after the service is ready or
    /// finished speaking.
    fn resume_listening(&mut self) {
        self.session.start_listening();
        if self.capture.ensure_running() {
            self.display.show_status(DisplayStatus::Listening);
        } else {
            warn!("Capture is disabled, staying silent");
            self.session.pause_capture();
            self.display.show_status(DisplayStatus::Idle);
        }
    }

    fn check_receive_timeout(&self) -> Result<Duration, SessionError> {
        let idle = self.last_inbound.elapsed();
        if idle >= self.cfg.receive_timeout {
            return Err(SessionError::ReceiveTimeout(self.cfg.receive_timeout));
        }
        Ok(idle)
    }

    async fn send_bounded(&mut self, message: &Value) -> Result<(), TransportError> {
        match tokio::time::timeout(self.cfg.send_timeout, self.transport.send(message)).await {
            Ok(sent) => sent,
            Err(_) => Err(TransportError::SendTimeout(self.cfg.send_timeout)),
        }
    }

    async fn drain_duty(&mut self) -> Result<Option<SessionEnd>, SessionError> {
        for _ in 0..self.cfg.drain_batch {
            self.check_receive_timeout()?;
            let Some(item) = self.queue.dequeue_if_any() else {
                break;
            };
            let Some(message) = protocol::outbound_message(&item, self.cfg.dialect, &self.ids) else {
                return Ok(Some(SessionEnd::LocalShutdown));
            };

            match self.send_bounded(&message).await {
                Ok(()) => {
                    self.send_failures = 0;
                    self.record_sent(&item);
                }
                Err(e) => {
                    self.send_failures += 1;
                    self.report.send_retries += 1;
                    self.queue.requeue_front(item);

                    if e.severity() == Severity::Fatal || self.send_failures >= self.cfg.max_send_failures {
                        return Err(SessionError::SendFailures {
                            attempts: self.send_failures,
                            last: e,
                        });
                    }
                    warn!(
                        "Send failed ({}/{}), retrying: {}",
                        self.send_failures, self.cfg.max_send_failures, e
                    );
                    tokio::time::sleep(self.cfg.send_retry_delay).await;
                    break;
                }
            }
        }
        Ok(None)
    }

    fn record_sent(&mut self, item: &QueueItem) {
        match item {
            QueueItem::Audio(frame) => {
                self.report.frames_sent += 1;
                debug!("📤 Sent frame {} ({} bytes)", frame.seq, frame.pcm.len());
            }
            QueueItem::Control(ControlEvent::AudioComplete) => {
                self.report.endpoints_sent += 1;
                info!("📤 Sent end of utterance");
            }
            QueueItem::Control(ControlEvent::SessionConfigReady(_)) => {
                self.report.configs_sent += 1;
                info!("✅ Sent session configuration");
            }
            QueueItem::Control(ControlEvent::SessionTerminated) => {}
        }
    }

    async fn receive_duty(&mut self) -> Result<Option<SessionEnd>, SessionError> {
        let idle = self.check_receive_timeout()?;

        // Only peek at the socket while there is still something to send
        let wait = if self.queue.is_empty() {
            self.cfg.poll_interval.min(self.cfg.receive_timeout - idle)
        } else {
            Duration::ZERO
        };

        let received = match tokio::time::timeout(wait, self.transport.recv()).await {
            Ok(received) => received,
            Err(_) => return Ok(None),
        };

        match received {
            Ok(Some(text)) => {
                self.last_inbound = Instant::now();
                self.dispatch(&text)
            }
            Ok(None) => Err(SessionError::ConnectionClosed),
            Err(e) => Err(e.into()),
        }
    }

    fn dispatch(&mut self, text: &str) -> Result<Option<SessionEnd>, SessionError> {
        let event = match InboundEvent::parse(text) {
            Ok(event) => {
                self.malformed = 0;
                event
            }
            Err(ProtocolError::Json(e)) => {
                self.malformed += 1;
                warn!("Unparseable message ({}/{}): {}", self.malformed, self.cfg.max_malformed, e);
                if self.malformed >= self.cfg.max_malformed {
                    return Err(SessionError::ProtocolDesync(self.malformed));
                }
                return Ok(None);
            }
            Err(e) => {
                self.report.decode_failures += 1;
                warn!("Dropping inbound message: {}", e);
                return Ok(None);
            }
        };

        debug!("📥 {}", event.tag());
        match event {
            InboundEvent::AudioDelta { content } => self.on_audio_delta(&content),
            InboundEvent::AudioCompleted => {
                info!("Service finished speaking");
                self.resume_listening();
            }
            InboundEvent::SessionCreated => {
                info!("Session created, queueing configuration");
                self.queue
                    .enqueue_control(ControlEvent::SessionConfigReady(self.session_config.clone()));
            }
            InboundEvent::SessionUpdated => {
                info!("Session configured, listening");
                self.resume_listening();
            }
            InboundEvent::SessionCompleted => {
                info!("Session completed by the service");
                self.session.go_idle();
                self.display.show_status(DisplayStatus::Idle);
                return Ok(Some(SessionEnd::Completed));
            }
            InboundEvent::Other(tag) => {
                self.report.ignored_events += 1;
                debug!("Ignoring event {}", tag);
            }
        }
        Ok(None)
    }

    fn on_audio_delta(&mut self, content: &str) {
        self.session.pause_capture();

        let pcm = match codec::decode(content) {
            Ok(pcm) => pcm,
            Err(e) => {
                self.report.decode_failures += 1;
                warn!("Dropping undecodable audio delta: {}", e);
                return;
            }
        };

        match self.playback.play(&pcm) {
            Ok(_) => {
                self.report.deltas_played += 1;
                self.session.playback_started();
                self.display.show_status(DisplayStatus::Speaking);
            }
            Err(e) => {
                self.report.playback_failures += 1;
                match e.severity() {
                    Severity::Degraded => error!("Speaker unavailable, skipping audio: {}", e),
                    _ => warn!("Playback failed: {}", e),
                }
                self.session.playback_failed();
            }
        }
    }

    async fn teardown(&mut self) {
        self.session.terminate();
        self.display.show_status(DisplayStatus::Idle);
        self.capture.shutdown();
        self.playback.close();
        if let Err(e) = self.transport.close().await {
            debug!("Error closing socket: {}", e);
        }

        let stats = self.capture.stats();
        self.report.frames_captured = stats.frames.load(Ordering::Relaxed);
        self.report.items_dropped = self.queue.dropped();
        info!("Session report: {:?}", self.report);
    }
}
