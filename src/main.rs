//! voicelink - talk to a conversational voice service from the terminal
//!
//! Streams the default PulseAudio source to the service and plays its
//! synthesized replies on the default sink. Ctrl-C ends the session after the
//! queued audio has been sent.

#![forbid(unsafe_code)]

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use voicelink::audio::{Microphone, PulseMicrophone, PulseSpeaker, Speaker};
use voicelink::capture::{CaptureWorker, MicrophoneFactory};
use voicelink::config::Config;
use voicelink::display::LogDisplay;
use voicelink::network::{NetworkLoop, SessionEnd};
use voicelink::playback::{PlaybackWorker, SpeakerFactory};
use voicelink::session::SharedSession;
use voicelink::transport::WsTransport;

const APP_NAME: &str = "voicelink";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("Starting voicelink");

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("VOICELINK_CONFIG").ok())
        .map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("loading configuration")?;
    if config.service.access_token.is_none() {
        warn!("No access token configured, connecting anonymously");
    }

    let transport = WsTransport::connect(&config.service_url(), config.service.access_token.as_deref())
        .await
        .context("connecting to the voice service")?;

    let queue = Arc::new(config.queue());
    let session = Arc::new(SharedSession::new());

    let open_mic: MicrophoneFactory = {
        let format = config.pcm_format();
        let device = config.audio.input_device.clone();
        Arc::new(move || {
            let mic = PulseMicrophone::open(APP_NAME, device.as_deref(), &format)?;
            Ok(Box::new(mic) as Box<dyn Microphone>)
        })
    };
    let open_speaker: SpeakerFactory = {
        let format = config.pcm_format();
        let device = config.audio.output_device.clone();
        Box::new(move || {
            let speaker = PulseSpeaker::open(APP_NAME, device.as_deref(), &format)?;
            Ok(Box::new(speaker) as Box<dyn Speaker>)
        })
    };

    let capture = CaptureWorker::new(config.capture_config(), open_mic, queue.clone(), session.clone());
    let mut network = NetworkLoop::new(
        transport,
        LogDisplay::default(),
        session,
        queue,
        capture,
        PlaybackWorker::new(open_speaker),
        config.session_config(),
        config.network_config(),
    );

    let shutdown = network.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.request_shutdown();
        }
    });

    let result = network.run().await;
    let report = network.report();
    info!(
        "📊 {} frames sent, {} utterances, {} replies played, {} decode failures, {} dropped",
        report.frames_sent, report.endpoints_sent, report.deltas_played, report.decode_failures, report.items_dropped
    );

    match result {
        Ok(SessionEnd::Completed) => info!("Conversation completed"),
        Ok(SessionEnd::LocalShutdown) => info!("Stopped by user"),
        Err(e) => {
            error!("Session error ({:?}): {}", e.severity(), e);
            return Err(e.into());
        }
    }
    Ok(())
}
