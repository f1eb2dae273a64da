//! Run the endpoint detector over a 16-bit mono WAV file and print where
//! utterances would be closed.
//!
//! Usage: endpoint_demo <file.wav> [chunk_bytes]

use std::error::Error;
use std::time::{Duration, Instant};
use voicelink::endpoint::{mean_abs_amplitude, EndpointConfig, EndpointDetector};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or("usage: endpoint_demo <file.wav> [chunk_bytes]")?;
    let chunk_bytes: usize = match args.next() {
        Some(n) => n.parse()?,
        None => 1024,
    };

    let mut reader = hound::WavReader::open(&path)?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(format!("{}: expected 16-bit integer PCM, got {:?}", path, spec).into());
    }
    println!(
        "{}: {} Hz, {} channel(s), {} byte chunks",
        path, spec.sample_rate, spec.channels, chunk_bytes
    );

    // Only the first channel is analysed
    let samples: Vec<i16> = reader
        .samples::<i16>()
        .step_by(usize::from(spec.channels.max(1)))
        .collect::<Result<_, _>>()?;

    let samples_per_chunk = (chunk_bytes / 2).max(1);
    let chunk_duration = Duration::from_secs_f64(samples_per_chunk as f64 / f64::from(spec.sample_rate));
    let mut detector = EndpointDetector::new(EndpointConfig::default());
    let t0 = Instant::now();
    let mut endpoints = 0;

    for (i, chunk) in samples.chunks(samples_per_chunk).enumerate() {
        let pcm: Vec<u8> = chunk.iter().flat_map(|s| s.to_le_bytes()).collect();
        let at = chunk_duration * i as u32;
        if detector.observe(mean_abs_amplitude(&pcm), t0 + at) {
            endpoints += 1;
            println!("🔇 endpoint {} at {:.2}s (chunk {})", endpoints, at.as_secs_f64(), i);
        }
    }

    if detector.voice_seen() {
        println!("Open utterance at end of file ({:.2}s of trailing silence)", detector.silence().as_secs_f64());
    }
    println!("{} endpoint(s) in {} chunks", endpoints, samples.len().div_ceil(samples_per_chunk));
    Ok(())
}
