use std::error::Error;
use std::time::Duration;
use voicelink::audio::{list_devices, Microphone, PcmFormat, PulseMicrophone, PulseSpeaker, Speaker};
use voicelink::endpoint::mean_abs_amplitude;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let format = PcmFormat {
        sample_rate: 16000,
        channels: 1,
    };

    println!("Available audio devices:");
    match list_devices() {
        Ok(devices) if devices.is_empty() => println!("No audio devices found!"),
        Ok(devices) => {
            for (i, device) in devices.iter().enumerate() {
                let kind = if device.is_output {
                    "Speaker"
                } else if device.is_monitor {
                    "Monitor"
                } else {
                    "Microphone"
                };
                println!("{}: {} ({})", i + 1, device.description, kind);
                println!("   Name: {}", device.name);
                println!("   Rate: {} Hz, Channels: {}", device.sample_rate, device.channels);
                println!();
            }
        }
        Err(e) => println!("Error listing devices: {}", e),
    }

    println!("\nTesting default microphone...");
    match PulseMicrophone::open("voicelink-test", None, &format) {
        Ok(mut mic) => {
            // Half a second of 1024-byte chunks
            let mut buf = vec![0u8; 1024];
            for _ in 0..16 {
                match mic.read(&mut buf) {
                    Ok(n) => println!("  read {} bytes, amplitude {:.1}", n, mean_abs_amplitude(&buf[..n])),
                    Err(e) => println!("  ❌ Read failed: {}", e),
                }
            }
        }
        Err(e) => println!("  ❌ Failed: {}", e),
    }

    println!("\nTesting default speaker...");
    match PulseSpeaker::open("voicelink-test", None, &format) {
        Ok(mut speaker) => {
            // 440 Hz for 300 ms
            let tone: Vec<u8> = (0..4800)
                .map(|i| {
                    let t = i as f32 / format.sample_rate as f32;
                    ((t * 440.0 * std::f32::consts::TAU).sin() * 4000.0) as i16
                })
                .flat_map(i16::to_le_bytes)
                .collect();
            match speaker.write(&tone).and_then(|_| speaker.drain()) {
                Ok(()) => println!("  ✅ Played test tone"),
                Err(e) => println!("  ❌ Playback failed: {}", e),
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        Err(e) => println!("  ❌ Failed: {}", e),
    }

    println!("\nAudio device test complete!");
    Ok(())
}
