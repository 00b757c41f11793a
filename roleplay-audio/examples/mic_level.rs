//! Capture from the default microphone for a few seconds and print block levels
//!
//! Useful for checking that the device, resampling and framing work before
//! starting a live session.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use roleplay_audio::{AudioBackend, CaptureConfig, CapturePipeline, CpalBackend};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CaptureConfig::default();
    let backend = CpalBackend::new();

    let mic = backend.acquire_microphone(&config)?;
    let mut pipeline = CapturePipeline::new(mic, config.block_size);

    let (tx, rx) = mpsc::channel();
    pipeline.start(move |block| {
        let _ = tx.send(block);
    })?;

    println!("Speak into the microphone (5 seconds)...");
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Ok(block) = rx.recv_timeout(Duration::from_millis(100)) {
            let bar = "#".repeat((block.level as usize).min(60));
            println!("{:5} {:6.2} {}", block.sequence, block.level, bar);
        }
    }

    pipeline.stop();
    println!("Microphone released");
    Ok(())
}
