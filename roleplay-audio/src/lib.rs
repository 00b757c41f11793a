//! Roleplay Audio
//!
//! Audio plumbing for a live, two-way voice conversation: microphone capture
//! framed into fixed PCM16 blocks, and gapless scheduled playback of the
//! synthesized replies with instant barge-in cancellation.
//!
//! ## Architecture
//!
//! ```text
//! Microphone (cpal)
//!   │
//!   ├─> Resampler (rubato) -> 16kHz mono
//!   │
//!   └─> BlockFramer -> 4096-sample blocks -> RMS level + PCM16 + base64
//!
//! Inbound fragments (24kHz PCM16)
//!   │
//!   └─> PlaybackScheduler -> cursor-ordered sources -> OutputDevice mixer (cpal)
//! ```
//!
//! The hardware sits behind the [`AudioBackend`], [`MicrophoneStream`] and
//! [`OutputDevice`] traits so the scheduling and framing logic can run
//! without a sound card.

pub mod capture;
pub mod codec;
pub mod cpal_backend;
pub mod device;
pub mod error;
pub mod playback;
pub mod resampler;

#[cfg(target_os = "macos")]
pub mod permission;

use serde::{Deserialize, Serialize};

pub use capture::{BlockFramer, CaptureBlock, CapturePipeline};
pub use cpal_backend::CpalBackend;
pub use device::{
    AudioBackend, EndedCallback, MicrophoneStream, OutputDevice, PlaybackBuffer, PlaybackHandle,
    SampleCallback, SourceId,
};
pub use error::{AudioError, Result};
pub use playback::{PlaybackScheduler, ScheduledSource};
pub use resampler::Resampler;

/// Sample rate of outbound microphone audio (16kHz)
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of inbound synthesized audio (24kHz)
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Samples per outbound block
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// MIME type attached to every outbound block
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Microphone capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Delivered sample rate (default: 16000 Hz)
    pub sample_rate: u32,
    /// Samples per encoded block (default: 4096)
    pub block_size: usize,
    /// Input device index (None = default device)
    pub device_index: Option<usize>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE,
            block_size: CAPTURE_BLOCK_SIZE,
            device_index: None,
        }
    }
}

/// Speaker output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Sample rate of the fragments being played (default: 24000 Hz)
    pub sample_rate: u32,
    /// Linear output gain
    pub volume: f32,
    /// Output device index (None = default device)
    pub device_index: Option<usize>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            volume: 1.0,
            device_index: None,
        }
    }
}
