//! Hardware seam: microphone and speaker abstractions
//!
//! Everything acquired from the OS is modeled as an owned value with a single
//! release point (`stop`/`close`, also run on drop by the implementations).

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::{CaptureConfig, PlaybackConfig};

/// Receives mono f32 samples at the stream's sample rate, in capture order
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send>;

/// Invoked when a scheduled source finishes playing on its own (not when stopped)
pub type EndedCallback = Arc<dyn Fn(SourceId) + Send + Sync>;

/// Identity of one scheduled playback source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// Decoded mono audio ready to be scheduled
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Decode little-endian PCM16 bytes
    pub fn from_pcm16_bytes(bytes: &[u8], sample_rate: u32) -> Self {
        Self::new(crate::codec::pcm16_bytes_to_float(bytes), sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Shared handle to the sample data (no copy)
    pub fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Entry point to the platform's audio system
pub trait AudioBackend: Send + Sync {
    /// Whether an audio input API exists at all. Must not open any device.
    fn is_available(&self) -> bool;

    /// Acquire exclusive use of a microphone. Samples flow only after
    /// [`MicrophoneStream::start`].
    fn acquire_microphone(&self, config: &CaptureConfig) -> Result<Box<dyn MicrophoneStream>>;

    /// Open a speaker output. `on_ended` fires for every source that plays
    /// to completion.
    fn open_output(
        &self,
        config: &PlaybackConfig,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn OutputDevice>>;
}

/// An acquired microphone
pub trait MicrophoneStream: Send {
    /// Rate of the samples handed to the callback
    fn sample_rate(&self) -> u32;

    /// Begin delivering samples. Called at most once per stream.
    fn start(&mut self, on_samples: SampleCallback) -> Result<()>;

    /// Release the device. Idempotent; never fails.
    fn stop(&mut self);
}

/// An opened speaker output with its own clock
pub trait OutputDevice: Send {
    /// Rate the device renders at
    fn sample_rate(&self) -> u32;

    /// Seconds of audio the device has rendered since it was opened
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to begin at device time `at` (seconds)
    fn start(
        &mut self,
        id: SourceId,
        buffer: &PlaybackBuffer,
        at: f64,
    ) -> Result<Box<dyn PlaybackHandle>>;

    /// Stop everything and release the device. Idempotent.
    fn close(&mut self);
}

/// One scheduled source on an output device
pub trait PlaybackHandle: Send {
    fn id(&self) -> SourceId;

    /// Silence this source immediately. Idempotent.
    fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_playback_buffer_duration() {
        let buffer = PlaybackBuffer::new(vec![0.0; 12000], 24000);
        assert_relative_eq!(buffer.duration(), 0.5);
        assert_eq!(buffer.len(), 12000);

        let empty = PlaybackBuffer::new(Vec::new(), 0);
        assert_eq!(empty.duration(), 0.0);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_playback_buffer_from_pcm16() {
        let buffer = PlaybackBuffer::from_pcm16_bytes(&[0x00, 0x40, 0x00, 0xc0], 24000);
        assert_eq!(buffer.samples(), &[0.5, -0.5]);
    }
}
