//! Microphone capture pipeline
//!
//! Turns a live [`MicrophoneStream`] into a sequence of fixed-size, encoded
//! blocks plus a volume level. The device callback only queues raw samples;
//! framing, encoding and delivery happen on a separate thread, in capture
//! order, however slow the consumer is.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::codec::{encode_binary, float_to_pcm16, pcm16_to_bytes, rms};
use crate::device::MicrophoneStream;
use crate::error::{AudioError, Result};

/// Multiplier applied to the block RMS before it is reported as a level
const LEVEL_SCALE: f32 = 100.0;

/// One encoded outbound block
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureBlock {
    /// Position in capture order, starting at 0
    pub sequence: u64,
    /// Base64 of little-endian PCM16 samples
    pub data: String,
    /// Volume level (`rms * 100`), for visualization only
    pub level: f32,
}

/// Accumulates arbitrary-length sample runs into fixed blocks
pub struct BlockFramer {
    block_size: usize,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl BlockFramer {
    pub fn new(block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(AudioError::invalid_config("Block size cannot be zero"));
        }

        Ok(Self {
            block_size,
            pending: Vec::with_capacity(block_size),
            next_sequence: 0,
        })
    }

    /// Append samples and emit every block completed by them, in order
    pub fn push<F>(&mut self, samples: &[f32], mut emit: F)
    where
        F: FnMut(CaptureBlock),
    {
        self.pending.extend_from_slice(samples);

        while self.pending.len() >= self.block_size {
            let block: Vec<f32> = self.pending.drain(..self.block_size).collect();
            emit(self.encode(&block));
        }
    }

    /// Samples waiting for a full block
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn encode(&mut self, block: &[f32]) -> CaptureBlock {
        let level = rms(block) * LEVEL_SCALE;
        let pcm = float_to_pcm16(block);
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        CaptureBlock {
            sequence,
            data: encode_binary(&pcm16_to_bytes(&pcm)),
            level,
        }
    }
}

/// Owns an acquired microphone and frames its output
///
/// The device callback only copies samples onto an unbounded queue. A
/// delivery thread owned by the pipeline frames, encodes and hands blocks to
/// the consumer, so a slow consumer grows the queue instead of stalling the
/// device.
pub struct CapturePipeline {
    stream: Option<Box<dyn MicrophoneStream>>,
    block_size: usize,
    delivery: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    pub fn new(stream: Box<dyn MicrophoneStream>, block_size: usize) -> Self {
        Self {
            stream: Some(stream),
            block_size,
            delivery: None,
        }
    }

    /// Start framing; `on_block` runs on the pipeline's delivery thread for
    /// every completed block, in capture order.
    pub fn start<F>(&mut self, on_block: F) -> Result<()>
    where
        F: Fn(CaptureBlock) + Send + Sync + 'static,
    {
        if self.delivery.is_some() {
            debug!("Capture already running");
            return Ok(());
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| AudioError::stream("Microphone already released"))?;

        let mut framer = BlockFramer::new(self.block_size)?;
        let (tx, rx) = mpsc::channel::<Vec<f32>>();

        let delivery = thread::Builder::new()
            .name("roleplay-capture".to_string())
            .spawn(move || {
                // Ends once the device callback (the only sender) is dropped
                for samples in rx {
                    framer.push(&samples, |block| on_block(block));
                }
                debug!("Capture delivery finished");
            })
            .map_err(|e| AudioError::Internal(format!("Failed to spawn capture thread: {}", e)))?;

        let started = stream.start(Box::new(move |samples: &[f32]| {
            // The receiver only goes away after the stream is stopped
            let _ = tx.send(samples.to_vec());
        }));

        if let Err(e) = started {
            stream.stop();
            self.stream = None;
            let _ = delivery.join();
            return Err(e);
        }

        self.delivery = Some(delivery);
        info!(
            "Capture started ({} Hz, {} samples per block)",
            stream.sample_rate(),
            self.block_size
        );

        Ok(())
    }

    /// Disconnect from the microphone and release it. Blocks already queued
    /// are delivered before this returns. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            info!("Capture stopped, microphone released");
        }
        if let Some(delivery) = self.delivery.take() {
            if delivery.join().is_err() {
                warn!("Capture delivery thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.delivery.is_some()
    }

    /// Whether the microphone is still held
    pub fn holds_microphone(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
