//! Mono sample rate conversion with rubato
//!
//! Used on both sides of the device seam: capture hardware that can't run at
//! 16 kHz is converted down to it, and 24 kHz model audio is converted to
//! whatever rate the speaker runs at.

use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use crate::error::{AudioError, Result};

/// Streaming mono resampler
///
/// Input is accumulated into fixed 100 ms chunks; `process` returns whatever
/// output those chunks produced and keeps the remainder for the next call.
pub struct Resampler {
    source_rate: u32,
    target_rate: u32,
    chunk_size: usize,
    pending: Vec<f32>,
    resampler: Option<SincFixedIn<f32>>,
}

impl Resampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 {
            return Err(AudioError::invalid_config("Sample rate cannot be zero"));
        }

        let chunk_size = ((source_rate as f32 * 0.1) as usize).max(1);

        let resampler = if source_rate != target_rate {
            Some(Self::create_resampler(source_rate, target_rate, chunk_size)?)
        } else {
            None
        };

        Ok(Self {
            source_rate,
            target_rate,
            chunk_size,
            pending: Vec::with_capacity(chunk_size),
            resampler,
        })
    }

    fn create_resampler(
        source_rate: u32,
        target_rate: u32,
        chunk_size: usize,
    ) -> Result<SincFixedIn<f32>> {
        // Shorter sinc than offline work; this runs per device callback
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };

        SincFixedIn::<f32>::new(
            target_rate as f64 / source_rate as f64,
            1.0,
            params,
            chunk_size,
            1,
        )
        .map_err(|e| AudioError::ResampleError(format!("Failed to create resampler: {:?}", e)))
    }

    /// True when source and target rates differ
    pub fn is_active(&self) -> bool {
        self.resampler.is_some()
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Feed samples, get back every complete chunk's worth of output
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(input.to_vec());
        };

        self.pending.extend_from_slice(input);

        let mut output = Vec::new();
        while self.pending.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.pending.drain(..self.chunk_size).collect();
            let planar = resampler
                .process(&[chunk], None)
                .map_err(|e| AudioError::ResampleError(format!("Resampling failed: {:?}", e)))?;
            if let Some(channel) = planar.into_iter().next() {
                output.extend(channel);
            }
        }

        Ok(output)
    }

    /// Convert a complete buffer in one go.
    ///
    /// The tail is zero-padded to a full chunk and the result trimmed to the
    /// length implied by the rate ratio, so the output duration matches the
    /// input duration.
    pub fn process_all(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if self.resampler.is_none() {
            return Ok(input.to_vec());
        }

        let expected = self.expected_output_len(input.len());
        let mut output = self.process(input)?;

        while output.len() < expected {
            let padding = vec![0.0; self.chunk_size - self.pending.len()];
            output.extend(self.process(&padding)?);
        }
        output.truncate(expected);
        self.reset();

        Ok(output)
    }

    /// Drop buffered input and filter state
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    /// Expected output length for a given input length
    pub fn expected_output_len(&self, input_len: usize) -> usize {
        if self.resampler.is_none() {
            return input_len;
        }
        (input_len as f64 * self.target_rate as f64 / self.source_rate as f64).round() as usize
    }
}
