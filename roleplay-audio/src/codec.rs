//! Sample format and transport encoding helpers
//!
//! Pure functions, no state. Float samples are in [-1, 1]; PCM16 is signed,
//! little endian on the wire; binary payloads travel as standard base64.

use base64::{engine::general_purpose, Engine as _};

use crate::error::{AudioError, Result};

/// Convert float samples to signed 16-bit PCM.
///
/// Each sample is clamped to [-1, 1], scaled by 32767 when positive and
/// 32768 when negative, then truncated toward zero. NaN maps to 0.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let s = sample.clamp(-1.0, 1.0);
            // signum picks 32767 for s >= 0 and 32768 for s < 0 without a branch
            let scale = 32767.5 - 0.5 * s.signum();
            (s * scale) as i16
        })
        .collect()
}

/// Convert signed 16-bit PCM to float samples (divides by 32768)
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Decode little-endian PCM16 bytes straight to float samples.
///
/// A trailing odd byte is ignored.
pub fn pcm16_bytes_to_float(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Serialize PCM16 samples as little-endian bytes
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Encode an arbitrary byte buffer as text (standard base64)
pub fn encode_binary(buffer: &[u8]) -> String {
    general_purpose::STANDARD.encode(buffer)
}

/// Decode text produced by [`encode_binary`].
///
/// Malformed input yields [`AudioError::InvalidPayload`]; this never panics.
pub fn decode_binary(text: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| AudioError::InvalidPayload(e.to_string()))
}

/// Root-mean-square amplitude of a block (0.0 for an empty block)
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_float_to_pcm16_scaling() {
        let pcm = float_to_pcm16(&[0.0, 1.0, -1.0, 0.5, -0.5]);
        assert_eq!(pcm, vec![0, 32767, -32768, 16383, -16384]);
    }

    #[test]
    fn test_float_to_pcm16_clamps_out_of_range() {
        let pcm = float_to_pcm16(&[4.0, -7.5, f32::NAN]);
        assert_eq!(pcm, vec![32767, -32768, 0]);
    }

    #[test]
    fn test_pcm16_round_trip_within_one_unit() {
        let original: Vec<i16> = vec![i16::MIN, -12345, -1, 0, 1, 2, 12345, i16::MAX];
        let restored = float_to_pcm16(&pcm16_to_float(&original));

        for (a, b) in original.iter().zip(restored.iter()) {
            assert!((*a as i32 - *b as i32).abs() <= 1, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_binary_round_trip() {
        let buffers: Vec<Vec<u8>> = vec![
            Vec::new(),
            vec![0],
            vec![0xff, 0x00, 0x7f],
            (0..=255).collect(),
        ];
        for buffer in buffers {
            assert_eq!(decode_binary(&encode_binary(&buffer)).unwrap(), buffer);
        }
    }

    #[test]
    fn test_decode_rejects_malformed_text() {
        let err = decode_binary("not*base64!").unwrap_err();
        assert!(matches!(err, AudioError::InvalidPayload(_)));
    }

    #[test]
    fn test_pcm16_bytes_little_endian() {
        let bytes = pcm16_to_bytes(&[1, -2, i16::MIN]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xfe, 0xff, 0x00, 0x80]);

        let floats = pcm16_bytes_to_float(&bytes);
        assert_eq!(floats.len(), 3);
        assert_relative_eq!(floats[2], -1.0);
    }

    #[test]
    fn test_pcm16_bytes_ignores_odd_tail() {
        let floats = pcm16_bytes_to_float(&[0x00, 0x40, 0x12]);
        assert_eq!(floats.len(), 1);
        assert_relative_eq!(floats[0], 0.5);
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert_relative_eq!(rms(&[0.5, -0.5, 0.5, -0.5]), 0.5);
        assert!(rms(&[0.8; 16]) > rms(&[0.1; 16]));
    }
}
