use std::sync::Arc;

use crate::error::Result;

/// Protocol sample rate. Both endpoints run at 16 kHz mono.
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per frame on the wire (512 samples = 1024 PCM bytes = 256
/// encoded bytes).
pub const FRAME_SAMPLES: usize = 512;

/// A fixed-length block of 16-bit mono PCM. Immutable once produced;
/// clones share the underlying samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Arc<[i16]>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    pub fn silence(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    /// Parse little-endian PCM bytes. A trailing odd byte is discarded.
    pub fn from_pcm_bytes(bytes: &[u8]) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();
        Self::new(samples)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in self.samples.iter() {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    pub fn duration_ms(&self) -> f32 {
        self.samples.len() as f32 * 1000.0 / SAMPLE_RATE as f32
    }
}

impl From<Vec<i16>> for AudioFrame {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples)
    }
}

/// Capture collaborator: produces raw PCM frames at the protocol rate.
#[async_trait::async_trait]
pub trait AudioSource: Send {
    /// Wait for the next captured frame. Errors are treated as transient
    /// by the capture loop; implementations that cannot recover should
    /// keep returning the error.
    async fn next_frame(&mut self) -> Result<AudioFrame>;
}

/// Playback collaborator: consumes raw PCM frames at the protocol rate.
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, frame: &AudioFrame) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_bytes_round_trip() {
        let frame = AudioFrame::new(vec![0, 1, -1, i16::MAX, i16::MIN]);
        let bytes = frame.to_pcm_bytes();
        assert_eq!(bytes.len(), 10);
        assert_eq!(AudioFrame::from_pcm_bytes(&bytes), frame);
    }

    #[test]
    fn trailing_odd_byte_is_discarded() {
        let frame = AudioFrame::from_pcm_bytes(&[0x34, 0x12, 0xff]);
        assert_eq!(frame.samples(), &[0x1234]);
    }

    #[test]
    fn frame_duration() {
        let frame = AudioFrame::silence(FRAME_SAMPLES);
        assert_eq!(frame.duration_ms(), 32.0);
    }
}
