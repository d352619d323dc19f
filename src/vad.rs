//! Speech classification collaborators.
//!
//! The protocol core only needs a per-frame speech probability; where that
//! number comes from is a collaborator concern. The default implementation
//! wraps the Silero model via `voice_activity_detector`.

use voice_activity_detector::VoiceActivityDetector;

use crate::audio::{AudioFrame, FRAME_SAMPLES, SAMPLE_RATE};
use crate::error::{LinkError, Result};

/// Produces one speech probability in [0, 1] per inbound frame.
pub trait SpeechClassifier: Send {
    fn probability(&mut self, frame: &AudioFrame) -> Result<f32>;
}

/// Builds one classifier per connection; Silero carries internal state, so
/// instances must never be shared across streams.
pub trait ClassifierFactory: Send + Sync {
    fn make(&self) -> Result<Box<dyn SpeechClassifier>>;
}

pub struct SileroClassifier {
    vad: VoiceActivityDetector,
}

impl SileroClassifier {
    pub fn new() -> Result<Self> {
        let vad = VoiceActivityDetector::builder()
            .sample_rate(SAMPLE_RATE as i64)
            .chunk_size(FRAME_SAMPLES)
            .build()
            .map_err(|e| LinkError::Classifier(format!("failed to build Silero VAD: {e}")))?;
        Ok(Self { vad })
    }
}

impl SpeechClassifier for SileroClassifier {
    fn probability(&mut self, frame: &AudioFrame) -> Result<f32> {
        Ok(self.vad.predict(frame.samples().iter().copied()))
    }
}

pub struct SileroFactory;

impl ClassifierFactory for SileroFactory {
    fn make(&self) -> Result<Box<dyn SpeechClassifier>> {
        Ok(Box::new(SileroClassifier::new()?))
    }
}

/// Peak-amplitude classifier: 1.0 when any sample reaches the level,
/// 0.0 otherwise. No model dependency; used by tests and handy for
/// development loopback setups.
pub struct LevelClassifier {
    level: i16,
}

impl LevelClassifier {
    pub fn new(level: i16) -> Self {
        Self { level }
    }
}

impl SpeechClassifier for LevelClassifier {
    fn probability(&mut self, frame: &AudioFrame) -> Result<f32> {
        let peak = frame
            .samples()
            .iter()
            .map(|s| (*s as i32).abs())
            .max()
            .unwrap_or(0);
        Ok(if peak >= self.level as i32 { 1.0 } else { 0.0 })
    }
}

pub struct LevelFactory {
    pub level: i16,
}

impl ClassifierFactory for LevelFactory {
    fn make(&self) -> Result<Box<dyn SpeechClassifier>> {
        Ok(Box::new(LevelClassifier::new(self.level)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_classifier_thresholds_on_peak() {
        let mut classifier = LevelClassifier::new(1000);
        let quiet = AudioFrame::new(vec![10, -200, 999]);
        let loud = AudioFrame::new(vec![0, 0, -1000]);
        assert_eq!(classifier.probability(&quiet).unwrap(), 0.0);
        assert_eq!(classifier.probability(&loud).unwrap(), 1.0);
    }
}
