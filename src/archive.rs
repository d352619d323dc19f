//! Optional on-disk archive of finalized utterances: a 16 kHz mono WAV
//! plus a small JSON sidecar with capture metadata.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audio::SAMPLE_RATE;
use crate::endpoint::Utterance;
use crate::error::{LinkError, Result};

#[derive(Debug, Serialize)]
struct UtteranceMetadata {
    captured_at: DateTime<Utc>,
    frames: usize,
    samples: usize,
    duration_ms: u64,
    sample_rate: u32,
}

pub struct UtteranceArchive {
    dir: PathBuf,
}

impl UtteranceArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Write the utterance and its sidecar; returns the WAV path.
    pub fn save(&self, utterance: &Utterance) -> Result<PathBuf> {
        let captured_at = Utc::now();
        let stem = format!("recording_{}", captured_at.format("%Y-%m-%d_%H-%M-%S%.3f"));
        let wav_path = self.dir.join(format!("{stem}.wav"));

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&wav_path, spec)
            .map_err(|e| LinkError::Archive(format!("create {}: {e}", wav_path.display())))?;
        for frame in utterance.frames() {
            for &sample in frame.samples() {
                writer
                    .write_sample(sample)
                    .map_err(|e| LinkError::Archive(format!("write sample: {e}")))?;
            }
        }
        writer
            .finalize()
            .map_err(|e| LinkError::Archive(format!("finalize wav: {e}")))?;

        let metadata = UtteranceMetadata {
            captured_at,
            frames: utterance.frame_count(),
            samples: utterance.sample_count(),
            duration_ms: utterance.duration().as_millis() as u64,
            sample_rate: SAMPLE_RATE,
        };
        let json_path = self.dir.join(format!("{stem}.json"));
        let json = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| LinkError::Archive(format!("encode metadata: {e}")))?;
        std::fs::write(&json_path, json)?;

        log::info!(
            "archived utterance to {} ({} frames, {} ms)",
            wav_path.display(),
            metadata.frames,
            metadata.duration_ms
        );
        Ok(wav_path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
