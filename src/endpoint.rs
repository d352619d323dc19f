//! Voice endpoint detection with asymmetric hysteresis and pre-roll.
//!
//! Onset is fast (a single above-threshold frame by default) while release
//! requires a long run of silence, so brief mid-utterance pauses do not
//! end the utterance. A small ring of recent frames is prepended on
//! trigger so onset latency never clips the first syllable.

use std::collections::VecDeque;
use std::time::Duration;

use crate::audio::{AudioFrame, SAMPLE_RATE};

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Probability cutoff separating speech from silence.
    pub threshold: f32,
    /// Consecutive above-threshold frames required to open an utterance.
    pub trigger_frames: u32,
    /// Consecutive below-threshold frames required to close it.
    pub end_frames: u32,
    /// Frames of pre-speech audio retained and prepended on trigger.
    pub pre_roll_frames: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            trigger_frames: 1,
            end_frames: 25,
            pre_roll_frames: 5,
        }
    }
}

/// One contiguous span of detected speech: pre-roll prefix, the voiced
/// frames, and the tolerated silence tail. Finalized utterances are
/// immutable.
#[derive(Debug, Clone)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
}

impl Utterance {
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(AudioFrame::len).sum()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.sample_count() as f64 / SAMPLE_RATE as f64)
    }

    /// Concatenated little-endian PCM of all frames.
    pub fn to_pcm_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.sample_count() * 2);
        for frame in &self.frames {
            bytes.extend_from_slice(&frame.to_pcm_bytes());
        }
        bytes
    }
}

#[derive(Debug)]
pub enum EndpointEvent {
    /// An utterance just opened (the pre-roll is already captured).
    Start,
    /// The open utterance grew by one frame.
    Continue,
    /// The utterance finalized; the detector is idle again.
    End(Utterance),
}

pub struct EndpointDetector {
    config: EndpointConfig,
    speaking: bool,
    trigger_counter: u32,
    silence_counter: u32,
    pre_roll: VecDeque<AudioFrame>,
    open: Vec<AudioFrame>,
}

impl EndpointDetector {
    pub fn new(config: EndpointConfig) -> Self {
        let pre_roll = VecDeque::with_capacity(config.pre_roll_frames);
        Self {
            config,
            speaking: false,
            trigger_counter: 0,
            silence_counter: 0,
            pre_roll,
            open: Vec::new(),
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feed one frame and its speech probability; returns the resulting
    /// endpoint event, if any. At most one utterance is open at a time.
    pub fn feed(&mut self, frame: AudioFrame, probability: f32) -> Option<EndpointEvent> {
        if probability >= self.config.threshold {
            self.silence_counter = 0;
            if self.speaking {
                self.open.push(frame);
                return Some(EndpointEvent::Continue);
            }
            self.trigger_counter += 1;
            if self.trigger_counter >= self.config.trigger_frames {
                self.speaking = true;
                self.trigger_counter = 0;
                self.open.reserve(self.pre_roll.len() + 1);
                self.open.extend(self.pre_roll.drain(..));
                self.open.push(frame);
                log::debug!(
                    "utterance opened ({} pre-roll frames, p={:.2})",
                    self.open.len() - 1,
                    probability
                );
                return Some(EndpointEvent::Start);
            }
            self.push_pre_roll(frame);
            None
        } else {
            self.trigger_counter = 0;
            if self.speaking {
                // Silence tail is retained, not discarded.
                self.silence_counter += 1;
                self.open.push(frame);
                if self.silence_counter >= self.config.end_frames {
                    return Some(EndpointEvent::End(self.finalize()));
                }
                return Some(EndpointEvent::Continue);
            }
            self.push_pre_roll(frame);
            None
        }
    }

    fn push_pre_roll(&mut self, frame: AudioFrame) {
        if self.config.pre_roll_frames == 0 {
            return;
        }
        if self.pre_roll.len() == self.config.pre_roll_frames {
            self.pre_roll.pop_front();
        }
        self.pre_roll.push_back(frame);
    }

    fn finalize(&mut self) -> Utterance {
        self.speaking = false;
        self.silence_counter = 0;
        self.trigger_counter = 0;
        self.pre_roll.clear();
        let utterance = Utterance {
            frames: std::mem::take(&mut self.open),
        };
        log::debug!(
            "utterance finalized ({} frames, {:.2}s)",
            utterance.frame_count(),
            utterance.duration().as_secs_f32()
        );
        utterance
    }
}
