//! Dialogue pipeline collaborator boundary.
//!
//! Speech-to-text, response generation, and synthesis live behind this
//! trait; the protocol core only sees an utterance going in and response
//! audio coming out. The call may take arbitrarily long — the session
//! handler's busy flag, not a timeout, is the correctness mechanism.

use async_trait::async_trait;

use crate::audio::AudioFrame;
use crate::control::Emotion;
use crate::endpoint::Utterance;
use crate::error::Result;

pub struct PipelineResponse {
    /// Response audio at the protocol rate, in playback order. May be
    /// empty, in which case only the response-end control is sent.
    pub audio: Vec<AudioFrame>,
    /// Presentation hint sent ahead of the audio.
    pub emotion: Emotion,
}

#[async_trait]
pub trait DialoguePipeline: Send + Sync {
    async fn respond(&self, utterance: &Utterance) -> Result<PipelineResponse>;
}

/// Plays the caller's own utterance back with a neutral face. Lets the
/// whole duplex loop run without the hosted dialogue services.
pub struct EchoPipeline;

#[async_trait]
impl DialoguePipeline for EchoPipeline {
    async fn respond(&self, utterance: &Utterance) -> Result<PipelineResponse> {
        Ok(PipelineResponse {
            audio: utterance.frames().to_vec(),
            emotion: Emotion::Neutral,
        })
    }
}
