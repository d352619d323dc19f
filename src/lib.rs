//! voicelink: full-duplex voice streaming over websockets.
//!
//! A client captures microphone audio, compresses it with a streaming
//! ADPCM codec, and ships it to a server that runs voice activity
//! detection, cuts utterances at speech endpoints, and streams a spoken
//! response back over the same socket.

pub mod adpcm;
pub mod archive;
pub mod audio;
pub mod client;
pub mod config;
pub mod control;
pub mod device;
pub mod endpoint;
pub mod error;
pub mod jitter;
pub mod pipeline;
pub mod presentation;
pub mod server;
pub mod session;
pub mod state;
pub mod vad;

pub use error::{LinkError, Result};
