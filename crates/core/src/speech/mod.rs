mod command;

use serde::{Deserialize, Serialize};

pub use command::CommandSpeech;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpeechParams {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for SpeechParams {
    fn default() -> Self {
        Self {
            rate: 0.9,
            pitch: 1.2,
            volume: 1.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub params: SpeechParams,
}

#[derive(thiserror::Error, Debug)]
pub enum SpeechError {
    #[error("failed to launch speech command '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("no async runtime available to run speech")]
    NoRuntime,
}

/// Fire-and-forget: implementations return at once and report their own failures.
pub trait SpeechOutput: Send + Sync {
    fn speak(&self, utterance: Utterance);
}

/// Drops every utterance, leaving a trace line behind.
#[derive(Clone, Debug, Default)]
pub struct SilentSpeech;

impl SpeechOutput for SilentSpeech {
    fn speak(&self, utterance: Utterance) {
        tracing::debug!(chars = utterance.text.chars().count(), "speech disabled, utterance dropped");
    }
}
