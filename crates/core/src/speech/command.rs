use crate::speech::{SpeechError, SpeechOutput, SpeechParams, Utterance};
use std::process::Stdio;
use tokio::process::Command;

const LOG_TARGET: &str = "speech::command";
const BASE_WORDS_PER_MINUTE: f32 = 175.0;
const BASE_PITCH: f32 = 50.0;
const BASE_AMPLITUDE: f32 = 100.0;

/// Speaks through an espeak-compatible program (`-s` words per minute,
/// `-p` pitch 0-99, `-a` amplitude 0-200, text as the last argument).
#[derive(Clone, Debug)]
pub struct CommandSpeech {
    program: String,
}

impl CommandSpeech {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn launch(&self, utterance: Utterance) -> Result<(), SpeechError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| SpeechError::NoRuntime)?;
        let mut child = Command::new(&self.program)
            .args(speech_args(&utterance.params))
            .arg(&utterance.text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SpeechError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let program = self.program.clone();
        handle.spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => tracing::warn!(target: LOG_TARGET, %program, %status, "speech command exited unsuccessfully"),
                Err(e) => tracing::warn!(target: LOG_TARGET, %program, error = %e, "speech command wait failed"),
            }
        });
        Ok(())
    }
}

impl SpeechOutput for CommandSpeech {
    fn speak(&self, utterance: Utterance) {
        if let Err(e) = self.launch(utterance) {
            tracing::warn!(target: LOG_TARGET, error = %e, "speech unavailable");
        }
    }
}

pub(crate) fn speech_args(params: &SpeechParams) -> Vec<String> {
    let words_per_minute = (params.rate * BASE_WORDS_PER_MINUTE).round().clamp(80.0, 500.0);
    let pitch = (params.pitch * BASE_PITCH).round().clamp(0.0, 99.0);
    let amplitude = (params.volume * BASE_AMPLITUDE).round().clamp(0.0, 200.0);
    vec![
        "-s".to_owned(),
        format!("{words_per_minute}"),
        "-p".to_owned(),
        format!("{pitch}"),
        "-a".to_owned(),
        format!("{amplitude}"),
    ]
}
