//! Values the session hands to whatever draws the mirror.
//!
//! The session never reads any of this back; a sink only renders it.

use crate::metrics::Scoreboard;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StatusMessage {
    Loading,
    Analyzing,
    CameraDenied,
    Stopped,
    StartFirst,
    ServiceMalfunction,
    NetworkFailure,
    KarmaEnabled,
    KarmaDisabled,
    RoastFirst,
}

impl StatusMessage {
    pub fn text(self) -> &'static str {
        match self {
            StatusMessage::Loading => "Loading...",
            StatusMessage::Analyzing => "Analyzing your questionable life choices...",
            StatusMessage::CameraDenied => "Camera access denied. Coward.",
            StatusMessage::Stopped => "Mirror stopped. Your ego is safe for now.",
            StatusMessage::StartFirst => "Start the mirror first!",
            StatusMessage::ServiceMalfunction => "Mirror malfunction... try again",
            StatusMessage::NetworkFailure => "Network error... mirror is judging you silently",
            StatusMessage::KarmaEnabled => "Karma mode enabled. Prepare for fake compliments!",
            StatusMessage::KarmaDisabled => "Karma mode disabled. Brutal honesty restored!",
            StatusMessage::RoastFirst => "Get roasted first!",
        }
    }

    /// Transient text that is not worth sharing.
    pub fn is_placeholder(self) -> bool {
        matches!(self, StatusMessage::Loading | StatusMessage::Analyzing)
    }
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Presentation {
    /// Replaces the main text.
    Status(StatusMessage),
    /// Replaces the main text.
    Roast(String),
    Expression { label: String, glyph: String },
    /// Newest first, at most ten entries.
    Log(Vec<String>),
    Scores(Scoreboard),
    RunningChanged(bool),
    KarmaModeChanged(bool),
    /// One-off message the user must acknowledge.
    Prompt(String),
}

/// Sinks must not call back into the session.
pub trait PresentationSink: Send + Sync {
    fn present(&self, update: Presentation);
}

/// Forwards every update to a channel; a closed receiver drops updates.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: UnboundedSender<Presentation>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<Presentation>) -> Self {
        Self { tx }
    }
}

impl PresentationSink for ChannelSink {
    fn present(&self, update: Presentation) {
        if self.tx.send(update).is_err() {
            tracing::trace!("presentation receiver closed, update dropped");
        }
    }
}
