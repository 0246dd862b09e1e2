//! Camera access and frame snapshots.
//!
//! A [`Camera`] hands out a [`MediaStream`] that the session owns for as long as
//! it runs. Each cycle pulls the current frame from that stream and passes it to
//! a [`FrameRenderer`], which produces the encoded image sent for analysis.

mod directory;
mod renderer;

use crate::config::ConfigError;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use directory::FrameDirectoryCamera;
pub use renderer::{encode_frame, ImageFrameRenderer};

pub const DEFAULT_IDEAL_WIDTH: u32 = 1280;
pub const DEFAULT_IDEAL_HEIGHT: u32 = 720;
pub const DEFAULT_FRAME_QUALITY: f32 = 0.7;

pub type VideoFrame = image::RgbImage;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum FacingMode {
    /// Front camera.
    #[default]
    User,
}

/// Soft constraints: a camera may ignore any of them.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamConstraints {
    pub facing: FacingMode,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            facing: FacingMode::User,
            ideal_width: DEFAULT_IDEAL_WIDTH,
            ideal_height: DEFAULT_IDEAL_HEIGHT,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct FrameEncoding {
    pub format: ImageFormat,
    /// In (0, 1]. Ignored by lossless formats.
    pub quality: f32,
}

impl FrameEncoding {
    pub fn new(format: ImageFormat, quality: f32) -> Result<Self, ConfigError> {
        if !(quality > 0.0 && quality <= 1.0) {
            return Err(ConfigError::QualityOutOfRange(quality.to_string()));
        }
        Ok(Self { format, quality })
    }

    pub fn quality_percent(&self) -> u8 {
        (self.quality * 100.0).round().clamp(1.0, 100.0) as u8
    }
}

impl Default for FrameEncoding {
    fn default() -> Self {
        Self {
            format: ImageFormat::Jpeg,
            quality: DEFAULT_FRAME_QUALITY,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedFrame {
    pub bytes: Bytes,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaAccessError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("no camera available: {0}")]
    NoDevice(String),

    #[error("camera unavailable: {0}")]
    Unavailable(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("media stream has ended")]
    StreamEnded,

    #[error("frame encoding failed: {0}")]
    Encode(String),

    #[error("render task failed: {0}")]
    RenderTask(String),
}

/// One video track of a stream. Once stopped it stays stopped.
#[derive(Debug)]
pub struct VideoTrack {
    label: String,
    live: AtomicBool,
}

impl VideoTrack {
    pub fn new<S: Into<String>>(label: S) -> Self {
        Self {
            label: label.into(),
            live: AtomicBool::new(true),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        if self.live.swap(false, Ordering::AcqRel) {
            tracing::debug!(track = %self.label, "video track stopped");
        }
    }
}

pub trait MediaStream: Send + Sync {
    fn tracks(&self) -> &[VideoTrack];

    fn current_frame(&self) -> Result<VideoFrame, CaptureError>;

    fn is_live(&self) -> bool {
        self.tracks().iter().any(VideoTrack::is_live)
    }

    /// Stops every track. Safe to call repeatedly.
    fn stop_all_tracks(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}

pub trait Camera: Send + Sync {
    fn open(
        &self,
        constraints: StreamConstraints,
    ) -> BoxFuture<'_, Result<Arc<dyn MediaStream>, MediaAccessError>>;
}

pub trait FrameRenderer: Send + Sync {
    fn render(
        &self,
        frame: VideoFrame,
        encoding: FrameEncoding,
    ) -> BoxFuture<'_, Result<EncodedFrame, CaptureError>>;
}
