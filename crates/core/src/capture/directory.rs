use crate::capture::{
    Camera, CaptureError, MediaAccessError, MediaStream, StreamConstraints, VideoFrame, VideoTrack,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const FRAME_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// A virtual webcam fed by the still images in a directory.
///
/// Every open reloads the directory, so a stopped stream is never reused. Frames
/// larger than the ideal resolution are scaled down to fit it, preserving aspect.
#[derive(Clone, Debug)]
pub struct FrameDirectoryCamera {
    dir: PathBuf,
}

impl FrameDirectoryCamera {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }
}

impl Camera for FrameDirectoryCamera {
    fn open(
        &self,
        constraints: StreamConstraints,
    ) -> BoxFuture<'_, Result<Arc<dyn MediaStream>, MediaAccessError>> {
        let dir = self.dir.clone();
        async move {
            tracing::debug!(
                dir = %dir.display(),
                facing = ?constraints.facing,
                ideal_width = constraints.ideal_width,
                ideal_height = constraints.ideal_height,
                "opening frame directory camera"
            );
            let label = dir.display().to_string();
            let frames = tokio::task::spawn_blocking(move || load_frames(&dir, &constraints))
                .await
                .map_err(|e| MediaAccessError::Unavailable(e.to_string()))??;

            tracing::info!(frames = frames.len(), source = %label, "camera stream opened");
            let stream: Arc<dyn MediaStream> = Arc::new(FrameDirectoryStream {
                tracks: vec![VideoTrack::new(label)],
                frames,
                cursor: AtomicUsize::new(0),
            });
            Ok(stream)
        }
        .boxed()
    }
}

struct FrameDirectoryStream {
    tracks: Vec<VideoTrack>,
    frames: Vec<VideoFrame>,
    cursor: AtomicUsize,
}

impl MediaStream for FrameDirectoryStream {
    fn tracks(&self) -> &[VideoTrack] {
        &self.tracks
    }

    fn current_frame(&self) -> Result<VideoFrame, CaptureError> {
        if !self.is_live() || self.frames.is_empty() {
            return Err(CaptureError::StreamEnded);
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.frames.len();
        Ok(self.frames[idx].clone())
    }
}

fn load_frames(
    dir: &Path,
    constraints: &StreamConstraints,
) -> Result<Vec<VideoFrame>, MediaAccessError> {
    let entries = std::fs::read_dir(dir).map_err(|e| access_error(dir, e))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| has_frame_extension(path))
        .collect();
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for path in paths {
        match image::open(&path) {
            Ok(img) => frames.push(fit_within(img, constraints)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping undecodable frame");
            }
        }
    }

    if frames.is_empty() {
        return Err(MediaAccessError::NoDevice(format!(
            "no decodable frames in {}",
            dir.display()
        )));
    }
    Ok(frames)
}

fn has_frame_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            FRAME_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn fit_within(img: DynamicImage, constraints: &StreamConstraints) -> VideoFrame {
    if img.width() > constraints.ideal_width || img.height() > constraints.ideal_height {
        img.resize(
            constraints.ideal_width,
            constraints.ideal_height,
            FilterType::Triangle,
        )
        .to_rgb8()
    } else {
        img.to_rgb8()
    }
}

fn access_error(dir: &Path, err: io::Error) -> MediaAccessError {
    let details = format!("{}: {err}", dir.display());
    match err.kind() {
        io::ErrorKind::PermissionDenied => MediaAccessError::PermissionDenied(details),
        io::ErrorKind::NotFound => MediaAccessError::NoDevice(details),
        _ => MediaAccessError::Unavailable(details),
    }
}
