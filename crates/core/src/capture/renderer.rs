use crate::capture::{
    CaptureError, EncodedFrame, FrameEncoding, FrameRenderer, ImageFormat, VideoFrame,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

/// Encodes frames with the `image` codecs on the blocking pool.
#[derive(Clone, Debug, Default)]
pub struct ImageFrameRenderer;

impl ImageFrameRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl FrameRenderer for ImageFrameRenderer {
    fn render(
        &self,
        frame: VideoFrame,
        encoding: FrameEncoding,
    ) -> BoxFuture<'_, Result<EncodedFrame, CaptureError>> {
        async move {
            tokio::task::spawn_blocking(move || encode_frame(&frame, encoding))
                .await
                .map_err(|e| CaptureError::RenderTask(e.to_string()))?
        }
        .boxed()
    }
}

pub fn encode_frame(frame: &VideoFrame, encoding: FrameEncoding) -> Result<EncodedFrame, CaptureError> {
    let (width, height) = frame.dimensions();
    let mut buf = Vec::new();
    match encoding.format {
        ImageFormat::Jpeg => {
            JpegEncoder::new_with_quality(&mut buf, encoding.quality_percent()).encode_image(frame)
        }
        ImageFormat::Png => {
            PngEncoder::new(&mut buf).write_image(frame.as_raw(), width, height, ExtendedColorType::Rgb8)
        }
    }
    .map_err(|e| CaptureError::Encode(e.to_string()))?;

    tracing::trace!(
        format = encoding.format.mime(),
        width,
        height,
        bytes = buf.len(),
        "frame encoded"
    );

    Ok(EncodedFrame {
        bytes: Bytes::from(buf),
        format: encoding.format,
        width,
        height,
    })
}
