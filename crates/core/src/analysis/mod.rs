//! The remote analysis service: one multipart upload per cycle, one JSON
//! verdict back.

mod canned;
mod http;

use crate::capture::EncodedFrame;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use canned::CannedAnalysisService;
pub use http::{HttpAnalysisService, ServiceHealth};

/// Multipart field carrying the snapshot.
pub const FRAME_FIELD: &str = "frame";

/// A usable verdict from the service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Roast {
    pub text: String,
    pub emotion: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum AnalysisError {
    /// The service answered, flagged an error, and gave nothing to present.
    #[error("analysis service reported an error: {}", .message.as_deref().unwrap_or("unspecified"))]
    Service { message: Option<String> },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl AnalysisError {
    /// Transport and malformed responses are handled alike.
    pub fn is_transport(&self) -> bool {
        !matches!(self, AnalysisError::Service { .. })
    }
}

pub trait AnalysisService: Send + Sync {
    fn analyze(&self, frame: EncodedFrame) -> BoxFuture<'_, Result<Roast, AnalysisError>>;
}

/// `error` is a boolean flag in some deployments and a message in others.
#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Flag(bool),
    Message(String),
}

#[derive(Deserialize)]
struct AnalysisResponse {
    #[serde(default)]
    roast: Option<String>,
    #[serde(default)]
    emotion: Option<String>,
    #[serde(default)]
    error: Option<ErrorField>,
}

/// Turns a response body into a verdict. The HTTP status is not consulted:
/// the service sends presentable roasts with 4xx/5xx codes too.
pub fn interpret_response(body: &[u8]) -> Result<Roast, AnalysisError> {
    let response: AnalysisResponse = serde_json::from_slice(body)
        .map_err(|e| AnalysisError::Malformed(e.to_string()))?;

    if let Some(text) = response.roast.filter(|t| !t.is_empty()) {
        return Ok(Roast {
            text,
            emotion: response.emotion.filter(|e| !e.is_empty()),
        });
    }

    match response.error {
        Some(ErrorField::Flag(true)) => Err(AnalysisError::Service { message: None }),
        Some(ErrorField::Message(message)) if !message.is_empty() => Err(AnalysisError::Service {
            message: Some(message),
        }),
        _ => Err(AnalysisError::Malformed(
            "response carries neither a roast nor an error".to_owned(),
        )),
    }
}
