use crate::analysis::{interpret_response, AnalysisError, AnalysisService, Roast, FRAME_FIELD};
use crate::capture::EncodedFrame;
use crate::config::Endpoint;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ServiceHealth {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl ServiceHealth {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Clone)]
pub struct HttpAnalysisService {
    client: Client,
    endpoint: Endpoint,
}

impl HttpAnalysisService {
    /// Without a timeout a request may stay outstanding indefinitely; the
    /// session absorbs ticks until it completes.
    pub fn new(endpoint: Endpoint, request_timeout: Option<Duration>) -> Result<Self, AnalysisError> {
        let mut builder = Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// `GET /` on the service origin.
    pub async fn probe(&self) -> Result<ServiceHealth, AnalysisError> {
        let url = self.endpoint.origin_root();
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AnalysisError::Malformed(format!(
                "health check answered HTTP {}",
                response.status()
            )));
        }
        let health = response.json::<ServiceHealth>().await?;
        tracing::debug!(status = %health.status, "analysis service health");
        Ok(health)
    }
}

impl AnalysisService for HttpAnalysisService {
    fn analyze(&self, frame: EncodedFrame) -> BoxFuture<'_, Result<Roast, AnalysisError>> {
        async move {
            let part = Part::bytes(frame.bytes.to_vec())
                .file_name(format!("{FRAME_FIELD}.{}", frame.format.extension()))
                .mime_str(frame.format.mime())?;
            let form = Form::new().part(FRAME_FIELD, part);

            tracing::debug!(
                endpoint = %self.endpoint.url(),
                bytes = frame.bytes.len(),
                width = frame.width,
                height = frame.height,
                "submitting frame for analysis"
            );

            let response = self
                .client
                .post(self.endpoint.url().clone())
                .multipart(form)
                .send()
                .await?;

            let status = response.status();
            let body = response.bytes().await?;
            tracing::debug!(status = status.as_u16(), bytes = body.len(), "analysis response received");

            interpret_response(&body)
        }
        .boxed()
    }
}
