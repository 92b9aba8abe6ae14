use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{ACCEPT, CONTENT_TYPE},
    Client, StatusCode,
};
use shared::{
    error::GenerationError,
    protocol::{GenerateRequest, Picture},
};
use tracing::{debug, warn};

use crate::ImageGenerator;

/// HTTP client for the remote synthesis endpoint. One request per call, no retries.
#[derive(Clone)]
pub struct GenerationClient {
    http: Client,
    endpoint: String,
}

impl GenerationClient {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, GenerationError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| GenerationError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<Picture, GenerationError> {
        debug!(
            endpoint = %self.endpoint,
            width = request.width,
            height = request.height,
            seed = request.seed,
            "generation: sending request"
        );
        let response = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| GenerationError::Network(format!("failed to read response body: {e}")))?;

        let result = classify_response(status, content_type.as_deref(), &body);
        if let Err(err) = &result {
            warn!(status = status.as_u16(), error = %err, "generation: no picture in response");
        }
        result
    }
}

#[async_trait]
impl ImageGenerator for GenerationClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<Picture, GenerationError> {
        GenerationClient::generate(self, request).await
    }
}

/// Maps a response to a picture using its declared content kind.
pub(crate) fn classify_response(
    status: StatusCode,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<Picture, GenerationError> {
    let mime = content_type.map(|raw| {
        raw.split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    });

    match mime.as_deref() {
        Some(kind) if kind.starts_with("image/") && status.is_success() => {
            if body.is_empty() {
                return Err(GenerationError::Network(
                    "generator sent an empty picture body".to_string(),
                ));
            }
            Ok(Picture::from_bytes(kind, body))
        }
        Some("application/json") => {
            let value = serde_json::from_slice(body).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(body).into_owned())
            });
            Err(GenerationError::UnexpectedPayload(value))
        }
        _ if !status.is_success() => Err(GenerationError::Network(format!(
            "generator responded with status {status}"
        ))),
        _ => Err(GenerationError::UnexpectedContentType(
            content_type.map(str::to_string),
        )),
    }
}
