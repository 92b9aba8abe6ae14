use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported aspect ratio '{0}' (expected one of 1:1, 4:3, 3:4, 16:9, 9:16)")]
pub struct AspectParseError(pub String);

/// Failures of the local image store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("image store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read images: {0}")]
    Read(String),
    #[error("failed to write image: {0}")]
    Write(String),
}

/// Failures of a single call to the remote generation endpoint.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Network(String),
    #[error("unexpected content type from generator: {}", .0.as_deref().unwrap_or("<missing>"))]
    UnexpectedContentType(Option<String>),
    #[error("generator returned structured data instead of a picture: {0}")]
    UnexpectedPayload(serde_json::Value),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataUrlError {
    #[error("not a data url")]
    MissingScheme,
    #[error("data url is not base64 encoded")]
    NotBase64,
    #[error("invalid base64 payload: {0}")]
    InvalidPayload(String),
}
