use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::DataUrlError;

/// JSON body posted to the generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub num_inference_steps: u32,
    pub seed: u32,
}

/// A fully received picture, already encoded as a self-contained `src`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    pub src: String,
    pub mime_type: String,
    pub size_bytes: usize,
}

impl Picture {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        let mime_type = mime_type.into();
        Self {
            src: encode_data_url(&mime_type, bytes),
            mime_type,
            size_bytes: bytes.len(),
        }
    }
}

pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

/// Splits a `data:<mime>;base64,<payload>` url into its mime type and raw bytes.
pub fn decode_data_url(src: &str) -> Result<(String, Vec<u8>), DataUrlError> {
    let rest = src.strip_prefix("data:").ok_or(DataUrlError::MissingScheme)?;
    let (header, payload) = rest.split_once(',').ok_or(DataUrlError::MissingScheme)?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or(DataUrlError::NotBase64)?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| DataUrlError::InvalidPayload(e.to_string()))?;
    Ok((mime_type.to_string(), bytes))
}
