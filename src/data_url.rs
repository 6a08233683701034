//! `data:` URL encoding for embedding image payloads in exported boards.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use thiserror::Error;

use crate::assets::DEFAULT_MIME_TYPE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataUrlError {
    #[error("not a data URL")]
    NotDataUrl,
    #[error("data URL has no payload separator")]
    MissingPayload,
    #[error("invalid base64 payload: {0}")]
    Base64(String),
}

/// Encode a payload as a base64 `data:` URL
pub fn encode(mime_type: &str, payload: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(payload))
}

/// Decode a `data:` URL into its MIME type and payload.
/// Non-base64 payloads are percent-decoded.
pub fn decode(url: &str) -> Result<(String, Bytes), DataUrlError> {
    let rest = url
        .trim()
        .strip_prefix("data:")
        .ok_or(DataUrlError::NotDataUrl)?;
    let (meta, data) = rest.split_once(',').ok_or(DataUrlError::MissingPayload)?;

    let mut params = meta.split(';');
    let mime_type = params
        .next()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string();
    let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    let payload = if is_base64 {
        let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        STANDARD
            .decode(compact)
            .map_err(|e| DataUrlError::Base64(e.to_string()))?
    } else {
        urlencoding::decode_binary(data.as_bytes()).into_owned()
    };

    Ok((mime_type, Bytes::from(payload)))
}
