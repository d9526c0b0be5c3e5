//! Image references as stored on a job: either a remote URL or an inline
//! `data:<mime>;base64,<payload>` URL.

use base64::Engine;
use reqwest::Client;

const DEFAULT_FETCH_MIME: &str = "image/jpeg";

/// Decoded image bytes plus their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageData {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Build from raw bytes, sniffing the format. Fails on anything `image` can't recognise.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ImageRefError> {
        let mime_type = sniff_mime(&bytes).ok_or(ImageRefError::UnknownFormat)?;
        Ok(Self::new(bytes, mime_type))
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// File extension matching the MIME type, for storage keys.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "jpg",
        }
    }
}

/// MIME type of an encoded image, if recognised.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes).ok().map(|f| f.to_mime_type())
}

pub fn is_data_url(reference: &str) -> bool {
    reference.starts_with("data:")
}

/// Decode `data:<mime>;base64,<payload>`.
pub fn parse_data_url(reference: &str) -> Result<ImageData, ImageRefError> {
    let rest = reference
        .strip_prefix("data:")
        .ok_or(ImageRefError::InvalidDataUrl)?;
    let (mime_type, payload) = rest
        .split_once(";base64,")
        .ok_or(ImageRefError::InvalidDataUrl)?;
    let mime_type = if mime_type.is_empty() {
        DEFAULT_FETCH_MIME
    } else {
        mime_type
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(ImageRefError::Base64)?;
    Ok(ImageData::new(bytes, mime_type))
}

/// Turns job image references into bytes for the generation call.
#[derive(Clone)]
pub struct ImageResolver {
    http: Client,
}

impl Default for ImageResolver {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl ImageResolver {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Decode a data URL in place, or download a remote one.
    pub async fn resolve(&self, reference: &str) -> Result<ImageData, ImageRefError> {
        if is_data_url(reference) {
            return parse_data_url(reference);
        }

        let response = self.http.get(reference).send().await?;
        if !response.status().is_success() {
            return Err(ImageRefError::Fetch {
                url: reference.to_string(),
                status: response.status().as_u16(),
            });
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_FETCH_MIME.to_string());
        let bytes = response.bytes().await?.to_vec();
        Ok(ImageData::new(bytes, mime_type))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageRefError {
    #[error("Invalid data URL format")]
    InvalidDataUrl,

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Failed to fetch image from {url}: HTTP {status}")]
    Fetch { url: String, status: u16 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unrecognised image format")]
    UnknownFormat,
}
