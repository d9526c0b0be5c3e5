use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::services::image_ref::ImageData;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Instruction sent with every try-out: image 1 is the person, image 2 the garment.
pub const TRYOUT_PROMPT: &str = concat!(
    "Use Image 1 as the primary identity reference and Image 2 as the clothing reference.\n\n",
    "Generate a photorealistic image of the person from Image 1 wearing the exact garment shown in Image 2.\n\n",
    "Face and identity lock (highest priority):\n",
    "The face must be identical to Image 1. Preserve facial features, bone structure, face shape, ",
    "jawline, eyes, nose, lips, skin tone, and hairstyle exactly as in Image 1. Keep realistic skin ",
    "texture. No smoothing, beautifying, reshaping, or facial hallucination. The person must be ",
    "instantly recognizable as the same individual.\n\n",
    "Clothing accuracy:\n",
    "Apply the garment from Image 2 exactly as shown. Preserve fabric, color, pattern, cut, seams, ",
    "fit, neckline, sleeves, length, folds, and texture, with natural draping and shadows. The ",
    "outfit must be clearly visible and not cropped.\n\n",
    "Body and proportions:\n",
    "Keep natural, anatomically correct proportions for the person in Image 1. No reshaping.\n\n",
    "Lighting and realism:\n",
    "Use consistent lighting across face and clothing so the garment blends naturally.\n\n",
    "Restrictions:\n",
    "Do not change hairstyle, expression, age, gender, ethnicity, or skin tone. Do not modify the ",
    "garment design. Do not add accessories that are not in Image 1 or Image 2.\n\n",
    "Image 1 is the person photo, Image 2 is the clothing photo."
);

/// Turns a person photo and a garment image into a try-out composite.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        person: &ImageData,
        garment: &ImageData,
    ) -> Result<ImageData, GenerationError>;
}

/// Client for the Gemini `generateContent` image model.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: &'a str },
    Inline { inline_data: RequestInlineData<'a> },
}

#[derive(Serialize)]
struct RequestInlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(alias = "inlineData")]
    inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Deserialize)]
struct ResponseInlineData {
    #[serde(alias = "mimeType")]
    mime_type: Option<String>,
    data: Option<String>,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different API host (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    async fn generate(
        &self,
        person: &ImageData,
        garment: &ImageData,
    ) -> Result<ImageData, GenerationError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let request_body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    RequestPart::Text {
                        text: TRYOUT_PROMPT,
                    },
                    RequestPart::Inline {
                        inline_data: RequestInlineData {
                            mime_type: &person.mime_type,
                            data: person.to_base64(),
                        },
                    },
                    RequestPart::Inline {
                        inline_data: RequestInlineData {
                            mime_type: &garment.mime_type,
                            data: garment.to_base64(),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE"],
            },
        };

        tracing::debug!(
            model = %self.model,
            person_bytes = person.bytes.len(),
            garment_bytes = garment.bytes.len(),
            "Calling image generation model"
        );

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request_body)
            .send()
            .await
            .map_err(|e| GenerationError::Upstream {
                status: None,
                body: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| GenerationError::Upstream {
            status: Some(status.as_u16()),
            body: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(GenerationError::Upstream {
                status: Some(status.as_u16()),
                body,
            });
        }

        parse_generation_response(&body)
    }
}

/// Map a `generateContent` response body to the generated image.
///
/// Takes the first part carrying inline data, preferring `image/*` parts.
pub fn parse_generation_response(body: &str) -> Result<ImageData, GenerationError> {
    let response: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::Malformed(format!("invalid JSON: {e}")))?;

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::Malformed("no candidate in response".to_string()))?;

    let finish_reason = candidate.finish_reason;
    let parts = candidate
        .content
        .and_then(|c| c.parts)
        .ok_or_else(|| GenerationError::Malformed("no content in candidate".to_string()))?;

    let with_data = |part: &&ResponsePart| {
        part.inline_data
            .as_ref()
            .is_some_and(|d| d.data.as_deref().is_some_and(|data| !data.is_empty()))
    };
    let is_image = |part: &&ResponsePart| {
        part.inline_data
            .as_ref()
            .and_then(|d| d.mime_type.as_deref())
            .is_some_and(|m| m.starts_with("image/"))
    };

    let image_part = parts
        .iter()
        .filter(with_data)
        .find(is_image)
        .or_else(|| parts.iter().find(with_data));

    if let Some(inline) = image_part.and_then(|p| p.inline_data.as_ref()) {
        let data = inline.data.as_deref().unwrap_or_default();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| GenerationError::Malformed(format!("invalid image payload: {e}")))?;
        let mime_type = inline
            .mime_type
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "image/png".to_string());
        return Ok(ImageData::new(bytes, mime_type));
    }

    let text: Vec<&str> = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .filter(|t| !t.trim().is_empty())
        .collect();
    if !text.is_empty() {
        return Err(GenerationError::TextOnly(text.join("\n")));
    }

    Err(GenerationError::NoImage { finish_reason })
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Image model request failed (status {status:?}): {body}")]
    Upstream { status: Option<u16>, body: String },

    #[error("Invalid response structure: {0}")]
    Malformed(String),

    #[error("Model returned text instead of image: {0}")]
    TextOnly(String),

    #[error("No image data found in response (finish reason: {finish_reason:?})")]
    NoImage { finish_reason: Option<String> },
}

impl GenerationError {
    /// Model-provided explanation, when there is one.
    pub fn text(&self) -> Option<&str> {
        match self {
            GenerationError::TextOnly(text) => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_part_snake_case() {
        let body = r#"{"candidates":[{"content":{"parts":[
            {"inline_data":{"mime_type":"image/png","data":"aGVsbG8="}}
        ]},"finishReason":"STOP"}]}"#;
        let image = parse_generation_response(body).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes, b"hello");
    }

    #[test]
    fn test_image_part_camel_case_after_text() {
        let body = r#"{"candidates":[{"content":{"parts":[
            {"text":"Here is your image"},
            {"inlineData":{"mimeType":"image/jpeg","data":"aGk="}}
        ]}}]}"#;
        let image = parse_generation_response(body).unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
        assert_eq!(image.bytes, b"hi");
    }

    #[test]
    fn test_missing_mime_defaults_to_png() {
        let body = r#"{"candidates":[{"content":{"parts":[{"inline_data":{"data":"aGk="}}]}}]}"#;
        assert_eq!(parse_generation_response(body).unwrap().mime_type, "image/png");
    }

    #[test]
    fn test_text_only_is_reported() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"I cannot do that"}]}}]}"#;
        let err = parse_generation_response(body).unwrap_err();
        assert_eq!(err.text(), Some("I cannot do that"));
        assert!(err.to_string().contains("I cannot do that"));
    }

    #[test]
    fn test_no_candidates_is_malformed() {
        let err = parse_generation_response(r#"{"candidates":[]}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
        let err = parse_generation_response(r#"{}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[test]
    fn test_candidate_without_content_is_malformed() {
        let body = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        assert!(matches!(
            parse_generation_response(body),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_parts_is_no_image() {
        let body = r#"{"candidates":[{"content":{"parts":[]},"finishReason":"IMAGE_SAFETY"}]}"#;
        match parse_generation_response(body) {
            Err(GenerationError::NoImage { finish_reason }) => {
                assert_eq!(finish_reason.as_deref(), Some("IMAGE_SAFETY"))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_request_shape() {
        let person = ImageData::new(b"p".to_vec(), "image/jpeg");
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    RequestPart::Text { text: "prompt" },
                    RequestPart::Inline {
                        inline_data: RequestInlineData {
                            mime_type: &person.mime_type,
                            data: person.to_base64(),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE"],
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "prompt");
        assert_eq!(
            json["contents"][0]["parts"][1]["inline_data"]["mime_type"],
            "image/jpeg"
        );
        assert_eq!(json["generationConfig"]["responseModalities"][0], "IMAGE");
    }
}
