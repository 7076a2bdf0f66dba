//! Wire types for the annotation API.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// How the image reaches the service.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// Service fetches the image itself.
    Url(String),
    /// Raw bytes uploaded directly (base64 on the wire). The fallback when
    /// URL fetches are blocked by network policy.
    Raw(Vec<u8>),
}

/// Per-submission options, mirrored from the service's `POST /images` body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitOptions {
    /// Overwrite existing alt text on the service side.
    #[serde(default)]
    pub overwrite: bool,
    /// Use the e-commerce model variant.
    #[serde(default)]
    pub ecomm: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub negative_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpt_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

/// `image` object inside the request body.
#[derive(Debug, Serialize)]
pub struct ImageBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl From<&ImageSource> for ImageBody {
    fn from(source: &ImageSource) -> Self {
        match source {
            ImageSource::Url(url) => Self {
                url: Some(url.clone()),
                raw: None,
            },
            ImageSource::Raw(bytes) => Self {
                url: None,
                raw: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            },
        }
    }
}

/// Full request body for `POST /images`.
#[derive(Debug, Serialize)]
pub struct SubmitBody {
    pub image: ImageBody,
    #[serde(flatten)]
    pub options: SubmitOptions,
}

/// Successful annotation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Annotation {
    /// Generated descriptive text.
    pub alt_text: String,
    /// Stable external asset identifier, persisted for idempotent
    /// reconciliation and re-import.
    pub asset_id: String,
}

/// Error body on 422 responses.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub errors: Vec<String>,
}

/// `GET /account` response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountInfo {
    pub usage: u64,
    pub usage_limit: u64,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub whitelabel: bool,
}

impl AccountInfo {
    pub fn remaining(&self) -> u64 {
        self.usage_limit.saturating_sub(self.usage)
    }
}
