//! Optional image captioning via a hosted inference endpoint.
//!
//! Stateless: the image bytes or URL go up, a caption string comes
//! back. Failures are reported to the caller, which logs and moves on;
//! a missing caption never fails a row.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("caption service returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("caption service returned no caption")]
    EmptyCaption,
}

/// The image handed to the provider.
pub enum CaptionInput {
    Url(String),
    Bytes {
        bytes: Vec<u8>,
        content_type: String,
    },
}

#[async_trait]
pub trait CaptionProvider: Send + Sync {
    async fn caption(&self, model: &str, input: CaptionInput) -> Result<String, Error>;
}

const MODEL_ENDPOINTS: &[(&str, &str)] = &[
    (
        "vit-gpt2",
        "https://api-inference.huggingface.co/models/nlpconnect/vit-gpt2-image-captioning",
    ),
    (
        "blip-image",
        "https://api-inference.huggingface.co/models/Salesforce/blip-image-captioning-base",
    ),
    (
        "git-large",
        "https://api-inference.huggingface.co/models/microsoft/git-large",
    ),
];

const DEFAULT_MODEL: &str = "vit-gpt2";

/// Resolve a model identifier to its endpoint, falling back to the
/// default model for unknown names.
pub fn model_endpoint(model: &str) -> &'static str {
    MODEL_ENDPOINTS
        .iter()
        .find(|(name, _)| *name == model)
        .or_else(|| {
            warn!(model, default = DEFAULT_MODEL, "unknown caption model, using default");
            MODEL_ENDPOINTS.iter().find(|(name, _)| *name == DEFAULT_MODEL)
        })
        .map(|(_, endpoint)| *endpoint)
        .expect("default model is always present in the endpoint table")
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    generated_text: String,
}

pub struct HostedCaptionProvider {
    http: reqwest::Client,
    token: String,
}

impl HostedCaptionProvider {
    pub fn new(token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
        }
    }
}

#[async_trait]
impl CaptionProvider for HostedCaptionProvider {
    async fn caption(&self, model: &str, input: CaptionInput) -> Result<String, Error> {
        let endpoint = model_endpoint(model);
        let request = self.http.post(endpoint).bearer_auth(&self.token);
        let request = match input {
            CaptionInput::Url(url) => request.json(&serde_json::json!({ "inputs": url })),
            CaptionInput::Bytes {
                bytes,
                content_type,
            } => request
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(bytes),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Service {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let results: Vec<GeneratedText> = response.json().await?;
        results
            .into_iter()
            .next()
            .map(|r| r.generated_text.trim().to_owned())
            .filter(|caption| !caption.is_empty())
            .ok_or(Error::EmptyCaption)
    }
}
