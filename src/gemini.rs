use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn, error, debug};

use crate::{
    config::Settings,
    gateway::ProviderAdapter,
    models::{AiService, FetchedImage, ProviderErrorKind, ProviderResult, ProviderStatus},
    prompt::InputLimit,
};

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let Value::String(s) = val {
                        if s.len() > 100 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=') {
                            *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn loggable(value: &Value) -> String {
    let mut copy = value.clone();
    truncate_base64_in_json(&mut copy);
    serde_json::to_string(&copy).unwrap_or_default()
}

/// A Gemini `generateContent` image model behind the uniform adapter contract.
pub struct GeminiAdapter {
    client: Client,
    service: AiService,
    api_key: Option<String>,
    model: String,
    base_url: String,
    input_limit: Option<InputLimit>,
}

impl GeminiAdapter {
    pub fn new(
        service: AiService,
        api_key: Option<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url: String = base_url.into();
        let adapter = Self {
            client,
            service,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            input_limit: None,
        };
        if adapter.api_key.is_none() {
            warn!("⚠️ No API key configured for {}, it will answer with placeholders", service);
        }
        Ok(adapter)
    }

    pub fn with_input_limit(mut self, limit: InputLimit) -> Self {
        self.input_limit = Some(limit);
        self
    }

    /// Multi-image composition model.
    pub fn primary(settings: &Settings) -> Result<Self, reqwest::Error> {
        Self::new(
            AiService::BananaPro,
            settings.banana_pro_api_key.clone(),
            settings.banana_pro_model.clone(),
            settings.api_base.clone(),
            settings.provider_timeout,
        )
    }

    /// Lower fidelity model: one customer photo and one garment.
    pub fn fallback(settings: &Settings) -> Result<Self, reqwest::Error> {
        Ok(Self::new(
            AiService::Gemini,
            settings.gemini_api_key.clone(),
            settings.gemini_model.clone(),
            settings.api_base.clone(),
            settings.provider_timeout,
        )?
        .with_input_limit(InputLimit { customers: 1, products: 1 }))
    }

    fn build_body(prompt: &str, images: &[FetchedImage]) -> Value {
        let mut parts = vec![json!({ "text": prompt })];
        parts.extend(images.iter().map(|img| {
            json!({
                "inlineData": {
                    "mimeType": img.mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(&img.data),
                }
            })
        }));

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "temperature": 0.4,
                "topP": 0.95,
                "topK": 64,
                "candidateCount": 1
            }
        })
    }

    async fn perform_api_call(&self, api_key: &str, body: &Value) -> ProviderResult {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        info!("🔗 Making {} request to: {}", self.service, url);
        debug!("📤 Request body: {}", loggable(body));

        let response = match self.client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("❌ {} request failed: {}", self.service, e);
                return ProviderResult::error(self.service, ProviderErrorKind::Transport, format!("request failed: {e}"), None);
            }
        };

        let status = response.status();
        info!("📥 Response status: {}", status);

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!("❌ API Error response: {}", error_body);
            return ProviderResult::error(
                self.service,
                ProviderErrorKind::Transport,
                format!("HTTP {}", status.as_u16()),
                Some(error_body).filter(|b| !b.is_empty()),
            );
        }

        let raw: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                return ProviderResult::error(self.service, ProviderErrorKind::MalformedResponse, format!("unreadable response: {e}"), None);
            }
        };
        info!("📥 Raw {} response: {}", self.service, loggable(&raw));

        let parsed: GeminiResponse = match serde_json::from_value(raw) {
            Ok(p) => p,
            Err(e) => {
                return ProviderResult::error(self.service, ProviderErrorKind::MalformedResponse, format!("parse error: {e}"), None);
            }
        };

        let (segments, decode_error) = parsed.segments();
        let mut result = fold_segments(self.service, segments);
        if let ProviderStatus::Error(failure) = &mut result.status {
            if let Some(e) = decode_error {
                failure.kind = ProviderErrorKind::MalformedResponse;
                failure.message = e;
            }
            if failure.detail.is_none() {
                failure.detail = parsed.diagnostics();
            }
            warn!("⚠️ No image data found in {} response: {:?}", self.service, failure.detail);
        }
        result
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn service(&self) -> AiService {
        self.service
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn input_limit(&self) -> Option<InputLimit> {
        self.input_limit
    }

    async fn generate(&self, images: &[FetchedImage], prompt: &str) -> ProviderResult {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!("⚠️ {} API key not configured, returning placeholder", self.service);
            return ProviderResult::placeholder(self.service);
        };

        info!("Generating image with {} ({} input images)...", self.service, images.len());
        let body = Self::build_body(prompt, images);
        let result = self.perform_api_call(api_key, &body).await;
        if let ProviderStatus::Completed { image, mime_type } = &result.status {
            info!("🖼️ Extracted {} image from {} response ({} bytes)", mime_type, self.service, image.len());
        }
        result
    }
}

/// One part of a multimodal response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseSegment {
    Text(String),
    Image { data: Bytes, mime_type: String },
    Unknown,
}

/// Folds response segments into a result: the first image wins, text is collected and
/// becomes the error detail if no image shows up.
pub fn fold_segments<I>(service: AiService, segments: I) -> ProviderResult
where
    I: IntoIterator<Item = ResponseSegment>,
{
    let mut texts = Vec::new();
    for segment in segments {
        match segment {
            ResponseSegment::Image { data, mime_type } => {
                return ProviderResult { ai_service: service, status: ProviderStatus::Completed { image: data, mime_type } };
            }
            ResponseSegment::Text(text) if !text.trim().is_empty() => texts.push(text),
            ResponseSegment::Text(_) | ResponseSegment::Unknown => {}
        }
    }
    let detail = (!texts.is_empty()).then(|| texts.join("\n"));
    ProviderResult::error(service, ProviderErrorKind::NoImage, "no image in response", detail)
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, alias = "prompt_feedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    #[serde(default, alias = "finish_reason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default, alias = "block_reason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData", alias = "inline_data")]
        inline_data: InlineData,
    },
    Text { text: String },
    Other(Value),
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType", alias = "mime_type", default)]
    mime_type: Option<String>,
}

impl GeminiResponse {
    /// Every part of every candidate, in order. Inline data that fails to decode becomes
    /// `Unknown`; the first decode error is returned alongside.
    fn segments(&self) -> (Vec<ResponseSegment>, Option<String>) {
        let mut segments = Vec::new();
        let mut decode_error = None;
        for part in self.candidates.iter().flat_map(|c| &c.content.parts) {
            let segment = match part {
                Part::Inline { inline_data } if inline_data.data.is_empty() => ResponseSegment::Unknown,
                Part::Inline { inline_data } => match base64::engine::general_purpose::STANDARD.decode(inline_data.data.as_bytes()) {
                    Ok(data) => ResponseSegment::Image {
                        data: Bytes::from(data),
                        mime_type: inline_data.mime_type.clone().unwrap_or_else(|| "image/png".into()),
                    },
                    Err(e) => {
                        warn!("⚠️ Skipping inline part with invalid base64: {}", e);
                        decode_error.get_or_insert_with(|| format!("invalid base64 image data: {e}"));
                        ResponseSegment::Unknown
                    }
                },
                Part::Text { text } => ResponseSegment::Text(text.clone()),
                Part::Other(_) => ResponseSegment::Unknown,
            };
            segments.push(segment);
        }
        (segments, decode_error)
    }

    /// Block and finish reasons, for responses that carry neither image nor text.
    fn diagnostics(&self) -> Option<String> {
        let mut reasons = Vec::new();
        if let Some(reason) = self.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_deref()) {
            reasons.push(format!("prompt blocked: {reason}"));
        }
        reasons.extend(
            self.candidates
                .iter()
                .filter_map(|c| c.finish_reason.as_deref())
                .filter(|r| *r != "STOP")
                .map(|r| format!("finish reason: {r}")),
        );
        if self.candidates.is_empty() && reasons.is_empty() {
            reasons.push("no candidates returned".into());
        }
        (!reasons.is_empty()).then(|| reasons.join(", "))
    }
}
