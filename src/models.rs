use serde::{Serialize, Deserialize};
use serde_with::{serde_as, DefaultOnNull};
use chrono::{DateTime, Utc};
use uuid::Uuid;
use bytes::Bytes;

pub const MAX_CUSTOMER_PHOTOS: usize = 3;
pub const MAX_PRODUCT_IMAGES: usize = 10;
pub const MAX_SCENARIOS: usize = 3;

/// Which generative backend handled (or should handle) a request.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AiService {
    BananaPro,
    Gemini,
}

impl AiService {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiService::BananaPro => "banana_pro",
            AiService::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for AiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AiService {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "banana_pro" | "banana-pro" => Ok(AiService::BananaPro),
            "gemini" => Ok(AiService::Gemini),
            other => Err(format!("unsupported AI service: {other}")),
        }
    }
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GenerationRequest {
    #[serde_as(as = "Vec<DefaultOnNull>")]
    #[serde(default)]
    pub customer_photo_urls: Vec<String>,
    #[serde_as(as = "Vec<DefaultOnNull>")]
    #[serde(default)]
    pub product_image_urls: Vec<String>,
    #[serde(default)]
    pub product_names: Option<Vec<String>>, // parallel to product_image_urls
    #[serde(default)]
    pub product_categories: Option<Vec<String>>,
    #[serde(default)]
    pub product_styles: Option<Vec<String>>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioDescriptor>,
    #[serde(default)]
    pub prompt_override: Option<String>,
    #[serde(default)]
    pub ai_service: Option<AiService>,
    #[serde(default)]
    pub source_photo_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ScenarioDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preset: Option<String>, // e.g. "spiaggia", "city"
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub lighting: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub custom_text: Option<String>,
}

impl ScenarioDescriptor {
    /// Short human-readable label used in records and error messages.
    pub fn label(&self) -> Option<String> {
        [&self.name, &self.description, &self.preset]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageRole {
    Customer,
    Product,
}

impl ImageRole {
    pub fn max_count(&self) -> usize {
        match self {
            ImageRole::Customer => MAX_CUSTOMER_PHOTOS,
            ImageRole::Product => MAX_PRODUCT_IMAGES,
        }
    }
}

impl std::fmt::Display for ImageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageRole::Customer => f.write_str("customer photo"),
            ImageRole::Product => f.write_str("product image"),
        }
    }
}

/// A downloaded image plus its placeholder position (`{image<index>}`).
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub role: ImageRole,
    pub index: usize,
    /// 0-based position of the URL in the request list it came from. Survives cleaning,
    /// so parallel lists like `product_names` stay aligned with the right image.
    pub position: usize,
    pub source_url: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl FetchedImage {
    pub fn placeholder(&self) -> String {
        format!("{{image{}}}", self.index)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Transport,
    MalformedResponse,
    NoImage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderStatus {
    Completed { image: Bytes, mime_type: String },
    /// No credential configured for the provider.
    Placeholder,
    Error(ProviderFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResult {
    pub ai_service: AiService,
    pub status: ProviderStatus,
}

impl ProviderResult {
    pub fn placeholder(ai_service: AiService) -> Self {
        Self { ai_service, status: ProviderStatus::Placeholder }
    }

    pub fn error(ai_service: AiService, kind: ProviderErrorKind, message: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            ai_service,
            status: ProviderStatus::Error(ProviderFailure { kind, message: message.into(), detail }),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.status, ProviderStatus::Placeholder)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GeneratedImageRecord {
    pub id: Uuid,
    pub source_photo_id: Option<Uuid>,
    pub image_url: String,
    pub prompt_used: String,
    pub scenario_description: Option<String>,
    pub ai_service: AiService,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GenerationOutcome {
    pub images: Vec<GeneratedImageRecord>,
    pub errors: Vec<String>,
}
