//! Runtime settings, read from the environment (optionally via `.env`).

use std::time::Duration;

use anyhow::{Context, Result};

use crate::models::AiService;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_PRIMARY_MODEL: &str = "gemini-3-pro-image-preview";
pub const DEFAULT_FALLBACK_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_BUCKET: &str = "generated-images";

#[derive(Debug, Clone)]
pub struct Settings {
    pub banana_pro_api_key: Option<String>,
    pub banana_pro_model: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub api_base: String,
    pub default_ai_service: AiService,
    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,
    pub storage_bucket: String,
    pub fetch_timeout: Duration,
    pub provider_timeout: Duration,
    pub generation_timeout: Option<Duration>,
    pub host: String,
    pub port: u16,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let secs = |key: &str, default: u64| -> Result<Duration> {
            match get(key) {
                Some(v) => v
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("{key} must be a whole number of seconds, got {v:?}")),
                None => Ok(Duration::from_secs(default)),
            }
        };

        let default_ai_service = match get("DEFAULT_AI_SERVICE") {
            Some(v) => v
                .parse::<AiService>()
                .map_err(anyhow::Error::msg)
                .context("DEFAULT_AI_SERVICE")?,
            None => AiService::BananaPro,
        };

        let generation_timeout = match get("GENERATION_TIMEOUT_SECS") {
            Some(_) => Some(secs("GENERATION_TIMEOUT_SECS", 0)?),
            None => None,
        };

        let port = match get("PORT") {
            Some(v) => v.parse::<u16>().with_context(|| format!("PORT must be a port number, got {v:?}"))?,
            None => 8080,
        };

        Ok(Self {
            banana_pro_api_key: get("BANANA_PRO_API_KEY"),
            banana_pro_model: get("BANANA_PRO_MODEL").unwrap_or_else(|| DEFAULT_PRIMARY_MODEL.into()),
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_FALLBACK_MODEL.into()),
            api_base: get("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.into()),
            default_ai_service,
            supabase_url: get("SUPABASE_URL"),
            supabase_service_key: get("SUPABASE_SERVICE_KEY"),
            storage_bucket: get("STORAGE_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.into()),
            fetch_timeout: secs("FETCH_TIMEOUT_SECS", 30)?,
            provider_timeout: secs("PROVIDER_TIMEOUT_SECS", 120)?,
            generation_timeout,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
        })
    }
}
