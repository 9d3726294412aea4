use std::env;
use std::time::Duration;

use anyhow::{bail, Result};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_VIDEO_MODEL: &str = "veo-2.0-generate-001";

/// Settings for the remote generative service.
///
/// Built once at start-up and handed to the backend; construction fails when
/// no API credential is available.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_key: String,
    pub api_base: String,
    pub image_model: String,
    pub video_model: String,
    pub request_timeout: Duration,
    pub transport_retries: usize,
    pub retry_backoff: Duration,
}

impl EngineConfig {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            bail!("API key must not be empty");
        }
        Ok(Self {
            api_key,
            api_base: DEFAULT_API_BASE.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            video_model: DEFAULT_VIDEO_MODEL.to_string(),
            request_timeout: Duration::from_secs(90),
            transport_retries: 2,
            retry_backoff: Duration::from_millis(1200),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads configuration through `lookup` so tests can avoid the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let Some(api_key) = value("GEMINI_API_KEY")
            .or_else(|| value("GOOGLE_API_KEY"))
            .or_else(|| value("API_KEY"))
        else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY or API_KEY not set");
        };

        let mut config = Self::new(api_key)?;
        if let Some(base) = value("GEMINI_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = value("TRYON_IMAGE_MODEL") {
            config.image_model = model;
        }
        if let Some(model) = value("TRYON_VIDEO_MODEL") {
            config.video_model = model;
        }
        config.request_timeout = Duration::from_secs_f64(parse_clamped(
            value("TRYON_REQUEST_TIMEOUT").as_deref(),
            90.0,
            15.0,
            300.0,
        ));
        config.transport_retries = parse_clamped(
            value("TRYON_TRANSPORT_RETRIES").as_deref(),
            2.0,
            0.0,
            4.0,
        )
        .round() as usize;
        Ok(config)
    }
}

fn parse_clamped(raw: Option<&str>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}
