//! Photos of dishes, generated by Gemini (Imagen) or Replicate and cached on disk.

use anyhow::Error;
use async_trait::async_trait;
use clap::{builder::BoolishValueParser, ArgAction, Args};
use serde::Serialize;
use std::path::PathBuf;
use strum::{Display, EnumString};

pub mod cache;
pub mod gemini;
pub mod prompt;
pub mod replicate;
mod service;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use cache::{CacheStats, CleanupReport, ImageCache};
pub use service::{ImageService, ImageStats};

/// The dish to illustrate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DishImage {
    pub dish_name: String,
    pub recipe_text: Option<String>,
    /// A short visual description of the dish, when one is known.
    pub visual: Option<String>,
}

impl DishImage {
    pub fn new(dish_name: impl Into<String>) -> Self {
        Self {
            dish_name: dish_name.into(),
            ..Default::default()
        }
    }

    pub fn with_recipe(mut self, recipe_text: impl Into<String>) -> Self {
        self.recipe_text = Some(recipe_text.into());
        self
    }

    pub fn with_visual(mut self, visual: impl Into<String>) -> Self {
        self.visual = Some(visual.into());
        self
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gemini,
    Replicate,
}

/// A service which turns a dish into a photo.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Generate a photo, returning the encoded image exactly as the provider produced it.
    async fn generate(&self, dish: &DishImage) -> Result<Vec<u8>, Error>;

    /// Check that the provider is reachable with the configured credentials.
    async fn test_connection(&self) -> bool;
}

#[async_trait]
impl<P: ImageProvider + ?Sized> ImageProvider for std::sync::Arc<P> {
    fn provider(&self) -> Provider {
        (**self).provider()
    }

    async fn generate(&self, dish: &DishImage) -> Result<Vec<u8>, Error> {
        (**self).generate(dish).await
    }

    async fn test_connection(&self) -> bool {
        (**self).test_connection().await
    }
}

/// The order in which providers are tried.
#[derive(Clone, Copy, Debug, Default, Display, EnumString, PartialEq, Eq, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Gemini, then Replicate if the fallback is enabled.
    #[default]
    GeminiFirst,
    ReplicateFirst,
    GeminiOnly,
    ReplicateOnly,
}

impl Priority {
    /// The providers to try, in order.
    pub fn order(&self, replicate_fallback: bool) -> Vec<Provider> {
        match self {
            Self::GeminiFirst if replicate_fallback => vec![Provider::Gemini, Provider::Replicate],
            Self::GeminiFirst | Self::GeminiOnly => vec![Provider::Gemini],
            Self::ReplicateFirst => vec![Provider::Replicate, Provider::Gemini],
            Self::ReplicateOnly => vec![Provider::Replicate],
        }
    }
}

/// Image generation options.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// API key for Google's Generative Language API. Gemini is disabled without it.
    #[clap(long, env = "GEMINI_API_KEY")]
    pub gemini_api_key: Option<String>,

    /// Imagen model: imagen-3, imagen-3-fast or imagen-2.
    #[clap(long, env = "GEMINI_IMAGE_MODEL", default_value = "imagen-3-fast")]
    pub gemini_model: gemini::Model,

    /// API token for Replicate. Replicate is disabled without it.
    #[clap(long, env = "REPLICATE_API_KEY")]
    pub replicate_api_key: Option<String>,

    /// Replicate model: flux-1.1-pro, flux-kontext-pro, sdxl or realvisxl.
    #[clap(long, env = "REPLICATE_IMAGE_MODEL", default_value = "flux-1.1-pro")]
    pub replicate_model: replicate::Model,

    #[clap(long, env = "IMAGE_PROVIDER_PRIORITY", default_value = "gemini_first")]
    pub image_provider_priority: Priority,

    /// Gemini generations allowed per UTC day.
    #[clap(long, env = "GEMINI_DAILY_LIMIT", default_value = "50")]
    pub gemini_daily_limit: u32,

    /// With `gemini_first`, fall back to Replicate when Gemini fails.
    #[clap(
        long,
        env = "REPLICATE_FALLBACK_ENABLED",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub replicate_fallback_enabled: bool,

    #[clap(
        long,
        env = "ENABLE_IMAGE_CACHE",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub enable_image_cache: bool,

    #[clap(long, env = "IMAGE_CACHE_DIR", default_value = "image_cache")]
    pub image_cache_dir: PathBuf,

    #[clap(long, env = "MAX_CACHE_SIZE_MB", default_value = "1000")]
    pub max_cache_size_mb: u64,

    /// Cached images older than this are discarded.
    #[clap(long, env = "CACHE_TTL_DAYS", default_value = "30")]
    pub cache_ttl_days: i64,

    #[clap(long, env = "CACHE_CLEANUP_INTERVAL_HOURS", default_value = "24")]
    pub cache_cleanup_interval_hours: i64,

    #[clap(
        long,
        env = "IMAGE_CACHE_CLEANUP_ENABLED",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub image_cache_cleanup_enabled: bool,

    /// JPEG quality requested from Replicate.
    #[clap(long, env = "IMAGE_QUALITY", default_value = "85")]
    pub image_quality: u8,

    /// Generated images larger than this are rejected.
    #[clap(long, env = "MAX_IMAGE_SIZE_MB", default_value = "5")]
    pub max_image_size_mb: u64,

    /// Output format requested from Replicate.
    #[clap(long, env = "DEFAULT_IMAGE_FORMAT", default_value = "JPEG")]
    pub default_image_format: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_model: Default::default(),
            replicate_api_key: None,
            replicate_model: Default::default(),
            image_provider_priority: Priority::GeminiFirst,
            gemini_daily_limit: 50,
            replicate_fallback_enabled: true,
            enable_image_cache: true,
            image_cache_dir: "image_cache".into(),
            max_cache_size_mb: 1000,
            cache_ttl_days: 30,
            cache_cleanup_interval_hours: 24,
            image_cache_cleanup_enabled: true,
            image_quality: 85,
            max_image_size_mb: 5,
            default_image_format: "JPEG".into(),
        }
    }
}

impl Options {
    /// Build the image service from the providers which have credentials.
    pub async fn connect(&self) -> Result<ImageService, Error> {
        let mut providers: Vec<Box<dyn ImageProvider>> = vec![];
        match &self.gemini_api_key {
            Some(key) => providers.push(Box::new(gemini::Client::new(key, self.gemini_model)?)),
            None => tracing::warn!("GEMINI_API_KEY is not set; Gemini image generation disabled"),
        }
        match &self.replicate_api_key {
            Some(key) => providers.push(Box::new(replicate::Client::new(
                key,
                self.replicate_model,
                self,
            )?)),
            None => {
                tracing::warn!("REPLICATE_API_KEY is not set; Replicate image generation disabled")
            }
        }
        let cache = ImageCache::open(cache::Config::from(self)).await?;
        Ok(ImageService::new(self, providers, cache))
    }

    /// The largest acceptable image, in bytes.
    pub fn max_image_bytes(&self) -> u64 {
        self.max_image_size_mb * 1024 * 1024
    }
}
