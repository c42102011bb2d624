use super::{
    CacheStats, CleanupReport, DishImage, ImageCache, ImageProvider, Options, Priority, Provider,
};
use crate::text::format_bytes;
use async_std::sync::Mutex;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct Counters {
    total_requests: u64,
    cache_hits: u64,
    gemini_success: u64,
    gemini_failures: u64,
    replicate_success: u64,
    replicate_failures: u64,
    gemini_daily_used: u32,
    last_reset_date: NaiveDate,
}

impl Counters {
    fn new() -> Self {
        Self {
            total_requests: 0,
            cache_hits: 0,
            gemini_success: 0,
            gemini_failures: 0,
            replicate_success: 0,
            replicate_failures: 0,
            gemini_daily_used: 0,
            last_reset_date: Utc::now().date_naive(),
        }
    }

    fn record(&mut self, provider: Provider, success: bool) {
        let counter = match (provider, success) {
            (Provider::Gemini, true) => &mut self.gemini_success,
            (Provider::Gemini, false) => &mut self.gemini_failures,
            (Provider::Replicate, true) => &mut self.replicate_success,
            (Provider::Replicate, false) => &mut self.replicate_failures,
        };
        *counter += 1;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GeminiUsage {
    pub daily_used: u32,
    pub daily_limit: u32,
}

/// A snapshot of image generation activity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImageStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    /// Percentage of requests served from the cache.
    pub cache_hit_rate: f64,
    pub gemini_success: u64,
    pub gemini_failures: u64,
    pub replicate_success: u64,
    pub replicate_failures: u64,
    pub last_reset_date: NaiveDate,
    pub gemini: GeminiUsage,
    pub provider_priority: Priority,
    pub replicate_fallback: bool,
    pub cache: CacheStats,
}

/// Generates dish photos with whichever provider is available, caching the results.
pub struct ImageService {
    providers: BTreeMap<Provider, Box<dyn ImageProvider>>,
    cache: ImageCache,
    priority: Priority,
    gemini_daily_limit: u32,
    replicate_fallback: bool,
    max_image_bytes: u64,
    counters: Mutex<Counters>,
}

impl ImageService {
    pub fn new(opt: &Options, providers: Vec<Box<dyn ImageProvider>>, cache: ImageCache) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| (provider.provider(), provider))
            .collect::<BTreeMap<_, _>>();
        tracing::info!(
            providers = ?providers.keys().collect::<Vec<_>>(),
            priority = %opt.image_provider_priority,
            cache = cache.is_enabled(),
            "image service ready"
        );
        Self {
            providers,
            cache,
            priority: opt.image_provider_priority,
            gemini_daily_limit: opt.gemini_daily_limit,
            replicate_fallback: opt.replicate_fallback_enabled,
            max_image_bytes: opt.max_image_bytes(),
            counters: Mutex::new(Counters::new()),
        }
    }

    /// Whether any provider is configured.
    pub fn is_available(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Reserve one Gemini generation from today's quota, if any is left.
    async fn take_gemini_quota(&self) -> bool {
        let mut counters = self.counters.lock().await;
        let today = Utc::now().date_naive();
        if counters.last_reset_date != today {
            counters.gemini_daily_used = 0;
            counters.last_reset_date = today;
        }
        if counters.gemini_daily_used >= self.gemini_daily_limit {
            return false;
        }
        counters.gemini_daily_used += 1;
        true
    }

    /// A photo of `dish`, or `None` if every provider failed.
    pub async fn generate(&self, dish: &DishImage) -> Option<Vec<u8>> {
        self.counters.lock().await.total_requests += 1;

        let recipe = dish.recipe_text.as_deref();
        if let Some(image) = self.cache.get(&dish.dish_name, recipe).await {
            self.counters.lock().await.cache_hits += 1;
            return Some(image);
        }

        for provider in self.priority.order(self.replicate_fallback) {
            let Some(client) = self.providers.get(&provider) else {
                continue;
            };
            if provider == Provider::Gemini && !self.take_gemini_quota().await {
                tracing::warn!(
                    limit = self.gemini_daily_limit,
                    "Gemini daily limit reached"
                );
                continue;
            }

            let result = client.generate(dish).await;
            let success = matches!(&result, Ok(image) if image.len() as u64 <= self.max_image_bytes);
            self.counters.lock().await.record(provider, success);
            match result {
                Ok(image) if success => {
                    if let Err(err) = self.cache.put(&dish.dish_name, recipe, &image).await {
                        tracing::error!(%err, "cannot cache image");
                    }
                    return Some(image);
                }
                Ok(image) => tracing::warn!(
                    %provider,
                    size = %format_bytes(image.len() as u64),
                    "generated image is too large"
                ),
                Err(err) => tracing::error!(%provider, dish = %dish.dish_name, %err, "image generation failed"),
            }
        }
        None
    }

    pub async fn stats(&self) -> ImageStats {
        let counters = self.counters.lock().await.clone();
        let cache_hit_rate = if counters.total_requests == 0 {
            0.
        } else {
            counters.cache_hits as f64 * 100. / counters.total_requests as f64
        };
        ImageStats {
            total_requests: counters.total_requests,
            cache_hits: counters.cache_hits,
            cache_hit_rate,
            gemini_success: counters.gemini_success,
            gemini_failures: counters.gemini_failures,
            replicate_success: counters.replicate_success,
            replicate_failures: counters.replicate_failures,
            last_reset_date: counters.last_reset_date,
            gemini: GeminiUsage {
                daily_used: counters.gemini_daily_used,
                daily_limit: self.gemini_daily_limit,
            },
            provider_priority: self.priority,
            replicate_fallback: self.replicate_fallback,
            cache: self.cache.stats().await,
        }
    }

    pub async fn cleanup_cache(&self, force: bool) -> Option<CleanupReport> {
        self.cache.cleanup(force).await
    }

    /// Check the connection to every configured provider.
    pub async fn test_services(&self) -> BTreeMap<Provider, bool> {
        let mut results = BTreeMap::new();
        for (provider, client) in &self.providers {
            let ok = client.test_connection().await;
            tracing::info!(%provider, ok, "image provider connection test");
            results.insert(*provider, ok);
        }
        results
    }
}
