//! An on-disk cache of generated images.
//!
//! Images live in `{key}.jpg` files next to an `index.json` describing each entry. The key is
//! derived from the dish name and the start of its recipe, so the same recipe is only illustrated
//! once.

use super::Options;
use crate::text::prefix;
use anyhow::Error;
use async_std::fs;
use async_std::path::PathBuf;
use async_std::sync::Mutex;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const INDEX_FILE: &str = "index.json";

#[derive(Clone, Debug)]
pub struct Config {
    pub enabled: bool,
    pub dir: PathBuf,
    pub max_size_mb: u64,
    pub ttl: Duration,
    pub cleanup_enabled: bool,
    pub cleanup_interval: Duration,
}

impl From<&Options> for Config {
    fn from(opt: &Options) -> Self {
        Self {
            enabled: opt.enable_image_cache,
            dir: opt.image_cache_dir.clone().into(),
            max_size_mb: opt.max_cache_size_mb,
            ttl: Duration::days(opt.cache_ttl_days),
            cleanup_enabled: opt.image_cache_cleanup_enabled,
            cleanup_interval: Duration::hours(opt.cache_cleanup_interval_hours),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
struct Entry {
    dish_name: String,
    created_at: DateTime<Utc>,
    size_kb: f64,
    recipe_hash: String,
}

#[derive(Debug)]
struct State {
    index: BTreeMap<String, Entry>,
    last_cleanup: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

/// What a cache cleanup removed.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub removed_files: usize,
    pub freed_kb: f64,
    pub errors: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub file_count: usize,
    pub total_size_mb: f64,
    pub max_size_mb: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ImageCache {
    config: Config,
    state: Mutex<State>,
}

fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// The cache key for a dish.
pub fn cache_key(dish_name: &str, recipe_text: Option<&str>) -> String {
    let mut text = dish_name.trim().to_lowercase();
    if let Some(recipe) = recipe_text {
        text += prefix(recipe, 1000);
    }
    sha256_hex(&text)
}

impl ImageCache {
    /// Open the cache directory, creating it if necessary.
    ///
    /// A missing or unreadable index starts the cache empty.
    pub async fn open(config: Config) -> Result<Self, Error> {
        let mut index = BTreeMap::new();
        if config.enabled {
            fs::create_dir_all(&config.dir).await?;
            match fs::read(config.dir.join(INDEX_FILE)).await {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(loaded) => index = loaded,
                    Err(err) => tracing::error!(%err, "corrupt image cache index, starting empty"),
                },
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => tracing::error!(%err, "cannot read image cache index"),
            }
            tracing::info!(dir = %config.dir.display(), entries = index.len(), "image cache ready");
        }
        Ok(Self {
            config,
            state: Mutex::new(State {
                index,
                last_cleanup: None,
                created_at: Utc::now(),
            }),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn path(&self, key: &str) -> PathBuf {
        self.config.dir.join(format!("{key}.jpg"))
    }

    async fn save_index(&self, index: &BTreeMap<String, Entry>) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(index)?;
        fs::write(self.config.dir.join(INDEX_FILE), json).await?;
        Ok(())
    }

    /// A cached image of a dish, if there is a fresh one.
    pub async fn get(&self, dish_name: &str, recipe_text: Option<&str>) -> Option<Vec<u8>> {
        if !self.config.enabled {
            return None;
        }
        let key = cache_key(dish_name, recipe_text);
        let mut state = self.state.lock().await;
        let created_at = state.index.get(&key)?.created_at;

        if Utc::now() - created_at > self.config.ttl {
            state.index.remove(&key);
            if let Err(err) = fs::remove_file(self.path(&key)).await {
                tracing::warn!(%key, %err, "cannot remove expired cache file");
            }
            if let Err(err) = self.save_index(&state.index).await {
                tracing::error!(%err, "cannot save image cache index");
            }
            return None;
        }

        match fs::read(self.path(&key)).await {
            Ok(bytes) => {
                tracing::debug!(dish = prefix(dish_name, 50), "image cache hit");
                Some(bytes)
            }
            Err(err) => {
                tracing::error!(%key, %err, "cannot read cached image");
                None
            }
        }
    }

    /// Cache an image of a dish. Does nothing when the cache is disabled.
    pub async fn put(
        &self,
        dish_name: &str,
        recipe_text: Option<&str>,
        image: &[u8],
    ) -> Result<(), Error> {
        if !self.config.enabled {
            return Ok(());
        }
        let key = cache_key(dish_name, recipe_text);
        let mut state = self.state.lock().await;
        fs::write(self.path(&key), image).await?;
        state.index.insert(
            key,
            Entry {
                dish_name: prefix(dish_name, 100).into(),
                created_at: Utc::now(),
                size_kb: image.len() as f64 / 1024.,
                recipe_hash: sha256_hex(recipe_text.unwrap_or_default())[..8].into(),
            },
        );
        self.save_index(&state.index).await
    }

    /// Remove expired, orphaned and excess files.
    ///
    /// Unless `force` is set, nothing happens when cleanup is disabled or the cleanup interval has
    /// not passed since the last cleanup (or since the cache was opened). Returns `None` if the
    /// cleanup was skipped.
    pub async fn cleanup(&self, force: bool) -> Option<CleanupReport> {
        if !self.config.enabled {
            return None;
        }
        if !self.config.cleanup_enabled && !force {
            return None;
        }
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let since = state.last_cleanup.unwrap_or(state.created_at);
        if !force && now - since < self.config.cleanup_interval {
            return None;
        }
        state.last_cleanup = Some(now);

        let mut report = CleanupReport::default();

        // Expired entries.
        let expired = state
            .index
            .iter()
            .filter(|(_, entry)| now - entry.created_at > self.config.ttl)
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        for key in expired {
            if let Some(entry) = state.index.remove(&key) {
                self.remove(&key, entry.size_kb, &mut report).await;
            }
        }

        // Entries whose file has disappeared.
        let mut missing = vec![];
        for key in state.index.keys() {
            if !self.path(key).exists().await {
                missing.push(key.clone());
            }
        }
        for key in missing {
            state.index.remove(&key);
        }

        // Files with no entry.
        match fs::read_dir(&self.config.dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next().await {
                    let path = match entry {
                        Ok(entry) => entry.path(),
                        Err(err) => {
                            tracing::warn!(%err, "cannot list image cache");
                            report.errors += 1;
                            continue;
                        }
                    };
                    if path.extension().and_then(|ext| ext.to_str()) != Some("jpg") {
                        continue;
                    }
                    let Some(key) = path.file_stem().and_then(|stem| stem.to_str()) else {
                        continue;
                    };
                    if state.index.contains_key(key) {
                        continue;
                    }
                    let size_kb = match fs::metadata(&path).await {
                        Ok(meta) => meta.len() as f64 / 1024.,
                        Err(_) => 0.,
                    };
                    let key = key.to_string();
                    self.remove(&key, size_kb, &mut report).await;
                }
            }
            Err(err) => {
                tracing::error!(%err, "cannot list image cache");
                report.errors += 1;
            }
        }

        // Oldest entries beyond the size limit.
        let max_kb = (self.config.max_size_mb * 1024) as f64;
        let mut total_kb = state.index.values().map(|entry| entry.size_kb).sum::<f64>();
        if total_kb > max_kb {
            let mut by_age = state
                .index
                .iter()
                .map(|(key, entry)| (entry.created_at, key.clone(), entry.size_kb))
                .collect::<Vec<_>>();
            by_age.sort_by(|a, b| a.0.cmp(&b.0));
            for (_, key, size_kb) in by_age {
                if total_kb <= max_kb {
                    break;
                }
                state.index.remove(&key);
                self.remove(&key, size_kb, &mut report).await;
                total_kb -= size_kb;
            }
        }

        if let Err(err) = self.save_index(&state.index).await {
            tracing::error!(%err, "cannot save image cache index");
            report.errors += 1;
        }
        tracing::info!(
            removed = report.removed_files,
            freed_kb = report.freed_kb,
            errors = report.errors,
            "image cache cleanup finished"
        );
        Some(report)
    }

    async fn remove(&self, key: &str, size_kb: f64, report: &mut CleanupReport) {
        match fs::remove_file(self.path(key)).await {
            Ok(()) => {
                report.removed_files += 1;
                report.freed_kb += size_kb;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(%key, %err, "cannot remove cached image");
                report.errors += 1;
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            enabled: self.config.enabled,
            file_count: state.index.len(),
            total_size_mb: state.index.values().map(|entry| entry.size_kb).sum::<f64>() / 1024.,
            max_size_mb: self.config.max_size_mb,
            last_cleanup: state.last_cleanup,
        }
    }
}
