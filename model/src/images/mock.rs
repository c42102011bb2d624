//! A scripted image provider for tests.
#![cfg(any(test, feature = "testing"))]

use super::{DishImage, ImageProvider, Provider};
use anyhow::Error;
use async_std::sync::Mutex;
use async_trait::async_trait;

/// An image provider which always returns the same result and records what it was asked for.
#[derive(Debug)]
pub struct MockProvider {
    provider: Provider,
    image: Option<Vec<u8>>,
    requests: Mutex<Vec<DishImage>>,
}

impl MockProvider {
    /// A provider which succeeds with `image`.
    pub fn new(provider: Provider, image: impl Into<Vec<u8>>) -> Self {
        Self {
            provider,
            image: Some(image.into()),
            requests: Default::default(),
        }
    }

    /// A provider which always fails.
    pub fn failing(provider: Provider) -> Self {
        Self {
            provider,
            image: None,
            requests: Default::default(),
        }
    }

    pub async fn requests(&self) -> Vec<DishImage> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ImageProvider for MockProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn generate(&self, dish: &DishImage) -> Result<Vec<u8>, Error> {
        self.requests.lock().await.push(dish.clone());
        self.image
            .clone()
            .ok_or_else(|| Error::msg(format!("{} is down", self.provider)))
    }

    async fn test_connection(&self) -> bool {
        self.image.is_some()
    }
}
