//! Google Imagen through the Generative Language API.

use super::{prompt, DishImage, ImageProvider, Provider};
use crate::text::prefix;
use anyhow::Error;
use async_std::future::timeout;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use strum::{Display, EnumString};

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Clone, Copy, Debug, Default, Display, EnumString, PartialEq, Eq)]
pub enum Model {
    #[strum(serialize = "imagen-3")]
    Imagen3,
    #[default]
    #[strum(serialize = "imagen-3-fast")]
    Imagen3Fast,
    #[strum(serialize = "imagen-2")]
    Imagen2,
}

impl Model {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Imagen3 => "imagen-3.0-generate-001",
            Self::Imagen3Fast => "imagen-3.0-fast-generate-001",
            Self::Imagen2 => "imagen-2.0-generate-001",
        }
    }
}

pub struct Client {
    client: surf::Client,
    key: String,
    model: Model,
}

impl Client {
    pub fn new(key: &str, model: Model) -> Result<Self, Error> {
        Ok(Self {
            client: surf::Config::default()
                .set_base_url("https://generativelanguage.googleapis.com/v1beta/".parse()?)
                .set_timeout(Some(Duration::from_secs(30)))
                .try_into()
                .map_err(Error::msg)?,
            key: key.into(),
            model,
        })
    }
}

fn request_body(prompt: &str) -> Value {
    let safety_settings = HARM_CATEGORIES
        .iter()
        .map(|category| json!({ "category": category, "threshold": "BLOCK_NONE" }))
        .collect::<Vec<_>>();
    json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "generationConfig": {
            "candidate_count": 1,
            "aspect_ratio": "1:1",
            "add_watermark": false,
            "safety_settings": safety_settings,
        },
    })
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

/// The first inline image in a response.
fn extract_image(res: Response) -> Result<Vec<u8>, Error> {
    let data = res
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .and_then(|content| {
            content
                .parts
                .into_iter()
                .find_map(|part| part.inline_data)
        })
        .ok_or_else(|| Error::msg("Gemini response contains no image"))?;
    Ok(BASE64.decode(data.data)?)
}

#[async_trait]
impl ImageProvider for Client {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn generate(&self, dish: &DishImage) -> Result<Vec<u8>, Error> {
        let start = Instant::now();
        let prompt = prompt::gemini_prompt(dish);
        tracing::debug!(dish = prefix(&dish.dish_name, 50), %prompt, "Gemini prompt");

        let mut res = self
            .client
            .post(format!("models/{}:generateContent", self.model.id()))
            .query(&[("key", self.key.as_str())])
            .map_err(Error::msg)?
            .body_json(&request_body(&prompt))
            .map_err(Error::msg)?
            .await
            .map_err(Error::msg)?;
        if !res.status().is_success() {
            let body = res.body_string().await.unwrap_or_default();
            return Err(Error::msg(format!(
                "Gemini API error {}: {}",
                res.status(),
                prefix(&body, 200)
            )));
        }
        let image = extract_image(res.body_json().await.map_err(Error::msg)?)?;
        tracing::info!(
            dish = %dish.dish_name,
            elapsed = ?start.elapsed(),
            size_kb = image.len() / 1024,
            "Gemini generated image"
        );
        Ok(image)
    }

    async fn test_connection(&self) -> bool {
        let req = self
            .client
            .get("models")
            .query(&[("key", self.key.as_str())])
            .map_err(Error::msg);
        let req = match req {
            Ok(req) => req,
            Err(err) => {
                tracing::error!(%err, "Gemini connection test failed");
                return false;
            }
        };
        match timeout(Duration::from_secs(10), req).await {
            Ok(Ok(res)) => res.status().is_success(),
            Ok(Err(err)) => {
                tracing::error!(%err, "Gemini connection test failed");
                false
            }
            Err(_) => {
                tracing::error!("Gemini connection test timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_models() {
        assert_eq!("imagen-3".parse::<Model>().unwrap(), Model::Imagen3);
        assert_eq!(Model::default().id(), "imagen-3.0-fast-generate-001");
        assert_eq!(Model::Imagen2.to_string(), "imagen-2");
    }

    #[test]
    fn test_request_body() {
        let body = request_body("a photo");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "a photo");
        let config = &body["generationConfig"];
        assert_eq!(config["aspect_ratio"], "1:1");
        assert_eq!(config["add_watermark"], false);
        assert_eq!(config["safety_settings"].as_array().unwrap().len(), 4);
        assert_eq!(config["safety_settings"][0]["threshold"], "BLOCK_NONE");
    }

    #[test]
    fn test_extract_image() {
        let res: Response = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "here you go"},
                        {"inlineData": {"mimeType": "image/jpeg", "data": "aGVsbG8="}}
                    ]
                }
            }]
        }))
        .unwrap();
        assert_eq!(extract_image(res).unwrap(), b"hello");

        let empty: Response = serde_json::from_value(json!({"candidates": []})).unwrap();
        assert!(extract_image(empty).is_err());
    }
}
