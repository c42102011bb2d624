//! Image generation with models hosted on Replicate.

use super::{prompt, DishImage, ImageProvider, Options, Provider};
use crate::text::prefix;
use anyhow::Error;
use async_std::task::sleep;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use strum::{Display, EnumString};

const MAX_POLLS: usize = 60;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Default, Display, EnumString, PartialEq, Eq)]
pub enum Model {
    #[default]
    #[strum(serialize = "flux-1.1-pro")]
    Flux11Pro,
    #[strum(serialize = "flux-kontext-pro")]
    FluxKontextPro,
    #[strum(serialize = "sdxl")]
    Sdxl,
    #[strum(serialize = "realvisxl")]
    RealVisXl,
}

/// Generation parameters tuned for one model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelParams {
    pub guidance_scale: f32,
    pub num_inference_steps: u32,
    pub aspect_ratio: Option<&'static str>,
    pub negative_prompt: &'static str,
}

impl Model {
    /// The `owner/name` of the model on Replicate.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Flux11Pro => "black-forest-labs/flux-1.1-pro",
            Self::FluxKontextPro => "black-forest-labs/flux-kontext-pro",
            Self::Sdxl => "stability-ai/sdxl",
            Self::RealVisXl => "sgriebel/realvisxl-v4.0",
        }
    }

    pub fn params(&self) -> ModelParams {
        match self {
            Self::Flux11Pro => ModelParams {
                guidance_scale: 7.5,
                num_inference_steps: 30,
                aspect_ratio: Some("1:1"),
                negative_prompt: "text, watermark, logo, people, hands, blurry, cartoon, 3d render, drawing, bad quality, ugly",
            },
            Self::FluxKontextPro => ModelParams {
                guidance_scale: 7.0,
                num_inference_steps: 28,
                aspect_ratio: Some("1:1"),
                negative_prompt: "text, watermark, logo, people, hands, blurry, cartoon, 3d render, drawing",
            },
            Self::Sdxl => ModelParams {
                guidance_scale: 7.5,
                num_inference_steps: 25,
                aspect_ratio: None,
                negative_prompt: "text, watermark, logo, people, hands, blurry",
            },
            Self::RealVisXl => ModelParams {
                guidance_scale: 7.0,
                num_inference_steps: 30,
                aspect_ratio: None,
                negative_prompt: "text, watermark, logo, people, hands, blurry",
            },
        }
    }

    pub fn is_flux(&self) -> bool {
        matches!(self, Self::Flux11Pro | Self::FluxKontextPro)
    }
}

pub struct Client {
    client: surf::Client,
    token: String,
    model: Model,
    output_format: String,
    output_quality: u8,
}

impl Client {
    pub fn new(token: &str, model: Model, opt: &Options) -> Result<Self, Error> {
        Ok(Self {
            client: surf::Config::default()
                .set_base_url("https://api.replicate.com/v1/".parse()?)
                .set_timeout(Some(Duration::from_secs(60)))
                .try_into()
                .map_err(Error::msg)?,
            token: token.into(),
            model,
            output_format: output_format(&opt.default_image_format),
            output_quality: opt.image_quality,
        })
    }

    fn authorized(&self, req: surf::RequestBuilder) -> surf::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.token))
    }

    fn input(&self, prompt: String) -> Value {
        let params = self.model.params();
        let mut input = Map::new();
        input.insert("prompt".into(), prompt.into());
        input.insert("num_outputs".into(), 1.into());
        input.insert("guidance_scale".into(), json!(params.guidance_scale));
        input.insert(
            "num_inference_steps".into(),
            params.num_inference_steps.into(),
        );
        if let Some(aspect_ratio) = params.aspect_ratio {
            input.insert("aspect_ratio".into(), aspect_ratio.into());
        }
        input.insert("negative_prompt".into(), params.negative_prompt.into());
        if self.model.is_flux() {
            input.insert("output_format".into(), self.output_format.clone().into());
            input.insert("output_quality".into(), self.output_quality.into());
        }
        Value::Object(input)
    }

    async fn predict(&self, input: Value) -> Result<String, Error> {
        let mut prediction: Prediction = self
            .authorized(
                self.client
                    .post(format!("models/{}/predictions", self.model.id())),
            )
            .header("Prefer", "wait")
            .body_json(&json!({ "input": input }))
            .map_err(Error::msg)?
            .recv_json()
            .await
            .map_err(Error::msg)?;

        let mut polls = 0;
        while !prediction.is_finished() {
            if polls >= MAX_POLLS {
                return Err(Error::msg(format!(
                    "Replicate prediction {} did not finish in time",
                    prediction.id
                )));
            }
            polls += 1;
            sleep(POLL_INTERVAL).await;
            prediction = self
                .authorized(self.client.get(format!("predictions/{}", prediction.id)))
                .recv_json()
                .await
                .map_err(Error::msg)?;
        }
        prediction.output_url()
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, Error> {
        let mut res = self.client.get(url).await.map_err(Error::msg)?;
        if !res.status().is_success() {
            return Err(Error::msg(format!(
                "image download failed with status {}",
                res.status()
            )));
        }
        res.body_bytes().await.map_err(Error::msg)
    }
}

/// The `output_format` Replicate expects for a configured image format like `JPEG`.
fn output_format(format: &str) -> String {
    match format.to_lowercase().as_str() {
        "jpeg" | "jpg" => "jpg".into(),
        other => other.into(),
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Value,
}

impl Prediction {
    fn is_finished(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }

    fn output_url(self) -> Result<String, Error> {
        if self.status != "succeeded" {
            return Err(Error::msg(format!(
                "Replicate prediction {} {}: {}",
                self.id, self.status, self.error
            )));
        }
        match self.output {
            Value::String(url) => Ok(url),
            Value::Array(urls) => match urls.into_iter().next() {
                Some(Value::String(url)) => Ok(url),
                _ => Err(Error::msg("Replicate returned no output URL")),
            },
            _ => Err(Error::msg("Replicate returned no output URL")),
        }
    }
}

#[async_trait]
impl ImageProvider for Client {
    fn provider(&self) -> Provider {
        Provider::Replicate
    }

    async fn generate(&self, dish: &DishImage) -> Result<Vec<u8>, Error> {
        let start = Instant::now();
        let prompt = prompt::replicate_prompt(dish);
        tracing::debug!(dish = prefix(&dish.dish_name, 50), %prompt, "Replicate prompt");
        tracing::info!(dish = %dish.dish_name, model = %self.model, "starting Replicate generation");

        let url = self.predict(self.input(prompt)).await?;
        let image = self.download(&url).await?;
        tracing::info!(
            dish = %dish.dish_name,
            elapsed = ?start.elapsed(),
            size_kb = image.len() / 1024,
            "Replicate generated image"
        );
        Ok(image)
    }

    async fn test_connection(&self) -> bool {
        match self.authorized(self.client.get("account")).await {
            Ok(res) => res.status().is_success(),
            Err(err) => {
                tracing::error!(%err, "Replicate connection test failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn client(model: Model) -> Client {
        Client::new("token", model, &Options::default()).unwrap()
    }

    #[test]
    fn test_flux_input() {
        let input = client(Model::Flux11Pro).input("a soup".into());
        assert_eq!(input["prompt"], "a soup");
        assert_eq!(input["num_outputs"], 1);
        assert_eq!(input["num_inference_steps"], 30);
        assert_eq!(input["aspect_ratio"], "1:1");
        assert_eq!(input["output_format"], "jpg");
        assert_eq!(input["output_quality"], 85);
    }

    #[test]
    fn test_sdxl_input() {
        let input = client(Model::Sdxl).input("a soup".into());
        assert_eq!(input["num_inference_steps"], 25);
        assert!(input.get("aspect_ratio").is_none());
        assert!(input.get("output_format").is_none());
    }

    #[test]
    fn test_models() {
        assert_eq!("realvisxl".parse::<Model>().unwrap(), Model::RealVisXl);
        assert_eq!(Model::default().id(), "black-forest-labs/flux-1.1-pro");
        assert!(!Model::Sdxl.is_flux());
    }

    #[test]
    fn test_output_url() {
        let prediction = |status: &str, output: Value| Prediction {
            id: "p1".into(),
            status: status.into(),
            output,
            error: Value::Null,
        };
        assert_eq!(
            prediction("succeeded", json!("https://x/1.jpg"))
                .output_url()
                .unwrap(),
            "https://x/1.jpg"
        );
        assert_eq!(
            prediction("succeeded", json!(["https://x/2.jpg", "https://x/3.jpg"]))
                .output_url()
                .unwrap(),
            "https://x/2.jpg"
        );
        assert!(prediction("succeeded", Value::Null).output_url().is_err());
        assert!(prediction("failed", json!("https://x/1.jpg"))
            .output_url()
            .is_err());
        assert!(!prediction("processing", Value::Null).is_finished());
    }

    #[test]
    fn test_output_format() {
        assert_eq!(output_format("JPEG"), "jpg");
        assert_eq!(output_format("PNG"), "png");
        assert_eq!(output_format("webp"), "webp");
    }
}
