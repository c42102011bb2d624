//! A client for Groq's OpenAI-compatible API.

use super::{ChatModel, Options, Prompt};
use crate::multipart::Form;
use anyhow::Error;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const WHISPER_MODEL: &str = "whisper-large-v3";

/// A Groq client.
pub struct Client {
    client: surf::Client,
    opt: Options,
}

impl Client {
    pub fn new(opt: &Options) -> Result<Self, Error> {
        Ok(Self {
            client: surf::Config::default()
                .set_base_url("https://api.groq.com/openai/v1/".parse()?)
                .set_timeout(Some(Duration::from_secs(120)))
                .try_into()
                .map_err(Error::msg)?,
            opt: opt.clone(),
        })
    }

    fn post(&self, path: &str) -> surf::RequestBuilder {
        self.client
            .post(path)
            .header("Authorization", format!("Bearer {}", self.opt.groq_api_key))
    }
}

#[async_trait]
impl ChatModel for Client {
    async fn complete(&self, prompt: &Prompt) -> Result<String, Error> {
        let req = ChatRequest {
            model: &self.opt.groq_model,
            messages: [
                Message {
                    role: "system",
                    content: &prompt.system,
                },
                Message {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: prompt.temperature(),
            max_tokens: self.opt.max_tokens(prompt.task),
        };
        tracing::debug!(?prompt.task, req.temperature, req.max_tokens, "Groq request");

        let res: ChatResponse = self
            .post("chat/completions")
            .body_json(&req)
            .map_err(Error::msg)?
            .recv_json()
            .await
            .map_err(Error::msg)?;
        if let Some(err) = res.error {
            return Err(Error::msg(format!("Groq API error: {}", err.message)));
        }
        let choice = res
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::msg("Groq returned no choices"))?;
        Ok(choice.message.content.unwrap_or_default().trim().into())
    }

    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, Error> {
        let form = Form::new()
            .file("file", file_name, "audio/ogg", &audio)
            .text("model", WHISPER_MODEL)
            .text("response_format", "text")
            .text("language", self.opt.language());

        let mut res = form
            .attach(self.post("audio/transcriptions"))
            .await
            .map_err(Error::msg)?;
        let body = res.body_string().await.map_err(Error::msg)?;
        if !res.status().is_success() {
            return Err(Error::msg(format!(
                "Whisper error {}: {body}",
                res.status()
            )));
        }

        let text = body.trim().to_string();
        tracing::info!(text = %crate::text::prefix(&text, 50), "voice transcribed");
        Ok(text)
    }
}

#[derive(Clone, Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Clone, Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Clone, Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ApiError>,
}

#[derive(Clone, Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Clone, Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct ApiError {
    message: String,
}
