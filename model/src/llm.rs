//! Access to a hosted chat model.

use anyhow::Error;
use async_trait::async_trait;
use clap::Args;

mod groq;
#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use groq::Client;

/// A chat completion and speech recognition service.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete a two-message conversation, returning the trimmed reply.
    async fn complete(&self, prompt: &Prompt) -> Result<String, Error>;

    /// Transcribe a recorded voice message.
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, Error>;
}

/// The kind of work a completion is for, which determines its sampling parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Task {
    Validation,
    Categorization,
    Generation,
    Recipe,
    Freestyle,
}

impl Task {
    pub fn temperature(&self) -> f32 {
        match self {
            Self::Validation => 0.1,
            Self::Categorization => 0.2,
            Self::Generation => 0.5,
            Self::Recipe => 0.4,
            Self::Freestyle => 0.6,
        }
    }

    pub fn max_tokens(&self) -> u32 {
        match self {
            Self::Validation => 200,
            Self::Categorization => 500,
            Self::Generation => 1500,
            Self::Recipe => 3000,
            Self::Freestyle => 2000,
        }
    }
}

/// A system instruction plus one user message.
#[derive(Clone, Debug, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub task: Task,
    /// Overrides the task's default temperature.
    pub temperature: Option<f32>,
}

impl Prompt {
    pub fn new(task: Task, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            task,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or_else(|| self.task.temperature())
    }
}

/// Chat model options.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// API key for Groq.
    #[clap(long, env = "GROQ_API_KEY")]
    pub groq_api_key: String,

    /// Model used for all chat completions.
    #[clap(long, env = "GROQ_MODEL", default_value = "llama-3.3-70b-versatile")]
    pub groq_model: String,

    /// Upper bound on the number of tokens any completion may generate.
    #[clap(long, env = "GROQ_MAX_TOKENS")]
    pub groq_max_tokens: Option<u32>,

    /// Language of voice messages, as a locale like `ru-RU`.
    #[clap(long, env = "SPEECH_LANGUAGE", default_value = "ru-RU")]
    pub speech_language: String,
}

impl Options {
    pub fn connect(&self) -> Result<Client, Error> {
        Client::new(self)
    }

    /// The ISO 639-1 language code sent to the speech recognizer.
    pub fn language(&self) -> &str {
        self.speech_language
            .split('-')
            .next()
            .unwrap_or(&self.speech_language)
    }

    /// The token budget for a completion, after applying the configured ceiling.
    pub fn max_tokens(&self, task: Task) -> u32 {
        match self.groq_max_tokens {
            Some(cap) => task.max_tokens().min(cap),
            None => task.max_tokens(),
        }
    }
}
