//! A scripted chat model for tests.
#![cfg(any(test, feature = "testing"))]

use super::{ChatModel, Prompt};
use anyhow::Error;
use async_std::sync::Mutex;
use async_trait::async_trait;
use std::collections::VecDeque;

/// A chat model which replays scripted replies in order.
///
/// A `None` reply simulates an API failure. When the script runs out, every call fails.
#[derive(Debug, Default)]
pub struct MockModel {
    replies: Mutex<VecDeque<Option<String>>>,
    transcripts: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A model which answers with `replies`, in order.
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|s| Some(s.into())).collect()),
            ..Default::default()
        }
    }

    pub async fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().await.push_back(Some(reply.into()));
    }

    pub async fn push_failure(&self) {
        self.replies.lock().await.push_back(None);
    }

    pub async fn push_transcript(&self, text: impl Into<String>) {
        self.transcripts.lock().await.push_back(text.into());
    }

    /// Every prompt the model has been asked to complete.
    pub async fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl ChatModel for MockModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String, Error> {
        self.prompts.lock().await.push(prompt.clone());
        match self.replies.lock().await.pop_front() {
            Some(Some(reply)) => Ok(reply),
            Some(None) => Err(Error::msg("scripted failure")),
            None => Err(Error::msg("no scripted reply")),
        }
    }

    async fn transcribe(&self, _audio: Vec<u8>, _file_name: &str) -> Result<String, Error> {
        self.transcripts
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| Error::msg("no scripted transcript"))
    }
}
