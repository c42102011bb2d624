//! A recording Telegram client for tests.
#![cfg(any(test, feature = "testing"))]

use super::{BotCommand, Chat, Error, InlineKeyboardMarkup, Message, Photo, Telegram, Update};
use async_std::sync::Mutex;
use async_std::task::sleep;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

/// A Bot API call made through [`MockTelegram`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    SendMessage {
        chat_id: i64,
        text: String,
        markup: Option<InlineKeyboardMarkup>,
    },
    SendPhoto {
        chat_id: i64,
        file_name: String,
        caption: Option<String>,
        markup: Option<InlineKeyboardMarkup>,
    },
    EditMessageText {
        chat_id: i64,
        message_id: i64,
        text: String,
        markup: Option<InlineKeyboardMarkup>,
    },
    EditMessageReplyMarkup {
        chat_id: i64,
        message_id: i64,
        markup: Option<InlineKeyboardMarkup>,
    },
    DeleteMessage {
        chat_id: i64,
        message_id: i64,
    },
    AnswerCallbackQuery {
        query_id: String,
        text: Option<String>,
        show_alert: bool,
    },
    SetMyCommands {
        chat_id: i64,
        commands: Vec<String>,
    },
    DeleteWebhook {
        drop_pending_updates: bool,
    },
}

/// A Telegram client which records every call and answers from a script.
#[derive(Debug, Default)]
pub struct MockTelegram {
    calls: Mutex<Vec<Call>>,
    updates: Mutex<VecDeque<Vec<Update>>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    next_message_id: AtomicI64,
    fail_photos: AtomicBool,
}

impl MockTelegram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a batch of updates to be returned by the next `get_updates`.
    pub async fn push_updates(&self, updates: Vec<Update>) {
        self.updates.lock().await.push_back(updates);
    }

    /// Make a file available for download.
    pub async fn add_file(&self, file_id: impl Into<String>, contents: Vec<u8>) {
        self.files.lock().await.insert(file_id.into(), contents);
    }

    /// Make every photo upload fail.
    pub fn fail_photos(&self) {
        self.fail_photos.store(true, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    /// Remove and return the calls recorded so far.
    pub async fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().await)
    }

    /// The texts of all messages sent so far.
    pub async fn sent_texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                Call::SendMessage { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// The texts of callback query answers given so far.
    pub async fn answers(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                Call::AnswerCallbackQuery {
                    text: Some(text), ..
                } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    async fn record(&self, call: Call) {
        self.calls.lock().await.push(call);
    }

    fn message(&self, chat_id: i64, text: Option<String>) -> Message {
        Message {
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1000,
            from: None,
            chat: Chat { id: chat_id },
            date: 0,
            text,
            caption: None,
            voice: None,
        }
    }
}

#[async_trait]
impl Telegram for MockTelegram {
    async fn get_updates(&self, _offset: i64, _timeout: u64) -> Result<Vec<Update>, Error> {
        let batch = self.updates.lock().await.pop_front();
        match batch {
            Some(updates) => Ok(updates),
            None => {
                sleep(Duration::from_millis(10)).await;
                Ok(vec![])
            }
        }
    }

    async fn send_message(
        &self,
        chat_id: i64,
        html: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, Error> {
        self.record(Call::SendMessage {
            chat_id,
            text: html.into(),
            markup: markup.cloned(),
        })
        .await;
        Ok(self.message(chat_id, Some(html.into())))
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: Photo,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, Error> {
        if self.fail_photos.load(Ordering::SeqCst) {
            return Err(Error::Api {
                code: 400,
                description: "Bad Request: IMAGE_PROCESS_FAILED".into(),
            });
        }
        self.record(Call::SendPhoto {
            chat_id,
            file_name: photo.file_name,
            caption: photo.caption,
            markup: markup.cloned(),
        })
        .await;
        Ok(self.message(chat_id, None))
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        html: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), Error> {
        self.record(Call::EditMessageText {
            chat_id,
            message_id,
            text: html.into(),
            markup: markup.cloned(),
        })
        .await;
        Ok(())
    }

    async fn edit_message_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), Error> {
        self.record(Call::EditMessageReplyMarkup {
            chat_id,
            message_id,
            markup: markup.cloned(),
        })
        .await;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), Error> {
        self.record(Call::DeleteMessage {
            chat_id,
            message_id,
        })
        .await;
        Ok(())
    }

    async fn answer_callback_query(
        &self,
        query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), Error> {
        self.record(Call::AnswerCallbackQuery {
            query_id: query_id.into(),
            text: text.map(String::from),
            show_alert,
        })
        .await;
        Ok(())
    }

    async fn set_my_commands(&self, commands: &[BotCommand], chat_id: i64) -> Result<(), Error> {
        self.record(Call::SetMyCommands {
            chat_id,
            commands: commands.iter().map(|c| c.command.clone()).collect(),
        })
        .await;
        Ok(())
    }

    async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), Error> {
        self.record(Call::DeleteWebhook {
            drop_pending_updates,
        })
        .await;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, Error> {
        self.files
            .lock()
            .await
            .get(file_id)
            .cloned()
            .ok_or_else(|| Error::Api {
                code: 400,
                description: format!("Bad Request: invalid file_id {file_id}"),
            })
    }
}
