//! The subset of the Telegram Bot API used by the bot.

use async_trait::async_trait;
use clap::Args;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

mod client;
#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use client::Client;

/// Errors reported by the Bot API, or while talking to it.
#[derive(Clone, Debug, Snafu)]
pub enum Error {
    #[snafu(display("Telegram API error {code}: {description}"))]
    Api { code: i64, description: String },
    #[snafu(display("Telegram request failed: {message}"))]
    Http { message: String },
}

impl Error {
    /// Whether this failure leaves nothing to do, such as deleting a message which is already
    /// gone or re-sending an unchanged keyboard.
    pub fn is_benign(&self) -> bool {
        const BENIGN: [&str; 4] = [
            "message is not modified",
            "message to delete not found",
            "message can't be deleted",
            "query is too old",
        ];
        match self {
            Self::Api { description, .. } => {
                BENIGN.iter().any(|benign| description.contains(benign))
            }
            Self::Http { .. } => false,
        }
    }

    pub(crate) fn http(err: impl std::fmt::Display) -> Self {
        Self::Http {
            message: err.to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_query: Option<CallbackQuery>,
}

impl Update {
    /// The user who caused this update.
    pub fn sender(&self) -> Option<&User> {
        if let Some(query) = &self.callback_query {
            return Some(&query.from);
        }
        self.message.as_ref()?.from.as_ref()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<Voice>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Voice {
    pub file_id: String,
    #[serde(default)]
    pub duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineKeyboardButton {
    pub fn new(text: impl Into<String>, callback_data: impl ToString) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BotCommand {
    pub command: String,
    pub description: String,
}

impl BotCommand {
    pub fn new(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
        }
    }
}

/// A photo upload.
#[derive(Clone, Debug)]
pub struct Photo {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub caption: Option<String>,
}

/// Operations on the Bot API.
///
/// Message texts and captions are always sent with the HTML parse mode.
#[async_trait]
pub trait Telegram: Send + Sync {
    /// Long-poll for updates with IDs of at least `offset`.
    async fn get_updates(&self, offset: i64, timeout: u64) -> Result<Vec<Update>, Error>;

    async fn send_message(
        &self,
        chat_id: i64,
        html: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, Error>;

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: Photo,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, Error>;

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        html: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), Error>;

    async fn edit_message_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), Error>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), Error>;

    async fn answer_callback_query(
        &self,
        query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), Error>;

    /// Set the command menu shown in one chat.
    async fn set_my_commands(&self, commands: &[BotCommand], chat_id: i64) -> Result<(), Error>;

    async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), Error>;

    /// Download the contents of a file sent to the bot.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, Error>;
}

/// Telegram options.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Bot token from @BotFather.
    #[clap(long, env = "TELEGRAM_TOKEN")]
    pub telegram_token: String,
}

impl Options {
    pub fn connect(&self) -> Result<Client, anyhow::Error> {
        Client::new(&self.telegram_token)
    }
}
