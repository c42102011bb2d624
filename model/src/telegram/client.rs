//! A Bot API client over HTTPS.

use super::{BotCommand, Error, InlineKeyboardMarkup, Message, Photo, Telegram, Update};
use crate::multipart::Form;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// A Telegram bot client.
pub struct Client {
    client: surf::Client,
    token: String,
}

impl Client {
    pub fn new(token: &str) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: surf::Config::default()
                .set_base_url("https://api.telegram.org/".parse()?)
                // Long enough to outlast a long poll.
                .set_timeout(Some(Duration::from_secs(90)))
                .try_into()
                .map_err(anyhow::Error::msg)?,
            token: token.into(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &impl Serialize,
    ) -> Result<T, Error> {
        let req = self
            .client
            .post(format!("bot{}/{method}", self.token))
            .body_json(&without_nulls(params)?)
            .map_err(Error::http)?;
        self.send(method, req).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: &str,
        req: surf::RequestBuilder,
    ) -> Result<T, Error> {
        let mut res = req.await.map_err(Error::http)?;
        let envelope: Envelope<T> = res.body_json().await.map_err(Error::http)?;
        let result = envelope.into_result();
        if let Err(err) = &result {
            tracing::debug!(method, %err, "Telegram call failed");
        }
        result
    }
}

/// Serialize method parameters, leaving out unset optional ones.
fn without_nulls(params: &impl Serialize) -> Result<Value, Error> {
    let mut value = serde_json::to_value(params).map_err(Error::http)?;
    if let Value::Object(map) = &mut value {
        map.retain(|_, v| !v.is_null());
    }
    Ok(value)
}

/// The response wrapper used by every Bot API method.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<T, Error> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(Error::Api {
                code: self.error_code.unwrap_or_default(),
                description: self
                    .description
                    .unwrap_or_else(|| "no description".into()),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct File {
    file_path: Option<String>,
}

#[async_trait]
impl Telegram for Client {
    async fn get_updates(&self, offset: i64, timeout: u64) -> Result<Vec<Update>, Error> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": timeout,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    async fn send_message(
        &self,
        chat_id: i64,
        html: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, Error> {
        self.call(
            "sendMessage",
            &json!({
                "chat_id": chat_id,
                "text": html,
                "parse_mode": "HTML",
                "reply_markup": markup,
            }),
        )
        .await
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: Photo,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, Error> {
        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("parse_mode", "HTML");
        if let Some(caption) = &photo.caption {
            form = form.text("caption", caption);
        }
        if let Some(markup) = markup {
            form = form.text(
                "reply_markup",
                serde_json::to_string(markup).map_err(Error::http)?,
            );
        }
        let form = form.file("photo", &photo.file_name, "image/jpeg", &photo.bytes);
        let req = form.attach(self.client.post(format!("bot{}/sendPhoto", self.token)));
        self.send("sendPhoto", req).await
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        html: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), Error> {
        self.call::<Value>(
            "editMessageText",
            &json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": html,
                "parse_mode": "HTML",
                "reply_markup": markup,
            }),
        )
        .await?;
        Ok(())
    }

    async fn edit_message_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), Error> {
        self.call::<Value>(
            "editMessageReplyMarkup",
            &json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "reply_markup": markup,
            }),
        )
        .await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), Error> {
        self.call::<bool>(
            "deleteMessage",
            &json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await?;
        Ok(())
    }

    async fn answer_callback_query(
        &self,
        query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), Error> {
        self.call::<bool>(
            "answerCallbackQuery",
            &json!({
                "callback_query_id": query_id,
                "text": text,
                "show_alert": show_alert,
            }),
        )
        .await?;
        Ok(())
    }

    async fn set_my_commands(&self, commands: &[BotCommand], chat_id: i64) -> Result<(), Error> {
        self.call::<bool>(
            "setMyCommands",
            &json!({
                "commands": commands,
                "scope": { "type": "chat", "chat_id": chat_id },
            }),
        )
        .await?;
        Ok(())
    }

    async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), Error> {
        self.call::<bool>(
            "deleteWebhook",
            &json!({ "drop_pending_updates": drop_pending_updates }),
        )
        .await?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, Error> {
        let file: File = self.call("getFile", &json!({ "file_id": file_id })).await?;
        let path = file.file_path.ok_or_else(|| Error::Api {
            code: 0,
            description: format!("file {file_id} is not available for download"),
        })?;
        let mut res = self
            .client
            .get(format!("file/bot{}/{path}", self.token))
            .await
            .map_err(Error::http)?;
        if !res.status().is_success() {
            return Err(Error::Api {
                code: u16::from(res.status()).into(),
                description: format!("download of {file_id} failed"),
            });
        }
        res.body_bytes().await.map_err(Error::http)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_envelope() {
        let ok: Envelope<bool> = serde_json::from_value(json!({"ok": true, "result": true})).unwrap();
        assert!(ok.into_result().unwrap());

        let err: Envelope<Message> = serde_json::from_value(json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: message to delete not found",
        }))
        .unwrap();
        match err.into_result().unwrap_err() {
            err @ Error::Api { code: 400, .. } => assert!(err.is_benign()),
            err => panic!("unexpected error {err}"),
        }
    }

    #[test]
    fn test_without_nulls() {
        let markup: Option<&InlineKeyboardMarkup> = None;
        assert_eq!(
            without_nulls(&json!({"chat_id": 1, "text": "hi", "reply_markup": markup})).unwrap(),
            json!({"chat_id": 1, "text": "hi"})
        );
    }

    #[test]
    fn test_envelope_without_description() {
        let err: Envelope<bool> = serde_json::from_value(json!({"ok": false})).unwrap();
        assert_eq!(
            err.into_result().unwrap_err().to_string(),
            "Telegram API error 0: no description"
        );
    }
}
