use super::types::{File, InlineKeyboardMarkup};
use crate::extractor::{Media, MediaKind};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Bot API error in {method}: {description}")]
    Api { method: String, description: String },
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Minimal Bot API client covering what the relay sends.
#[derive(Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(client: reqwest::Client, api_base: &str, token: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Download URL for a `file_path` returned by `getFile`.
    pub fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.token, file_path)
    }

    async fn parse<T: DeserializeOwned>(
        method: &str,
        resp: reqwest::Response,
    ) -> Result<T, TelegramError> {
        let body: ApiResponse<T> = resp.json().await?;
        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            (_, _) => Err(TelegramError::Api {
                method: method.to_string(),
                description: body
                    .description
                    .unwrap_or_else(|| "no result".to_string()),
            }),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, TelegramError> {
        let resp = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;
        Self::parse(method, resp).await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<(), TelegramError> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(reply_to) = reply_to {
            body["reply_to_message_id"] = json!(reply_to);
        }
        self.call::<Value>("sendMessage", &body).await?;
        Ok(())
    }

    /// Reply to a message pointing out an already-seen URL, with a button to send it anyway.
    pub async fn send_duplicate_notice(
        &self,
        chat_id: i64,
        reply_to: i64,
        url: &str,
    ) -> Result<(), TelegramError> {
        let escaped = escape_html(url);
        let body = json!({
            "chat_id": chat_id,
            "text": format!("Duplicate URL: <a href=\"{}\">{}</a>", escaped, escaped),
            "reply_to_message_id": reply_to,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
            "disable_notification": true,
            "reply_markup": InlineKeyboardMarkup::force(),
        });
        self.call::<Value>("sendMessage", &body).await?;
        Ok(())
    }

    pub async fn edit_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        markup: &InlineKeyboardMarkup,
    ) -> Result<(), TelegramError> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reply_markup": markup,
        });
        self.call::<Value>("editMessageReplyMarkup", &body).await?;
        Ok(())
    }

    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TelegramError> {
        let mut body = json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call::<Value>("answerCallbackQuery", &body).await?;
        Ok(())
    }

    pub async fn get_file(&self, file_id: &str) -> Result<File, TelegramError> {
        self.call("getFile", &json!({ "file_id": file_id })).await
    }

    /// Post one media item to `chat`. Uploads bytes when present, otherwise
    /// lets Telegram fetch by file id or URL.
    pub async fn send_media(
        &self,
        chat: &str,
        media: &Media,
        caption: Option<&str>,
        markup: &InlineKeyboardMarkup,
    ) -> Result<(), TelegramError> {
        let (method, field) = match media.kind {
            MediaKind::Photo => ("sendPhoto", "photo"),
            MediaKind::Video => ("sendVideo", "video"),
            MediaKind::Animation => ("sendAnimation", "animation"),
        };

        if let Some(bytes) = &media.bytes {
            let mut form = Form::new()
                .text("chat_id", chat.to_string())
                .text("reply_markup", serde_json::to_string(markup)?)
                .part(
                    field,
                    Part::bytes(bytes.clone()).file_name(media.file_name.clone()),
                );
            if let Some(caption) = caption {
                form = form.text("caption", caption.to_string());
            }

            let resp = self
                .client
                .post(self.method_url(method))
                .multipart(form)
                .send()
                .await?;
            Self::parse::<Value>(method, resp).await?;
        } else {
            let file = media.external_file_id.as_deref().unwrap_or(&media.url);
            let mut body = json!({
                "chat_id": chat,
                field: file,
                "reply_markup": markup,
            });
            if let Some(caption) = caption {
                body["caption"] = json!(caption);
            }
            self.call::<Value>(method, &body).await?;
        }

        tracing::debug!(method, file = %media.file_name, "telegram media sent");
        Ok(())
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_method_and_file_urls() {
        let client = TelegramClient::new(reqwest::Client::new(), "https://api.telegram.org/", "123:abc");
        assert_eq!(
            client.method_url("sendPhoto"),
            "https://api.telegram.org/bot123:abc/sendPhoto"
        );
        assert_eq!(
            client.file_url("photos/file_1.jpg"),
            "https://api.telegram.org/file/bot123:abc/photos/file_1.jpg"
        );
    }

    #[test]
    fn escapes_urls_for_html_mode() {
        assert_eq!(
            escape_html("https://a.com/?x=1&y=\"2\""),
            "https://a.com/?x=1&amp;y=&quot;2&quot;"
        );
    }

    #[test]
    fn api_errors_carry_description() {
        let body: ApiResponse<Value> =
            serde_json::from_str(r#"{"ok": false, "error_code": 400, "description": "Bad Request"}"#)
                .unwrap();
        assert!(!body.ok);
        assert!(body.result.is_none());
        assert_eq!(body.description.as_deref(), Some("Bad Request"));
    }
}
