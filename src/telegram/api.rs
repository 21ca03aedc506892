//! Raw Telegram Bot API client.
//!
//! Talks to api.telegram.org directly over reqwest. Text goes out
//! Markdown-first with a plain-text retry when Telegram rejects the
//! entities, long messages are split at the 4096 character limit, and
//! attachments ride multipart uploads.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::error::TelegramError;

/// Hard limit for sendMessage text.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;
/// Maximum photos per sendMediaGroup call.
const MEDIA_GROUP_LIMIT: usize = 10;
/// Pause between consecutive media groups.
const MEDIA_GROUP_DELAY: Duration = Duration::from_secs(1);
/// Pause between consecutive document uploads.
const DOCUMENT_DELAY: Duration = Duration::from_secs(2);

/// Destination chat, with optional forum topic.
#[derive(Debug, Clone, Copy)]
pub struct SendTarget {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
}

impl SendTarget {
    pub fn new(chat_id: i64, thread_id: Option<i64>) -> Self {
        Self { chat_id, thread_id }
    }
}

/// The slice of a sendMessage reply we keep.
#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

/// Bot identity from getMe.
#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

pub struct TelegramApi {
    token: SecretString,
    client: reqwest::Client,
}

impl TelegramApi {
    pub fn new(token: SecretString) -> Self {
        Self {
            token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.token.expose_secret()
        )
    }

    /// POST a JSON-bodied method call and decode the reply envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, TelegramError> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| TelegramError::Http {
                method: method.to_string(),
                reason: e.to_string(),
            })?;
        Self::decode(method, response).await
    }

    async fn decode<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, TelegramError> {
        let reply: ApiReply<T> =
            response.json().await.map_err(|e| TelegramError::Http {
                method: method.to_string(),
                reason: e.to_string(),
            })?;
        if !reply.ok {
            return Err(TelegramError::Api {
                method: method.to_string(),
                description: reply
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            });
        }
        reply.result.ok_or_else(|| TelegramError::Api {
            method: method.to_string(),
            description: "reply has no result".to_string(),
        })
    }

    // ── Messages ────────────────────────────────────────────────────

    /// Send a text message, splitting at the length limit. Returns the
    /// first chunk's message (the one worth pinning).
    pub async fn send_message(
        &self,
        target: SendTarget,
        text: &str,
    ) -> Result<SentMessage, TelegramError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let mut chunks = chunks.iter();
        let Some(first_chunk) = chunks.next() else {
            return Err(TelegramError::Api {
                method: "sendMessage".to_string(),
                description: "empty message".to_string(),
            });
        };

        let first = self.send_message_chunk(target, first_chunk).await?;
        for chunk in chunks {
            self.send_message_chunk(target, chunk).await?;
        }
        Ok(first)
    }

    /// One chunk: try Markdown first, retry plain when Telegram rejects
    /// the formatting. Transport errors are not retried here.
    async fn send_message_chunk(
        &self,
        target: SendTarget,
        text: &str,
    ) -> Result<SentMessage, TelegramError> {
        let mut body = serde_json::json!({
            "chat_id": target.chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        if let Some(thread_id) = target.thread_id {
            body["message_thread_id"] = serde_json::json!(thread_id);
        }

        match self.call("sendMessage", &body).await {
            Ok(sent) => Ok(sent),
            Err(TelegramError::Api { description, .. }) => {
                warn!("Markdown send rejected ({description}), retrying as plain text");
                if let Some(map) = body.as_object_mut() {
                    map.remove("parse_mode");
                }
                self.call("sendMessage", &body).await
            }
            Err(e) => Err(e),
        }
    }

    /// Pin a message in the chat.
    pub async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
        });
        let _: bool = self.call("pinChatMessage", &body).await?;
        Ok(())
    }

    // ── Attachments ─────────────────────────────────────────────────

    /// Send photos as media albums, at most ten per group, pausing
    /// between groups to stay under the Bot API rate limits.
    pub async fn send_media_groups(
        &self,
        target: SendTarget,
        mut photos: Vec<(String, Vec<u8>)>,
    ) -> Result<(), TelegramError> {
        while !photos.is_empty() {
            let rest = photos.split_off(photos.len().min(MEDIA_GROUP_LIMIT));
            let batch = std::mem::replace(&mut photos, rest);
            self.send_media_group(target, batch).await?;
            if !photos.is_empty() {
                tokio::time::sleep(MEDIA_GROUP_DELAY).await;
            }
        }
        Ok(())
    }

    async fn send_media_group(
        &self,
        target: SendTarget,
        photos: Vec<(String, Vec<u8>)>,
    ) -> Result<(), TelegramError> {
        let mut form = Form::new().text("chat_id", target.chat_id.to_string());
        if let Some(thread_id) = target.thread_id {
            form = form.text("message_thread_id", thread_id.to_string());
        }

        let mut media = Vec::with_capacity(photos.len());
        for (idx, (name, bytes)) in photos.into_iter().enumerate() {
            let field = format!("photo{idx}");
            media.push(serde_json::json!({
                "type": "photo",
                "media": format!("attach://{field}"),
            }));
            form = form.part(field, Part::bytes(bytes).file_name(name));
        }
        let media = serde_json::to_string(&media).map_err(|e| TelegramError::Http {
            method: "sendMediaGroup".to_string(),
            reason: e.to_string(),
        })?;
        let form = form.text("media", media);

        let response = self
            .client
            .post(self.api_url("sendMediaGroup"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TelegramError::Http {
                method: "sendMediaGroup".to_string(),
                reason: e.to_string(),
            })?;
        let _: Vec<SentMessage> = Self::decode("sendMediaGroup", response).await?;
        Ok(())
    }

    /// Upload documents one by one, pausing between uploads.
    pub async fn send_documents(
        &self,
        target: SendTarget,
        documents: Vec<(String, Vec<u8>)>,
    ) -> Result<(), TelegramError> {
        let mut documents = documents.into_iter().peekable();
        while let Some((name, bytes)) = documents.next() {
            self.send_document(target, &name, bytes).await?;
            if documents.peek().is_some() {
                tokio::time::sleep(DOCUMENT_DELAY).await;
            }
        }
        Ok(())
    }

    pub async fn send_document(
        &self,
        target: SendTarget,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<SentMessage, TelegramError> {
        let mut form = Form::new()
            .text("chat_id", target.chat_id.to_string())
            .part("document", Part::bytes(bytes).file_name(name.to_string()));
        if let Some(thread_id) = target.thread_id {
            form = form.text("message_thread_id", thread_id.to_string());
        }

        let response = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TelegramError::Http {
                method: "sendDocument".to_string(),
                reason: e.to_string(),
            })?;
        Self::decode("sendDocument", response).await
    }

    // ── Polling ─────────────────────────────────────────────────────

    pub async fn get_me(&self) -> Result<BotIdentity, TelegramError> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| TelegramError::Http {
                method: "getMe".to_string(),
                reason: e.to_string(),
            })?;
        Self::decode("getMe", response).await
    }

    /// Long-poll for updates; blocks server-side up to `timeout_secs`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<serde_json::Value>, TelegramError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", &body).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Escape the Markdown control characters Telegram trips over in
/// substituted values. Backslash first so inserted escapes survive.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '_' | '*' | '~' | '`' | '#' | '|' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Split a message into chunks within Telegram's character limit,
/// preferring newline boundaries, then spaces, then a hard cut.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    loop {
        if remaining.chars().count() <= max_chars {
            if !remaining.is_empty() {
                chunks.push(remaining.to_string());
            }
            break;
        }

        // Byte offset of the character limit.
        let hard_cut = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(remaining.len());

        let window = &remaining[..hard_cut];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&pos| pos > 0)
            .unwrap_or(hard_cut);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> TelegramApi {
        TelegramApi::new(SecretString::from("123456:TEST-TOKEN".to_string()))
    }

    // ── URL construction ────────────────────────────────────────────

    #[test]
    fn api_url_embeds_token_and_method() {
        let api = api();
        assert_eq!(
            api.api_url("sendMessage"),
            "https://api.telegram.org/bot123456:TEST-TOKEN/sendMessage"
        );
        assert_eq!(
            api.api_url("getUpdates"),
            "https://api.telegram.org/bot123456:TEST-TOKEN/getUpdates"
        );
    }

    // ── Reply envelope ──────────────────────────────────────────────

    #[test]
    fn reply_envelope_deserializes_success() {
        let reply: ApiReply<SentMessage> =
            serde_json::from_str(r#"{"ok":true,"result":{"message_id":99,"date":0}}"#).unwrap();
        assert!(reply.ok);
        assert_eq!(reply.result.unwrap().message_id, 99);
    }

    #[test]
    fn reply_envelope_deserializes_failure() {
        let reply: ApiReply<SentMessage> = serde_json::from_str(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: can't parse entities"}"#,
        )
        .unwrap();
        assert!(!reply.ok);
        assert!(reply.description.unwrap().contains("can't parse"));
    }

    #[test]
    fn bot_identity_tolerates_missing_username() {
        let me: BotIdentity =
            serde_json::from_str(r#"{"id":1,"is_bot":true,"first_name":"Mail"}"#).unwrap();
        assert_eq!(me.id, 1);
        assert_eq!(me.username, None);
    }

    // ── Markdown escaping ───────────────────────────────────────────

    #[test]
    fn escapes_markdown_control_characters() {
        assert_eq!(escape_markdown("a_b"), "a\\_b");
        assert_eq!(escape_markdown("*bold*"), "\\*bold\\*");
        assert_eq!(escape_markdown("x~y`z"), "x\\~y\\`z");
        assert_eq!(escape_markdown("#1|2"), "\\#1\\|2");
    }

    #[test]
    fn escapes_backslash_itself() {
        assert_eq!(escape_markdown("a\\b"), "a\\\\b");
        assert_eq!(escape_markdown("\\_"), "\\\\\\_");
    }

    #[test]
    fn leaves_dots_and_brackets_alone() {
        assert_eq!(escape_markdown("v1.2.3 [ok] (fine)"), "v1.2.3 [ok] (fine)");
    }

    // ── Message splitting ───────────────────────────────────────────

    #[test]
    fn short_message_is_one_chunk() {
        let chunks = split_message("hello", 4096);
        assert_eq!(chunks, vec!["hello".to_string()]);
    }

    #[test]
    fn exact_limit_is_one_chunk() {
        let text = "a".repeat(4096);
        let chunks = split_message(&text, 4096);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn splits_on_newline_boundary() {
        let text = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&text, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(2000));
        assert_eq!(chunks[1], "b".repeat(3000));
    }

    #[test]
    fn splits_on_space_when_no_newline() {
        let text = format!("{} {}", "a".repeat(3000), "b".repeat(2000));
        let chunks = split_message(&text, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(3000));
        assert_eq!(chunks[1], "b".repeat(2000));
    }

    #[test]
    fn hard_cuts_unbroken_text() {
        let text = "a".repeat(5000);
        let chunks = split_message(&text, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_counts_characters_not_bytes() {
        // Cyrillic is two bytes per char; a byte-based cut would panic
        // or overshoot the limit.
        let text = "ф".repeat(5000);
        let chunks = split_message(&text, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 4096);
        assert_eq!(chunks[1].chars().count(), 904);
    }

    #[test]
    fn every_chunk_respects_the_limit() {
        let text = format!(
            "{}\n{} {}{}",
            "a".repeat(4000),
            "b".repeat(2000),
            "c".repeat(3000),
            "d".repeat(5000)
        );
        for chunk in split_message(&text, 4096) {
            assert!(chunk.chars().count() <= 4096);
            assert!(!chunk.is_empty());
        }
    }

    // ── Network error tests (expected to fail with no server) ───────

    #[tokio::test]
    async fn send_message_to_invalid_token_fails() {
        let result = api()
            .send_message(SendTarget::new(-1, None), "test")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn send_document_to_invalid_token_fails() {
        let result = api()
            .send_document(SendTarget::new(-1, None), "f.bin", vec![1, 2, 3])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn get_me_with_invalid_token_fails() {
        let result = api().get_me().await;
        assert!(result.is_err());
    }
}
