//! Telegram Bot API alerts

use serde::Serialize;

use super::AlertSink;
use crate::{Error, Result};

const API_BASE: &str = "https://api.telegram.org/bot";

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    disable_notification: Option<bool>,
}

/// Alert sink that messages a single Telegram chat
#[derive(Clone)]
pub struct TelegramSink {
    client: reqwest::Client,
    token: String,
    chat_id: i64,
}

impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink")
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

impl TelegramSink {
    /// Create a sink for a bot token and target chat
    #[must_use]
    pub fn new(token: String, chat_id: i64) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            chat_id,
        }
    }

    /// Send one message and wait for the response
    ///
    /// # Errors
    ///
    /// Returns error if the API request fails
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let url = format!("{API_BASE}{}/sendMessage", self.token);
        let request = SendMessageRequest {
            chat_id: self.chat_id,
            text,
            disable_notification: None,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Telegram API error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "Telegram API returned {status}: {body}"
            )));
        }
        Ok(())
    }
}

impl AlertSink for TelegramSink {
    fn notify(&self, text: String) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime, dropping telegram alert");
            return;
        };

        let sink = self.clone();
        handle.spawn(async move {
            if let Err(e) = sink.send_message(&text).await {
                tracing::warn!(error = %e, chat_id = sink.chat_id, "telegram alert failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_token() {
        let sink = TelegramSink::new("123:secret".to_string(), 42);
        let debug = format!("{sink:?}");
        assert!(debug.contains("42"));
        assert!(!debug.contains("secret"));
    }
}
