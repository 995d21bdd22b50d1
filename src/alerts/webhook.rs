//! Generic JSON webhook alerts
//!
//! Posts `{"text": "..."}`, which Slack, Mattermost and most chat
//! incoming-webhook endpoints accept as-is.

use serde::Serialize;

use super::AlertSink;
use crate::{Error, Result};

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

/// Alert sink that POSTs to a webhook URL
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// Create a sink for the given URL
    #[must_use]
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    /// Deliver one alert and wait for the response
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the endpoint answers non-2xx
    pub async fn deliver(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { text })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl AlertSink for WebhookSink {
    fn notify(&self, text: String) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime, dropping webhook alert");
            return;
        };

        let sink = self.clone();
        handle.spawn(async move {
            if let Err(e) = sink.deliver(&text).await {
                tracing::warn!(error = %e, "webhook alert failed");
            }
        });
    }
}
