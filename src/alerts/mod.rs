//! Operator alerting
//!
//! Alerts are human-readable one-liners about fleet events. Delivery is
//! best-effort: `notify` never blocks the caller and errors are logged,
//! never propagated.

pub mod telegram;
pub mod webhook;

use std::sync::Arc;

pub use telegram::TelegramSink;
pub use webhook::WebhookSink;

use crate::config::AlertsConfig;

/// Receiver of operator-facing event notifications
pub trait AlertSink: Send + Sync + std::fmt::Debug {
    /// Deliver an alert without waiting for the outcome
    fn notify(&self, text: String);
}

/// Sink that only writes alerts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn notify(&self, text: String) {
        tracing::info!(alert = %text, "fleet alert");
    }
}

/// Sink that forwards every alert to several others
#[derive(Debug, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutSink {
    /// Create a fan-out over the given sinks
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    /// Number of downstream sinks
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether there are no downstream sinks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AlertSink for FanoutSink {
    fn notify(&self, text: String) {
        for sink in &self.sinks {
            sink.notify(text.clone());
        }
    }
}

/// Build the alert sink described by the configuration
///
/// Always logs; webhook and Telegram delivery are added when configured.
#[must_use]
pub fn from_config(config: &AlertsConfig) -> Arc<dyn AlertSink> {
    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogSink)];

    if let Some(url) = &config.webhook_url {
        tracing::info!(url = %url, "webhook alerts enabled");
        sinks.push(Arc::new(WebhookSink::new(url.clone())));
    }

    match (&config.telegram_token, config.telegram_chat_id) {
        (Some(token), Some(chat_id)) => {
            tracing::info!(chat_id, "telegram alerts enabled");
            sinks.push(Arc::new(TelegramSink::new(token.clone(), chat_id)));
        }
        (Some(_), None) => {
            tracing::warn!("telegram token set without a chat id, telegram alerts disabled");
        }
        _ => {}
    }

    Arc::new(FanoutSink::new(sinks))
}
