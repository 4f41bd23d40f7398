//! Operator notifications.
//!
//! Delivery is best-effort: a failed send is logged and reported as `false`,
//! never propagated into the trading loop.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{instrument, warn};

use crate::config::TelegramConfig;

/// Sink for human-readable status messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message`, returning whether it was accepted.
    async fn send(&self, message: &str) -> bool;
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API notifier.
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
    account_label: String,
}

impl TelegramNotifier {
    /// Build a notifier, or `None` when the bot token or chat is missing.
    pub fn from_config(config: &TelegramConfig) -> Result<Option<Self>> {
        if !config.is_enabled() {
            return Ok(None);
        }
        Self::with_base_url(
            &config.api_url,
            &config.bot_token,
            &config.chat_id,
            &config.account_label,
        )
        .map(Some)
    }

    pub fn with_base_url(
        base_url: &str,
        bot_token: &str,
        chat_id: &str,
        account_label: &str,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            account_label: account_label.to_string(),
        })
    }

    /// Messages go out with `parse_mode: HTML`, so markup characters in
    /// the label or body are escaped.
    fn format(&self, message: &str) -> String {
        if self.account_label.is_empty() {
            escape_html(message)
        } else {
            format!(
                "[{}] {}",
                escape_html(&self.account_label),
                escape_html(message)
            )
        }
    }

    async fn post(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let request = SendMessageRequest {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send Telegram message")?;

        let status = response.status();
        let body: SendMessageResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram response ({})", status))?;

        if !body.ok {
            anyhow::bail!(
                "Telegram API error {}: {}",
                status,
                body.description.unwrap_or_default()
            );
        }
        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[async_trait]
impl Notifier for TelegramNotifier {
    #[instrument(skip_all, name = "telegram_send")]
    async fn send(&self, message: &str) -> bool {
        let text = self.format(message);
        match self.post(&text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Telegram notification failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_posts_labelled_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "-100",
                "text": "[A1] hello",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::with_base_url(&server.uri(), "TOKEN", "-100", "A1").unwrap();
        assert!(notifier.send("hello").await);
    }

    #[tokio::test]
    async fn test_markup_characters_are_escaped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "text": "[A1] venue-b: order &lt;rejected&gt; &amp; closed",
                "parse_mode": "HTML",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::with_base_url(&server.uri(), "TOKEN", "-100", "A1").unwrap();
        assert!(notifier.send("venue-b: order <rejected> & closed").await);
    }

    #[tokio::test]
    async fn test_not_ok_reply_returns_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "ok": false,
                "description": "chat not found",
            })))
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::with_base_url(&server.uri(), "TOKEN", "-100", "").unwrap();
        assert!(!notifier.send("hello").await);
    }

    #[tokio::test]
    async fn test_unreachable_server_returns_false() {
        let notifier =
            TelegramNotifier::with_base_url("http://127.0.0.1:1", "TOKEN", "-100", "A1").unwrap();
        assert!(!notifier.send("hello").await);
    }

    #[test]
    fn test_disabled_without_credentials() {
        let config = TelegramConfig::default();
        assert!(TelegramNotifier::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_label_prefix_omitted_when_empty() {
        let notifier = TelegramNotifier::with_base_url("http://localhost", "T", "C", "").unwrap();
        assert_eq!(notifier.format("msg"), "msg");
    }
}
