use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use super::Notifier;
use crate::config::TelegramConfig;
use crate::logutil::redact;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Bot API envelope: `{"ok": bool, "description": "...", "result": ...}`.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

/// Telegram Bot API client.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
    parse_mode: String,
    timeout: Duration,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            parse_mode: config.parse_mode.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn call(&self, request: reqwest::RequestBuilder, method: &str) -> Result<ApiResponse> {
        let secs = self.timeout.as_secs();
        let response = timeout(self.timeout, request.send())
            .await
            .map_err(|_| anyhow!("Telegram {} timed out after {}s", method, secs))?
            .map_err(|e| anyhow!("Telegram {} failed: {}", method, redact(&e.to_string(), &self.bot_token)))?;

        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Telegram {} returned {} with unreadable body: {}", method, status, e))?;
        if !status.is_success() || !body.ok {
            return Err(anyhow!(
                "Telegram {} rejected ({}): {}",
                method,
                status,
                body.description.as_deref().unwrap_or("no description")
            ));
        }
        Ok(body)
    }
}

impl Notifier for TelegramNotifier {
    async fn deliver(&self, text: &str) -> Result<()> {
        let payload = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: &self.parse_mode,
        };
        let request = self.client.post(self.method_url("sendMessage")).json(&payload);
        self.call(request, "sendMessage").await?;
        debug!("Telegram message delivered ({} chars)", text.chars().count());
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let request = self.client.get(self.method_url("getMe"));
        let body = self.call(request, "getMe").await?;
        let username = body
            .result
            .as_ref()
            .and_then(|r| r.get("username"))
            .and_then(|u| u.as_str())
            .unwrap_or("unknown");
        info!("Telegram bot connected: @{}", username);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_and_payload_shape() {
        let config = TelegramConfig {
            bot_token: "123:ABC".into(),
            chat_id: "-100200".into(),
            api_base: "https://api.telegram.org/".into(),
            ..TelegramConfig::default()
        };
        let notifier = TelegramNotifier::new(&config);
        assert_eq!(
            notifier.method_url("sendMessage"),
            "https://api.telegram.org/bot123:ABC/sendMessage"
        );
        let payload = SendMessage {
            chat_id: "-100200",
            text: "hi",
            parse_mode: "HTML",
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            serde_json::json!({"chat_id": "-100200", "text": "hi", "parse_mode": "HTML"})
        );
    }

    #[tokio::test]
    async fn unreachable_api_fails_without_leaking_token() {
        let config = TelegramConfig {
            bot_token: "123:SECRET".into(),
            chat_id: "1".into(),
            api_base: "http://127.0.0.1:9".into(),
            timeout_seconds: 2,
            ..TelegramConfig::default()
        };
        let err = TelegramNotifier::new(&config)
            .deliver("hello")
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("SECRET"));
    }
}
