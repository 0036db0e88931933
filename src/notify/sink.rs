use std::fmt::{Display, Formatter};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// Broadcast recipients: discipline names only.
    Summary,
    /// Private recipients: names plus the changed values.
    Detail,
}

impl Display for Audience {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Audience::Summary => write!(f, "summary"),
            Audience::Detail => write!(f, "detail"),
        }
    }
}

/// One delivery channel for one audience. The orchestrator only sees
/// success or failure; transport details stay behind this seam.
#[async_trait]
pub trait NotifySink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, audience: Audience, text: &str) -> Result<()>;
}

pub struct StdoutSink;

#[async_trait]
impl NotifySink for StdoutSink {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn deliver(&self, audience: Audience, text: &str) -> Result<()> {
        println!("--- {audience} ---\n{text}");
        Ok(())
    }
}

/// Telegram bot `sendMessage` delivery to one chat.
pub struct TelegramSink {
    client: Client,
    bot_token: String,
    chat_id: String,
    parse_mode: String,
}

impl TelegramSink {
    pub fn new(
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
        parse_mode: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .user_agent("gradewatch/0.1")
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build Telegram HTTP client");
        Self {
            client,
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            parse_mode: parse_mode.into(),
        }
    }
}

#[async_trait]
impl NotifySink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, audience: Audience, text: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        self.client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": self.parse_mode,
            }))
            .send()
            .await?
            .error_for_status()?;
        debug!(%audience, chat = %self.chat_id, "telegram message sent");
        Ok(())
    }
}
