//! Webhook alert delivery (§7: "any log at >=WARNING is additionally
//! delivered to configured Slack/Discord sinks"; §SPEC_FULL 10.1.1).
//!
//! Formatting and rotation of the underlying log file are out of scope
//! (§1 non-goals); this module only owns the *delivery* of already-formatted
//! alert lines to external chat webhooks.

use async_trait::async_trait;
use tracing::Level;

/// An external destination for >=WARNING log lines.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, origin: &str, level: Level, text: &str);
}

/// No-op sink used when no webhook URL is configured.
pub struct NullSink;

#[async_trait]
impl AlertSink for NullSink {
    async fn send(&self, _origin: &str, _level: Level, _text: &str) {}
}

/// Posts a Slack-compatible `{"text": ...}` payload.
pub struct SlackSink {
    client: reqwest::Client,
    url: String,
}

impl SlackSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl AlertSink for SlackSink {
    async fn send(&self, origin: &str, level: Level, text: &str) {
        let body = serde_json::json!({
            "text": format!("[{level}] {origin}: {text}"),
        });
        if let Err(err) = self
            .client
            .post(&self.url)
            .json(&body)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
        {
            tracing::debug!(%err, "slack webhook delivery failed");
        }
    }
}

/// Posts a Discord-compatible `{"content": ...}` payload.
pub struct DiscordSink {
    client: reqwest::Client,
    url: String,
}

impl DiscordSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl AlertSink for DiscordSink {
    async fn send(&self, origin: &str, level: Level, text: &str) {
        let body = serde_json::json!({
            "content": format!("**[{level}]** {origin}: {text}"),
        });
        if let Err(err) = self
            .client
            .post(&self.url)
            .json(&body)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
        {
            tracing::debug!(%err, "discord webhook delivery failed");
        }
    }
}

/// Fans a single alert out to every configured sink. Built from
/// `Settings::webhook_slack`/`webhook_discord` at startup.
pub struct FanoutSink {
    sinks: Vec<Box<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn from_settings(slack: Option<String>, discord: Option<String>) -> Self {
        let mut sinks: Vec<Box<dyn AlertSink>> = Vec::new();
        if let Some(url) = slack.filter(|u| !u.is_empty()) {
            sinks.push(Box::new(SlackSink::new(url)));
        }
        if let Some(url) = discord.filter(|u| !u.is_empty()) {
            sinks.push(Box::new(DiscordSink::new(url)));
        }
        Self { sinks }
    }
}

#[async_trait]
impl AlertSink for FanoutSink {
    async fn send(&self, origin: &str, level: Level, text: &str) {
        for sink in &self.sinks {
            sink.send(origin, level, text).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_sink_is_inert() {
        NullSink.send("daemon", Level::WARN, "test").await;
    }

    #[test]
    fn fanout_with_no_urls_has_no_sinks() {
        let fanout = FanoutSink::from_settings(None, None);
        assert!(fanout.sinks.is_empty());
    }

    #[test]
    fn fanout_skips_empty_urls() {
        let fanout = FanoutSink::from_settings(Some(String::new()), Some(String::new()));
        assert!(fanout.sinks.is_empty());
    }
}
