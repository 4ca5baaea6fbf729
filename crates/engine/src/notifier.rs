//! Outbound message delivery to Discord channels

use crate::config::DiscordConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Discord hard limit on message content length
pub const DISCORD_MAX_CONTENT: usize = 2000;

/// Logical destination for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Portfolio,
    Alpha,
    Alerts,
    Breaking,
    Calendar,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Portfolio,
        Channel::Alpha,
        Channel::Alerts,
        Channel::Breaking,
        Channel::Calendar,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Channel::Portfolio => "portfolio",
            Channel::Alpha => "alpha",
            Channel::Alerts => "alerts",
            Channel::Breaking => "breaking",
            Channel::Calendar => "calendar",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::Portfolio => "Portfolio",
            Channel::Alpha => "Alpha",
            Channel::Alerts => "Alerts",
            Channel::Breaking => "Breaking",
            Channel::Calendar => "Calendar",
        })
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message`; `Ok(false)` means nothing was sent
    async fn send(&self, channel: Channel, message: &str) -> anyhow::Result<bool>;
}

/// Split `content` into pieces of at most `max` characters, preferring line breaks
pub fn chunk_message(content: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in content.split_inclusive('\n') {
        let line_len = line.chars().count();

        if current_len + line_len <= max {
            current.push_str(line);
            current_len += line_len;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len <= max {
            current.push_str(line);
            current_len = line_len;
        } else {
            // single line longer than the limit, hard split on chars
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max) {
                chunks.push(piece.iter().collect());
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
    username: String,
}

/// Posts to Discord webhooks, one URL per channel with a default fallback
#[derive(Clone)]
pub struct DiscordWebhookNotifier {
    client: Client,
    config: DiscordConfig,
}

impl DiscordWebhookNotifier {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            client: crate::api::http_client(),
            config,
        }
    }

    async fn post(&self, url: &str, payload: &WebhookPayload<'_>) -> anyhow::Result<()> {
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();
        if status != StatusCode::NO_CONTENT && status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Discord webhook error {}: {}", status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for DiscordWebhookNotifier {
    async fn send(&self, channel: Channel, message: &str) -> anyhow::Result<bool> {
        let Some(url) = self.config.webhook_for(channel) else {
            warn!(channel = %channel, "No webhook configured for channel, message dropped");
            return Ok(false);
        };

        let chunks = chunk_message(message, DISCORD_MAX_CONTENT);
        for chunk in &chunks {
            let payload = WebhookPayload {
                content: chunk,
                username: format!("Alpha Playbook - {}", channel),
            };
            self.post(url, &payload).await?;
        }

        debug!(channel = %channel, parts = chunks.len(), "Discord message delivered");
        Ok(!chunks.is_empty())
    }
}

/// Writes messages to the log instead of delivering them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, channel: Channel, message: &str) -> anyhow::Result<bool> {
        info!(channel = %channel, "{}", message);
        Ok(true)
    }
}

/// Pick the webhook notifier when any webhook is configured, otherwise log only
pub fn build_notifier(config: &DiscordConfig, dry_run: bool) -> Arc<dyn Notifier> {
    if dry_run || !config.is_configured() {
        Arc::new(LogNotifier)
    } else {
        Arc::new(DiscordWebhookNotifier::new(config.clone()))
    }
}


#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records every message instead of sending it. While `failing` is set,
    /// every send errors like an unreachable webhook.
    #[derive(Default)]
    pub struct MemoryNotifier {
        pub sent: Mutex<Vec<(Channel, String)>>,
        pub failing: AtomicBool,
    }

    #[async_trait]
    impl Notifier for MemoryNotifier {
        async fn send(&self, channel: Channel, message: &str) -> anyhow::Result<bool> {
            if self.failing.load(Ordering::Relaxed) {
                anyhow::bail!("Discord webhook error 502: bad gateway");
            }
            self.sent.lock().push((channel, message.to_string()));
            Ok(true)
        }
    }
}
