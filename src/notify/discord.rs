use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;

use super::{MessageHandle, MessageSink};

/// Posts plain text through per-destination Discord webhooks. `?wait=true`
/// makes Discord return the created message, so the handle carries its id.
#[derive(Clone)]
pub struct DiscordSink {
    webhooks: BTreeMap<String, String>,
    client: Client,
    timeout: Duration,
}

#[derive(Deserialize)]
struct WebhookMessage {
    id: String,
}

impl DiscordSink {
    pub fn new(webhooks: BTreeMap<String, String>) -> Self {
        Self {
            webhooks,
            client: Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

#[async_trait::async_trait]
impl MessageSink for DiscordSink {
    async fn post(&self, destination: &str, text: &str) -> Result<MessageHandle> {
        let url = self
            .webhooks
            .get(destination)
            .ok_or_else(|| anyhow!("no webhook configured for destination '{destination}'"))?;

        let body = serde_json::json!({ "content": text });
        let rsp = self
            .client
            .post(format!("{url}?wait=true"))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("posting to '{destination}'"))?
            .error_for_status()
            .with_context(|| format!("webhook non-2xx for '{destination}'"))?;

        // Message id is informational; a body we can't parse is not a
        // delivery failure.
        let id = rsp.json::<WebhookMessage>().await.ok().map(|m| m.id);

        Ok(MessageHandle {
            destination: destination.to_string(),
            id,
        })
    }
}
