use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::EventsConfig;

const WEB_HOOK_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSCRIBER_BUFFER: usize = 64;

/// Payload of the "build finished" notification
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BuildFinishedEvent {
    #[serde(rename = "uuid")]
    pub key: String,
    /// True iff the build ended in `succeed`, whatever its score
    pub succeed: bool,
}

/// Outbound side of the event channel used by the build master
pub trait BuildEvents: Send + Sync + 'static {
    /// Publishes one event. `web_hook_url` is the target the job registered, if any.
    fn publish_build_finished(
        &self,
        event: BuildFinishedEvent,
        web_hook_url: Option<String>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// In-process fan-out plus HTTP web hooks
pub struct EventHub {
    sender: broadcast::Sender<BuildFinishedEvent>,
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl EventHub {
    pub fn new(config: &EventsConfig) -> anyhow::Result<Self> {
        let (sender, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        let client = reqwest::Client::builder()
            .timeout(WEB_HOOK_TIMEOUT)
            .build()
            .context("Failed to build web hook client")?;

        Ok(Self {
            sender,
            client,
            webhook_url: config.webhook_url.clone(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BuildFinishedEvent> {
        self.sender.subscribe()
    }

    async fn post_web_hook(&self, url: &str, event: &BuildFinishedEvent) -> anyhow::Result<()> {
        let response = self
            .client
            .post(url)
            .json(event)
            .send()
            .await
            .with_context(|| format!("web hook {url} unreachable"))?;

        let status = response.status();
        anyhow::ensure!(status.is_success(), "web hook {url} answered {status}");
        Ok(())
    }
}

impl BuildEvents for EventHub {
    async fn publish_build_finished(
        &self,
        event: BuildFinishedEvent,
        web_hook_url: Option<String>,
    ) -> anyhow::Result<()> {
        match self.sender.send(event.clone()) {
            Ok(n) => log::debug!("Build {} event delivered to {n} subscribers", event.key),
            Err(_) => log::debug!("No subscribers for build {} event", event.key),
        }

        let targets = self.webhook_url.as_deref().into_iter().chain(web_hook_url.as_deref());
        let mut first_error = None;
        for url in targets {
            match self.post_web_hook(url, &event).await {
                Ok(()) => log::debug!("Build {} event posted to {url}", event.key),
                Err(e) => {
                    log::warn!("Build {} event not delivered: {e:#}", event.key);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
