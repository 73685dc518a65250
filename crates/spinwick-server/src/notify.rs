use async_trait::async_trait;
use serde::Serialize;
use spinwick_core::PullRequest;
use tracing::{debug, error, warn};

use crate::config::NotifyConfig;

const NOTIFY_USERNAME: &str = "SpinWick";

/// Escalation channel for reportable failures. Implementations must never
/// fail the calling workflow; delivery problems are logged and swallowed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn report_failure(
        &self,
        title: &str,
        pr: &PullRequest,
        error: &anyhow::Error,
        additional_fields: &[(String, String)],
    );
}

#[derive(Debug, Serialize)]
struct WebhookRequest {
    username: String,
    text: String,
}

pub struct OperatorWebhookNotifier {
    http: reqwest::Client,
    webhook_url: String,
    footer: String,
}

impl OperatorWebhookNotifier {
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url: config.webhook_url.clone(),
            footer: config.footer.clone(),
        }
    }

    async fn send(&self, text: String) -> anyhow::Result<()> {
        let response = self
            .http
            .post(&self.webhook_url)
            .json(&WebhookRequest {
                username: NOTIFY_USERNAME.to_owned(),
                text,
            })
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let contents = response.text().await.unwrap_or_default();
            anyhow::bail!("received non-200 status code {status} posting to operator webhook: {contents}");
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for OperatorWebhookNotifier {
    async fn report_failure(
        &self,
        title: &str,
        pr: &PullRequest,
        failure: &anyhow::Error,
        additional_fields: &[(String, String)],
    ) {
        if self.webhook_url.is_empty() {
            warn!("no operator webhook URL set: unable to send message");
            return;
        }
        debug!(message = title, "sending operator escalation");

        let mut text = format!(
            "{title}\n---\nError: {failure:#}\nRepository: {}/{}\nPull Request: {} [ status={} ]\nURL: {}\n",
            pr.repo_owner, pr.repo_name, pr.number, pr.state, pr.url,
        );
        for (key, value) in additional_fields {
            text.push_str(&format!("{key}: {value}\n"));
        }
        text.push_str(&self.footer);

        if let Err(err) = self.send(text).await {
            error!(error = %err, "unable to post to operator webhook");
        }
    }
}
