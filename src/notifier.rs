//! Webhook notifications (Discord, Slack, Gotify and friends).
//!
//! The message goes out under both `content` and `text` so the same body
//! renders on the common chat webhooks without per-backend handling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;

use crate::cycle::CycleReport;
use crate::types::{ContainerRecord, SkipReason, UpdateOutcome};

/// Outbound HTTP transport for notifications.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn post_json(&self, url: &str, payload: &Value) -> anyhow::Result<()>;
}

pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpSender {
    async fn post_json(&self, url: &str, payload: &Value) -> anyhow::Result<()> {
        self.client
            .post(url)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Updated,
    Failed,
    UpdateAvailable,
    DryRun,
    Undetermined,
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub content: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub status: Status,
    pub level: Level,
}

impl Notification {
    fn new(status: Status, level: Level, message: String) -> Self {
        Self {
            content: message.clone(),
            text: message,
            container: None,
            image: None,
            status,
            level,
        }
    }

    /// Message for one processed container; `None` when it was up to date.
    pub fn for_outcome(record: &ContainerRecord, outcome: &UpdateOutcome) -> Option<Self> {
        let name = &record.name;
        let image = &record.image;
        let (status, level, message) = match outcome {
            UpdateOutcome::Skipped(SkipReason::UpToDate) => return None,
            UpdateOutcome::Succeeded { .. } => (
                Status::Updated,
                Level::Info,
                format!("✅ Updated Docker container `{name}` ({image})"),
            ),
            UpdateOutcome::Failed(e) if e.container_absent() => (
                Status::Failed,
                Level::Error,
                format!(
                    "❌ Failed to update `{name}` ({image}): {e}. \
                     The container is no longer running and must be recreated manually."
                ),
            ),
            UpdateOutcome::Failed(e) => (
                Status::Failed,
                Level::Error,
                format!("❌ Failed to update `{name}` ({image}): {e}"),
            ),
            UpdateOutcome::Skipped(SkipReason::DryRun) => (
                Status::DryRun,
                Level::Info,
                format!("🔍 [DRY RUN] `{name}` ({image}) is out of date, would update."),
            ),
            UpdateOutcome::Skipped(SkipReason::AutoUpdateDisabled) => (
                Status::UpdateAvailable,
                Level::Warning,
                format!("⚠️ Update available for `{name}` ({image}), manual action required."),
            ),
            UpdateOutcome::Skipped(SkipReason::Undetermined(reason)) => (
                Status::Undetermined,
                Level::Warning,
                format!("⚠️ Could not check `{name}` ({image}) for updates: {reason}"),
            ),
        };

        let mut notification = Self::new(status, level, message);
        notification.container = Some(name.clone());
        notification.image = Some(image.to_string());
        Some(notification)
    }

    /// End-of-cycle summary; only sent when something changed or failed.
    pub fn summary(report: &CycleReport) -> Option<Self> {
        if report.updated.is_empty() && report.failed.is_empty() {
            return None;
        }
        let level = if report.failed.is_empty() {
            Level::Info
        } else {
            Level::Error
        };
        Some(Self::new(Status::Summary, level, report.summary_line()))
    }

    /// The cycle could not run at all, typically because the runtime is down.
    pub fn cycle_aborted(reason: &dyn std::fmt::Display) -> Self {
        Self::new(
            Status::Failed,
            Level::Error,
            format!("❌ Update check aborted: {reason}. Retrying at the next interval."),
        )
    }
}

pub struct Notifier {
    webhook: Option<String>,
    sender: Arc<dyn WebhookSender>,
}

impl Notifier {
    pub fn new(webhook: Option<String>, sender: Arc<dyn WebhookSender>) -> Self {
        Self { webhook, sender }
    }

    /// Deliver `notification`. Failures are logged and otherwise ignored.
    pub async fn send(&self, notification: &Notification) {
        let Some(url) = &self.webhook else {
            return;
        };
        let payload = match serde_json::to_value(notification) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode notification: {}", e);
                return;
            }
        };
        match self.sender.post_json(url, &payload).await {
            Ok(()) => debug!("Notification sent: {}", notification.text),
            Err(e) => warn!("Failed to send notification: {:#}", e),
        }
    }
}
