use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::audit::{FailureStage, PageConfig};
use crate::config::{NOTIFY_TIMEOUT_SECS, SLACK_ICON_EMOJI, SLACK_USERNAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Where a notification came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationContext {
    pub page_id: Option<String>,
    pub url: Option<String>,
    pub stage: Option<FailureStage>,
}

impl NotificationContext {
    pub fn for_page(page: &PageConfig) -> Self {
        Self {
            page_id: Some(page.id.clone()),
            url: Some(page.url.clone()),
            stage: None,
        }
    }

    pub fn with_stage(mut self, stage: FailureStage) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// Alert delivery. Best effort: implementations swallow their own failures.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, severity: Severity, message: &str, context: &NotificationContext);
}

/// Sink used when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, severity: Severity, message: &str, context: &NotificationContext) {
        match severity {
            Severity::Error => error!(page_id = ?context.page_id, stage = ?context.stage, "{}", message),
            Severity::Warning => warn!(page_id = ?context.page_id, "{}", message),
            Severity::Info => info!(page_id = ?context.page_id, "{}", message),
        }
    }
}

/// Posts alerts to a Slack incoming webhook.
pub struct SlackWebhookSink {
    client: reqwest::Client,
    webhook_url: String,
    min_severity: Severity,
}

impl SlackWebhookSink {
    pub fn new(webhook_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(NOTIFY_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            min_severity: Severity::Warning,
        })
    }
}

impl NotificationSink for SlackWebhookSink {
    fn notify(&self, severity: Severity, message: &str, context: &NotificationContext) {
        if severity < self.min_severity {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, dropping Slack alert: {}", message);
            return;
        };

        let payload = slack_payload(severity, message, context, Utc::now());
        let client = self.client.clone();
        let url = self.webhook_url.clone();
        handle.spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!("Slack webhook returned {}", resp.status()),
                Err(e) => warn!("Failed to send Slack message: {}", e),
            }
        });
    }
}

/// Block-kit message body for one alert.
pub fn slack_payload(
    severity: Severity,
    message: &str,
    context: &NotificationContext,
    at: DateTime<Utc>,
) -> serde_json::Value {
    let header = match severity {
        Severity::Error => "🚨 Lighthouse audit error",
        Severity::Warning => "⚠️ Lighthouse audit warning",
        Severity::Info => "ℹ️ Lighthouse audit",
    };

    let mut context_elements = Vec::new();
    if let Some(url) = &context.url {
        context_elements.push(serde_json::json!({
            "type": "mrkdwn",
            "text": format!(":page_facing_up: *Page:* `{}`", url),
        }));
    }
    if let Some(stage) = &context.stage {
        context_elements.push(serde_json::json!({
            "type": "mrkdwn",
            "text": format!("⚙️ *Stage:* `{}`", stage.as_str()),
        }));
    }

    let mut blocks = vec![
        serde_json::json!({
            "type": "header",
            "text": {"type": "plain_text", "text": header, "emoji": true}
        }),
        serde_json::json!({
            "type": "section",
            "fields": [{"type": "mrkdwn", "text": format!("*Timestamp:*\n{}", at.to_rfc3339())}]
        }),
        serde_json::json!({"type": "divider"}),
        serde_json::json!({
            "type": "section",
            "text": {"type": "mrkdwn", "text": format!("*Message:*\n```{}```", message)}
        }),
    ];
    if !context_elements.is_empty() {
        blocks.push(serde_json::json!({"type": "context", "elements": context_elements}));
    }

    serde_json::json!({
        "username": SLACK_USERNAME,
        "icon_emoji": SLACK_ICON_EMOJI,
        "text": format!("[{}] {}", severity.as_str(), message),
        "blocks": blocks,
    })
}
