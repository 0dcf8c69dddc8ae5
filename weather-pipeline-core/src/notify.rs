use std::fmt::Debug;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AlertConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Retry,
    Failure,
}

/// Something worth telling a human about.
#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: AlertKind,
    pub pipeline: String,
    pub run_id: String,
    pub stage: &'static str,
    pub attempt: u32,
    pub error: String,
}

impl Alert {
    pub fn subject(&self) -> String {
        match self.kind {
            AlertKind::Retry => format!(
                "[{}] Retry: stage {} attempt {} of run {}",
                self.pipeline, self.stage, self.attempt, self.run_id
            ),
            AlertKind::Failure => format!(
                "[{}] Failed: stage {} of run {}",
                self.pipeline, self.stage, self.run_id
            ),
        }
    }

    fn html(&self) -> String {
        format!(
            "<p>Pipeline <b>{}</b>, run <code>{}</code></p>\
             <p>Stage <b>{}</b> failed on attempt {}:</p>\
             <pre>{}</pre>",
            self.pipeline,
            self.run_id,
            self.stage,
            self.attempt,
            escape_html(&self.error)
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync + Debug {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: String,
    html: String,
}

/// Sends alerts through a transactional-email HTTP API.
///
/// Honours the `email_on_retry` / `email_on_failure` toggles. Without an API
/// key the alert is only logged.
#[derive(Debug, Clone)]
pub struct EmailNotifier {
    config: AlertConfig,
    http: Client,
}

impl EmailNotifier {
    pub fn new(config: AlertConfig) -> Self {
        Self { config, http: Client::new() }
    }

    fn wants(&self, kind: AlertKind) -> bool {
        let enabled = match kind {
            AlertKind::Retry => self.config.email_on_retry,
            AlertKind::Failure => self.config.email_on_failure,
        };
        enabled && !self.config.email.is_empty()
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        if !self.wants(alert.kind) {
            return Ok(());
        }

        let api_key = match self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => key,
            None => {
                warn!(
                    to = ?self.config.email,
                    subject = %alert.subject(),
                    error = %alert.error,
                    "No email API key configured, alert logged only"
                );
                return Ok(());
            }
        };

        let request = EmailRequest {
            from: &self.config.from,
            to: &self.config.email,
            subject: alert.subject(),
            html: alert.html(),
        };

        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send alert email")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!("Failed to send alert email ({status}): {error_text}");
        }

        info!(to = ?self.config.email, subject = %alert.subject(), "Alert email sent");
        Ok(())
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
