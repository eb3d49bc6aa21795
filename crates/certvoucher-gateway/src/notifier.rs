//! Outbound completion signal to the request module.
//!
//! Called after a voucher reaches USED. Delivery failures are reported to the
//! caller but never undo the voucher transition.

use std::sync::Arc;

use async_trait::async_trait;
use certvoucher_types::{RequestId, VoucherId};
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::{config::NotifierConfig, error::GatewayError};

/// How the linked request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionOutcome {
    /// The certificate was issued to the request's client.
    Issued,
    /// The voucher was consumed by someone else; the request needs a new one.
    OwnershipConflict,
}

impl CompletionOutcome {
    /// Progress string recorded on the request.
    #[must_use]
    pub fn progress(&self) -> &'static str {
        match self {
            Self::Issued => "CERTIFICATE_ISSUED",
            Self::OwnershipConflict => "VOUCHER_USED_BY_THIRD_PARTY",
        }
    }
}

/// Payload delivered to the request module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionNotice {
    pub request_id: RequestId,
    pub voucher_id: VoucherId,
    pub voucher_code: String,
    pub completed_at: DateTime<Utc>,
    pub outcome: CompletionOutcome,
    pub progress: String,
}

impl CompletionNotice {
    #[must_use]
    pub fn new(
        request_id: RequestId,
        voucher_id: VoucherId,
        voucher_code: impl Into<String>,
        completed_at: DateTime<Utc>,
        outcome: CompletionOutcome,
    ) -> Self {
        Self {
            request_id,
            voucher_id,
            voucher_code: voucher_code.into(),
            completed_at,
            outcome,
            progress: outcome.progress().to_string(),
        }
    }
}

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), GatewayError>;
}

/// POSTs each notice as JSON to a webhook.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: Url, config: &NotifierConfig) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = config.resolve_token() {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|_| {
                    GatewayError::Configuration("notifier token is not a valid header value".into())
                })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let http = config.transport().build_client(headers)?;
        Ok(Self { http, url })
    }
}

#[async_trait]
impl CompletionNotifier for WebhookNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), GatewayError> {
        debug!(url = %self.url, request = %notice.request_id, "POST completion notice");
        let resp = self.http.post(self.url.clone()).json(notice).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Records notices in the log only. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl CompletionNotifier for TracingNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), GatewayError> {
        info!(
            request = %notice.request_id,
            voucher = %notice.voucher_code,
            outcome = ?notice.outcome,
            progress = %notice.progress,
            "Request completion"
        );
        Ok(())
    }
}

/// Webhook notifier when a URL is configured, tracing-only otherwise.
pub fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn CompletionNotifier>, GatewayError> {
    match config.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(raw) => Ok(Arc::new(WebhookNotifier::new(Url::parse(raw)?, config)?)),
        None => Ok(Arc::new(TracingNotifier)),
    }
}
