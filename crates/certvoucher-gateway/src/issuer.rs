//! External certification authority client.
//!
//! One GET per voucher code against the configured situation endpoint; the
//! body goes through `normalize_payload` and nothing else.

use async_trait::async_trait;
use certvoucher_types::IssuerSituation;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::{config::IssuerConfig, error::GatewayError, payload::normalize_payload};

/// Largest error body kept in a [`GatewayError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Source of truth for "was this voucher used, and by whom".
#[async_trait]
pub trait IssuerClient: Send + Sync {
    /// Current issuance situation of `code` at the authority.
    ///
    /// A well-formed answer with a failing query status is `Ok` with a
    /// failed situation; transport, HTTP and parse failures are `Err`.
    async fn query_situation(&self, code: &str) -> Result<IssuerSituation, GatewayError>;
}

/// HTTP implementation of [`IssuerClient`].
pub struct HttpIssuerClient {
    http: reqwest::Client,
    config: IssuerConfig,
}

impl HttpIssuerClient {
    /// Build a client from its config, resolving the bearer token.
    pub fn new(config: IssuerConfig) -> Result<Self, GatewayError> {
        Url::parse(&config.base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = config.resolve_token() {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|_| {
                    GatewayError::Configuration("issuer token is not a valid header value".into())
                })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = config.transport().build_client(headers)?;
        Ok(Self { http, config })
    }

    /// Use a pre-built `reqwest::Client` (tests, shared pools).
    pub fn with_client(http: reqwest::Client, config: IssuerConfig) -> Self {
        Self { http, config }
    }

    fn transport_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout {
                timeout_secs: self.config.transport().timeout_secs(),
            }
        } else {
            GatewayError::Transport(err)
        }
    }
}

#[async_trait]
impl IssuerClient for HttpIssuerClient {
    async fn query_situation(&self, code: &str) -> Result<IssuerSituation, GatewayError> {
        let url = self.config.situation_url(code)?;
        debug!(code, %url, "GET issuer situation");

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let raw = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body)
                .map_err(|e| GatewayError::malformed(format!("body is not JSON: {e}")))?
        };
        normalize_payload(raw)
    }
}
