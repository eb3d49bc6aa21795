//! Connection settings for the outbound collaborators.
//!
//! Tokens may be given inline or through the name of an environment variable;
//! they are only turned into [`SecretString`]s when a client is built.

use std::{fmt, path::PathBuf, time::Duration};

use certvoucher_types::constants;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::GatewayError,
    transport::{TlsMode, TransportConfig},
};

/// Placeholder replaced by the (percent-encoded) voucher code.
pub const CODE_PLACEHOLDER: &str = "{code}";

/// External certification authority endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    pub base_url: String,
    /// Path template of the situation endpoint. Without a `{code}` segment the
    /// code is sent as a `code` query parameter.
    pub situation_path: String,
    pub token: Option<String>,
    /// Environment variable holding the token; wins over `token`.
    pub token_env: Option<String>,
    pub timeout_secs: u64,
    /// Extra CA certificate (PEM) to trust.
    pub ca_cert: Option<PathBuf>,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            situation_path: "/vouchers/{code}/situation".into(),
            token: None,
            token_env: None,
            timeout_secs: constants::DEFAULT_ISSUER_TIMEOUT_SECS,
            ca_cert: None,
        }
    }
}

impl fmt::Debug for IssuerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerConfig")
            .field("base_url", &self.base_url)
            .field("situation_path", &self.situation_path)
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("token_env", &self.token_env)
            .field("timeout_secs", &self.timeout_secs)
            .field("ca_cert", &self.ca_cert)
            .finish()
    }
}

impl IssuerConfig {
    pub fn resolve_token(&self) -> Option<SecretString> {
        resolve_token(self.token.as_deref(), self.token_env.as_deref())
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: self
                .ca_cert
                .clone()
                .map_or(TlsMode::System, TlsMode::CustomCa),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
        }
    }

    /// Full situation URL for one voucher code.
    pub fn situation_url(&self, code: &str) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&self.base_url)?;
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                GatewayError::Configuration(format!("{} cannot be a base URL", self.base_url))
            })?;
            segments.pop_if_empty();
            for segment in self.situation_path.split('/').filter(|s| !s.is_empty()) {
                if segment == CODE_PLACEHOLDER {
                    segments.push(code);
                } else {
                    segments.push(segment);
                }
            }
        }
        if !self.situation_path.contains(CODE_PLACEHOLDER) {
            url.query_pairs_mut().append_pair("code", code);
        }
        Ok(url)
    }
}

/// Request module webhook. Without a URL, completions are only logged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub webhook_url: Option<String>,
    pub token: Option<String>,
    pub token_env: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            token: None,
            token_env: None,
            timeout_secs: 10,
        }
    }
}

impl fmt::Debug for NotifierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierConfig")
            .field("webhook_url", &self.webhook_url)
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("token_env", &self.token_env)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl NotifierConfig {
    pub fn resolve_token(&self) -> Option<SecretString> {
        resolve_token(self.token.as_deref(), self.token_env.as_deref())
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig::default().with_timeout(Duration::from_secs(self.timeout_secs.max(1)))
    }
}

fn resolve_token(inline: Option<&str>, env_name: Option<&str>) -> Option<SecretString> {
    if let Some(name) = env_name {
        if let Ok(val) = std::env::var(name) {
            if !val.is_empty() {
                return Some(SecretString::from(val));
            }
        }
    }
    inline
        .filter(|t| !t.is_empty())
        .map(|t| SecretString::from(t.to_string()))
}
