//! Daemon configuration: defaults, then an optional TOML file, then
//! `CERTVOUCHER_`-prefixed environment variables (`__` separates sections,
//! e.g. `CERTVOUCHER_ISSUER__BASE_URL`).

use std::path::{Path, PathBuf};

use certvoucher_gateway::{IssuerConfig, NotifierConfig};
use certvoucher_types::EngineConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::DaemonError;

pub const ENV_PREFIX: &str = "CERTVOUCHER_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub issuer: IssuerConfig,
    pub notifier: NotifierConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("certvoucher.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

impl DaemonConfig {
    /// Load the layered configuration. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, DaemonError> {
        Self::from_figment(layered(path, ENV_PREFIX))
    }

    fn from_figment(figment: Figment) -> Result<Self, DaemonError> {
        let config: Self = figment.extract()?;
        config.engine.validate()?;
        Ok(config)
    }
}

fn layered(path: Option<&Path>, env_prefix: &str) -> Figment {
    let mut figment = Figment::new().merge(Serialized::defaults(DaemonConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed(env_prefix).split("__"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    // Unique prefix so the process environment never leaks into these tests.
    const TEST_PREFIX: &str = "CERTVOUCHER_CONFIG_TEST_UNSET_";

    #[test]
    fn defaults_without_file() {
        let config = DaemonConfig::from_figment(layered(None, TEST_PREFIX)).unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.engine.recycling.grace_period_secs, 3 * 24 * 60 * 60);
    }

    #[test]
    fn toml_overrides_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[database]
path = "/var/lib/certvoucher/vouchers.db"

[engine.recycling]
grace_period_secs = 86400

[issuer]
base_url = "https://ca.example.com/api"
token_env = "CA_TOKEN"

[notifier]
webhook_url = "https://requests.example.com/hooks/voucher"

[logging]
json = true
"#
        )
        .unwrap();

        let config = DaemonConfig::from_figment(layered(Some(file.path()), TEST_PREFIX)).unwrap();
        assert_eq!(config.database.path, PathBuf::from("/var/lib/certvoucher/vouchers.db"));
        assert_eq!(config.engine.recycling.grace_period_secs, 86_400);
        // Untouched fields in a partial section keep their defaults.
        assert_eq!(config.engine.recycling.interval_secs, EngineConfig::default().recycling.interval_secs);
        assert_eq!(config.issuer.base_url, "https://ca.example.com/api");
        assert_eq!(config.issuer.token_env.as_deref(), Some("CA_TOKEN"));
        assert_eq!(config.issuer.situation_path, IssuerConfig::default().situation_path);
        assert!(config.notifier.webhook_url.is_some());
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn invalid_engine_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine.allocation]\nmax_attempts = 0").unwrap();
        let err = DaemonConfig::from_figment(layered(Some(file.path()), TEST_PREFIX)).unwrap_err();
        assert!(matches!(err, DaemonError::Voucher(_)));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine.allocation]\nmax_attempts = \"many\"").unwrap();
        let err = DaemonConfig::from_figment(layered(Some(file.path()), TEST_PREFIX)).unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));
    }
}
