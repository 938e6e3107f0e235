use std::path::PathBuf;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::limits::*;
use crate::model::Ms;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("loading configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub sweeper: SweeperSettings,
    pub booking: BookingSettings,
    pub notifier: NotifierSettings,
    #[serde(default)]
    pub directory: DirectorySettings,
    pub observability: ObservabilitySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub bind: String,
    pub port: u16,
    /// Origin the emailed approve/reject links point at.
    pub public_url: String,
    pub max_connections: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub compact_threshold: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperSettings {
    pub interval_secs: u64,
    pub batch_size: usize,
    /// Bearer secret for `POST /cron/expire`. The endpoint refuses every call
    /// when unset.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingSettings {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierSettings {
    pub webhook_url: Option<String>,
    pub webhook_token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectorySettings {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilitySettings {
    pub metrics_port: Option<u16>,
    pub json_logs: bool,
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
    Config::builder()
        .set_default("server.bind", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("server.public_url", "http://localhost:8080")?
        .set_default("server.max_connections", 256)?
        .set_default("storage.data_dir", "./data")?
        .set_default("storage.compact_threshold", DEFAULT_COMPACT_THRESHOLD)?
        .set_default("sweeper.interval_secs", DEFAULT_SWEEP_INTERVAL_SECS)?
        .set_default("sweeper.batch_size", DEFAULT_SWEEP_BATCH as u64)?
        .set_default("booking.ttl_secs", (DEFAULT_BOOKING_TTL_MS / 1000) as u64)?
        .set_default("notifier.timeout_secs", 10)?
        .set_default("observability.json_logs", false)
}

impl Settings {
    /// Defaults, then `tutorslot.toml` if present, then `TUTORSLOT__*`
    /// environment variables (e.g. `TUTORSLOT__SERVER__PORT=9000`). A `.env`
    /// file is read into the environment first.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let builder = defaults()?
            .add_source(File::with_name("tutorslot").required(false))
            .add_source(
                Environment::with_prefix("TUTORSLOT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sweeper.batch_size == 0 || self.sweeper.batch_size > MAX_SWEEP_BATCH {
            return Err(ConfigError::Invalid("sweeper.batch_size must be 1..=500"));
        }
        if self.sweeper.interval_secs == 0 {
            return Err(ConfigError::Invalid("sweeper.interval_secs must be positive"));
        }
        if self
            .sweeper
            .secret
            .as_deref()
            .is_some_and(|secret| secret.trim().is_empty())
        {
            return Err(ConfigError::Invalid("sweeper.secret must not be empty"));
        }
        if self.booking.ttl_secs == 0 {
            return Err(ConfigError::Invalid("booking.ttl_secs must be positive"));
        }
        if self.server.max_connections == 0 {
            return Err(ConfigError::Invalid("server.max_connections must be positive"));
        }
        if self.notifier.webhook_url.is_some() && self.notifier.webhook_token.is_none() {
            return Err(ConfigError::Invalid(
                "notifier.webhook_token is required with notifier.webhook_url",
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.storage.data_dir.join("tutorslot.wal")
    }

    pub fn booking_ttl_ms(&self) -> Ms {
        self.booking.ttl_secs as Ms * 1000
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper.interval_secs)
    }

    pub fn notifier_timeout(&self) -> Duration {
        Duration::from_secs(self.notifier.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> Result<Settings, ConfigError> {
        Settings::from_builder(defaults()?.add_source(File::from_str(toml, FileFormat::Toml)))
    }

    #[test]
    fn defaults_are_complete() {
        let s = from_toml("").unwrap();
        assert_eq!(s.listen_addr(), "0.0.0.0:8080");
        assert_eq!(s.sweeper.batch_size, 50);
        assert_eq!(s.sweep_interval(), Duration::from_secs(300));
        assert_eq!(s.booking_ttl_ms(), DEFAULT_BOOKING_TTL_MS);
        assert_eq!(s.storage.compact_threshold, 1000);
        assert!(s.sweeper.secret.is_none());
        assert!(s.notifier.webhook_url.is_none());
        assert!(s.directory.path.is_none());
        assert!(s.observability.metrics_port.is_none());
        assert_eq!(s.wal_path(), PathBuf::from("./data/tutorslot.wal"));
    }

    #[test]
    fn file_overrides_defaults() {
        let s = from_toml(
            r#"
            [server]
            port = 9000
            public_url = "https://tutor.example.com"

            [sweeper]
            secret = "s3cret"
            batch_size = 10

            [notifier]
            webhook_url = "https://mail.example.com/hook"
            webhook_token = "t"

            [directory]
            path = "directory.json"
            "#,
        )
        .unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.public_url, "https://tutor.example.com");
        assert_eq!(s.sweeper.secret.as_deref(), Some("s3cret"));
        assert_eq!(s.sweeper.batch_size, 10);
        assert_eq!(s.directory.path, Some(PathBuf::from("directory.json")));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            from_toml("[sweeper]\nbatch_size = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            from_toml("[sweeper]\nbatch_size = 501"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            from_toml("[notifier]\nwebhook_url = \"https://x\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            from_toml("[server]\nport = \"not a port\""),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn rejects_blank_cron_secret() {
        for secret in ["\"\"", "\"   \""] {
            assert!(matches!(
                from_toml(&format!("[sweeper]\nsecret = {secret}")),
                Err(ConfigError::Invalid("sweeper.secret must not be empty"))
            ));
        }
    }
}
