use crate::api::SessionSettings;
use crate::coordinator::PollSettings;
use crate::model::{GatewayHost, DEFAULT_WS_PORT};
use crate::retry::RetryPolicy;
use config::{Config, ConfigError};
use std::time::Duration;

/// Exporter configuration, read from `WINET_*` environment variables.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Settings {
    pub host: String,
    pub ws_port: u16,
    pub lang: String,
    pub connect_attempts: u32,
    pub connect_retry_delay_secs: u64,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub poll_interval_secs: u64,
    /// Defaults to ten times `poll_interval_secs`.
    pub error_interval_secs: Option<u64>,
    pub max_failed_updates: u32,
    pub silent_retries: u32,
    pub rescan_interval_secs: u64,
    pub setup_retry_secs: u64,
}

fn set_defaults(settings: &mut Config) -> Result<(), ConfigError> {
    settings
        .set_default("ws_port", i64::from(DEFAULT_WS_PORT))?
        .set_default("lang", crate::api::DEFAULT_LANG)?
        .set_default("connect_attempts", 10i64)?
        .set_default("connect_retry_delay_secs", 1i64)?
        .set_default("connect_timeout_secs", 10i64)?
        .set_default("request_timeout_secs", 30i64)?
        .set_default("poll_interval_secs", 60i64)?
        .set_default("max_failed_updates", 3i64)?
        .set_default("silent_retries", 3i64)?
        .set_default("rescan_interval_secs", 3600i64)?
        .set_default("setup_retry_secs", 30i64)?;
    Ok(())
}

pub fn read_settings() -> Result<Settings, ConfigError> {
    let mut settings = Config::default();
    settings.merge(config::Environment::with_prefix("WINET"))?;
    set_defaults(&mut settings)?;

    settings.try_into()
}

impl Settings {
    pub fn gateway_host(&self) -> GatewayHost {
        GatewayHost::new(&self.host, self.ws_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn setup_retry(&self) -> Duration {
        Duration::from_secs(self.setup_retry_secs)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            lang: self.lang.clone(),
            connect: RetryPolicy::bounded(
                self.connect_attempts.max(1),
                Duration::from_secs(self.connect_retry_delay_secs),
            ),
            ..SessionSettings::default()
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval_secs),
            error_interval: Duration::from_secs(
                self.error_interval_secs.unwrap_or(self.poll_interval_secs * 10),
            ),
            max_failed_updates: self.max_failed_updates,
            silent_retries: self.silent_retries,
            rescan_interval: Duration::from_secs(self.rescan_interval_secs),
        }
    }
}
