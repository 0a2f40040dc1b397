use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use log::LevelFilter;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::executor::Policy;
use crate::types::ScopeFilter;

/// Environment variables recognised by the updater.
const ENV_KEYS: &[&str] = &[
    "CHECK_INTERVAL_MINUTES",
    "AUTO_UPDATE",
    "LABEL_ENABLE",
    "DRY_RUN",
    "NOTIFY_WEBHOOK",
    "LOG_LEVEL",
    "STOP_TIMEOUT_SECONDS",
    "CALL_TIMEOUT_SECONDS",
    "PULL_TIMEOUT_SECONDS",
    "NOTIFY_TIMEOUT_SECONDS",
    "ROLLBACK_ON_FAILURE",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Minutes between cycles; 0 runs a single cycle and exits.
    pub check_interval_minutes: u64,
    #[serde(deserialize_with = "flag")]
    pub auto_update: bool,
    pub label_enable: String,
    #[serde(deserialize_with = "flag")]
    pub dry_run: bool,
    pub notify_webhook: String,
    pub log_level: String,
    pub stop_timeout_seconds: i64,
    pub call_timeout_seconds: u64,
    pub pull_timeout_seconds: u64,
    pub notify_timeout_seconds: u64,
    #[serde(deserialize_with = "flag")]
    pub rollback_on_failure: bool,
}

/// Booleans as operators write them in compose files: only `true`, in any
/// case, switches a flag on.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Bool(value) => value,
        Raw::Text(text) => text.trim().eq_ignore_ascii_case("true"),
        Raw::Number(_) => false,
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            check_interval_minutes: 60,
            auto_update: true,
            label_enable: String::new(),
            dry_run: false,
            notify_webhook: String::new(),
            log_level: "INFO".into(),
            stop_timeout_seconds: 30,
            call_timeout_seconds: 120,
            pull_timeout_seconds: 900,
            notify_timeout_seconds: 10,
            rollback_on_failure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    SingleShot,
    Scheduled(Duration),
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::figment()
            .extract::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("autoupdater.toml"))
            .merge(Json::file("autoupdater.json"))
            .merge(Env::raw().only(ENV_KEYS))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.scope_filter()?;
        self.log_filter()?;
        self.mode()?;
        Ok(())
    }

    pub fn scope_filter(&self) -> Result<Option<ScopeFilter>, ConfigError> {
        ScopeFilter::parse(&self.label_enable)
    }

    pub fn log_filter(&self) -> Result<LevelFilter, ConfigError> {
        match self.log_level.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LevelFilter::Debug),
            "INFO" => Ok(LevelFilter::Info),
            "WARNING" | "WARN" => Ok(LevelFilter::Warn),
            "ERROR" => Ok(LevelFilter::Error),
            _ => Err(ConfigError::InvalidLogLevel(self.log_level.clone())),
        }
    }

    pub fn webhook(&self) -> Option<&str> {
        let url = self.notify_webhook.trim();
        (!url.is_empty()).then_some(url)
    }

    pub fn mode(&self) -> Result<RunMode, ConfigError> {
        match self.check_interval_minutes {
            0 => Ok(RunMode::SingleShot),
            minutes => minutes
                .checked_mul(60)
                .map(|secs| RunMode::Scheduled(Duration::from_secs(secs)))
                .ok_or(ConfigError::IntervalTooLarge(minutes)),
        }
    }

    pub fn policy(&self) -> Policy {
        Policy {
            auto_update: self.auto_update,
            dry_run: self.dry_run,
            rollback_on_failure: self.rollback_on_failure,
            stop_timeout: self.stop_timeout_seconds,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_seconds)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_seconds)
    }
}
