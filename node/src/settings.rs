use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use ppsclock_time::SyncConfig;
use serde::Serialize;

pub const DEFAULT_CONFIG_PATH: &str = "config/ppsclock.toml";
pub const DEFAULT_API_URL: &str = "http://api.timezonedb.com/v2.1/get-time-zone";

#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
    pub hostname: String,
    pub log_level: String,
    pub log_format: String,
    pub tz_api_url: String,
    pub tz_api_key: String,
    pub tz_request_timeout_secs: u64,
    pub backoff_increment_secs: u64,
    pub backoff_max_secs: u64,
    pub feed_interval_ms: u64,
    pub fix_latitude: f64,
    pub fix_longitude: f64,
    pub metrics_enabled: bool,
    pub metrics_listen: String,
}

impl AppConfig {
    pub fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            path.exists().then_some(path)
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(Environment::with_prefix("PPSCLOCK"));

        let config = builder.build().context("failed to assemble configuration")?;

        Ok(Self {
            config_path: resolved_path,
            hostname: get_string_value(&config, &["hostname"])
                .unwrap_or_else(|| "ppsclock".to_string()),
            log_level: get_string_value(&config, &["log_level"])
                .unwrap_or_else(|| "info".to_string()),
            log_format: get_string_value(&config, &["log_format"])
                .unwrap_or_else(|| "pretty".to_string()),
            tz_api_url: get_string_value(&config, &["tz_api_url", "tz.api_url"])
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            tz_api_key: get_string_value(&config, &["tz_api_key", "tz.api_key"])
                .unwrap_or_default(),
            tz_request_timeout_secs: get_u64_value(
                &config,
                &["tz_request_timeout_secs", "tz.request_timeout_secs"],
                10,
            )?,
            backoff_increment_secs: get_u64_value(
                &config,
                &["backoff_increment_secs", "backoff.increment_secs"],
                5,
            )?,
            backoff_max_secs: get_u64_value(
                &config,
                &["backoff_max_secs", "backoff.max_secs"],
                300,
            )?,
            feed_interval_ms: get_u64_value(
                &config,
                &["feed_interval_ms", "feed.interval_ms"],
                1000,
            )?,
            fix_latitude: get_f64_value(&config, &["fix_latitude", "fix.latitude"], 0.0)?,
            fix_longitude: get_f64_value(&config, &["fix_longitude", "fix.longitude"], 0.0)?,
            metrics_enabled: get_bool_value(&config, &["metrics_enabled", "metrics.enabled"], true),
            metrics_listen: get_string_value(&config, &["metrics_listen", "metrics.listen"])
                .unwrap_or_else(|| "127.0.0.1:9464".to_string()),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            anyhow::bail!("hostname must not be empty");
        }
        if self.tz_api_key.trim().is_empty() {
            anyhow::bail!("tz.api_key must be set (or PPSCLOCK_TZ_API_KEY / --api-key)");
        }
        if self.tz_request_timeout_secs == 0 {
            anyhow::bail!("tz.request_timeout_secs must be greater than zero");
        }
        if self.backoff_increment_secs == 0 {
            anyhow::bail!("backoff.increment_secs must be greater than zero");
        }
        if self.backoff_max_secs < self.backoff_increment_secs {
            anyhow::bail!(
                "backoff.max_secs ({}) must not be below backoff.increment_secs ({})",
                self.backoff_max_secs,
                self.backoff_increment_secs
            );
        }
        if self.feed_interval_ms == 0 {
            anyhow::bail!("feed.interval_ms must be greater than zero");
        }
        if !(-90.0..=90.0).contains(&self.fix_latitude) {
            anyhow::bail!("fix.latitude {} is out of range", self.fix_latitude);
        }
        if !(-180.0..=180.0).contains(&self.fix_longitude) {
            anyhow::bail!("fix.longitude {} is out of range", self.fix_longitude);
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("log_format must be 'pretty' or 'json'");
        }
        if self.metrics_enabled {
            self.metrics_addr()?;
        }
        Ok(())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            backoff_increment: Duration::from_secs(self.backoff_increment_secs),
            backoff_max: Duration::from_secs(self.backoff_max_secs),
            feed_interval: Duration::from_millis(self.feed_interval_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.tz_request_timeout_secs)
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        self.metrics_listen
            .parse()
            .with_context(|| format!("invalid metrics.listen address {}", self.metrics_listen))
    }

    /// Effective configuration as TOML with the API key masked.
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if !shown.tz_api_key.is_empty() {
            shown.tz_api_key = "********".to_string();
        }
        toml::to_string_pretty(&shown).context("failed to render configuration")
    }
}

pub fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if let Some(api_key) = matches.get_one::<String>("api-key") {
        config.tz_api_key = api_key.clone();
    }

    if matches.get_flag("disable-metrics") {
        config.metrics_enabled = false;
    }
}

pub fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}

fn get_u64_value(config: &Config, keys: &[&str], default: u64) -> Result<u64> {
    for key in keys {
        match config.get_int(key) {
            Ok(value) => {
                return u64::try_from(value)
                    .with_context(|| format!("{key} must not be negative"));
            }
            Err(ConfigError::NotFound(_)) => continue,
            Err(err) => return Err(err).with_context(|| format!("{key} must be an integer")),
        }
    }
    Ok(default)
}

fn get_f64_value(config: &Config, keys: &[&str], default: f64) -> Result<f64> {
    for key in keys {
        match config.get_float(key) {
            Ok(value) if value.is_finite() => return Ok(value),
            Ok(_) => anyhow::bail!("{key} must be a finite number"),
            Err(ConfigError::NotFound(_)) => continue,
            Err(err) => return Err(err).with_context(|| format!("{key} must be a number")),
        }
    }
    Ok(default)
}
