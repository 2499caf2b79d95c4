use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub webhook_secret: String,
    pub invitation_webhook_url: Option<String>,
    /// Per-link request budget on the public routes.
    pub public_rps: u32,
    pub engine: EngineSettings,
}

/// Knobs of the session engine that do not depend on the process environment.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub sweep_interval_secs: u64,
    pub default_link_expires_hours: i64,
    pub mark_no_show_on_close: bool,
    pub late_entry_grace_minutes: i64,
    pub storage_retry_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            default_link_expires_hours: 72,
            mark_no_show_on_close: true,
            late_entry_grace_minutes: 0,
            storage_retry_attempts: 3,
        }
    }
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let defaults = EngineSettings::default();
        let engine = EngineSettings {
            sweep_interval_secs: get_env_parse_or("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            default_link_expires_hours: get_env_parse_or(
                "DEFAULT_LINK_EXPIRES_HOURS",
                defaults.default_link_expires_hours,
            )?,
            mark_no_show_on_close: get_env_parse_or("MARK_NO_SHOW_ON_CLOSE", defaults.mark_no_show_on_close)?,
            late_entry_grace_minutes: get_env_parse_or(
                "LATE_ENTRY_GRACE_MINUTES",
                defaults.late_entry_grace_minutes,
            )?,
            storage_retry_attempts: get_env_parse_or(
                "STORAGE_RETRY_ATTEMPTS",
                defaults.storage_retry_attempts,
            )?,
        };

        if engine.sweep_interval_secs == 0 {
            return Err(Error::Config("SWEEP_INTERVAL_SECS must be positive".to_string()));
        }

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            jwt_secret: get_env("JWT_SECRET")?,
            webhook_secret: get_env("WEBHOOK_SECRET")?,
            invitation_webhook_url: env::var("INVITATION_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            public_rps: get_env_parse_or("PUBLIC_RPS", 20)?,
            engine,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> Result<&'static Config> {
    CONFIG
        .get()
        .ok_or_else(|| Error::Config("Configuration has not been initialized".to_string()))
}
