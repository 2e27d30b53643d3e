//! services/engine/src/config.rs
//!
//! Defines the engine's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use dose_reminder_core::window::WindowPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;
use uuid::Uuid;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub user_id: Uuid,
    pub log_level: Level,
    pub local_storage_path: PathBuf,
    pub window_policy: WindowPolicy,
    pub sweep_interval: Duration,
    pub reset_check_interval: Duration,
    pub snooze_minutes: i64,
}

impl Default for Config {
    /// Defaults for everything except the connection string and user, which
    /// have no sensible default and are left empty/nil.
    fn default() -> Self {
        Self {
            database_url: String::new(),
            user_id: Uuid::nil(),
            log_level: Level::INFO,
            local_storage_path: PathBuf::from("./dose_reminder_state.json"),
            window_policy: WindowPolicy::default(),
            sweep_interval: Duration::from_secs(30),
            reset_check_interval: Duration::from_secs(60),
            snooze_minutes: 5,
        }
    }
}

/// Reads an optional variable, parsing it when present.
fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        let defaults = Config::default();

        // --- Load Database and User Settings ---
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let user_id_str =
            std::env::var("USER_ID").map_err(|_| ConfigError::MissingVar("USER_ID".to_string()))?;
        let user_id = Uuid::parse_str(user_id_str.trim())
            .map_err(|e| ConfigError::InvalidValue("USER_ID".to_string(), e.to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let local_storage_path = std::env::var("LOCAL_STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.local_storage_path);

        // --- Load Window Policy ---
        let lead = parse_var("WINDOW_LEAD_MINUTES", WindowPolicy::DEFAULT_LEAD_MINUTES)?;
        let tolerance = parse_var("WINDOW_TOLERANCE_MINUTES", WindowPolicy::DEFAULT_TOLERANCE_MINUTES)?;
        let window_policy = WindowPolicy::new(lead, tolerance).ok_or_else(|| {
            ConfigError::InvalidValue(
                "WINDOW_TOLERANCE_MINUTES".to_string(),
                format!("tolerance {} must not be before lead {}", tolerance, lead),
            )
        })?;

        // --- Load Timer Settings ---
        let sweep_secs: u64 = parse_var("SWEEP_INTERVAL_SECS", defaults.sweep_interval.as_secs())?;
        let reset_secs: u64 =
            parse_var("RESET_CHECK_INTERVAL_SECS", defaults.reset_check_interval.as_secs())?;
        if sweep_secs == 0 || reset_secs == 0 {
            return Err(ConfigError::InvalidValue(
                if sweep_secs == 0 { "SWEEP_INTERVAL_SECS" } else { "RESET_CHECK_INTERVAL_SECS" }
                    .to_string(),
                "interval must be at least one second".to_string(),
            ));
        }

        let snooze_minutes: i64 = parse_var("SNOOZE_MINUTES", defaults.snooze_minutes)?;
        if snooze_minutes <= 0 {
            return Err(ConfigError::InvalidValue(
                "SNOOZE_MINUTES".to_string(),
                "must be positive".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            user_id,
            log_level,
            local_storage_path,
            window_policy,
            sweep_interval: Duration::from_secs(sweep_secs),
            reset_check_interval: Duration::from_secs(reset_secs),
            snooze_minutes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment variables are process-global, so every case runs inside one test.
    #[test]
    fn loads_from_environment() {
        let user = Uuid::new_v4();
        std::env::remove_var("RUST_LOG");
        std::env::remove_var("DATABASE_URL");
        assert!(matches!(Config::from_env(), Err(ConfigError::MissingVar(v)) if v == "DATABASE_URL"));

        std::env::set_var("DATABASE_URL", "postgres://localhost/doses");
        std::env::set_var("USER_ID", user.to_string());
        let config = Config::from_env().unwrap();
        assert_eq!(config.user_id, user);
        assert_eq!(config.window_policy, WindowPolicy::default());
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.snooze_minutes, 5);

        std::env::set_var("WINDOW_LEAD_MINUTES", "-30");
        std::env::set_var("WINDOW_TOLERANCE_MINUTES", "90");
        let config = Config::from_env().unwrap();
        assert_eq!(config.window_policy.lead_minutes(), -30);
        assert_eq!(config.window_policy.tolerance_minutes(), 90);

        std::env::set_var("WINDOW_TOLERANCE_MINUTES", "-60");
        assert!(matches!(Config::from_env(), Err(ConfigError::InvalidValue(_, _))));

        std::env::remove_var("WINDOW_LEAD_MINUTES");
        std::env::remove_var("WINDOW_TOLERANCE_MINUTES");
        std::env::set_var("SWEEP_INTERVAL_SECS", "soon");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue(v, _)) if v == "SWEEP_INTERVAL_SECS"
        ));
        std::env::remove_var("SWEEP_INTERVAL_SECS");

        std::env::set_var("USER_ID", "nobody");
        assert!(matches!(Config::from_env(), Err(ConfigError::InvalidValue(v, _)) if v == "USER_ID"));
        std::env::remove_var("USER_ID");
        std::env::remove_var("DATABASE_URL");
    }
}
