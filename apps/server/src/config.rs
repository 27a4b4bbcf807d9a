use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

const INSECURE_SECRET: &str = "change_me";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not valid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Runtime settings, read from the environment (and `.env`)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub database_path: PathBuf,
    pub secret_key: String,
    pub token_expire_minutes: i64,
    pub min_interval_seconds: u32,
}

/// Runtime value first, then the one baked in at build time
fn setting(name: &str, baked: Option<&'static str>) -> Option<String> {
    env::var(name).ok().or_else(|| baked.map(str::to_string))
}

fn parsed<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err: T::Err| ConfigError::Invalid { name, reason: err.to_string() }),
        None => Ok(default),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind = parsed(
            "PULSE_BIND",
            setting("PULSE_BIND", option_env!("PULSE_BIND")),
            SocketAddr::from(([0, 0, 0, 0], 8080)),
        )?;
        let database_path = setting("PULSE_DATABASE_PATH", option_env!("PULSE_DATABASE_PATH"))
            .map_or_else(|| PathBuf::from("pulse.db"), PathBuf::from);

        let secret_key = env::var("PULSE_SECRET_KEY").unwrap_or_else(|_| INSECURE_SECRET.to_string());
        if secret_key == INSECURE_SECRET {
            warn!("PULSE_SECRET_KEY is not set, tokens are signed with the insecure default");
        }

        let token_expire_minutes = parsed(
            "PULSE_TOKEN_EXPIRE_MINUTES",
            setting("PULSE_TOKEN_EXPIRE_MINUTES", option_env!("PULSE_TOKEN_EXPIRE_MINUTES")),
            60,
        )?;
        if token_expire_minutes <= 0 {
            return Err(ConfigError::Invalid {
                name: "PULSE_TOKEN_EXPIRE_MINUTES",
                reason: "must be positive".to_string(),
            });
        }

        let min_interval_seconds = parsed(
            "PULSE_MIN_INTERVAL_SECONDS",
            setting("PULSE_MIN_INTERVAL_SECONDS", option_env!("PULSE_MIN_INTERVAL_SECONDS")),
            15,
        )?;

        Ok(Self { bind, database_path, secret_key, token_expire_minutes, min_interval_seconds })
    }
}
