use std::env;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_PREFIX: &str = "!";
const DEFAULT_IDLE_DISCONNECT_SECS: u64 = 60;
const DEFAULT_TRACK_STUCK_SECS: u64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Expected {0} in the environment")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub token: String,
    pub prefix: String,
    pub idle_disconnect: Duration,
    pub stuck_threshold: Duration,
    pub self_deaf: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("DISCORD_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::Missing("DISCORD_TOKEN"))?;

        let prefix = lookup("COMMAND_PREFIX")
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

        let idle_disconnect = seconds(&lookup, "IDLE_DISCONNECT_SECS", DEFAULT_IDLE_DISCONNECT_SECS)?;
        let stuck_threshold = seconds(&lookup, "TRACK_STUCK_SECS", DEFAULT_TRACK_STUCK_SECS)?;

        let self_deaf = match lookup("SELF_DEAF") {
            None => true,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::Invalid { key: "SELF_DEAF", value }),
            },
        };

        Ok(Self {
            token,
            prefix,
            idle_disconnect,
            stuck_threshold,
            self_deaf,
        })
    }
}

fn seconds<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(Duration::from_secs(default));
    };

    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::Invalid { key, value }),
    }
}
