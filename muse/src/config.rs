//! Client configuration from the process environment.
//!
//! No `.env` file loading happens here; the process environment is the
//! single source. Operators wire dotenv-style tooling outside the client
//! if they want it.

use muse_model::Snowflake;
use thiserror::Error;

/// Recognized environment keys.
const ENV_USER_TOKEN: &str = "DISCORD_USER_TOKEN";
const ENV_BOT_TOKEN: &str = "DISCORD_BOT_TOKEN";
const ENV_CHANNEL_ID: &str = "DISCORD_CHANNEL_ID";
const ENV_GUILD_ID: &str = "DISCORD_GUILD_ID";
const ENV_MONGODB_URI: &str = "MONGODB_URI";
const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required key is absent or empty.
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    /// A snowflake key failed to parse.
    #[error("Invalid snowflake in {key}: {value}")]
    InvalidSnowflake {
        /// Offending key.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Immutable credentials and target identifiers for one client instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// User account token; sends interactions.
    pub user_token: String,
    /// Bot token; receives richer event payloads. May duplicate the user
    /// token when no bot is available.
    pub bot_token: String,
    /// Channel to generate in.
    pub channel_id: Snowflake,
    /// Guild the channel belongs to.
    pub guild_id: Snowflake,
    /// Optional document-store URI, consumed by an external storage
    /// adapter.
    pub mongodb_uri: Option<String>,
    /// Diagnostics verbosity, consumed by the log subscriber at startup.
    pub log_level: Option<String>,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            user_token: require(ENV_USER_TOKEN)?,
            bot_token: require(ENV_BOT_TOKEN)?,
            channel_id: require_snowflake(ENV_CHANNEL_ID)?,
            guild_id: require_snowflake(ENV_GUILD_ID)?,
            mongodb_uri: optional(ENV_MONGODB_URI),
            log_level: optional(ENV_LOG_LEVEL),
        })
    }

    /// Build a configuration directly, for tests and embedding.
    pub fn new(
        user_token: impl Into<String>,
        bot_token: impl Into<String>,
        channel_id: Snowflake,
        guild_id: Snowflake,
    ) -> Self {
        Self {
            user_token: user_token.into(),
            bot_token: bot_token.into(),
            channel_id,
            guild_id,
            mongodb_uri: None,
            log_level: None,
        }
    }
}

fn optional(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn require(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

fn require_snowflake(key: &'static str) -> Result<Snowflake, ConfigError> {
    let value = require(key)?;
    value
        .parse::<u64>()
        .map(Snowflake::new)
        .map_err(|_| ConfigError::InvalidSnowflake { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new() {
        let config = Config::new("u", "b", Snowflake::new(1), Snowflake::new(2));
        assert_eq!(config.channel_id.get(), 1);
        assert!(config.mongodb_uri.is_none());
    }
}
