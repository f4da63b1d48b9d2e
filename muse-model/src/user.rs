//! User objects as they appear on messages.

use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};

/// A platform user, as embedded in message payloads.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    /// User ID.
    pub id: Snowflake,
    /// Username (not unique across the platform).
    #[serde(default)]
    pub username: String,
    /// Legacy discriminator; `"0"` on migrated accounts.
    #[serde(default)]
    pub discriminator: Option<String>,
    /// Whether the user is an application-controlled bot.
    #[serde(default)]
    pub bot: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_parsing() {
        let json = r#"{"id":"936929561302675456","username":"Midjourney Bot","bot":true}"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.id.get(), 936929561302675456);
        assert!(user.bot);
        assert!(user.discriminator.is_none());
    }
}
