//! Snowflake ID type.
//!
//! The platform uses 64-bit unsigned integers for unique identifiers,
//! but serializes them as strings in JSON to avoid precision loss.
//! The top 42 bits encode the creation time, which makes snowflakes the
//! monotone ordering key for everything correlation-related.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Milliseconds between the Unix epoch and the platform epoch
/// (2015-01-01T00:00:00Z).
pub const SNOWFLAKE_EPOCH_MS: u64 = 1_420_070_400_000;

/// A 64-bit platform identifier.
///
/// Snowflakes are serialized as strings in JSON to prevent precision loss
/// in languages with limited integer precision, but some payloads carry
/// them as raw integers, so deserialization accepts both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Snowflake(pub u64);

impl Snowflake {
    /// Create a new Snowflake from a u64 value.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Creation time as milliseconds since the Unix epoch.
    #[inline]
    pub const fn timestamp_ms(self) -> u64 {
        (self.0 >> 22) + SNOWFLAKE_EPOCH_MS
    }

    /// Smallest snowflake whose creation time is at or after `unix_ms`.
    ///
    /// Useful as a lower bound when filtering messages by creation time.
    #[inline]
    pub const fn from_unix_ms(unix_ms: u64) -> Self {
        Self((unix_ms.saturating_sub(SNOWFLAKE_EPOCH_MS)) << 22)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Snowflake {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Snowflake> for u64 {
    #[inline]
    fn from(snowflake: Snowflake) -> Self {
        snowflake.0
    }
}

impl Serialize for Snowflake {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Always a string on the wire, to survive JSON consumers with
        // 53-bit integers.
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Ids arrive as strings, but a few payload paths (nonces, some
        // component fields) carry them as raw integers.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum WireId {
            Int(u64),
            Text(String),
        }

        match WireId::deserialize(deserializer)? {
            WireId::Int(id) => Ok(Snowflake(id)),
            WireId::Text(text) => text.parse::<u64>().map(Snowflake).map_err(|_| {
                serde::de::Error::invalid_value(
                    serde::de::Unexpected::Str(&text),
                    &"a numeric snowflake id",
                )
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snowflake_parsing() {
        let json_str = r#""175928847299117063""#;
        let snowflake: Snowflake = serde_json::from_str(json_str).unwrap();
        assert_eq!(snowflake.get(), 175928847299117063);
    }

    #[test]
    fn test_snowflake_integer_parsing() {
        let snowflake: Snowflake = serde_json::from_str("175928847299117063").unwrap();
        assert_eq!(snowflake.get(), 175928847299117063);
    }

    #[test]
    fn test_snowflake_serialization() {
        let snowflake = Snowflake::new(175928847299117063);
        let json = serde_json::to_string(&snowflake).unwrap();
        assert_eq!(json, r#""175928847299117063""#);
    }

    #[test]
    fn test_non_numeric_string_rejected() {
        let result: Result<Snowflake, _> = serde_json::from_str(r#""not-an-id""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_snowflake_timestamp() {
        // Known snowflake created after the platform epoch
        let snowflake = Snowflake::new(175928847299117063);
        assert!(snowflake.timestamp_ms() > SNOWFLAKE_EPOCH_MS);
    }

    #[test]
    fn test_from_unix_ms_is_lower_bound() {
        let snowflake = Snowflake::new(175928847299117063);
        let bound = Snowflake::from_unix_ms(snowflake.timestamp_ms());
        assert!(bound <= snowflake);
        assert_eq!(bound.timestamp_ms(), snowflake.timestamp_ms());
    }

    #[test]
    fn test_ordering_follows_creation_time() {
        let older = Snowflake::from_unix_ms(SNOWFLAKE_EPOCH_MS + 1_000);
        let newer = Snowflake::from_unix_ms(SNOWFLAKE_EPOCH_MS + 2_000);
        assert!(older < newer);
    }
}
