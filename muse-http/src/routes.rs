//! Canonical endpoint templates.
//!
//! Rate-limit buckets are keyed by the endpoint *template*, not the
//! concrete path, so requests against the same endpoint share a bucket
//! regardless of the ids interpolated into them.

use muse_model::Snowflake;

/// An API endpoint the transport may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `POST /interactions` — slash commands and component clicks.
    CreateInteraction,
    /// `GET /channels/{channel_id}/messages/{message_id}`.
    GetMessage {
        /// Channel to read from.
        channel_id: Snowflake,
        /// Message to fetch.
        message_id: Snowflake,
    },
    /// `GET /channels/{channel_id}/messages?limit=N`.
    ListMessages {
        /// Channel to read from.
        channel_id: Snowflake,
        /// Maximum number of messages (1-100).
        limit: u8,
    },
}

impl Endpoint {
    /// Canonical template used as the rate-limit bucket key.
    pub const fn template(&self) -> &'static str {
        match self {
            Endpoint::CreateInteraction => "POST /interactions",
            Endpoint::GetMessage { .. } => "GET /channels/{channel_id}/messages/{message_id}",
            Endpoint::ListMessages { .. } => "GET /channels/{channel_id}/messages",
        }
    }

    /// Concrete request path, relative to the API base.
    pub fn path(&self) -> String {
        match self {
            Endpoint::CreateInteraction => "/interactions".to_string(),
            Endpoint::GetMessage {
                channel_id,
                message_id,
            } => format!("/channels/{channel_id}/messages/{message_id}"),
            Endpoint::ListMessages { channel_id, limit } => {
                format!("/channels/{channel_id}/messages?limit={limit}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_are_id_free() {
        let endpoint = Endpoint::GetMessage {
            channel_id: Snowflake::new(1),
            message_id: Snowflake::new(2),
        };
        assert!(!endpoint.template().contains('1'));
        assert_eq!(endpoint.path(), "/channels/1/messages/2");
    }

    #[test]
    fn test_same_endpoint_shares_template() {
        let a = Endpoint::ListMessages {
            channel_id: Snowflake::new(1),
            limit: 10,
        };
        let b = Endpoint::ListMessages {
            channel_id: Snowflake::new(2),
            limit: 50,
        };
        assert_eq!(a.template(), b.template());
    }
}
