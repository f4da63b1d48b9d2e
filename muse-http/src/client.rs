//! REST client for interactions and message lookups.

use crate::error::{ApiErrorBody, HttpError};
use crate::interaction::{CommandOption, InteractionPayload, NonceSequence};
use crate::ratelimit::{RateLimiter, SERVER_ERROR_STATUSES};
use crate::routes::Endpoint;

use muse_model::{Message, Snowflake};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// API base URL.
const API_BASE: &str = "https://discord.com/api/v10";

/// User agent presented for user-token requests; matches an official
/// desktop client, since the provider rejects obviously automated callers.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// User agent presented for bot-token requests.
const BOT_USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/muse-rs/muse, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Retry budget for one logical REST call.
const MAX_RETRIES: u32 = 3;

/// An authentication token with its header scheme.
#[derive(Debug, Clone)]
pub enum AuthToken {
    /// A user account token; sent bare.
    User(String),
    /// A bot token; sent with the `Bot` prefix.
    Bot(String),
}

impl AuthToken {
    fn header_value(&self) -> Result<HeaderValue, HttpError> {
        let value = match self {
            AuthToken::User(token) => token.clone(),
            AuthToken::Bot(token) => format!("Bot {token}"),
        };
        let mut header = HeaderValue::from_str(&value).map_err(|_| HttpError::Unauthorized)?;
        header.set_sensitive(true);
        Ok(header)
    }

    fn user_agent(&self) -> &'static str {
        match self {
            AuthToken::User(_) => BROWSER_USER_AGENT,
            AuthToken::Bot(_) => BOT_USER_AGENT,
        }
    }
}

/// REST API client.
///
/// Every request passes through the shared [`RateLimiter`], keyed by the
/// canonical endpoint template, and is retried on transient failures up to
/// the caller's deadline.
pub struct RestClient {
    /// Inner HTTP client.
    client: Client,
    /// Rate limiter, shared so all callers observe one pacing state.
    rate_limiter: Arc<RateLimiter>,
    /// Monotone nonce source for interactions.
    nonces: NonceSequence,
}

impl RestClient {
    /// Create a new REST client with the given token.
    pub fn new(token: AuthToken) -> Result<Self, HttpError> {
        Self::with_rate_limiter(token, Arc::new(RateLimiter::new()))
    }

    /// Create a new REST client sharing an existing rate limiter.
    pub fn with_rate_limiter(
        token: AuthToken,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, HttpError> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, token.header_value()?);
        headers.insert(USER_AGENT, HeaderValue::from_static(token.user_agent()));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            rate_limiter,
            nonces: NonceSequence::new(),
        })
    }

    /// The rate limiter backing this client.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    // =========================================================================
    // Interaction Endpoints
    // =========================================================================

    /// POST a slash-command interaction (type 2). Succeeds on 204.
    ///
    /// `user_session_id` must be the *user* gateway session's id from
    /// READY; the provider rejects interactions signed with a bot session.
    pub async fn send_slash_command(
        &self,
        channel_id: Snowflake,
        guild_id: Snowflake,
        command_name: &str,
        options: Vec<CommandOption>,
        user_session_id: &str,
        deadline: Instant,
    ) -> Result<(), HttpError> {
        let payload = InteractionPayload::slash_command(
            channel_id,
            guild_id,
            user_session_id,
            command_name,
            options,
            self.nonces.next(),
        );
        self.create_interaction(&payload, deadline).await
    }

    /// POST a component-click interaction (type 3). Succeeds on 204.
    pub async fn send_button_interaction(
        &self,
        channel_id: Snowflake,
        guild_id: Snowflake,
        message_id: Snowflake,
        custom_id: &str,
        user_session_id: &str,
        deadline: Instant,
    ) -> Result<(), HttpError> {
        let payload = InteractionPayload::button_click(
            channel_id,
            guild_id,
            user_session_id,
            message_id,
            custom_id,
            self.nonces.next(),
        );
        self.create_interaction(&payload, deadline).await
    }

    /// POST a fully formed interaction payload.
    pub async fn create_interaction(
        &self,
        payload: &InteractionPayload,
        deadline: Instant,
    ) -> Result<(), HttpError> {
        let endpoint = Endpoint::CreateInteraction;
        let url = format!("{API_BASE}{}", endpoint.path());
        let url = url.as_str();

        self.rate_limiter
            .with_retry(
                move || async move {
                    self.rate_limiter.wait(endpoint).await?;
                    debug!(endpoint = endpoint.template(), "Posting interaction");
                    let response = self.client.post(url).json(payload).send().await?;
                    self.expect_no_content(endpoint, response).await
                },
                MAX_RETRIES,
                SERVER_ERROR_STATUSES,
                deadline,
            )
            .await
    }

    // =========================================================================
    // Channel Endpoints
    // =========================================================================

    /// Fetch a single message.
    pub async fn get_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        deadline: Instant,
    ) -> Result<Message, HttpError> {
        self.get_json(
            Endpoint::GetMessage {
                channel_id,
                message_id,
            },
            deadline,
        )
        .await
    }

    /// Fetch the most recent messages in a channel, newest first.
    ///
    /// Polling fallback for grids the gateway missed.
    pub async fn list_recent_messages(
        &self,
        channel_id: Snowflake,
        limit: u8,
        deadline: Instant,
    ) -> Result<Vec<Message>, HttpError> {
        self.get_json(
            Endpoint::ListMessages {
                channel_id,
                limit: limit.clamp(1, 100),
            },
            deadline,
        )
        .await
    }

    // =========================================================================
    // Internal Request Plumbing
    // =========================================================================

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        deadline: Instant,
    ) -> Result<T, HttpError> {
        let url = format!("{API_BASE}{}", endpoint.path());
        let url = url.as_str();

        self.rate_limiter
            .with_retry(
                move || async move {
                    self.rate_limiter.wait(endpoint).await?;
                    debug!(endpoint = endpoint.template(), "Making request");
                    let response = self.client.get(url).send().await?;
                    let response = self.check_status(endpoint, response).await?;
                    Ok(response.json::<T>().await?)
                },
                MAX_RETRIES,
                SERVER_ERROR_STATUSES,
                deadline,
            )
            .await
    }

    /// Record rate-limit headers and require a 204.
    async fn expect_no_content(
        &self,
        endpoint: Endpoint,
        response: Response,
    ) -> Result<(), HttpError> {
        let response = self.check_status(endpoint, response).await?;
        if response.status() == StatusCode::NO_CONTENT {
            Ok(())
        } else {
            Err(HttpError::UnexpectedStatus(response.status().as_u16()))
        }
    }

    /// Record rate-limit headers and convert error statuses.
    async fn check_status(
        &self,
        endpoint: Endpoint,
        response: Response,
    ) -> Result<Response, HttpError> {
        self.rate_limiter.update(endpoint, response.headers());

        let status = response.status();
        match status {
            _ if status.is_success() => Ok(response),
            StatusCode::TOO_MANY_REQUESTS => {
                let body: serde_json::Value = response.json().await.unwrap_or_default();

                let retry_after_ms = body
                    .get("retry_after")
                    .and_then(|v| v.as_f64())
                    .map(|secs| (secs * 1000.0) as u64)
                    .unwrap_or(5_000);
                let global = body
                    .get("global")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);

                Err(HttpError::RateLimited {
                    retry_after_ms,
                    global,
                })
            }
            StatusCode::UNAUTHORIZED => Err(HttpError::Unauthorized),
            StatusCode::FORBIDDEN => Err(HttpError::Forbidden),
            StatusCode::NOT_FOUND => Err(HttpError::NotFound),
            _ if status.is_server_error() => Err(HttpError::ServerError(status.as_u16())),
            _ => {
                let body: ApiErrorBody = response.json().await.unwrap_or(ApiErrorBody {
                    code: 0,
                    message: String::new(),
                });
                Err(HttpError::Api {
                    status: status.as_u16(),
                    code: body.code,
                    message: body.message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        assert!(RestClient::new(AuthToken::User("user_token".to_string())).is_ok());
        assert!(RestClient::new(AuthToken::Bot("bot_token".to_string())).is_ok());
    }

    #[test]
    fn test_auth_header_schemes() {
        let user = AuthToken::User("abc".to_string()).header_value().unwrap();
        // Sensitive headers hide their value from Debug; compare bytes.
        assert_eq!(user.as_bytes(), b"abc");

        let bot = AuthToken::Bot("abc".to_string()).header_value().unwrap();
        assert_eq!(bot.as_bytes(), b"Bot abc");
    }

    #[test]
    fn test_user_agent_mimics_official_client() {
        assert!(AuthToken::User(String::new())
            .user_agent()
            .starts_with("Mozilla/5.0"));
        assert!(AuthToken::Bot(String::new())
            .user_agent()
            .starts_with("DiscordBot"));
    }
}
