//! Transport seams.
//!
//! The interaction transport and the artifact fetcher are the two places
//! the facade touches the network outside the gateway. Both sit behind
//! object-safe traits so tests drive the whole pipeline with
//! deterministic in-memory implementations.

use async_trait::async_trait;
use muse_http::fetch::FetchedImage;
use muse_http::interaction::CommandOption;
use muse_http::{HttpError, ImageFetcher, RestClient};
use muse_model::{Message, Snowflake};
use tokio::time::Instant;

/// Rate-limited interaction and lookup operations.
#[async_trait]
pub trait InteractionTransport: Send + Sync {
    /// POST a slash-command interaction; 204 is the only success.
    async fn send_slash_command(
        &self,
        channel_id: Snowflake,
        guild_id: Snowflake,
        command_name: &str,
        options: Vec<CommandOption>,
        user_session_id: &str,
        deadline: Instant,
    ) -> Result<(), HttpError>;

    /// POST a component-click interaction; 204 is the only success.
    async fn send_button_interaction(
        &self,
        channel_id: Snowflake,
        guild_id: Snowflake,
        message_id: Snowflake,
        custom_id: &str,
        user_session_id: &str,
        deadline: Instant,
    ) -> Result<(), HttpError>;

    /// Fetch a single message.
    async fn get_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        deadline: Instant,
    ) -> Result<Message, HttpError>;

    /// Fetch recent messages, newest first.
    async fn list_recent_messages(
        &self,
        channel_id: Snowflake,
        limit: u8,
        deadline: Instant,
    ) -> Result<Vec<Message>, HttpError>;
}

#[async_trait]
impl InteractionTransport for RestClient {
    async fn send_slash_command(
        &self,
        channel_id: Snowflake,
        guild_id: Snowflake,
        command_name: &str,
        options: Vec<CommandOption>,
        user_session_id: &str,
        deadline: Instant,
    ) -> Result<(), HttpError> {
        RestClient::send_slash_command(
            self,
            channel_id,
            guild_id,
            command_name,
            options,
            user_session_id,
            deadline,
        )
        .await
    }

    async fn send_button_interaction(
        &self,
        channel_id: Snowflake,
        guild_id: Snowflake,
        message_id: Snowflake,
        custom_id: &str,
        user_session_id: &str,
        deadline: Instant,
    ) -> Result<(), HttpError> {
        RestClient::send_button_interaction(
            self,
            channel_id,
            guild_id,
            message_id,
            custom_id,
            user_session_id,
            deadline,
        )
        .await
    }

    async fn get_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        deadline: Instant,
    ) -> Result<Message, HttpError> {
        RestClient::get_message(self, channel_id, message_id, deadline).await
    }

    async fn list_recent_messages(
        &self,
        channel_id: Snowflake,
        limit: u8,
        deadline: Instant,
    ) -> Result<Vec<Message>, HttpError> {
        RestClient::list_recent_messages(self, channel_id, limit, deadline).await
    }
}

/// Artifact byte downloads.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Download an image, verifying its content type.
    async fn fetch(&self, url: &str) -> Result<FetchedImage, HttpError>;
}

#[async_trait]
impl ArtifactFetcher for ImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, HttpError> {
        ImageFetcher::fetch(self, url).await
    }
}
