//! Interaction request payloads.
//!
//! The provider only accepts structured interactions; plaintext commands
//! in chat are ignored. Every payload carries the *user* gateway session's
//! id (acquired at READY) and a monotone nonce.

use muse_model::{Snowflake, PROVIDER_APPLICATION_ID};
use serde::Serialize;
use serde_repr::Serialize_repr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Id of the provider's `/imagine` application command.
pub const IMAGINE_COMMAND_ID: Snowflake = Snowflake::new(938956540159881230);

/// Version snowflake of the `/imagine` command descriptor.
///
/// The provider bumps this when it redeploys the command; a stale version
/// yields an invalid-request response rather than a silent failure.
pub const IMAGINE_COMMAND_VERSION: Snowflake = Snowflake::new(1237876415471554623);

/// Interaction type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr)]
#[repr(u8)]
pub enum InteractionType {
    /// A slash command invocation.
    ApplicationCommand = 2,
    /// A component (button) click.
    MessageComponent = 3,
}

/// A complete interaction request body.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionPayload {
    /// Interaction type.
    #[serde(rename = "type")]
    pub interaction_type: InteractionType,

    /// Application receiving the interaction.
    pub application_id: Snowflake,

    /// Guild the interaction happens in.
    pub guild_id: Snowflake,

    /// Channel the interaction happens in.
    pub channel_id: Snowflake,

    /// User gateway session id; authenticates this client instance.
    pub session_id: String,

    /// Message the interaction targets (component clicks only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Snowflake>,

    /// Type-specific data.
    pub data: InteractionData,

    /// Monotone client-local nonce.
    pub nonce: String,
}

/// Type-specific interaction data.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum InteractionData {
    /// Slash-command invocation data.
    Command(CommandData),
    /// Component click data.
    Component(ComponentData),
}

/// Slash-command invocation data.
#[derive(Debug, Clone, Serialize)]
pub struct CommandData {
    /// Command id.
    pub id: Snowflake,
    /// Command descriptor version.
    pub version: Snowflake,
    /// Command name.
    pub name: String,
    /// Command type (1 = chat input).
    #[serde(rename = "type")]
    pub command_type: u8,
    /// Options passed to the command.
    pub options: Vec<CommandOption>,
}

/// One option of a slash command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOption {
    /// Option type (3 = string).
    #[serde(rename = "type")]
    pub option_type: u8,
    /// Option name.
    pub name: String,
    /// Option value.
    pub value: String,
}

/// Component click data.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentData {
    /// Component type (2 = button).
    pub component_type: u8,
    /// The button's custom id, echoed back verbatim.
    pub custom_id: String,
}

impl InteractionPayload {
    /// Build an `/imagine` slash-command interaction.
    pub fn imagine(
        channel_id: Snowflake,
        guild_id: Snowflake,
        session_id: impl Into<String>,
        prompt: impl Into<String>,
        nonce: impl Into<String>,
    ) -> Self {
        Self::slash_command(
            channel_id,
            guild_id,
            session_id,
            "imagine",
            vec![CommandOption {
                option_type: 3,
                name: "prompt".to_string(),
                value: prompt.into(),
            }],
            nonce,
        )
    }

    /// Build a generic slash-command interaction (type 2).
    pub fn slash_command(
        channel_id: Snowflake,
        guild_id: Snowflake,
        session_id: impl Into<String>,
        command_name: impl Into<String>,
        options: Vec<CommandOption>,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            interaction_type: InteractionType::ApplicationCommand,
            application_id: PROVIDER_APPLICATION_ID,
            guild_id,
            channel_id,
            session_id: session_id.into(),
            message_id: None,
            data: InteractionData::Command(CommandData {
                id: IMAGINE_COMMAND_ID,
                version: IMAGINE_COMMAND_VERSION,
                name: command_name.into(),
                command_type: 1,
                options,
            }),
            nonce: nonce.into(),
        }
    }

    /// Build a button-click interaction (type 3).
    pub fn button_click(
        channel_id: Snowflake,
        guild_id: Snowflake,
        session_id: impl Into<String>,
        message_id: Snowflake,
        custom_id: impl Into<String>,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            interaction_type: InteractionType::MessageComponent,
            application_id: PROVIDER_APPLICATION_ID,
            guild_id,
            channel_id,
            session_id: session_id.into(),
            message_id: Some(message_id),
            data: InteractionData::Component(ComponentData {
                component_type: 2,
                custom_id: custom_id.into(),
            }),
            nonce: nonce.into(),
        }
    }
}

/// Monotone nonce source, one per client instance.
#[derive(Debug)]
pub struct NonceSequence(AtomicU64);

impl NonceSequence {
    /// Create a sequence starting at 1.
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Next nonce value.
    pub fn next(&self) -> String {
        self.0.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

impl Default for NonceSequence {
    fn default() -> Self {
        Self::new()
    }
}
