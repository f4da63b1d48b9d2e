//! Message wire types.
//!
//! Only the fields the generation pipeline reads are modelled; unknown
//! fields are ignored during deserialization.

use crate::component::Component;
use crate::snowflake::Snowflake;
use crate::user::User;
use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

bitflags! {
    /// Message flags relevant to moderation detection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MessageFlags: u64 {
        /// Only visible to the invoking user; the provider uses this for
        /// ephemeral moderation notices.
        const EPHEMERAL = 1 << 6;
        /// Interaction response is still loading.
        const LOADING = 1 << 7;
    }
}

impl Serialize for MessageFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for MessageFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u64::deserialize(deserializer)?;
        Ok(MessageFlags::from_bits_truncate(bits))
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Attachment {
    /// Attachment ID.
    pub id: Snowflake,
    /// Original filename.
    #[serde(default)]
    pub filename: String,
    /// MIME type, when the CDN knows it.
    #[serde(default)]
    pub content_type: Option<String>,
    /// CDN URL of the file.
    pub url: String,
    /// Proxied CDN URL.
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
}

/// Reference to another message (replies).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MessageReference {
    /// ID of the originating message.
    #[serde(default)]
    pub message_id: Option<Snowflake>,
    /// ID of the originating channel.
    #[serde(default)]
    pub channel_id: Option<Snowflake>,
    /// ID of the originating guild.
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

/// A channel message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    /// Message ID.
    pub id: Snowflake,
    /// Channel the message was sent in.
    pub channel_id: Snowflake,
    /// Guild the message was sent in, if any.
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// Author of the message.
    pub author: User,
    /// Message content.
    #[serde(default)]
    pub content: String,
    /// When the message was sent (ISO8601 timestamp).
    #[serde(default)]
    pub timestamp: String,
    /// When the message was last edited (ISO8601 timestamp).
    #[serde(default)]
    pub edited_timestamp: Option<String>,
    /// Attached files.
    #[serde(default)]
    pub attachments: SmallVec<[Attachment; 1]>,
    /// Interactive components.
    #[serde(default)]
    pub components: Vec<Component>,
    /// Message flags bitfield.
    #[serde(default)]
    pub flags: MessageFlags,
    /// Reference to the message this one replies to.
    #[serde(default)]
    pub message_reference: Option<MessageReference>,
}

impl Message {
    /// Creation time in milliseconds since the Unix epoch, derived from the
    /// snowflake rather than the ISO timestamp string.
    #[inline]
    pub fn created_at_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }

    /// URL of the first attachment, if any.
    pub fn first_attachment_url(&self) -> Option<&str> {
        self.attachments.first().map(|a| a.url.as_str())
    }
}

/// Partial payload carried by a MESSAGE_UPDATE dispatch.
///
/// Only `id` and `channel_id` are guaranteed; everything else is present
/// only when it changed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageUpdate {
    /// Message ID.
    pub id: Snowflake,
    /// Channel the message was sent in.
    pub channel_id: Snowflake,
    /// Author, when included.
    #[serde(default)]
    pub author: Option<User>,
    /// New content, when it changed.
    #[serde(default)]
    pub content: Option<String>,
    /// Edit timestamp (ISO8601).
    #[serde(default)]
    pub edited_timestamp: Option<String>,
    /// Attachments, when they changed.
    #[serde(default)]
    pub attachments: Option<SmallVec<[Attachment; 1]>>,
    /// Components, when they changed.
    #[serde(default)]
    pub components: Option<Vec<Component>>,
    /// Flags, when they changed.
    #[serde(default)]
    pub flags: Option<MessageFlags>,
}

/// Payload carried by a MESSAGE_DELETE dispatch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageDelete {
    /// Deleted message ID.
    pub id: Snowflake,
    /// Channel the message was deleted from.
    pub channel_id: Snowflake,
    /// Guild the message was deleted from, if any.
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}
