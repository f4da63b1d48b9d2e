//! Gateway intents.
//!
//! Intents are a bitfield that controls which events the gateway sends.
//! The generation pipeline only needs guild and guild-message events
//! (mask 513), but the full set of non-privileged message bits is kept so
//! operators can widen the mask without a model change.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags! {
    /// Gateway intents controlling which dispatch events are delivered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        /// Guild creation, update, delete, role changes.
        const GUILDS = 1 << 0;

        /// Messages in guild channels.
        const GUILD_MESSAGES = 1 << 9;

        /// Message reactions in guild channels.
        const GUILD_MESSAGE_REACTIONS = 1 << 10;

        /// Direct messages.
        const DIRECT_MESSAGES = 1 << 12;

        /// Message content in MESSAGE_CREATE events.
        const MESSAGE_CONTENT = 1 << 15;
    }
}

impl Default for Intents {
    /// `GUILDS | GUILD_MESSAGES` — the mask the interaction flow requires.
    fn default() -> Self {
        Intents::GUILDS | Intents::GUILD_MESSAGES
    }
}

impl Serialize for Intents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u64::deserialize(deserializer)?;
        Ok(Intents::from_bits_truncate(bits))
    }
}
