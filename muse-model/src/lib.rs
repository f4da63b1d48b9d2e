//! Muse Model - wire types shared by the gateway, HTTP, and facade crates
#![deny(unsafe_code)]
//!
//! Everything here mirrors the platform's JSON shapes: snowflake ids that
//! serialize as strings, partial update payloads, numeric bitfields. The
//! one piece of domain logic that lives beside the types is prompt
//! fingerprinting, because both the state machine and the correlation
//! engine pair messages to prompts through it.

pub mod component;
pub mod fingerprint;
pub mod intents;
pub mod message;
pub mod snowflake;
pub mod user;

pub use component::{upscale_buttons, ActionRow, Button, Component, ComponentType, UpscaleButton};
pub use fingerprint::{bold_segment, normalize, Fingerprint, FINGERPRINT_MAX_CHARS};
pub use intents::Intents;
pub use message::{
    Attachment, Message, MessageDelete, MessageFlags, MessageReference, MessageUpdate,
};
pub use snowflake::{Snowflake, SNOWFLAKE_EPOCH_MS};
pub use user::User;

/// User id of the image-generation provider's bot account.
pub const PROVIDER_BOT_ID: Snowflake = Snowflake::new(936929561302675456);

/// Application id used when posting interactions to the provider.
pub const PROVIDER_APPLICATION_ID: Snowflake = Snowflake::new(936929561302675456);
