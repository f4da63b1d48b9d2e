//! Muse - image generation through a chat-platform provider
#![deny(unsafe_code)]
//!
//! The provider exposes no first-party API: it is reachable only through a
//! chat platform, as a bot that answers slash commands with image grids
//! and button clicks with upscales. This crate is the protocol-adaptation
//! engine that drives it end to end:
//!
//! - two concurrent gateway sessions (a *user* identity, which alone may
//!   send interactions, and a *bot* identity for richer events) feed one
//!   [`observer::MessageObserver`];
//! - [`Client::generate`] sends the slash command and classifies the
//!   provider's reply into one of seven outcomes;
//! - [`Client::upscale_all`] clicks all four upscale buttons and
//!   correlates the replies back to *this* grid, never a previous one;
//! - artifacts land in a [`muse_storage::ArtifactStore`] with the grid
//!   back-reference as durable proof of correlation.
//!
//! # Example
//!
//! ```no_run
//! use muse::{Client, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder(Config::from_env()?).build()?;
//!     client.initialize().await?;
//!
//!     let generation = client.generate("beautiful cosmic space dolphin").await?;
//!     let upscales = client.upscale_all(generation.grid_message_id).await?;
//!     for upscale in &upscales {
//!         match &upscale.outcome {
//!             Ok(u) => println!("variant {} -> {}", u.variant_index, u.storage_id),
//!             Err(e) => eprintln!("variant {} failed: {e}", upscale.variant_index),
//!         }
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod correlate;
pub mod error;
pub mod generation;
pub mod observer;
pub mod transport;

pub use client::{Client, ClientBuilder, Deadlines, Generation, Upscale, UpscaleResult};
pub use config::{Config, ConfigError};
pub use correlate::{ClaimSet, CORRELATION_SKEW, T_UPSCALE};
pub use error::{ErrorKind, GenerationError, MuseError};
pub use generation::{GenerationStatus, GenerationWatcher, TerminalKind, WatchOutcome, T_PRE};
pub use observer::{ChannelEvent, MessageObserver, Subscription};
pub use transport::{ArtifactFetcher, InteractionTransport};

// The building blocks, re-exported for embedders.
pub use muse_gateway as gateway;
pub use muse_http as http;
pub use muse_model as model;
pub use muse_storage as storage;
