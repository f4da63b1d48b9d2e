//! Muse HTTP - rate-limited REST transport
#![deny(unsafe_code)]
//!
//! Three concerns live here: the endpoint-bucket rate limiter (header
//! tracking, global spacing, retry with backoff), the REST client that
//! posts interactions and reads channel messages, and the CDN fetcher
//! that downloads artifact bytes.

pub mod client;
pub mod error;
pub mod fetch;
pub mod interaction;
pub mod ratelimit;
pub mod routes;

// Public re-exports
pub use client::{AuthToken, RestClient};
pub use error::HttpError;
pub use fetch::{FetchedImage, ImageFetcher};
pub use interaction::{
    CommandData, CommandOption, ComponentData, InteractionData, InteractionPayload,
    InteractionType, NonceSequence, IMAGINE_COMMAND_ID, IMAGINE_COMMAND_VERSION,
};
pub use ratelimit::{RateLimiter, DEFAULT_MIN_SPACING, SERVER_ERROR_STATUSES};
pub use routes::Endpoint;
