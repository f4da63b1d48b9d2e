//! Grid-to-upscale correlation.
//!
//! Upscale replies carry no interaction token linking them to the click
//! that caused them, and replies for a *previous* grid may still be
//! streaming in when a new generation starts. Correlation therefore
//! accepts a message for a variant only when time, fingerprint, and a
//! variant marker (or an explicit reply reference) all agree, and a shared
//! claim set guarantees a message id never resolves two variants.

use crate::observer::ChannelEvent;
use ahash::AHashSet;
use muse_model::{Fingerprint, Snowflake, PROVIDER_BOT_ID};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Clock-skew allowance when comparing message creation to click time.
pub const CORRELATION_SKEW: Duration = Duration::from_secs(1);

/// Per-variant correlation window.
pub const T_UPSCALE: Duration = Duration::from_secs(180);

/// Message ids already consumed by this generation.
///
/// Claiming is first-wins: the insert happens while the observer evaluates
/// the predicate, so even when all four variant predicates would accept a
/// message, exactly one receives it.
#[derive(Debug, Default)]
pub struct ClaimSet {
    inner: Mutex<AHashSet<Snowflake>>,
}

impl ClaimSet {
    /// Create an empty claim set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an id as consumed without contention (e.g. the grid itself).
    pub fn insert(&self, id: Snowflake) {
        self.inner.lock().insert(id);
    }

    /// Atomically claim an id. Returns false when it was already taken.
    pub fn try_claim(&self, id: Snowflake) -> bool {
        self.inner.lock().insert(id)
    }

    /// Whether an id has been consumed.
    pub fn contains(&self, id: Snowflake) -> bool {
        self.inner.lock().contains(&id)
    }
}

/// Build the subscription predicate for variant `v` (1-based).
///
/// Accepts a create iff all of:
/// - authored by the provider bot and carrying an attachment;
/// - created no earlier than the click, minus skew;
/// - its content contains the generation's fingerprint;
/// - it names this variant (`Image #v`), carries an upscale/variation
///   marker, or replies directly to the grid;
/// - its id was not yet claimed by a sibling (claimed on acceptance).
pub fn variant_predicate(
    fingerprint: Fingerprint,
    grid_message_id: Snowflake,
    variant: u8,
    clicked_at_unix_ms: u64,
    claims: Arc<ClaimSet>,
) -> impl Fn(&ChannelEvent) -> bool + Send + Sync {
    let marker = format!("Image #{variant}");
    let earliest_ms = clicked_at_unix_ms.saturating_sub(CORRELATION_SKEW.as_millis() as u64);

    move |event: &ChannelEvent| {
        let ChannelEvent::Create(message) = event else {
            return false;
        };

        if message.author.id != PROVIDER_BOT_ID {
            return false;
        }
        if message.attachments.is_empty() {
            return false;
        }
        if message.created_at_ms() < earliest_ms {
            return false;
        }
        if claims.contains(message.id) {
            return false;
        }
        if !fingerprint.matches_content(&message.content) {
            return false;
        }

        let references_grid = message
            .message_reference
            .as_ref()
            .and_then(|r| r.message_id)
            == Some(grid_message_id);
        let has_marker = message.content.contains(&marker)
            || message.content.contains("- Upscaled")
            || message.content.contains("- Variation");

        if !has_marker && !references_grid {
            return false;
        }

        // First match wins; losing siblings see the claim and refuse.
        claims.try_claim(message.id)
    }
}
