//! Generation state machine.
//!
//! A generation starts when the `/imagine` interaction is acknowledged and
//! ends in exactly one of seven outcomes: grid ready, pre-moderation
//! silence, post-moderation stop, ephemeral deletion, invalid request,
//! queue full, or job queued. The [`GenerationWatcher`] consumes observer
//! events and classifies them; the pre-moderation timeout and the invalid
//! request path live with the caller, which owns the clock and the
//! transport.

use crate::error::ErrorKind;
use crate::observer::ChannelEvent;
use ahash::AHashMap;
use muse_model::{
    upscale_buttons, Attachment, Component, Fingerprint, Snowflake, UpscaleButton,
    PROVIDER_BOT_ID,
};
use tracing::debug;

/// Silence window after the interaction ACK before the generation is
/// treated as silently moderated.
pub const T_PRE: std::time::Duration = std::time::Duration::from_secs(30);

/// Lifecycle of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    /// Interaction not yet acknowledged.
    Pending,
    /// Waiting for the provider's first reply.
    AwaitingGrid,
    /// A reply is tracked; waiting for the finished grid.
    Grid,
    /// Grid delivered; upscales may be requested.
    AwaitingUpscales,
    /// All done.
    Complete,
    /// Terminal failure.
    Failed,
}

/// Terminal classifications produced by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    /// Tracked reply was deleted.
    EphemeralModeration,
    /// Reply ended with `(Stopped)`.
    PostModeration,
    /// Reply indicates queueing rather than generation.
    JobQueued,
    /// The provider's queue is full.
    QueueFull,
}

impl TerminalKind {
    /// The caller-facing error kind for this terminal state.
    pub fn error_kind(self) -> ErrorKind {
        match self {
            TerminalKind::EphemeralModeration => ErrorKind::EphemeralModeration,
            TerminalKind::PostModeration => ErrorKind::PostModeration,
            TerminalKind::JobQueued => ErrorKind::JobQueued,
            TerminalKind::QueueFull => ErrorKind::QueueFull,
        }
    }
}

/// What a finished watcher observed.
#[derive(Debug, Clone)]
pub enum WatchOutcome {
    /// The full grid arrived: attachment plus all four upscale buttons.
    GridReady {
        /// The grid message id.
        message_id: Snowflake,
        /// CDN URL of the composite image.
        image_url: String,
        /// The four upscale buttons, in variant order.
        buttons: Vec<UpscaleButton>,
    },
    /// A terminal failure, with the triggering message when known.
    Failed(TerminalKind, Option<Snowflake>),
}

/// Last known state of a tracked provider reply.
#[derive(Debug, Default, Clone)]
struct TrackedMessage {
    content: String,
    attachments: Vec<Attachment>,
    components: Vec<Component>,
}

/// Consumes channel events for one generation and classifies them.
///
/// Replies are paired to the generation by equality on the normalized
/// fingerprint of their bolded prompt. Classification precedence (highest
/// first): deletion of a tracked reply, `(Stopped)` suffix, queue
/// indications, queue-full phrase, progress update, finished grid.
pub struct GenerationWatcher {
    fingerprint: Fingerprint,
    tracked: AHashMap<Snowflake, TrackedMessage>,
    progress: Option<u8>,
}

impl GenerationWatcher {
    /// Watch for replies matching `fingerprint`.
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            tracked: AHashMap::new(),
            progress: None,
        }
    }

    /// Whether any provider reply has been paired to this generation yet.
    /// While false past the silence window, the outcome is pre-moderation.
    pub fn has_candidate(&self) -> bool {
        !self.tracked.is_empty()
    }

    /// Latest observed progress percentage.
    pub fn progress(&self) -> Option<u8> {
        self.progress
    }

    /// Ids of every reply tracked so far.
    pub fn tracked_ids(&self) -> impl Iterator<Item = Snowflake> + '_ {
        self.tracked.keys().copied()
    }

    /// Feed one event; returns an outcome once the generation is decided.
    pub fn observe(&mut self, event: &ChannelEvent) -> Option<WatchOutcome> {
        match event {
            ChannelEvent::Delete(delete) => {
                if self.tracked.contains_key(&delete.id) {
                    return Some(WatchOutcome::Failed(
                        TerminalKind::EphemeralModeration,
                        Some(delete.id),
                    ));
                }
                None
            }

            ChannelEvent::Create(message) => {
                if message.author.id != PROVIDER_BOT_ID {
                    return None;
                }
                // Pairing is strict: the reply's bolded prompt must equal
                // this generation's fingerprint. Containment matching
                // belongs to upscale correlation, not here; a longer
                // prompt embedding this one is a different generation.
                if !self.fingerprint.matches_bold(&message.content) {
                    return None;
                }

                let state = TrackedMessage {
                    content: message.content.clone(),
                    attachments: message.attachments.to_vec(),
                    components: message.components.clone(),
                };
                self.tracked.insert(message.id, state.clone());
                debug!(message_id = %message.id, "Tracking provider reply");

                self.classify(message.id, &state)
            }

            ChannelEvent::Update(update) => {
                let Some(existing) = self.tracked.get(&update.id) else {
                    return None;
                };

                let mut state = existing.clone();
                if let Some(content) = &update.content {
                    state.content = content.clone();
                }
                if let Some(attachments) = &update.attachments {
                    state.attachments = attachments.to_vec();
                }
                if let Some(components) = &update.components {
                    state.components = components.clone();
                }
                self.tracked.insert(update.id, state.clone());

                self.classify(update.id, &state)
            }
        }
    }

    /// Classify a tracked reply's current state.
    fn classify(&mut self, id: Snowflake, state: &TrackedMessage) -> Option<WatchOutcome> {
        let content = state.content.trim_end();

        if content.ends_with("(Stopped)") {
            return Some(WatchOutcome::Failed(TerminalKind::PostModeration, Some(id)));
        }

        if content.ends_with("(Waiting to start)") || content.contains("Job queued") {
            return Some(WatchOutcome::Failed(TerminalKind::JobQueued, Some(id)));
        }

        if content.to_lowercase().contains("queue is full") {
            return Some(WatchOutcome::Failed(TerminalKind::QueueFull, Some(id)));
        }

        if let Some(percent) = progress_percent(content) {
            self.progress = Some(percent);
            debug!(message_id = %id, percent, "Generation progress");
            return None;
        }

        if !state.attachments.is_empty() {
            let buttons = upscale_buttons(id, &state.components);
            if buttons.len() == 4 {
                let image_url = state.attachments[0].url.clone();
                return Some(WatchOutcome::GridReady {
                    message_id: id,
                    image_url,
                    buttons,
                });
            }
        }

        None
    }
}

/// Extract a `(N%)` progress marker from reply content.
pub fn progress_percent(content: &str) -> Option<u8> {
    let bytes = content.as_bytes();
    for (idx, &b) in bytes.iter().enumerate() {
        if b != b'%' {
            continue;
        }
        if bytes.get(idx + 1) != Some(&b')') {
            continue;
        }
        // Walk back over the digits to the opening paren.
        let mut start = idx;
        while start > 0 && bytes[start - 1].is_ascii_digit() {
            start -= 1;
        }
        if start == idx || start == 0 || bytes[start - 1] != b'(' {
            continue;
        }
        if let Ok(percent) = content[start..idx].parse::<u8>() {
            return Some(percent.min(100));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use muse_model::{
        ActionRow, Button, ComponentType, Message, MessageDelete, MessageUpdate, User,
    };
    use std::sync::Arc;

    fn provider_message(id: u64, content: &str) -> Message {
        Message {
            id: Snowflake::new(id),
            channel_id: Snowflake::new(7),
            guild_id: None,
            author: User {
                id: PROVIDER_BOT_ID,
                username: "provider".to_string(),
                discriminator: None,
                bot: true,
            },
            content: content.to_string(),
            timestamp: String::new(),
            edited_timestamp: None,
            attachments: Default::default(),
            components: Vec::new(),
            flags: Default::default(),
            message_reference: None,
        }
    }

    fn with_grid_parts(mut message: Message) -> Message {
        message.attachments.push(Attachment {
            id: Snowflake::new(1),
            filename: "grid.png".to_string(),
            content_type: Some("image/png".to_string()),
            url: "https://cdn.example/grid.png".to_string(),
            proxy_url: None,
            size: 4096,
        });
        let buttons = (1..=4)
            .map(|v| {
                Component::Button(Button {
                    component_type: ComponentType::Button,
                    style: Some(2),
                    label: Some(format!("U{v}")),
                    custom_id: Some(format!("MJ::JOB::upsample::{v}::hash")),
                    url: None,
                    disabled: false,
                })
            })
            .collect();
        message.components = vec![Component::ActionRow(ActionRow {
            component_type: ComponentType::ActionRow,
            components: buttons,
        })];
        message
    }

    fn create(message: Message) -> ChannelEvent {
        ChannelEvent::Create(Arc::new(message))
    }

    fn update(id: u64, content: &str) -> ChannelEvent {
        ChannelEvent::Update(Arc::new(MessageUpdate {
            id: Snowflake::new(id),
            channel_id: Snowflake::new(7),
            author: None,
            content: Some(content.to_string()),
            edited_timestamp: None,
            attachments: None,
            components: None,
            flags: None,
        }))
    }

    fn watcher(prompt: &str) -> GenerationWatcher {
        GenerationWatcher::new(Fingerprint::new(prompt))
    }

    #[test]
    fn test_happy_path_grid_ready() {
        let mut w = watcher("cosmic space dolphin");
        let grid = with_grid_parts(provider_message(
            100,
            "**cosmic space dolphin** - <@1> (fast)",
        ));

        match w.observe(&create(grid)) {
            Some(WatchOutcome::GridReady {
                message_id,
                image_url,
                buttons,
            }) => {
                assert_eq!(message_id, Snowflake::new(100));
                assert_eq!(image_url, "https://cdn.example/grid.png");
                assert_eq!(buttons.len(), 4);
            }
            other => panic!("expected grid ready, got {other:?}"),
        }
    }

    #[test]
    fn test_progress_updates_keep_waiting() {
        let mut w = watcher("x");
        assert!(w
            .observe(&create(provider_message(100, "**x** - <@1> (0%) (fast)")))
            .is_none());
        assert_eq!(w.progress(), Some(0));

        assert!(w.observe(&update(100, "**x** - <@1> (46%) (fast)")).is_none());
        assert_eq!(w.progress(), Some(46));
    }

    #[test]
    fn test_post_moderation_on_stopped_suffix() {
        let mut w = watcher("x");
        w.observe(&create(provider_message(100, "**x** - <@1> (0%)")));

        match w.observe(&update(100, "**x** - <@1> (Stopped)")) {
            Some(WatchOutcome::Failed(TerminalKind::PostModeration, Some(id))) => {
                assert_eq!(id, Snowflake::new(100));
            }
            other => panic!("expected post-moderation, got {other:?}"),
        }
    }

    #[test]
    fn test_ephemeral_moderation_on_tracked_delete() {
        let mut w = watcher("x");
        w.observe(&create(provider_message(100, "**x** - <@1> (31%)")));

        let delete = ChannelEvent::Delete(MessageDelete {
            id: Snowflake::new(100),
            channel_id: Snowflake::new(7),
            guild_id: None,
        });
        assert!(matches!(
            w.observe(&delete),
            Some(WatchOutcome::Failed(TerminalKind::EphemeralModeration, Some(_)))
        ));
    }

    #[test]
    fn test_untracked_delete_ignored() {
        let mut w = watcher("x");
        let delete = ChannelEvent::Delete(MessageDelete {
            id: Snowflake::new(999),
            channel_id: Snowflake::new(7),
            guild_id: None,
        });
        assert!(w.observe(&delete).is_none());
    }

    #[test]
    fn test_job_queued_classifications() {
        let mut w = watcher("x");
        assert!(matches!(
            w.observe(&create(provider_message(100, "**x** - <@1> (Waiting to start)"))),
            Some(WatchOutcome::Failed(TerminalKind::JobQueued, _))
        ));

        let mut w = watcher("x");
        assert!(matches!(
            w.observe(&create(provider_message(101, "**x** - Job queued #4"))),
            Some(WatchOutcome::Failed(TerminalKind::JobQueued, _))
        ));
    }

    #[test]
    fn test_queue_full_classification() {
        let mut w = watcher("x");
        assert!(matches!(
            w.observe(&create(provider_message(
                100,
                "**x** - Sorry, the queue is full right now"
            ))),
            Some(WatchOutcome::Failed(TerminalKind::QueueFull, _))
        ));
    }

    #[test]
    fn test_stopped_beats_grid_parts() {
        // Precedence: a stopped suffix wins even when buttons are present.
        let mut w = watcher("x");
        let grid = with_grid_parts(provider_message(100, "**x** - <@1> (Stopped)"));
        assert!(matches!(
            w.observe(&create(grid)),
            Some(WatchOutcome::Failed(TerminalKind::PostModeration, _))
        ));
    }

    #[test]
    fn test_foreign_author_and_prompt_ignored() {
        let mut w = watcher("x");

        let mut foreign = provider_message(100, "**x** - (fast)");
        foreign.author.id = Snowflake::new(42);
        assert!(w.observe(&create(foreign)).is_none());
        assert!(!w.has_candidate());

        assert!(w
            .observe(&create(provider_message(101, "**other prompt** - (fast)")))
            .is_none());
        assert!(!w.has_candidate());
    }

    #[test]
    fn test_embedding_prompt_is_not_paired() {
        // A longer prompt that merely contains this one is a different
        // generation; pairing is equality, not containment.
        let mut w = watcher("a cat");
        assert!(w
            .observe(&create(provider_message(
                100,
                "**a cat wearing a top hat** - <@1> (0%)"
            )))
            .is_none());
        assert!(!w.has_candidate());

        assert!(w
            .observe(&create(provider_message(101, "**A  Cat --v 6** - <@1> (0%)")))
            .is_none());
        assert!(w.has_candidate());
    }

    #[test]
    fn test_incomplete_button_row_keeps_waiting() {
        let mut w = watcher("x");
        let mut grid = with_grid_parts(provider_message(100, "**x** - <@1>"));
        // Drop one button; three of four is not a finished grid.
        if let Component::ActionRow(row) = &mut grid.components[0] {
            row.components.pop();
        }
        assert!(w.observe(&create(grid)).is_none());
        assert!(w.has_candidate());
    }

    #[test]
    fn test_progress_percent_parsing() {
        assert_eq!(progress_percent("**x** - <@1> (0%) (fast)"), Some(0));
        assert_eq!(progress_percent("**x** - <@1> (46%)"), Some(46));
        assert_eq!(progress_percent("**x** (100%)"), Some(100));
        assert_eq!(progress_percent("**x** - <@1> (fast)"), None);
        assert_eq!(progress_percent("50% there"), None);
        assert_eq!(progress_percent("(%)"), None);
    }
}
