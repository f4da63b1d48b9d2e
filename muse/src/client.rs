//! Client facade.
//!
//! The [`Client`] owns every I/O resource: two gateway sessions (user and
//! bot identities), the observer that merges their events, the rate-limited
//! interaction transport, the artifact fetcher, and the store. There is no
//! process-wide state; drop the client and everything it owned is gone.
//!
//! `generate` is serialized across the client and spends one provider
//! credit per call. `upscale_all` resolves its four variants in parallel,
//! best-effort per variant. `initialize` and `close` are idempotent.

use crate::config::Config;
use crate::correlate::{variant_predicate, ClaimSet, T_UPSCALE};
use crate::error::{http_error_kind, ErrorKind, GenerationError, MuseError};
use crate::generation::{GenerationStatus, GenerationWatcher, WatchOutcome, T_PRE};
use crate::observer::{ChannelEvent, MessageObserver};
use crate::transport::{ArtifactFetcher, InteractionTransport};

use muse_gateway::{Session, SessionConfig, SessionKind};
use muse_http::interaction::CommandOption;
use muse_http::{AuthToken, ImageFetcher, RestClient};
use muse_model::{bold_segment, upscale_buttons, Fingerprint, Snowflake, UpscaleButton};
use muse_storage::{
    ArtifactKind, ArtifactMeta, ArtifactStore, FilesystemStore, GridEntry, RecordEntry,
    VariantEntry,
};

use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// How long `close` waits for a task before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Per-call deadlines. The defaults match the provider's observed pacing.
#[derive(Debug, Clone)]
pub struct Deadlines {
    /// Cap on waiting for both sessions to reach READY.
    pub initialize: Duration,
    /// Overall `generate` deadline.
    pub generate: Duration,
    /// Overall `upscale_all` deadline.
    pub upscale_all: Duration,
    /// Silence window before a generation is pre-moderated.
    pub grid_silence: Duration,
    /// Per-variant correlation window.
    pub upscale_variant: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            initialize: Duration::from_secs(30),
            generate: Duration::from_secs(600),
            upscale_all: Duration::from_secs(240),
            grid_silence: T_PRE,
            upscale_variant: T_UPSCALE,
        }
    }
}

/// A successful generation.
#[derive(Debug, Clone)]
pub struct Generation {
    /// Timestamp stamp grouping this generation's stored artifacts.
    pub generation_id: String,
    /// Message id of the finished grid.
    pub grid_message_id: Snowflake,
    /// CDN URL of the composite image.
    pub image_url: String,
    /// The raw prompt.
    pub prompt: String,
    /// Normalized prompt fingerprint.
    pub fingerprint: String,
    /// Where the grid was persisted.
    pub storage_id: String,
    /// The four upscale buttons, in variant order.
    pub buttons: Vec<UpscaleButton>,
}

/// A resolved upscale.
#[derive(Debug, Clone)]
pub struct Upscale {
    /// Zero-based variant index.
    pub variant_index: u8,
    /// Grid this variant belongs to.
    pub grid_message_id: Snowflake,
    /// Message that delivered the upscale.
    pub message_id: Snowflake,
    /// CDN URL of the upscaled image.
    pub image_url: String,
    /// Where the upscale was persisted.
    pub storage_id: String,
}

/// Per-variant outcome of `upscale_all`.
#[derive(Debug)]
pub struct UpscaleResult {
    /// Zero-based variant index.
    pub variant_index: u8,
    /// The variant's terminal outcome.
    pub outcome: Result<Upscale, GenerationError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
}

/// The generation whose grid most recently completed; upscales correlate
/// against it.
#[derive(Clone)]
struct ActiveGeneration {
    generation_id: String,
    prompt: String,
    fingerprint: Fingerprint,
    grid_message_id: Snowflake,
    buttons: Vec<UpscaleButton>,
    claims: Arc<ClaimSet>,
}

struct ClientInner {
    config: Config,
    deadlines: Deadlines,
    user_config: SessionConfig,
    bot_config: SessionConfig,
    user_session: RwLock<Arc<Session>>,
    bot_session: RwLock<Arc<Session>>,
    observer: MessageObserver,
    transport: Arc<dyn InteractionTransport>,
    fetcher: Arc<dyn ArtifactFetcher>,
    store: Arc<dyn ArtifactStore>,
    lifecycle: Mutex<Lifecycle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Serializes `generate`: exactly one generation in flight.
    generate_lock: tokio::sync::Mutex<()>,
    current: Mutex<Option<ActiveGeneration>>,
    user_session_id: RwLock<Option<String>>,
}

/// The image-generation client.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a builder for the given configuration.
    pub fn builder(config: Config) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// The observer merging both sessions' message events.
    ///
    /// Exposed so operators can feed the polling fallback through the same
    /// dedupe and ordering path the gateway uses.
    pub fn observer(&self) -> &MessageObserver {
        &self.inner.observer
    }

    /// The user-identity gateway session (recreated on each initialize).
    pub fn user_session(&self) -> Arc<Session> {
        self.inner.user_session.read().clone()
    }

    /// The bot-identity gateway session (recreated on each initialize).
    pub fn bot_session(&self) -> Arc<Session> {
        self.inner.bot_session.read().clone()
    }

    /// Open both gateway sessions and wait for both READYs.
    ///
    /// Idempotent: calling on a running client is a no-op. A fatal close
    /// (bad token, disallowed intents) surfaces as
    /// [`MuseError::Gateway`] with an authentication error inside.
    pub async fn initialize(&self) -> Result<(), MuseError> {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Running => return Ok(()),
                Lifecycle::Idle => *lifecycle = Lifecycle::Running,
            }
        }

        // Sessions are one-shot; each initialize starts from fresh ones.
        let user_session = Arc::new(Session::new(self.inner.user_config.clone()));
        let bot_session = Arc::new(Session::new(self.inner.bot_config.clone()));
        *self.inner.user_session.write() = user_session.clone();
        *self.inner.bot_session.write() = bot_session.clone();

        let (event_tx, event_rx) = flume::unbounded();
        let observer = self.inner.observer.clone();

        let user_runner = user_session.clone();
        let user_tx = event_tx.clone();
        let user_task = tokio::spawn(async move {
            if let Err(err) = user_runner.run(user_tx).await {
                warn!(session = "user", error = %err, "Session terminated");
            }
        });
        let bot_runner = bot_session.clone();
        let bot_task = tokio::spawn(async move {
            if let Err(err) = bot_runner.run(event_tx).await {
                warn!(session = "bot", error = %err, "Session terminated");
            }
        });
        let observer_task = tokio::spawn(async move {
            observer.run(event_rx).await;
        });

        {
            let mut tasks = self.inner.tasks.lock();
            tasks.push(user_task);
            tasks.push(bot_task);
            tasks.push(observer_task);
        }

        let limit = self.inner.deadlines.initialize;
        let (user_ready, bot_ready) = tokio::join!(
            user_session.wait_ready(limit),
            bot_session.wait_ready(limit),
        );

        match (user_ready, bot_ready) {
            (Ok(user_session_id), Ok(_)) => {
                *self.inner.user_session_id.write() = Some(user_session_id);
                info!("Client initialized, both sessions ready");
                Ok(())
            }
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "Initialization failed, tearing down");
                self.teardown().await;
                *self.inner.lifecycle.lock() = Lifecycle::Idle;
                Err(err.into())
            }
        }
    }

    /// Run one generation to its terminal outcome.
    ///
    /// Not idempotent: every call spends one provider credit. Calls are
    /// serialized across the client; the provider requires one in-flight
    /// generation at a time for its replies to stay attributable.
    pub async fn generate(&self, prompt: &str) -> Result<Generation, MuseError> {
        self.ensure_running()?;
        let _serial = self.inner.generate_lock.lock().await;
        let session_id = self.require_session_id()?;

        let started = Instant::now();
        let overall_deadline = started + self.inner.deadlines.generate;
        let fingerprint = Fingerprint::new(prompt);
        let generation_id = generation_stamp();
        let channel_id = self.inner.config.channel_id;

        info!(
            generation_id = %generation_id,
            fingerprint = %fingerprint,
            "Starting generation"
        );

        // Subscribe before sending: the provider's first reply can beat
        // the interaction ACK.
        let subscription = self.inner.observer.subscribe(channel_id, |event| {
            match event {
                // Creates are pre-filtered to the provider; the watcher
                // does the fingerprint pairing.
                ChannelEvent::Create(m) => m.author.id == muse_model::PROVIDER_BOT_ID,
                // Updates and deletes are classified against tracked ids.
                _ => true,
            }
        });

        let options = vec![CommandOption {
            option_type: 3,
            name: "prompt".to_string(),
            value: prompt.to_string(),
        }];
        if let Err(err) = self
            .inner
            .transport
            .send_slash_command(
                channel_id,
                self.inner.config.guild_id,
                "imagine",
                options,
                &session_id,
                overall_deadline,
            )
            .await
        {
            let kind = http_error_kind(&err);
            return Err(GenerationError::new(
                kind,
                fingerprint.as_str(),
                started.elapsed(),
                err.to_string(),
            )
            .into());
        }

        debug!(status = ?GenerationStatus::AwaitingGrid, "Interaction acknowledged");

        let mut watcher = GenerationWatcher::new(fingerprint.clone());
        let silence_deadline = Instant::now() + self.inner.deadlines.grid_silence;
        let mut status = GenerationStatus::AwaitingGrid;

        let (grid_message_id, image_url, buttons) = loop {
            let wait_until = if watcher.has_candidate() {
                overall_deadline
            } else {
                silence_deadline.min(overall_deadline)
            };

            let event = match timeout_at(wait_until, subscription.next()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    return Err(GenerationError::new(
                        ErrorKind::Cancelled,
                        fingerprint.as_str(),
                        started.elapsed(),
                        "observer shut down mid-generation",
                    )
                    .into());
                }
                Err(_) => {
                    let (kind, detail) = if watcher.has_candidate() {
                        (ErrorKind::Deadline, "generation deadline elapsed".to_string())
                    } else {
                        (
                            ErrorKind::PreModeration,
                            format!(
                                "no provider reply within {:?}",
                                self.inner.deadlines.grid_silence
                            ),
                        )
                    };
                    return Err(GenerationError::new(
                        kind,
                        fingerprint.as_str(),
                        started.elapsed(),
                        detail,
                    )
                    .into());
                }
            };

            let outcome = watcher.observe(&event);

            if status == GenerationStatus::AwaitingGrid && watcher.has_candidate() {
                status = GenerationStatus::Grid;
                debug!(status = ?status, "Provider reply tracked");
            }

            if let Some(outcome) = outcome {
                match outcome {
                    WatchOutcome::GridReady {
                        message_id,
                        image_url,
                        buttons,
                    } => break (message_id, image_url, buttons),
                    WatchOutcome::Failed(terminal, message_id) => {
                        warn!(
                            status = ?GenerationStatus::Failed,
                            kind = ?terminal,
                            message_id = ?message_id,
                            "Generation failed"
                        );
                        return Err(GenerationError::new(
                            terminal.error_kind(),
                            fingerprint.as_str(),
                            started.elapsed(),
                            format!("provider reply classified as {terminal:?}"),
                        )
                        .with_message(message_id)
                        .into());
                    }
                }
            }
        };
        drop(subscription);

        info!(
            status = ?GenerationStatus::Complete,
            %grid_message_id,
            elapsed_ms = started.elapsed().as_millis(),
            "Grid ready"
        );

        // Everything this generation already consumed is off-limits to the
        // upscale correlator, the grid itself first of all.
        let claims = Arc::new(ClaimSet::new());
        claims.insert(grid_message_id);
        for id in watcher.tracked_ids() {
            claims.insert(id);
        }

        let storage_id = self
            .persist_grid(
                &generation_id,
                prompt,
                &fingerprint,
                grid_message_id,
                &image_url,
                started,
            )
            .await?;

        *self.inner.current.lock() = Some(ActiveGeneration {
            generation_id: generation_id.clone(),
            prompt: prompt.to_string(),
            fingerprint: fingerprint.clone(),
            grid_message_id,
            buttons: buttons.clone(),
            claims,
        });

        Ok(Generation {
            generation_id,
            grid_message_id,
            image_url,
            prompt: prompt.to_string(),
            fingerprint: fingerprint.as_str().to_string(),
            storage_id,
            buttons,
        })
    }

    /// Request and correlate all four upscales of a grid.
    ///
    /// Variants run in parallel and fail independently; a timeout on one
    /// never aborts its siblings. Results come back in variant order.
    pub async fn upscale_all(
        &self,
        grid_message_id: Snowflake,
    ) -> Result<Vec<UpscaleResult>, MuseError> {
        self.ensure_running()?;
        let session_id = self.require_session_id()?;

        let started = Instant::now();
        let overall_deadline = started + self.inner.deadlines.upscale_all;

        let active = self
            .active_generation_for(grid_message_id, overall_deadline)
            .await?;

        info!(
            status = ?GenerationStatus::AwaitingUpscales,
            %grid_message_id,
            fingerprint = %active.fingerprint,
            "Requesting all four upscales"
        );

        let buttons = active.buttons.clone();
        let mut tasks = Vec::with_capacity(buttons.len());
        for button in buttons.iter().cloned() {
            let client = self.clone();
            let active = active.clone();
            let session_id = session_id.clone();
            tasks.push(tokio::spawn(async move {
                client
                    .correlate_variant(active, button, session_id, overall_deadline)
                    .await
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (button, task) in buttons.iter().zip(tasks) {
            match task.await {
                Ok(result) => results.push(result),
                Err(_) => results.push(UpscaleResult {
                    variant_index: button.variant_index,
                    outcome: Err(GenerationError::new(
                        ErrorKind::Cancelled,
                        active.fingerprint.as_str(),
                        started.elapsed(),
                        "variant task cancelled",
                    )),
                }),
            }
        }

        results.sort_by_key(|r| r.variant_index);
        Ok(results)
    }

    /// Polling fallback: recent channel messages through the transport.
    pub async fn recent_messages(&self, limit: u8) -> Result<Vec<muse_model::Message>, MuseError> {
        self.ensure_running()?;
        let deadline = Instant::now() + Duration::from_secs(30);
        Ok(self
            .inner
            .transport
            .list_recent_messages(self.inner.config.channel_id, limit, deadline)
            .await?)
    }

    /// Shut the client down.
    ///
    /// Teardown is ordered: session loops stop first (each owns its
    /// heartbeat ticker and websocket reader), then the observer
    /// dispatcher, then outstanding subscriptions, whose holders see
    /// end-of-stream and resolve with cancellation errors. Idempotent.
    pub async fn close(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if *lifecycle == Lifecycle::Idle {
                return;
            }
            *lifecycle = Lifecycle::Idle;
        }

        info!("Closing client");
        self.teardown().await;
    }

    async fn teardown(&self) {
        self.user_session().shutdown();
        self.bot_session().shutdown();

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for mut task in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }

        self.inner.observer.cancel_subscriptions();
        *self.inner.user_session_id.write() = None;
        *self.inner.current.lock() = None;
    }

    async fn correlate_variant(
        &self,
        active: ActiveGeneration,
        button: UpscaleButton,
        session_id: String,
        overall_deadline: Instant,
    ) -> UpscaleResult {
        let variant_index = button.variant_index;
        let started = Instant::now();
        let channel_id = self.inner.config.channel_id;

        // Subscribe before clicking: the reply can beat the 204.
        let clicked_at = unix_ms();
        let subscription = self.inner.observer.subscribe(
            channel_id,
            variant_predicate(
                active.fingerprint.clone(),
                active.grid_message_id,
                variant_index + 1,
                clicked_at,
                active.claims.clone(),
            ),
        );

        let variant_deadline =
            (started + self.inner.deadlines.upscale_variant).min(overall_deadline);

        if let Err(err) = self
            .inner
            .transport
            .send_button_interaction(
                channel_id,
                self.inner.config.guild_id,
                active.grid_message_id,
                &button.custom_id,
                &session_id,
                variant_deadline,
            )
            .await
        {
            return UpscaleResult {
                variant_index,
                outcome: Err(GenerationError::new(
                    http_error_kind(&err),
                    active.fingerprint.as_str(),
                    started.elapsed(),
                    err.to_string(),
                )),
            };
        }

        let message = match timeout_at(variant_deadline, subscription.next()).await {
            Ok(Some(ChannelEvent::Create(message))) => message,
            Ok(_) => {
                return UpscaleResult {
                    variant_index,
                    outcome: Err(GenerationError::new(
                        ErrorKind::Cancelled,
                        active.fingerprint.as_str(),
                        started.elapsed(),
                        "observer shut down mid-correlation",
                    )),
                };
            }
            Err(_) => {
                let kind = if Instant::now() >= overall_deadline {
                    ErrorKind::Deadline
                } else {
                    ErrorKind::Correlation
                };
                return UpscaleResult {
                    variant_index,
                    outcome: Err(GenerationError::new(
                        kind,
                        active.fingerprint.as_str(),
                        started.elapsed(),
                        "no correlated reply within the variant window",
                    )),
                };
            }
        };

        debug!(
            variant = variant_index,
            message_id = %message.id,
            "Variant correlated"
        );

        let Some(image_url) = message.first_attachment_url().map(str::to_string) else {
            return UpscaleResult {
                variant_index,
                outcome: Err(GenerationError::new(
                    ErrorKind::Correlation,
                    active.fingerprint.as_str(),
                    started.elapsed(),
                    "correlated reply lost its attachment",
                )
                .with_message(Some(message.id))),
            };
        };

        match self
            .persist_upscale(&active, variant_index, &image_url)
            .await
        {
            Ok(storage_id) => UpscaleResult {
                variant_index,
                outcome: Ok(Upscale {
                    variant_index,
                    grid_message_id: active.grid_message_id,
                    message_id: message.id,
                    image_url,
                    storage_id,
                }),
            },
            Err((kind, detail)) => UpscaleResult {
                variant_index,
                outcome: Err(GenerationError::new(
                    kind,
                    active.fingerprint.as_str(),
                    started.elapsed(),
                    detail,
                )
                .with_message(Some(message.id))),
            },
        }
    }

    async fn persist_grid(
        &self,
        generation_id: &str,
        prompt: &str,
        fingerprint: &Fingerprint,
        grid_message_id: Snowflake,
        image_url: &str,
        started: Instant,
    ) -> Result<String, MuseError> {
        let image = self.inner.fetcher.fetch(image_url).await.map_err(|err| {
            GenerationError::new(
                http_error_kind(&err),
                fingerprint.as_str(),
                started.elapsed(),
                format!("grid download failed: {err}"),
            )
            .with_message(Some(grid_message_id))
        })?;

        let meta = ArtifactMeta {
            generation_id: generation_id.to_string(),
            kind: ArtifactKind::Grid,
            variant_index: None,
            grid_message_id,
            prompt: prompt.to_string(),
            fingerprint: fingerprint.as_str().to_string(),
            source_url: image_url.to_string(),
            content_type: image.content_type.clone(),
        };

        let storage_id = self.inner.store.save_grid(&image.bytes, &meta).await?;
        self.inner
            .store
            .append_metadata(
                generation_id,
                RecordEntry::Grid(GridEntry {
                    grid_message_id,
                    storage_id: storage_id.clone(),
                    source_url: image_url.to_string(),
                    prompt: prompt.to_string(),
                    fingerprint: fingerprint.as_str().to_string(),
                }),
            )
            .await?;

        Ok(storage_id)
    }

    async fn persist_upscale(
        &self,
        active: &ActiveGeneration,
        variant_index: u8,
        image_url: &str,
    ) -> Result<String, (ErrorKind, String)> {
        let image = self
            .inner
            .fetcher
            .fetch(image_url)
            .await
            .map_err(|err| (http_error_kind(&err), format!("upscale download failed: {err}")))?;

        let meta = ArtifactMeta {
            generation_id: active.generation_id.clone(),
            kind: ArtifactKind::Upscale,
            variant_index: Some(variant_index),
            grid_message_id: active.grid_message_id,
            prompt: active.prompt.clone(),
            fingerprint: active.fingerprint.as_str().to_string(),
            source_url: image_url.to_string(),
            content_type: image.content_type.clone(),
        };

        let storage_id = self
            .inner
            .store
            .save_upscale(&image.bytes, &meta)
            .await
            .map_err(|err| (ErrorKind::Storage, err.to_string()))?;

        self.inner
            .store
            .append_metadata(
                &active.generation_id,
                RecordEntry::Variant(VariantEntry {
                    variant_index,
                    grid_message_id: active.grid_message_id,
                    storage_id: storage_id.clone(),
                    source_url: image_url.to_string(),
                }),
            )
            .await
            .map_err(|err| (ErrorKind::Storage, err.to_string()))?;

        Ok(storage_id)
    }

    /// The generation owning `grid_message_id`, rebuilt from a message
    /// lookup when the in-memory context is gone (e.g. after a restart).
    async fn active_generation_for(
        &self,
        grid_message_id: Snowflake,
        deadline: Instant,
    ) -> Result<ActiveGeneration, MuseError> {
        if let Some(active) = self.inner.current.lock().clone() {
            if active.grid_message_id == grid_message_id {
                return Ok(active);
            }
        }

        debug!(%grid_message_id, "No in-memory context, refetching grid message");
        let message = self
            .inner
            .transport
            .get_message(self.inner.config.channel_id, grid_message_id, deadline)
            .await?;

        let buttons = upscale_buttons(grid_message_id, &message.components);
        if buttons.len() != 4 {
            return Err(GenerationError::new(
                ErrorKind::Correlation,
                "",
                Duration::ZERO,
                format!(
                    "message carries {} upscale buttons, need 4",
                    buttons.len()
                ),
            )
            .with_message(Some(grid_message_id))
            .into());
        }

        let prompt = bold_segment(&message.content)
            .unwrap_or(&message.content)
            .to_string();
        let claims = Arc::new(ClaimSet::new());
        claims.insert(grid_message_id);

        let active = ActiveGeneration {
            generation_id: generation_stamp(),
            fingerprint: Fingerprint::new(&prompt),
            prompt,
            grid_message_id,
            buttons,
            claims,
        };
        *self.inner.current.lock() = Some(active.clone());
        Ok(active)
    }

    fn ensure_running(&self) -> Result<(), MuseError> {
        match *self.inner.lifecycle.lock() {
            Lifecycle::Running => Ok(()),
            Lifecycle::Idle => Err(MuseError::NotInitialized),
        }
    }

    fn require_session_id(&self) -> Result<String, MuseError> {
        self.inner
            .user_session_id
            .read()
            .clone()
            .ok_or(MuseError::NotInitialized)
    }

    /// Put the client online without opening gateway connections.
    #[cfg(test)]
    fn force_online(&self, session_id: &str) {
        *self.inner.lifecycle.lock() = Lifecycle::Running;
        *self.inner.user_session_id.write() = Some(session_id.to_string());
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    config: Config,
    deadlines: Deadlines,
    gateway_url: Option<String>,
    storage_root: PathBuf,
    reorder_grace: Option<Duration>,
    transport: Option<Arc<dyn InteractionTransport>>,
    fetcher: Option<Arc<dyn ArtifactFetcher>>,
    store: Option<Arc<dyn ArtifactStore>>,
}

impl ClientBuilder {
    /// Start a builder from credentials.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            deadlines: Deadlines::default(),
            gateway_url: None,
            storage_root: PathBuf::from("output"),
            reorder_grace: None,
            transport: None,
            fetcher: None,
            store: None,
        }
    }

    /// Override the per-call deadlines.
    #[must_use]
    pub fn deadlines(mut self, deadlines: Deadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    /// Connect to a non-default gateway URL.
    #[must_use]
    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    /// Root directory for the default filesystem store.
    #[must_use]
    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    /// Override the observer's reorder grace window.
    #[must_use]
    pub fn reorder_grace(mut self, grace: Duration) -> Self {
        self.reorder_grace = Some(grace);
        self
    }

    /// Use a custom interaction transport (tests, proxies).
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn InteractionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom artifact fetcher.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Use a custom artifact store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the client. Opens no connections; `initialize` does that.
    pub fn build(self) -> Result<Client, MuseError> {
        let transport: Arc<dyn InteractionTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(RestClient::new(AuthToken::User(
                self.config.user_token.clone(),
            ))?),
        };
        let fetcher: Arc<dyn ArtifactFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(ImageFetcher::new()?),
        };
        let store: Arc<dyn ArtifactStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FilesystemStore::new(self.storage_root)),
        };

        let mut user_config =
            SessionConfig::new(self.config.user_token.clone(), SessionKind::User);
        let mut bot_config = SessionConfig::new(self.config.bot_token.clone(), SessionKind::Bot);
        if let Some(url) = &self.gateway_url {
            user_config = user_config.with_gateway_url(url.clone());
            bot_config = bot_config.with_gateway_url(url.clone());
        }

        let observer = match self.reorder_grace {
            Some(grace) => MessageObserver::with_grace(grace),
            None => MessageObserver::new(),
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                config: self.config,
                deadlines: self.deadlines,
                user_session: RwLock::new(Arc::new(Session::new(user_config.clone()))),
                bot_session: RwLock::new(Arc::new(Session::new(bot_config.clone()))),
                user_config,
                bot_config,
                observer,
                transport,
                fetcher,
                store,
                lifecycle: Mutex::new(Lifecycle::Idle),
                tasks: Mutex::new(Vec::new()),
                generate_lock: tokio::sync::Mutex::new(()),
                current: Mutex::new(None),
                user_session_id: RwLock::new(None),
            }),
        })
    }
}

/// Timestamp stamp grouping one generation's stored outputs.
fn generation_stamp() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Wall-clock milliseconds since the Unix epoch.
fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use muse_gateway::GatewayEvent;
    use muse_http::fetch::FetchedImage;
    use muse_http::HttpError;
    use muse_model::{
        ActionRow, Attachment, Button, Component, ComponentType, Message, MessageReference,
        MessageUpdate, User, PROVIDER_BOT_ID,
    };
    use muse_storage::MemoryStore;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    const CHANNEL: Snowflake = Snowflake::new(900000000000000001);
    const GUILD: Snowflake = Snowflake::new(800000000000000001);

    static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

    /// A unique snowflake whose creation time is `offset_ms` from now.
    fn fresh_id(offset_ms: i64) -> Snowflake {
        let now = unix_ms() as i64;
        let base = Snowflake::from_unix_ms((now + offset_ms).max(0) as u64).get();
        Snowflake::new(base + ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    fn provider_user() -> User {
        User {
            id: PROVIDER_BOT_ID,
            username: "provider".to_string(),
            discriminator: None,
            bot: true,
        }
    }

    fn base_message(id: Snowflake, content: &str) -> Message {
        Message {
            id,
            channel_id: CHANNEL,
            guild_id: Some(GUILD),
            author: provider_user(),
            content: content.to_string(),
            timestamp: String::new(),
            edited_timestamp: None,
            attachments: Default::default(),
            components: Vec::new(),
            flags: Default::default(),
            message_reference: None,
        }
    }

    fn with_attachment(mut message: Message, url: &str) -> Message {
        message.attachments.push(Attachment {
            id: Snowflake::new(1),
            filename: "image.png".to_string(),
            content_type: Some("image/png".to_string()),
            url: url.to_string(),
            proxy_url: None,
            size: 4096,
        });
        message
    }

    fn upsample_row() -> Vec<Component> {
        let buttons = (1..=4)
            .map(|v| {
                Component::Button(Button {
                    component_type: ComponentType::Button,
                    style: Some(2),
                    label: Some(format!("U{v}")),
                    custom_id: Some(format!("MJ::JOB::upsample::{v}::JOBHASH")),
                    url: None,
                    disabled: false,
                })
            })
            .collect();
        vec![Component::ActionRow(ActionRow {
            component_type: ComponentType::ActionRow,
            components: buttons,
        })]
    }

    fn grid_message(id: Snowflake, prompt: &str) -> Message {
        let mut message = with_attachment(
            base_message(id, &format!("**{prompt}** - <@111> (fast)")),
            "https://cdn.example/grid.png",
        );
        message.components = upsample_row();
        message
    }

    fn upscale_message(id: Snowflake, prompt: &str, variant: u8, grid_id: Snowflake) -> Message {
        let mut message = with_attachment(
            base_message(
                id,
                &format!("**{prompt}** - Image #{variant} <@111>"),
            ),
            &format!("https://cdn.example/upscale_{variant}.png"),
        );
        message.message_reference = Some(MessageReference {
            message_id: Some(grid_id),
            channel_id: Some(CHANNEL),
            guild_id: Some(GUILD),
        });
        message
    }

    fn create(message: Message) -> GatewayEvent {
        GatewayEvent::MessageCreate(Box::new(message))
    }

    fn update(id: Snowflake, content: &str) -> GatewayEvent {
        GatewayEvent::MessageUpdate(Box::new(MessageUpdate {
            id,
            channel_id: CHANNEL,
            author: None,
            content: Some(content.to_string()),
            edited_timestamp: None,
            attachments: None,
            components: None,
            flags: None,
        }))
    }

    /// Scripted events with per-event delays, injected when a command or
    /// click is received.
    type Script = Vec<(u64, GatewayEvent)>;

    struct MockTransport {
        observer: Mutex<Option<MessageObserver>>,
        command_scripts: Mutex<HashMap<String, Script>>,
        button_scripts: Mutex<HashMap<String, Script>>,
        command_error: Mutex<Option<(u16, u32, String)>>,
        commands: Mutex<Vec<String>>,
        clicks: Mutex<Vec<String>>,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                observer: Mutex::new(None),
                command_scripts: Mutex::new(HashMap::new()),
                button_scripts: Mutex::new(HashMap::new()),
                command_error: Mutex::new(None),
                commands: Mutex::new(Vec::new()),
                clicks: Mutex::new(Vec::new()),
            })
        }

        fn attach(&self, observer: MessageObserver) {
            *self.observer.lock() = Some(observer);
        }

        fn script_command(&self, prompt: &str, script: Script) {
            self.command_scripts
                .lock()
                .insert(prompt.to_string(), script);
        }

        fn script_button(&self, custom_id: &str, script: Script) {
            self.button_scripts
                .lock()
                .insert(custom_id.to_string(), script);
        }

        fn fail_commands_with(&self, status: u16, code: u32, message: &str) {
            *self.command_error.lock() = Some((status, code, message.to_string()));
        }

        fn play(&self, script: Script) {
            let observer = self.observer.lock().clone().expect("observer attached");
            tokio::spawn(async move {
                for (delay_ms, event) in script {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    observer.inject(event);
                }
            });
        }
    }

    #[async_trait]
    impl InteractionTransport for MockTransport {
        async fn send_slash_command(
            &self,
            _channel_id: Snowflake,
            _guild_id: Snowflake,
            _command_name: &str,
            options: Vec<CommandOption>,
            _user_session_id: &str,
            _deadline: Instant,
        ) -> Result<(), HttpError> {
            if let Some((status, code, message)) = self.command_error.lock().clone() {
                return Err(HttpError::Api {
                    status,
                    code,
                    message,
                });
            }

            let prompt = options
                .first()
                .map(|o| o.value.clone())
                .unwrap_or_default();
            self.commands.lock().push(prompt.clone());

            if let Some(script) = self.command_scripts.lock().remove(&prompt) {
                self.play(script);
            }
            Ok(())
        }

        async fn send_button_interaction(
            &self,
            _channel_id: Snowflake,
            _guild_id: Snowflake,
            _message_id: Snowflake,
            custom_id: &str,
            _user_session_id: &str,
            _deadline: Instant,
        ) -> Result<(), HttpError> {
            self.clicks.lock().push(custom_id.to_string());
            if let Some(script) = self.button_scripts.lock().remove(custom_id) {
                self.play(script);
            }
            Ok(())
        }

        async fn get_message(
            &self,
            _channel_id: Snowflake,
            _message_id: Snowflake,
            _deadline: Instant,
        ) -> Result<Message, HttpError> {
            Err(HttpError::NotFound)
        }

        async fn list_recent_messages(
            &self,
            _channel_id: Snowflake,
            _limit: u8,
            _deadline: Instant,
        ) -> Result<Vec<Message>, HttpError> {
            Ok(Vec::new())
        }
    }

    struct MockFetcher;

    #[async_trait]
    impl ArtifactFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedImage, HttpError> {
            Ok(FetchedImage {
                bytes: url.as_bytes().to_vec(),
                content_type: "image/png".to_string(),
            })
        }
    }

    /// A client wired to mocks, with its observer dispatcher running.
    /// The returned sender keeps the dispatcher alive.
    fn online_client(
        transport: Arc<MockTransport>,
        store: Arc<MemoryStore>,
    ) -> (Client, flume::Sender<GatewayEvent>) {
        let config = Config::new("user-token", "bot-token", CHANNEL, GUILD);
        let client = Client::builder(config)
            .transport(transport.clone())
            .fetcher(Arc::new(MockFetcher))
            .store(store)
            .reorder_grace(Duration::from_millis(50))
            .build()
            .expect("client builds");

        transport.attach(client.observer().clone());
        client.force_online("user-session-id");

        let observer = client.observer().clone();
        let (tx, rx) = flume::unbounded();
        tokio::spawn(async move { observer.run(rx).await });

        (client, tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_happy_path() {
        let transport = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let (client, _keep) = online_client(transport.clone(), store.clone());

        let grid_id = fresh_id(2_000);
        transport.script_command(
            "beautiful cosmic space dolphin",
            vec![(
                100,
                create(grid_message(grid_id, "beautiful cosmic space dolphin")),
            )],
        );

        let generation = client
            .generate("beautiful cosmic space dolphin")
            .await
            .expect("generation succeeds");

        assert_eq!(generation.grid_message_id, grid_id);
        assert_eq!(generation.image_url, "https://cdn.example/grid.png");
        assert_eq!(generation.buttons.len(), 4);

        let (bytes, meta) = store.artifact(&generation.storage_id).expect("grid stored");
        assert_eq!(bytes.as_slice(), b"https://cdn.example/grid.png");
        assert_eq!(meta.grid_message_id, grid_id);

        let record = store.record(&generation.generation_id).expect("record written");
        assert_eq!(record.grid_message_id, Some(grid_id));
        assert_eq!(record.prompt, "beautiful cosmic space dolphin");
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_pre_moderation_after_silence() {
        let transport = MockTransport::new();
        let (client, _keep) = online_client(transport, Arc::new(MemoryStore::new()));

        let err = client.generate("forbidden prompt").await.unwrap_err();
        match err {
            MuseError::Generation(g) => {
                assert_eq!(g.kind, ErrorKind::PreModeration);
                assert!(g.elapsed >= T_PRE);
                assert_eq!(g.fingerprint, "forbidden prompt");
            }
            other => panic!("expected generation error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_post_moderation_carries_message_id() {
        let transport = MockTransport::new();
        let (client, _keep) = online_client(transport.clone(), Arc::new(MemoryStore::new()));

        let announce_id = fresh_id(1_000);
        transport.script_command(
            "x",
            vec![
                (0, create(base_message(announce_id, "**x** - <@111> (0%)"))),
                (500, update(announce_id, "**x** - <@111> (Stopped)")),
            ],
        );

        let err = client.generate("x").await.unwrap_err();
        match err {
            MuseError::Generation(g) => {
                assert_eq!(g.kind, ErrorKind::PostModeration);
                assert_eq!(g.message_id, Some(announce_id));
            }
            other => panic!("expected generation error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_ephemeral_moderation_on_delete() {
        let transport = MockTransport::new();
        let (client, _keep) = online_client(transport.clone(), Arc::new(MemoryStore::new()));

        let announce_id = fresh_id(1_000);
        transport.script_command(
            "x",
            vec![
                (0, create(base_message(announce_id, "**x** - <@111> (31%)"))),
                (
                    500,
                    GatewayEvent::MessageDelete(muse_model::MessageDelete {
                        id: announce_id,
                        channel_id: CHANNEL,
                        guild_id: Some(GUILD),
                    }),
                ),
            ],
        );

        let err = client.generate("x").await.unwrap_err();
        match err {
            MuseError::Generation(g) => assert_eq!(g.kind, ErrorKind::EphemeralModeration),
            other => panic!("expected generation error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_invalid_request_on_moderated_interaction() {
        let transport = MockTransport::new();
        let (client, _keep) = online_client(transport.clone(), Arc::new(MemoryStore::new()));

        transport.fail_commands_with(400, 50035, "Banned prompt detected");

        let err = client.generate("something nasty").await.unwrap_err();
        match err {
            MuseError::Generation(g) => assert_eq!(g.kind, ErrorKind::InvalidRequest),
            other => panic!("expected generation error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_upscale_all_resolves_four_variants_bijectively() {
        let transport = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let (client, _keep) = online_client(transport.clone(), store.clone());

        let grid_id = fresh_id(1_000);
        transport.script_command(
            "a cat",
            vec![(100, create(grid_message(grid_id, "a cat")))],
        );
        let generation = client.generate("a cat").await.unwrap();

        for v in 1..=4u8 {
            transport.script_button(
                &format!("MJ::JOB::upsample::{v}::JOBHASH"),
                vec![(
                    u64::from(v) * 100,
                    create(upscale_message(fresh_id(5_000), "a cat", v, grid_id)),
                )],
            );
        }

        let results = client.upscale_all(grid_id).await.unwrap();
        assert_eq!(results.len(), 4);

        let mut seen_variants = Vec::new();
        let mut seen_messages = Vec::new();
        for result in &results {
            let upscale = result.outcome.as_ref().expect("variant resolved");
            assert_eq!(upscale.grid_message_id, grid_id);
            seen_variants.push(upscale.variant_index);
            seen_messages.push(upscale.message_id);
        }
        seen_variants.sort_unstable();
        assert_eq!(seen_variants, vec![0, 1, 2, 3]);

        // No message resolved two variants.
        seen_messages.sort_unstable();
        seen_messages.dedup();
        assert_eq!(seen_messages.len(), 4);

        // Durable proof of correlation: every stored variant carries the
        // grid back-reference.
        let record = store.record(&generation.generation_id).unwrap();
        assert_eq!(record.variants.len(), 4);
        assert!(record
            .variants
            .iter()
            .all(|variant| variant.grid_message_id == grid_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_and_foreign_replies_never_pair() {
        let transport = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let (client, _keep) = online_client(transport.clone(), store.clone());

        let grid_id = fresh_id(1_000);
        transport.script_command(
            "second prompt",
            vec![(100, create(grid_message(grid_id, "second prompt")))],
        );
        client.generate("second prompt").await.unwrap();

        // A straggling upscale from a previous generation (different
        // fingerprint), and a reply with a pre-click snowflake: neither
        // may pair. The genuine reply lands last.
        let stale_foreign = upscale_message(fresh_id(6_000), "first prompt", 1, grid_id);
        let too_old = upscale_message(fresh_id(-60_000), "second prompt", 1, grid_id);
        let genuine_id = fresh_id(7_000);
        let genuine = upscale_message(genuine_id, "second prompt", 1, grid_id);

        transport.script_button(
            "MJ::JOB::upsample::1::JOBHASH",
            vec![
                (50, create(stale_foreign)),
                (100, create(too_old)),
                (150, create(genuine)),
            ],
        );

        let results = client.upscale_all(grid_id).await.unwrap();

        let first = &results[0];
        assert_eq!(first.variant_index, 0);
        let upscale = first.outcome.as_ref().expect("variant 1 resolved");
        assert_eq!(upscale.message_id, genuine_id);

        // The unscripted siblings time out individually without aborting
        // the resolved variant.
        for result in &results[1..] {
            let err = result.outcome.as_ref().unwrap_err();
            assert!(matches!(
                err.kind,
                ErrorKind::Correlation | ErrorKind::Deadline
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_is_serialized_across_the_client() {
        let transport = MockTransport::new();
        let store = Arc::new(MemoryStore::new());
        let (client, _keep) = online_client(transport.clone(), store.clone());

        transport.script_command(
            "one",
            vec![(100, create(grid_message(fresh_id(1_000), "one")))],
        );
        transport.script_command(
            "two",
            vec![(100, create(grid_message(fresh_id(2_000), "two")))],
        );

        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.generate("one").await })
        };
        let second = {
            let client = client.clone();
            tokio::spawn(async move { client.generate("two").await })
        };

        let first = first.await.unwrap();
        let second = second.await.unwrap();
        assert!(first.is_ok());
        assert!(second.is_ok());

        // Two commands were sent, never interleaved mid-generation.
        assert_eq!(transport.commands.lock().len(), 2);
        assert_ne!(
            first.unwrap().grid_message_id,
            second.unwrap().grid_message_id
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_gates_calls() {
        let transport = MockTransport::new();
        let config = Config::new("user-token", "bot-token", CHANNEL, GUILD);
        let client = Client::builder(config)
            .transport(transport.clone())
            .fetcher(Arc::new(MockFetcher))
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();

        // Never initialized.
        assert!(matches!(
            client.generate("x").await.unwrap_err(),
            MuseError::NotInitialized
        ));

        // Close is idempotent and returns the client to the
        // uninitialized state.
        client.force_online("sess");
        client.close().await;
        client.close().await;
        assert!(matches!(
            client.generate("x").await.unwrap_err(),
            MuseError::NotInitialized
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_outstanding_subscriptions() {
        let transport = MockTransport::new();
        let (client, _keep) = online_client(transport.clone(), Arc::new(MemoryStore::new()));

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.generate("never answered").await })
        };

        // Let the generation reach its waiting state, then pull the plug.
        tokio::time::sleep(Duration::from_secs(1)).await;
        client.close().await;

        let err = pending.await.unwrap().unwrap_err();
        match err {
            MuseError::Generation(g) => assert_eq!(g.kind, ErrorKind::Cancelled),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_upscale_unknown_grid_without_lookup_fails() {
        let transport = MockTransport::new();
        let (client, _keep) = online_client(transport.clone(), Arc::new(MemoryStore::new()));

        // No prior generation and the lookup mock has no such message.
        let err = client.upscale_all(fresh_id(0)).await.unwrap_err();
        assert!(matches!(err, MuseError::Http(HttpError::NotFound)));
    }
}
