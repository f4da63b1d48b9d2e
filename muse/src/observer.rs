//! Message observer.
//!
//! Both gateway sessions dispatch into one channel; the observer merges
//! them, drops duplicates, restores per-channel snowflake order for
//! creates, and fans events out to predicate subscribers. Subscriptions
//! are cancellable: dropping one unregisters it.
//!
//! Ordering: MESSAGE_CREATE events are buffered per channel and released
//! in snowflake-id order once a grace window (2s) has passed since
//! arrival. A create arriving after a newer id was already released is a
//! straggler and is dropped to keep delivery monotone. UPDATE and DELETE
//! dispatch immediately; every consumer keys them to an id it has already
//! seen.

use ahash::{AHashMap, AHashSet};
use dashmap::DashMap;
use muse_gateway::GatewayEvent;
use muse_model::{Message, MessageDelete, MessageUpdate, Snowflake};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Default grace window before buffered creates are released.
pub const DEFAULT_REORDER_GRACE: Duration = Duration::from_secs(2);

/// Bound on the duplicate-suppression set.
const DEDUPE_CAPACITY: usize = 10_000;

/// How often the reorder buffers are drained.
const FLUSH_PERIOD: Duration = Duration::from_millis(100);

/// A message event as delivered to subscribers.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A new message.
    Create(Arc<Message>),
    /// An edit to an existing message.
    Update(Arc<MessageUpdate>),
    /// A deletion.
    Delete(MessageDelete),
}

impl ChannelEvent {
    /// Channel the event happened in.
    pub fn channel_id(&self) -> Snowflake {
        match self {
            ChannelEvent::Create(m) => m.channel_id,
            ChannelEvent::Update(u) => u.channel_id,
            ChannelEvent::Delete(d) => d.channel_id,
        }
    }

    /// Message the event concerns.
    pub fn message_id(&self) -> Snowflake {
        match self {
            ChannelEvent::Create(m) => m.id,
            ChannelEvent::Update(u) => u.id,
            ChannelEvent::Delete(d) => d.id,
        }
    }
}

type EventPredicate = Box<dyn Fn(&ChannelEvent) -> bool + Send + Sync>;

struct SubscriptionEntry {
    channel_id: Snowflake,
    predicate: EventPredicate,
    tx: flume::Sender<ChannelEvent>,
}

/// A live subscription. Dropping it unregisters the predicate.
pub struct Subscription {
    id: u64,
    rx: flume::Receiver<ChannelEvent>,
    observer: Weak<Inner>,
}

impl Subscription {
    /// Receive the next matching event. Returns `None` once the observer
    /// shuts down.
    pub async fn next(&self) -> Option<ChannelEvent> {
        self.rx.recv_async().await.ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.observer.upgrade() {
            inner.subscriptions.remove(&self.id);
        }
    }
}

/// Bounded duplicate-suppression set with insertion-order eviction.
struct DedupeLru {
    seen: AHashSet<u64>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl DedupeLru {
    fn new(capacity: usize) -> Self {
        Self {
            seen: AHashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert a key; returns false when it was already present.
    fn insert(&mut self, key: u64) -> bool {
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

/// Per-channel reorder state.
#[derive(Default)]
struct ChannelBuffer {
    /// Buffered creates keyed by snowflake, with their arrival time.
    pending: BTreeMap<Snowflake, (ChannelEvent, Instant)>,
    /// Highest id already released on this channel.
    last_released: Option<Snowflake>,
}

struct Inner {
    subscriptions: DashMap<u64, SubscriptionEntry>,
    next_id: AtomicU64,
    dedupe: Mutex<DedupeLru>,
    channels: Mutex<AHashMap<Snowflake, ChannelBuffer>>,
    grace: Duration,
}

/// Publish-subscribe fan-out for gateway message events.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct MessageObserver {
    inner: Arc<Inner>,
}

impl MessageObserver {
    /// Create an observer with the default 2s reorder grace.
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_REORDER_GRACE)
    }

    /// Create an observer with a custom reorder grace window.
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscriptions: DashMap::new(),
                next_id: AtomicU64::new(1),
                dedupe: Mutex::new(DedupeLru::new(DEDUPE_CAPACITY)),
                channels: Mutex::new(AHashMap::new()),
                grace,
            }),
        }
    }

    /// Register a predicate subscriber for one channel.
    pub fn subscribe<F>(&self, channel_id: Snowflake, predicate: F) -> Subscription
    where
        F: Fn(&ChannelEvent) -> bool + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::unbounded();

        self.inner.subscriptions.insert(
            id,
            SubscriptionEntry {
                channel_id,
                predicate: Box::new(predicate),
                tx,
            },
        );

        Subscription {
            id,
            rx,
            observer: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Feed one gateway event into the observer.
    ///
    /// This is the same path session dispatch uses; tests and the polling
    /// fallback inject through it.
    pub fn inject(&self, event: GatewayEvent) {
        self.inner.ingest(event, Instant::now());
    }

    /// Drive the observer: merge `events` from the gateway sessions,
    /// dedupe, reorder, and dispatch. Returns once every sender is gone.
    pub async fn run(&self, events: flume::Receiver<GatewayEvent>) {
        let mut flush_tick = tokio::time::interval(FLUSH_PERIOD);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv_async() => {
                    match event {
                        Ok(event) => self.inner.ingest(event, Instant::now()),
                        Err(_) => break,
                    }
                }
                now = flush_tick.tick() => {
                    self.inner.flush_due(now);
                }
            }
        }

        // Drain whatever order allows before going quiet.
        self.inner.flush_all();
        debug!("Observer dispatcher stopped");
    }

    /// Cancel every outstanding subscription; their holders see
    /// end-of-stream. The observer itself stays usable: new subscriptions
    /// and a fresh `run` are fine afterwards.
    pub fn cancel_subscriptions(&self) {
        self.inner.subscriptions.clear();
    }
}

impl Default for MessageObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn ingest(&self, event: GatewayEvent, now: Instant) {
        let event = match event {
            GatewayEvent::MessageCreate(message) => ChannelEvent::Create(Arc::new(*message)),
            GatewayEvent::MessageUpdate(update) => ChannelEvent::Update(Arc::new(*update)),
            GatewayEvent::MessageDelete(delete) => ChannelEvent::Delete(delete),
            // Connection events are handled inside the sessions.
            _ => return,
        };

        if !self.dedupe.lock().insert(dedupe_key(&event)) {
            trace!(message_id = %event.message_id(), "Duplicate event dropped");
            return;
        }

        match &event {
            ChannelEvent::Create(message) => {
                let mut channels = self.channels.lock();
                let buffer = channels.entry(message.channel_id).or_default();

                if buffer.last_released.is_some_and(|last| message.id <= last) {
                    debug!(
                        message_id = %message.id,
                        "Create arrived after newer release, dropping straggler"
                    );
                    return;
                }

                buffer.pending.insert(message.id, (event, now));
            }
            // Updates and deletes key to an already-released id; no
            // reordering needed.
            _ => self.dispatch(&event),
        }
    }

    /// Release buffered creates whose grace has elapsed, oldest id first.
    /// A not-yet-due entry holds back everything newer on its channel.
    fn flush_due(&self, now: Instant) {
        let released = {
            let mut channels = self.channels.lock();
            let mut released = Vec::new();

            for buffer in channels.values_mut() {
                loop {
                    let Some((&id, &(_, arrived))) = buffer.pending.iter().next() else {
                        break;
                    };
                    if now.duration_since(arrived) < self.grace {
                        break;
                    }
                    if let Some((event, _)) = buffer.pending.remove(&id) {
                        buffer.last_released = Some(id);
                        released.push(event);
                    }
                }
            }

            released
        };

        for event in released {
            self.dispatch(&event);
        }
    }

    /// Release every buffered create in order, grace or not.
    fn flush_all(&self) {
        let released = {
            let mut channels = self.channels.lock();
            let mut released = Vec::new();
            for buffer in channels.values_mut() {
                let ids: Vec<Snowflake> = buffer.pending.keys().copied().collect();
                for id in ids {
                    if let Some((event, _)) = buffer.pending.remove(&id) {
                        buffer.last_released = Some(id);
                        released.push(event);
                    }
                }
            }
            released
        };

        for event in released {
            self.dispatch(&event);
        }
    }

    fn dispatch(&self, event: &ChannelEvent) {
        let mut dead = Vec::new();

        for entry in self.subscriptions.iter() {
            let sub = entry.value();
            if sub.channel_id != event.channel_id() {
                continue;
            }
            if !(sub.predicate)(event) {
                continue;
            }
            if sub.tx.send(event.clone()).is_err() {
                dead.push(*entry.key());
            }
        }

        for id in dead {
            self.subscriptions.remove(&id);
        }
    }
}

/// Duplicate-suppression key. Creates and deletes collapse on message id;
/// updates also hash what changed, so successive edits of one message all
/// pass while the same edit from both sessions does not.
fn dedupe_key(event: &ChannelEvent) -> u64 {
    let mut hasher = ahash::AHasher::default();
    match event {
        ChannelEvent::Create(m) => {
            0u8.hash(&mut hasher);
            m.id.get().hash(&mut hasher);
        }
        ChannelEvent::Update(u) => {
            1u8.hash(&mut hasher);
            u.id.get().hash(&mut hasher);
            u.edited_timestamp.hash(&mut hasher);
            u.content.hash(&mut hasher);
            u.components.is_some().hash(&mut hasher);
            u.attachments.as_ref().map(|a| a.len()).hash(&mut hasher);
        }
        ChannelEvent::Delete(d) => {
            2u8.hash(&mut hasher);
            d.id.get().hash(&mut hasher);
        }
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use muse_model::User;

    fn message(id: u64, channel: u64, content: &str) -> GatewayEvent {
        GatewayEvent::MessageCreate(Box::new(Message {
            id: Snowflake::new(id),
            channel_id: Snowflake::new(channel),
            guild_id: None,
            author: User {
                id: muse_model::PROVIDER_BOT_ID,
                username: "bot".to_string(),
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
        }))
    }

    fn delete(id: u64, channel: u64) -> GatewayEvent {
        GatewayEvent::MessageDelete(MessageDelete {
            id: Snowflake::new(id),
            channel_id: Snowflake::new(channel),
            guild_id: None,
        })
    }

    async fn collect(sub: &Subscription, n: usize) -> Vec<Snowflake> {
        let mut out = Vec::new();
        for _ in 0..n {
            match sub.next().await {
                Some(event) => out.push(event.message_id()),
                None => break,
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_creates_released_in_snowflake_order() {
        let observer = MessageObserver::new();
        let (tx, rx) = flume::unbounded();
        let runner = observer.clone();
        tokio::spawn(async move { runner.run(rx).await });

        let sub = observer.subscribe(Snowflake::new(7), |_| true);

        // Arrive out of order within the grace window.
        tx.send(message(200, 7, "b")).unwrap();
        tx.send(message(100, 7, "a")).unwrap();

        let ids = collect(&sub, 2).await;
        assert_eq!(ids, vec![Snowflake::new(100), Snowflake::new(200)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_from_two_sessions_collapse() {
        let observer = MessageObserver::new();
        let (tx, rx) = flume::unbounded();
        let runner = observer.clone();
        tokio::spawn(async move { runner.run(rx).await });

        let sub = observer.subscribe(Snowflake::new(7), |_| true);

        // Same create delivered by the user and the bot session.
        tx.send(message(100, 7, "a")).unwrap();
        tx.send(message(100, 7, "a")).unwrap();
        tx.send(message(101, 7, "b")).unwrap();

        let ids = collect(&sub, 2).await;
        assert_eq!(ids, vec![Snowflake::new(100), Snowflake::new(101)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_filters_and_channel_scoping() {
        let observer = MessageObserver::new();
        let (tx, rx) = flume::unbounded();
        let runner = observer.clone();
        tokio::spawn(async move { runner.run(rx).await });

        let sub = observer.subscribe(Snowflake::new(7), |event| {
            matches!(event, ChannelEvent::Delete(_))
        });

        tx.send(message(100, 7, "ignored create")).unwrap();
        tx.send(delete(100, 8)).unwrap(); // wrong channel
        tx.send(delete(100, 7)).unwrap();

        let event = sub.next().await.unwrap();
        assert!(matches!(event, ChannelEvent::Delete(_)));
        assert_eq!(event.channel_id(), Snowflake::new(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successive_updates_share_id_but_pass_dedupe() {
        let observer = MessageObserver::new();
        let (tx, rx) = flume::unbounded();
        let runner = observer.clone();
        tokio::spawn(async move { runner.run(rx).await });

        let sub = observer.subscribe(Snowflake::new(7), |_| true);

        let update = |content: &str| {
            GatewayEvent::MessageUpdate(Box::new(MessageUpdate {
                id: Snowflake::new(100),
                channel_id: Snowflake::new(7),
                author: None,
                content: Some(content.to_string()),
                edited_timestamp: None,
                attachments: None,
                components: None,
                flags: None,
            }))
        };

        tx.send(update("**x** (15%)")).unwrap();
        tx.send(update("**x** (15%)")).unwrap(); // duplicate
        tx.send(update("**x** (31%)")).unwrap(); // new edit, same id

        let mut contents = Vec::new();
        for _ in 0..2 {
            if let Some(ChannelEvent::Update(u)) = sub.next().await {
                contents.push(u.content.clone().unwrap());
            }
        }
        assert_eq!(contents, vec!["**x** (15%)", "**x** (31%)"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_subscription_unregisters() {
        let observer = MessageObserver::new();
        let sub = observer.subscribe(Snowflake::new(7), |_| true);
        assert_eq!(observer.subscription_count(), 1);
        drop(sub);
        assert_eq!(observer.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wakes_subscribers_with_end_of_stream() {
        let observer = MessageObserver::new();
        let sub = observer.subscribe(Snowflake::new(7), |_| true);
        observer.cancel_subscriptions();
        assert!(sub.next().await.is_none());

        // The observer remains usable for the next initialization.
        let sub = observer.subscribe(Snowflake::new(7), |_| true);
        assert_eq!(observer.subscription_count(), 1);
        drop(sub);
    }

    #[test]
    fn test_dedupe_lru_bounded() {
        let mut lru = DedupeLru::new(2);
        assert!(lru.insert(1));
        assert!(lru.insert(2));
        assert!(!lru.insert(1));
        assert!(lru.insert(3)); // evicts 1
        assert!(lru.insert(1)); // 1 was evicted, passes again
        assert_eq!(lru.order.len(), 2);
    }
}
