//! Subscriber client
//!
//! A subscriber starts in a catch-up phase: it parks everything arriving on
//! the live broadcast stream, asks the broker to replay the events it missed,
//! applies the replay in order, and only then starts draining the live queue.
//! From that point a single cursor comparison (discard anything at or below
//! the last applied sequence) is the sole de-duplication mechanism. There is
//! no reordering buffer: the broker assigns sequences without gaps and the
//! broadcast stream preserves assignment order per connection.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::SubscriberConfig;
use crate::error::BusResult;
use crate::store::{EventStore, FileEventStore, FileSequenceStore, SequenceStore, StoreResult};
use crate::types::{Event, SyncCmd, SyncCommand};
use crate::wire::{self, Frame};

/// A consumer of decoded event payloads.
///
/// Implemented for free by any `Fn(&Value) + Send + Sync` closure.
pub trait EventHandler: Send + Sync {
    fn handle(&self, data: &Value);
}

impl<F> EventHandler for F
where
    F: Fn(&Value) + Send + Sync,
{
    fn handle(&self, data: &Value) {
        self(data)
    }
}

/// Handlers for one registered prefix, in registration order.
struct TopicHandlers {
    prefix: String,
    handlers: Vec<Box<dyn EventHandler>>,
}

/// Registry of topic-prefix handlers.
///
/// Prefix insertion order is preserved: it drives both the topic list in the
/// initial sync request and the dispatch order across matching prefixes.
#[derive(Default)]
struct HandlerRegistry {
    entries: Vec<TopicHandlers>,
}

impl HandlerRegistry {
    fn register(&mut self, prefix: &str, handler: Box<dyn EventHandler>) {
        match self.entries.iter_mut().find(|e| e.prefix == prefix) {
            Some(entry) => entry.handlers.push(handler),
            None => self.entries.push(TopicHandlers {
                prefix: prefix.to_string(),
                handlers: vec![handler],
            }),
        }
    }

    fn topics(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.prefix.clone()).collect()
    }

    fn matches_any(&self, topic: &str) -> bool {
        self.entries.iter().any(|e| topic.starts_with(&e.prefix))
    }

    /// Invoke every handler under every prefix matching the topic; returns
    /// the number of matched prefixes.
    fn dispatch(&self, event: &Event) -> usize {
        let mut matched = 0;
        for entry in &self.entries {
            if !event.topic.starts_with(&entry.prefix) {
                continue;
            }
            matched += 1;
            trace!(topic = %event.topic, prefix = %entry.prefix, "triggering handlers");
            for handler in &entry.handlers {
                handler.handle(&event.data);
            }
        }
        matched
    }
}

/// State shared between the subscriber handle and its channel tasks.
struct SubscriberShared {
    handlers: RwLock<HandlerRegistry>,
    /// Last applied sequence (the persisted cursor)
    cursor: AtomicU64,
    /// True until the initial replay completes
    syncing: AtomicBool,
    event_store: Arc<dyn EventStore>,
    sequence_store: Arc<dyn SequenceStore>,
}

impl SubscriberShared {
    /// Persist the event, then dispatch its payload. An event with no
    /// matching prefix is logged and dropped for dispatch purposes but stays
    /// persisted.
    fn apply(&self, event: &Event) -> StoreResult<()> {
        let sequence = event.sequence.unwrap_or(0);
        self.event_store.append(sequence, event)?;

        let matched = self.handlers.read().dispatch(event);
        if matched == 0 {
            warn!(topic = %event.topic, "received an event without topic match");
        }
        Ok(())
    }

    fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }
}

/// A bus client that replays missed events before going live.
pub struct Subscriber {
    config: SubscriberConfig,
    shared: Arc<SubscriberShared>,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscriber {
    /// Create a subscriber backed by the filesystem stores under
    /// `config.data_dir`.
    pub fn new(config: SubscriberConfig) -> BusResult<Self> {
        let event_store = Arc::new(FileEventStore::new(config.events_path())?);
        let sequence_store = Arc::new(FileSequenceStore::new(config.sequence_path())?);
        Ok(Self::with_stores(config, event_store, sequence_store))
    }

    /// Create a subscriber with explicit store implementations.
    pub fn with_stores(
        config: SubscriberConfig,
        event_store: Arc<dyn EventStore>,
        sequence_store: Arc<dyn SequenceStore>,
    ) -> Self {
        Self {
            config,
            shared: Arc::new(SubscriberShared {
                handlers: RwLock::new(HandlerRegistry::default()),
                cursor: AtomicU64::new(0),
                syncing: AtomicBool::new(true),
                event_store,
                sequence_store,
            }),
            tasks: Vec::new(),
        }
    }

    /// Register a handler under a topic prefix.
    ///
    /// Registrations made before [`connect`](Self::connect) are included in
    /// the initial replay request; later ones only receive live events.
    pub fn on<H>(&self, prefix: impl Into<String>, handler: H)
    where
        H: EventHandler + 'static,
    {
        let prefix = prefix.into();
        info!(topic = %prefix, "subscriber listens to topic");
        self.shared.handlers.write().register(&prefix, Box::new(handler));
    }

    /// Last applied sequence.
    pub fn last_applied_sequence(&self) -> u64 {
        self.shared.cursor()
    }

    /// True while the initial replay is still running.
    pub fn is_syncing(&self) -> bool {
        self.shared.syncing.load(Ordering::SeqCst)
    }

    /// Connect both channels, replay missed events, then go live.
    ///
    /// The broadcast stream is opened before the replay request is sent so no
    /// live event can slip by unseen; everything it delivers is parked on a
    /// queue and only processed after the replay completes.
    pub async fn connect(&mut self) -> BusResult<()> {
        let topics = self.shared.handlers.read().topics();

        let broadcast_stream = TcpStream::connect(self.config.broadcast.addr()).await?;
        let (live_tx, live_rx) = mpsc::unbounded_channel();
        self.tasks
            .push(tokio::spawn(live_reader(broadcast_stream, live_tx)));

        let cursor = self.shared.sequence_store.load()?.unwrap_or(0);
        self.shared.cursor.store(cursor, Ordering::SeqCst);

        let mut replay_stream = TcpStream::connect(self.config.replay.addr()).await?;
        let request = SyncCommand::sync_start(topics.clone(), cursor);
        wire::write_message(&mut replay_stream, &request.to_frames()).await?;
        info!(
            sequence = cursor,
            topics = %topics.join(","),
            "started subscriber sync"
        );

        match self.config.replay_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, run_replay(&mut replay_stream, &self.shared))
                    .await
                {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "timed out waiting for sync to complete",
                        )
                        .into())
                    }
                }
            }
            None => run_replay(&mut replay_stream, &self.shared).await?,
        }

        // Now apply parked updates; stale ones fall to the cursor check.
        self.shared.syncing.store(false, Ordering::SeqCst);
        self.tasks
            .push(tokio::spawn(live_loop(live_rx, self.shared.clone())));

        Ok(())
    }

    /// Close both channels and persist the cursor.
    pub fn close(&mut self) -> BusResult<()> {
        info!("closed subscriber streams");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.shared.sequence_store.save(self.shared.cursor())?;
        Ok(())
    }
}

/// Park every message from the broadcast stream on the live queue.
async fn live_reader(mut stream: TcpStream, queue: mpsc::UnboundedSender<Vec<Frame>>) {
    loop {
        match wire::read_message(&mut stream).await {
            Ok(Some(frames)) => {
                if queue.send(frames).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "broadcast stream failed");
                return;
            }
        }
    }
}

/// Consume the replay stream until `SYNCEND`.
///
/// Replayed events are applied unconditionally, since the broker already filtered
/// and ordered them; the cursor only moves at the end marker, to the global
/// sequence the broker reported.
async fn run_replay<S>(stream: &mut S, shared: &SubscriberShared) -> BusResult<()>
where
    S: AsyncRead + Unpin,
{
    loop {
        let frames = wire::read_message(stream).await?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "replay stream closed before sync completed",
            )
        })?;

        let tag = frames
            .first()
            .and_then(|frame| std::str::from_utf8(frame).ok())
            .and_then(SyncCmd::from_tag);

        match tag {
            Some(SyncCmd::Sync) => {
                let event = match Event::from_frames(&frames[1..]) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed replay event");
                        continue;
                    }
                };
                debug!(sequence = ?event.sequence, topic = %event.topic, "applying replayed event");
                if let Err(e) = shared.apply(&event) {
                    error!(error = %e, "failed to apply replayed event");
                }
            }
            Some(SyncCmd::SyncEnd) => {
                let command = match SyncCommand::from_frames(&frames) {
                    Ok(command) => command,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed sync end marker");
                        continue;
                    }
                };
                shared.cursor.store(command.sequence, Ordering::SeqCst);
                info!(
                    sequence = command.sequence,
                    topics = %command.topics.join(","),
                    "finished subscriber sync"
                );
                return Ok(());
            }
            _ => {
                warn!("unexpected message on replay stream");
            }
        }
    }
}

/// Apply queued and future live events once the replay has completed.
async fn live_loop(mut queue: mpsc::UnboundedReceiver<Vec<Frame>>, shared: Arc<SubscriberShared>) {
    while let Some(frames) = queue.recv().await {
        let event = match Event::from_frames(&frames) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping malformed live event");
                continue;
            }
        };

        // Stand-in for a transport-level subscribe filter: the broker sends
        // everything, the subscriber keeps only its registered subtrees.
        if !shared.handlers.read().matches_any(&event.topic) {
            trace!(topic = %event.topic, "ignoring unsubscribed topic");
            continue;
        }

        let Some(sequence) = event.sequence else {
            warn!(topic = %event.topic, "dropping live event without sequence");
            continue;
        };

        // The sole de-duplication mechanism: anything at or below the cursor
        // was already applied, via replay or an earlier live delivery.
        if sequence <= shared.cursor() {
            debug!(sequence, "discarding stale event");
            continue;
        }

        if let Err(e) = shared.apply(&event) {
            error!(sequence, error = %e, "failed to apply live event");
            continue;
        }
        shared.cursor.store(sequence, Ordering::SeqCst);
    }
}
