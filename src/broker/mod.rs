//! Bus broker
//!
//! The broker owns three independent channels:
//!
//! - **ingest** (many-producers-to-one): decodes incoming events, assigns the
//!   global sequence, broadcasts, then appends to the event store
//! - **broadcast** (one-to-many): fans every sequenced event out to all
//!   connected subscribers, with no topic filtering on the broker side
//! - **replay** (addressable request/response): streams missed events back to
//!   a catching-up subscriber, terminated by a `SYNCEND` marker
//!
//! Sequence assignment, broadcast, and the store append run on a single
//! sequencer task; that one-writer discipline is what keeps the total order
//! free of gaps and duplicates under concurrent producer traffic.
//!
//! Live delivery deliberately goes out before the store append completes. A
//! crash in that gap loses the event from future replay streams even though
//! live subscribers already received it, an accepted
//! at-least-once-to-live / best-effort-for-replay trade-off.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::error::BusResult;
use crate::store::{EventStore, FileEventStore, FileSequenceStore, SequenceStore};
use crate::types::{Endpoint, Event, SyncCmd, SyncCommand};
use crate::wire::{self, Frame};

/// Buffer 1024 events - subscribers that fall further behind than this miss
/// events and need to re-sync through the replay channel.
const BROADCAST_CAPACITY: usize = 1024;

/// Backlog of decoded-but-unsequenced producer messages.
const INGEST_QUEUE_CAPACITY: usize = 1024;

/// State shared between the broker's channel tasks.
struct BrokerState {
    /// Last assigned global sequence
    sequence: AtomicU64,
    /// Live fan-out channel
    event_tx: broadcast::Sender<Event>,
    event_store: Arc<dyn EventStore>,
    sequence_store: Arc<dyn SequenceStore>,
}

impl BrokerState {
    fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

/// The channel endpoints a broker actually bound, with port-0 binds resolved
/// to their assigned ports.
#[derive(Debug, Clone)]
pub struct BrokerEndpoints {
    pub broadcast: Endpoint,
    pub ingest: Endpoint,
    pub replay: Endpoint,
}

/// The central bus process: sequences incoming events and fans them out.
pub struct Broker {
    config: BrokerConfig,
    state: Arc<BrokerState>,
    endpoints: Option<BrokerEndpoints>,
    tasks: Vec<JoinHandle<()>>,
}

impl Broker {
    /// Create a broker backed by the filesystem stores under
    /// `config.data_dir`.
    pub fn new(config: BrokerConfig) -> BusResult<Self> {
        let event_store = Arc::new(FileEventStore::new(config.events_path())?);
        let sequence_store = Arc::new(FileSequenceStore::new(config.sequence_path())?);
        Ok(Self::with_stores(config, event_store, sequence_store))
    }

    /// Create a broker with explicit store implementations.
    pub fn with_stores(
        config: BrokerConfig,
        event_store: Arc<dyn EventStore>,
        sequence_store: Arc<dyn SequenceStore>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            config,
            state: Arc::new(BrokerState {
                sequence: AtomicU64::new(0),
                event_tx,
                event_store,
                sequence_store,
            }),
            endpoints: None,
            tasks: Vec::new(),
        }
    }

    /// Bind the three channel endpoints and start serving.
    ///
    /// The sequence counter seeds from the persisted dump or, when the dump
    /// lags behind the event log (a crash between broadcast and save), from
    /// the highest stored sequence, so a sequence is never assigned twice.
    pub async fn connect(&mut self) -> BusResult<()> {
        let dumped = self.state.sequence_store.load()?.unwrap_or(0);
        let stored = self.state.event_store.last_sequence()?.unwrap_or(0);
        let base = dumped.max(stored);
        self.state.sequence.store(base, Ordering::SeqCst);
        info!(sequence = base, "loaded broker state");

        let broadcast_listener = TcpListener::bind(self.config.broadcast.addr()).await?;
        let ingest_listener = TcpListener::bind(self.config.ingest.addr()).await?;
        let replay_listener = TcpListener::bind(self.config.replay.addr()).await?;

        let endpoints = BrokerEndpoints {
            broadcast: self
                .config
                .broadcast
                .with_port(broadcast_listener.local_addr()?.port()),
            ingest: self
                .config
                .ingest
                .with_port(ingest_listener.local_addr()?.port()),
            replay: self
                .config
                .replay
                .with_port(replay_listener.local_addr()?.port()),
        };
        info!(
            broadcast = %endpoints.broadcast,
            ingest = %endpoints.ingest,
            replay = %endpoints.replay,
            "bus opened streams"
        );
        self.endpoints = Some(endpoints);

        let (ingest_tx, ingest_rx) = mpsc::channel(INGEST_QUEUE_CAPACITY);
        self.tasks
            .push(tokio::spawn(accept_ingest(ingest_listener, ingest_tx)));
        self.tasks
            .push(tokio::spawn(sequencer(self.state.clone(), ingest_rx)));
        self.tasks.push(tokio::spawn(accept_broadcast(
            broadcast_listener,
            self.state.clone(),
        )));
        self.tasks.push(tokio::spawn(accept_replay(
            replay_listener,
            self.state.clone(),
        )));

        Ok(())
    }

    /// Endpoints bound by [`connect`](Self::connect), if it has run.
    pub fn endpoints(&self) -> Option<&BrokerEndpoints> {
        self.endpoints.as_ref()
    }

    /// Last assigned global sequence.
    pub fn current_sequence(&self) -> u64 {
        self.state.current_sequence()
    }

    /// Stop serving and persist the sequence counter.
    pub fn close(&mut self) -> BusResult<()> {
        info!("closing bus streams");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.state
            .sequence_store
            .save(self.state.current_sequence())?;
        Ok(())
    }
}

/// Accept producer connections on the ingest endpoint.
async fn accept_ingest(listener: TcpListener, queue: mpsc::Sender<(SocketAddr, Vec<Frame>)>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(ingest_connection(stream, peer, queue.clone()));
            }
            Err(e) => warn!(error = %e, "ingest accept failed"),
        }
    }
}

/// Forward a producer connection's messages into the sequencer queue.
async fn ingest_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    queue: mpsc::Sender<(SocketAddr, Vec<Frame>)>,
) {
    loop {
        match wire::read_message(&mut stream).await {
            Ok(Some(frames)) => {
                if queue.send((peer, frames)).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!(%peer, error = %e, "dropping ingest connection");
                return;
            }
        }
    }
}

/// Single-writer sequencing loop: decode, assign, broadcast, append.
///
/// Everything that touches the counter runs here, in order, one event at a
/// time; nothing else mutates it.
async fn sequencer(state: Arc<BrokerState>, mut queue: mpsc::Receiver<(SocketAddr, Vec<Frame>)>) {
    while let Some((peer, frames)) = queue.recv().await {
        let mut event = match Event::from_frames(&frames) {
            Ok(event) => event,
            Err(e) => {
                warn!(%peer, error = %e, "dropping malformed event");
                continue;
            }
        };

        let sequence = state.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        event.sequence = Some(sequence);
        debug!(
            sequence,
            topic = %event.topic,
            producer = %event.producer,
            "sequenced event"
        );

        // Live delivery first, append second (see the module docs for the
        // consistency trade-off this encodes). Send errors only mean no
        // subscriber is connected.
        let _ = state.event_tx.send(event.clone());

        if let Err(e) = state.event_store.append(sequence, &event) {
            error!(sequence, error = %e, "event store append failed");
        }
    }
}

/// Accept subscriber connections on the broadcast endpoint.
async fn accept_broadcast(listener: TcpListener, state: Arc<BrokerState>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(broadcast_connection(
                    stream,
                    peer,
                    state.event_tx.subscribe(),
                ));
            }
            Err(e) => warn!(error = %e, "broadcast accept failed"),
        }
    }
}

/// Push every broadcast event down one subscriber connection.
async fn broadcast_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    mut events: broadcast::Receiver<Event>,
) {
    debug!(%peer, "subscriber attached to broadcast stream");
    loop {
        match events.recv().await {
            Ok(event) => {
                let frames = match event.to_frames() {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!(%peer, error = %e, "skipping unencodable event");
                        continue;
                    }
                };
                if let Err(e) = wire::write_message(&mut stream, &frames).await {
                    debug!(%peer, error = %e, "subscriber detached from broadcast stream");
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(%peer, missed, "subscriber lagging, events skipped");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Accept subscriber connections on the replay endpoint.
async fn accept_replay(listener: TcpListener, state: Arc<BrokerState>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(replay_connection(stream, peer, state.clone()));
            }
            Err(e) => warn!(error = %e, "replay accept failed"),
        }
    }
}

/// Serve replay requests for one client connection. Each connection is one
/// client identity, so concurrent replays to different clients can never
/// interleave on the wire.
async fn replay_connection(mut stream: TcpStream, peer: SocketAddr, state: Arc<BrokerState>) {
    loop {
        let frames = match wire::read_message(&mut stream).await {
            Ok(Some(frames)) => frames,
            Ok(None) => return,
            Err(e) => {
                warn!(%peer, error = %e, "dropping replay connection");
                return;
            }
        };

        if let Err(e) = handle_sync_request(&mut stream, peer, &state, &frames).await {
            debug!(%peer, error = %e, "replay stream closed");
            return;
        }
    }
}

/// Serve one `SYNCSTART` request.
///
/// Malformed requests are logged and answered with nothing; the connection
/// keeps serving. Only wire errors tear the connection down.
async fn handle_sync_request<S>(
    stream: &mut S,
    peer: SocketAddr,
    state: &BrokerState,
    frames: &[Frame],
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    if frames.len() != 3 {
        warn!(%peer, frames = frames.len(), "bad message format on replay stream");
        return Ok(());
    }

    let command = match SyncCommand::from_frames(frames) {
        Ok(command) => command,
        Err(e) => {
            warn!(%peer, error = %e, "invalid command on replay stream");
            return Ok(());
        }
    };
    if command.cmd != SyncCmd::SyncStart {
        warn!(%peer, cmd = %command.cmd, "invalid command on replay stream");
        return Ok(());
    }

    let topics_csv = command.topics.join(",");
    info!(%peer, sequence = command.sequence, topics = %topics_csv, "sending snapshot");

    // Fetch the whole ordered batch before emitting anything; the store's
    // ordering contract governs the wire order for the entire response.
    let events = match state.event_store.events_after(command.sequence) {
        Ok(events) => events,
        Err(e) => {
            error!(%peer, error = %e, "event store query failed, dropping sync request");
            return Ok(());
        }
    };

    let mut sent = 0u64;
    for event in events
        .iter()
        .filter(|event| topic_matches(&command.topics, &event.topic))
    {
        let mut reply = vec![SyncCmd::Sync.as_str().as_bytes().to_vec()];
        match event.to_frames() {
            Ok(frames) => reply.extend(frames),
            Err(e) => {
                warn!(%peer, error = %e, "skipping unencodable stored event");
                continue;
            }
        }
        wire::write_message(stream, &reply).await?;
        sent += 1;
    }

    // Read the counter here, not before the query: a subscriber trusts this
    // value to cover events broadcast to it while the replay was in flight.
    let current = state.current_sequence();
    let end = SyncCommand::sync_end(command.topics.clone(), current);
    wire::write_message(stream, &end.to_frames()).await?;

    info!(%peer, sequence = current, sent, topics = %topics_csv, "sent snapshot");
    Ok(())
}

/// True when the topic starts with any of the requested prefixes.
fn topic_matches(prefixes: &[String], topic: &str) -> bool {
    prefixes.iter().any(|prefix| topic.starts_with(prefix.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryEventStore, MemorySequenceStore};
    use serde_json::json;

    fn test_state(
        event_store: Arc<MemoryEventStore>,
        sequence_store: Arc<MemorySequenceStore>,
    ) -> Arc<BrokerState> {
        let (event_tx, _) = broadcast::channel(16);
        Arc::new(BrokerState {
            sequence: AtomicU64::new(0),
            event_tx,
            event_store,
            sequence_store,
        })
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:1".parse().unwrap()
    }

    #[test]
    fn test_topic_matches_by_prefix() {
        let prefixes = vec!["/test/1".to_string(), "/other".to_string()];

        assert!(topic_matches(&prefixes, "/test/1/topic"));
        assert!(topic_matches(&prefixes, "/other"));
        assert!(!topic_matches(&prefixes, "/test-other"));
        assert!(!topic_matches(&[], "/test/1/topic"));
    }

    #[tokio::test]
    async fn test_sequencer_assigns_gapless_sequences() {
        let event_store = Arc::new(MemoryEventStore::new());
        let state = test_state(event_store.clone(), Arc::new(MemorySequenceStore::new()));
        let mut live = state.event_tx.subscribe();

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(sequencer(state.clone(), rx));

        for n in 1..=3u64 {
            let event = Event::new("producer", "/test/1/topic", json!({ "n": n }));
            tx.send((peer(), event.to_frames().unwrap())).await.unwrap();
        }

        for expected in 1..=3u64 {
            let event = live.recv().await.unwrap();
            assert_eq!(event.sequence, Some(expected));
        }

        drop(tx);
        task.await.unwrap();

        assert_eq!(event_store.len(), 3);
        assert_eq!(event_store.last_sequence().unwrap(), Some(3));
        assert_eq!(state.current_sequence(), 3);
    }

    #[tokio::test]
    async fn test_sequencer_drops_malformed_events() {
        let event_store = Arc::new(MemoryEventStore::new());
        let state = test_state(event_store.clone(), Arc::new(MemorySequenceStore::new()));

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(sequencer(state.clone(), rx));

        // garbage sequence frame
        let bad = vec![b"/t".to_vec(), b"not-a-number".to_vec()];
        tx.send((peer(), bad)).await.unwrap();

        let good = Event::new("producer", "/t", json!(1));
        tx.send((peer(), good.to_frames().unwrap())).await.unwrap();

        drop(tx);
        task.await.unwrap();

        // the malformed message consumed no sequence
        assert_eq!(event_store.len(), 1);
        assert_eq!(state.current_sequence(), 1);
    }

    #[tokio::test]
    async fn test_counter_seeds_from_stores() {
        let event_store = Arc::new(MemoryEventStore::new());
        let stored = Event::new("producer", "/t", json!(1));
        event_store.append(100, &stored).unwrap();

        let sequence_store = Arc::new(MemorySequenceStore::with_value(99));
        let config = BrokerConfig {
            broadcast: Endpoint::tcp("127.0.0.1", 0),
            ingest: Endpoint::tcp("127.0.0.1", 0),
            replay: Endpoint::tcp("127.0.0.1", 0),
            data_dir: "target/unused".into(),
        };
        let mut broker = Broker::with_stores(config, event_store, sequence_store.clone());

        broker.connect().await.unwrap();
        // event log is ahead of the dump; the higher value wins
        assert_eq!(broker.current_sequence(), 100);

        broker.close().unwrap();
        assert_eq!(sequence_store.load().unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_sync_request_replays_filtered_events_in_order() {
        let event_store = Arc::new(MemoryEventStore::new());
        let state = test_state(event_store.clone(), Arc::new(MemorySequenceStore::new()));

        for (sequence, topic) in [(1, "/test/1/topic"), (2, "/test-other"), (3, "/test/1/x")] {
            let event = Event::new("producer", topic, json!({ "s": sequence }));
            event_store.append(sequence, &event).unwrap();
        }
        state.sequence.store(3, Ordering::SeqCst);

        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let request = SyncCommand::sync_start(vec!["/test/1".to_string()], 0);
        handle_sync_request(&mut server, peer(), &state, &request.to_frames())
            .await
            .unwrap();
        drop(server);

        let first = wire::read_message(&mut client).await.unwrap().unwrap();
        assert_eq!(first[0], b"SYNC");
        let replayed = Event::from_frames(&first[1..]).unwrap();
        assert_eq!(replayed.sequence, Some(1));

        let second = wire::read_message(&mut client).await.unwrap().unwrap();
        let replayed = Event::from_frames(&second[1..]).unwrap();
        assert_eq!(replayed.sequence, Some(3));

        let end = wire::read_message(&mut client).await.unwrap().unwrap();
        let command = SyncCommand::from_frames(&end).unwrap();
        assert_eq!(command.cmd, SyncCmd::SyncEnd);
        assert_eq!(command.topics, vec!["/test/1"]);
        assert_eq!(command.sequence, 3);

        assert!(wire::read_message(&mut client).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_request_respects_sequence_lower_bound() {
        let event_store = Arc::new(MemoryEventStore::new());
        let state = test_state(event_store.clone(), Arc::new(MemorySequenceStore::new()));

        for sequence in 1..=3u64 {
            let event = Event::new("producer", "/test/1/topic", json!(sequence));
            event_store.append(sequence, &event).unwrap();
        }
        state.sequence.store(3, Ordering::SeqCst);

        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let request = SyncCommand::sync_start(vec!["/test/1".to_string()], 2);
        handle_sync_request(&mut server, peer(), &state, &request.to_frames())
            .await
            .unwrap();
        drop(server);

        let first = wire::read_message(&mut client).await.unwrap().unwrap();
        assert_eq!(first[0], b"SYNC");
        assert_eq!(Event::from_frames(&first[1..]).unwrap().sequence, Some(3));

        let end = wire::read_message(&mut client).await.unwrap().unwrap();
        assert_eq!(SyncCommand::from_frames(&end).unwrap().cmd, SyncCmd::SyncEnd);
    }

    #[tokio::test]
    async fn test_sync_end_reports_counter_at_completion() {
        let event_store = Arc::new(MemoryEventStore::new());
        let state = test_state(event_store, Arc::new(MemorySequenceStore::new()));

        // events assigned after the store snapshot was taken
        state.sequence.store(7, Ordering::SeqCst);

        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let request = SyncCommand::sync_start(vec!["/a".to_string()], 0);
        handle_sync_request(&mut server, peer(), &state, &request.to_frames())
            .await
            .unwrap();
        drop(server);

        let end = wire::read_message(&mut client).await.unwrap().unwrap();
        assert_eq!(SyncCommand::from_frames(&end).unwrap().sequence, 7);
    }

    #[tokio::test]
    async fn test_invalid_sync_request_sends_nothing() {
        let event_store = Arc::new(MemoryEventStore::new());
        let state = test_state(event_store, Arc::new(MemorySequenceStore::new()));

        let (mut client, mut server) = tokio::io::duplex(1024);

        // wrong frame count
        let frames = vec![b"SYNCSTART".to_vec(), b"/t".to_vec()];
        handle_sync_request(&mut server, peer(), &state, &frames)
            .await
            .unwrap();

        // unknown command tag
        let frames = vec![b"SOMETHING".to_vec(), b"/t".to_vec(), b"1".to_vec()];
        handle_sync_request(&mut server, peer(), &state, &frames)
            .await
            .unwrap();

        drop(server);
        assert!(wire::read_message(&mut client).await.unwrap().is_none());
    }
}
