//! Bus integration tests
//!
//! These run a real broker over real sockets (bound to port 0 so tests never
//! collide) and exercise the full publish → sequence → replay → live flow.

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use event_bus::store::{EventStore, FileEventStore};
use event_bus::{
    wire, Broker, BrokerConfig, Endpoint, Publisher, PublisherConfig, Subscriber,
    SubscriberConfig, SyncCmd, SyncCommand,
};

/// Start a broker with every channel bound to an ephemeral port.
async fn start_broker(data_dir: &Path) -> Broker {
    let config = BrokerConfig {
        broadcast: Endpoint::tcp("127.0.0.1", 0),
        ingest: Endpoint::tcp("127.0.0.1", 0),
        replay: Endpoint::tcp("127.0.0.1", 0),
        data_dir: data_dir.to_path_buf(),
    };
    let mut broker = Broker::new(config).expect("failed to create broker");
    broker.connect().await.expect("failed to connect broker");
    broker
}

fn publisher_for(broker: &Broker) -> Publisher {
    let endpoints = broker.endpoints().unwrap();
    let config = PublisherConfig::new("test_producer")
        .with_ingest_endpoint(endpoints.ingest.clone());
    Publisher::new(config).expect("failed to create publisher")
}

fn subscriber_config_for(broker: &Broker, data_dir: &Path) -> SubscriberConfig {
    let endpoints = broker.endpoints().unwrap();
    let mut config = SubscriberConfig::new(data_dir)
        .with_broadcast_endpoint(endpoints.broadcast.clone());
    // endpoints were bound independently, so replay does not sit at −1
    config.replay = endpoints.replay.clone();
    config
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn recv_value(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Value>) -> Value {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_end_to_end_replay_then_live() {
    let broker_dir = TempDir::new().unwrap();
    let subscriber_dir = TempDir::new().unwrap();

    let mut broker = start_broker(broker_dir.path()).await;
    let publisher = publisher_for(&broker);

    // published before the subscriber exists; it must arrive via replay
    publisher.send("/a/b", json!({ "x": 1 })).await.unwrap();
    wait_for("first event to be sequenced", || broker.current_sequence() == 1).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut subscriber =
        Subscriber::new(subscriber_config_for(&broker, subscriber_dir.path())).unwrap();
    let sender = tx.clone();
    subscriber.on("/a", move |data: &Value| {
        let _ = sender.send(data.clone());
    });

    subscriber.connect().await.unwrap();

    // replay delivered the missed event and the cursor caught up
    assert!(!subscriber.is_syncing());
    assert_eq!(subscriber.last_applied_sequence(), 1);
    assert_eq!(recv_value(&mut rx).await, json!({ "x": 1 }));

    // now a live event
    publisher.send("/a/c", json!({ "x": 2 })).await.unwrap();
    assert_eq!(recv_value(&mut rx).await, json!({ "x": 2 }));
    wait_for("cursor to advance", || subscriber.last_applied_sequence() == 2).await;

    subscriber.close().unwrap();
    broker.close().unwrap();
}

#[tokio::test]
async fn test_sequences_are_gapless_across_restart() {
    let data_dir = TempDir::new().unwrap();

    let mut broker = start_broker(data_dir.path()).await;
    let publisher = publisher_for(&broker);
    for n in 1..=3 {
        publisher.send("/t", json!({ "n": n })).await.unwrap();
    }
    wait_for("three events", || broker.current_sequence() == 3).await;
    broker.close().unwrap();

    // a new broker over the same data directory resumes the counter
    let mut broker = start_broker(data_dir.path()).await;
    assert_eq!(broker.current_sequence(), 3);

    let publisher = publisher_for(&broker);
    for n in 4..=5 {
        publisher.send("/t", json!({ "n": n })).await.unwrap();
    }
    wait_for("five events", || broker.current_sequence() == 5).await;
    broker.close().unwrap();

    let store = FileEventStore::new(data_dir.path().join("events.jsonl")).unwrap();
    let sequences: Vec<_> = store
        .events_after(0)
        .unwrap()
        .iter()
        .filter_map(|e| e.sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_replay_filters_by_topic_prefix_and_sequence() {
    let data_dir = TempDir::new().unwrap();
    let mut broker = start_broker(data_dir.path()).await;
    let publisher = publisher_for(&broker);

    publisher.send("/a/1", json!(1)).await.unwrap();
    publisher.send("/b/2", json!(2)).await.unwrap();
    publisher.send("/a/3", json!(3)).await.unwrap();
    wait_for("three events", || broker.current_sequence() == 3).await;

    // raw replay client asking for the /a subtree from the beginning
    let replay = broker.endpoints().unwrap().replay.clone();
    let mut stream = TcpStream::connect(replay.addr()).await.unwrap();
    let request = SyncCommand::sync_start(vec!["/a".to_string()], 0);
    wire::write_message(&mut stream, &request.to_frames())
        .await
        .unwrap();

    let mut replayed = Vec::new();
    let end = loop {
        let frames = wire::read_message(&mut stream).await.unwrap().unwrap();
        if frames[0] == b"SYNC" {
            replayed.push(event_bus::Event::from_frames(&frames[1..]).unwrap());
        } else {
            break SyncCommand::from_frames(&frames).unwrap();
        }
    };

    let sequences: Vec<_> = replayed.iter().filter_map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 3]);
    assert!(replayed.iter().all(|e| e.topic.starts_with("/a")));

    assert_eq!(end.cmd, SyncCmd::SyncEnd);
    assert_eq!(end.topics, vec!["/a"]);
    assert_eq!(end.sequence, 3);

    broker.close().unwrap();
}

#[tokio::test]
async fn test_invalid_replay_request_gets_no_response() {
    let data_dir = TempDir::new().unwrap();
    let mut broker = start_broker(data_dir.path()).await;

    let replay = broker.endpoints().unwrap().replay.clone();
    let mut stream = TcpStream::connect(replay.addr()).await.unwrap();

    // two frames instead of three: logged and dropped, nothing sent back
    let invalid = vec![b"SYNCSTART".to_vec(), b"/t".to_vec()];
    wire::write_message(&mut stream, &invalid).await.unwrap();

    // the connection keeps serving: a valid request answers normally, and
    // its reply is the first thing on the wire
    let request = SyncCommand::sync_start(vec!["/t".to_string()], 0);
    wire::write_message(&mut stream, &request.to_frames())
        .await
        .unwrap();

    let frames = timeout(Duration::from_secs(5), wire::read_message(&mut stream))
        .await
        .expect("timed out waiting for sync end")
        .unwrap()
        .unwrap();
    let command = SyncCommand::from_frames(&frames).unwrap();
    assert_eq!(command.cmd, SyncCmd::SyncEnd);
    assert_eq!(command.sequence, 0);

    broker.close().unwrap();
}

#[tokio::test]
async fn test_subscriber_cursor_persists_across_restart() {
    let broker_dir = TempDir::new().unwrap();
    let subscriber_dir = TempDir::new().unwrap();

    let mut broker = start_broker(broker_dir.path()).await;
    let publisher = publisher_for(&broker);
    publisher.send("/a/b", json!({ "x": 1 })).await.unwrap();
    wait_for("event to be sequenced", || broker.current_sequence() == 1).await;

    // first run: replay the event, then shut down
    let mut subscriber =
        Subscriber::new(subscriber_config_for(&broker, subscriber_dir.path())).unwrap();
    subscriber.on("/a", |_: &Value| {});
    subscriber.connect().await.unwrap();
    assert_eq!(subscriber.last_applied_sequence(), 1);
    subscriber.close().unwrap();

    // second run over the same data directory: nothing to replay, and the
    // already-applied event is not dispatched again
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut subscriber =
        Subscriber::new(subscriber_config_for(&broker, subscriber_dir.path())).unwrap();
    subscriber.on("/a", move |data: &Value| {
        let _ = tx.send(data.clone());
    });
    subscriber.connect().await.unwrap();

    assert_eq!(subscriber.last_applied_sequence(), 1);
    subscriber.close().unwrap();
    assert!(rx.try_recv().is_err(), "replayed an already-applied event");

    broker.close().unwrap();
}
