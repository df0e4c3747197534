//! Write path behaviour: worker against the SQLite stores, broker and pool

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use atlas_common::db::{
    init_database, init_memory_database, SqliteContentStore, SqliteEquivalenceIndex, SqliteRefreshQueue,
    SqliteTopicStore,
};
use atlas_common::store::{ContentStore, EquivalenceIndex};
use atlas_common::{Content, Id, Publisher, Resolved, SourceRegistry};
use atlas_ingest::{
    Ack, BrokerSettings, Handlers, IndexRefresher, IngestPool, IngestWorker, RefreshHandle,
    RefreshSettings, SqliteBroker, Subscription,
};

fn id(v: u64) -> Id {
    Id::new(v).unwrap()
}

fn content_event(entity: Id, source: &str, timestamp: &str, title: &str) -> Vec<u8> {
    json!({
        "entity_id": entity,
        "timestamp": timestamp,
        "entity_type": "content",
        "source": source,
        "payload": {"kind": "episode", "title": title},
    })
    .to_string()
    .into_bytes()
}

fn equivalence_event(subject: Id, equivalents: &[Id], timestamp: &str) -> Vec<u8> {
    json!({
        "entity_id": subject,
        "timestamp": timestamp,
        "entity_type": "equivalence",
        "source": "equivalence",
        "payload": {"equivalents": equivalents},
    })
    .to_string()
    .into_bytes()
}

fn enabled(keys: &[&str]) -> BTreeSet<Publisher> {
    let registry = SourceRegistry::builtin();
    keys.iter().map(|k| registry.by_key(k).unwrap().clone()).collect()
}

fn fast_refresh() -> RefreshSettings {
    RefreshSettings {
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(10),
        poll_interval: Duration::from_millis(5),
        batch_size: 100,
    }
}

fn spawn_refresher(
    db: &sqlx::SqlitePool,
    index: &Arc<SqliteEquivalenceIndex>,
    cancel: &CancellationToken,
) -> (RefreshHandle, tokio::task::JoinHandle<()>) {
    IndexRefresher::spawn(
        index.clone(),
        Arc::new(SqliteRefreshQueue::new(db.clone())),
        fast_refresh(),
        cancel.clone(),
    )
}

/// Poll the index until `subject` maps to `expected` or give up
async fn wait_for_set(index: &SqliteEquivalenceIndex, subject: u64, expected: &[u64]) -> bool {
    let expected: BTreeSet<Id> = expected.iter().map(|v| id(*v)).collect();
    for _ in 0..200 {
        let sets = index
            .lookup(&BTreeSet::from([id(subject)]), &enabled(&["bbc", "c4", "itv"]))
            .await
            .unwrap();
        if sets.get(&id(subject)) == Some(&expected) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Redeliver `event` until the worker acks it, as the broker would
async fn deliver_until_acked(worker: Arc<IngestWorker>, event: Vec<u8>) {
    for _ in 0..200 {
        if worker.on_message(&event).await == Ack::Ack {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("event was never acknowledged");
}

struct Fixture {
    db: sqlx::SqlitePool,
    content: Arc<SqliteContentStore>,
    index: Arc<SqliteEquivalenceIndex>,
    worker: Arc<IngestWorker>,
    cancel: CancellationToken,
}

impl Fixture {
    async fn new() -> Self {
        let db = init_memory_database().await.unwrap();
        let registry = SourceRegistry::builtin();
        let content = Arc::new(SqliteContentStore::new(db.clone(), registry.clone()));
        let topics = Arc::new(SqliteTopicStore::new(db.clone()));
        let index = Arc::new(SqliteEquivalenceIndex::new(db.clone()));

        let cancel = CancellationToken::new();
        let (refresher, _task) = spawn_refresher(&db, &index, &cancel);
        let handlers = Handlers::new(content.clone(), topics, index.clone());
        let worker = Arc::new(IngestWorker::new(registry, handlers, refresher));

        Self {
            db,
            content,
            index,
            worker,
            cancel,
        }
    }

    async fn stored(&self, value: u64) -> Option<Content> {
        self.content
            .resolve_ids(&BTreeSet::from([id(value)]))
            .await
            .unwrap()
            .into_resources()
            .into_iter()
            .next()
    }

    async fn wait_for_set(&self, subject: u64, expected: &[u64]) -> bool {
        wait_for_set(&self.index, subject, expected).await
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Storage that is always down
struct UnavailableStore;

#[async_trait]
impl ContentStore for UnavailableStore {
    async fn resolve_ids(&self, _ids: &BTreeSet<Id>) -> atlas_common::Result<Resolved<Content>> {
        Err(atlas_common::Error::Dependency("storage offline".to_string()))
    }

    async fn write_if_newer(&self, _content: &Content) -> atlas_common::Result<bool> {
        Err(atlas_common::Error::Dependency("storage offline".to_string()))
    }
}

// ------------------------------------------------------------------------
// Worker
// ------------------------------------------------------------------------

#[tokio::test]
async fn applying_the_same_event_twice_is_idempotent() {
    let fixture = Fixture::new().await;
    let event = content_event(id(1), "bbc", "2024-05-01T10:00:00Z", "Pilot");

    assert_eq!(fixture.worker.on_message(&event).await, Ack::Ack);
    let after_first = fixture.stored(1).await.unwrap();

    assert_eq!(fixture.worker.on_message(&event).await, Ack::Ack);
    let after_second = fixture.stored(1).await.unwrap();

    assert_eq!(after_first, after_second);
    assert_eq!(after_second.title.as_deref(), Some("Pilot"));
}

#[tokio::test]
async fn out_of_order_delivery_converges_to_newest() {
    let older = content_event(id(1), "bbc", "2024-05-01T10:00:00Z", "Old title");
    let newer = content_event(id(1), "bbc", "2024-05-01T11:00:00Z", "New title");

    let in_order = Fixture::new().await;
    in_order.worker.on_message(&older).await;
    in_order.worker.on_message(&newer).await;

    let reversed = Fixture::new().await;
    reversed.worker.on_message(&newer).await;
    reversed.worker.on_message(&older).await;

    let a = in_order.stored(1).await.unwrap();
    let b = reversed.stored(1).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.title.as_deref(), Some("New title"));
}

#[tokio::test]
async fn undecodable_message_is_acked_and_dropped() {
    let fixture = Fixture::new().await;

    assert_eq!(fixture.worker.on_message(b"{not json").await, Ack::Ack);
    assert_eq!(fixture.worker.on_message(b"").await, Ack::Ack);
}

#[tokio::test]
async fn unknown_source_is_acked_without_write() {
    let fixture = Fixture::new().await;
    let event = content_event(id(1), "not-a-publisher", "2024-05-01T10:00:00Z", "Pilot");

    assert_eq!(fixture.worker.on_message(&event).await, Ack::Ack);
    assert!(fixture.stored(1).await.is_none());
}

#[tokio::test]
async fn payload_mismatch_is_acked_without_write() {
    let fixture = Fixture::new().await;
    let event = json!({
        "entity_id": id(1),
        "timestamp": "2024-05-01T10:00:00Z",
        "entity_type": "content",
        "source": "bbc",
        "payload": {"kind": "podcast"},
    })
    .to_string();

    assert_eq!(fixture.worker.on_message(event.as_bytes()).await, Ack::Ack);
    assert!(fixture.stored(1).await.is_none());
}

#[tokio::test]
async fn storage_failure_is_nacked() {
    let db = init_memory_database().await.unwrap();
    let cancel = CancellationToken::new();
    let index = Arc::new(SqliteEquivalenceIndex::new(db.clone()));
    let (refresher, _task) = spawn_refresher(&db, &index, &cancel);
    let handlers = Handlers::new(
        Arc::new(UnavailableStore),
        Arc::new(SqliteTopicStore::new(db)),
        index,
    );
    let worker = IngestWorker::new(SourceRegistry::builtin(), handlers, refresher);

    let event = content_event(id(1), "bbc", "2024-05-01T10:00:00Z", "Pilot");
    assert_eq!(worker.on_message(&event).await, Ack::Nack);
    cancel.cancel();
}

#[tokio::test]
async fn topic_event_is_stored() {
    let fixture = Fixture::new().await;
    let event = json!({
        "entity_id": id(40),
        "timestamp": "2024-05-01T10:00:00Z",
        "entity_type": "topic",
        "source": "bbc",
        "payload": {"namespace": "genre", "value": "drama", "title": "Drama"},
    })
    .to_string();

    assert_eq!(fixture.worker.on_message(event.as_bytes()).await, Ack::Ack);

    let namespace: String = sqlx::query_scalar("SELECT namespace FROM topics WHERE id = ?")
        .bind(id(40).as_db())
        .fetch_one(&fixture.db)
        .await
        .unwrap();
    assert_eq!(namespace, "genre");
}

#[tokio::test]
async fn equivalence_event_refreshes_index() {
    let fixture = Fixture::new().await;
    fixture
        .worker
        .on_message(&content_event(id(1), "bbc", "2024-05-01T10:00:00Z", "Doctor Who"))
        .await;
    fixture
        .worker
        .on_message(&content_event(id(2), "c4", "2024-05-01T10:00:00Z", "Doctor Who"))
        .await;

    let ack = fixture
        .worker
        .on_message(&equivalence_event(id(1), &[id(2)], "2024-05-01T10:05:00Z"))
        .await;
    assert_eq!(ack, Ack::Ack);
    assert!(fixture.wait_for_set(2, &[1, 2]).await);

    // Retraction refreshes the previously asserted id too
    fixture
        .worker
        .on_message(&equivalence_event(id(1), &[], "2024-05-01T10:10:00Z"))
        .await;
    assert!(fixture.wait_for_set(2, &[2]).await);
}

#[tokio::test]
async fn stale_equivalence_event_changes_nothing() {
    let fixture = Fixture::new().await;
    for (value, source) in [(1, "bbc"), (2, "c4"), (3, "itv")] {
        fixture
            .worker
            .on_message(&content_event(id(value), source, "2024-05-01T10:00:00Z", "Title"))
            .await;
    }

    fixture
        .worker
        .on_message(&equivalence_event(id(1), &[id(2)], "2024-05-01T12:00:00Z"))
        .await;
    let ack = fixture
        .worker
        .on_message(&equivalence_event(id(1), &[id(3)], "2024-05-01T11:00:00Z"))
        .await;

    assert_eq!(ack, Ack::Ack);
    assert!(fixture.wait_for_set(1, &[1, 2]).await);
}

#[tokio::test]
async fn ordering_holds_within_one_millisecond() {
    let fixture = Fixture::new().await;
    let t1 = content_event(id(1), "bbc", "2024-05-01T10:00:00.000100Z", "t1");
    let t2 = content_event(id(1), "bbc", "2024-05-01T10:00:00.000900Z", "t2");

    assert_eq!(fixture.worker.on_message(&t1).await, Ack::Ack);
    assert_eq!(fixture.worker.on_message(&t2).await, Ack::Ack);
    assert_eq!(fixture.stored(1).await.unwrap().title.as_deref(), Some("t2"));

    let reversed = Fixture::new().await;
    assert_eq!(reversed.worker.on_message(&t2).await, Ack::Ack);
    assert_eq!(reversed.worker.on_message(&t1).await, Ack::Ack);
    assert_eq!(reversed.stored(1).await.unwrap().title.as_deref(), Some("t2"));
}

#[tokio::test]
async fn equivalence_applied_while_refresher_down_is_refreshed_on_restart() {
    let db = init_memory_database().await.unwrap();
    let registry = SourceRegistry::builtin();
    let index = Arc::new(SqliteEquivalenceIndex::new(db.clone()));

    let stopped = CancellationToken::new();
    let (refresher, task) = spawn_refresher(&db, &index, &stopped);
    stopped.cancel();
    task.await.unwrap();

    let worker = IngestWorker::new(
        registry.clone(),
        Handlers::new(
            Arc::new(SqliteContentStore::new(db.clone(), registry)),
            Arc::new(SqliteTopicStore::new(db.clone())),
            index.clone(),
        ),
        refresher,
    );
    for (value, source) in [(1, "bbc"), (2, "c4")] {
        let event = content_event(id(value), source, "2024-05-01T10:00:00Z", "Doctor Who");
        assert_eq!(worker.on_message(&event).await, Ack::Ack);
    }

    let assertion = equivalence_event(id(1), &[id(2)], "2024-05-01T10:05:00Z");
    assert_eq!(worker.on_message(&assertion).await, Ack::Ack);
    // A redelivery is stale and must not be needed for the refresh
    assert_eq!(worker.on_message(&assertion).await, Ack::Ack);
    assert!(wait_for_set(&index, 1, &[1]).await);

    let cancel = CancellationToken::new();
    let (_handle, task) = spawn_refresher(&db, &index, &cancel);
    assert!(wait_for_set(&index, 1, &[1, 2]).await);
    assert!(wait_for_set(&index, 2, &[1, 2]).await);
    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deliveries_for_one_id_keep_the_newest() {
    let dir = tempfile::tempdir().unwrap();
    let db = init_database(&dir.path().join("atlas.db")).await.unwrap();

    let registry = SourceRegistry::builtin();
    let content = Arc::new(SqliteContentStore::new(db.clone(), registry.clone()));
    let index = Arc::new(SqliteEquivalenceIndex::new(db.clone()));
    let cancel = CancellationToken::new();
    let (refresher, refresher_task) = spawn_refresher(&db, &index, &cancel);
    let worker = Arc::new(IngestWorker::new(
        registry,
        Handlers::new(content.clone(), Arc::new(SqliteTopicStore::new(db.clone())), index),
        refresher,
    ));

    let mut deliveries = Vec::new();
    for value in 1..=25u64 {
        let t1 = content_event(id(value), "bbc", "2024-05-01T10:00:00.000100Z", "t1");
        let t2 = content_event(id(value), "bbc", "2024-05-01T10:00:00.000900Z", "t2");
        let (first, second) = if value % 2 == 0 { (t2, t1) } else { (t1, t2) };
        deliveries.push(tokio::spawn(deliver_until_acked(worker.clone(), first)));
        deliveries.push(tokio::spawn(deliver_until_acked(worker.clone(), second)));
    }
    for delivery in deliveries {
        delivery.await.unwrap();
    }

    let all: BTreeSet<Id> = (1..=25u64).map(id).collect();
    let stored = content.resolve_ids(&all).await.unwrap();
    assert_eq!(stored.len(), 25);
    for item in stored.resources() {
        assert_eq!(item.title.as_deref(), Some("t2"), "content {}", item.id);
    }

    cancel.cancel();
    refresher_task.await.unwrap();
    db.close().await;
}

// ------------------------------------------------------------------------
// Broker + pool
// ------------------------------------------------------------------------

fn broker_settings(partitions: u32) -> BrokerSettings {
    BrokerSettings {
        partitions,
        visibility_timeout: Duration::from_secs(60),
        retry_delay: Duration::ZERO,
    }
}

#[tokio::test]
async fn pool_processes_and_acks_published_events() {
    let fixture = Fixture::new().await;
    let broker = Arc::new(SqliteBroker::new(fixture.db.clone(), broker_settings(2)).await.unwrap());

    broker
        .publish(&id(1).to_code(), &content_event(id(1), "bbc", "2024-05-01T10:00:00Z", "One"))
        .await
        .unwrap();
    broker
        .publish(&id(2).to_code(), &content_event(id(2), "c4", "2024-05-01T10:00:00Z", "Two"))
        .await
        .unwrap();
    broker.publish("garbage", b"not an event").await.unwrap();

    let pool = IngestPool::new(broker.clone(), fixture.worker.clone(), Duration::from_millis(5));
    let cancel = CancellationToken::new();
    let tasks = pool.spawn(cancel.clone());

    for _ in 0..200 {
        if broker.pending().await.unwrap() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(broker.pending().await.unwrap(), 0);
    assert_eq!(fixture.stored(1).await.unwrap().title.as_deref(), Some("One"));
    assert_eq!(fixture.stored(2).await.unwrap().title.as_deref(), Some("Two"));
}

#[tokio::test]
async fn nacked_message_is_redelivered() {
    let db = init_memory_database().await.unwrap();
    let cancel = CancellationToken::new();
    let index = Arc::new(SqliteEquivalenceIndex::new(db.clone()));
    let (refresher, _task) = spawn_refresher(&db, &index, &cancel);
    let worker = Arc::new(IngestWorker::new(
        SourceRegistry::builtin(),
        Handlers::new(Arc::new(UnavailableStore), Arc::new(SqliteTopicStore::new(db.clone())), index),
        refresher,
    ));
    let broker = Arc::new(SqliteBroker::new(db, broker_settings(1)).await.unwrap());
    broker
        .publish("b1", &content_event(id(1), "bbc", "2024-05-01T10:00:00Z", "Pilot"))
        .await
        .unwrap();

    let pool = IngestPool::new(broker.clone(), worker, Duration::from_millis(5));
    assert_eq!(pool.process_next(0).await.unwrap(), Some(Ack::Nack));
    assert_eq!(pool.process_next(0).await.unwrap(), Some(Ack::Nack));
    assert_eq!(broker.pending().await.unwrap(), 1);

    let delivery = broker.receive(0).await.unwrap().unwrap();
    assert_eq!(delivery.attempts, 3);
    cancel.cancel();
}

#[tokio::test]
async fn empty_partition_yields_nothing() {
    let fixture = Fixture::new().await;
    let broker = Arc::new(SqliteBroker::new(fixture.db.clone(), broker_settings(3)).await.unwrap());
    let pool = IngestPool::new(broker, fixture.worker.clone(), Duration::from_millis(5));

    for partition in 0..3 {
        assert_eq!(pool.process_next(partition).await.unwrap(), None);
    }
}

#[tokio::test]
async fn file_database_shared_by_broker_and_stores() {
    let dir = tempfile::tempdir().unwrap();
    let db = init_database(&dir.path().join("atlas.db")).await.unwrap();

    let registry = SourceRegistry::builtin();
    let content = Arc::new(SqliteContentStore::new(db.clone(), registry.clone()));
    let index = Arc::new(SqliteEquivalenceIndex::new(db.clone()));
    let cancel = CancellationToken::new();
    let (refresher, refresher_task) = spawn_refresher(&db, &index, &cancel);
    let worker = Arc::new(IngestWorker::new(
        registry,
        Handlers::new(content.clone(), Arc::new(SqliteTopicStore::new(db.clone())), index),
        refresher,
    ));

    let broker = Arc::new(SqliteBroker::new(db.clone(), broker_settings(4)).await.unwrap());
    for value in 1..=8u64 {
        let event = content_event(id(value), "bbc", "2024-05-01T10:00:00Z", "Episode");
        broker.publish(&id(value).to_code(), &event).await.unwrap();
    }

    let pool = IngestPool::new(broker.clone(), worker, Duration::from_millis(5));
    let tasks = pool.spawn(cancel.clone());
    for _ in 0..400 {
        if broker.pending().await.unwrap() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();
    for task in tasks {
        task.await.unwrap();
    }
    refresher_task.await.unwrap();

    let all: BTreeSet<Id> = (1..=8u64).map(id).collect();
    assert_eq!(content.resolve_ids(&all).await.unwrap().len(), 8);
    db.close().await;
}
