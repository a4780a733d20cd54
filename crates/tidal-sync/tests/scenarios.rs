//! End-to-end scenarios: store, queue, dispatcher and a scripted remote

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidal_core::{ContextProviders, EnvelopeBuilder, Key, ManualNetwork, PendingAction, Store, Value};
use tidal_queue::{Command, ConflictResolver, DeleteCancelsCreate, EditSupersedesCreate, Outcome};
use tidal_sync::{
    BackoffConfig, Direction, Engine, PageResult, PageSpec, PaginationController, Remote,
    RemoteResponse, Reply, ScriptedRemote, SyncConfig, TransportError, WireRequest,
};

fn key(s: &str) -> Key {
    Key::new(s).unwrap()
}

fn config() -> SyncConfig {
    SyncConfig {
        request_timeout_ms: 500,
        max_retries: 3,
        connectivity_poll_ms: 10,
        backoff: BackoffConfig {
            initial_ms: 5,
            max_ms: 20,
            multiplier: 2.0,
        },
        ..SyncConfig::default()
    }
}

fn offline() -> (Arc<ManualNetwork>, ContextProviders) {
    let network = Arc::new(ManualNetwork::new(false));
    let context = ContextProviders::default().with_network(network.clone());
    (network, context)
}

fn create_report(store: &Store, id: u32, name: &str) -> Command {
    let report = key(&format!("report_{id}"));
    let envelope = EnvelopeBuilder::new(store)
        .set(report.clone(), Value::from_pairs([("name", name)]))
        .pending(report.clone(), PendingAction::Add)
        .error_marker(report.clone())
        .build();
    Command::write("CreateReport", report)
        .with_param("reportID", id)
        .with_param("name", name)
        .with_envelope(envelope)
}

fn edit_report(store: &Store, id: u32, name: &str) -> Command {
    let report = key(&format!("report_{id}"));
    let envelope = EnvelopeBuilder::new(store)
        .merge(report.clone(), Value::from_pairs([("name", name)]))
        .pending(report.clone(), PendingAction::Update)
        .build();
    Command::write("EditReport", report)
        .with_param("reportID", id)
        .with_param("name", name)
        .with_envelope(envelope)
}

fn delete_report(store: &Store, id: u32) -> Command {
    let report = key(&format!("report_{id}"));
    let envelope = EnvelopeBuilder::new(store).remove(report.clone()).build();
    Command::write("DeleteReport", report)
        .with_param("reportID", id)
        .with_envelope(envelope)
}

#[tokio::test]
async fn create_failure_rolls_back_with_error_record() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.push(Reply::Reject("Policy does not allow new reports".to_string()));
    let engine = Engine::builder(remote.clone()).config(config()).build().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        engine.store().subscribe(key("report_"), move |changes| {
            seen.lock().extend(changes.iter().map(|c| c.value.clone()));
        });
    }

    let ticket = engine
        .enqueue(create_report(engine.store(), 1, "Lisbon"))
        .unwrap();
    let optimistic = engine.store().get(&key("report_1")).unwrap();
    assert_eq!(optimistic.get("name"), Some(&Value::from("Lisbon")));

    engine.start();
    assert!(matches!(ticket.outcome().await, Outcome::Failed(_)));

    let record = engine.store().get(&key("report_1")).unwrap();
    assert_eq!(record.get("name"), None);
    assert_eq!(record.get("pendingAction"), None);
    let errors = record.get("errors").and_then(Value::as_map).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors.values().next(),
        Some(&Value::from("Policy does not allow new reports"))
    );
    // One batch for the optimistic write, one for the rollback
    assert_eq!(seen.lock().len(), 2);
    engine.shutdown().await;
}

#[tokio::test]
async fn create_failure_removes_record_and_marks_failure_record() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.push(Reply::Reject("Report name taken".to_string()));
    let engine = Engine::builder(remote.clone()).config(config()).build().unwrap();

    let report = key("report_1");
    let failures = key("reportFailures_1");
    let envelope = EnvelopeBuilder::new(engine.store())
        .set(report.clone(), Value::from_pairs([("name", "Lisbon")]))
        .pending(report.clone(), PendingAction::Add)
        .error_marker(failures.clone())
        .build();
    let ticket = engine
        .enqueue(
            Command::write("CreateReport", report.clone())
                .with_param("reportID", 1)
                .with_envelope(envelope),
        )
        .unwrap();
    assert!(engine.store().contains(&report));

    engine.start();
    assert_eq!(ticket.outcome().await, Outcome::Failed("Report name taken".to_string()));

    assert_eq!(engine.store().get(&report), None);
    let record = engine.store().get(&failures).unwrap();
    let errors = record.get("errors").and_then(Value::as_map).unwrap();
    assert_eq!(errors.values().collect::<Vec<_>>(), vec![&Value::from("Report name taken")]);
    engine.shutdown().await;
}

#[tokio::test]
async fn create_and_edit_merge_into_one_request() {
    let (network, context) = offline();
    let remote = Arc::new(ScriptedRemote::new());
    let resolver = ConflictResolver::builder()
        .register("EditReport", EditSupersedesCreate::new("CreateReport", ["reportID"]))
        .build()
        .unwrap();
    let engine = Engine::builder(remote.clone())
        .config(config())
        .context(context)
        .resolver(resolver)
        .build()
        .unwrap();
    engine.start();

    let created = engine
        .enqueue(create_report(engine.store(), 1, "Lisbon"))
        .unwrap();
    let edited = engine
        .enqueue(edit_report(engine.store(), 1, "Lisbon trip"))
        .unwrap();
    assert_eq!(engine.len(), 1);
    assert_eq!(created.id(), edited.id());
    let record = engine.store().get(&key("report_1")).unwrap();
    assert_eq!(record.get("name"), Some(&Value::from("Lisbon trip")));

    network.set_online(true);
    engine.network_changed();
    assert!(created.outcome().await.is_success());
    assert!(edited.outcome().await.is_success());

    let calls = remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].command_name, "CreateReport");
    assert_eq!(calls[0].params["name"], json!("Lisbon trip"));

    let record = engine.store().get(&key("report_1")).unwrap();
    assert_eq!(record.get("name"), Some(&Value::from("Lisbon trip")));
    assert_eq!(record.get("pendingAction"), None);
    engine.shutdown().await;
}

#[tokio::test]
async fn delete_of_unsent_create_never_reaches_server() {
    let (network, context) = offline();
    let remote = Arc::new(ScriptedRemote::new());
    let resolver = ConflictResolver::builder()
        .register("DeleteReport", DeleteCancelsCreate::new("CreateReport", ["reportID"]))
        .build()
        .unwrap();
    let engine = Engine::builder(remote.clone())
        .config(config())
        .context(context)
        .resolver(resolver)
        .build()
        .unwrap();
    engine.start();

    let created = engine
        .enqueue(create_report(engine.store(), 1, "Lisbon"))
        .unwrap();
    let deleted = engine.enqueue(delete_report(engine.store(), 1)).unwrap();

    assert_eq!(created.outcome().await, Outcome::Cancelled);
    assert_eq!(deleted.outcome().await, Outcome::Succeeded(None));
    assert!(engine.is_empty());
    assert!(engine.store().get(&key("report_1")).is_none());

    network.set_online(true);
    engine.network_changed();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(remote.call_count(), 0);
    engine.shutdown().await;
}

/// Remote that records how many requests per resource overlap
#[derive(Default)]
struct OverlapRemote {
    active: Mutex<Vec<String>>,
    max_same_resource: AtomicUsize,
    max_total: AtomicUsize,
    order: Mutex<Vec<String>>,
}

#[async_trait]
impl Remote for OverlapRemote {
    async fn send(&self, request: WireRequest) -> Result<RemoteResponse, TransportError> {
        let resource = request.params["reportID"].to_string();
        {
            let mut active = self.active.lock();
            active.push(resource.clone());
            let same = active.iter().filter(|r| **r == resource).count();
            self.max_same_resource.fetch_max(same, Ordering::SeqCst);
            self.max_total.fetch_max(active.len(), Ordering::SeqCst);
            self.order.lock().push(format!("{}:{}", resource, request.params["name"]));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        {
            let mut active = self.active.lock();
            if let Some(pos) = active.iter().position(|r| *r == resource) {
                active.remove(pos);
            }
        }
        Ok(RemoteResponse::ok(&request))
    }
}

#[tokio::test]
async fn same_resource_commands_are_sent_in_order_one_at_a_time() {
    let remote = Arc::new(OverlapRemote::default());
    let engine = Engine::builder(remote.clone()).config(config()).build().unwrap();

    for name in ["a", "b", "c"] {
        engine.enqueue(edit_report(engine.store(), 1, name)).unwrap();
        engine.enqueue(edit_report(engine.store(), 2, name)).unwrap();
    }
    engine.start();
    engine.wait_idle().await;

    assert_eq!(remote.max_same_resource.load(Ordering::SeqCst), 1);
    assert_eq!(remote.max_total.load(Ordering::SeqCst), 2);
    let order = remote.order.lock().clone();
    let first: Vec<&String> = order.iter().filter(|o| o.starts_with("1:")).collect();
    assert_eq!(first, vec!["1:\"a\"", "1:\"b\"", "1:\"c\""]);
    engine.shutdown().await;
}

#[tokio::test]
async fn queued_commands_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig {
        queue_path: Some(dir.path().join("queue.db")),
        ..config()
    };

    {
        let (_network, context) = offline();
        let engine = Engine::builder(ScriptedRemote::new())
            .config(config.clone())
            .context(context)
            .build()
            .unwrap();
        engine.enqueue(create_report(engine.store(), 1, "Lisbon")).unwrap();
        engine.enqueue(edit_report(engine.store(), 1, "Porto")).unwrap();
        assert_eq!(engine.len(), 2);
    }

    let remote = Arc::new(ScriptedRemote::new());
    let engine = Engine::builder(remote.clone()).config(config).build().unwrap();
    assert_eq!(engine.restore().unwrap(), 2);
    let record = engine.store().get(&key("report_1")).unwrap();
    assert_eq!(record.get("name"), Some(&Value::from("Porto")));

    engine.start();
    engine.wait_idle().await;
    let names: Vec<String> = remote.calls().into_iter().map(|c| c.command_name).collect();
    assert_eq!(names, vec!["CreateReport", "EditReport"]);
    engine.shutdown().await;
}

#[tokio::test]
async fn identical_reads_coalesce() {
    let (network, context) = offline();
    let remote = Arc::new(ScriptedRemote::with_handler(|_| Reply::Payload(json!({"total": 3}))));
    let engine = Engine::builder(remote.clone())
        .config(config())
        .context(context)
        .build()
        .unwrap();
    engine.start();

    let read = || Command::read("OpenReport", key("report_1")).with_param("reportID", 1);
    let first = engine.enqueue(read()).unwrap();
    let second = engine.enqueue(read()).unwrap();
    let other = engine
        .enqueue(Command::read("OpenReport", key("report_2")).with_param("reportID", 2))
        .unwrap();
    assert_eq!(engine.len(), 2);

    network.set_online(true);
    engine.network_changed();
    let expected = Outcome::Succeeded(Some(json!({"total": 3})));
    assert_eq!(first.outcome().await, expected);
    assert_eq!(second.outcome().await, expected);
    assert_eq!(other.outcome().await, expected);
    assert_eq!(remote.call_count(), 2);
    engine.shutdown().await;
}

fn actions_spec() -> PageSpec {
    PageSpec::new(
        key("reportActions_"),
        "OpenReport",
        "GetOlderReportActions",
        "GetNewerReportActions",
        "reportActionID",
    )
    .unwrap()
}

fn actions(ids: std::ops::RangeInclusive<i64>) -> serde_json::Value {
    ids.map(|id| json!({"reportActionID": id, "message": format!("#{id}")}))
        .collect()
}

#[tokio::test]
async fn concurrent_older_page_fetches_collapse_into_one_read() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.push(Reply::Payload(actions(50..=59)));
    remote.push(Reply::Payload(actions(40..=49)).delayed(Duration::from_millis(50)));
    let engine = Engine::builder(remote.clone()).config(config()).build().unwrap();
    engine.start();
    let pages = PaginationController::new(engine.clone()).with(actions_spec());

    pages
        .fetch_page("reportActions_", "7", Direction::Initial)
        .await
        .unwrap();
    let (a, b) = tokio::join!(
        pages.fetch_page("reportActions_", "7", Direction::Older),
        pages.fetch_page("reportActions_", "7", Direction::Older),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a, b);
    assert!(matches!(a, PageResult::Page(ref items) if items.len() == 10));
    let older = remote.calls_named("GetOlderReportActions");
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].params["cursorID"], json!("50"));
    assert_eq!(pages.items("reportActions_", "7").unwrap().len(), 20);
    engine.shutdown().await;
}

#[tokio::test]
async fn paging_older_stops_when_the_server_repeats_known_items() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.push(Reply::Payload(actions(50..=59)));
    remote.push(Reply::Payload(actions(40..=49)));
    // A stale server answer overlapping what is already loaded
    remote.push(Reply::Payload(actions(45..=55)));
    remote.push(Reply::Payload(actions(30..=39)));
    let engine = Engine::builder(remote.clone()).config(config()).build().unwrap();
    engine.start();
    let pages = PaginationController::new(engine.clone()).with(actions_spec());

    pages
        .fetch_page("reportActions_", "7", Direction::Initial)
        .await
        .unwrap();
    let mut fetched = Vec::new();
    for _ in 0..10 {
        match pages
            .fetch_page("reportActions_", "7", Direction::Older)
            .await
            .unwrap()
        {
            PageResult::Page(items) => fetched.push(items.len()),
            PageResult::NoMorePages => break,
            PageResult::Failed(message) => panic!("older page failed: {message}"),
        }
    }
    assert_eq!(fetched, vec![10, 0]);

    let cursors: Vec<serde_json::Value> = remote
        .calls_named("GetOlderReportActions")
        .into_iter()
        .map(|c| c.params["cursorID"].clone())
        .collect();
    assert_eq!(cursors, vec![json!("50"), json!("40")]);
    assert_eq!(remote.call_count(), 3);

    let items = pages.items("reportActions_", "7").unwrap();
    assert_eq!(items.len(), 20);
    let ids: Vec<i64> = items
        .iter()
        .filter_map(|item| item.get("reportActionID").and_then(Value::as_int))
        .collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    let meta = engine.store().get(&key("reportActionsMetadata_7")).unwrap();
    assert_eq!(meta.get("hasOlder"), Some(&Value::Bool(false)));
    engine.shutdown().await;
}

#[tokio::test]
async fn page_reads_wait_behind_writes_to_their_report() {
    let remote = Arc::new(ScriptedRemote::new());
    remote.push(Reply::Ok.delayed(Duration::from_millis(100)));
    remote.push(Reply::Payload(actions(1..=3)));
    let engine = Engine::builder(remote.clone()).config(config()).build().unwrap();
    engine.start();
    let spec = actions_spec().with_resource(|id| Key::new(format!("report_{id}")));
    let pages = PaginationController::new(engine.clone()).with(spec);

    let mut create = engine.enqueue(create_report(engine.store(), 7, "Porto")).unwrap();
    let page = pages
        .fetch_page("reportActions_", "7", Direction::Initial)
        .await
        .unwrap();

    assert!(matches!(page, PageResult::Page(ref items) if items.len() == 3));
    assert_eq!(create.try_outcome(), Some(Outcome::Succeeded(None)));
    let names: Vec<String> = remote.calls().into_iter().map(|c| c.command_name).collect();
    assert_eq!(names, vec!["CreateReport", "OpenReport"]);
    engine.shutdown().await;
}
