//! Cursor-based pagination over collections
//!
//! A [`PageSpec`] describes one paginated collection type: the read commands
//! that fetch its pages and how to identify and order its items. The
//! [`PaginationController`] keeps two cursors per resource (oldest and newest
//! item seen) and turns `fetch_page` calls into read commands on the engine,
//! so identical concurrent fetches coalesce into one request.
//!
//! Items of resource `42` in collection `reportActions_` live in the record
//! `reportActions_42` as a map from item id to item. Loading state lives in
//! `reportActionsMetadata_42`:
//!
//! ```text
//! { isLoadingInitial, isLoadingOlder, isLoadingNewer, hasOlder, hasNewer }
//! ```
//!
//! `Older` and `Newer` pages only ever return items not stored yet. A page
//! that brings nothing new beyond the cursor it was requested from marks
//! that direction exhausted.
//!
//! Page reads are queued on the record key unless
//! [`PageSpec::with_resource`] names another resource, such as the report
//! the items belong to, so they stay behind that resource's writes.

use crate::engine::Engine;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tidal_core::{Envelope, Key, StoreOp, Value, ValueMap};
use tidal_queue::{Command, Outcome};

type ItemId = dyn Fn(&Value) -> Option<String> + Send + Sync;
type ItemOrder = dyn Fn(&Value, &Value) -> Ordering + Send + Sync;
type ResourceOf = dyn Fn(&str) -> tidal_core::Result<Key> + Send + Sync;

/// Which page to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Initial,
    Older,
    Newer,
}

impl Direction {
    fn loading_flag(self) -> &'static str {
        match self {
            Direction::Initial => "isLoadingInitial",
            Direction::Older => "isLoadingOlder",
            Direction::Newer => "isLoadingNewer",
        }
    }
}

/// Result of [`PaginationController::fetch_page`]
#[derive(Debug, Clone, PartialEq)]
pub enum PageResult {
    /// Items of the fetched page, oldest first
    Page(Vec<Value>),
    /// Nothing further in that direction; no request was made
    NoMorePages,
    /// The request failed for good
    Failed(String),
}

/// How one collection type is paginated
#[derive(Clone)]
pub struct PageSpec {
    /// Collection prefix, e.g. `reportActions_`
    pub collection: Key,
    pub initial_command: String,
    pub older_command: String,
    pub newer_command: String,
    item_id: Arc<ItemId>,
    order: Arc<ItemOrder>,
    resource: Option<Arc<ResourceOf>>,
}

impl PageSpec {
    /// Items are identified by `id_field` and ordered by it (numbers
    /// numerically, anything else by its text)
    pub fn new(
        collection: Key,
        initial_command: impl Into<String>,
        older_command: impl Into<String>,
        newer_command: impl Into<String>,
        id_field: &str,
    ) -> Result<Self> {
        if !collection.is_collection() {
            return Err(Error::Core(tidal_core::Error::InvalidKey(collection.to_string())));
        }
        let field = id_field.to_string();
        let order_field = field.clone();
        Ok(Self {
            collection,
            initial_command: initial_command.into(),
            older_command: older_command.into(),
            newer_command: newer_command.into(),
            item_id: Arc::new(move |item| item.get(&field).and_then(id_text)),
            order: Arc::new(move |a, b| compare_field(a, b, &order_field)),
            resource: None,
        })
    }

    /// Identify items with `f`
    pub fn with_item_id(mut self, f: impl Fn(&Value) -> Option<String> + Send + Sync + 'static) -> Self {
        self.item_id = Arc::new(f);
        self
    }

    /// Order items with `f`; `Less` means `a` is older
    pub fn with_order(mut self, f: impl Fn(&Value, &Value) -> Ordering + Send + Sync + 'static) -> Self {
        self.order = Arc::new(f);
        self
    }

    /// Queue page reads on the resource `f` returns for a resource id
    ///
    /// ```
    /// # use tidal_core::Key;
    /// # use tidal_sync::PageSpec;
    /// let spec = PageSpec::new(
    ///     Key::new("reportActions_").unwrap(),
    ///     "OpenReport",
    ///     "GetOlderActions",
    ///     "GetNewerActions",
    ///     "reportActionID",
    /// )
    /// .unwrap()
    /// .with_resource(|id| Key::new(format!("report_{id}")));
    /// ```
    pub fn with_resource(
        mut self,
        f: impl Fn(&str) -> tidal_core::Result<Key> + Send + Sync + 'static,
    ) -> Self {
        self.resource = Some(Arc::new(f));
        self
    }

    fn command_for(&self, direction: Direction) -> &str {
        match direction {
            Direction::Initial => &self.initial_command,
            Direction::Older => &self.older_command,
            Direction::Newer => &self.newer_command,
        }
    }

    fn record_key(&self, resource_id: &str) -> Result<Key> {
        Ok(Key::member(&self.collection, resource_id)?)
    }

    fn resource_key(&self, resource_id: &str) -> Result<Key> {
        match &self.resource {
            Some(resource) => Ok(resource(resource_id)?),
            None => self.record_key(resource_id),
        }
    }

    fn metadata_key(&self, resource_id: &str) -> Result<Key> {
        let base = self.collection.as_str().trim_end_matches('_');
        Ok(Key::new(format!("{base}Metadata_{resource_id}"))?)
    }
}

impl fmt::Debug for PageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageSpec")
            .field("collection", &self.collection)
            .field("initial_command", &self.initial_command)
            .field("older_command", &self.older_command)
            .field("newer_command", &self.newer_command)
            .finish_non_exhaustive()
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

fn compare_field(a: &Value, b: &Value, field: &str) -> Ordering {
    match (a.get(field), b.get(field)) {
        (Some(Value::Int(x)), Some(Value::Int(y))) => x.cmp(y),
        (Some(x), Some(y)) => match (x.as_float(), y.as_float()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => x.to_string().cmp(&y.to_string()),
        },
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
enum Cursor {
    #[default]
    Unfetched,
    At {
        id: String,
        item: Value,
    },
    Exhausted,
}

impl Cursor {
    fn is_at(&self) -> bool {
        matches!(self, Cursor::At { .. })
    }

    /// Move to `candidate` unless the cursor already points further out
    fn advance(&mut self, candidate: (&String, &Value), further: Ordering, order: &ItemOrder) {
        let (id, item) = candidate;
        if let Cursor::At { item: current, .. } = self {
            if order(item, current) != further {
                return;
            }
        }
        *self = Cursor::At {
            id: id.clone(),
            item: item.clone(),
        };
    }
}

#[derive(Debug, Default)]
struct Cursors {
    older: Cursor,
    newer: Cursor,
}

/// Paginates registered collections through an [`Engine`]
pub struct PaginationController {
    engine: Engine,
    specs: HashMap<String, PageSpec>,
    cursors: Mutex<HashMap<(String, String), Cursors>>,
}

impl PaginationController {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            specs: HashMap::new(),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Register a collection type, replacing any earlier spec for it
    pub fn register(&mut self, spec: PageSpec) -> &mut Self {
        self.specs.insert(spec.collection.to_string(), spec);
        self
    }

    pub fn with(mut self, spec: PageSpec) -> Self {
        self.register(spec);
        self
    }

    fn spec(&self, collection: &str) -> Result<&PageSpec> {
        self.specs
            .get(collection)
            .ok_or_else(|| Error::UnknownPageSpec(collection.to_string()))
    }

    /// Fetch one page of `collection` items for `resource_id`
    ///
    /// `Older` and `Newer` need a cursor from an earlier page. Without one,
    /// or once that direction came back with nothing new, they return
    /// [`PageResult::NoMorePages`] without a request. Their pages leave out
    /// items that were already stored.
    pub async fn fetch_page(
        &self,
        collection: &str,
        resource_id: &str,
        direction: Direction,
    ) -> Result<PageResult> {
        let spec = self.spec(collection)?.clone();
        let slot = (collection.to_string(), resource_id.to_string());
        let record = spec.record_key(resource_id)?;

        let from = match direction {
            Direction::Initial => None,
            Direction::Older | Direction::Newer => {
                let cursors = self.cursors.lock();
                let cursor = cursors.get(&slot).map(|c| match direction {
                    Direction::Older => &c.older,
                    _ => &c.newer,
                });
                match cursor {
                    Some(Cursor::At { id, item }) => Some((id.clone(), item.clone())),
                    _ => {
                        tracing::debug!(collection, resource_id, ?direction, "no more pages");
                        return Ok(PageResult::NoMorePages);
                    }
                }
            }
        };
        let known: HashSet<String> = match (&from, self.engine.store().get(&record)) {
            (Some(_), Some(Value::Map(map))) => map.into_keys().collect(),
            _ => HashSet::new(),
        };

        let metadata = spec.metadata_key(resource_id)?;
        let flag = direction.loading_flag();
        let envelope = Envelope {
            optimistic: vec![StoreOp::merge(metadata.clone(), Value::from_pairs([(flag, true)]))],
            finally: vec![StoreOp::merge(metadata.clone(), Value::from_pairs([(flag, false)]))],
            ..Envelope::new()
        };
        let mut command = Command::read(spec.command_for(direction), spec.resource_key(resource_id)?)
            .with_param("resourceID", resource_id)
            .with_envelope(envelope);
        if let Some((cursor_id, _)) = &from {
            command = command.with_param("cursorID", cursor_id.as_str());
        }

        let ticket = self.engine.enqueue(command)?;
        let payload = match ticket.outcome().await {
            Outcome::Succeeded(payload) => payload,
            Outcome::Failed(message) => return Ok(PageResult::Failed(message)),
            Outcome::Cancelled => return Ok(PageResult::Failed("cancelled".to_string())),
        };

        let mut page: Vec<(String, Value)> = Vec::new();
        for item in page_items(payload)? {
            match (spec.item_id)(&item) {
                Some(id) if known.contains(&id) => {}
                Some(id) => page.push((id, item)),
                None => tracing::warn!(collection = %spec.collection, "page item without id, skipped"),
            }
        }
        page.sort_by(|(_, a), (_, b)| (spec.order)(a, b));
        page.dedup_by(|(a, _), (b, _)| a == b);
        let from = from.as_ref().map(|(_, item)| item);
        self.store_page(&spec, &slot, direction, from, &record, &metadata, &page);
        Ok(PageResult::Page(page.into_iter().map(|(_, item)| item).collect()))
    }

    /// Store `page` and move the cursors
    ///
    /// `from` is the cursor item an `Older` or `Newer` page was requested
    /// from. A page with nothing past it exhausts that direction.
    #[allow(clippy::too_many_arguments)]
    fn store_page(
        &self,
        spec: &PageSpec,
        slot: &(String, String),
        direction: Direction,
        from: Option<&Value>,
        record: &Key,
        metadata: &Key,
        page: &[(String, Value)],
    ) {
        let order = spec.order.as_ref();
        let oldest = page.first().map(|(id, item)| (id, item));
        let newest = page.last().map(|(id, item)| (id, item));
        let beyond = |item: &Value, further: Ordering| from.is_none_or(|from| order(item, from) == further);

        let mut cursors = self.cursors.lock();
        let entry = cursors.entry(slot.clone()).or_default();
        match (direction, oldest, newest) {
            (Direction::Initial, Some(oldest), Some(newest)) => {
                entry.older.advance(oldest, Ordering::Less, order);
                entry.newer.advance(newest, Ordering::Greater, order);
            }
            (Direction::Initial, _, _) => {
                entry.older = Cursor::Exhausted;
                entry.newer = Cursor::Exhausted;
            }
            (Direction::Older, Some(oldest), _) if beyond(oldest.1, Ordering::Less) => {
                if entry.older.is_at() {
                    entry.older.advance(oldest, Ordering::Less, order);
                }
            }
            (Direction::Older, _, _) => entry.older = Cursor::Exhausted,
            (Direction::Newer, _, Some(newest)) if beyond(newest.1, Ordering::Greater) => {
                if entry.newer.is_at() {
                    entry.newer.advance(newest, Ordering::Greater, order);
                }
            }
            (Direction::Newer, _, _) => entry.newer = Cursor::Exhausted,
        }
        let flags = Value::from_pairs([
            ("hasOlder", entry.older.is_at()),
            ("hasNewer", entry.newer.is_at()),
        ]);
        drop(cursors);

        let mut ops = Vec::with_capacity(2);
        if !page.is_empty() {
            let items: ValueMap = page.iter().cloned().collect();
            ops.push(StoreOp::merge(record.clone(), Value::Map(items)));
        }
        ops.push(StoreOp::merge(metadata.clone(), flags));
        self.engine.store().apply_batch(ops.iter());
        tracing::debug!(record = %record, count = page.len(), ?direction, "page stored");
    }

    /// Stored items of `resource_id`, oldest first
    pub fn items(&self, collection: &str, resource_id: &str) -> Result<Vec<Value>> {
        let spec = self.spec(collection)?;
        let record = spec.record_key(resource_id)?;
        let mut items: Vec<Value> = match self.engine.store().get(&record) {
            Some(Value::Map(map)) => map.into_values().collect(),
            _ => Vec::new(),
        };
        items.sort_by(|a, b| (spec.order)(a, b));
        Ok(items)
    }

    /// Forget the cursors of `resource_id`
    ///
    /// Stored items stay; the next fetch must be `Initial` again.
    pub fn teardown(&self, collection: &str, resource_id: &str) {
        self.cursors
            .lock()
            .remove(&(collection.to_string(), resource_id.to_string()));
    }
}

impl fmt::Debug for PaginationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginationController")
            .field("specs", &self.specs.keys().collect::<Vec<_>>())
            .field("cursors", &self.cursors.lock().len())
            .finish()
    }
}

/// A page is a JSON array of items or an object with an `items` array
fn page_items(payload: Option<serde_json::Value>) -> Result<Vec<Value>> {
    let list = match payload {
        None | Some(serde_json::Value::Null) => return Ok(Vec::new()),
        Some(serde_json::Value::Array(list)) => list,
        Some(serde_json::Value::Object(mut fields)) => match fields.remove("items") {
            Some(serde_json::Value::Array(list)) => list,
            _ => return Err(Error::MalformedPage("object without an items array".to_string())),
        },
        Some(other) => return Err(Error::MalformedPage(format!("unexpected payload {other}"))),
    };
    Ok(list.into_iter().map(Value::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{Reply, ScriptedRemote};
    use crate::SyncConfig;
    use serde_json::json;
    use std::time::Duration;

    fn spec() -> PageSpec {
        PageSpec::new(
            Key::new("reportActions_").unwrap(),
            "OpenReport",
            "GetOlderActions",
            "GetNewerActions",
            "id",
        )
        .unwrap()
    }

    fn action(id: i64) -> serde_json::Value {
        json!({"id": id, "text": format!("message {id}")})
    }

    fn engine(remote: ScriptedRemote) -> Engine {
        let config = SyncConfig::default().with_max_in_flight(4);
        let engine = Engine::builder(remote).config(config).build().unwrap();
        engine.start();
        engine
    }

    #[test]
    fn test_keys() {
        let spec = spec();
        assert_eq!(spec.record_key("42").unwrap().as_str(), "reportActions_42");
        assert_eq!(
            spec.metadata_key("42").unwrap().as_str(),
            "reportActionsMetadata_42"
        );
        assert!(PageSpec::new(Key::new("report").unwrap(), "a", "b", "c", "id").is_err());
    }

    #[test]
    fn test_page_items_shapes() {
        assert!(page_items(None).unwrap().is_empty());
        assert_eq!(page_items(Some(json!([action(1)]))).unwrap().len(), 1);
        assert_eq!(page_items(Some(json!({"items": [action(1), action(2)]}))).unwrap().len(), 2);
        assert!(matches!(
            page_items(Some(json!({"rows": []}))),
            Err(Error::MalformedPage(_))
        ));
        assert!(matches!(page_items(Some(json!(3))), Err(Error::MalformedPage(_))));
    }

    #[test]
    fn test_cursor_only_moves_outward() {
        let spec = spec();
        let order = spec.order.as_ref();
        let mut older = Cursor::Unfetched;
        let five = Value::from(action(5));
        let three = Value::from(action(3));

        older.advance((&"5".to_string(), &five), Ordering::Less, order);
        older.advance((&"3".to_string(), &three), Ordering::Less, order);
        older.advance((&"5".to_string(), &five), Ordering::Less, order);
        assert!(matches!(older, Cursor::At { ref id, .. } if id == "3"));
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let controller = PaginationController::new(engine(ScriptedRemote::new()));
        let result = controller.fetch_page("nope_", "1", Direction::Initial).await;
        assert!(matches!(result, Err(Error::UnknownPageSpec(_))));
    }

    #[tokio::test]
    async fn test_older_without_cursor_makes_no_request() {
        let remote = Arc::new(ScriptedRemote::new());
        let controller = PaginationController::new(engine_shared(&remote)).with(spec());

        let result = controller
            .fetch_page("reportActions_", "1", Direction::Older)
            .await
            .unwrap();
        assert_eq!(result, PageResult::NoMorePages);
        assert_eq!(remote.call_count(), 0);
    }

    fn engine_shared(remote: &Arc<ScriptedRemote>) -> Engine {
        let engine = Engine::builder(remote.clone()).build().unwrap();
        engine.start();
        engine
    }

    #[tokio::test]
    async fn test_initial_then_older_until_exhausted() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.push(Reply::Payload(json!([action(9), action(10), action(8)])));
        remote.push(Reply::Payload(json!({"items": [action(6), action(7)]})));
        remote.push(Reply::Payload(json!([])));
        let controller = PaginationController::new(engine_shared(&remote)).with(spec());

        let first = controller
            .fetch_page("reportActions_", "1", Direction::Initial)
            .await
            .unwrap();
        assert_eq!(
            first,
            PageResult::Page(vec![action(8).into(), action(9).into(), action(10).into()])
        );

        controller
            .fetch_page("reportActions_", "1", Direction::Older)
            .await
            .unwrap();
        let calls = remote.calls_named("GetOlderActions");
        assert_eq!(calls[0].params["cursorID"], json!("8"));
        assert_eq!(calls[0].params["resourceID"], json!("1"));

        let empty = controller
            .fetch_page("reportActions_", "1", Direction::Older)
            .await
            .unwrap();
        assert_eq!(empty, PageResult::Page(Vec::new()));
        assert_eq!(remote.calls_named("GetOlderActions")[1].params["cursorID"], json!("6"));

        let after = controller
            .fetch_page("reportActions_", "1", Direction::Older)
            .await
            .unwrap();
        assert_eq!(after, PageResult::NoMorePages);
        assert_eq!(remote.call_count(), 3);

        let ids: Vec<i64> = controller
            .items("reportActions_", "1")
            .unwrap()
            .iter()
            .filter_map(|item| item.get("id").and_then(Value::as_int))
            .collect();
        assert_eq!(ids, vec![6, 7, 8, 9, 10]);

        let key = Key::new("reportActionsMetadata_1").unwrap();
        let meta = controller.engine.store().get(&key).unwrap();
        assert_eq!(meta.get("hasOlder"), Some(&Value::Bool(false)));
        assert_eq!(meta.get("hasNewer"), Some(&Value::Bool(true)));
        assert_eq!(meta.get("isLoadingOlder"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn test_older_page_of_known_items_exhausts() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.push(Reply::Payload(json!([action(50), action(51)])));
        remote.push(Reply::Payload(json!([action(49), action(50), action(51)])));
        remote.push(Reply::Payload(json!([action(50), action(51)])));
        let controller = PaginationController::new(engine_shared(&remote)).with(spec());

        controller
            .fetch_page("reportActions_", "1", Direction::Initial)
            .await
            .unwrap();
        let overlapping = controller
            .fetch_page("reportActions_", "1", Direction::Older)
            .await
            .unwrap();
        assert_eq!(overlapping, PageResult::Page(vec![action(49).into()]));

        let stale = controller
            .fetch_page("reportActions_", "1", Direction::Older)
            .await
            .unwrap();
        assert_eq!(stale, PageResult::Page(Vec::new()));

        let after = controller
            .fetch_page("reportActions_", "1", Direction::Older)
            .await
            .unwrap();
        assert_eq!(after, PageResult::NoMorePages);

        let cursors: Vec<_> = remote
            .calls_named("GetOlderActions")
            .iter()
            .map(|call| call.params["cursorID"].clone())
            .collect();
        assert_eq!(cursors, vec![json!("50"), json!("49")]);
        assert_eq!(controller.items("reportActions_", "1").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_newer_page_behind_cursor_exhausts() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.push(Reply::Payload(json!([action(10), action(12)])));
        remote.push(Reply::Payload(json!([action(11)])));
        let controller = PaginationController::new(engine_shared(&remote)).with(spec());

        controller
            .fetch_page("reportActions_", "1", Direction::Initial)
            .await
            .unwrap();
        let gap = controller
            .fetch_page("reportActions_", "1", Direction::Newer)
            .await
            .unwrap();
        assert_eq!(gap, PageResult::Page(vec![action(11).into()]));

        let after = controller
            .fetch_page("reportActions_", "1", Direction::Newer)
            .await
            .unwrap();
        assert_eq!(after, PageResult::NoMorePages);
        assert_eq!(remote.call_count(), 2);
    }

    #[test]
    fn test_resource_defaults_to_record() {
        let spec = spec();
        assert_eq!(spec.resource_key("7").unwrap().as_str(), "reportActions_7");

        let spec = spec.with_resource(|id| Key::new(format!("report_{id}")));
        assert_eq!(spec.resource_key("7").unwrap().as_str(), "report_7");
    }

    #[tokio::test]
    async fn test_loading_flag_visible_while_fetching() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.push(Reply::Payload(json!([action(1)])).delayed(Duration::from_millis(100)));
        let controller = Arc::new(PaginationController::new(engine_shared(&remote)).with(spec()));

        let fetch = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .fetch_page("reportActions_", "1", Direction::Initial)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        let key = Key::new("reportActionsMetadata_1").unwrap();
        let meta = controller.engine.store().get(&key).unwrap();
        assert_eq!(meta.get("isLoadingInitial"), Some(&Value::Bool(true)));

        fetch.await.unwrap().unwrap();
        let meta = controller.engine.store().get(&key).unwrap();
        assert_eq!(meta.get("isLoadingInitial"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_cursor() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.push(Reply::Payload(json!([action(5)])));
        remote.push(Reply::Reject("report not found".to_string()));
        let controller = PaginationController::new(engine_shared(&remote)).with(spec());

        controller
            .fetch_page("reportActions_", "1", Direction::Initial)
            .await
            .unwrap();
        let failed = controller
            .fetch_page("reportActions_", "1", Direction::Older)
            .await
            .unwrap();
        assert_eq!(failed, PageResult::Failed("report not found".to_string()));

        controller
            .fetch_page("reportActions_", "1", Direction::Older)
            .await
            .unwrap();
        assert_eq!(remote.calls_named("GetOlderActions")[1].params["cursorID"], json!("5"));
    }

    #[tokio::test]
    async fn test_teardown_forgets_cursors() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.push(Reply::Payload(json!([action(5)])));
        let controller = PaginationController::new(engine_shared(&remote)).with(spec());

        controller
            .fetch_page("reportActions_", "1", Direction::Initial)
            .await
            .unwrap();
        controller.teardown("reportActions_", "1");

        let result = controller
            .fetch_page("reportActions_", "1", Direction::Newer)
            .await
            .unwrap();
        assert_eq!(result, PageResult::NoMorePages);
        assert_eq!(controller.items("reportActions_", "1").unwrap().len(), 1);
    }
}
