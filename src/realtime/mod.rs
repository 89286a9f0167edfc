//! Realtime subscription manager
//!
//! A view opens one subscription per (table, event filter, row filter) and
//! receives the table's row-level changes over a channel, FIFO within the
//! subscription. Subscriptions are released when dropped. Failure to open
//! one degrades the view to statically fetched data.

pub mod memory;
mod phoenix;

pub use memory::MemoryRealtime;
pub use phoenix::PhoenixRealtime;

use crate::error::{Error, Result};
use crate::models::Record;
use crate::rest::query::cell_text;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::task::Poll;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_wire(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// Which operation kinds a subscription receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum EventFilter {
    #[default]
    All,
    Only(ChangeKind),
}

impl EventFilter {
    pub fn as_wire(&self) -> &'static str {
        match self {
            EventFilter::All => "*",
            EventFilter::Only(kind) => kind.as_wire(),
        }
    }

    pub fn accepts(&self, kind: ChangeKind) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(only) => *only == kind,
        }
    }
}

/// Equality predicate on one column (`col=eq.value`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EqFilter {
    pub column: String,
    pub value: String,
}

impl EqFilter {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let (column, rest) = raw
            .split_once('=')
            .ok_or_else(|| Error::InvalidInput(format!("bad realtime filter: {}", raw)))?;
        let value = rest
            .strip_prefix("eq.")
            .ok_or_else(|| Error::InvalidInput(format!("only eq filters are supported: {}", raw)))?;
        if column.is_empty() {
            return Err(Error::InvalidInput(format!("bad realtime filter: {}", raw)));
        }
        Ok(Self::new(column, value))
    }

    pub fn matches(&self, row: &Value) -> bool {
        row.get(&self.column)
            .and_then(cell_text)
            .is_some_and(|v| v == self.value)
    }
}

impl fmt::Display for EqFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// Identity of a subscription: at most one per key and owning view
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub table: String,
    pub events: EventFilter,
    pub filter: Option<EqFilter>,
}

impl SubscriptionKey {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            events: EventFilter::All,
            filter: None,
        }
    }

    pub fn for_record<T: Record>() -> Self {
        Self::table(T::TABLE)
    }

    pub fn only(mut self, kind: ChangeKind) -> Self {
        self.events = EventFilter::Only(kind);
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter = Some(EqFilter::new(column, value));
        self
    }

    /// Whether a change belongs to this subscription
    ///
    /// The row filter is checked against the new row, or the old row for
    /// deletes.
    pub fn matches(&self, change: &RawChange) -> bool {
        if change.table != self.table || !self.events.accepts(change.kind) {
            return false;
        }
        match &self.filter {
            None => true,
            Some(filter) => change.row().is_some_and(|row| filter.matches(row)),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.events.as_wire())?;
        if let Some(filter) = &self.filter {
            write!(f, ":{}", filter)?;
        }
        Ok(())
    }
}

/// Undecoded change as delivered by the feed
#[derive(Debug, Clone, PartialEq)]
pub struct RawChange {
    pub kind: ChangeKind,
    pub table: String,
    pub new: Option<Value>,
    pub old: Option<Value>,
}

fn non_empty(value: Option<&Value>) -> Option<Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(other) => Some(other.clone()),
    }
}

impl RawChange {
    pub fn insert(table: impl Into<String>, row: Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            table: table.into(),
            new: Some(row),
            old: None,
        }
    }

    pub fn update(table: impl Into<String>, row: Value, old: Option<Value>) -> Self {
        Self {
            kind: ChangeKind::Update,
            table: table.into(),
            new: Some(row),
            old,
        }
    }

    pub fn delete(table: impl Into<String>, old: Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            table: table.into(),
            new: None,
            old: Some(old),
        }
    }

    /// Parse a change payload
    ///
    /// Accepts the channel shape (`data.type`, `data.table`, `data.record`,
    /// `data.old_record`) and the flat shape (`eventType`, `table`, `new`,
    /// `old`). Returns `None` for anything else.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        if let Some(data) = payload.get("data").filter(|d| d.is_object()) {
            let kind = ChangeKind::parse(data.get("type")?.as_str()?)?;
            let table = data.get("table")?.as_str()?.to_string();
            return Some(Self {
                kind,
                table,
                new: non_empty(data.get("record")),
                old: non_empty(data.get("old_record")),
            });
        }

        let kind = ChangeKind::parse(payload.get("eventType")?.as_str()?)?;
        let table = payload.get("table")?.as_str()?.to_string();
        Some(Self {
            kind,
            table,
            new: non_empty(payload.get("new")),
            old: non_empty(payload.get("old")),
        })
    }

    /// The row the change is about (new row, old row for deletes)
    pub fn row(&self) -> Option<&Value> {
        match self.kind {
            ChangeKind::Delete => self.old.as_ref().or(self.new.as_ref()),
            _ => self.new.as_ref().or(self.old.as_ref()),
        }
    }

    pub fn id(&self) -> Option<String> {
        self.row().and_then(|r| r.get("id")).and_then(cell_text)
    }
}

/// Typed change applied by reducers
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    Inserted(T),
    Updated(T),
    Deleted(String),
}

impl<T: Record> ChangeEvent<T> {
    pub fn decode(raw: &RawChange) -> Result<Self> {
        match raw.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let row = raw.new.clone().ok_or_else(|| {
                    Error::Realtime(format!("{} change on {} without a row", raw.kind.as_wire(), raw.table))
                })?;
                let record = T::from_row(row)?;
                Ok(match raw.kind {
                    ChangeKind::Insert => ChangeEvent::Inserted(record),
                    _ => ChangeEvent::Updated(record),
                })
            }
            ChangeKind::Delete => raw
                .id()
                .map(ChangeEvent::Deleted)
                .ok_or_else(|| Error::Realtime(format!("delete on {} without an id", raw.table))),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ChangeEvent::Inserted(r) | ChangeEvent::Updated(r) => r.id(),
            ChangeEvent::Deleted(id) => id,
        }
    }
}

/// Provider of change feeds
#[async_trait]
pub trait RealtimeSource: Send + Sync {
    async fn subscribe(&self, key: SubscriptionKey) -> Result<Subscription>;
}

type Release = Box<dyn FnOnce() + Send>;

/// Runs the transport's release hook exactly once, when dropped
struct ReleaseGuard(Option<Release>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

/// An open change feed; dropping it releases the channel
pub struct Subscription {
    key: SubscriptionKey,
    receiver: mpsc::UnboundedReceiver<RawChange>,
    _release: ReleaseGuard,
}

impl Subscription {
    pub fn new(
        key: SubscriptionKey,
        receiver: mpsc::UnboundedReceiver<RawChange>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            key,
            receiver,
            _release: ReleaseGuard(Some(Box::new(release))),
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Next buffered change without waiting
    pub fn try_next(&mut self) -> Option<RawChange> {
        self.receiver.try_recv().ok()
    }

    pub async fn next(&mut self) -> Option<RawChange> {
        self.receiver.recv().await
    }
}

/// The subscriptions owned by one mounted view, keyed by slot name
pub struct SubscriptionSet {
    owner: &'static str,
    source: Option<Arc<dyn RealtimeSource>>,
    slots: BTreeMap<&'static str, Subscription>,
}

impl SubscriptionSet {
    pub fn new(owner: &'static str, source: Option<Arc<dyn RealtimeSource>>) -> Self {
        Self {
            owner,
            source,
            slots: BTreeMap::new(),
        }
    }

    /// Make `slot` subscribed to `key`
    ///
    /// The same key is a no-op; a different key releases the old subscription
    /// before opening the new one. Returns whether the slot is live. Failure
    /// is logged and leaves the slot empty.
    pub async fn ensure(&mut self, slot: &'static str, key: SubscriptionKey) -> bool {
        if self.slots.get(slot).is_some_and(|s| *s.key() == key) {
            return true;
        }
        if let Some(old) = self.slots.remove(slot) {
            debug!("[{}] releasing {} ({})", self.owner, slot, old.key());
        }

        let Some(source) = &self.source else {
            debug!("[{}] realtime disabled; {} stays static", self.owner, slot);
            return false;
        };

        match source.subscribe(key.clone()).await {
            Ok(subscription) => {
                debug!("[{}] subscribed {} to {}", self.owner, slot, key);
                self.slots.insert(slot, subscription);
                true
            }
            Err(e) => {
                warn!(
                    "[{}] live updates unavailable for {}: {}",
                    self.owner, key, e
                );
                false
            }
        }
    }

    pub fn release(&mut self, slot: &'static str) {
        if self.slots.remove(slot).is_some() {
            debug!("[{}] released {}", self.owner, slot);
        }
    }

    pub fn release_all(&mut self) {
        if !self.slots.is_empty() {
            debug!("[{}] releasing {} subscriptions", self.owner, self.slots.len());
        }
        self.slots.clear();
    }

    pub fn is_live(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }

    pub fn live_count(&self) -> usize {
        self.slots.len()
    }

    /// Every change buffered so far, FIFO per slot
    pub fn drain(&mut self) -> Vec<(&'static str, RawChange)> {
        let mut out = Vec::new();
        for (slot, sub) in self.slots.iter_mut() {
            while let Some(change) = sub.try_next() {
                out.push((*slot, change));
            }
        }
        out
    }

    /// Wait for the next change on any slot; `None` once no slot can deliver
    pub async fn next(&mut self) -> Option<(&'static str, RawChange)> {
        if self.slots.is_empty() {
            return None;
        }
        let slots = &mut self.slots;
        futures::future::poll_fn(|cx| {
            let mut open = 0usize;
            for (slot, sub) in slots.iter_mut() {
                match sub.receiver.poll_recv(cx) {
                    Poll::Ready(Some(change)) => return Poll::Ready(Some((*slot, change))),
                    Poll::Ready(None) => {}
                    Poll::Pending => open += 1,
                }
            }
            if open == 0 {
                Poll::Ready(None)
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Lead;
    use serde_json::json;

    #[test]
    fn test_payload_shapes() {
        let channel = json!({
            "ids": [1],
            "data": {
                "type": "INSERT",
                "table": "conversations",
                "schema": "public",
                "record": {"id": "m1", "lead_id": "L1"},
                "old_record": null
            }
        });
        let change = RawChange::from_payload(&channel).unwrap();
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.table, "conversations");
        assert_eq!(change.id().as_deref(), Some("m1"));

        let flat = json!({
            "eventType": "DELETE",
            "table": "leads",
            "new": {},
            "old": {"id": 7}
        });
        let change = RawChange::from_payload(&flat).unwrap();
        assert_eq!(change.kind, ChangeKind::Delete);
        assert!(change.new.is_none());
        assert_eq!(change.id().as_deref(), Some("7"));

        assert!(RawChange::from_payload(&json!({"status": "ok"})).is_none());
        assert!(RawChange::from_payload(&json!({"eventType": "TRUNCATE", "table": "x"})).is_none());
    }

    #[test]
    fn test_filter_parse_and_display() {
        let filter = EqFilter::parse("lead_id=eq.abc-123").unwrap();
        assert_eq!(filter, EqFilter::new("lead_id", "abc-123"));
        assert_eq!(filter.to_string(), "lead_id=eq.abc-123");

        assert!(EqFilter::parse("lead_id=neq.x").is_err());
        assert!(EqFilter::parse("=eq.x").is_err());
        assert!(EqFilter::parse("nothing").is_err());
    }

    #[test]
    fn test_key_matching() {
        let key = SubscriptionKey::table("conversations")
            .only(ChangeKind::Insert)
            .eq("lead_id", "L1");

        assert!(key.matches(&RawChange::insert(
            "conversations",
            json!({"id": "m1", "lead_id": "L1"})
        )));
        assert!(!key.matches(&RawChange::insert(
            "conversations",
            json!({"id": "m2", "lead_id": "L2"})
        )));
        assert!(!key.matches(&RawChange::update(
            "conversations",
            json!({"id": "m1", "lead_id": "L1"}),
            None
        )));
        assert!(!key.matches(&RawChange::insert("leads", json!({"id": "L1", "lead_id": "L1"}))));

        let deletes = SubscriptionKey::table("leads").eq("estado", "nuevo");
        assert!(deletes.matches(&RawChange::delete(
            "leads",
            json!({"id": "L1", "estado": "nuevo"})
        )));
    }

    #[test]
    fn test_typed_decode() {
        let inserted = ChangeEvent::<Lead>::decode(&RawChange::insert(
            "leads",
            json!({"id": "L4", "nombre": "Nuevo"}),
        ))
        .unwrap();
        assert!(matches!(inserted, ChangeEvent::Inserted(ref l) if l.name == "Nuevo"));

        let deleted =
            ChangeEvent::<Lead>::decode(&RawChange::delete("leads", json!({"id": "L4"}))).unwrap();
        assert_eq!(deleted, ChangeEvent::Deleted("L4".to_string()));

        let bad = RawChange {
            kind: ChangeKind::Update,
            table: "leads".to_string(),
            new: None,
            old: None,
        };
        assert!(ChangeEvent::<Lead>::decode(&bad).is_err());
    }

    #[test]
    fn test_subscription_waits_then_releases_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio_test::{assert_pending, assert_ready, task};

        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(SubscriptionKey::table("leads"), rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        {
            let mut next = task::spawn(sub.next());
            assert_pending!(next.poll());
            tx.send(RawChange::insert("leads", json!({"id": "L1"}))).unwrap();
            assert!(next.is_woken());
            let change = assert_ready!(next.poll());
            assert_eq!(change.and_then(|c| c.id()).as_deref(), Some("L1"));
        }

        drop(sub);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_set_same_key_is_noop_and_change_replaces() {
        let realtime = MemoryRealtime::new();
        let mut set = SubscriptionSet::new("test", Some(Arc::new(realtime.clone())));

        let key_a = SubscriptionKey::table("conversations").eq("lead_id", "A");
        assert!(set.ensure("thread", key_a.clone()).await);
        assert!(set.ensure("thread", key_a).await);
        assert_eq!(realtime.subscriber_count(), 1);

        let key_b = SubscriptionKey::table("conversations").eq("lead_id", "B");
        assert!(set.ensure("thread", key_b).await);
        assert_eq!(realtime.subscriber_count(), 1);

        realtime.publish(RawChange::insert("conversations", json!({"id": "m1", "lead_id": "A"})));
        realtime.publish(RawChange::insert("conversations", json!({"id": "m2", "lead_id": "B"})));

        let drained = set.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].1.id().as_deref(), Some("m2"));
    }

    #[tokio::test]
    async fn test_failed_subscribe_degrades() {
        let realtime = MemoryRealtime::new();
        realtime.set_unavailable(true);
        let mut set = SubscriptionSet::new("test", Some(Arc::new(realtime.clone())));

        assert!(!set.ensure("leads", SubscriptionKey::table("leads")).await);
        assert!(!set.is_live("leads"));
        assert!(set.next().await.is_none());

        let mut disabled = SubscriptionSet::new("test", None);
        assert!(!disabled.ensure("leads", SubscriptionKey::table("leads")).await);
    }

    #[tokio::test]
    async fn test_next_waits_across_slots() {
        let realtime = MemoryRealtime::new();
        let mut set = SubscriptionSet::new("test", Some(Arc::new(realtime.clone())));
        set.ensure("leads", SubscriptionKey::table("leads")).await;
        set.ensure("logs", SubscriptionKey::table("agent_logs")).await;

        let publisher = realtime.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            publisher.publish(RawChange::insert("agent_logs", json!({"id": "a1"})));
        });

        let (slot, change) = set.next().await.unwrap();
        assert_eq!(slot, "logs");
        assert_eq!(change.table, "agent_logs");
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let realtime = MemoryRealtime::new();
        {
            let mut set = SubscriptionSet::new("test", Some(Arc::new(realtime.clone())));
            set.ensure("leads", SubscriptionKey::table("leads")).await;
            set.ensure("logs", SubscriptionKey::table("agent_logs")).await;
            assert_eq!(realtime.subscriber_count(), 2);
        }
        assert_eq!(realtime.subscriber_count(), 0);
    }
}
