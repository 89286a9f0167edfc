//! Lazily loaded detail collections bound to a selection

use super::reducer::{apply, InsertPolicy};
use crate::error::Result;
use crate::models::Record;
use crate::realtime::ChangeEvent;
use crate::rest::{fetch_records, DataSource, Query};
use tracing::debug;

/// Proof of which selection a detail load was started for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailTicket {
    generation: u64,
    owner: String,
}

impl DetailTicket {
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

/// A dependent collection (messages, quotes...) of the selected item
///
/// Loaded at most once per selection, on first view. Changing the owner
/// drops the cache and makes any in-flight load for the old owner stale.
pub struct LazyDetail<T> {
    owner: Option<String>,
    generation: u64,
    items: Option<Vec<T>>,
    policy: InsertPolicy,
}

impl<T: Record> LazyDetail<T> {
    pub fn new(policy: InsertPolicy) -> Self {
        Self {
            owner: None,
            generation: 0,
            items: None,
            policy,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Rebind to another owner (or none); same owner keeps the cache
    pub fn reset(&mut self, owner: Option<&str>) {
        if self.owner.as_deref() == owner {
            return;
        }
        self.owner = owner.map(str::to_string);
        self.generation += 1;
        self.items = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.items.is_some()
    }

    pub fn items(&self) -> Option<&[T]> {
        self.items.as_deref()
    }

    /// Start a load if an owner is set and nothing is cached
    pub fn begin(&self) -> Option<DetailTicket> {
        if self.items.is_some() {
            return None;
        }
        self.owner.as_ref().map(|owner| DetailTicket {
            generation: self.generation,
            owner: owner.clone(),
        })
    }

    /// Install rows unless the selection moved on; returns whether applied
    pub fn complete(&mut self, ticket: DetailTicket, rows: Vec<T>) -> bool {
        if ticket.generation != self.generation {
            debug!(
                "{}: dropping detail rows for previous selection {}",
                T::TABLE,
                ticket.owner
            );
            return false;
        }
        self.items = Some(rows);
        true
    }

    /// Load through `query` if not cached; returns whether a load happened
    pub async fn ensure_loaded(&mut self, source: &dyn DataSource, query: &Query) -> Result<bool> {
        let Some(ticket) = self.begin() else {
            return Ok(false);
        };
        let rows = fetch_records::<T>(source, query).await?;
        Ok(self.complete(ticket, rows))
    }

    /// Merge a live event into the cache, if loaded
    pub fn apply(&mut self, event: ChangeEvent<T>) -> bool {
        match self.items.as_mut() {
            Some(items) => apply(items, event, self.policy),
            None => false,
        }
    }

    /// Drop the cache for the current owner so the next view reloads
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.items = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use crate::rest::MemoryDataSource;
    use serde_json::json;

    fn thread_query(lead: &str) -> Query {
        Query::table("conversations")
            .eq("lead_id", lead)
            .order("created_at", true)
    }

    fn seeded() -> MemoryDataSource {
        let source = MemoryDataSource::new();
        let mut rows = Vec::new();
        for i in 0..5 {
            rows.push(json!({"id": format!("a{}", i), "lead_id": "A", "content": "hola", "created_at": format!("2026-01-01T00:00:0{}Z", i)}));
        }
        rows.push(json!({"id": "b0", "lead_id": "B", "content": "hi", "created_at": "2026-01-01T00:00:00Z"}));
        source.seed("conversations", rows);
        source
    }

    #[tokio::test]
    async fn test_loads_once_per_selection() {
        let source = seeded();
        let mut messages = LazyDetail::<Message>::new(InsertPolicy::Append);

        assert!(!messages.ensure_loaded(&source, &thread_query("A")).await.unwrap());

        messages.reset(Some("A"));
        assert!(messages.ensure_loaded(&source, &thread_query("A")).await.unwrap());
        assert!(!messages.ensure_loaded(&source, &thread_query("A")).await.unwrap());
        assert_eq!(messages.items().unwrap().len(), 5);
        assert_eq!(source.select_count(), 1);
    }

    #[tokio::test]
    async fn test_switching_selection_does_not_mix_rows() {
        let source = seeded();
        let mut messages = LazyDetail::<Message>::new(InsertPolicy::Append);

        messages.reset(Some("A"));
        messages.ensure_loaded(&source, &thread_query("A")).await.unwrap();

        messages.reset(Some("B"));
        assert!(!messages.is_loaded());
        messages.ensure_loaded(&source, &thread_query("B")).await.unwrap();

        let items = messages.items().unwrap();
        assert_eq!(items.len(), 1);
        assert!(items.iter().all(|m| m.lead_id.as_deref() == Some("B")));
    }

    #[tokio::test]
    async fn test_late_load_for_old_selection_is_ignored() {
        let source = seeded();
        let mut messages = LazyDetail::<Message>::new(InsertPolicy::Append);

        messages.reset(Some("A"));
        let ticket = messages.begin().unwrap();
        messages.reset(Some("B"));

        let late = fetch_records::<Message>(&source, &thread_query("A")).await.unwrap();
        assert!(!messages.complete(ticket, late));
        assert!(messages.items().is_none());
    }

    #[tokio::test]
    async fn test_live_events_only_touch_loaded_cache() {
        let source = seeded();
        let mut messages = LazyDetail::<Message>::new(InsertPolicy::Append);
        messages.reset(Some("B"));

        let msg: Message = serde_json::from_value(json!({"id": "b1", "lead_id": "B"})).unwrap();
        assert!(!messages.apply(ChangeEvent::Inserted(msg.clone())));

        messages.ensure_loaded(&source, &thread_query("B")).await.unwrap();
        assert!(messages.apply(ChangeEvent::Inserted(msg.clone())));
        assert!(!messages.apply(ChangeEvent::Inserted(msg)));
        assert_eq!(messages.items().unwrap().len(), 2);
    }
}
