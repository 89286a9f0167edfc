//! Generic live collection
//!
//! One primitive reused by every page: bulk load through a [`Query`], full
//! replacement when the query changes, realtime merge by id, and a selected
//! pointer. Responses from fetches started before the latest query change
//! (or before [`LiveCollection::invalidate`]) are ignored.

pub mod detail;
pub mod reducer;

pub use detail::{DetailTicket, LazyDetail};
pub use reducer::{apply, InsertPolicy};

use crate::error::{Error, Result};
use crate::models::Record;
use crate::realtime::{ChangeEvent, ChangeKind, RawChange};
use crate::rest::{fetch_records, DataSource, Query};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
}

/// Proof of which query generation a fetch was started for
#[derive(Debug, Clone)]
pub struct FetchTicket {
    generation: u64,
    query: Query,
}

impl FetchTicket {
    pub fn query(&self) -> &Query {
        &self.query
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Rows replaced the collection
    Applied(usize),
    /// The fetch belonged to an older query and was discarded
    Stale,
}

pub struct LiveCollection<T> {
    items: Vec<T>,
    query: Query,
    policy: InsertPolicy,
    generation: u64,
    state: LoadState,
    last_error: Option<String>,
    selected: Option<String>,
}

impl<T: Record> LiveCollection<T> {
    pub fn new(query: Query, policy: InsertPolicy) -> Self {
        Self {
            items: Vec::new(),
            query,
            policy,
            generation: 0,
            state: LoadState::Idle,
            last_error: None,
            selected: None,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|r| r.id() == id)
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == LoadState::Loading
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Replace the query; returns whether it changed
    ///
    /// A change invalidates in-flight fetches. The caller refreshes.
    pub fn set_query(&mut self, query: Query) -> bool {
        if query == self.query {
            return false;
        }
        debug!("{}: query changed", T::TABLE);
        self.query = query;
        self.generation += 1;
        true
    }

    /// Discard the results of every in-flight fetch
    pub fn invalidate(&mut self) {
        self.generation += 1;
        if self.state == LoadState::Loading {
            self.state = if self.items.is_empty() {
                LoadState::Idle
            } else {
                LoadState::Loaded
            };
        }
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.state = LoadState::Loading;
        FetchTicket {
            generation: self.generation,
            query: self.query.clone(),
        }
    }

    fn is_current(&self, ticket: &FetchTicket) -> bool {
        ticket.generation == self.generation
    }

    /// Install fetched rows unless the ticket is stale
    pub fn complete_fetch(&mut self, ticket: FetchTicket, rows: Vec<T>) -> FetchOutcome {
        if !self.is_current(&ticket) {
            debug!("{}: discarding stale fetch", T::TABLE);
            return FetchOutcome::Stale;
        }
        self.query = ticket.query;
        self.items = rows;
        self.state = LoadState::Loaded;
        self.last_error = None;
        FetchOutcome::Applied(self.items.len())
    }

    /// Record a failed fetch; the previous rows stay. Returns false if stale.
    pub fn fail_fetch(&mut self, ticket: &FetchTicket, err: &Error) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.last_error = Some(err.to_string());
        self.state = if self.items.is_empty() {
            LoadState::Idle
        } else {
            LoadState::Loaded
        };
        true
    }

    /// Fetch with the current query and replace the collection
    pub async fn refresh(&mut self, source: &dyn DataSource) -> Result<FetchOutcome> {
        let ticket = self.begin_fetch();
        match fetch_records::<T>(source, ticket.query()).await {
            Ok(rows) => Ok(self.complete_fetch(ticket, rows)),
            Err(e) => {
                if self.fail_fetch(&ticket, &e) {
                    Err(e)
                } else {
                    Ok(FetchOutcome::Stale)
                }
            }
        }
    }

    /// Fetch with `query` and switch to it only once the rows arrived
    ///
    /// On failure the previous query and rows stay in place, so asking for
    /// the same query again fetches again. Returns false when `query` is
    /// already current.
    pub async fn change_query(&mut self, source: &dyn DataSource, query: Query) -> Result<bool> {
        if query == self.query {
            return Ok(false);
        }
        debug!("{}: query changed", T::TABLE);
        self.generation += 1;
        self.state = LoadState::Loading;
        let ticket = FetchTicket {
            generation: self.generation,
            query,
        };
        match fetch_records::<T>(source, ticket.query()).await {
            Ok(rows) => Ok(self.complete_fetch(ticket, rows) != FetchOutcome::Stale),
            Err(e) => {
                self.fail_fetch(&ticket, &e);
                Err(e)
            }
        }
    }

    /// Merge a typed event
    pub fn apply(&mut self, event: ChangeEvent<T>) -> bool {
        apply(&mut self.items, event, self.policy)
    }

    /// Merge a feed change, honouring the current filters
    ///
    /// Inserts that do not match the query are skipped; an update that moves
    /// a row out of the query removes it.
    pub fn apply_raw(&mut self, change: &RawChange) -> Result<bool> {
        if change.table != self.query.table {
            return Ok(false);
        }
        let event = ChangeEvent::<T>::decode(change)?;
        let in_scope = change.new.as_ref().map_or(true, |row| self.query.matches(row));

        let event = match (change.kind, in_scope) {
            (ChangeKind::Insert, false) => return Ok(false),
            (ChangeKind::Update, false) => ChangeEvent::Deleted(event.id().to_string()),
            _ => event,
        };
        Ok(self.apply(event))
    }

    pub fn select(&mut self, id: Option<&str>) {
        self.selected = id.map(str::to_string);
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected(&self) -> Option<&T> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }

    /// Fold over the loaded rows
    pub fn count_where(&self, pred: impl Fn(&T) -> bool) -> usize {
        self.items.iter().filter(|r| pred(r)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Lead, LeadStatus};
    use crate::rest::MemoryDataSource;
    use serde_json::json;

    fn leads_source() -> MemoryDataSource {
        let source = MemoryDataSource::new();
        source.seed(
            "leads",
            vec![
                json!({"id": "L1", "nombre": "Ana", "estado": "nuevo", "created_at": "2026-01-01T00:00:00Z"}),
                json!({"id": "L2", "nombre": "Beto", "estado": "contactado", "created_at": "2026-01-02T00:00:00Z"}),
                json!({"id": "L3", "nombre": "Caro", "estado": "nuevo", "created_at": "2026-01-03T00:00:00Z"}),
            ],
        );
        source
    }

    fn base_query() -> Query {
        Query::table("leads").order("created_at", true)
    }

    #[tokio::test]
    async fn test_fetch_then_live_insert() {
        let source = leads_source();
        let mut leads = LiveCollection::<Lead>::new(base_query(), InsertPolicy::Append);
        assert_eq!(leads.refresh(&source).await.unwrap(), FetchOutcome::Applied(3));

        let change = RawChange::insert("leads", json!({"id": "L4", "nombre": "Dani"}));
        assert!(leads.apply_raw(&change).unwrap());

        let ids: Vec<&str> = leads.items().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["L1", "L2", "L3", "L4"]);
    }

    #[tokio::test]
    async fn test_insert_racing_fetch_is_deduplicated() {
        let source = leads_source();
        let mut leads = LiveCollection::<Lead>::new(base_query(), InsertPolicy::Append);
        leads.refresh(&source).await.unwrap();

        let change = RawChange::insert("leads", json!({"id": "L1", "nombre": "Ana"}));
        assert!(!leads.apply_raw(&change).unwrap());
        assert_eq!(leads.len(), 3);
        assert_eq!(leads.count_where(|l| l.id == "L1"), 1);
    }

    #[tokio::test]
    async fn test_filter_change_replaces_and_discards_stale() {
        let source = leads_source();
        let mut leads = LiveCollection::<Lead>::new(base_query(), InsertPolicy::Append);

        let stale = leads.begin_fetch();
        assert!(leads.set_query(base_query().eq("estado", "nuevo")));
        leads.refresh(&source).await.unwrap();

        let late_rows = fetch_records::<Lead>(&source, stale.query()).await.unwrap();
        assert_eq!(leads.complete_fetch(stale, late_rows), FetchOutcome::Stale);

        assert!(leads.items().iter().all(|l| l.status == LeadStatus::New));
        assert_eq!(leads.len(), 2);
        assert!(!leads.set_query(base_query().eq("estado", "nuevo")));
    }

    #[tokio::test]
    async fn test_live_changes_respect_filters() {
        let source = leads_source();
        let mut leads =
            LiveCollection::<Lead>::new(base_query().eq("estado", "nuevo"), InsertPolicy::Append);
        leads.refresh(&source).await.unwrap();

        let other = RawChange::insert("leads", json!({"id": "L9", "estado": "contactado"}));
        assert!(!leads.apply_raw(&other).unwrap());

        let moved_out = RawChange::update("leads", json!({"id": "L1", "estado": "contactado"}), None);
        assert!(leads.apply_raw(&moved_out).unwrap());
        assert!(leads.get("L1").is_none());

        let other_table = RawChange::insert("campanas", json!({"id": "C1"}));
        assert!(!leads.apply_raw(&other_table).unwrap());
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_last_good_rows() {
        let source = leads_source();
        let mut leads = LiveCollection::<Lead>::new(base_query(), InsertPolicy::Append);
        leads.refresh(&source).await.unwrap();

        source.set_offline(true);
        assert!(leads.refresh(&source).await.is_err());
        assert_eq!(leads.len(), 3);
        assert_eq!(leads.state(), LoadState::Loaded);
        assert!(leads.last_error().is_some());
    }

    #[tokio::test]
    async fn test_failed_query_change_keeps_old_query_and_retries() {
        let source = leads_source();
        let mut leads = LiveCollection::<Lead>::new(base_query(), InsertPolicy::Append);
        leads.refresh(&source).await.unwrap();

        let only_new = base_query().eq("estado", "nuevo");
        source.set_offline(true);
        assert!(leads.change_query(&source, only_new.clone()).await.is_err());
        assert_eq!(leads.query(), &base_query());
        assert_eq!(leads.len(), 3);
        assert_eq!(leads.state(), LoadState::Loaded);

        let contacted = RawChange::insert("leads", json!({"id": "L5", "estado": "contactado"}));
        assert!(leads.apply_raw(&contacted).unwrap());

        source.set_offline(false);
        assert!(leads.change_query(&source, only_new.clone()).await.unwrap());
        assert_eq!(leads.query(), &only_new);
        let ids: Vec<&str> = leads.items().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["L1", "L3"]);
        assert!(!leads.change_query(&source, only_new).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_ignores_in_flight() {
        let source = leads_source();
        let mut leads = LiveCollection::<Lead>::new(base_query(), InsertPolicy::Append);
        let ticket = leads.begin_fetch();
        leads.invalidate();
        let rows = fetch_records::<Lead>(&source, ticket.query()).await.unwrap();
        assert_eq!(leads.complete_fetch(ticket, rows), FetchOutcome::Stale);
        assert!(leads.is_empty());
        assert_eq!(leads.state(), LoadState::Idle);
    }

    #[tokio::test]
    async fn test_selection() {
        let source = leads_source();
        let mut leads = LiveCollection::<Lead>::new(base_query(), InsertPolicy::Append);
        leads.refresh(&source).await.unwrap();
        leads.select(Some("L2"));
        assert_eq!(leads.selected().map(|l| l.name.as_str()), Some("Beto"));
        leads.select(None);
        assert!(leads.selected().is_none());
    }
}
