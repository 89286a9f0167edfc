//! In-memory tables evaluating the same queries as the HTTP source

use super::query::{cell_text, Query};
use super::DataSource;
use crate::error::{Error, Result};
use crate::realtime::{MemoryRealtime, RawChange};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Tables held in memory, optionally publishing writes to a change feed
#[derive(Default)]
pub struct MemoryDataSource {
    tables: Mutex<BTreeMap<String, Vec<Value>>>,
    offline: AtomicBool,
    selects: AtomicUsize,
    feed: Option<MemoryRealtime>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish every insert and update to `feed`
    pub fn with_feed(feed: MemoryRealtime) -> Self {
        Self {
            feed: Some(feed),
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<Value>>> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add rows directly, without publishing
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        self.lock()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Make every call fail as a transport error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `select` calls served
    pub fn select_count(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock().get(table).cloned().unwrap_or_default()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "data service unreachable",
            )));
        }
        Ok(())
    }

    fn project(
        tables: &BTreeMap<String, Vec<Value>>,
        query: &Query,
        row: &Value,
    ) -> Value {
        let mut out = match (&query.columns, row) {
            (Some(cols), Value::Object(map)) => {
                let picked: Map<String, Value> = cols
                    .iter()
                    .filter_map(|c| map.get(c).map(|v| (c.clone(), v.clone())))
                    .collect();
                Value::Object(picked)
            }
            _ => row.clone(),
        };

        for embed in &query.embeds {
            let fk = row
                .get(format!("{}_id", embed.alias))
                .and_then(cell_text);
            let related = fk.and_then(|id| {
                tables.get(&embed.table).and_then(|rows| {
                    rows.iter()
                        .find(|r| r.get("id").and_then(cell_text).as_deref() == Some(id.as_str()))
                })
            });
            let value = match related {
                Some(Value::Object(map)) => Value::Object(
                    embed
                        .columns
                        .iter()
                        .filter_map(|c| map.get(c).map(|v| (c.clone(), v.clone())))
                        .collect(),
                ),
                _ => Value::Null,
            };
            if let Value::Object(map) = &mut out {
                map.insert(embed.alias.clone(), value);
            }
        }
        out
    }

    fn publish(&self, change: RawChange) {
        if let Some(feed) = &self.feed {
            feed.publish(change);
        }
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        self.check_online()?;
        self.selects.fetch_add(1, Ordering::SeqCst);

        let tables = self.lock();
        let mut rows: Vec<Value> = tables
            .get(&query.table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();
        query.sort(&mut rows);
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows
            .iter()
            .map(|row| Self::project(&tables, query, row))
            .collect())
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        self.check_online()?;
        let tables = self.lock();
        let count = tables
            .get(&query.table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        self.check_online()?;
        let Value::Object(mut map) = row else {
            return Err(Error::InvalidInput(format!("row for {} must be an object", table)));
        };
        map.entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        map.entry("created_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        let stored = Value::Object(map);

        self.lock()
            .entry(table.to_string())
            .or_default()
            .push(stored.clone());
        self.publish(RawChange::insert(table, stored.clone()));
        Ok(stored)
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Option<Value>> {
        self.check_online()?;
        let Value::Object(patch) = patch else {
            return Err(Error::InvalidInput(format!("patch for {} must be an object", table)));
        };

        let updated = {
            let mut tables = self.lock();
            let Some(row) = tables.get_mut(table).and_then(|rows| {
                rows.iter_mut()
                    .find(|r| r.get("id").and_then(cell_text).as_deref() == Some(id))
            }) else {
                return Ok(None);
            };
            let old = row.clone();
            if let Value::Object(map) = row {
                map.extend(patch);
            }
            (old, row.clone())
        };

        self.publish(RawChange::update(table, updated.1.clone(), Some(updated.0)));
        Ok(Some(updated.1))
    }
}
