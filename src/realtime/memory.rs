//! In-process change feed

use super::{RawChange, RealtimeSource, Subscription, SubscriptionKey};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct Inner {
    next_id: u64,
    subscribers: BTreeMap<u64, (SubscriptionKey, mpsc::UnboundedSender<RawChange>)>,
    unavailable: bool,
}

/// Feed that delivers published changes directly to matching subscribers
#[derive(Clone, Default)]
pub struct MemoryRealtime {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRealtime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Refuse new subscriptions (existing ones keep working)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Deliver a change to every matching subscriber; returns how many got it
    pub fn publish(&self, change: RawChange) -> usize {
        let mut inner = self.lock();
        let mut delivered = 0;
        inner.subscribers.retain(|_, (key, tx)| {
            if !key.matches(&change) {
                return !tx.is_closed();
            }
            match tx.send(change.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

#[async_trait]
impl RealtimeSource for MemoryRealtime {
    async fn subscribe(&self, key: SubscriptionKey) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.lock();
            if inner.unavailable {
                return Err(Error::Realtime("change feed unavailable".to_string()));
            }
            inner.next_id += 1;
            let id = inner.next_id;
            inner.subscribers.insert(id, (key.clone(), tx));
            id
        };
        debug!("memory feed: subscriber {} on {}", id, key);

        let weak = Arc::downgrade(&self.inner);
        Ok(Subscription::new(key, rx, move || {
            if let Some(inner) = weak.upgrade() {
                let mut guard = match inner.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.subscribers.remove(&id);
            }
        }))
    }
}
