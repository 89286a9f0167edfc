//! Per-page view-state stores
//!
//! Each page owns its collections, its selection and the realtime
//! subscriptions it opened at mount. Stores never share collections; two pages
//! watching the same table hold independent subscriptions.

pub mod agents;
pub mod analytics;
pub mod campaigns;
pub mod conversations;
pub mod dashboard;
pub mod leads;
pub mod meetings;
pub mod quotes;
pub mod settings;
pub mod telegram;
pub mod thread;

pub use agents::AgentsView;
pub use analytics::AnalyticsView;
pub use campaigns::CampaignsView;
pub use conversations::ConversationsView;
pub use dashboard::DashboardView;
pub use leads::LeadsView;
pub use meetings::MeetingsView;
pub use quotes::QuotesView;
pub use settings::SettingsView;
pub use telegram::TelegramView;
pub use thread::{MessageThread, SendOutcome, SendVia};

use crate::config::ViewLimits;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::notify::Notifier;
use crate::realtime::{RawChange, RealtimeSource, SubscriptionSet};
use crate::rest::DataSource;
use crate::session::SessionContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Collaborators handed to every view
#[derive(Clone)]
pub struct ViewContext {
    pub data: Arc<dyn DataSource>,
    pub realtime: Option<Arc<dyn RealtimeSource>>,
    pub gateway: Arc<dyn Gateway>,
    pub notifier: Arc<dyn Notifier>,
    pub session: SessionContext,
    pub limits: ViewLimits,
}

impl ViewContext {
    /// A fresh, empty subscription set owned by `owner`
    pub fn subscriptions(&self, owner: &'static str) -> SubscriptionSet {
        SubscriptionSet::new(owner, self.realtime.clone())
    }
}

/// Lifecycle shared by the page stores
///
/// `mount` performs the initial fetches and opens subscriptions; `teardown`
/// releases them, after which no change reaches the store.
#[async_trait]
pub trait View: Send {
    fn name(&self) -> &'static str;

    async fn mount(&mut self) -> Result<()>;

    /// Apply one change received on `slot`
    async fn on_change(&mut self, slot: &'static str, change: RawChange) -> Result<()>;

    fn subscriptions_mut(&mut self) -> &mut SubscriptionSet;

    /// Apply every change buffered so far; returns how many were applied
    async fn sync(&mut self) -> usize {
        let pending = self.subscriptions_mut().drain();
        let mut applied = 0;
        for (slot, change) in pending {
            match self.on_change(slot, change).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("[{}] ignoring change on {}: {}", self.name(), slot, e),
            }
        }
        applied
    }

    /// Wait for the next change and apply it; false once nothing is live
    async fn wait_for_change(&mut self) -> bool {
        let Some((slot, change)) = self.subscriptions_mut().next().await else {
            return false;
        };
        if let Err(e) = self.on_change(slot, change).await {
            warn!("[{}] ignoring change on {}: {}", self.name(), slot, e);
        }
        true
    }

    /// Interval at which a watching client should call [`View::poll`]
    fn poll_interval(&self) -> Option<Duration> {
        None
    }

    /// Re-read state that has no change feed
    async fn poll(&mut self) {}

    fn teardown(&mut self) {
        self.subscriptions_mut().release_all();
    }
}

/// Case-insensitive substring match used by the local search boxes
pub(crate) fn text_matches(needle: &str, fields: &[Option<&str>]) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    fields
        .iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&needle))
}
