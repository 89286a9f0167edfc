//! Leads page: filtered list, live total, and the selected lead's tabs

use super::thread::{MessageThread, SendOutcome, SendVia};
use super::{View, ViewContext};
use crate::error::{Error, Result};
use crate::live::{InsertPolicy, LazyDetail, LiveCollection};
use crate::models::{
    AgentLog, FunnelStage, Lead, LeadSource, LeadStatus, Meeting, NewLead, Priority, Quote, Record,
};
use crate::realtime::{RawChange, SubscriptionKey, SubscriptionSet};
use crate::rest::Query;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Entries shown on a lead's activity tab
const ACTIVITY_TAB_LIMIT: usize = 20;

const SLOT_LEADS: &str = "leads";
const SLOT_THREAD: &str = "thread";

/// Server-side filters of the list; `None` means "any"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadFilters {
    pub status: Option<LeadStatus>,
    pub stage: Option<FunnelStage>,
    pub priority: Option<Priority>,
    pub source: Option<LeadSource>,
    /// Substring of the lead name
    pub search: Option<String>,
}

impl LeadFilters {
    fn apply(&self, query: Query) -> Query {
        let query = query
            .eq_opt("estado", self.status)
            .eq_opt("etapa_funnel", self.stage)
            .eq_opt("prioridad", self.priority)
            .eq_opt("fuente", self.source);
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => query.contains("nombre", term),
            _ => query,
        }
    }

    pub fn to_query(&self, limit: usize) -> Query {
        self.apply(Query::table(Lead::TABLE))
            .order("created_at", false)
            .limit(limit)
    }

    fn count_query(&self) -> Query {
        self.apply(Query::table(Lead::TABLE))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailTab {
    Conversation,
    Quotes,
    Meetings,
    Activity,
}

impl std::str::FromStr for DetailTab {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "conversation" | "chat" | "messages" => Ok(DetailTab::Conversation),
            "quotes" => Ok(DetailTab::Quotes),
            "meetings" => Ok(DetailTab::Meetings),
            "activity" | "logs" => Ok(DetailTab::Activity),
            _ => Err(Error::InvalidInput(format!("unknown tab: {}", s))),
        }
    }
}

/// Dependent collections of the selected lead, each loaded on first view
pub struct LeadDetail {
    pub thread: MessageThread,
    quotes: LazyDetail<Quote>,
    meetings: LazyDetail<Meeting>,
    activity: LazyDetail<AgentLog>,
}

impl LeadDetail {
    fn new(thread_limit: usize) -> Self {
        Self {
            thread: MessageThread::new(thread_limit),
            quotes: LazyDetail::new(InsertPolicy::Prepend { cap: usize::MAX }),
            meetings: LazyDetail::new(InsertPolicy::Append),
            activity: LazyDetail::new(InsertPolicy::Prepend {
                cap: ACTIVITY_TAB_LIMIT,
            }),
        }
    }

    fn bind(&mut self, lead_id: Option<&str>) {
        self.thread.bind(lead_id);
        self.quotes.reset(lead_id);
        self.meetings.reset(lead_id);
        self.activity.reset(lead_id);
    }

    pub fn quotes(&self) -> Option<&[Quote]> {
        self.quotes.items()
    }

    pub fn meetings(&self) -> Option<&[Meeting]> {
        self.meetings.items()
    }

    pub fn activity(&self) -> Option<&[AgentLog]> {
        self.activity.items()
    }

    pub fn is_loaded(&self, tab: DetailTab) -> bool {
        match tab {
            DetailTab::Conversation => self.thread.is_loaded(),
            DetailTab::Quotes => self.quotes.is_loaded(),
            DetailTab::Meetings => self.meetings.is_loaded(),
            DetailTab::Activity => self.activity.is_loaded(),
        }
    }
}

pub struct LeadsView {
    ctx: ViewContext,
    subs: SubscriptionSet,
    list: LiveCollection<Lead>,
    filters: LeadFilters,
    total: u64,
    detail: LeadDetail,
}

impl LeadsView {
    pub fn new(ctx: ViewContext) -> Self {
        let filters = LeadFilters::default();
        let list = LiveCollection::new(filters.to_query(ctx.limits.leads), InsertPolicy::Prepend {
            cap: ctx.limits.leads,
        });
        let detail = LeadDetail::new(ctx.limits.thread);
        Self {
            subs: ctx.subscriptions("leads"),
            ctx,
            list,
            filters,
            total: 0,
            detail,
        }
    }

    pub fn leads(&self) -> &[Lead] {
        self.list.items()
    }

    pub fn collection(&self) -> &LiveCollection<Lead> {
        &self.list
    }

    pub fn filters(&self) -> &LeadFilters {
        &self.filters
    }

    /// Leads matching the filters server-side, beyond the loaded page
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn selected(&self) -> Option<&Lead> {
        self.list.selected()
    }

    pub fn detail(&self) -> &LeadDetail {
        &self.detail
    }

    /// Re-read the list and the total; failures keep the previous rows
    pub async fn refresh(&mut self) -> Result<()> {
        if let Err(e) = self.list.refresh(self.ctx.data.as_ref()).await {
            self.ctx.notifier.error("Could not load leads", &e);
            return Err(e);
        }
        self.recount().await;
        Ok(())
    }

    async fn recount(&mut self) {
        match self.ctx.data.count(&self.filters.count_query()).await {
            Ok(total) => self.total = total,
            Err(e) => debug!("lead count failed: {}", e),
        }
    }

    /// Replace the filters; a change fully replaces the list
    ///
    /// The new filters only take effect once their rows arrived. A failed
    /// fetch keeps the previous filters and rows.
    pub async fn set_filters(&mut self, filters: LeadFilters) -> Result<bool> {
        let query = filters.to_query(self.ctx.limits.leads);
        match self.list.change_query(self.ctx.data.as_ref(), query).await {
            Ok(changed) => {
                self.filters = filters;
                if changed {
                    self.recount().await;
                }
                Ok(changed)
            }
            Err(e) => {
                self.ctx.notifier.error("Could not load leads", &e);
                Err(e)
            }
        }
    }

    /// Select a lead (or clear the selection); cached tabs of the previous
    /// lead are dropped
    pub async fn select(&mut self, lead_id: Option<&str>) {
        self.list.select(lead_id);
        self.detail.bind(lead_id);
        match lead_id {
            Some(id) => {
                self.subs
                    .ensure(SLOT_THREAD, MessageThread::subscription_for(id))
                    .await;
            }
            None => self.subs.release(SLOT_THREAD),
        }
    }

    /// Load a tab of the selected lead if it has not been viewed yet
    pub async fn open_tab(&mut self, tab: DetailTab) -> Result<bool> {
        let Some(lead_id) = self.list.selected_id().map(str::to_string) else {
            return Ok(false);
        };
        let data = self.ctx.data.as_ref();
        let loaded = match tab {
            DetailTab::Conversation => self.detail.thread.load(&self.ctx).await,
            DetailTab::Quotes => {
                let query = Query::table(Quote::TABLE)
                    .eq("lead_id", &lead_id)
                    .order("created_at", false);
                self.detail.quotes.ensure_loaded(data, &query).await
            }
            DetailTab::Meetings => {
                let query = Query::table(Meeting::TABLE)
                    .eq("lead_id", &lead_id)
                    .order("fecha_hora", true);
                self.detail.meetings.ensure_loaded(data, &query).await
            }
            DetailTab::Activity => {
                let query = Query::table(AgentLog::TABLE)
                    .eq("lead_id", &lead_id)
                    .order("created_at", false)
                    .limit(ACTIVITY_TAB_LIMIT);
                self.detail.activity.ensure_loaded(data, &query).await
            }
        };
        if let Err(e) = &loaded {
            self.ctx.notifier.error("Could not load lead details", e);
        }
        loaded
    }

    /// Send a message for the selected lead, to the agent or the bot chat
    pub async fn send(&mut self, text: &str, via_channel: bool) -> SendOutcome {
        let via = if via_channel {
            match self
                .list
                .selected()
                .and_then(|lead| lead.telegram_chat_id.clone())
            {
                Some(chat_id) => SendVia::Channel { chat_id },
                None => return SendOutcome::Skipped,
            }
        } else {
            SendVia::Agent
        };
        let outcome = self.detail.thread.send(&self.ctx, text, via).await;
        if let SendOutcome::Delivered { reply } = &outcome {
            if reply.as_ref().and_then(|r| r.reply.as_ref()).is_some() {
                self.ctx.notifier.success("Reply generated");
            } else if via_channel {
                self.ctx.notifier.success("Message sent to the lead's chat");
            }
        }
        outcome
    }

    /// Insert a manually entered lead
    pub async fn create(&mut self, lead: NewLead) -> Option<Lead> {
        let created = match lead.to_row() {
            Ok(row) => self.ctx.data.insert(Lead::TABLE, row).await,
            Err(e) => Err(e),
        };
        let row = match created {
            Ok(row) => row,
            Err(e) => {
                self.ctx.notifier.error("Could not create the lead", &e);
                return None;
            }
        };
        if let Err(e) = self.list.apply_raw(&RawChange::insert(Lead::TABLE, row.clone())) {
            debug!("created lead row not applied: {}", e);
        }
        match Lead::from_row(row) {
            Ok(lead) => {
                info!("created lead {}", lead.id);
                self.recount().await;
                self.ctx.notifier.success("Lead created");
                Some(lead)
            }
            Err(e) => {
                self.ctx.notifier.error("Could not create the lead", &e);
                None
            }
        }
    }

    async fn patch(&mut self, lead_id: &str, patch: Value) -> Option<Lead> {
        let updated = self.ctx.data.update(Lead::TABLE, lead_id, patch).await;
        let row = match updated {
            Ok(Some(row)) => row,
            Ok(None) => {
                let err = Error::NotFound(format!("lead {}", lead_id));
                self.ctx.notifier.error("Could not update the lead", &err);
                return None;
            }
            Err(e) => {
                self.ctx.notifier.error("Could not update the lead", &e);
                return None;
            }
        };
        if let Err(e) = self.list.apply_raw(&RawChange::update(Lead::TABLE, row.clone(), None)) {
            debug!("updated lead row not applied: {}", e);
        }
        self.ctx.notifier.success("Lead updated");
        Lead::from_row(row).ok()
    }

    pub async fn set_stage(&mut self, lead_id: &str, stage: FunnelStage) -> Option<Lead> {
        self.patch(lead_id, json!({ "etapa_funnel": stage })).await
    }

    pub async fn set_status(&mut self, lead_id: &str, status: LeadStatus) -> Option<Lead> {
        self.patch(lead_id, json!({ "estado": status })).await
    }

    pub async fn set_priority(&mut self, lead_id: &str, priority: Priority) -> Option<Lead> {
        self.patch(lead_id, json!({ "prioridad": priority })).await
    }

    /// Loaded leads per funnel stage
    pub fn stage_counts(&self) -> BTreeMap<FunnelStage, usize> {
        let mut counts = BTreeMap::new();
        for lead in self.list.items() {
            *counts.entry(lead.stage).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl View for LeadsView {
    fn name(&self) -> &'static str {
        "leads"
    }

    async fn mount(&mut self) -> Result<()> {
        self.subs
            .ensure(SLOT_LEADS, SubscriptionKey::for_record::<Lead>())
            .await;
        self.refresh().await
    }

    async fn on_change(&mut self, slot: &'static str, change: RawChange) -> Result<()> {
        match slot {
            SLOT_LEADS => {
                let applied = self.list.apply_raw(&change)?;
                if applied {
                    self.recount().await;
                }
            }
            SLOT_THREAD => {
                self.detail.thread.apply_raw(&change)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn subscriptions_mut(&mut self) -> &mut SubscriptionSet {
        &mut self.subs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoticeLevel;
    use crate::views::testkit::Harness;

    fn seed(h: &Harness) {
        h.data.seed(
            "leads",
            vec![
                json!({"id": "L1", "nombre": "Ana", "estado": "nuevo", "etapa_funnel": "atencion", "prioridad": "alta", "created_at": "2026-03-01T00:00:00Z"}),
                json!({"id": "L2", "nombre": "Beto", "estado": "contactado", "etapa_funnel": "interes", "prioridad": "media", "telegram_chat_id": 555, "created_at": "2026-03-02T00:00:00Z"}),
                json!({"id": "L3", "nombre": "Carolina", "estado": "nuevo", "etapa_funnel": "interes", "prioridad": "baja", "created_at": "2026-03-03T00:00:00Z"}),
            ],
        );
        let mut messages = Vec::new();
        for i in 0..5 {
            messages.push(json!({"id": format!("a{}", i), "lead_id": "L1", "content": format!("msg {}", i), "created_at": format!("2026-03-04T00:00:0{}Z", i)}));
        }
        messages.push(json!({"id": "b0", "lead_id": "L2", "content": "hola", "created_at": "2026-03-04T00:00:00Z"}));
        h.data.seed("conversations", messages);
        h.data.seed(
            "cotizaciones",
            vec![json!({"id": "Q1", "lead_id": "L1", "titulo": "Web", "monto": 1200, "estado": "pendiente"})],
        );
    }

    #[tokio::test]
    async fn test_mount_loads_newest_first_with_total() {
        let h = Harness::new();
        seed(&h);
        let mut view = LeadsView::new(h.ctx.clone());
        view.mount().await.unwrap();

        let ids: Vec<&str> = view.leads().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["L3", "L2", "L1"]);
        assert_eq!(view.total(), 3);
        assert_eq!(view.stage_counts().get(&FunnelStage::Interest), Some(&2));
    }

    #[tokio::test]
    async fn test_filter_change_replaces_collection() {
        let h = Harness::new();
        seed(&h);
        let mut view = LeadsView::new(h.ctx.clone());
        view.mount().await.unwrap();

        let filters = LeadFilters {
            status: Some(LeadStatus::New),
            search: Some("caro".to_string()),
            ..Default::default()
        };
        assert!(view.set_filters(filters.clone()).await.unwrap());
        let ids: Vec<&str> = view.leads().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["L3"]);
        assert_eq!(view.total(), 1);

        assert!(!view.set_filters(filters).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_filter_change_keeps_snapshot_and_retries() {
        let h = Harness::new();
        seed(&h);
        let mut view = LeadsView::new(h.ctx.clone());
        view.mount().await.unwrap();

        let only_new = LeadFilters {
            status: Some(LeadStatus::New),
            ..Default::default()
        };
        h.data.set_offline(true);
        assert!(view.set_filters(only_new.clone()).await.is_err());
        assert_eq!(view.filters(), &LeadFilters::default());
        assert_eq!(view.leads().len(), 3);
        assert_eq!(h.notifier.count(NoticeLevel::Error), 1);

        h.data.set_offline(false);
        assert!(view.set_filters(only_new.clone()).await.unwrap());
        assert_eq!(view.filters(), &only_new);
        let ids: Vec<&str> = view.leads().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["L3", "L1"]);
        assert_eq!(view.total(), 2);
    }

    #[tokio::test]
    async fn test_live_insert_and_duplicate() {
        let h = Harness::new();
        seed(&h);
        let mut view = LeadsView::new(h.ctx.clone());
        view.mount().await.unwrap();

        h.feed.publish(RawChange::insert("leads", json!({"id": "L4", "nombre": "Dani", "estado": "nuevo"})));
        h.feed.publish(RawChange::insert("leads", json!({"id": "L1", "nombre": "Ana"})));
        view.sync().await;

        assert_eq!(view.leads().len(), 4);
        assert_eq!(view.leads()[0].id, "L4");
        assert_eq!(view.collection().count_where(|l| l.id == "L1"), 1);
    }

    #[tokio::test]
    async fn test_tabs_load_lazily_per_selection() {
        let h = Harness::new();
        seed(&h);
        let mut view = LeadsView::new(h.ctx.clone());
        view.mount().await.unwrap();
        let selects_after_mount = h.data.select_count();

        view.select(Some("L1")).await;
        assert_eq!(h.data.select_count(), selects_after_mount);
        assert!(view.open_tab(DetailTab::Conversation).await.unwrap());
        assert_eq!(view.detail().thread.messages().len(), 5);
        assert!(!view.open_tab(DetailTab::Conversation).await.unwrap());

        view.select(Some("L2")).await;
        assert!(!view.detail().is_loaded(DetailTab::Conversation));
        view.open_tab(DetailTab::Conversation).await.unwrap();
        let messages = view.detail().thread.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages.iter().all(|m| m.lead_id.as_deref() == Some("L2")));

        view.select(Some("L1")).await;
        view.open_tab(DetailTab::Quotes).await.unwrap();
        assert_eq!(view.detail().quotes().map(|q| q.len()), Some(1));
        assert!(view.detail().meetings().is_none());
    }

    #[tokio::test]
    async fn test_thread_follows_selection_feed() {
        let h = Harness::new();
        seed(&h);
        let mut view = LeadsView::new(h.ctx.clone());
        view.mount().await.unwrap();
        view.select(Some("L2")).await;
        view.open_tab(DetailTab::Conversation).await.unwrap();

        h.feed.publish(RawChange::insert("conversations", json!({"id": "a9", "lead_id": "L1"})));
        h.feed.publish(RawChange::insert("conversations", json!({"id": "b1", "lead_id": "L2"})));
        view.sync().await;

        let ids: Vec<&str> = view.detail().thread.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b0", "b1"]);
    }

    #[tokio::test]
    async fn test_teardown_stops_mutations() {
        let h = Harness::new();
        seed(&h);
        let mut view = LeadsView::new(h.ctx.clone());
        view.mount().await.unwrap();
        view.teardown();

        assert_eq!(h.feed.publish(RawChange::insert("leads", json!({"id": "L9"}))), 0);
        assert_eq!(view.sync().await, 0);
        assert_eq!(view.leads().len(), 3);
    }

    #[tokio::test]
    async fn test_status_change_and_creation() {
        let h = Harness::new().without_realtime();
        seed(&h);
        let mut view = LeadsView::new(h.ctx.clone());
        view.mount().await.unwrap();

        let updated = view.set_status("L2", LeadStatus::Quoted).await.unwrap();
        assert_eq!(updated.status, LeadStatus::Quoted);
        assert_eq!(view.collection().get("L2").map(|l| l.status), Some(LeadStatus::Quoted));

        let created = view.create(NewLead::new("Elena")).await.unwrap();
        assert_eq!(created.stage, FunnelStage::Attention);
        assert_eq!(created.status, LeadStatus::New);
        assert_eq!(view.leads()[0].id, created.id);
        assert_eq!(view.total(), 4);

        assert!(view.create(NewLead::new("  ")).await.is_none());
        assert!(view.set_status("nope", LeadStatus::New).await.is_none());
        assert_eq!(h.notifier.count(NoticeLevel::Error), 2);
    }

    #[tokio::test]
    async fn test_channel_send_requires_chat_id() {
        let h = Harness::new();
        seed(&h);
        let mut view = LeadsView::new(h.ctx.clone());
        view.mount().await.unwrap();

        view.select(Some("L1")).await;
        assert_eq!(view.send("hola", true).await, SendOutcome::Skipped);

        view.select(Some("L2")).await;
        assert!(matches!(view.send("hola", true).await, SendOutcome::Delivered { .. }));
        assert_eq!(h.gateway.call_count("send_channel_message"), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_rows() {
        let h = Harness::new();
        seed(&h);
        let mut view = LeadsView::new(h.ctx.clone());
        view.mount().await.unwrap();

        h.data.set_offline(true);
        assert!(view.refresh().await.is_err());
        assert_eq!(view.leads().len(), 3);
        assert_eq!(h.notifier.count(NoticeLevel::Error), 1);
    }
}
