//! Meetings page: agenda with status/type filters and schedule counters

use super::{text_matches, View, ViewContext};
use crate::error::{Error, Result};
use crate::live::{InsertPolicy, LiveCollection};
use crate::models::{Meeting, MeetingStatus, MeetingType, Record};
use crate::realtime::{RawChange, SubscriptionKey, SubscriptionSet};
use crate::rest::Query;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

const SLOT_MEETINGS: &str = "meetings";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeetingFilters {
    pub status: Option<MeetingStatus>,
    pub kind: Option<MeetingType>,
}

impl MeetingFilters {
    fn to_query(self, limit: usize) -> Query {
        Query::table(Meeting::TABLE)
            .embed("lead", "leads", &["nombre", "empresa_nombre"])
            .eq_opt("estado", self.status)
            .eq_opt("tipo", self.kind)
            .order("fecha_hora", true)
            .limit(limit)
    }
}

/// A pending meeting whose time has passed
pub fn is_overdue(meeting: &Meeting, now: DateTime<Utc>) -> bool {
    meeting.status == MeetingStatus::Pending && meeting.scheduled_at.is_some_and(|at| at < now)
}

pub struct MeetingsView {
    ctx: ViewContext,
    subs: SubscriptionSet,
    list: LiveCollection<Meeting>,
    filters: MeetingFilters,
    search: String,
}

impl MeetingsView {
    pub fn new(ctx: ViewContext) -> Self {
        let filters = MeetingFilters::default();
        let list = LiveCollection::new(
            filters.to_query(ctx.limits.records),
            InsertPolicy::Append,
        );
        Self {
            subs: ctx.subscriptions("meetings"),
            list,
            ctx,
            filters,
            search: String::new(),
        }
    }

    pub fn meetings(&self) -> &[Meeting] {
        self.list.items()
    }

    pub fn filters(&self) -> MeetingFilters {
        self.filters
    }

    pub fn set_search(&mut self, search: &str) {
        self.search = search.to_string();
    }

    pub fn visible(&self) -> Vec<&Meeting> {
        self.list
            .items()
            .iter()
            .filter(|m| {
                let lead = m.lead.as_ref();
                text_matches(
                    &self.search,
                    &[
                        Some(m.title.as_str()),
                        lead.and_then(|l| l.name.as_deref()),
                        lead.and_then(|l| l.company.as_deref()),
                    ],
                )
            })
            .collect()
    }

    /// Visible meetings scheduled after `now`
    pub fn upcoming_at(&self, now: DateTime<Utc>) -> usize {
        self.visible()
            .iter()
            .filter(|m| m.scheduled_at.is_some_and(|at| at > now))
            .count()
    }

    /// Visible meetings on the same calendar day as `now`
    pub fn today_at(&self, now: DateTime<Utc>) -> usize {
        let day = now.date_naive();
        self.visible()
            .iter()
            .filter(|m| m.scheduled_at.is_some_and(|at| at.date_naive() == day))
            .count()
    }

    pub fn overdue_at(&self, now: DateTime<Utc>) -> usize {
        self.visible().iter().filter(|m| is_overdue(m, now)).count()
    }

    pub fn upcoming(&self) -> usize {
        self.upcoming_at(Utc::now())
    }

    pub fn today(&self) -> usize {
        self.today_at(Utc::now())
    }

    pub fn overdue(&self) -> usize {
        self.overdue_at(Utc::now())
    }

    pub async fn refresh(&mut self) -> Result<()> {
        if let Err(e) = self.list.refresh(self.ctx.data.as_ref()).await {
            self.ctx.notifier.error("Could not load meetings", &e);
            return Err(e);
        }
        Ok(())
    }

    pub async fn set_filters(&mut self, filters: MeetingFilters) -> Result<bool> {
        let query = filters.to_query(self.ctx.limits.records);
        match self.list.change_query(self.ctx.data.as_ref(), query).await {
            Ok(changed) => {
                self.filters = filters;
                Ok(changed)
            }
            Err(e) => {
                self.ctx.notifier.error("Could not load meetings", &e);
                Err(e)
            }
        }
    }

    pub fn select(&mut self, id: Option<&str>) {
        self.list.select(id);
    }

    pub fn selected(&self) -> Option<&Meeting> {
        self.list.selected()
    }

    pub async fn update_status(&mut self, id: &str, status: MeetingStatus) -> bool {
        let updated = self
            .ctx
            .data
            .update(Meeting::TABLE, id, json!({ "estado": status }))
            .await
            .and_then(|row| row.ok_or_else(|| Error::NotFound(format!("meeting {}", id))));
        if let Err(e) = updated {
            self.ctx.notifier.error("Could not update the meeting", &e);
            return false;
        }
        info!("meeting {} -> {}", id, status);
        self.ctx.notifier.success("Status updated");
        let _ = self.refresh().await;
        true
    }
}

#[async_trait]
impl View for MeetingsView {
    fn name(&self) -> &'static str {
        "meetings"
    }

    async fn mount(&mut self) -> Result<()> {
        self.subs
            .ensure(SLOT_MEETINGS, SubscriptionKey::for_record::<Meeting>())
            .await;
        self.refresh().await
    }

    async fn on_change(&mut self, slot: &'static str, _change: RawChange) -> Result<()> {
        if slot == SLOT_MEETINGS {
            self.list.refresh(self.ctx.data.as_ref()).await?;
        }
        Ok(())
    }

    fn subscriptions_mut(&mut self) -> &mut SubscriptionSet {
        &mut self.subs
    }
}
