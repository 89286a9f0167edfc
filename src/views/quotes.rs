//! Quotes page

use super::{text_matches, View, ViewContext};
use crate::error::{Error, Result};
use crate::live::{InsertPolicy, LiveCollection};
use crate::models::{Quote, QuoteStatus, Record};
use crate::realtime::{RawChange, SubscriptionKey, SubscriptionSet};
use crate::rest::Query;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

const SLOT_QUOTES: &str = "quotes";

pub struct QuotesView {
    ctx: ViewContext,
    subs: SubscriptionSet,
    list: LiveCollection<Quote>,
    status: Option<QuoteStatus>,
    search: String,
}

impl QuotesView {
    pub fn new(ctx: ViewContext) -> Self {
        let list = LiveCollection::new(Self::query(None, ctx.limits.records), InsertPolicy::Prepend {
            cap: ctx.limits.records,
        });
        Self {
            subs: ctx.subscriptions("quotes"),
            list,
            ctx,
            status: None,
            search: String::new(),
        }
    }

    fn query(status: Option<QuoteStatus>, limit: usize) -> Query {
        Query::table(Quote::TABLE)
            .embed("lead", "leads", &["nombre", "empresa_nombre"])
            .eq_opt("estado", status)
            .order("created_at", false)
            .limit(limit)
    }

    pub fn quotes(&self) -> &[Quote] {
        self.list.items()
    }

    pub fn status_filter(&self) -> Option<QuoteStatus> {
        self.status
    }

    pub fn set_search(&mut self, search: &str) {
        self.search = search.to_string();
    }

    /// Loaded quotes matching the search box
    pub fn visible(&self) -> Vec<&Quote> {
        self.list
            .items()
            .iter()
            .filter(|q| {
                let lead = q.lead.as_ref();
                text_matches(
                    &self.search,
                    &[
                        Some(q.title.as_str()),
                        lead.and_then(|l| l.name.as_deref()),
                        lead.and_then(|l| l.company.as_deref()),
                    ],
                )
            })
            .collect()
    }

    /// Sum of the visible quotes' amounts
    pub fn total_amount(&self) -> f64 {
        self.visible().iter().map(|q| q.amount).sum()
    }

    pub fn accepted_amount(&self) -> f64 {
        self.visible()
            .iter()
            .filter(|q| q.status == QuoteStatus::Accepted)
            .map(|q| q.amount)
            .sum()
    }

    pub async fn refresh(&mut self) -> Result<()> {
        if let Err(e) = self.list.refresh(self.ctx.data.as_ref()).await {
            self.ctx.notifier.error("Could not load quotes", &e);
            return Err(e);
        }
        Ok(())
    }

    pub async fn set_status_filter(&mut self, status: Option<QuoteStatus>) -> Result<bool> {
        let query = Self::query(status, self.ctx.limits.records);
        match self.list.change_query(self.ctx.data.as_ref(), query).await {
            Ok(changed) => {
                self.status = status;
                Ok(changed)
            }
            Err(e) => {
                self.ctx.notifier.error("Could not load quotes", &e);
                Err(e)
            }
        }
    }

    pub fn select(&mut self, id: Option<&str>) {
        self.list.select(id);
    }

    pub fn selected(&self) -> Option<&Quote> {
        self.list.selected()
    }

    /// Change a quote's status and re-read the list
    pub async fn update_status(&mut self, id: &str, status: QuoteStatus) -> bool {
        let updated = self
            .ctx
            .data
            .update(Quote::TABLE, id, json!({ "estado": status }))
            .await
            .and_then(|row| row.ok_or_else(|| Error::NotFound(format!("quote {}", id))));
        if let Err(e) = updated {
            self.ctx.notifier.error("Could not update the quote", &e);
            return false;
        }
        info!("quote {} -> {}", id, status);
        self.ctx.notifier.success("Status updated");
        let _ = self.refresh().await;
        true
    }
}

#[async_trait]
impl View for QuotesView {
    fn name(&self) -> &'static str {
        "quotes"
    }

    async fn mount(&mut self) -> Result<()> {
        self.subs
            .ensure(SLOT_QUOTES, SubscriptionKey::for_record::<Quote>())
            .await;
        self.refresh().await
    }

    async fn on_change(&mut self, slot: &'static str, _change: RawChange) -> Result<()> {
        // Rows embed their lead, so a change re-reads the page
        if slot == SLOT_QUOTES {
            self.list.refresh(self.ctx.data.as_ref()).await?;
        }
        Ok(())
    }

    fn subscriptions_mut(&mut self) -> &mut SubscriptionSet {
        &mut self.subs
    }
}
