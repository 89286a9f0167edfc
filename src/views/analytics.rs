//! Analytics page: activity series and distributions folded from raw rows

use super::{View, ViewContext};
use crate::error::Result;
use crate::gateway::AnalyticsReport;
use crate::models::{FunnelStage, Lead, Message, Record};
use crate::realtime::{RawChange, SubscriptionSet};
use crate::rest::Query;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Days covered by the activity series, today included
pub const SERIES_DAYS: i64 = 14;

/// Analysis kind requested from the analytics agent
pub const DEFAULT_ANALYSIS: &str = "diario";

const DEFAULT_CONTENT_KIND: &str = "text";
const UNKNOWN_SOURCE: &str = "desconocido";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayPoint {
    pub date: NaiveDate,
    pub messages: u64,
    pub leads: u64,
}

/// Zeroed series of `SERIES_DAYS` days ending on `now`'s date
fn empty_series(now: DateTime<Utc>) -> Vec<DayPoint> {
    let first = (now - Duration::days(SERIES_DAYS - 1)).date_naive();
    first
        .iter_days()
        .take(SERIES_DAYS as usize)
        .map(|date| DayPoint {
            date,
            messages: 0,
            leads: 0,
        })
        .collect()
}

/// Calendar day of a row's `created_at`, read from its first ten characters
fn day_of(row: &Value) -> Option<NaiveDate> {
    let raw = row.get("created_at")?.as_str()?;
    let day = raw.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Count rows per value of `column`, with `fallback` for null or missing
fn distribution(rows: &[Value], column: &str, fallback: &str) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for row in rows {
        let key = row
            .get(column)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .unwrap_or(fallback);
        *counts.entry(key.to_string()).or_insert(0) += 1;
    }
    counts
}

pub struct AnalyticsView {
    ctx: ViewContext,
    subs: SubscriptionSet,
    series: Vec<DayPoint>,
    content_kinds: BTreeMap<String, u64>,
    sources: BTreeMap<String, u64>,
    stages: BTreeMap<FunnelStage, u64>,
    kpis: Option<AnalyticsReport>,
    report: Option<String>,
}

impl AnalyticsView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            subs: ctx.subscriptions("analytics"),
            ctx,
            series: Vec::new(),
            content_kinds: BTreeMap::new(),
            sources: BTreeMap::new(),
            stages: BTreeMap::new(),
            kpis: None,
            report: None,
        }
    }

    pub fn series(&self) -> &[DayPoint] {
        &self.series
    }

    pub fn content_kinds(&self) -> &BTreeMap<String, u64> {
        &self.content_kinds
    }

    pub fn sources(&self) -> &BTreeMap<String, u64> {
        &self.sources
    }

    pub fn stages(&self) -> &BTreeMap<FunnelStage, u64> {
        &self.stages
    }

    pub fn kpis(&self) -> Option<&AnalyticsReport> {
        self.kpis.as_ref()
    }

    /// Prose from the last on-demand run
    pub fn report(&self) -> Option<&str> {
        self.report.as_deref()
    }

    /// Messages and new leads per day over the last `SERIES_DAYS` days
    pub async fn load_series(&mut self, now: DateTime<Utc>) -> Result<()> {
        let mut series = empty_series(now);
        let from = series
            .first()
            .map(|p| p.date.and_time(NaiveTime::MIN).and_utc())
            .unwrap_or(now);
        let since = from.to_rfc3339();

        let messages = Query::table(Message::TABLE)
            .select(&["created_at"])
            .gte("created_at", &since)
            .order("created_at", true);
        let leads = Query::table(Lead::TABLE)
            .select(&["created_at"])
            .gte("created_at", &since);
        let (messages, leads) = futures::try_join!(
            self.ctx.data.select(&messages),
            self.ctx.data.select(&leads)
        )?;

        for (rows, is_message) in [(&messages, true), (&leads, false)] {
            for day in rows.iter().filter_map(day_of) {
                if let Some(point) = series.iter_mut().find(|p| p.date == day) {
                    if is_message {
                        point.messages += 1;
                    } else {
                        point.leads += 1;
                    }
                }
            }
        }
        self.series = series;
        Ok(())
    }

    pub async fn load_distributions(&mut self) -> Result<()> {
        let kinds = Query::table(Message::TABLE).select(&["content_type"]);
        let leads = Query::table(Lead::TABLE).select(&["fuente", "etapa_funnel"]);
        let (kinds, leads) = futures::try_join!(
            self.ctx.data.select(&kinds),
            self.ctx.data.select(&leads)
        )?;

        self.content_kinds = distribution(&kinds, "content_type", DEFAULT_CONTENT_KIND);
        self.sources = distribution(&leads, "fuente", UNKNOWN_SOURCE);

        let mut stages: BTreeMap<FunnelStage, u64> =
            FunnelStage::PIPELINE.iter().map(|s| (*s, 0)).collect();
        for row in &leads {
            let stage = row
                .get("etapa_funnel")
                .and_then(Value::as_str)
                .map(FunnelStage::parse_lenient)
                .unwrap_or_default();
            if let Some(count) = stages.get_mut(&stage) {
                *count += 1;
            }
        }
        self.stages = stages;
        Ok(())
    }

    /// Re-read the series and the distributions
    pub async fn reload(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.load_series(now).await?;
        self.load_distributions().await
    }

    /// Ask the analytics agent for a fresh report
    pub async fn run(&mut self) -> Option<&str> {
        match self.ctx.gateway.run_analytics(DEFAULT_ANALYSIS).await {
            Ok(report) => {
                let text = report
                    .summary
                    .clone()
                    .or_else(|| report.report.clone())
                    .unwrap_or_else(|| "No report available".to_string());
                info!("analytics run finished");
                self.ctx.notifier.success("Analysis completed");
                self.report = Some(text);
                self.kpis = Some(report);
                self.report.as_deref()
            }
            Err(e) => {
                self.ctx.notifier.error("Could not reach the analytics agent", &e);
                None
            }
        }
    }
}

#[async_trait]
impl View for AnalyticsView {
    fn name(&self) -> &'static str {
        "analytics"
    }

    async fn mount(&mut self) -> Result<()> {
        match self.ctx.gateway.run_analytics(DEFAULT_ANALYSIS).await {
            Ok(report) => self.kpis = Some(report),
            Err(e) => debug!("analytics KPIs unavailable: {}", e),
        }
        if let Err(e) = self.reload(Utc::now()).await {
            self.ctx.notifier.error("Could not load analytics", &e);
            return Err(e);
        }
        Ok(())
    }

    async fn on_change(&mut self, _slot: &'static str, _change: RawChange) -> Result<()> {
        Ok(())
    }

    fn subscriptions_mut(&mut self) -> &mut SubscriptionSet {
        &mut self.subs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::timestamp;
    use crate::notify::NoticeLevel;
    use crate::views::testkit::Harness;
    use serde_json::json;

    #[tokio::test]
    async fn test_series_buckets_by_day() {
        let h = Harness::new();
        h.data.seed(
            "conversations",
            vec![
                json!({"id": "m1", "created_at": "2026-04-14T08:00:00Z"}),
                json!({"id": "m2", "created_at": "2026-04-14T09:30:00Z"}),
                json!({"id": "m3", "created_at": "2026-04-01T12:00:00Z"}),
                json!({"id": "old", "created_at": "2026-03-20T12:00:00Z"}),
            ],
        );
        h.data.seed(
            "leads",
            vec![json!({"id": "L1", "created_at": "2026-04-10T10:00:00Z"})],
        );

        let mut view = AnalyticsView::new(h.ctx.clone());
        let now = timestamp::parse("2026-04-14T18:00:00Z").unwrap();
        view.load_series(now).await.unwrap();

        let series = view.series();
        assert_eq!(series.len(), 14);
        assert_eq!(series[0].date.to_string(), "2026-04-01");
        assert_eq!(series[0].messages, 1);
        assert_eq!(series[13].messages, 2);
        assert_eq!(series[9].leads, 1);
        assert_eq!(series.iter().map(|p| p.messages).sum::<u64>(), 3);
    }

    #[tokio::test]
    async fn test_distributions_apply_defaults() {
        let h = Harness::new();
        h.data.seed(
            "conversations",
            vec![
                json!({"id": "m1", "content_type": "voice"}),
                json!({"id": "m2", "content_type": null}),
                json!({"id": "m3"}),
            ],
        );
        h.data.seed(
            "leads",
            vec![
                json!({"id": "L1", "fuente": "telegram", "etapa_funnel": "interes"}),
                json!({"id": "L2", "etapa_funnel": "cliente"}),
                json!({"id": "L3", "fuente": "telegram", "etapa_funnel": "INTERES"}),
            ],
        );

        let mut view = AnalyticsView::new(h.ctx.clone());
        view.load_distributions().await.unwrap();

        assert_eq!(view.content_kinds().get("text"), Some(&2));
        assert_eq!(view.content_kinds().get("voice"), Some(&1));
        assert_eq!(view.sources().get("desconocido"), Some(&1));
        assert_eq!(view.sources().get("telegram"), Some(&2));
        assert_eq!(view.stages().get(&FunnelStage::Interest), Some(&2));
        assert_eq!(view.stages().get(&FunnelStage::Attention), Some(&0));
        assert_eq!(view.stages().get(&FunnelStage::Client), None);
    }

    #[tokio::test]
    async fn test_run_reports_and_notifies() {
        let h = Harness::new();
        h.gateway.report.lock().unwrap().summary = Some("Todo en orden".to_string());
        let mut view = AnalyticsView::new(h.ctx.clone());

        assert_eq!(view.run().await, Some("Todo en orden"));
        h.gateway.set_offline(true);
        assert_eq!(view.run().await, None);
        assert_eq!(view.report(), Some("Todo en orden"));
        assert_eq!(h.notifier.count(NoticeLevel::Success), 1);
        assert_eq!(h.notifier.count(NoticeLevel::Error), 1);
    }
}
