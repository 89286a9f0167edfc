//! Dashboard: headline KPIs, funnel counts, urgent leads and live activity

use super::{View, ViewContext};
use crate::error::Result;
use crate::gateway::{Alert, BotInfo, ChannelMetrics, DashboardSnapshot};
use crate::live::{InsertPolicy, LiveCollection};
use crate::models::{AgentLog, FunnelStage, Lead, LeadStatus, Priority, Record};
use crate::notify::{Notice, NoticeLevel};
use crate::realtime::{ChangeKind, RawChange, SubscriptionKey, SubscriptionSet};
use crate::rest::{fetch_records, Query};
use crate::views::analytics::DEFAULT_ANALYSIS;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Hours without contact after which a high-priority lead is urgent
pub const URGENT_AFTER_HOURS: i64 = 12;

const URGENT_LIMIT: usize = 5;

const SLOT_ACTIVITY: &str = "activity";

/// High-priority, still-active leads not contacted since `now - 12h`, oldest first
pub fn urgent_query(now: DateTime<Utc>) -> Query {
    let cutoff = (now - Duration::hours(URGENT_AFTER_HOURS)).to_rfc3339_opts(SecondsFormat::Secs, true);
    Query::table(Lead::TABLE)
        .eq("prioridad", Priority::High)
        .lt("ultimo_contacto", cutoff)
        .neq("estado", LeadStatus::Inactive)
        .order("ultimo_contacto", true)
        .limit(URGENT_LIMIT)
}

pub struct DashboardView {
    ctx: ViewContext,
    subs: SubscriptionSet,
    snapshot: Option<DashboardSnapshot>,
    metrics: Option<ChannelMetrics>,
    bots: Option<BotInfo>,
    funnel: BTreeMap<FunnelStage, u64>,
    urgent: Vec<Lead>,
    activity: LiveCollection<AgentLog>,
    alerts: Vec<Alert>,
}

impl DashboardView {
    pub fn new(ctx: ViewContext) -> Self {
        let limit = ctx.limits.dashboard_activity;
        let query = Query::table(AgentLog::TABLE)
            .select(&[
                "id",
                "agente",
                "accion",
                "duracion_ms",
                "exitoso",
                "created_at",
                "telegram_chat_id",
            ])
            .order("created_at", false)
            .limit(limit);
        Self {
            subs: ctx.subscriptions("dashboard"),
            activity: LiveCollection::new(query, InsertPolicy::Prepend { cap: limit }),
            ctx,
            snapshot: None,
            metrics: None,
            bots: None,
            funnel: BTreeMap::new(),
            urgent: Vec::new(),
            alerts: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> Option<&DashboardSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn metrics(&self) -> Option<&ChannelMetrics> {
        self.metrics.as_ref()
    }

    pub fn bots(&self) -> Option<&BotInfo> {
        self.bots.as_ref()
    }

    pub fn funnel(&self) -> &BTreeMap<FunnelStage, u64> {
        &self.funnel
    }

    pub fn urgent(&self) -> &[Lead] {
        &self.urgent
    }

    pub fn activity(&self) -> &[AgentLog] {
        self.activity.items()
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    /// Backend KPIs, bot info and channel metrics, read concurrently
    pub async fn refresh_backend(&mut self) {
        let gateway = self.ctx.gateway.clone();
        let (snapshot, bots, metrics) = futures::join!(
            gateway.dashboard(),
            gateway.bot_info(),
            gateway.channel_metrics()
        );
        match snapshot {
            Ok(snapshot) => self.snapshot = Some(snapshot),
            Err(e) => warn!("dashboard KPIs unavailable: {}", e),
        }
        match bots {
            Ok(bots) => self.bots = Some(bots),
            Err(e) => warn!("bot info unavailable: {}", e),
        }
        match metrics {
            Ok(metrics) => self.metrics = Some(metrics),
            Err(e) => warn!("bot metrics unavailable: {}", e),
        }
    }

    /// One count query per funnel stage, all in flight together
    pub async fn refresh_funnel(&mut self) -> Result<()> {
        let queries: Vec<Query> = FunnelStage::PIPELINE
            .iter()
            .map(|stage| Query::table(Lead::TABLE).eq("etapa_funnel", stage))
            .collect();
        let counts = join_all(queries.iter().map(|q| self.ctx.data.count(q))).await;

        let mut funnel = BTreeMap::new();
        for (stage, count) in FunnelStage::PIPELINE.iter().zip(counts) {
            funnel.insert(*stage, count?);
        }
        self.funnel = funnel;
        Ok(())
    }

    pub async fn refresh_urgent(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.urgent = fetch_records(self.ctx.data.as_ref(), &urgent_query(now)).await?;
        Ok(())
    }

    /// Re-read the funnel, the urgent leads and the activity log
    pub async fn reload(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.refresh_funnel().await?;
        self.refresh_urgent(now).await?;
        self.activity.refresh(self.ctx.data.as_ref()).await?;
        Ok(())
    }

    /// Run the daily analysis and keep its alerts
    pub async fn run_analysis(&mut self) -> bool {
        match self.ctx.gateway.run_analytics(DEFAULT_ANALYSIS).await {
            Ok(report) if !report.alerts.is_empty() => {
                info!("analysis raised {} alert(s)", report.alerts.len());
                let mut notice = Notice::new(NoticeLevel::Success, "Analysis completed");
                if let Some(headline) = report.headline() {
                    notice = notice.with_detail(headline);
                }
                self.ctx.notifier.notify(notice);
                self.alerts = report.alerts;
                true
            }
            Ok(_) => {
                self.ctx.notifier.info("Analysis completed. No new alerts.");
                true
            }
            Err(e) => {
                self.ctx
                    .notifier
                    .error("Could not reach the analytics agent", &e);
                false
            }
        }
    }
}

#[async_trait]
impl View for DashboardView {
    fn name(&self) -> &'static str {
        "dashboard"
    }

    async fn mount(&mut self) -> Result<()> {
        self.subs
            .ensure(
                SLOT_ACTIVITY,
                SubscriptionKey::for_record::<AgentLog>().only(ChangeKind::Insert),
            )
            .await;
        self.refresh_backend().await;

        if let Err(e) = self.reload(Utc::now()).await {
            self.ctx.notifier.error("Could not load the dashboard", &e);
            return Err(e);
        }
        Ok(())
    }

    async fn on_change(&mut self, slot: &'static str, change: RawChange) -> Result<()> {
        if slot == SLOT_ACTIVITY {
            self.activity.apply_raw(&change)?;
        }
        Ok(())
    }

    fn subscriptions_mut(&mut self) -> &mut SubscriptionSet {
        &mut self.subs
    }
}
