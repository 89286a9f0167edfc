//! `show`: mount one page store and render what it holds

use crate::app::App;
use crate::error::Result;
use crate::gateway::{Alert, AnalyticsReport, BotInfo, ChannelMetrics, DashboardSnapshot};
use crate::models::{
    AdminNotification, AgentLog, Campaign, Company, FunnelStage, Lead, LeadStatus, Meeting,
    MeetingStatus, MeetingType, Priority, Quote, QuoteStatus, TelegramSession,
};
use crate::progress::with_spinner;
use crate::shell::Route;
use crate::views::agents::AgentCard;
use crate::views::analytics::DayPoint;
use crate::views::conversations::ConversationSummary;
use crate::views::leads::LeadFilters;
use crate::views::meetings::MeetingFilters;
use crate::views::{
    AgentsView, AnalyticsView, CampaignsView, ConversationsView, DashboardView, LeadsView,
    MeetingsView, QuotesView, SettingsView, TelegramView, View,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Filters accepted by `show`; each page reads the ones it understands
#[derive(Debug, Clone, Default)]
pub struct ShowOptions {
    pub search: Option<String>,
    pub lead_stage: Option<FunnelStage>,
    pub lead_status: Option<LeadStatus>,
    pub lead_priority: Option<Priority>,
    pub quote_status: Option<QuoteStatus>,
    pub meeting_status: Option<MeetingStatus>,
    pub meeting_kind: Option<MeetingType>,
}

/// What a page shows, detached from its store
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "page", rename_all = "snake_case")]
pub enum PageSnapshot {
    Dashboard {
        kpis: Option<DashboardSnapshot>,
        metrics: Option<ChannelMetrics>,
        bots: Option<BotInfo>,
        funnel: BTreeMap<FunnelStage, u64>,
        urgent: Vec<Lead>,
        activity: Vec<AgentLog>,
        alerts: Vec<Alert>,
    },
    Leads {
        total: u64,
        leads: Vec<Lead>,
        stages: BTreeMap<FunnelStage, usize>,
    },
    Conversations {
        conversations: Vec<ConversationSummary>,
    },
    Telegram {
        sessions: Vec<TelegramSession>,
        notifications: Vec<AdminNotification>,
        metrics: Option<ChannelMetrics>,
        bots: Option<BotInfo>,
    },
    Quotes {
        quotes: Vec<Quote>,
        total_amount: f64,
        accepted_amount: f64,
    },
    Meetings {
        meetings: Vec<Meeting>,
        upcoming: usize,
        today: usize,
        overdue: usize,
    },
    Campaigns {
        campaigns: Vec<Campaign>,
        recipients: u64,
    },
    Agents {
        agents: Vec<AgentCard>,
        logs: Vec<AgentLog>,
        total_processed: u64,
        active: usize,
    },
    Analytics {
        series: Vec<DayPoint>,
        content_kinds: BTreeMap<String, u64>,
        sources: BTreeMap<String, u64>,
        stages: BTreeMap<FunnelStage, u64>,
        kpis: Option<AnalyticsReport>,
    },
    Settings {
        company: Option<Company>,
        notifications: BTreeMap<String, bool>,
        bots: Option<BotInfo>,
    },
}

async fn mounted<V: View>(mut view: V) -> Result<V> {
    view.mount().await?;
    view.teardown();
    Ok(view)
}

/// Mount the page for `route` once and capture its state
pub async fn cmd_show(app: &App, route: Route, options: &ShowOptions) -> Result<PageSnapshot> {
    let route = match route {
        Route::Login => Route::Dashboard,
        other => other,
    };
    app.require_session(route)?;
    let ctx = app.context().clone();
    let search = options.search.clone().unwrap_or_default();
    let label = format!("Loading {}", route);

    with_spinner(&label, async move {
        let snapshot = match route {
            Route::Dashboard | Route::Login => {
                let view = mounted(DashboardView::new(ctx)).await?;
                PageSnapshot::Dashboard {
                    kpis: view.snapshot().cloned(),
                    metrics: view.metrics().cloned(),
                    bots: view.bots().cloned(),
                    funnel: view.funnel().clone(),
                    urgent: view.urgent().to_vec(),
                    activity: view.activity().to_vec(),
                    alerts: view.alerts().to_vec(),
                }
            }
            Route::Leads => {
                let mut view = LeadsView::new(ctx);
                view.mount().await?;
                view.set_filters(LeadFilters {
                    status: options.lead_status,
                    stage: options.lead_stage,
                    priority: options.lead_priority,
                    source: None,
                    search: options.search.clone(),
                })
                .await?;
                view.teardown();
                PageSnapshot::Leads {
                    total: view.total(),
                    leads: view.leads().to_vec(),
                    stages: view.stage_counts(),
                }
            }
            Route::Conversations => {
                let mut view = mounted(ConversationsView::new(ctx)).await?;
                view.set_search(&search);
                PageSnapshot::Conversations {
                    conversations: view.visible().into_iter().cloned().collect(),
                }
            }
            Route::Telegram => {
                let view = mounted(TelegramView::new(ctx)).await?;
                PageSnapshot::Telegram {
                    sessions: view.sessions().to_vec(),
                    notifications: view.notifications().to_vec(),
                    metrics: view.metrics().cloned(),
                    bots: view.bots().cloned(),
                }
            }
            Route::Quotes => {
                let mut view = mounted(QuotesView::new(ctx)).await?;
                view.set_status_filter(options.quote_status).await?;
                view.set_search(&search);
                PageSnapshot::Quotes {
                    quotes: view.visible().into_iter().cloned().collect(),
                    total_amount: view.total_amount(),
                    accepted_amount: view.accepted_amount(),
                }
            }
            Route::Meetings => {
                let mut view = mounted(MeetingsView::new(ctx)).await?;
                view.set_filters(MeetingFilters {
                    status: options.meeting_status,
                    kind: options.meeting_kind,
                })
                .await?;
                view.set_search(&search);
                PageSnapshot::Meetings {
                    meetings: view.visible().into_iter().cloned().collect(),
                    upcoming: view.upcoming(),
                    today: view.today(),
                    overdue: view.overdue(),
                }
            }
            Route::Campaigns => {
                let view = mounted(CampaignsView::new(ctx)).await?;
                PageSnapshot::Campaigns {
                    campaigns: view.campaigns().to_vec(),
                    recipients: view.recipients(),
                }
            }
            Route::Agents => {
                let view = mounted(AgentsView::new(ctx)).await?;
                PageSnapshot::Agents {
                    agents: view.agents().to_vec(),
                    logs: view.logs().to_vec(),
                    total_processed: view.total_processed(),
                    active: view.active_count(),
                }
            }
            Route::Analytics => {
                let view = mounted(AnalyticsView::new(ctx)).await?;
                PageSnapshot::Analytics {
                    series: view.series().to_vec(),
                    content_kinds: view.content_kinds().clone(),
                    sources: view.sources().clone(),
                    stages: view.stages().clone(),
                    kpis: view.kpis().cloned(),
                }
            }
            Route::Settings => {
                let view = mounted(SettingsView::new(ctx)).await?;
                PageSnapshot::Settings {
                    company: view.company().cloned(),
                    notifications: view
                        .prefs()
                        .iter()
                        .map(|(key, on)| (key.to_string(), on))
                        .collect(),
                    bots: view.bots().cloned(),
                }
            }
        };
        Ok(snapshot)
    })
    .await
}

fn when(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("-")
}

fn print_bots(bots: Option<&BotInfo>) {
    let Some(bots) = bots else {
        println!("  Bots: unavailable");
        return;
    };
    for (label, bot) in [("Leads bot", &bots.bot_leads), ("Admin bot", &bots.bot_admin)] {
        match bot {
            Some(bot) => println!(
                "  {}: @{} ({})",
                label,
                or_dash(bot.username.as_deref()),
                if bot.has_webhook() {
                    "webhook set"
                } else {
                    "no webhook"
                }
            ),
            None => println!("  {}: not configured", label),
        }
    }
}

fn print_activity(logs: &[AgentLog]) {
    if logs.is_empty() {
        println!("  No agent activity yet.");
        return;
    }
    for log in logs {
        let marker = if log.success { "✓" } else { "✗" };
        println!(
            "  {} {} {} · {}",
            marker,
            when(log.created_at),
            log.agent,
            log.action
        );
    }
}

/// Print a page snapshot to console
pub fn print_page(snapshot: &PageSnapshot) {
    match snapshot {
        PageSnapshot::Dashboard {
            kpis,
            metrics,
            bots,
            funnel,
            urgent,
            activity,
            alerts,
        } => {
            println!("\n📊 Dashboard\n");
            match kpis {
                Some(k) => {
                    println!("  Leads: {} total, {} today", k.leads_total.unwrap_or(0), k.leads_hoy.unwrap_or(0));
                    println!("  Conversion rate: {:.1}%", k.tasa_conversion.unwrap_or(0.0));
                    println!("  Pending quotes: {}", k.cotizaciones_pendientes.unwrap_or(0));
                    println!("  Upcoming meetings: {}", k.reuniones_proximas.unwrap_or(0));
                }
                None => println!("  KPIs unavailable"),
            }
            if let Some(m) = metrics {
                println!("  Active chats: {}, messages today: {}", m.total_chats_activos.unwrap_or(0), m.mensajes_hoy.unwrap_or(0));
            }
            print_bots(bots.as_ref());
            println!("\nFunnel:");
            for (stage, count) in funnel {
                println!("  {:<10} {}", stage.as_str(), count);
            }
            println!("\nUrgent leads:");
            if urgent.is_empty() {
                println!("  None. Every high-priority lead was contacted recently.");
            }
            for lead in urgent {
                println!(
                    "  • {} ({}), last contact {}",
                    lead.name,
                    or_dash(lead.company.as_deref()),
                    when(lead.last_contact_at)
                );
            }
            if !alerts.is_empty() {
                println!("\nAlerts:");
                for alert in alerts {
                    println!("  [{}] {}", alert.priority, alert.message);
                }
            }
            println!("\nRecent activity:");
            print_activity(activity);
        }
        PageSnapshot::Leads {
            total,
            leads,
            stages,
        } => {
            println!("\n👥 Leads ({} matching)\n", total);
            let summary: Vec<String> = stages
                .iter()
                .map(|(stage, count)| format!("{} {}", stage.as_str(), count))
                .collect();
            println!("  {}", summary.join(" · "));
            if leads.is_empty() {
                println!("  No leads found.");
            }
            for lead in leads {
                println!(
                    "  {} {} [{} / {} / {}] {}",
                    lead.id,
                    lead.name,
                    lead.stage,
                    lead.status,
                    lead.priority,
                    or_dash(lead.company.as_deref())
                );
            }
        }
        PageSnapshot::Conversations { conversations } => {
            println!("\n💬 Conversations\n");
            if conversations.is_empty() {
                println!("  No conversations yet.");
            }
            for c in conversations {
                let voice = if c.has_voice { " 🎤" } else { "" };
                println!("  {} {}{} · {}", c.lead_id, c.name, voice, when(c.last_message_at));
                println!(
                    "    {}: {}",
                    or_dash(c.last_agent.as_deref()),
                    or_dash(c.last_message.as_deref())
                );
            }
        }
        PageSnapshot::Telegram {
            sessions,
            notifications,
            metrics,
            bots,
        } => {
            println!("\n🤖 Telegram\n");
            print_bots(bots.as_ref());
            if let Some(m) = metrics {
                println!(
                    "  Leads captured: {}, voice notes: {}",
                    m.leads_captados_telegram.unwrap_or(0),
                    m.notas_de_voz_procesadas.unwrap_or(0)
                );
            }
            println!("\nActive sessions:");
            if sessions.is_empty() {
                println!("  No active sessions.");
            }
            for s in sessions {
                let name = s.lead.as_ref().and_then(|l| l.name.as_deref());
                println!(
                    "  {} {} [{}] · {}",
                    s.id,
                    or_dash(name),
                    s.bot_state,
                    when(s.last_message_at)
                );
            }
            println!("\nAdmin notifications:");
            for n in notifications {
                let marker = if n.delivered { "✓" } else { "·" };
                println!("  {} {} {}", marker, n.kind, n.message);
            }
        }
        PageSnapshot::Quotes {
            quotes,
            total_amount,
            accepted_amount,
        } => {
            println!("\n📄 Quotes\n");
            println!("  Total: {:.2} · Accepted: {:.2}", total_amount, accepted_amount);
            if quotes.is_empty() {
                println!("  No quotes found.");
            }
            for q in quotes {
                let lead = q.lead.as_ref().and_then(|l| l.name.as_deref());
                println!(
                    "  {} {} [{}] {:.2} · {}",
                    q.id,
                    q.title,
                    q.status,
                    q.amount,
                    or_dash(lead)
                );
            }
        }
        PageSnapshot::Meetings {
            meetings,
            upcoming,
            today,
            overdue,
        } => {
            println!("\n📅 Meetings\n");
            println!("  Upcoming: {} · Today: {} · Overdue: {}", upcoming, today, overdue);
            if meetings.is_empty() {
                println!("  No meetings found.");
            }
            for m in meetings {
                let lead = m.lead.as_ref().and_then(|l| l.name.as_deref());
                println!(
                    "  {} {} {} [{} / {}] · {}",
                    m.id,
                    when(m.scheduled_at),
                    m.title,
                    m.kind,
                    m.status,
                    or_dash(lead)
                );
            }
        }
        PageSnapshot::Campaigns {
            campaigns,
            recipients,
        } => {
            println!("\n📣 Campaigns\n");
            println!("  Estimated recipients (all leads): {}", recipients);
            if campaigns.is_empty() {
                println!("  No campaigns yet.");
            }
            for c in campaigns {
                println!(
                    "  {} {} [{} / {}] sent {}",
                    c.id,
                    c.name,
                    c.channel,
                    c.status,
                    c.sent_count.unwrap_or(0)
                );
            }
        }
        PageSnapshot::Agents {
            agents,
            logs,
            total_processed,
            active,
        } => {
            println!("\n🧠 Agents ({} active, {} messages processed)\n", active, total_processed);
            for a in agents {
                println!(
                    "  {} [{}] processed {} · {}",
                    a.name,
                    a.state,
                    a.processed.unwrap_or(0),
                    or_dash(a.last_activity.as_deref())
                );
                println!("    {}", a.description);
            }
            println!("\nActivity log:");
            print_activity(logs);
        }
        PageSnapshot::Analytics {
            series,
            content_kinds,
            sources,
            stages,
            kpis,
        } => {
            println!("\n📈 Analytics\n");
            if let Some(headline) = kpis.as_ref().and_then(|k| k.headline()) {
                println!("  {}\n", headline);
            }
            println!("  {:<12} {:>8} {:>6}", "day", "messages", "leads");
            for point in series {
                println!("  {:<12} {:>8} {:>6}", point.date, point.messages, point.leads);
            }
            println!("\nContent kinds:");
            for (kind, count) in content_kinds {
                println!("  {:<12} {}", kind, count);
            }
            println!("\nLead sources:");
            for (source, count) in sources {
                println!("  {:<12} {}", source, count);
            }
            println!("\nFunnel stages:");
            for (stage, count) in stages {
                println!("  {:<12} {}", stage.as_str(), count);
            }
        }
        PageSnapshot::Settings {
            company,
            notifications,
            bots,
        } => {
            println!("\n⚙️  Settings\n");
            match company {
                Some(c) => {
                    println!("  Company: {}", c.name);
                    println!("  Sector: {}", or_dash(c.sector.as_deref()));
                    println!("  Email: {}", or_dash(c.email.as_deref()));
                    println!("  Phone: {}", or_dash(c.phone.as_deref()));
                    println!("  Website: {}", or_dash(c.website.as_deref()));
                }
                None => println!("  No company profile yet."),
            }
            println!("\nNotifications:");
            for (key, on) in notifications {
                println!("  [{}] {}", if *on { "x" } else { " " }, key);
            }
            println!();
            print_bots(bots.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_serializes_with_page_tag() {
        let mut funnel = BTreeMap::new();
        funnel.insert(FunnelStage::Interest, 3);
        let snapshot = PageSnapshot::Analytics {
            series: Vec::new(),
            content_kinds: BTreeMap::new(),
            sources: BTreeMap::new(),
            stages: funnel,
            kpis: None,
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["page"], "analytics");
        assert_eq!(value["stages"], json!({"interes": 3}));
    }
}
