//! One-shot page actions: lead edits, messages, campaigns, status changes
//!
//! Each command drives the same store method the page would. Failures are
//! reported through the notifier by the store, so these return `None` or
//! `false` rather than an error for them; `Err` is kept for the session
//! guard and for failures outside the store.

use crate::app::App;
use crate::error::{Error, Result};
use crate::gateway::{Ack, Alert, CampaignAudience, WebhookTarget};
use crate::models::{
    Campaign, CampaignChannel, Company, FunnelStage, Lead, LeadStatus, MeetingStatus, NewLead,
    Priority, QuoteStatus,
};
use crate::progress::with_spinner;
use crate::shell::Route;
use crate::views::{
    AnalyticsView, CampaignsView, ConversationsView, LeadsView, MeetingsView, QuotesView,
    SendOutcome, SettingsView, TelegramView,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// A single field change on a lead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadChange {
    Stage(FunnelStage),
    Status(LeadStatus),
    Priority(Priority),
}

pub async fn cmd_lead_create(app: &App, lead: NewLead) -> Result<Option<Lead>> {
    app.require_session(Route::Leads)?;
    let mut view = LeadsView::new(app.context().clone());
    Ok(view.create(lead).await)
}

pub async fn cmd_lead_update(app: &App, lead_id: &str, change: LeadChange) -> Result<Option<Lead>> {
    app.require_session(Route::Leads)?;
    let mut view = LeadsView::new(app.context().clone());
    let updated = match change {
        LeadChange::Stage(stage) => view.set_stage(lead_id, stage).await,
        LeadChange::Status(status) => view.set_status(lead_id, status).await,
        LeadChange::Priority(priority) => view.set_priority(lead_id, priority).await,
    };
    Ok(updated)
}

pub fn print_lead(lead: &Lead) {
    println!("✓ {} {}", lead.id, lead.name);
    println!("  Stage: {} · Status: {} · Priority: {}", lead.stage, lead.status, lead.priority);
    if let Some(company) = &lead.company {
        println!("  Company: {}", company);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SendReport {
    pub lead_id: String,
    pub delivered: bool,
    pub reply: Option<String>,
    pub agent: Option<String>,
}

/// Send a message for a lead, to the agent pipeline or straight to the bot chat
pub async fn cmd_send(app: &App, lead_id: &str, text: &str, via_channel: bool) -> Result<SendReport> {
    app.require_session(Route::Conversations)?;
    let mut view = ConversationsView::new(app.context().clone());
    if let Err(e) = view.load().await {
        tracing::debug!("conversation list unavailable: {}", e);
    }
    view.select(Some(lead_id)).await?;
    let outcome = with_spinner("Processing", view.send(text, via_channel)).await;
    view.select(None).await?;

    let (delivered, reply, agent) = match outcome {
        SendOutcome::Delivered { reply } => {
            let reply = reply.unwrap_or_default();
            (true, reply.reply, reply.agent)
        }
        SendOutcome::Skipped => {
            return Err(Error::InvalidInput("nothing to send".to_string()));
        }
        SendOutcome::Failed => (false, None, None),
    };
    Ok(SendReport {
        lead_id: lead_id.to_string(),
        delivered,
        reply,
        agent,
    })
}

pub fn print_send(report: &SendReport) {
    if !report.delivered {
        return;
    }
    match &report.reply {
        Some(reply) => {
            println!("{}:", report.agent.as_deref().unwrap_or("agent"));
            println!("{}", reply);
        }
        None => println!("✓ Message sent for lead {}", report.lead_id),
    }
}

/// What to do with a composed campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignAction {
    Preview,
    Draft,
    Send,
}

#[derive(Debug, Clone)]
pub struct CampaignOptions {
    pub name: String,
    pub channel: CampaignChannel,
    pub message: String,
    pub audience: CampaignAudience,
    pub action: CampaignAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub recipients: u64,
    pub characters: usize,
    pub preview: Option<String>,
    pub draft: Option<Campaign>,
    pub sent: bool,
}

pub async fn cmd_campaign(app: &App, options: CampaignOptions) -> Result<CampaignReport> {
    app.require_session(Route::Campaigns)?;
    let mut view = CampaignsView::new(app.context().clone());
    {
        let draft = view.draft_mut();
        draft.name = options.name;
        draft.channel = options.channel;
        draft.set_message(&options.message);
    }
    let recipients = view.set_audience(options.audience).await;
    let characters = view.draft().char_count();

    let mut report = CampaignReport {
        recipients,
        characters,
        preview: None,
        draft: None,
        sent: false,
    };
    match options.action {
        CampaignAction::Preview => {
            report.preview = view.render_preview().await.map(str::to_string);
        }
        CampaignAction::Draft => report.draft = view.save_draft().await,
        CampaignAction::Send => {
            report.sent = with_spinner("Sending campaign", view.send()).await;
        }
    }
    Ok(report)
}

pub fn print_campaign(report: &CampaignReport) {
    println!("  Recipients: ~{} leads", report.recipients);
    println!("  Length: {} characters", report.characters);
    if let Some(preview) = &report.preview {
        println!("\nPreview:\n{}", preview);
    }
    if let Some(draft) = &report.draft {
        println!("✓ Draft {} saved as \"{}\"", draft.id, draft.name);
    }
}

pub async fn cmd_quote_status(app: &App, quote_id: &str, status: QuoteStatus) -> Result<bool> {
    app.require_session(Route::Quotes)?;
    let mut view = QuotesView::new(app.context().clone());
    Ok(view.update_status(quote_id, status).await)
}

pub async fn cmd_meeting_status(
    app: &App,
    meeting_id: &str,
    status: MeetingStatus,
) -> Result<bool> {
    app.require_session(Route::Meetings)?;
    let mut view = MeetingsView::new(app.context().clone());
    Ok(view.update_status(meeting_id, status).await)
}

pub async fn cmd_webhooks(app: &App, target: WebhookTarget) -> Result<Option<Ack>> {
    app.require_session(Route::Telegram)?;
    let mut view = TelegramView::new(app.context().clone());
    Ok(view.setup_webhooks(target).await)
}

/// Read the notification toggles, flipping `toggle` first when given
pub async fn cmd_prefs(app: &App, toggle: Option<&str>) -> Result<Option<BTreeMap<String, bool>>> {
    app.require_session(Route::Settings)?;
    let mut view = SettingsView::new(app.context().clone());
    view.load_prefs().await;
    if let Some(key) = toggle {
        if view.toggle_pref(key).await.is_none() {
            return Ok(None);
        }
    }
    Ok(Some(
        view.prefs()
            .iter()
            .map(|(key, on)| (key.to_string(), on))
            .collect(),
    ))
}

pub fn print_prefs(prefs: &BTreeMap<String, bool>) {
    println!("\n🔔 Notifications\n");
    for (key, on) in prefs {
        println!("  [{}] {}", if *on { "x" } else { " " }, key);
    }
}

/// Edits applied to the company profile; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct CompanyEdit {
    pub name: Option<String>,
    pub sector: Option<String>,
    pub description: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
}

impl CompanyEdit {
    fn apply(self, mut company: Company) -> Company {
        if let Some(name) = self.name {
            company.name = name;
        }
        let fields = [
            (self.sector, &mut company.sector),
            (self.description, &mut company.description),
            (self.phone, &mut company.phone),
            (self.email, &mut company.email),
            (self.website, &mut company.website),
        ];
        for (edit, slot) in fields {
            if let Some(value) = edit {
                *slot = Some(value);
            }
        }
        company
    }
}

pub async fn cmd_company(app: &App, edit: CompanyEdit) -> Result<Option<Company>> {
    app.require_session(Route::Settings)?;
    let mut view = SettingsView::new(app.context().clone());
    view.load_company().await?;
    let Some(current) = view.company().cloned() else {
        return Err(Error::NotFound("company profile".to_string()));
    };
    if !view.save_company(edit.apply(current)).await {
        return Ok(None);
    }
    Ok(view.company().cloned())
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub report: Option<String>,
    pub alerts: Vec<Alert>,
}

/// Ask the analytics agent for a fresh report
pub async fn cmd_analyze(app: &App) -> Result<Option<AnalysisReport>> {
    app.require_session(Route::Analytics)?;
    let mut view = AnalyticsView::new(app.context().clone());
    let Some(text) = with_spinner("Analyzing", view.run()).await.map(str::to_string) else {
        return Ok(None);
    };
    let alerts = view.kpis().map(|k| k.alerts.clone()).unwrap_or_default();
    Ok(Some(AnalysisReport {
        report: Some(text),
        alerts,
    }))
}

pub fn print_analysis(report: &AnalysisReport) {
    if let Some(text) = &report.report {
        println!("\n{}\n", text);
    }
    for alert in &report.alerts {
        println!("  [{}] {}", alert.priority, alert.message);
        if let Some(action) = &alert.recommended_action {
            println!("      → {}", action);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_edit_keeps_unset_fields() {
        let company = Company {
            id: "7".to_string(),
            name: "Orbita Labs".to_string(),
            sector: Some("software".to_string()),
            email: Some("hola@orbita.example".to_string()),
            ..Company::default()
        };
        let edit = CompanyEdit {
            website: Some("https://orbita.example".to_string()),
            ..CompanyEdit::default()
        };
        let updated = edit.apply(company);

        assert_eq!(updated.name, "Orbita Labs");
        assert_eq!(updated.sector.as_deref(), Some("software"));
        assert_eq!(updated.website.as_deref(), Some("https://orbita.example"));
    }
}
