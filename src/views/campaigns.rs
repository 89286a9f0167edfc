//! Campaigns page: broadcast history and the compose form

use super::{View, ViewContext};
use crate::error::{Error, Result};
use crate::gateway::CampaignAudience;
use crate::live::{InsertPolicy, LiveCollection};
use crate::models::{
    Campaign, CampaignChannel, CampaignStatus, Lead, Record, CAMPAIGN_MAX_CHARS,
};
use crate::realtime::{RawChange, SubscriptionKey, SubscriptionSet};
use crate::rest::Query;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

/// Name given to drafts saved without one
pub const UNTITLED_DRAFT: &str = "Borrador sin nombre";

const SLOT_CAMPAIGNS: &str = "campaigns";

/// The compose form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignDraft {
    pub name: String,
    pub channel: CampaignChannel,
    pub message: String,
    pub audience: CampaignAudience,
}

impl Default for CampaignDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            channel: CampaignChannel::Telegram,
            message: String::new(),
            audience: CampaignAudience::default(),
        }
    }
}

impl CampaignDraft {
    /// Replace the body, cut to the channel limit
    pub fn set_message(&mut self, message: &str) {
        self.message = message.chars().take(CAMPAIGN_MAX_CHARS).collect();
    }

    pub fn char_count(&self) -> usize {
        self.message.chars().count()
    }

    fn check_sendable(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.message.trim().is_empty() {
            return Err(Error::InvalidInput(
                "campaign name and message are required".to_string(),
            ));
        }
        if self.char_count() > CAMPAIGN_MAX_CHARS {
            return Err(Error::InvalidInput(format!(
                "campaign message exceeds {} characters",
                CAMPAIGN_MAX_CHARS
            )));
        }
        Ok(())
    }
}

pub struct CampaignsView {
    ctx: ViewContext,
    subs: SubscriptionSet,
    list: LiveCollection<Campaign>,
    draft: CampaignDraft,
    recipients: u64,
    preview: Option<String>,
}

impl CampaignsView {
    pub fn new(ctx: ViewContext) -> Self {
        let query = Query::table(Campaign::TABLE)
            .order("created_at", false)
            .limit(ctx.limits.campaigns);
        Self {
            subs: ctx.subscriptions("campaigns"),
            list: LiveCollection::new(query, InsertPolicy::Prepend {
                cap: ctx.limits.campaigns,
            }),
            ctx,
            draft: CampaignDraft::default(),
            recipients: 0,
            preview: None,
        }
    }

    pub fn campaigns(&self) -> &[Campaign] {
        self.list.items()
    }

    pub fn draft(&self) -> &CampaignDraft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut CampaignDraft {
        &mut self.draft
    }

    /// Leads the current audience filters would reach
    pub fn recipients(&self) -> u64 {
        self.recipients
    }

    pub fn preview(&self) -> Option<&str> {
        self.preview.as_deref()
    }

    pub fn count_by_status(&self, status: CampaignStatus) -> usize {
        self.list.count_where(|c| c.status == status)
    }

    pub async fn refresh(&mut self) -> Result<()> {
        if let Err(e) = self.list.refresh(self.ctx.data.as_ref()).await {
            self.ctx.notifier.error("Could not load campaigns", &e);
            return Err(e);
        }
        Ok(())
    }

    /// Change who the campaign targets and recount the reach
    pub async fn set_audience(&mut self, audience: CampaignAudience) -> u64 {
        self.draft.audience = audience;
        let query = Query::table(Lead::TABLE)
            .eq_opt("estado", self.draft.audience.status)
            .eq_opt("etapa_funnel", self.draft.audience.stage);
        match self.ctx.data.count(&query).await {
            Ok(count) => self.recipients = count,
            Err(e) => {
                debug!("recipient count failed: {}", e);
                self.recipients = 0;
            }
        }
        self.recipients
    }

    /// Personalised preview of the draft; the raw message when the call fails
    pub async fn render_preview(&mut self) -> Option<&str> {
        let message = self.draft.message.trim().to_string();
        if message.is_empty() {
            return None;
        }
        let rendered = match self.ctx.gateway.preview_campaign(&message).await {
            Ok(preview) => preview.preview.filter(|p| !p.is_empty()),
            Err(e) => {
                debug!("campaign preview failed: {}", e);
                None
            }
        };
        self.preview = Some(rendered.unwrap_or(message));
        self.preview.as_deref()
    }

    /// Broadcast the draft; the form resets on success
    pub async fn send(&mut self) -> bool {
        if let Err(e) = self.draft.check_sendable() {
            self.ctx.notifier.error("Fill in the campaign name and message", &e);
            return false;
        }
        let sent = self
            .ctx
            .gateway
            .send_campaign(self.draft.channel, &self.draft.message, &self.draft.audience)
            .await;
        if let Err(e) = sent {
            self.ctx.notifier.error("Could not send the campaign", &e);
            return false;
        }
        info!("campaign '{}' sent to ~{} leads", self.draft.name, self.recipients);
        self.ctx.notifier.success(&format!(
            "Campaign \"{}\" sent to {} leads",
            self.draft.name, self.recipients
        ));
        self.reset_form();
        let _ = self.refresh().await;
        true
    }

    /// Store the draft without sending it
    pub async fn save_draft(&mut self) -> Option<Campaign> {
        let name = match self.draft.name.trim() {
            "" => UNTITLED_DRAFT.to_string(),
            name => name.to_string(),
        };
        let row = json!({
            "nombre": name,
            "tipo": self.draft.channel,
            "mensaje": self.draft.message,
            "estado": CampaignStatus::Draft,
            "destinatarios_count": self.recipients,
        });
        let stored = self.ctx.data.insert(Campaign::TABLE, row).await;
        let campaign = match stored.and_then(|row| {
            let _ = self.list.apply_raw(&RawChange::insert(Campaign::TABLE, row.clone()));
            Campaign::from_row(row)
        }) {
            Ok(campaign) => campaign,
            Err(e) => {
                self.ctx.notifier.error("Could not save the draft", &e);
                return None;
            }
        };
        self.ctx.notifier.success("Draft saved");
        self.reset_form();
        Some(campaign)
    }

    fn reset_form(&mut self) {
        self.draft = CampaignDraft::default();
        self.preview = None;
    }
}

#[async_trait]
impl View for CampaignsView {
    fn name(&self) -> &'static str {
        "campaigns"
    }

    async fn mount(&mut self) -> Result<()> {
        self.subs
            .ensure(SLOT_CAMPAIGNS, SubscriptionKey::for_record::<Campaign>())
            .await;
        let audience = self.draft.audience.clone();
        self.set_audience(audience).await;
        self.refresh().await
    }

    async fn on_change(&mut self, slot: &'static str, change: RawChange) -> Result<()> {
        if slot == SLOT_CAMPAIGNS {
            self.list.apply_raw(&change)?;
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
    use crate::gateway::CampaignPreview;
    use crate::models::{FunnelStage, LeadStatus};
    use crate::notify::NoticeLevel;
    use crate::views::testkit::Harness;

    fn seed(h: &Harness) {
        h.data.seed(
            "leads",
            vec![
                json!({"id": "L1", "estado": "nuevo", "etapa_funnel": "atencion"}),
                json!({"id": "L2", "estado": "nuevo", "etapa_funnel": "interes"}),
                json!({"id": "L3", "estado": "contactado", "etapa_funnel": "interes"}),
            ],
        );
        h.data.seed(
            "campanas",
            vec![
                json!({"id": "C1", "nombre": "Lanzamiento", "tipo": "telegram", "estado": "enviada", "created_at": "2026-02-01T00:00:00Z"}),
                json!({"id": "C2", "nombre": "Promo", "tipo": "email", "estado": "borrador", "created_at": "2026-02-02T00:00:00Z"}),
            ],
        );
    }

    #[tokio::test]
    async fn test_audience_changes_recount() {
        let h = Harness::new();
        seed(&h);
        let mut view = CampaignsView::new(h.ctx.clone());
        view.mount().await.unwrap();
        assert_eq!(view.recipients(), 3);
        assert_eq!(view.campaigns()[0].id, "C2");
        assert_eq!(view.count_by_status(CampaignStatus::Sent), 1);

        let reach = view
            .set_audience(CampaignAudience {
                status: Some(LeadStatus::New),
                stage: Some(FunnelStage::Interest),
            })
            .await;
        assert_eq!(reach, 1);
    }

    #[tokio::test]
    async fn test_message_is_bounded() {
        let mut draft = CampaignDraft::default();
        draft.set_message(&"a".repeat(CAMPAIGN_MAX_CHARS + 10));
        assert_eq!(draft.char_count(), CAMPAIGN_MAX_CHARS);
    }

    #[tokio::test]
    async fn test_preview_falls_back_to_raw_message() {
        let h = Harness::new();
        let mut view = CampaignsView::new(h.ctx.clone());
        view.draft_mut().set_message("Hola {nombre}");

        *h.gateway.preview.lock().unwrap() = Some(CampaignPreview {
            preview: Some("Hola Ana".to_string()),
        });
        assert_eq!(view.render_preview().await, Some("Hola Ana"));

        h.gateway.set_offline(true);
        assert_eq!(view.render_preview().await, Some("Hola {nombre}"));
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_send_requires_name_and_message() {
        let h = Harness::new();
        seed(&h);
        let mut view = CampaignsView::new(h.ctx.clone());
        view.mount().await.unwrap();

        view.draft_mut().set_message("Hola");
        assert!(!view.send().await);
        assert_eq!(h.gateway.call_count("send_campaign"), 0);
        assert_eq!(h.notifier.count(NoticeLevel::Error), 1);

        view.draft_mut().name = "Black Friday".to_string();
        assert!(view.send().await);
        assert_eq!(h.gateway.call_count("send_campaign"), 1);
        assert!(view.draft().message.is_empty());
    }

    #[tokio::test]
    async fn test_save_draft_defaults_name() {
        let h = Harness::new().without_realtime();
        seed(&h);
        let mut view = CampaignsView::new(h.ctx.clone());
        view.mount().await.unwrap();

        view.draft_mut().set_message("Pronto");
        let saved = view.save_draft().await.unwrap();
        assert_eq!(saved.name, UNTITLED_DRAFT);
        assert_eq!(saved.status, CampaignStatus::Draft);
        assert_eq!(saved.recipient_estimate, Some(3));
        assert_eq!(view.campaigns()[0].id, saved.id);
        assert_eq!(view.campaigns().len(), 3);
    }
}
