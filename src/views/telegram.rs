//! Bot channel page: active sessions, admin notifications, bot control

use super::thread::{MessageThread, SendOutcome, SendVia};
use super::{View, ViewContext};
use crate::error::Result;
use crate::gateway::{Ack, BotInfo, ChannelMetrics, WebhookTarget};
use crate::live::{InsertPolicy, LiveCollection};
use crate::models::{AdminNotification, BotState, Record, TelegramSession};
use crate::notify::{Notice, NoticeLevel};
use crate::realtime::{ChangeKind, RawChange, SubscriptionKey, SubscriptionSet};
use crate::rest::Query;
use async_trait::async_trait;
use tracing::{info, warn};

/// Messages shown for the selected chat
const CHANNEL_THREAD_LIMIT: usize = 80;

const SLOT_SESSIONS: &str = "sessions";
const SLOT_NOTIFICATIONS: &str = "notifications";
const SLOT_THREAD: &str = "thread";

pub struct TelegramView {
    ctx: ViewContext,
    subs: SubscriptionSet,
    sessions: LiveCollection<TelegramSession>,
    notifications: LiveCollection<AdminNotification>,
    thread: MessageThread,
    metrics: Option<ChannelMetrics>,
    bots: Option<BotInfo>,
}

impl TelegramView {
    pub fn new(ctx: ViewContext) -> Self {
        let sessions = Query::table(TelegramSession::TABLE)
            .embed("lead", "leads", &["nombre", "empresa_nombre", "etapa_funnel"])
            .eq("estado_bot", BotState::Active)
            .order("ultimo_mensaje_at", false)
            .limit(ctx.limits.sessions);
        let notifications = Query::table(AdminNotification::TABLE)
            .order("created_at", false)
            .limit(ctx.limits.notifications);
        Self {
            subs: ctx.subscriptions("telegram"),
            sessions: LiveCollection::new(sessions, InsertPolicy::Prepend {
                cap: ctx.limits.sessions,
            }),
            notifications: LiveCollection::new(notifications, InsertPolicy::Prepend {
                cap: ctx.limits.notifications,
            }),
            thread: MessageThread::new(CHANNEL_THREAD_LIMIT),
            metrics: None,
            bots: None,
            ctx,
        }
    }

    pub fn sessions(&self) -> &[TelegramSession] {
        self.sessions.items()
    }

    pub fn notifications(&self) -> &[AdminNotification] {
        self.notifications.items()
    }

    pub fn selected(&self) -> Option<&TelegramSession> {
        self.sessions.selected()
    }

    pub fn thread(&self) -> &MessageThread {
        &self.thread
    }

    pub fn metrics(&self) -> Option<&ChannelMetrics> {
        self.metrics.as_ref()
    }

    pub fn bots(&self) -> Option<&BotInfo> {
        self.bots.as_ref()
    }

    /// Read bot metrics and bot info concurrently; failures leave them empty
    pub async fn refresh_backend(&mut self) {
        let gateway = self.ctx.gateway.clone();
        let (metrics, bots) = futures::join!(gateway.channel_metrics(), gateway.bot_info());
        match metrics {
            Ok(metrics) => self.metrics = Some(metrics),
            Err(e) => warn!("bot metrics unavailable: {}", e),
        }
        match bots {
            Ok(bots) => self.bots = Some(bots),
            Err(e) => warn!("bot info unavailable: {}", e),
        }
    }

    pub async fn refresh_sessions(&mut self) -> Result<()> {
        if let Err(e) = self.sessions.refresh(self.ctx.data.as_ref()).await {
            self.ctx.notifier.error("Could not load bot sessions", &e);
            return Err(e);
        }
        Ok(())
    }

    /// Open the chat of a session and follow its lead's new messages
    pub async fn select(&mut self, session_id: Option<&str>) -> Result<()> {
        self.sessions.select(session_id);
        let lead_id = self.sessions.selected().and_then(|s| s.lead_id.clone());
        self.thread.bind(lead_id.as_deref());
        let Some(lead_id) = lead_id else {
            self.subs.release(SLOT_THREAD);
            return Ok(());
        };
        self.subs
            .ensure(SLOT_THREAD, MessageThread::subscription_for(&lead_id))
            .await;
        if let Err(e) = self.thread.load(&self.ctx).await {
            self.ctx.notifier.error("Could not load the chat", &e);
            return Err(e);
        }
        Ok(())
    }

    /// Send through the bot to the selected session's chat
    pub async fn send(&mut self, text: &str) -> SendOutcome {
        let Some(chat_id) = self.selected().and_then(|s| s.telegram_chat_id.clone()) else {
            return SendOutcome::Skipped;
        };
        let outcome = self
            .thread
            .send(&self.ctx, text, SendVia::Channel { chat_id })
            .await;
        if matches!(outcome, SendOutcome::Delivered { .. }) {
            self.ctx.notifier.success("Message sent to the lead's chat");
        }
        outcome
    }

    /// Point the bot webhooks at the backend
    pub async fn setup_webhooks(&mut self, target: WebhookTarget) -> Option<Ack> {
        match self.ctx.gateway.setup_webhooks(target).await {
            Ok(ack) => {
                info!("webhook setup ({:?}) acknowledged", target);
                let mut notice = Notice::new(NoticeLevel::Success, "Webhook configured");
                if let Some(url) = ack.webhook_url() {
                    notice = notice.with_detail(url);
                }
                self.ctx.notifier.notify(notice);
                self.refresh_backend().await;
                Some(ack)
            }
            Err(e) => {
                self.ctx.notifier.error("Could not configure the webhook", &e);
                None
            }
        }
    }
}

#[async_trait]
impl View for TelegramView {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn mount(&mut self) -> Result<()> {
        self.subs
            .ensure(SLOT_SESSIONS, SubscriptionKey::for_record::<TelegramSession>())
            .await;
        self.subs
            .ensure(
                SLOT_NOTIFICATIONS,
                SubscriptionKey::for_record::<AdminNotification>().only(ChangeKind::Insert),
            )
            .await;

        self.refresh_backend().await;
        self.refresh_sessions().await?;
        if let Err(e) = self.notifications.refresh(self.ctx.data.as_ref()).await {
            self.ctx.notifier.error("Could not load notifications", &e);
            return Err(e);
        }
        Ok(())
    }

    async fn on_change(&mut self, slot: &'static str, change: RawChange) -> Result<()> {
        match slot {
            // Session rows carry an embedded lead, so any change re-reads the list
            SLOT_SESSIONS => self.refresh_sessions().await,
            SLOT_NOTIFICATIONS => self.notifications.apply_raw(&change).map(|_| ()),
            SLOT_THREAD => self.thread.apply_raw(&change).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn subscriptions_mut(&mut self) -> &mut SubscriptionSet {
        &mut self.subs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::BotDescriptor;
    use crate::rest::DataSource;
    use crate::views::testkit::Harness;
    use serde_json::json;

    fn seed(h: &Harness) {
        h.data.seed(
            "leads",
            vec![
                json!({"id": "L1", "nombre": "Ana", "empresa_nombre": "Acme", "etapa_funnel": "deseo"}),
                json!({"id": "L2", "nombre": "Beto"}),
            ],
        );
        h.data.seed(
            "telegram_bot_sessions",
            vec![
                json!({"id": "S1", "telegram_chat_id": 111, "lead_id": "L1", "estado_bot": "activo", "ultimo_mensaje_at": "2026-03-01T10:00:00Z"}),
                json!({"id": "S2", "telegram_chat_id": 222, "lead_id": "L2", "estado_bot": "activo", "ultimo_mensaje_at": "2026-03-01T12:00:00Z"}),
                json!({"id": "S3", "telegram_chat_id": 333, "lead_id": "L2", "estado_bot": "cerrado", "ultimo_mensaje_at": "2026-03-01T13:00:00Z"}),
            ],
        );
        h.data.seed(
            "conversations",
            vec![json!({"id": "m1", "lead_id": "L1", "content": "hola", "created_at": "2026-03-01T10:00:00Z"})],
        );
        h.data.seed(
            "notificaciones_admin",
            vec![json!({"id": "N1", "tipo": "nuevo_lead", "mensaje": "Nuevo lead: Ana", "created_at": "2026-03-01T09:00:00Z"})],
        );
    }

    #[tokio::test]
    async fn test_mount_reads_sessions_with_embedded_lead() {
        let h = Harness::new();
        seed(&h);
        *h.gateway.bots.lock().unwrap() = BotInfo {
            bot_leads: Some(BotDescriptor {
                username: Some("orbita_leads_bot".into()),
                ..Default::default()
            }),
            bot_admin: None,
        };

        let mut view = TelegramView::new(h.ctx.clone());
        view.mount().await.unwrap();

        let ids: Vec<&str> = view.sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["S2", "S1"]);
        let lead = view.sessions()[1].lead.as_ref().unwrap();
        assert_eq!(lead.company.as_deref(), Some("Acme"));
        assert_eq!(view.notifications().len(), 1);
        assert!(view.metrics().is_some());
        assert_eq!(
            view.bots().and_then(|b| b.bot_leads.as_ref()).and_then(|b| b.username.as_deref()),
            Some("orbita_leads_bot")
        );
    }

    #[tokio::test]
    async fn test_session_change_refetches_list() {
        let h = Harness::new();
        seed(&h);
        let mut view = TelegramView::new(h.ctx.clone());
        view.mount().await.unwrap();
        let before = h.data.select_count();

        h.data
            .update("telegram_bot_sessions", "S1", json!({"ultimo_mensaje_at": "2026-03-01T14:00:00Z"}))
            .await
            .unwrap();
        view.sync().await;

        assert_eq!(h.data.select_count(), before + 1);
        assert_eq!(view.sessions()[0].id, "S1");
    }

    #[tokio::test]
    async fn test_notification_feed_prepends() {
        let h = Harness::new();
        seed(&h);
        let mut view = TelegramView::new(h.ctx.clone());
        view.mount().await.unwrap();

        h.feed.publish(RawChange::insert(
            "notificaciones_admin",
            json!({"id": "N2", "tipo": "alerta", "mensaje": "Lead sin respuesta"}),
        ));
        view.sync().await;
        assert_eq!(view.notifications()[0].id, "N2");
    }

    #[tokio::test]
    async fn test_send_to_selected_chat() {
        let h = Harness::new();
        seed(&h);
        let mut view = TelegramView::new(h.ctx.clone());
        view.mount().await.unwrap();

        assert_eq!(view.send("hola").await, SendOutcome::Skipped);
        view.select(Some("S1")).await.unwrap();
        assert_eq!(view.thread().messages().len(), 1);
        assert!(matches!(view.send("hola").await, SendOutcome::Delivered { .. }));
        assert_eq!(h.gateway.call_count("send_channel_message"), 1);
    }

    #[tokio::test]
    async fn test_webhook_setup_targets_and_failure() {
        let h = Harness::new();
        let mut view = TelegramView::new(h.ctx.clone());

        assert!(view.setup_webhooks(WebhookTarget::Admin).await.is_some());
        assert_eq!(h.gateway.call_count("setup_admin_webhook"), 1);

        h.gateway.set_offline(true);
        assert!(view.setup_webhooks(WebhookTarget::Both).await.is_none());
        assert_eq!(h.notifier.count(NoticeLevel::Error), 1);
        assert_eq!(h.notifier.count(NoticeLevel::Success), 1);
    }
}
