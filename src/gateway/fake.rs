//! Scripted gateway for store and shell tests

use super::types::*;
use super::Gateway;
use crate::error::{Error, Result};
use crate::models::CampaignChannel;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

type CallHook = Box<dyn Fn(&str) + Send + Sync>;

/// Gateway whose answers are set by the test
pub struct ScriptedGateway {
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
    rejection: Mutex<Option<String>>,
    pub login_outcome: Mutex<LoginOutcome>,
    pub chat_reply: Mutex<ChatReply>,
    pub preview: Mutex<Option<CampaignPreview>>,
    pub report: Mutex<AnalyticsReport>,
    pub statuses: Mutex<BTreeMap<String, AgentStatusPatch>>,
    pub snapshot: Mutex<DashboardSnapshot>,
    pub bots: Mutex<BotInfo>,
    hook: Mutex<Option<CallHook>>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            rejection: Mutex::new(None),
            login_outcome: Mutex::new(LoginOutcome::Unrecognized),
            chat_reply: Mutex::new(ChatReply::default()),
            preview: Mutex::new(None),
            report: Mutex::new(AnalyticsReport::default()),
            statuses: Mutex::new(BTreeMap::new()),
            snapshot: Mutex::new(DashboardSnapshot::default()),
            bots: Mutex::new(BotInfo::default()),
            hook: Mutex::new(None),
        }
    }
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails as if the network were down
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every call fails with an explicit failure envelope
    pub fn reject_with(&self, message: Option<&str>) {
        *self.rejection.lock().unwrap() = message.map(str::to_string);
    }

    /// Run `hook` with the operation name on every successful call
    pub fn on_call(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == op).count()
    }

    fn enter(&self, op: &str) -> Result<()> {
        self.calls.lock().unwrap().push(op.to_string());
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "backend unreachable",
            )));
        }
        if let Some(message) = self.rejection.lock().unwrap().clone() {
            return Err(Error::Rejected(message));
        }
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(op);
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn health(&self) -> Result<HealthReport> {
        self.enter("health")?;
        Ok(HealthReport {
            status: Some("healthy".to_string()),
            services: BTreeMap::new(),
        })
    }

    async fn login(&self, _email: &str, _password: &str) -> Result<LoginOutcome> {
        self.enter("login")?;
        Ok(self.login_outcome.lock().unwrap().clone())
    }

    async fn chat(&self, _lead_id: &str, _message: &str, _session_id: &str) -> Result<ChatReply> {
        self.enter("chat")?;
        Ok(self.chat_reply.lock().unwrap().clone())
    }

    async fn send_channel_message(
        &self,
        _chat_id: &str,
        _message: &str,
        _lead_id: &str,
    ) -> Result<Ack> {
        self.enter("send_channel_message")?;
        Ok(Ack::default())
    }

    async fn send_campaign(
        &self,
        _channel: CampaignChannel,
        _message: &str,
        _audience: &CampaignAudience,
    ) -> Result<Ack> {
        self.enter("send_campaign")?;
        Ok(Ack::default())
    }

    async fn preview_campaign(&self, _message: &str) -> Result<CampaignPreview> {
        self.enter("preview_campaign")?;
        Ok(self.preview.lock().unwrap().clone().unwrap_or_default())
    }

    async fn run_analytics(&self, _kind: &str) -> Result<AnalyticsReport> {
        self.enter("run_analytics")?;
        Ok(self.report.lock().unwrap().clone())
    }

    async fn agent_status(&self) -> Result<BTreeMap<String, AgentStatusPatch>> {
        self.enter("agent_status")?;
        Ok(self.statuses.lock().unwrap().clone())
    }

    async fn dashboard(&self) -> Result<DashboardSnapshot> {
        self.enter("dashboard")?;
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn alerts(&self) -> Result<Vec<Alert>> {
        self.enter("alerts")?;
        Ok(self.report.lock().unwrap().alerts.clone())
    }

    async fn channel_metrics(&self) -> Result<ChannelMetrics> {
        self.enter("channel_metrics")?;
        Ok(ChannelMetrics::default())
    }

    async fn bot_info(&self) -> Result<BotInfo> {
        self.enter("bot_info")?;
        Ok(self.bots.lock().unwrap().clone())
    }

    async fn setup_webhooks(&self, target: WebhookTarget) -> Result<Ack> {
        let op = match target {
            WebhookTarget::Both => "setup_webhooks",
            WebhookTarget::Leads => "setup_leads_webhook",
            WebhookTarget::Admin => "setup_admin_webhook",
        };
        self.enter(op)?;
        Ok(Ack::default())
    }
}
