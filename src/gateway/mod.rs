//! Remote data gateway
//!
//! Typed intents (login, chat, campaign send, analytics...) translated into
//! authenticated calls against the backend API. The gateway holds no state
//! between calls and never retries; callers decide how to react to failures.

pub mod envelope;
mod http;
pub mod types;

#[cfg(test)]
pub mod fake;

#[cfg(test)]
pub use fake::ScriptedGateway;

pub use envelope::{decode_value, Envelope};
pub use http::HttpGateway;
pub use types::*;

use crate::error::Result;
use crate::models::CampaignChannel;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Operations the dashboard asks of the backend API
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Lightweight reachability probe
    async fn health(&self) -> Result<HealthReport>;

    /// Exchange credentials for a session token
    ///
    /// Returns `Err` only for transport failures; every response body is
    /// classified into a [`LoginOutcome`].
    async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome>;

    /// Send a message to the agent pipeline on behalf of a lead
    async fn chat(&self, lead_id: &str, message: &str, session_id: &str) -> Result<ChatReply>;

    /// Send a message to a lead through the bot channel
    async fn send_channel_message(&self, chat_id: &str, message: &str, lead_id: &str)
        -> Result<Ack>;

    async fn send_campaign(
        &self,
        channel: CampaignChannel,
        message: &str,
        audience: &CampaignAudience,
    ) -> Result<Ack>;

    async fn preview_campaign(&self, message: &str) -> Result<CampaignPreview>;

    /// Run the analytics agent (`kind` is e.g. `diario`)
    async fn run_analytics(&self, kind: &str) -> Result<AnalyticsReport>;

    /// Live agent status keyed by normalized agent name
    async fn agent_status(&self) -> Result<BTreeMap<String, AgentStatusPatch>>;

    async fn dashboard(&self) -> Result<DashboardSnapshot>;

    async fn alerts(&self) -> Result<Vec<Alert>>;

    async fn channel_metrics(&self) -> Result<ChannelMetrics>;

    async fn bot_info(&self) -> Result<BotInfo>;

    async fn setup_webhooks(&self, target: WebhookTarget) -> Result<Ack>;
}
