//! Request and response payloads for the backend API

use crate::models::{AgentState, FunnelStage, LeadStatus, Priority};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Result of a login attempt, classified from the response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The backend issued a credential
    Granted { token: String },
    /// The backend explicitly refused the credentials
    Denied { message: String },
    /// The body carried neither a credential nor an explicit refusal
    Unrecognized,
}

impl LoginOutcome {
    /// Classify a login response body
    ///
    /// A credential may sit at the top level (`access_token` or `token`) or
    /// under `data`. Only `success: false` counts as a refusal.
    pub fn from_body(body: &Value) -> Self {
        let token_in = |v: &Value| {
            ["access_token", "token"].iter().find_map(|key| {
                v.get(*key)
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
            })
        };

        if let Some(token) = token_in(body).or_else(|| body.get("data").and_then(token_in)) {
            return LoginOutcome::Granted { token };
        }

        let message_of = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);

        if body.get("success").and_then(Value::as_bool) == Some(false) {
            return LoginOutcome::Denied {
                message: message_of("message")
                    .or_else(|| message_of("detail"))
                    .unwrap_or_else(|| "Invalid credentials".to_string()),
            };
        }
        LoginOutcome::Unrecognized
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub mensaje: &'a str,
    pub session_id: &'a str,
}

/// Answer produced by the agent pipeline for one chat turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    #[serde(rename = "respuesta_final", alias = "respuesta", default)]
    pub reply: Option<String>,
    #[serde(rename = "agente", default)]
    pub agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChannelMessageRequest<'a> {
    pub chat_id: &'a str,
    pub mensaje: &'a str,
    pub lead_id: &'a str,
}

/// Audience filter for a campaign; `None` means "all"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignAudience {
    #[serde(rename = "estado", skip_serializing_if = "Option::is_none", default)]
    pub status: Option<LeadStatus>,
    #[serde(rename = "etapa", skip_serializing_if = "Option::is_none", default)]
    pub stage: Option<FunnelStage>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CampaignSendRequest<'a> {
    pub tipo: &'a str,
    pub mensaje: &'a str,
    pub filtros: &'a CampaignAudience,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CampaignPreviewRequest<'a> {
    pub mensaje: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignPreview {
    #[serde(default)]
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AnalyticsRequest<'a> {
    pub tipo_analisis: &'a str,
}

/// Alert raised by the analytics agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "tipo", default)]
    pub kind: Option<String>,
    #[serde(rename = "mensaje", default)]
    pub message: String,
    #[serde(rename = "prioridad", default)]
    pub priority: Priority,
    #[serde(rename = "lead_ids_afectados", default)]
    pub affected_leads: Vec<String>,
    #[serde(rename = "accion_recomendada", default)]
    pub recommended_action: Option<String>,
}

/// Output of an analytics agent run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    #[serde(rename = "alertas", default)]
    pub alerts: Vec<Alert>,
    #[serde(rename = "resumen_ejecutivo", default)]
    pub executive_summary: Option<String>,
    #[serde(rename = "resumen", default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub report: Option<String>,
}

impl AnalyticsReport {
    /// Best available prose summary
    pub fn headline(&self) -> Option<&str> {
        self.executive_summary
            .as_deref()
            .or(self.summary.as_deref())
            .or(self.report.as_deref())
    }
}

/// Headline KPIs computed by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    #[serde(default)]
    pub leads_total: Option<u64>,
    #[serde(default)]
    pub leads_hoy: Option<u64>,
    #[serde(default)]
    pub tasa_conversion: Option<f64>,
    #[serde(default)]
    pub cotizaciones_pendientes: Option<u64>,
    #[serde(default)]
    pub reuniones_proximas: Option<u64>,
}

/// Bot channel activity counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetrics {
    #[serde(default)]
    pub total_chats_activos: Option<u64>,
    #[serde(default)]
    pub mensajes_hoy: Option<u64>,
    #[serde(default)]
    pub leads_captados_telegram: Option<u64>,
    #[serde(default)]
    pub notas_de_voz_procesadas: Option<u64>,
    #[serde(default)]
    pub cotizaciones_enviadas_telegram: Option<u64>,
    #[serde(default)]
    pub reuniones_confirmadas_telegram: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotDescriptor {
    #[serde(default, alias = "bot_username")]
    pub username: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub pending_updates: Option<u64>,
}

impl BotDescriptor {
    pub fn has_webhook(&self) -> bool {
        self.webhook_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// Configuration of the lead-facing and admin bots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotInfo {
    #[serde(default)]
    pub bot_leads: Option<BotDescriptor>,
    #[serde(default)]
    pub bot_admin: Option<BotDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub services: BTreeMap<String, String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status.as_deref() == Some("healthy")
    }
}

/// Live fields the backend reports for one agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusPatch {
    #[serde(rename = "estado", default)]
    pub state: Option<AgentState>,
    #[serde(rename = "mensajes_procesados", default)]
    pub processed: Option<u64>,
    #[serde(rename = "ultima_actividad", default)]
    pub last_activity: Option<String>,
}

/// Which bot(s) a webhook setup call configures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WebhookTarget {
    #[default]
    Both,
    Leads,
    Admin,
}

impl WebhookTarget {
    pub(crate) fn path(&self) -> &'static str {
        match self {
            WebhookTarget::Both => "/api/v1/telegram/setup-webhooks",
            WebhookTarget::Leads => "/api/v1/telegram/setup-leads-webhook",
            WebhookTarget::Admin => "/api/v1/telegram/setup-admin-webhook",
        }
    }
}

impl std::str::FromStr for WebhookTarget {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_lowercase().as_str() {
            "both" | "all" => Ok(WebhookTarget::Both),
            "leads" => Ok(WebhookTarget::Leads),
            "admin" => Ok(WebhookTarget::Admin),
            _ => Err(crate::error::Error::InvalidInput(format!(
                "unknown webhook target: {}",
                s
            ))),
        }
    }
}

/// Acknowledgement of a fire-and-forget call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ack {
    pub message: Option<String>,
    pub data: Option<Value>,
}

impl Ack {
    /// Webhook URL reported by a setup call, when present
    pub fn webhook_url(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.get("webhook_url"))
            .and_then(Value::as_str)
    }
}
