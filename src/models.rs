//! Row types for the tables the dashboard reads
//!
//! Column names on the wire are the backend's (Spanish) names; the Rust side
//! uses English field names. Every enumerated column decodes leniently: an
//! unrecognised or missing value becomes `Unknown` instead of failing the row.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A row type that lives in a named table and is identified by `id`
pub trait Record: Clone + Send + Sync + DeserializeOwned + 'static {
    /// Table the rows are read from and the change feed is keyed on
    const TABLE: &'static str;

    fn id(&self) -> &str;

    /// Decode a row delivered as JSON
    fn from_row(row: Value) -> Result<Self> {
        Ok(serde_json::from_value(row)?)
    }
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident => $wire:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub enum $name {
            $($variant,)+
            #[default]
            Unknown,
        }

        impl $name {
            /// Every known value, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Value as stored by the backend
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                    $name::Unknown => "unknown",
                }
            }

            /// Parse a stored value, mapping anything unrecognised to `Unknown`
            pub fn parse_lenient(value: &str) -> Self {
                match value.trim().to_lowercase().as_str() {
                    $($wire $(| $alias)* => $name::$variant,)+
                    _ => $name::Unknown,
                }
            }

            pub fn is_known(&self) -> bool {
                !matches!(self, $name::Unknown)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match Self::parse_lenient(s) {
                    $name::Unknown => Err(Error::InvalidInput(format!(
                        "unknown {} value: {}",
                        stringify!($name),
                        s
                    ))),
                    known => Ok(known),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let raw = Option::<String>::deserialize(deserializer)?;
                Ok(raw.map(|r| Self::parse_lenient(&r)).unwrap_or_default())
            }
        }
    };
}

wire_enum! {
    /// Funnel stage, ordered from first touch to client
    FunnelStage {
        Attention => "atencion" | "attention",
        Interest => "interes" | "interest",
        Desire => "deseo" | "desire",
        Action => "accion" | "action",
        Client => "cliente" | "client",
    }
}

impl FunnelStage {
    /// Stages shown in the funnel widgets (clients are counted separately)
    pub const PIPELINE: [FunnelStage; 4] = [
        FunnelStage::Attention,
        FunnelStage::Interest,
        FunnelStage::Desire,
        FunnelStage::Action,
    ];
}

wire_enum! {
    /// Lead lifecycle status
    LeadStatus {
        New => "nuevo" | "new",
        Contacted => "contactado" | "contacted",
        Quoted => "cotizado" | "quoted",
        MeetingScheduled => "reunion_agendada" | "meeting-scheduled" | "meeting_scheduled",
        Converted => "convertido" | "converted",
        Inactive => "inactivo" | "inactive",
    }
}

wire_enum! {
    Priority {
        High => "alta" | "high",
        Medium => "media" | "medium",
        Low => "baja" | "low",
    }
}

wire_enum! {
    /// How a lead reached us
    LeadSource {
        Telegram => "telegram" | "bot",
        Manual => "manual",
        Form => "formulario" | "form",
        Referral => "referido" | "referral",
    }
}

wire_enum! {
    MessageRole {
        User => "user",
        Agent => "assistant" | "agent",
        Admin => "admin",
    }
}

wire_enum! {
    ContentKind {
        Text => "text",
        Voice => "voice",
        Image => "image",
        Document => "document",
    }
}

wire_enum! {
    BotState {
        Active => "activo" | "active",
        Inactive => "inactivo" | "inactive",
    }
}

wire_enum! {
    CampaignChannel {
        Telegram => "telegram",
        Email => "email",
        Both => "ambos" | "both",
    }
}

wire_enum! {
    CampaignStatus {
        Draft => "borrador" | "draft",
        Active => "activa" | "active",
        Sent => "enviada" | "sent",
        Paused => "pausada" | "paused",
    }
}

wire_enum! {
    QuoteStatus {
        Pending => "pendiente" | "pending",
        Sent => "enviada" | "sent",
        Accepted => "aceptada" | "accepted",
        Rejected => "rechazada" | "rejected",
        Expired => "vencida" | "expired",
    }
}

wire_enum! {
    MeetingType {
        Discovery => "discovery",
        Demo => "demo",
        FollowUp => "seguimiento" | "follow-up" | "follow_up",
        Closing => "cierre" | "closing",
    }
}

wire_enum! {
    MeetingStatus {
        Pending => "pendiente" | "pending",
        Confirmed => "confirmada" | "confirmed",
        Completed => "realizada" | "completed",
        Cancelled => "cancelada" | "cancelled",
        NoShow => "no_show" | "no-show",
    }
}

wire_enum! {
    /// Runtime state reported for an AI agent
    AgentState {
        Active => "activo" | "active",
        Processing => "procesando" | "processing",
        Inactive => "inactivo" | "inactive",
    }
}

wire_enum! {
    NotificationKind {
        NewLead => "nuevo_lead",
        QuoteAccepted => "cotizacion_aceptada",
        MeetingBooked => "reunion_agendada",
        Alert => "alerta",
    }
}

/// Lenient timestamp decoding: RFC 3339, or a naive ISO timestamp taken as UTC
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }
}

/// Accept string or numeric identifiers
fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

fn deserialize_opt_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Ok(None),
    }
}

/// Treat an explicit `null` the same as a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Lead name and company embedded in related rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadSummary {
    #[serde(rename = "nombre", default)]
    pub name: Option<String>,
    #[serde(rename = "empresa_nombre", default)]
    pub company: Option<String>,
    #[serde(rename = "etapa_funnel", default)]
    pub stage: FunnelStage,
}

/// A prospect tracked through the funnel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(rename = "nombre", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "telefono", default)]
    pub phone: Option<String>,
    #[serde(rename = "empresa_nombre", default)]
    pub company: Option<String>,
    #[serde(rename = "cargo", default)]
    pub job_title: Option<String>,
    #[serde(rename = "servicio_interes", default)]
    pub service_interest: Option<String>,
    #[serde(rename = "presupuesto_estimado", default)]
    pub estimated_budget: Option<String>,
    #[serde(rename = "etapa_funnel", default)]
    pub stage: FunnelStage,
    #[serde(rename = "estado", default)]
    pub status: LeadStatus,
    #[serde(rename = "prioridad", default)]
    pub priority: Priority,
    #[serde(rename = "fuente", default)]
    pub source: LeadSource,
    #[serde(rename = "etiquetas", default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(rename = "notas", default)]
    pub notes: Option<String>,
    #[serde(rename = "ultimo_contacto", default, with = "timestamp")]
    pub last_contact_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub telegram_chat_id: Option<String>,
    #[serde(default)]
    pub telegram_username: Option<String>,
}

impl Record for Lead {
    const TABLE: &'static str = "leads";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Fields for a manually entered lead
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewLead {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "telefono", skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(rename = "empresa_nombre", skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(rename = "cargo", skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(rename = "servicio_interes", skip_serializing_if = "Option::is_none")]
    pub service_interest: Option<String>,
    #[serde(rename = "presupuesto_estimado", skip_serializing_if = "Option::is_none")]
    pub estimated_budget: Option<String>,
    #[serde(rename = "prioridad")]
    pub priority: Priority,
    #[serde(rename = "fuente")]
    pub source: LeadSource,
    #[serde(rename = "notas", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NewLead {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: Priority::Medium,
            source: LeadSource::Manual,
            ..Default::default()
        }
    }

    /// Row to insert: manual leads always start at the top of the funnel
    pub fn to_row(&self) -> Result<Value> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("lead name is required".to_string()));
        }
        let mut row = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut row {
            map.insert(
                "etapa_funnel".to_string(),
                Value::String(FunnelStage::Attention.as_str().to_string()),
            );
            map.insert(
                "estado".to_string(),
                Value::String(LeadStatus::New.as_str().to_string()),
            );
        }
        Ok(row)
    }
}

/// One message in a lead's conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub lead_id: Option<String>,
    #[serde(default)]
    pub role: MessageRole,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default)]
    pub content_type: ContentKind,
    #[serde(rename = "transcripcion_voz", default)]
    pub transcription: Option<String>,
    #[serde(rename = "agente", default)]
    pub agent: Option<String>,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for Message {
    const TABLE: &'static str = "conversations";

    fn id(&self) -> &str {
        &self.id
    }
}

/// An active bot-mediated chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramSession {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub telegram_chat_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub lead_id: Option<String>,
    #[serde(rename = "estado_bot", default)]
    pub bot_state: BotState,
    #[serde(rename = "ultimo_mensaje_at", default, with = "timestamp")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lead: Option<LeadSummary>,
}

impl Record for TelegramSession {
    const TABLE: &'static str = "telegram_bot_sessions";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Upper bound on a campaign message body
pub const CAMPAIGN_MAX_CHARS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(rename = "nombre", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "tipo", default)]
    pub channel: CampaignChannel,
    #[serde(rename = "mensaje", default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(rename = "estado", default)]
    pub status: CampaignStatus,
    #[serde(rename = "destinatarios_count", default)]
    pub recipient_estimate: Option<u64>,
    #[serde(rename = "enviados", default)]
    pub sent_count: Option<u64>,
    #[serde(rename = "fecha_envio", default, with = "timestamp")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for Campaign {
    const TABLE: &'static str = "campanas";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub lead_id: Option<String>,
    #[serde(rename = "titulo", default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(rename = "descripcion", default)]
    pub description: Option<String>,
    #[serde(rename = "monto", default, deserialize_with = "null_as_default")]
    pub amount: f64,
    #[serde(rename = "estado", default)]
    pub status: QuoteStatus,
    #[serde(rename = "enviada_por_telegram", default, deserialize_with = "null_as_default")]
    pub sent_via_channel: bool,
    #[serde(rename = "fecha_envio", default, with = "timestamp")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lead: Option<LeadSummary>,
}

impl Record for Quote {
    const TABLE: &'static str = "cotizaciones";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub lead_id: Option<String>,
    #[serde(rename = "titulo", default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(rename = "descripcion", default)]
    pub description: Option<String>,
    #[serde(rename = "fecha_hora", default, with = "timestamp")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(rename = "duracion_minutos", default)]
    pub duration_minutes: Option<u32>,
    #[serde(rename = "tipo", default)]
    pub kind: MeetingType,
    #[serde(rename = "estado", default)]
    pub status: MeetingStatus,
    #[serde(rename = "confirmada_por_telegram", default, deserialize_with = "null_as_default")]
    pub confirmed_via_channel: bool,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lead: Option<LeadSummary>,
}

impl Record for Meeting {
    const TABLE: &'static str = "reuniones";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Append-only audit entry written by the AI agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLog {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(rename = "agente", default, deserialize_with = "null_as_default")]
    pub agent: String,
    #[serde(rename = "accion", default, deserialize_with = "null_as_default")]
    pub action: String,
    #[serde(rename = "resultado", default)]
    pub result: Option<Value>,
    #[serde(rename = "exitoso", default = "default_true", deserialize_with = "bool_or_true")]
    pub success: bool,
    #[serde(rename = "duracion_ms", default)]
    pub duration_ms: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub telegram_chat_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub lead_id: Option<String>,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

fn bool_or_true<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

impl Record for AgentLog {
    const TABLE: &'static str = "agent_logs";

    fn id(&self) -> &str {
        &self.id
    }
}

/// A system event queued for the admin bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminNotification {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(rename = "tipo", default)]
    pub kind: NotificationKind,
    #[serde(rename = "mensaje", default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(rename = "enviada", default, deserialize_with = "null_as_default")]
    pub delivered: bool,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub lead_id: Option<String>,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for AdminNotification {
    const TABLE: &'static str = "notificaciones_admin";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Company profile shown on the settings page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Company {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(rename = "nombre", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(rename = "descripcion", default)]
    pub description: Option<String>,
    #[serde(rename = "telefono", default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "sitio_web", default)]
    pub website: Option<String>,
}

impl Record for Company {
    const TABLE: &'static str = "empresas";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Decode rows, dropping (and logging) any that do not fit the row type
pub fn decode_rows<T: Record>(rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match T::from_row(row) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Skipping undecodable {} row: {}", T::TABLE, e);
                None
            }
        })
        .collect()
}
