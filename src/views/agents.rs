//! Agents page: the fixed agent roster merged with live backend status

use super::{View, ViewContext};
use crate::error::Result;
use crate::gateway::AgentStatusPatch;
use crate::live::{InsertPolicy, LiveCollection};
use crate::models::{AgentLog, AgentState, Record};
use crate::realtime::{ChangeKind, RawChange, SubscriptionKey, SubscriptionSet};
use crate::rest::Query;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// How often a watching client re-reads agent status
pub const STATUS_POLL_SECS: u64 = 15;

const SLOT_LOGS: &str = "logs";

const ROSTER: [(&str, &str); 5] = [
    (
        "Director ORBITA",
        "Orchestrates the other agents and routes each lead through the funnel",
    ),
    (
        "Agente Telegram",
        "Handles inbound and outbound bot conversations",
    ),
    (
        "Agente Calificador",
        "Scores leads from their answers and behaviour",
    ),
    (
        "Agente Cotizador",
        "Drafts quotes from the lead's requirements",
    ),
    (
        "Agente Scheduler",
        "Books and confirms meetings and sends reminders",
    ),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub state: AgentState,
    pub processed: Option<u64>,
    pub last_activity: Option<String>,
}

impl AgentCard {
    /// Key the backend uses for this agent in its status map
    pub fn status_key(&self) -> String {
        self.name
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Lowercase fragment that identifies this agent in log entries
    fn log_tag(&self) -> String {
        let lower = self.name.to_lowercase();
        lower
            .split(' ')
            .nth(1)
            .filter(|word| !word.is_empty())
            .map(str::to_string)
            .unwrap_or(lower)
    }

    pub fn wrote(&self, log: &AgentLog) -> bool {
        log.agent.to_lowercase().contains(&self.log_tag())
    }

    fn merge(&mut self, patch: &AgentStatusPatch) {
        if let Some(state) = patch.state {
            self.state = state;
        }
        if patch.processed.is_some() {
            self.processed = patch.processed;
        }
        if patch.last_activity.is_some() {
            self.last_activity = patch.last_activity.clone();
        }
    }
}

/// The five agents, all active until the backend says otherwise
pub fn roster() -> Vec<AgentCard> {
    ROSTER
        .iter()
        .map(|(name, description)| AgentCard {
            name: name.to_string(),
            description: description.to_string(),
            state: AgentState::Active,
            processed: None,
            last_activity: None,
        })
        .collect()
}

pub struct AgentsView {
    ctx: ViewContext,
    subs: SubscriptionSet,
    agents: Vec<AgentCard>,
    logs: LiveCollection<AgentLog>,
}

impl AgentsView {
    pub fn new(ctx: ViewContext) -> Self {
        let limit = ctx.limits.activity;
        let query = Query::table(AgentLog::TABLE)
            .order("created_at", false)
            .limit(limit);
        Self {
            subs: ctx.subscriptions("agents"),
            agents: roster(),
            logs: LiveCollection::new(query, InsertPolicy::Prepend { cap: limit }),
            ctx,
        }
    }

    pub fn agents(&self) -> &[AgentCard] {
        &self.agents
    }

    pub fn logs(&self) -> &[AgentLog] {
        self.logs.items()
    }

    /// Log entries written by the named agent
    pub fn logs_for(&self, name: &str) -> Vec<&AgentLog> {
        let Some(agent) = self.agents.iter().find(|a| a.name.eq_ignore_ascii_case(name)) else {
            return Vec::new();
        };
        self.logs.items().iter().filter(|l| agent.wrote(l)).collect()
    }

    /// The roster agent a log entry belongs to, if any
    pub fn author_of(&self, log: &AgentLog) -> Option<&AgentCard> {
        self.agents.iter().find(|a| a.wrote(log))
    }

    pub fn total_processed(&self) -> u64 {
        self.agents.iter().filter_map(|a| a.processed).sum()
    }

    pub fn active_count(&self) -> usize {
        self.agents
            .iter()
            .filter(|a| a.state == AgentState::Active)
            .count()
    }

    /// Merge the backend's status map into the roster
    ///
    /// Unreachable backends leave the roster as it was; no notice is raised.
    pub async fn refresh_status(&mut self) -> bool {
        let statuses: BTreeMap<String, AgentStatusPatch> =
            match self.ctx.gateway.agent_status().await {
                Ok(statuses) => statuses,
                Err(e) => {
                    debug!("agent status unavailable: {}", e);
                    return false;
                }
            };
        for agent in &mut self.agents {
            if let Some(patch) = statuses.get(&agent.status_key()) {
                agent.merge(patch);
            }
        }
        true
    }

    pub async fn refresh_logs(&mut self) -> Result<()> {
        if let Err(e) = self.logs.refresh(self.ctx.data.as_ref()).await {
            self.ctx.notifier.error("Could not load agent activity", &e);
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl View for AgentsView {
    fn name(&self) -> &'static str {
        "agents"
    }

    async fn mount(&mut self) -> Result<()> {
        self.subs
            .ensure(
                SLOT_LOGS,
                SubscriptionKey::for_record::<AgentLog>().only(ChangeKind::Insert),
            )
            .await;
        self.refresh_status().await;
        self.refresh_logs().await
    }

    async fn on_change(&mut self, slot: &'static str, change: RawChange) -> Result<()> {
        if slot == SLOT_LOGS {
            self.logs.apply_raw(&change)?;
        }
        Ok(())
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(Duration::from_secs(STATUS_POLL_SECS))
    }

    async fn poll(&mut self) {
        self.refresh_status().await;
    }

    fn subscriptions_mut(&mut self) -> &mut SubscriptionSet {
        &mut self.subs
    }
}
