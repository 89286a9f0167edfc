//! Conversations page: leads that have messages, newest activity first

use super::thread::{MessageThread, SendOutcome, SendVia};
use super::{text_matches, View, ViewContext};
use crate::error::Result;
use crate::models::{timestamp, ContentKind, Lead, LeadSource, Message, Record};
use crate::realtime::{ChangeKind, RawChange, SubscriptionKey, SubscriptionSet};
use crate::rest::{fetch_records, Query};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Characters of the last message kept for the list preview
pub const PREVIEW_CHARS: usize = 60;

const SLOT_ACTIVITY: &str = "activity";
const SLOT_THREAD: &str = "thread";

/// Columns read to build the list; no id needed
#[derive(Debug, Deserialize)]
struct MessageDigest {
    #[serde(default)]
    lead_id: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    content_type: ContentKind,
    #[serde(rename = "agente", default)]
    agent: Option<String>,
    #[serde(default, with = "timestamp")]
    created_at: Option<DateTime<Utc>>,
}

/// One lead in the conversation list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    pub lead_id: String,
    pub name: String,
    pub company: Option<String>,
    pub source: LeadSource,
    pub telegram_chat_id: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_agent: Option<String>,
    pub has_voice: bool,
}

impl ConversationSummary {
    fn new(lead: Lead) -> Self {
        Self {
            lead_id: lead.id,
            name: lead.name,
            company: lead.company,
            source: lead.source,
            telegram_chat_id: lead.telegram_chat_id,
            last_message: None,
            last_message_at: None,
            last_agent: None,
            has_voice: false,
        }
    }

    /// Fold a message into the summary; `latest` marks the newest one
    fn absorb(
        &mut self,
        content: Option<&str>,
        kind: ContentKind,
        agent: Option<&str>,
        at: Option<DateTime<Utc>>,
        latest: bool,
    ) {
        if latest {
            self.last_message = content.map(preview);
            self.last_message_at = at;
            self.last_agent = agent.map(str::to_string);
        }
        if kind == ContentKind::Voice {
            self.has_voice = true;
        }
    }
}

fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

pub struct ConversationsView {
    ctx: ViewContext,
    subs: SubscriptionSet,
    summaries: Vec<ConversationSummary>,
    thread: MessageThread,
    selected: Option<String>,
    search: String,
}

impl ConversationsView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            subs: ctx.subscriptions("conversations"),
            thread: MessageThread::new(ctx.limits.thread),
            ctx,
            summaries: Vec::new(),
            selected: None,
            search: String::new(),
        }
    }

    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    pub fn set_search(&mut self, search: &str) {
        self.search = search.to_string();
    }

    /// Summaries matching the local search box
    pub fn visible(&self) -> Vec<&ConversationSummary> {
        self.summaries
            .iter()
            .filter(|s| text_matches(&self.search, &[Some(s.name.as_str()), s.company.as_deref()]))
            .collect()
    }

    pub fn selected(&self) -> Option<&ConversationSummary> {
        let id = self.selected.as_deref()?;
        self.summaries.iter().find(|s| s.lead_id == id)
    }

    pub fn thread(&self) -> &MessageThread {
        &self.thread
    }

    /// Rebuild the list from the latest messages
    pub async fn load(&mut self) -> Result<()> {
        let digests = self
            .ctx
            .data
            .select(
                &Query::table(Message::TABLE)
                    .select(&["lead_id", "content", "content_type", "agente", "created_at"])
                    .order("created_at", false),
            )
            .await;
        let digests: Vec<MessageDigest> = match digests {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| serde_json::from_value(row).ok())
                .collect(),
            Err(e) => {
                self.ctx.notifier.error("Could not load conversations", &e);
                return Err(e);
            }
        };

        let mut order: Vec<String> = Vec::new();
        for digest in &digests {
            if let Some(id) = &digest.lead_id {
                if !order.contains(id) {
                    order.push(id.clone());
                }
            }
        }
        order.truncate(self.ctx.limits.conversation_leads);
        if order.is_empty() {
            self.summaries.clear();
            return Ok(());
        }

        let leads = fetch_records::<Lead>(
            self.ctx.data.as_ref(),
            &Query::table(Lead::TABLE)
                .select(&["id", "nombre", "empresa_nombre", "fuente", "telegram_chat_id"])
                .in_list("id", &order),
        )
        .await;
        let leads = match leads {
            Ok(leads) => leads,
            Err(e) => {
                self.ctx.notifier.error("Could not load conversations", &e);
                return Err(e);
            }
        };

        let mut by_id: BTreeMap<String, ConversationSummary> = leads
            .into_iter()
            .map(|lead| (lead.id.clone(), ConversationSummary::new(lead)))
            .collect();
        let mut seen: Vec<String> = Vec::new();
        for digest in &digests {
            let Some(id) = &digest.lead_id else { continue };
            if let Some(summary) = by_id.get_mut(id) {
                let latest = !seen.contains(id);
                if latest {
                    seen.push(id.clone());
                }
                summary.absorb(
                    digest.content.as_deref(),
                    digest.content_type,
                    digest.agent.as_deref(),
                    digest.created_at,
                    latest,
                );
            }
        }

        // Messages of leads missing from the leads table are dropped here
        self.summaries = order.iter().filter_map(|id| by_id.remove(id)).collect();
        debug!("conversation list: {} leads", self.summaries.len());
        Ok(())
    }

    /// Open a lead's thread and follow its new messages
    pub async fn select(&mut self, lead_id: Option<&str>) -> Result<()> {
        self.selected = lead_id.map(str::to_string);
        self.thread.bind(lead_id);
        let Some(id) = lead_id else {
            self.subs.release(SLOT_THREAD);
            return Ok(());
        };
        self.subs
            .ensure(SLOT_THREAD, MessageThread::subscription_for(id))
            .await;
        if let Err(e) = self.thread.load(&self.ctx).await {
            self.ctx.notifier.error("Could not load the conversation", &e);
            return Err(e);
        }
        Ok(())
    }

    pub async fn send(&mut self, text: &str, via_channel: bool) -> SendOutcome {
        let chat_id = self.selected().and_then(|s| s.telegram_chat_id.clone());
        let via = match (via_channel, chat_id) {
            (true, Some(chat_id)) => SendVia::Channel { chat_id },
            _ => SendVia::Agent,
        };
        let is_channel = matches!(via, SendVia::Channel { .. });
        let outcome = self.thread.send(&self.ctx, text, via).await;
        if let SendOutcome::Delivered { reply } = &outcome {
            if is_channel {
                self.ctx.notifier.success("Message sent to the lead's chat");
            } else if reply.as_ref().and_then(|r| r.reply.as_ref()).is_some() {
                self.ctx.notifier.success("Reply generated");
            }
        }
        outcome
    }

    /// Move the lead of a new message to the top, or reload if it is new
    async fn on_new_message(&mut self, change: &RawChange) -> Result<()> {
        let Some(row) = change.new.as_ref() else {
            return Ok(());
        };
        let digest: MessageDigest = serde_json::from_value(row.clone())?;
        let Some(lead_id) = digest.lead_id.clone() else {
            return Ok(());
        };

        match self.summaries.iter().position(|s| s.lead_id == lead_id) {
            Some(pos) => {
                let mut summary = self.summaries.remove(pos);
                summary.absorb(
                    digest.content.as_deref(),
                    digest.content_type,
                    digest.agent.as_deref(),
                    digest.created_at,
                    true,
                );
                self.summaries.insert(0, summary);
            }
            None => {
                if let Err(e) = self.load().await {
                    warn!("conversation list not refreshed: {}", e);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl View for ConversationsView {
    fn name(&self) -> &'static str {
        "conversations"
    }

    async fn mount(&mut self) -> Result<()> {
        self.subs
            .ensure(
                SLOT_ACTIVITY,
                SubscriptionKey::for_record::<Message>().only(ChangeKind::Insert),
            )
            .await;
        self.load().await
    }

    async fn on_change(&mut self, slot: &'static str, change: RawChange) -> Result<()> {
        match slot {
            SLOT_ACTIVITY => self.on_new_message(&change).await,
            SLOT_THREAD => self.thread.apply_raw(&change).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn subscriptions_mut(&mut self) -> &mut SubscriptionSet {
        &mut self.subs
    }
}
