//! One lead's message thread and the send flow shared by the chat panels

use super::ViewContext;
use crate::error::Result;
use crate::gateway::ChatReply;
use crate::live::{InsertPolicy, LazyDetail};
use crate::models::{Message, Record};
use crate::realtime::{ChangeEvent, ChangeKind, RawChange, SubscriptionKey};
use crate::rest::Query;
use tracing::{debug, info, warn};

/// Where an outgoing message goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendVia {
    /// The AI director agent, which answers through the backend
    Agent,
    /// Straight to the lead's bot chat
    Channel { chat_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Nothing to send (blank text or no lead bound)
    Skipped,
    /// The backend refused or could not be reached; one notice was raised
    Failed,
    Delivered { reply: Option<ChatReply> },
}

/// Messages of the bound lead, oldest first
///
/// Sending never inserts locally: the new message shows up through the
/// realtime feed or the re-fetch that follows a successful send.
pub struct MessageThread {
    messages: LazyDetail<Message>,
    limit: usize,
    processing: bool,
}

impl MessageThread {
    pub fn new(limit: usize) -> Self {
        Self {
            messages: LazyDetail::new(InsertPolicy::Append),
            limit,
            processing: false,
        }
    }

    pub fn query_for(lead_id: &str, limit: usize) -> Query {
        Query::table(Message::TABLE)
            .eq("lead_id", lead_id)
            .order("created_at", true)
            .limit(limit)
    }

    /// Feed key for new messages of `lead_id`
    pub fn subscription_for(lead_id: &str) -> SubscriptionKey {
        SubscriptionKey::for_record::<Message>()
            .only(ChangeKind::Insert)
            .eq("lead_id", lead_id)
    }

    pub fn lead_id(&self) -> Option<&str> {
        self.messages.owner()
    }

    /// Point the thread at another lead; the old lead's messages are dropped
    pub fn bind(&mut self, lead_id: Option<&str>) {
        if self.messages.owner() != lead_id {
            self.processing = false;
        }
        self.messages.reset(lead_id);
    }

    pub fn is_loaded(&self) -> bool {
        self.messages.is_loaded()
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn messages(&self) -> &[Message] {
        self.messages.items().unwrap_or(&[])
    }

    /// Load the bound lead's messages unless already cached
    pub async fn load(&mut self, ctx: &ViewContext) -> Result<bool> {
        let Some(lead_id) = self.lead_id().map(str::to_string) else {
            return Ok(false);
        };
        let query = Self::query_for(&lead_id, self.limit);
        self.messages.ensure_loaded(ctx.data.as_ref(), &query).await
    }

    /// Merge a feed change that concerns the bound lead
    pub fn apply_raw(&mut self, change: &RawChange) -> Result<bool> {
        if change.table != Message::TABLE {
            return Ok(false);
        }
        let event = ChangeEvent::<Message>::decode(change)?;
        if let ChangeEvent::Inserted(message) | ChangeEvent::Updated(message) = &event {
            if message.lead_id.as_deref() != self.lead_id() {
                return Ok(false);
            }
        }
        let applied = self.messages.apply(event);
        if applied {
            self.processing = false;
        }
        Ok(applied)
    }

    /// Send `text` and re-read the thread once the backend acknowledges it
    ///
    /// A failure leaves the messages untouched and raises exactly one error
    /// notice.
    pub async fn send(&mut self, ctx: &ViewContext, text: &str, via: SendVia) -> SendOutcome {
        let text = text.trim();
        let Some(lead_id) = self.lead_id().map(str::to_string) else {
            return SendOutcome::Skipped;
        };
        if text.is_empty() {
            return SendOutcome::Skipped;
        }

        self.processing = true;
        let sent = match &via {
            SendVia::Agent => match ctx.session.chat_session_id(&lead_id).await {
                Ok(session_id) => ctx
                    .gateway
                    .chat(&lead_id, text, &session_id)
                    .await
                    .map(Some),
                Err(e) => Err(e),
            },
            SendVia::Channel { chat_id } => ctx
                .gateway
                .send_channel_message(chat_id, text, &lead_id)
                .await
                .map(|_| None),
        };

        let reply = match sent {
            Ok(reply) => reply,
            Err(e) => {
                self.processing = false;
                warn!("send to lead {} failed: {}", lead_id, e);
                ctx.notifier.error("Could not send the message", &e);
                return SendOutcome::Failed;
            }
        };
        info!("message sent to lead {}", lead_id);

        self.messages.invalidate();
        if let Err(e) = self.load(ctx).await {
            debug!("re-reading thread {} failed: {}", lead_id, e);
            ctx.notifier.error("Could not refresh the conversation", &e);
        }
        self.processing = false;
        SendOutcome::Delivered { reply }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoticeLevel;
    use crate::views::testkit::Harness;
    use serde_json::json;

    fn seed_thread(h: &Harness) {
        h.data.seed(
            "conversations",
            vec![
                json!({"id": "m1", "lead_id": "L1", "role": "user", "content": "hola", "created_at": "2026-03-01T10:00:00Z"}),
                json!({"id": "m2", "lead_id": "L1", "role": "assistant", "content": "buen día", "created_at": "2026-03-01T10:01:00Z"}),
                json!({"id": "x1", "lead_id": "L2", "role": "user", "content": "otro", "created_at": "2026-03-01T10:02:00Z"}),
            ],
        );
    }

    #[tokio::test]
    async fn test_failed_send_keeps_messages_and_notifies_once() {
        let h = Harness::new();
        seed_thread(&h);
        let mut thread = MessageThread::new(100);
        thread.bind(Some("L1"));
        thread.load(&h.ctx).await.unwrap();

        h.gateway.set_offline(true);
        let outcome = thread.send(&h.ctx, "¿precio?", SendVia::Agent).await;

        assert_eq!(outcome, SendOutcome::Failed);
        assert_eq!(thread.messages().len(), 2);
        assert!(!thread.is_processing());
        assert_eq!(h.notifier.count(NoticeLevel::Error), 1);
        assert_eq!(h.notifier.notices().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_send_also_notifies_once() {
        let h = Harness::new();
        seed_thread(&h);
        let mut thread = MessageThread::new(100);
        thread.bind(Some("L1"));
        thread.load(&h.ctx).await.unwrap();

        h.gateway.reject_with(Some("lead is archived"));
        let outcome = thread
            .send(&h.ctx, "hola", SendVia::Channel { chat_id: "555".into() })
            .await;

        assert_eq!(outcome, SendOutcome::Failed);
        assert_eq!(thread.messages().len(), 2);
        assert_eq!(h.notifier.count(NoticeLevel::Error), 1);
    }

    #[tokio::test]
    async fn test_successful_send_refetches_without_optimistic_insert() {
        let h = Harness::new();
        seed_thread(&h);
        let mut thread = MessageThread::new(100);
        thread.bind(Some("L1"));
        thread.load(&h.ctx).await.unwrap();

        let data = h.data.clone();
        h.gateway.on_call(move |op| {
            if op == "chat" {
                data.seed(
                    "conversations",
                    vec![
                        json!({"id": "m3", "lead_id": "L1", "role": "user", "content": "¿precio?", "created_at": "2026-03-01T10:05:00Z"}),
                        json!({"id": "m4", "lead_id": "L1", "role": "assistant", "content": "Desde 500", "created_at": "2026-03-01T10:05:02Z"}),
                    ],
                );
            }
        });

        let outcome = thread.send(&h.ctx, "  ¿precio?  ", SendVia::Agent).await;
        assert!(matches!(outcome, SendOutcome::Delivered { reply: Some(_) }));

        let ids: Vec<&str> = thread.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3", "m4"]);
        assert!(!thread.is_processing());
        assert_eq!(h.gateway.call_count("chat"), 1);
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_blank_text_and_unbound_thread_are_skipped() {
        let h = Harness::new();
        let mut thread = MessageThread::new(100);
        assert_eq!(thread.send(&h.ctx, "hola", SendVia::Agent).await, SendOutcome::Skipped);

        thread.bind(Some("L1"));
        assert_eq!(thread.send(&h.ctx, "   ", SendVia::Agent).await, SendOutcome::Skipped);
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_feed_changes_for_other_leads_are_ignored() {
        let h = Harness::new();
        seed_thread(&h);
        let mut thread = MessageThread::new(100);
        thread.bind(Some("L1"));
        thread.load(&h.ctx).await.unwrap();

        let other = RawChange::insert("conversations", json!({"id": "x9", "lead_id": "L2"}));
        assert!(!thread.apply_raw(&other).unwrap());

        let mine = RawChange::insert("conversations", json!({"id": "m9", "lead_id": "L1"}));
        assert!(thread.apply_raw(&mine).unwrap());
        assert!(!thread.apply_raw(&mine).unwrap());
        assert_eq!(thread.messages().len(), 3);
    }
}
