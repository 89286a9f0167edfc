//! Change feed over the hosted provider's Phoenix channel socket
//!
//! One websocket is opened lazily on the first subscription and shared by
//! all of them. Each subscription is one channel topic joined with a
//! `postgres_changes` config. A background task owns the socket: it sends
//! joins, leaves and heartbeats, and routes change frames to subscribers.

use super::{RawChange, RealtimeSource, Subscription, SubscriptionKey};
use crate::config::RealtimeConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

const PROTOCOL_VSN: &str = "1.0.0";

enum Command {
    Join {
        topic: String,
        key: SubscriptionKey,
        events: mpsc::UnboundedSender<RawChange>,
        reply: oneshot::Sender<Result<()>>,
    },
    Leave {
        topic: String,
    },
}

/// A decoded socket frame
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PhoenixFrame {
    pub join_ref: Option<String>,
    pub reference: Option<String>,
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

fn ref_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a frame in object form (v1) or array form (v2)
pub(crate) fn parse_frame(raw: &str) -> Option<PhoenixFrame> {
    let value: Value = serde_json::from_str(raw).ok()?;
    match value {
        Value::Object(map) => Some(PhoenixFrame {
            join_ref: ref_text(map.get("join_ref")),
            reference: ref_text(map.get("ref")),
            topic: map.get("topic")?.as_str()?.to_string(),
            event: map.get("event")?.as_str()?.to_string(),
            payload: map.get("payload").cloned().unwrap_or(Value::Null),
        }),
        Value::Array(items) if items.len() == 5 => Some(PhoenixFrame {
            join_ref: ref_text(items.first()),
            reference: ref_text(items.get(1)),
            topic: items.get(2)?.as_str()?.to_string(),
            event: items.get(3)?.as_str()?.to_string(),
            payload: items.get(4).cloned().unwrap_or(Value::Null),
        }),
        _ => None,
    }
}

pub(crate) fn build_frame(
    topic: &str,
    event: &str,
    payload: Value,
    reference: Option<&str>,
    join_ref: Option<&str>,
) -> String {
    json!({
        "topic": topic,
        "event": event,
        "payload": payload,
        "ref": reference,
        "join_ref": join_ref,
    })
    .to_string()
}

/// `phx_join` payload asking for one table's changes
pub(crate) fn join_payload(key: &SubscriptionKey, access_token: &str) -> Value {
    let mut change = json!({
        "event": key.events.as_wire(),
        "schema": "public",
        "table": key.table,
    });
    if let Some(filter) = &key.filter {
        change["filter"] = Value::String(filter.to_string());
    }
    json!({
        "config": {
            "broadcast": {"self": false},
            "presence": {"key": ""},
            "postgres_changes": [change],
        },
        "access_token": access_token,
    })
}

/// Websocket endpoint for a project URL
pub(crate) fn socket_url(project_url: &str, key: &str) -> Result<Url> {
    let mut url = Url::parse(project_url)
        .map_err(|e| Error::Config(format!("Invalid realtime URL: {}", e)))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Config(format!("Cannot use {} as a websocket URL", project_url)))?;
    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{}/realtime/v1/websocket", base));
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", key)
        .append_pair("vsn", PROTOCOL_VSN);
    Ok(url)
}

/// Realtime source backed by the provider's websocket
pub struct PhoenixRealtime {
    url: Url,
    key: String,
    heartbeat: Duration,
    join_timeout: Duration,
    link: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    topics: AtomicU64,
}

impl PhoenixRealtime {
    pub fn new(config: &RealtimeConfig) -> Result<Self> {
        let key = config.key().ok_or_else(|| {
            Error::Config(format!(
                "Realtime service key not set (expected in ${})",
                config.key_env
            ))
        })?;
        Ok(Self {
            url: socket_url(&config.url, &key)?,
            key,
            heartbeat: Duration::from_secs(config.heartbeat_secs),
            join_timeout: Duration::from_secs(config.join_timeout_secs),
            link: Mutex::new(None),
            topics: AtomicU64::new(0),
        })
    }

    /// Command channel to the socket task, connecting on first use
    async fn link(&self) -> Result<mpsc::UnboundedSender<Command>> {
        let mut guard = self.link.lock().await;
        if let Some(tx) = guard.as_ref().filter(|tx| !tx.is_closed()) {
            return Ok(tx.clone());
        }

        debug!("Connecting realtime socket at {}", self.url.host_str().unwrap_or(""));
        let (socket, _) = tokio::time::timeout(self.join_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| Error::Realtime("realtime connect timed out".to_string()))??;
        info!("Realtime socket connected");

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(socket, rx, self.heartbeat, self.key.clone()));
        *guard = Some(tx.clone());
        Ok(tx)
    }
}

#[async_trait]
impl RealtimeSource for PhoenixRealtime {
    async fn subscribe(&self, key: SubscriptionKey) -> Result<Subscription> {
        let link = self.link().await?;
        let topic = format!(
            "realtime:orbita-{}",
            self.topics.fetch_add(1, Ordering::Relaxed) + 1
        );

        let (events, receiver) = mpsc::unbounded_channel();
        let (reply, joined) = oneshot::channel();
        link.send(Command::Join {
            topic: topic.clone(),
            key: key.clone(),
            events,
            reply,
        })
        .map_err(|_| Error::Realtime("realtime socket closed".to_string()))?;

        match tokio::time::timeout(self.join_timeout, joined).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => {
                return Err(Error::Realtime(
                    "realtime socket closed during join".to_string(),
                ))
            }
            Err(_) => {
                let _ = link.send(Command::Leave { topic });
                return Err(Error::Realtime(format!("join timed out for {}", key)));
            }
        }

        debug!("Joined {} for {}", topic, key);
        Ok(Subscription::new(key, receiver, move || {
            let _ = link.send(Command::Leave { topic });
        }))
    }
}

struct SocketState {
    next_ref: u64,
    channels: HashMap<String, mpsc::UnboundedSender<RawChange>>,
    pending: HashMap<String, (String, oneshot::Sender<Result<()>>)>,
}

impl SocketState {
    fn next_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    /// Route an incoming frame
    fn handle(&mut self, frame: PhoenixFrame) {
        match frame.event.as_str() {
            "phx_reply" => {
                let Some((topic, reply)) = frame
                    .reference
                    .as_ref()
                    .and_then(|r| self.pending.remove(r))
                else {
                    return;
                };
                let status = frame
                    .payload
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("error");
                if status == "ok" {
                    let _ = reply.send(Ok(()));
                } else {
                    let reason = frame
                        .payload
                        .pointer("/response/reason")
                        .and_then(Value::as_str)
                        .unwrap_or(status)
                        .to_string();
                    self.channels.remove(&topic);
                    let _ = reply.send(Err(Error::Realtime(format!(
                        "join refused for {}: {}",
                        topic, reason
                    ))));
                }
            }
            "postgres_changes" => {
                let Some(tx) = self.channels.get(&frame.topic) else {
                    return;
                };
                match RawChange::from_payload(&frame.payload) {
                    Some(change) => {
                        let _ = tx.send(change);
                    }
                    None => debug!("Ignoring unrecognised change on {}", frame.topic),
                }
            }
            "phx_error" | "phx_close" => {
                if self.channels.remove(&frame.topic).is_some() {
                    warn!("Realtime channel {} closed by server", frame.topic);
                }
                let failed: Vec<String> = self
                    .pending
                    .iter()
                    .filter(|(_, (topic, _))| *topic == frame.topic)
                    .map(|(r, _)| r.clone())
                    .collect();
                for r in failed {
                    if let Some((topic, reply)) = self.pending.remove(&r) {
                        let _ = reply.send(Err(Error::Realtime(format!("{} errored", topic))));
                    }
                }
            }
            _ => {}
        }
    }
}

async fn run_socket<S>(
    socket: tokio_tungstenite::WebSocketStream<S>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    heartbeat: Duration,
    access_token: String,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    let mut state = SocketState {
        next_ref: 0,
        channels: HashMap::new(),
        pending: HashMap::new(),
    };
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                None => break,
                Some(Command::Join { topic, key, events, reply }) => {
                    let reference = state.next_ref();
                    let frame = build_frame(
                        &topic,
                        "phx_join",
                        join_payload(&key, &access_token),
                        Some(&reference),
                        Some(&reference),
                    );
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        let _ = reply.send(Err(e.into()));
                        break;
                    }
                    state.channels.insert(topic.clone(), events);
                    state.pending.insert(reference, (topic, reply));
                }
                Some(Command::Leave { topic }) => {
                    if state.channels.remove(&topic).is_some() {
                        let reference = state.next_ref();
                        let frame = build_frame(&topic, "phx_leave", json!({}), Some(&reference), None);
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                        debug!("Left {}", topic);
                    }
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(frame) = parse_frame(&text) {
                        state.handle(frame);
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    warn!("Realtime socket closed; live updates stopped");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Realtime socket error: {}", e);
                    break;
                }
            },
            _ = ticker.tick() => {
                let reference = state.next_ref();
                let frame = build_frame("phoenix", "heartbeat", json!({}), Some(&reference), None);
                if sink.send(Message::Text(frame)).await.is_err() {
                    warn!("Realtime heartbeat failed; live updates stopped");
                    break;
                }
            }
        }
    }
    // Dropping the state closes every subscriber's receiver
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::ChangeKind;

    #[test]
    fn test_socket_url() {
        let url = socket_url("https://abc.supabase.co", "anon").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        let url = socket_url("http://localhost:54321/", "k").unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), "/realtime/v1/websocket");
    }

    #[tokio::test]
    async fn test_unanswered_handshake_fails_within_join_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let source = PhoenixRealtime {
            url: socket_url(&format!("http://{}", addr), "k").unwrap(),
            key: "k".to_string(),
            heartbeat: Duration::from_secs(25),
            join_timeout: Duration::from_millis(200),
            link: Mutex::new(None),
            topics: AtomicU64::new(0),
        };

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            source.subscribe(SubscriptionKey::table("leads")),
        )
        .await
        .expect("subscribe should give up on its own");
        assert!(matches!(outcome, Err(Error::Realtime(_))));
        drop(listener);
    }

    #[test]
    fn test_join_payload_carries_filter() {
        let key = SubscriptionKey::table("conversations")
            .only(ChangeKind::Insert)
            .eq("lead_id", "L1");
        let payload = join_payload(&key, "tok");
        let change = &payload["config"]["postgres_changes"][0];
        assert_eq!(change["event"], "INSERT");
        assert_eq!(change["table"], "conversations");
        assert_eq!(change["filter"], "lead_id=eq.L1");
        assert_eq!(payload["access_token"], "tok");

        let unfiltered = join_payload(&SubscriptionKey::table("leads"), "tok");
        assert!(unfiltered["config"]["postgres_changes"][0].get("filter").is_none());
    }

    #[test]
    fn test_frame_round_trip_forms() {
        let raw = build_frame("realtime:orbita-1", "phx_join", json!({}), Some("3"), Some("3"));
        let frame = parse_frame(&raw).unwrap();
        assert_eq!(frame.topic, "realtime:orbita-1");
        assert_eq!(frame.reference.as_deref(), Some("3"));

        let array = r#"[null, "7", "phoenix", "phx_reply", {"status": "ok"}]"#;
        let frame = parse_frame(array).unwrap();
        assert_eq!(frame.join_ref, None);
        assert_eq!(frame.event, "phx_reply");

        assert!(parse_frame("not json").is_none());
    }

    #[tokio::test]
    async fn test_state_routes_replies_and_changes() {
        let mut state = SocketState {
            next_ref: 0,
            channels: HashMap::new(),
            pending: HashMap::new(),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        let reference = state.next_ref();
        state.channels.insert("realtime:orbita-1".to_string(), tx);
        state
            .pending
            .insert(reference.clone(), ("realtime:orbita-1".to_string(), reply_tx));

        state.handle(PhoenixFrame {
            join_ref: Some(reference.clone()),
            reference: Some(reference),
            topic: "realtime:orbita-1".to_string(),
            event: "phx_reply".to_string(),
            payload: json!({"status": "ok", "response": {}}),
        });
        assert!(reply_rx.await.unwrap().is_ok());

        state.handle(PhoenixFrame {
            join_ref: None,
            reference: None,
            topic: "realtime:orbita-1".to_string(),
            event: "postgres_changes".to_string(),
            payload: json!({"data": {"type": "UPDATE", "table": "leads", "record": {"id": "L1"}}}),
        });
        let change = rx.try_recv().unwrap();
        assert_eq!(change.kind, ChangeKind::Update);

        state.handle(PhoenixFrame {
            join_ref: None,
            reference: None,
            topic: "realtime:orbita-1".to_string(),
            event: "phx_close".to_string(),
            payload: json!({}),
        });
        assert!(state.channels.is_empty());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_refused_join_reports_reason() {
        let mut state = SocketState {
            next_ref: 0,
            channels: HashMap::new(),
            pending: HashMap::new(),
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        state.channels.insert("realtime:orbita-2".to_string(), tx);
        state
            .pending
            .insert("1".to_string(), ("realtime:orbita-2".to_string(), reply_tx));

        state.handle(PhoenixFrame {
            join_ref: Some("1".to_string()),
            reference: Some("1".to_string()),
            topic: "realtime:orbita-2".to_string(),
            event: "phx_reply".to_string(),
            payload: json!({"status": "error", "response": {"reason": "unauthorized"}}),
        });

        let err = reply_rx.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("unauthorized"));
        assert!(state.channels.is_empty());
    }
}
