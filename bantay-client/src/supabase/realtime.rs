//! Supabase Realtime change feeds over Phoenix channels (v1 JSON serializer).
//!
//! Each subscription gets its own websocket. The socket joins one channel configured for
//! `postgres_changes` on a single table, waits for the join reply, then a background task
//! forwards every change as a [`RawChange`] and keeps the connection alive with heartbeats.
//! Unsubscribing sends `phx_leave` and closes the socket.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::channel::{mpsc, oneshot};
use futures::{SinkExt, StreamExt};
use mirror::data_model::{ChangeKind, RawChange};
use mirror::{ChangeFeed, DecodeError, EventKinds, Filter, Subscription, SubscriptionError};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::SupabaseClient;
use super::rest::filter_pair;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const JOIN_REF: &str = "1";

/// One frame of the Phoenix channel protocol.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref")]
    pub reference: Option<String>,
}

impl PhoenixMessage {
    pub fn join(
        topic: &str,
        table: &str,
        kinds: EventKinds,
        filter: Option<&Filter>,
        access_token: &str,
        reference: &str,
    ) -> Self {
        let mut change = json!({
            "event": kinds.as_str(),
            "schema": "public",
            "table": table,
        });
        if let Some(filter) = filter {
            let (column, condition) = filter_pair(filter);
            change["filter"] = Value::from(format!("{column}={condition}"));
        }
        Self {
            topic: topic.to_string(),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [change],
                    "private": false,
                },
                "access_token": access_token,
            }),
            reference: Some(reference.to_string()),
        }
    }

    pub fn heartbeat(reference: &str) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn leave(topic: &str, reference: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    fn to_message(&self) -> Result<Message, SubscriptionError> {
        serde_json::to_string(self)
            .map(Message::Text)
            .map_err(|e| SubscriptionError::Connect(e.to_string()))
    }
}

#[derive(Debug, PartialEq)]
enum Inbound {
    Joined,
    JoinRefused(String),
    Change(RawChange),
    Closed(String),
    Ignored,
}

fn classify(message: &PhoenixMessage, topic: &str) -> Result<Inbound, DecodeError> {
    if message.topic != topic {
        return Ok(Inbound::Ignored);
    }
    match message.event.as_str() {
        "phx_reply" if message.reference.as_deref() == Some(JOIN_REF) => {
            let status = message.payload.get("status").and_then(Value::as_str);
            if status == Some("ok") {
                return Ok(Inbound::Joined);
            }
            let reason = message
                .payload
                .pointer("/response/reason")
                .and_then(Value::as_str)
                .or(status)
                .unwrap_or("join refused");
            Ok(Inbound::JoinRefused(reason.to_string()))
        }
        "postgres_changes" => decode_postgres_change(&message.payload).map(Inbound::Change),
        "system" if message.payload.get("status").and_then(Value::as_str) == Some("error") => {
            let reason = message
                .payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("channel error");
            Ok(Inbound::Closed(reason.to_string()))
        }
        "phx_close" | "phx_error" => Ok(Inbound::Closed(message.event.clone())),
        _ => Ok(Inbound::Ignored),
    }
}

/// Validates the payload of a `postgres_changes` frame into a [`RawChange`].
pub fn decode_postgres_change(payload: &Value) -> Result<RawChange, DecodeError> {
    let data = payload
        .get("data")
        .ok_or_else(|| DecodeError::Payload("missing `data`".to_string()))?;
    let kind: ChangeKind = data
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::Payload("missing `type`".to_string()))?
        .parse()?;
    let table = data
        .get("table")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::Payload("missing `table`".to_string()))?;
    let row = |field: &str| {
        data.get(field)
            .filter(|row| row.as_object().is_some_and(|fields| !fields.is_empty()))
            .cloned()
    };
    let commit_timestamp = data
        .get("commit_timestamp")
        .and_then(Value::as_str)
        .map(|ts| DateTime::parse_from_rfc3339(ts).map(|ts| ts.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| DecodeError::Payload(format!("bad `commit_timestamp`: {e}")))?;

    Ok(RawChange {
        kind,
        table: table.to_string(),
        record: row("record"),
        old_record: row("old_record"),
        commit_timestamp,
    })
}

pub(crate) fn realtime_url(base_url: &str, anon_key: &str) -> String {
    let socket_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    };
    format!("{socket_base}/realtime/v1/websocket?apikey={anon_key}&vsn=1.0.0")
}

async fn await_join(socket: &mut Socket, topic: &str) -> Result<(), SubscriptionError> {
    let table = topic.rsplit(':').next().unwrap_or(topic).to_string();
    loop {
        let text = match socket.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                return Err(SubscriptionError::Connect(
                    "socket closed before the join reply".to_string(),
                ));
            }
            Some(Err(e)) => return Err(SubscriptionError::Connect(e.to_string())),
            Some(Ok(_)) => continue,
        };
        let Ok(message) = serde_json::from_str::<PhoenixMessage>(&text) else {
            continue;
        };
        match classify(&message, topic) {
            Ok(Inbound::Joined) => return Ok(()),
            Ok(Inbound::JoinRefused(reason)) | Ok(Inbound::Closed(reason)) => {
                return Err(SubscriptionError::Rejected {
                    table,
                    message: reason,
                });
            }
            _ => continue,
        }
    }
}

async fn pump(
    mut socket: Socket,
    topic: String,
    events: mpsc::UnboundedSender<RawChange>,
    mut cancelled: oneshot::Receiver<()>,
    heartbeat_every: Duration,
) {
    let mut heartbeat =
        tokio::time::interval_at(tokio::time::Instant::now() + heartbeat_every, heartbeat_every);
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            _ = &mut cancelled => {
                if let Ok(leave) = PhoenixMessage::leave(&topic, &next_ref.to_string()).to_message() {
                    let _ = socket.send(leave).await;
                }
                let _ = socket.close(None).await;
                break;
            }
            _ = heartbeat.tick() => {
                let Ok(beat) = PhoenixMessage::heartbeat(&next_ref.to_string()).to_message() else {
                    continue;
                };
                next_ref += 1;
                if let Err(e) = socket.send(beat).await {
                    log::error!("Heartbeat on {topic} failed: {e}");
                    break;
                }
            }
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let message = match serde_json::from_str::<PhoenixMessage>(&text) {
                        Ok(message) => message,
                        Err(e) => {
                            log::warn!("Unreadable frame on {topic}: {e}");
                            continue;
                        }
                    };
                    match classify(&message, &topic) {
                        Ok(Inbound::Change(change)) => {
                            if events.unbounded_send(change).is_err() {
                                break;
                            }
                        }
                        Ok(Inbound::Closed(reason)) => {
                            log::warn!("{topic} closed by the server: {reason}");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => log::warn!("Skipping invalid change on {topic}: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    log::warn!("Realtime socket for {topic} closed");
                    break;
                }
                Some(Err(e)) => {
                    log::error!("Realtime socket for {topic} failed: {e}");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }
}

impl ChangeFeed for SupabaseClient {
    async fn subscribe(
        &self,
        table: &str,
        kinds: EventKinds,
        filter: Option<&Filter>,
    ) -> Result<Subscription, SubscriptionError> {
        let url = realtime_url(self.base_url(), &self.config.supabase_anon_key);
        let join_timeout = Duration::from_secs(self.realtime.join_timeout_secs);
        let timed_out = || SubscriptionError::Timeout {
            table: table.to_string(),
        };

        let (mut socket, _) = tokio::time::timeout(join_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| SubscriptionError::Connect(e.to_string()))?;

        let topic = format!("realtime:public:{table}");
        let join = PhoenixMessage::join(&topic, table, kinds, filter, self.bearer(), JOIN_REF);
        socket
            .send(join.to_message()?)
            .await
            .map_err(|e| SubscriptionError::Connect(e.to_string()))?;
        tokio::time::timeout(join_timeout, await_join(&mut socket, &topic))
            .await
            .map_err(|_| timed_out())??;
        log::info!("Joined {topic} ({})", kinds.as_str());

        let (events, receiver) = mpsc::unbounded();
        let (cancel, cancelled) = oneshot::channel();
        let heartbeat_every = Duration::from_secs(self.realtime.heartbeat_interval_secs.max(1));
        tokio::spawn(pump(socket, topic, events, cancelled, heartbeat_every));

        Ok(Subscription::new(table, receiver, move || {
            let _ = cancel.send(());
        }))
    }
}
