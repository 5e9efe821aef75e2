//! # JournalWriter
//!
//! Appends one JSON object per message event to a file:
//!
//! ```text
//! {"time":"2024-05-01T10:00:00Z","exchange":"market","routing_key":"order.created",
//!  "message":"{\"id\":1}","properties":{"message_id":"amqp_..."},
//!  "method":"ReadOrderCreated","extra":{"queue":"orders","result":"success"}}
//! ```
//!
//! Non-message events (state changes, probes, supervision) are ignored.
//! Write failures are logged and the event is dropped.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

#[derive(Serialize)]
struct Record<'a> {
    time: String,
    exchange: &'a str,
    routing_key: &'a str,
    message: &'a str,
    properties: Value,
    method: &'a str,
    #[serde(skip_serializing_if = "Map::is_empty")]
    extra: Map<String, Value>,
}

/// JSON-lines message journal.
pub struct JournalWriter {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl JournalWriter {
    /// Creates a writer; the file is opened (append, create) on the first event.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    /// Journal file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn render(e: &Event) -> Option<String> {
        let result = match e.kind {
            EventKind::DeliveryAcked | EventKind::AskAnswered => Some("success"),
            EventKind::DeliveryRejected | EventKind::AskTimedOut => Some("error"),
            EventKind::MessagePublished | EventKind::ConsumerCancelled => None,
            _ => return None,
        };

        let mut properties = Map::new();
        if let Some(id) = e.message_id.as_deref() {
            properties.insert("message_id".into(), Value::from(id));
        }
        let mut extra = Map::new();
        if let Some(queue) = e.queue.as_deref() {
            extra.insert("queue".into(), Value::from(queue));
        }
        if let Some(result) = result {
            extra.insert("result".into(), Value::from(result));
        }
        if let Some(reason) = e.reason.as_deref() {
            extra.insert("reason".into(), Value::from(reason));
        }

        let record = Record {
            time: chrono::DateTime::<chrono::Utc>::from(e.at).to_rfc3339(),
            exchange: e.exchange.as_deref().unwrap_or(""),
            routing_key: e.routing_key.as_deref().unwrap_or(""),
            message: e.body.as_deref().unwrap_or(""),
            properties: Value::Object(properties),
            method: e.method.as_deref().unwrap_or(e.kind.as_label()),
            extra,
        };
        serde_json::to_string(&record).ok()
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Subscribe for JournalWriter {
    async fn on_event(&self, e: &Event) {
        let Some(line) = Self::render(e) else {
            return;
        };
        if let Err(err) = self.append(&line).await {
            tracing::warn!(path = %self.path.display(), error = %err, "journal write failed");
        }
    }

    fn name(&self) -> &'static str {
        "JournalWriter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_message_events_are_journalled_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amqp.log");
        let journal = JournalWriter::new(&path);

        journal
            .on_event(
                &Event::new(EventKind::DeliveryAcked)
                    .with_exchange("market")
                    .with_queue("orders")
                    .with_routing_key("order.created")
                    .with_body(r#"{"id":1}"#)
                    .with_method("ReadOrderCreated"),
            )
            .await;
        journal
            .on_event(&Event::new(EventKind::StateChanged).with_state("running"))
            .await;
        journal
            .on_event(
                &Event::new(EventKind::MessagePublished)
                    .with_exchange("market")
                    .with_routing_key("order.created")
                    .with_message_id("amqp_1")
                    .with_method("send"),
            )
            .await;

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["method"], "ReadOrderCreated");
        assert_eq!(lines[0]["message"], r#"{"id":1}"#);
        assert_eq!(lines[0]["extra"]["result"], "success");
        assert_eq!(lines[0]["extra"]["queue"], "orders");
        assert_eq!(lines[1]["method"], "send");
        assert_eq!(lines[1]["properties"]["message_id"], "amqp_1");
        assert!(lines[1].get("extra").is_none());
    }
}
