//! `tracing` capture layer for client log streaming.
//!
//! [`ClientLogLayer`] sits in the subscriber stack next to the fmt layer.
//! When a query batch is armed it converts each event into a
//! [`LogMessage`] and pushes it into the slot; batches flushed mid-query
//! (warn-or-worse, threshold) are forwarded on the sink channel for
//! delivery while the query is still running.

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use std::sync::Arc;

use crate::batcher::{BatchSlot, RoutedBatch};
use crate::types::{LogLevel, LogMessage};

/// Captures `tracing` events into the armed query batch.
pub struct ClientLogLayer {
    slot: Arc<BatchSlot>,
    min_level: LogLevel,
    sink: mpsc::UnboundedSender<RoutedBatch>,
}

impl ClientLogLayer {
    /// Create a layer capturing into `slot`, forwarding mid-query flushes
    /// to `sink`.
    #[must_use]
    pub fn new(
        slot: Arc<BatchSlot>,
        min_level: LogLevel,
        sink: mpsc::UnboundedSender<RoutedBatch>,
    ) -> Self {
        Self {
            slot,
            min_level,
            sink,
        }
    }
}

impl<S: Subscriber> Layer<S> for ClientLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // Cheap exit outside query execution.
        if !self.slot.is_armed() {
            return;
        }

        let level = LogLevel::from_tracing(event.metadata().level());
        if level < self.min_level {
            return;
        }

        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        let fields = if visitor.fields.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(visitor.fields))
        };

        let msg = LogMessage {
            level,
            timestamp: chrono::Utc::now().to_rfc3339(),
            logger: event.metadata().target().to_owned(),
            message: visitor.message,
            fields,
        };

        if let Some(routed) = self.slot.push(msg) {
            // Receiver gone means the log bridge stopped; nothing to do.
            let _ = self.sink.send(routed);
        }
    }
}

/// Collects event fields into a JSON map, treating `message` specially.
#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl FieldCollector {
    fn record_value(&mut self, field: &Field, value: serde_json::Value) {
        let _ = self.fields.insert(field.name().to_owned(), value);
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.record_value(field, serde_json::Value::String(format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_owned();
        } else {
            self.record_value(field, serde_json::Value::String(value.to_owned()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, serde_json::Value::from(value));
    }
}
