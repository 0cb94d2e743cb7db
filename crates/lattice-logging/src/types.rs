//! Logging types shared across the crate.

use serde::{Deserialize, Serialize};

/// Log level with numeric mapping for threshold comparisons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Detailed entry/exit points.
    Trace = 10,
    /// Intermediate values, decisions.
    Debug = 20,
    /// Outcomes, summaries (default streaming level).
    Info = 30,
    /// Non-fatal issues.
    Warn = 40,
    /// Errors.
    Error = 50,
}

impl LogLevel {
    /// Numeric value (higher = more severe).
    #[must_use]
    pub const fn as_num(self) -> i32 {
        self as i32
    }

    /// Convert from a tracing level.
    #[must_use]
    pub fn from_tracing(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => f.write_str("trace"),
            Self::Debug => f.write_str("debug"),
            Self::Info => f.write_str("info"),
            Self::Warn => f.write_str("warn"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// One captured log event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Severity.
    pub level: LogLevel,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Emitting module path (tracing target).
    pub logger: String,
    /// Log message text.
    pub message: String,
    /// Structured event fields, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
}

/// A batch of log messages for one query, streamed to the issuing client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogBatch {
    /// Query this batch belongs to.
    pub query_id: String,
    /// Captured messages in emission order.
    pub messages: Vec<LogMessage>,
    /// When the batch was flushed (RFC 3339).
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::Info.as_num(), 30);
    }

    #[test]
    fn level_from_tracing() {
        assert_eq!(LogLevel::from_tracing(&tracing::Level::WARN), LogLevel::Warn);
        assert_eq!(
            LogLevel::from_tracing(&tracing::Level::TRACE),
            LogLevel::Trace
        );
    }

    #[test]
    fn level_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&LogLevel::Error).unwrap(), "\"error\"");
    }

    #[test]
    fn message_omits_empty_fields() {
        let msg = LogMessage {
            level: LogLevel::Info,
            timestamp: "2026-01-01T00:00:00Z".into(),
            logger: "lattice_server::hub".into(),
            message: "client connected".into(),
            fields: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("fields").is_none());
        assert_eq!(json["level"], "info");
    }

    #[test]
    fn batch_roundtrip() {
        let batch = LogBatch {
            query_id: "q_1".into(),
            messages: vec![],
            timestamp: "2026-01-01T00:00:00Z".into(),
        };
        let json = serde_json::to_string(&batch).unwrap();
        let back: LogBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, batch);
    }
}
