//! Per-query log batching.
//!
//! # Batching strategy
//!
//! - Events accumulate in the armed batch.
//! - **Immediate flush** when an event is warn or worse.
//! - **Threshold flush** when the batch reaches `max_batch` messages.
//! - **Final flush** when the query completes and the slot is disarmed.

use parking_lot::Mutex;

use crate::types::{LogBatch, LogLevel, LogMessage};

/// Messages per batch before a threshold flush.
const DEFAULT_MAX_BATCH: usize = 100;

/// An armed per-query batch.
struct Batcher {
    connection_id: String,
    query_id: String,
    messages: Vec<LogMessage>,
    max_batch: usize,
}

impl Batcher {
    fn take_batch(&mut self) -> Option<LogBatch> {
        if self.messages.is_empty() {
            return None;
        }
        Some(LogBatch {
            query_id: self.query_id.clone(),
            messages: std::mem::take(&mut self.messages),
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }
}

/// A flushed batch routed to one connection.
pub type RoutedBatch = (String, LogBatch);

/// Shared slot holding the batcher for the query currently executing.
///
/// The server arms the slot before running a query and disarms it after;
/// the capture layer pushes into whatever batch is armed. At most one
/// query batches at a time per slot, matching the single in-flight query
/// per connection.
#[derive(Default)]
pub struct BatchSlot {
    inner: Mutex<Option<Batcher>>,
}

impl BatchSlot {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the slot for a query. Any batch still pending from a previous
    /// arm is returned for delivery rather than dropped.
    pub fn arm(&self, connection_id: &str, query_id: &str) -> Option<RoutedBatch> {
        let mut guard = self.inner.lock();
        let pending = guard.as_mut().and_then(|b| {
            let batch = b.take_batch()?;
            Some((b.connection_id.clone(), batch))
        });
        *guard = Some(Batcher {
            connection_id: connection_id.to_owned(),
            query_id: query_id.to_owned(),
            messages: Vec::new(),
            max_batch: DEFAULT_MAX_BATCH,
        });
        pending
    }

    /// Disarm the slot, returning the final batch if any messages remain.
    pub fn disarm(&self) -> Option<RoutedBatch> {
        let mut guard = self.inner.lock();
        let mut batcher = guard.take()?;
        let batch = batcher.take_batch()?;
        Some((batcher.connection_id, batch))
    }

    /// Whether a batch is currently armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Push a captured message. Returns a batch when a flush triggered
    /// (warn-or-worse event, or the threshold was reached).
    pub fn push(&self, msg: LogMessage) -> Option<RoutedBatch> {
        let mut guard = self.inner.lock();
        let batcher = guard.as_mut()?;
        let immediate = msg.level >= LogLevel::Warn;
        batcher.messages.push(msg);
        if immediate || batcher.messages.len() >= batcher.max_batch {
            let batch = batcher.take_batch()?;
            return Some((batcher.connection_id.clone(), batch));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_msg(text: &str) -> LogMessage {
        LogMessage {
            level: LogLevel::Info,
            timestamp: chrono::Utc::now().to_rfc3339(),
            logger: "test".into(),
            message: text.into(),
            fields: None,
        }
    }

    fn warn_msg(text: &str) -> LogMessage {
        LogMessage {
            level: LogLevel::Warn,
            ..info_msg(text)
        }
    }

    #[test]
    fn push_without_arm_is_dropped() {
        let slot = BatchSlot::new();
        assert!(slot.push(info_msg("ignored")).is_none());
        assert!(!slot.is_armed());
    }

    #[test]
    fn disarm_returns_accumulated_batch() {
        let slot = BatchSlot::new();
        assert!(slot.arm("conn_1", "q_1").is_none());
        assert!(slot.push(info_msg("one")).is_none());
        assert!(slot.push(info_msg("two")).is_none());

        let (conn, batch) = slot.disarm().unwrap();
        assert_eq!(conn, "conn_1");
        assert_eq!(batch.query_id, "q_1");
        assert_eq!(batch.messages.len(), 2);
        assert!(!slot.is_armed());
    }

    #[test]
    fn disarm_empty_batch_is_none() {
        let slot = BatchSlot::new();
        let _ = slot.arm("conn_1", "q_1");
        assert!(slot.disarm().is_none());
    }

    #[test]
    fn warn_flushes_immediately() {
        let slot = BatchSlot::new();
        let _ = slot.arm("conn_1", "q_1");
        assert!(slot.push(info_msg("buffered")).is_none());

        let (conn, batch) = slot.push(warn_msg("problem")).unwrap();
        assert_eq!(conn, "conn_1");
        assert_eq!(batch.messages.len(), 2);
        assert_eq!(batch.messages[1].level, LogLevel::Warn);

        // Slot stays armed for the rest of the query.
        assert!(slot.is_armed());
        assert!(slot.disarm().is_none());
    }

    #[test]
    fn threshold_flush_at_max_batch() {
        let slot = BatchSlot::new();
        let _ = slot.arm("conn_1", "q_1");
        let mut flushed = None;
        for i in 0..DEFAULT_MAX_BATCH {
            flushed = slot.push(info_msg(&format!("m{i}")));
            if flushed.is_some() {
                break;
            }
        }
        let (_, batch) = flushed.expect("threshold flush");
        assert_eq!(batch.messages.len(), DEFAULT_MAX_BATCH);
    }

    #[test]
    fn rearm_returns_pending_batch() {
        let slot = BatchSlot::new();
        let _ = slot.arm("conn_1", "q_1");
        let _ = slot.push(info_msg("left over"));

        let pending = slot.arm("conn_2", "q_2");
        let (conn, batch) = pending.unwrap();
        assert_eq!(conn, "conn_1");
        assert_eq!(batch.query_id, "q_1");
    }
}
