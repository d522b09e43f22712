//! 📦 Batcher — collects records until a batch is worth a round trip.
//!
//! Two triggers, whichever trips first: document count or estimated request bytes.
//! The batcher never talks to the network. It just says "now" and hands over the pile.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

// -- 📏 `{"create":{}}` (13) plus its newline plus the document's newline
const ACTION_LINE_OVERHEAD_BYTES: usize = 15;

/// 🚰 When to flush.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FlushConfig {
    #[serde(default = "default_max_batch_docs")]
    pub max_batch_docs: usize,
    #[serde(default = "default_max_request_size_bytes")]
    pub max_request_size_bytes: usize,
}

fn default_max_batch_docs() -> usize {
    1000
}

// 🚰 10MB — the same limit as your email attachment policy. Coincidence? Absolutely yes.
fn default_max_request_size_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            max_batch_docs: default_max_batch_docs(),
            max_request_size_bytes: default_max_request_size_bytes(),
        }
    }
}

/// 📦 Pending records plus a running byte estimate.
#[derive(Debug)]
pub struct Batcher {
    pending: Vec<(DateTime<Utc>, Value)>,
    pending_bytes: usize,
    config: FlushConfig,
}

impl Batcher {
    pub fn new(config: FlushConfig) -> Self {
        Self {
            pending: Vec::new(),
            pending_bytes: 0,
            config,
        }
    }

    /// ➕ Add one record. `document_bytes` is the size of its serialized form, as shipped.
    ///
    /// Ask [`Batcher::would_overflow`] first: `add` trusts you did.
    pub fn add(&mut self, event_time: DateTime<Utc>, document: Value, document_bytes: usize) {
        self.pending_bytes += document_bytes + ACTION_LINE_OVERHEAD_BYTES;
        self.pending.push((event_time, document));
    }

    /// 🚧 Would adding a `document_bytes` document push the pending request past the byte limit?
    ///
    /// We check overflow BEFORE appending, so a request only goes over the limit when a
    /// single document is bigger than the limit all by itself. An empty batcher never
    /// overflows: that lone chonker has to ship somehow.
    pub fn would_overflow(&self, document_bytes: usize) -> bool {
        !self.pending.is_empty()
            && self.pending_bytes + document_bytes + ACTION_LINE_OVERHEAD_BYTES
                > self.config.max_request_size_bytes
    }

    /// ✅ Full by count, or at/over the byte limit. Checked after each `add`.
    pub fn should_flush(&self) -> bool {
        !self.pending.is_empty()
            && (self.pending.len() >= self.config.max_batch_docs
                || self.pending_bytes >= self.config.max_request_size_bytes)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// 📏 Estimated wire size of what's pending, action lines and newlines included.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// 🗑️ Hand over everything pending and start fresh.
    pub fn drain(&mut self) -> Vec<(DateTime<Utc>, Value)> {
        self.pending_bytes = 0;
        std::mem::take(&mut self.pending)
    }
}
