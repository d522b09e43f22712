//! 📡 Bulk encoding — formatting log records for the bulk API's peculiar tastes 🚀
//!
//! 🎬 COLD OPEN — INT. ELASTICSEARCH CLUSTER — BULK ENDPOINT — HIGH NOON
//!
//! The bulk API has rules. Data streams add one more.
//!
//! Rule 1: Two lines per document. Action metadata, then document source. Always.
//! Rule 2: Newline-delimited. Not comma-separated. Not XML. NEWLINES.
//! Rule 3: The trailing newline on the whole body matters. It MATTERS.
//! Rule 4: Data streams are append-only. The action is `create`. Not `index`.
//!         Not `update`. A data stream will bounce anything else right back at you.
//!
//! ## Knowledge Graph 🧠
//! - Input: `(timestamp, document)` pairs, in order
//! - Output: [`BulkRequestBody`] — N records in, N [`BulkLine`]s out, 2N NDJSON lines on the wire
//! - The document is shipped as-is. If it needs a `@timestamp`, it brings its own
//!   (the adapter stamps it before we get here)
//!
//! 🦆

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// 🎬 The action half of a bulk pair. Serializes to `{"create":{}}`.
///
/// Only one variant, on purpose. There is no `Index`. There is no `Update`.
/// If you came here looking for them, the data stream sends its regards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    Create(CreateMeta),
}

/// 📎 Metadata for a `create` action. Empty: the URL already names the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CreateMeta {}

/// 🧦 One action line and one document line. Like socks. You need both.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkLine {
    pub action: BulkAction,
    pub document: Value,
}

/// 📦 An ordered pile of [`BulkLine`]s, ready to become one `_bulk` request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkRequestBody {
    lines: Vec<BulkLine>,
}

impl BulkRequestBody {
    pub fn lines(&self) -> &[BulkLine] {
        &self.lines
    }

    /// 🔢 Number of documents, not number of NDJSON lines. That's double this.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// 📡 Render the wire form: `action\ndocument\n` per line, trailing `\n` included.
    ///
    /// Compact serde output never contains a raw newline, so every pair is exactly two lines.
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        // -- 🧮 vibes-based pre-allocation: action lines are tiny, documents are not
        let mut payload = String::with_capacity(self.lines.len() * 128);
        for line in &self.lines {
            payload.push_str(&serde_json::to_string(&line.action)?);
            payload.push('\n');
            payload.push_str(&serde_json::to_string(&line.document)?);
            payload.push('\n');
        }
        Ok(payload)
    }
}

/// 🔄 Turns `(timestamp, document)` pairs into a [`BulkRequestBody`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkBatchEncoder;

impl BulkBatchEncoder {
    /// 🔄 One `create` line per record, input order preserved.
    ///
    /// The timestamp rides along for the caller's benefit only. The encoder doesn't
    /// inject it: the document is expected to carry its own timestamp field already.
    pub fn encode<I>(records: I) -> BulkRequestBody
    where
        I: IntoIterator<Item = (DateTime<Utc>, Value)>,
    {
        let lines = records
            .into_iter()
            .map(|(_event_time, document)| BulkLine {
                action: BulkAction::Create(CreateMeta {}),
                document,
            })
            .collect();
        BulkRequestBody { lines }
    }
}
