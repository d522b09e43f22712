//! 🚪 The output adapter — the thin layer that holds the other three together.
//!
//! On start: validate the name, bootstrap once. On flush: stamp, encode, ship.
//! Nothing clever lives here on purpose; the interesting rules live in
//! `stream_name`, `bootstrap`, and `bulk`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::backends::{ClusterClient, ClusterError, VersionDetector};
use crate::bootstrap::{BootstrapError, ResourceBootstrapper, ResourceNaming};
use crate::bulk::BulkBatchEncoder;
use crate::stream_name::{self, ConfigError, StreamIdentifier};

/// 🌊 Everything about the data stream itself.
#[derive(Debug, Deserialize, Clone)]
pub struct DataStreamConfig {
    /// 🏷️ The one required knob. Validated before anything talks to the network.
    #[serde(default)]
    pub data_stream_name: Option<String>,
    /// 📜 Lifecycle policy name. Defaults to `<stream>_policy`.
    #[serde(default)]
    pub ilm_name: Option<String>,
    /// 🧩 Index template name. Defaults to `<stream>_template`.
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default = "default_timestamp_key")]
    pub timestamp_key: String,
    /// 🕰️ Stamp records that show up without `timestamp_key`.
    #[serde(default = "default_include_timestamp")]
    pub include_timestamp: bool,
}

fn default_timestamp_key() -> String {
    "@timestamp".to_string()
}

fn default_include_timestamp() -> bool {
    true
}

impl Default for DataStreamConfig {
    fn default() -> Self {
        Self {
            data_stream_name: None,
            ilm_name: None,
            template_name: None,
            timestamp_key: default_timestamp_key(),
            include_timestamp: default_include_timestamp(),
        }
    }
}

impl DataStreamConfig {
    pub fn naming(&self) -> ResourceNaming {
        ResourceNaming {
            ilm_name: self.ilm_name.clone(),
            template_name: self.template_name.clone(),
        }
    }
}

/// 💀 Why an adapter refused to start, or why a flush didn't land.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error("💀 bulk write into data stream '{stream}' failed")]
    Write {
        stream: String,
        #[source]
        source: ClusterError,
    },
}

/// 🚪 A started adapter: the name is valid and the stream is bootstrapped.
#[derive(Debug)]
pub struct OutputAdapter<C> {
    client: C,
    stream: StreamIdentifier,
    timestamp_key: String,
    include_timestamp: bool,
}

impl<C> OutputAdapter<C>
where
    C: ClusterClient + VersionDetector,
{
    /// 🚀 Validate, then bootstrap, exactly once. A bad name never reaches the client.
    pub async fn start(config: &DataStreamConfig, client: C) -> Result<Self, AdapterError> {
        let stream = stream_name::validate(config.data_stream_name.as_deref())?;
        info!("🏗️ bootstrapping data stream '{}'", stream);

        ResourceBootstrapper::new(&client, &client, config.naming())
            .ensure(&stream)
            .await?;

        Ok(Self {
            client,
            stream,
            timestamp_key: config.timestamp_key.clone(),
            include_timestamp: config.include_timestamp,
        })
    }

    pub fn stream(&self) -> &StreamIdentifier {
        &self.stream
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// 📦 Ship one batch. Returns how many documents went out. An empty batch sends nothing.
    pub async fn flush(&self, records: Vec<(DateTime<Utc>, Value)>) -> Result<usize, AdapterError> {
        if records.is_empty() {
            return Ok(0);
        }
        let stamped = records
            .into_iter()
            .map(|(event_time, document)| (event_time, self.stamp(event_time, document)));
        let body = BulkBatchEncoder::encode(stamped);
        let shipped = body.len();

        debug!("📦 flushing {} docs into '{}'", shipped, self.stream);
        self.client
            .bulk_write(self.stream.as_str(), &body)
            .await
            .map_err(|source| AdapterError::Write {
                stream: self.stream.to_string(),
                source,
            })?;
        Ok(shipped)
    }

    /// 🕰️ Add `timestamp_key` to an object that didn't bring its own. Anything else passes
    /// through untouched, so stamping twice is the same as stamping once.
    pub fn stamp(&self, event_time: DateTime<Utc>, mut document: Value) -> Value {
        if !self.include_timestamp {
            return document;
        }
        if let Value::Object(ref mut fields) = document {
            if !fields.contains_key(&self.timestamp_key) {
                fields.insert(
                    self.timestamp_key.clone(),
                    Value::String(event_time.to_rfc3339_opts(SecondsFormat::Millis, true)),
                );
            }
        }
        document
    }
}
