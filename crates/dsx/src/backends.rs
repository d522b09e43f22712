//! 🔌 Backends — the cluster on the other end of the wire.
//!
//! 🚰 The bootstrapper asks questions ("does this stream exist?"), the adapter ships
//! payloads, and somebody has to actually talk to the cluster. That somebody lives here.
//!
//! 🧠 Knowledge graph:
//! - [`ClusterClient`]: the five calls the data stream lifecycle needs
//! - [`VersionDetector`]: "how old is this cluster?" asked once per bootstrap
//! - [`ClusterError`]: every failure gets sorted into NotFound / AlreadyExists / Other
//!   by the backend, so the core never squints at status codes
//! - [`ClusterBackend`]: enum dispatch over Elasticsearch and the in-memory double
//!
//! 🦆 The duck is here because every file must have one. This is law.

use async_trait::async_trait;
use thiserror::Error;

use crate::bulk::BulkRequestBody;

pub mod elasticsearch;
pub mod in_mem;

pub use elasticsearch::{ClusterConfig, ElasticsearchCluster};
pub use in_mem::{ClusterCall, FailingStep, InMemoryCluster};

/// 🗂️ How a backend classifies a failed call.
///
/// The split matters exactly twice: "not found" on the existence check means
/// "go create it", and "already exists" on creation means "someone beat us to it,
/// which is fine". Everything else is [`ClusterError::Other`].
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("🔍 '{0}' was not found on the cluster")]
    NotFound(String),

    #[error("👯 '{0}' already exists on the cluster")]
    AlreadyExists(String),

    #[error("💀 {message}")]
    Other {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ClusterError {
    pub fn other(message: impl Into<String>) -> Self {
        ClusterError::Other {
            message: message.into(),
            source: None,
        }
    }

    pub fn other_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ClusterError::Other {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// 📡 The cluster calls a data stream needs, from "set up the rules" to "here are the logs".
///
/// # Contract 📜
/// - PUTs are idempotent. Calling them twice is boring, not broken.
/// - `data_stream_exists` answers `Ok(false)` (or `Err(NotFound)`) when the stream is missing.
/// - `put_data_stream` answers `Err(AlreadyExists)` when the stream is already there.
/// - No retries in here. Timeouts come back as `Other`.
#[async_trait]
pub trait ClusterClient: std::fmt::Debug + Send + Sync {
    /// 📜 Create or replace the lifecycle policy named `name`.
    async fn put_lifecycle_policy(&self, name: &str) -> Result<(), ClusterError>;

    /// 🧩 Create or replace an index template matching `pattern`, managed by `lifecycle_policy`.
    async fn put_index_template(
        &self,
        name: &str,
        pattern: &str,
        lifecycle_policy: &str,
    ) -> Result<(), ClusterError>;

    /// 🔍 Does the data stream `name` exist yet?
    async fn data_stream_exists(&self, name: &str) -> Result<bool, ClusterError>;

    /// 🌊 Create the data stream `name`.
    async fn put_data_stream(&self, name: &str) -> Result<(), ClusterError>;

    /// 📦 Ship one bulk body into the stream `stream`.
    async fn bulk_write(&self, stream: &str, body: &BulkRequestBody) -> Result<(), ClusterError>;
}

/// 🕰️ Tells us the cluster's major version, so we don't bootstrap a stream on a cluster
/// that predates the very idea of one.
#[async_trait]
pub trait VersionDetector: std::fmt::Debug + Send + Sync {
    async fn detect_major_version(&self) -> Result<u32, ClusterError>;
}

/// 🎭 The many faces of a cluster — real Elasticsearch, or a very convincing impression of one.
#[derive(Debug)]
pub enum ClusterBackend {
    Elasticsearch(ElasticsearchCluster),
    InMemory(InMemoryCluster),
}

impl ClusterBackend {
    /// 🏗️ Pick a backend from config. `dry_run` swaps the real cluster for the in-memory one,
    /// which records everything and ships nothing.
    pub fn from_config(config: &ClusterConfig, dry_run: bool) -> Result<Self, ClusterError> {
        if dry_run {
            return Ok(ClusterBackend::InMemory(InMemoryCluster::new()));
        }
        Ok(ClusterBackend::Elasticsearch(ElasticsearchCluster::new(
            config.clone(),
        )?))
    }
}

#[async_trait]
impl ClusterClient for ClusterBackend {
    async fn put_lifecycle_policy(&self, name: &str) -> Result<(), ClusterError> {
        match self {
            ClusterBackend::Elasticsearch(c) => c.put_lifecycle_policy(name).await,
            ClusterBackend::InMemory(c) => c.put_lifecycle_policy(name).await,
        }
    }

    async fn put_index_template(
        &self,
        name: &str,
        pattern: &str,
        lifecycle_policy: &str,
    ) -> Result<(), ClusterError> {
        match self {
            ClusterBackend::Elasticsearch(c) => {
                c.put_index_template(name, pattern, lifecycle_policy).await
            }
            ClusterBackend::InMemory(c) => {
                c.put_index_template(name, pattern, lifecycle_policy).await
            }
        }
    }

    async fn data_stream_exists(&self, name: &str) -> Result<bool, ClusterError> {
        match self {
            ClusterBackend::Elasticsearch(c) => c.data_stream_exists(name).await,
            ClusterBackend::InMemory(c) => c.data_stream_exists(name).await,
        }
    }

    async fn put_data_stream(&self, name: &str) -> Result<(), ClusterError> {
        match self {
            ClusterBackend::Elasticsearch(c) => c.put_data_stream(name).await,
            ClusterBackend::InMemory(c) => c.put_data_stream(name).await,
        }
    }

    async fn bulk_write(&self, stream: &str, body: &BulkRequestBody) -> Result<(), ClusterError> {
        match self {
            ClusterBackend::Elasticsearch(c) => c.bulk_write(stream, body).await,
            ClusterBackend::InMemory(c) => c.bulk_write(stream, body).await,
        }
    }
}

#[async_trait]
impl VersionDetector for ClusterBackend {
    async fn detect_major_version(&self) -> Result<u32, ClusterError> {
        match self {
            ClusterBackend::Elasticsearch(c) => c.detect_major_version().await,
            ClusterBackend::InMemory(c) => c.detect_major_version().await,
        }
    }
}
