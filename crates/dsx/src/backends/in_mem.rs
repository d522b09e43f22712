//! # Previously, on dsx...
//!
//! 🎬 The cluster was down. Or far away. Or a test. Someone had to pretend to be it.
//! Someone had to write down every single thing that was asked of it, so the tests
//! could go back and count. That someone was this module.
//!
//! `in_mem` provides [`InMemoryCluster`], a scriptable stand-in for a real cluster.
//! It remembers which streams exist, answers version questions with whatever
//! you told it to, and records every call in order so assertions can check the
//! exact sequence a bootstrap took.
//!
//! ✅ No network calls. No disk I/O. Also powers `dry_run`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::backends::{ClusterClient, ClusterError, VersionDetector};
use crate::bulk::BulkRequestBody;

/// 📝 One call made against the in-memory cluster, in the order it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    PutLifecyclePolicy(String),
    PutIndexTemplate {
        name: String,
        pattern: String,
        lifecycle_policy: String,
    },
    DataStreamExists(String),
    PutDataStream(String),
    BulkWrite { stream: String, body: String },
}

/// 🎛️ Which call should blow up on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailingStep {
    LifecyclePolicy,
    IndexTemplate,
    ExistenceCheck,
    CreateStream,
    BulkWrite,
}

#[derive(Debug)]
struct InMemoryState {
    calls: Vec<ClusterCall>,
    version_queries: usize,
    major_version: Result<u32, String>,
    streams: HashSet<String>,
    // -- 🏁 streams some other instance creates between our check and our create
    racing_streams: HashSet<String>,
    not_found_as_error: bool,
    failing: HashSet<FailingStep>,
}

/// 📦 A cluster that lives in RAM and never forgets what you asked it.
///
/// Clone-able because tests hand one copy to the adapter and keep another for
/// peeking. The `Arc` means they share the same brain.
#[derive(Debug, Clone)]
pub struct InMemoryCluster {
    state: Arc<Mutex<InMemoryState>>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    /// 🚀 A fresh, empty, modern (major version 8) cluster.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryState {
                calls: Vec::new(),
                version_queries: 0,
                major_version: Ok(8),
                streams: HashSet::new(),
                racing_streams: HashSet::new(),
                not_found_as_error: false,
                failing: HashSet::new(),
            })),
        }
    }

    /// # Panics
    ///
    /// All `with_*` builders panic once the cluster has been cloned: a shared
    /// cluster can't be rescripted without some clone missing the memo.
    pub fn with_major_version(self, major: u32) -> Self {
        self.tweak(|state| state.major_version = Ok(major))
    }

    /// 🙈 Version detection itself fails, with this reason.
    pub fn with_undetectable_version(self, reason: &str) -> Self {
        let reason = reason.to_owned();
        self.tweak(move |state| state.major_version = Err(reason))
    }

    pub fn with_existing_stream(self, name: &str) -> Self {
        let name = name.to_owned();
        self.tweak(move |state| {
            state.streams.insert(name);
        })
    }

    /// 🏁 The existence check says "nope", then someone else creates the stream
    /// before our create lands.
    pub fn with_racing_stream(self, name: &str) -> Self {
        let name = name.to_owned();
        self.tweak(move |state| {
            state.racing_streams.insert(name);
        })
    }

    /// 🔍 Report a missing stream as `Err(NotFound)` instead of `Ok(false)`.
    pub fn with_not_found_as_error(self) -> Self {
        self.tweak(|state| state.not_found_as_error = true)
    }

    pub fn with_failing(self, step: FailingStep) -> Self {
        self.tweak(move |state| {
            state.failing.insert(step);
        })
    }

    // -- 🔧 scripting only makes sense before the cluster is handed out.
    // A clone already in someone else's hands would miss the script, so that's a panic.
    fn tweak(mut self, f: impl FnOnce(&mut InMemoryState)) -> Self {
        match Arc::get_mut(&mut self.state) {
            Some(state) => f(state.get_mut()),
            None => panic!(
                "💀 InMemoryCluster scripted after it was cloned. Script it first, clone it after."
            ),
        }
        self
    }

    /// 📋 Every client call so far, in order. Version queries are not in here.
    pub async fn calls(&self) -> Vec<ClusterCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn version_queries(&self) -> usize {
        self.state.lock().await.version_queries
    }

    pub async fn stream_exists(&self, name: &str) -> bool {
        self.state.lock().await.streams.contains(name)
    }

    /// 📦 The NDJSON bodies that were "shipped", in order.
    pub async fn bulk_bodies(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                ClusterCall::BulkWrite { body, .. } => Some(body.clone()),
                _ => None,
            })
            .collect()
    }
}

fn scripted_failure(step: FailingStep) -> ClusterError {
    ClusterError::other(format!("in-memory cluster was told to fail at {step:?}"))
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn put_lifecycle_policy(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(ClusterCall::PutLifecyclePolicy(name.to_owned()));
        if state.failing.contains(&FailingStep::LifecyclePolicy) {
            return Err(scripted_failure(FailingStep::LifecyclePolicy));
        }
        Ok(())
    }

    async fn put_index_template(
        &self,
        name: &str,
        pattern: &str,
        lifecycle_policy: &str,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        state.calls.push(ClusterCall::PutIndexTemplate {
            name: name.to_owned(),
            pattern: pattern.to_owned(),
            lifecycle_policy: lifecycle_policy.to_owned(),
        });
        if state.failing.contains(&FailingStep::IndexTemplate) {
            return Err(scripted_failure(FailingStep::IndexTemplate));
        }
        Ok(())
    }

    async fn data_stream_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(ClusterCall::DataStreamExists(name.to_owned()));
        if state.failing.contains(&FailingStep::ExistenceCheck) {
            return Err(scripted_failure(FailingStep::ExistenceCheck));
        }
        let exists = state.streams.contains(name);
        if !exists && state.not_found_as_error {
            return Err(ClusterError::NotFound(name.to_owned()));
        }
        // -- 🏁 the racer sneaks in right after we looked
        if state.racing_streams.remove(name) {
            state.streams.insert(name.to_owned());
        }
        Ok(exists)
    }

    async fn put_data_stream(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        state.calls.push(ClusterCall::PutDataStream(name.to_owned()));
        if state.failing.contains(&FailingStep::CreateStream) {
            return Err(scripted_failure(FailingStep::CreateStream));
        }
        if !state.streams.insert(name.to_owned()) {
            return Err(ClusterError::AlreadyExists(name.to_owned()));
        }
        debug!("🌊 in-memory data stream '{}' is born", name);
        Ok(())
    }

    async fn bulk_write(&self, stream: &str, body: &BulkRequestBody) -> Result<(), ClusterError> {
        let payload = body
            .to_ndjson()
            .map_err(|e| ClusterError::other_with_source("bulk body refused to serialize", e))?;
        let mut state = self.state.lock().await;
        state.calls.push(ClusterCall::BulkWrite {
            stream: stream.to_owned(),
            body: payload,
        });
        if state.failing.contains(&FailingStep::BulkWrite) {
            return Err(scripted_failure(FailingStep::BulkWrite));
        }
        Ok(())
    }
}

#[async_trait]
impl VersionDetector for InMemoryCluster {
    async fn detect_major_version(&self) -> Result<u32, ClusterError> {
        let mut state = self.state.lock().await;
        state.version_queries += 1;
        state.major_version.clone().map_err(ClusterError::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_creating_twice_gets_you_a_conflict() {
        let cluster = InMemoryCluster::new();
        assert!(cluster.put_data_stream("logs").await.is_ok());
        assert!(matches!(
            cluster.put_data_stream("logs").await,
            Err(ClusterError::AlreadyExists(name)) if name == "logs"
        ));
        assert!(cluster.stream_exists("logs").await);
    }

    #[tokio::test]
    async fn the_one_where_the_racer_shows_up_after_the_check() {
        let cluster = InMemoryCluster::new().with_racing_stream("logs");
        assert!(!cluster.data_stream_exists("logs").await.unwrap());
        assert!(cluster.stream_exists("logs").await);
    }

    #[tokio::test]
    async fn the_one_where_failing_steps_stack_up() {
        let cluster = InMemoryCluster::new()
            .with_failing(FailingStep::ExistenceCheck)
            .with_failing(FailingStep::CreateStream)
            .with_failing(FailingStep::ExistenceCheck);
        assert!(cluster.put_lifecycle_policy("logs_policy").await.is_ok());
        assert!(matches!(
            cluster.data_stream_exists("logs").await,
            Err(ClusterError::Other { .. })
        ));
        assert!(matches!(
            cluster.put_data_stream("logs").await,
            Err(ClusterError::Other { .. })
        ));
        assert!(!cluster.stream_exists("logs").await);
    }

    #[test]
    #[should_panic(expected = "scripted after it was cloned")]
    fn the_one_where_scripting_a_shared_cluster_is_loud() {
        let cluster = InMemoryCluster::new();
        let _peeker = cluster.clone();
        let _ = cluster.with_existing_stream("logs");
    }

    #[tokio::test]
    async fn the_one_where_every_call_leaves_a_receipt() {
        let cluster = InMemoryCluster::new().with_existing_stream("logs");
        cluster.put_lifecycle_policy("logs_policy").await.unwrap();
        assert!(cluster.data_stream_exists("logs").await.unwrap());
        assert_eq!(
            cluster.calls().await,
            vec![
                ClusterCall::PutLifecyclePolicy("logs_policy".into()),
                ClusterCall::DataStreamExists("logs".into()),
            ]
        );
        assert_eq!(cluster.version_queries().await, 0);
    }
}
