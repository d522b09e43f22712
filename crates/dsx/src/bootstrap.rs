//! 🏗️ Bootstrap — the one-time ritual before a data stream accepts a single log line.
//!
//! 🎬 *[camera pans across an empty cluster]*
//! 🎬 "In a world where data streams don't create themselves..."
//! 🎬 "One bootstrapper dared to PUT three things, in order."
//!
//! 📐 The sequence, strictly in order, never in parallel:
//! 0. ask the version detector if the cluster even knows what a data stream is
//! 1. PUT the lifecycle policy
//! 2. PUT the index template (bound to `<stream>*`)
//! 3. GET the data stream. Exists? We're done. Missing? On to 4.
//! 4. PUT the data stream. "Already exists" here is success, not failure.
//!
//! 🧠 Knowledge graph: step 3 is an optimization. Step 4's conflict handling is the
//! actual guarantee. Two instances starting at the same moment both get through,
//! no locks, no leader election, no drama.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backends::{ClusterClient, ClusterError, VersionDetector};
use crate::stream_name::StreamIdentifier;

/// 🕰️ Oldest cluster major version that ships data streams.
pub const MIN_DATA_STREAM_MAJOR_VERSION: u32 = 7;

/// 💀 Every way a bootstrap can go sideways. All fatal for this startup, none retried here.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("💀 cluster major version {detected} does not support data streams (need >= {minimum})")]
    UnsupportedCluster { detected: u32, minimum: u32 },

    #[error("💀 could not tell which cluster version we're talking to, refusing to bootstrap '{stream}'")]
    VersionUnknown {
        stream: String,
        #[source]
        source: ClusterError,
    },

    #[error("💀 failed to put lifecycle policy '{policy}'")]
    PolicyFailed {
        policy: String,
        #[source]
        source: ClusterError,
    },

    #[error("💀 failed to put index template '{template}'")]
    TemplateFailed {
        template: String,
        #[source]
        source: ClusterError,
    },

    #[error("💀 failed to check whether data stream '{stream}' exists")]
    CheckFailed {
        stream: String,
        #[source]
        source: ClusterError,
    },

    #[error("💀 failed to create data stream '{stream}'")]
    CreateFailed {
        stream: String,
        #[source]
        source: ClusterError,
    },
}

/// 📛 How policy and template names get picked. Overrides win, otherwise `<stream>_policy`
/// and `<stream>_template`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceNaming {
    pub ilm_name: Option<String>,
    pub template_name: Option<String>,
}

impl ResourceNaming {
    pub fn policy_name(&self, stream: &StreamIdentifier) -> String {
        self.ilm_name
            .clone()
            .unwrap_or_else(|| format!("{stream}_policy"))
    }

    pub fn template_name(&self, stream: &StreamIdentifier) -> String {
        self.template_name
            .clone()
            .unwrap_or_else(|| format!("{stream}_template"))
    }

    pub fn index_pattern(&self, stream: &StreamIdentifier) -> String {
        format!("{stream}*")
    }
}

/// 🏗️ Makes sure the policy, template, and stream exist. Holds borrowed collaborators only,
/// nothing cached between calls.
#[derive(Debug)]
pub struct ResourceBootstrapper<'a, C: ?Sized, V: ?Sized> {
    client: &'a C,
    detector: &'a V,
    naming: ResourceNaming,
}

impl<'a, C, V> ResourceBootstrapper<'a, C, V>
where
    C: ClusterClient + ?Sized,
    V: VersionDetector + ?Sized,
{
    pub fn new(client: &'a C, detector: &'a V, naming: ResourceNaming) -> Self {
        Self {
            client,
            detector,
            naming,
        }
    }

    /// 🚀 Run the bootstrap sequence for `stream`. See the module docs for the steps.
    pub async fn ensure(&self, stream: &StreamIdentifier) -> Result<(), BootstrapError> {
        self.check_cluster_supports_data_streams(stream).await?;

        let policy = self.naming.policy_name(stream);
        debug!("📜 putting lifecycle policy '{}'", policy);
        self.client
            .put_lifecycle_policy(&policy)
            .await
            .map_err(|source| BootstrapError::PolicyFailed {
                policy: policy.clone(),
                source,
            })?;

        let template = self.naming.template_name(stream);
        let pattern = self.naming.index_pattern(stream);
        debug!("🧩 putting index template '{}' for '{}'", template, pattern);
        self.client
            .put_index_template(&template, &pattern, &policy)
            .await
            .map_err(|source| BootstrapError::TemplateFailed {
                template: template.clone(),
                source,
            })?;

        let name = stream.as_str();
        let exists = match self.client.data_stream_exists(name).await {
            Ok(exists) => exists,
            Err(ClusterError::NotFound(_)) => false,
            Err(source) => {
                return Err(BootstrapError::CheckFailed {
                    stream: name.to_owned(),
                    source,
                });
            }
        };
        if exists {
            info!("✅ data stream '{}' already exists, skipping creation", name);
            return Ok(());
        }

        match self.client.put_data_stream(name).await {
            Ok(()) => {
                info!("🌊 created data stream '{}'", name);
                Ok(())
            }
            // -- 👯 lost the race to another instance. same outcome, different author.
            Err(ClusterError::AlreadyExists(_)) => {
                warn!(
                    "👯 data stream '{}' appeared between our check and our create, carrying on",
                    name
                );
                Ok(())
            }
            Err(source) => Err(BootstrapError::CreateFailed {
                stream: name.to_owned(),
                source,
            }),
        }
    }

    async fn check_cluster_supports_data_streams(
        &self,
        stream: &StreamIdentifier,
    ) -> Result<(), BootstrapError> {
        let detected = self
            .detector
            .detect_major_version()
            .await
            .map_err(|source| BootstrapError::VersionUnknown {
                stream: stream.to_string(),
                source,
            })?;
        if detected < MIN_DATA_STREAM_MAJOR_VERSION {
            return Err(BootstrapError::UnsupportedCluster {
                detected,
                minimum: MIN_DATA_STREAM_MAJOR_VERSION,
            });
        }
        debug!("🕰️ cluster major version {} supports data streams", detected);
        Ok(())
    }
}
