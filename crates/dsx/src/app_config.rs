//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! ⚠️ Loading config does NOT validate the data stream name. That happens when the
//! adapter starts, right before the network would have been involved.

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::adapter::DataStreamConfig;
use crate::backends::ClusterConfig;
use crate::batcher::FlushConfig;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📡 Where the cluster is and how to talk to it.
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// 🌊 Which data stream, and what to call its policy and template.
    #[serde(default)]
    pub data_stream: DataStreamConfig,
    /// 📦 When a batch is big enough to ship.
    #[serde(default)]
    pub sink: FlushConfig,
    /// 🎭 Record everything, ship nothing. Swaps in the in-memory cluster.
    #[serde(default)]
    pub dry_run: bool,
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`DSX_*`, nested with `__`) with an optional TOML file.
///
/// 📐 DESIGN NOTE:
///   - If `config_file_name` is None  → env vars only.
///   - If `config_file_name` is Some  → env vars + TOML file, merged. TOML wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    // 🏗️ Env vars are the base layer. DSX_DATA_STREAM__DATA_STREAM_NAME=logs and friends.
    let config = Figment::new().merge(Env::prefixed("DSX_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (DSX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (DSX_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
