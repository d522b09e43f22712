//! 🌊 dsx — ships NDJSON log records into an Elasticsearch data stream.
//!
//! 🧠 Knowledge graph:
//! - `stream_name`: is this name even allowed? (pure)
//! - `bootstrap`: policy → template → stream, once per start, race tolerant
//! - `bulk`: records → `create` pairs → NDJSON
//! - `adapter`: start = validate + bootstrap, flush = stamp + encode + ship
//! - `batcher`: when is a pile of records a batch?
//! - `backends`: the cluster, real or in-memory
//! - `app_config`: figment, TOML, `DSX_*`

pub mod adapter;
pub mod app_config;
pub mod backends;
pub mod batcher;
pub mod bootstrap;
pub mod bulk;
pub mod stream_name;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use crate::adapter::OutputAdapter;
use crate::app_config::AppConfig;
use crate::backends::{ClusterBackend, ClusterClient, VersionDetector};
use crate::batcher::{Batcher, FlushConfig};

/// 📊 What a run got done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub documents: usize,
    pub skipped_lines: usize,
}

/// 🚀 Build the backend, start the adapter (validate + bootstrap), then pump `input` dry.
pub async fn run<R>(app_config: AppConfig, input: R) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
{
    let backend = ClusterBackend::from_config(&app_config.cluster, app_config.dry_run)
        .context("💀 Couldn't build the cluster client. Check the [cluster] section.")?;

    let adapter = OutputAdapter::start(&app_config.data_stream, backend)
        .await
        .context("💀 The adapter refused to start. Nothing was written.")?;

    pump(&adapter, &app_config.sink, input).await
}

/// 🚰 Read NDJSON records from `input` and flush them through `adapter` in batches.
///
/// Lines that aren't JSON get logged and skipped. Blank lines are ignored outright.
pub async fn pump<C, R>(
    adapter: &OutputAdapter<C>,
    flush_config: &FlushConfig,
    input: R,
) -> Result<RunSummary>
where
    C: ClusterClient + VersionDetector,
    R: AsyncBufRead + Unpin,
{
    let mut summary = RunSummary::default();
    let mut batcher = Batcher::new(flush_config.clone());
    let mut lines = input.lines();

    while let Some(line) = lines
        .next_line()
        .await
        .context("💀 Reading input failed mid-stream. The pipe sprang a leak.")?
    {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let document = match serde_json::from_str::<Value>(trimmed) {
            Ok(document) => document,
            Err(e) => {
                warn!("⚠️ skipping a line that isn't JSON: {}", e);
                summary.skipped_lines += 1;
                continue;
            }
        };

        // -- 📏 measure the document as it will ship: stamped and compact
        let event_time = Utc::now();
        let document = adapter.stamp(event_time, document);
        let document_bytes = serde_json::to_string(&document)
            .context("💀 A parsed record refused to serialize back. JSON had a moment.")?
            .len();

        // 🚧 make room BEFORE appending, so a request only breaks the byte limit alone
        if batcher.would_overflow(document_bytes) {
            flush_batch(adapter, &mut batcher, &mut summary).await?;
        }
        batcher.add(event_time, document, document_bytes);
        if batcher.should_flush() {
            flush_batch(adapter, &mut batcher, &mut summary).await?;
        }
    }

    if !batcher.is_empty() {
        flush_batch(adapter, &mut batcher, &mut summary).await?;
    }
    info!(
        "✅ shipped {} docs in {} batches into '{}'",
        summary.documents,
        summary.batches,
        adapter.stream()
    );
    Ok(summary)
}

async fn flush_batch<C>(
    adapter: &OutputAdapter<C>,
    batcher: &mut Batcher,
    summary: &mut RunSummary,
) -> Result<()>
where
    C: ClusterClient + VersionDetector,
{
    let shipped = adapter
        .flush(batcher.drain())
        .await
        .context("💀 A batch didn't make it. No retries here; rerun with the same input.")?;
    summary.batches += 1;
    summary.documents += shipped;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::DataStreamConfig;
    use crate::backends::{ClusterConfig, InMemoryCluster};

    fn data_stream(name: &str) -> DataStreamConfig {
        DataStreamConfig {
            data_stream_name: Some(name.to_string()),
            ..DataStreamConfig::default()
        }
    }

    #[tokio::test]
    async fn the_one_where_five_lines_become_three_batches() {
        let cluster = InMemoryCluster::new();
        let adapter = OutputAdapter::start(&data_stream("logs"), cluster.clone())
            .await
            .unwrap();
        let input = "{\"n\":1}\n{\"n\":2}\n\n{\"n\":3}\nnot json\n{\"n\":4}\n{\"n\":5}\n";
        let flush = FlushConfig {
            max_batch_docs: 2,
            ..FlushConfig::default()
        };

        let summary = pump(&adapter, &flush, input.as_bytes()).await.unwrap();

        assert_eq!(
            summary,
            RunSummary {
                batches: 3,
                documents: 5,
                skipped_lines: 1
            }
        );
        let bodies = cluster.bulk_bodies().await;
        assert_eq!(
            bodies.iter().map(|b| b.lines().count()).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
    }

    #[tokio::test]
    async fn the_one_where_stamped_requests_stay_under_the_byte_limit() {
        let cluster = InMemoryCluster::new();
        let adapter = OutputAdapter::start(&data_stream("logs"), cluster.clone())
            .await
            .unwrap();
        // 🧪 each record ships as 14 (action) + 47 (`{"@timestamp":"…Z","n":1}`) + 1 = 62 bytes,
        // so two fit under 130 and a third would not
        let limit = 130;
        let flush = FlushConfig {
            max_batch_docs: 1000,
            max_request_size_bytes: limit,
        };
        let input = "{\"n\":1}\n{\"n\":2}\n{\"n\":3}\n{\"n\":4}\n{\"n\":5}\n";

        let summary = pump(&adapter, &flush, input.as_bytes()).await.unwrap();

        assert_eq!(summary.documents, 5);
        let bodies = cluster.bulk_bodies().await;
        assert_eq!(
            bodies.iter().map(|b| b.lines().count() / 2).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        for body in &bodies {
            assert!(
                body.len() <= limit,
                "💀 a {}-byte request got past a {limit}-byte limit",
                body.len()
            );
            assert!(body.contains("@timestamp"), "💀 the stamp went missing");
        }
    }

    #[tokio::test]
    async fn the_one_where_dry_run_goes_end_to_end_without_a_cluster() {
        let app_config = AppConfig {
            cluster: ClusterConfig::default(),
            data_stream: data_stream("logs"),
            sink: FlushConfig::default(),
            dry_run: true,
        };
        let summary = run(app_config, "{\"message\":\"hi\"}\n".as_bytes())
            .await
            .unwrap();
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.batches, 1);
    }

    #[tokio::test]
    async fn the_one_where_a_bad_name_stops_the_run_cold() {
        let app_config = AppConfig {
            cluster: ClusterConfig::default(),
            data_stream: data_stream("Nope"),
            sink: FlushConfig::default(),
            dry_run: true,
        };
        let err = run(app_config, "".as_bytes()).await.unwrap_err();
        let chain: Vec<String> = err.chain().map(|cause| cause.to_string()).collect();
        assert!(chain.iter().any(|cause| cause.contains("'Nope'")));
    }
}
