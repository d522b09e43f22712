//! 🚀 dsx-cli — the front door, the bouncer, the maitre d' of dsx.
//!
//! 📦 Loads config, sets up logging, reads NDJSON from stdin, and lets the library
//! do the heavy lifting. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;
use tokio::io::BufReader;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 🌊 Ship NDJSON log records from stdin into an Elasticsearch data stream.
#[derive(Debug, Parser)]
#[command(name = "dsx", version, about)]
struct Cli {
    /// 🔧 Path to the TOML config. Without it, only DSX_* env vars are used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 🏷️ Override `data_stream.data_stream_name` from the config.
    #[arg(short = 'n', long)]
    data_stream_name: Option<String>,

    /// 🎭 Record everything, ship nothing.
    #[arg(long)]
    dry_run: bool,
}

/// 🚀 main() — where it all begins.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Run the thing (validate, bootstrap, pump stdin)
/// 5. Handle errors (cry, but informatively)
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 logs go to stderr. stdout belongs to the summary table.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // 🔒 Validate the config file exists before we get too emotionally attached
    if let Some(ref path) = cli.config {
        let exists = path.try_exists().context(format!(
            "💀 Couldn't check whether the configuration file exists. Was checking here: '{}'",
            path.display()
        ))?;
        if !exists {
            anyhow::bail!(
                "💀 Configuration file '{}' does not exist. If it's a relative path, \
                 double check your working directory, or use an absolute path.",
                path.display()
            );
        }
    }

    let mut app_config = dsx::app_config::load_config(cli.config.as_deref())
        .context("💀 In dsx-cli, main, we couldn't load the config. Make sure you didn't forget something obvious.")?;
    if let Some(name) = cli.data_stream_name {
        app_config.data_stream.data_stream_name = Some(name);
    }
    app_config.dry_run |= cli.dry_run;

    let stdin = BufReader::new(tokio::io::stdin());
    match dsx::run(app_config, stdin).await {
        Ok(summary) => {
            let mut table = Table::new();
            table.set_header(vec!["batches", "documents", "skipped lines"]);
            table.add_row(vec![
                summary.batches.to_string(),
                summary.documents.to_string(),
                summary.skipped_lines.to_string(),
            ]);
            println!("{table}");
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("never made it to the cluster")
                    || cause_str.contains("Connection refused")
                    || cause_str.contains("connection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }

            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like the cluster isn't reachable. \
                    Double-check `cluster.url` and that Elasticsearch is actually running. \
                    If you're using Docker, try `docker ps`. Even servers need a nudge sometimes. ☕"
                );
            }

            // 🗑️ Exit with prejudice.
            std::process::exit(1);
        }
    }
}
