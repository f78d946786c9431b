//! smrt CLI
//!
//! Fetch, parse and normalize threat-intelligence feeds described by
//! TOML rules, then print them or submit them to a remote store.

mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::FmtSubscriber;

use smrt_core::FormatRegistry;
use smrt_fetch::Fetcher;
use smrt_plugins::{share_archive, JsonArchive, PluginRegistry};
use smrt_runtime::{shutdown_channel, Service, Smrt, StopReason};

use crate::config::{default_config_path, FileConfig, Settings};

#[derive(Parser, Debug)]
#[command(name = "smrt")]
#[command(author, version, about = "smrt: threat-intelligence feed processor", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.smrt.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rule file or directory of rule files
    #[arg(short, long)]
    rule: Option<PathBuf>,

    /// Only process this feed of the rule
    #[arg(short, long)]
    feed: Option<String>,

    /// Submission client: stdout, null or rest (default: stdout)
    #[arg(long)]
    client: Option<String>,

    /// Remote store URL for the rest client
    #[arg(long, env = "SMRT_REMOTE")]
    remote: Option<String>,

    /// API token for the remote store
    #[arg(long, env = "SMRT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// API user (sends basic auth together with --token)
    #[arg(long)]
    user: Option<String>,

    /// Feed cache directory (default: ~/.cache/smrt)
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Stop each feed after this many new indicators
    #[arg(short, long)]
    limit: Option<usize>,

    /// Keep running, one cycle every --sleep minutes
    #[arg(long)]
    service: bool,

    /// Minutes between cycles in service mode (default: 60)
    #[arg(long)]
    sleep: Option<u64>,

    /// Minutes to wait before the first cycle (default: random 5-55)
    #[arg(long)]
    delay: Option<u64>,

    /// HTTP timeout in seconds (default: 300)
    #[arg(long)]
    timeout: Option<u64>,

    /// Skip indicators already seen in a previous run
    #[arg(long)]
    remember: bool,

    /// Archive file used by --remember
    #[arg(long, env = "SMRT_ARCHIVE_PATH")]
    remember_path: Option<PathBuf>,

    /// Output format: table, csv, json or jsonl (default: table)
    #[arg(long, env = "SMRT_FORMAT")]
    format: Option<String>,

    /// Submit in batches instead of one indicator at a time
    #[arg(long)]
    fireball: bool,

    /// Use cached feed data, never download
    #[arg(long)]
    no_fetch: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    no_verify_ssl: bool,

    /// Proxy for all outbound requests
    #[arg(long)]
    proxy: Option<String>,

    /// Only keep this indicator value
    #[arg(short, long)]
    indicator: Option<String>,

    /// Verbosity level (0-3, default: 1 or log_level from the config file)
    #[arg(short, long)]
    verbose: Option<u8>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let file = FileConfig::load(&config_path)?;
    let settings = Settings::resolve(&cli, file)?;

    FmtSubscriber::builder()
        .with_max_level(settings.log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    debug!("Config {} rule {}", config_path.display(), settings.rule.display());

    let formatter = FormatRegistry::with_builtin().get(&settings.format)?;

    let registry = PluginRegistry::with_builtin();
    let client = registry.create_client(&settings.client, &settings.client_config())?;
    let fetcher = Fetcher::new(settings.fetch_config())?;

    let mut smrt = Smrt::new(registry, client, fetcher)
        .with_fireball(settings.fireball)
        .with_no_fetch(settings.no_fetch);

    if settings.remember {
        info!("Remembering indicators in {}", settings.remember_path.display());
        smrt = smrt.with_archive(share_archive(JsonArchive::new(&settings.remember_path)));
    }

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing up");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut service = Service::new(smrt, settings.service_config(), formatter, shutdown_rx);

    match service.run().await? {
        StopReason::Completed => debug!("Run complete"),
        StopReason::Stopped(reason) => info!("Stopped: {}", reason),
        StopReason::Interrupted => info!("Interrupted"),
    }

    Ok(())
}
