//! Configuration layering: command line, then config file, then defaults

use anyhow::{bail, Context, Result};
use rand::Rng;
use serde::Deserialize;
use smrt_core::Filters;
use smrt_fetch::{default_cache_dir, FetchConfig};
use smrt_plugins::ClientConfig;
use smrt_runtime::{RuleSource, ServiceConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

use crate::Cli;

const DEFAULT_CLIENT: &str = "stdout";
const DEFAULT_FORMAT: &str = "table";
const DEFAULT_SLEEP_MINUTES: u64 = 60;
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DELAY_MINUTES: std::ops::RangeInclusive<u64> = 5..=55;

/// Contents of the TOML config file; every key is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub rule: Option<PathBuf>,
    pub feed: Option<String>,
    pub client: Option<String>,
    pub remote: Option<String>,
    pub token: Option<String>,
    pub user: Option<String>,
    pub cache: Option<PathBuf>,
    pub limit: Option<usize>,
    pub service: Option<bool>,
    /// Minutes between cycles
    pub sleep: Option<u64>,
    /// Minutes before the first cycle
    pub delay: Option<u64>,
    /// Request timeout in seconds
    pub timeout: Option<u64>,
    pub remember: Option<bool>,
    pub remember_path: Option<PathBuf>,
    pub format: Option<String>,
    pub fireball: Option<bool>,
    pub no_fetch: Option<bool>,
    pub no_verify_ssl: Option<bool>,
    pub proxy: Option<String>,
    pub log_level: Option<String>,
}

impl FileConfig {
    /// Load `path`; a missing file is an empty config
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }
}

fn home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// `$HOME/.smrt.toml`
pub fn default_config_path() -> PathBuf {
    home().unwrap_or_default().join(".smrt.toml")
}

/// `$HOME/.local/share/smrt/smrt.db.json`
pub fn default_archive_path() -> PathBuf {
    home()
        .unwrap_or_default()
        .join(".local")
        .join("share")
        .join("smrt")
        .join("smrt.db.json")
}

fn parse_level(raw: &str) -> Result<Level> {
    raw.parse::<Level>()
        .map_err(|_| anyhow::anyhow!("unknown log level '{raw}'"))
}

/// Fully resolved process settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub rule: PathBuf,
    pub feed: Option<String>,
    pub client: String,
    pub remote: Option<String>,
    pub token: Option<String>,
    pub user: Option<String>,
    pub cache_dir: PathBuf,
    pub limit: Option<usize>,
    pub service: bool,
    pub sleep: Duration,
    pub delay: Duration,
    pub timeout_secs: u64,
    pub remember: bool,
    pub remember_path: PathBuf,
    pub format: String,
    pub fireball: bool,
    pub no_fetch: bool,
    pub verify_ssl: bool,
    pub proxy: Option<String>,
    pub indicator: Option<String>,
    pub log_level: Level,
}

impl Settings {
    pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Self> {
        let Some(rule) = cli.rule.clone().or(file.rule) else {
            bail!("no rule given: pass --rule or set `rule` in the config file");
        };

        let log_level = match (cli.verbose, file.log_level.as_deref()) {
            (Some(v), _) => match v {
                0 => Level::ERROR,
                1 => Level::INFO,
                2 => Level::DEBUG,
                _ => Level::TRACE,
            },
            (None, Some(raw)) => parse_level(raw)?,
            (None, None) => Level::INFO,
        };

        let delay_minutes = cli
            .delay
            .or(file.delay)
            .unwrap_or_else(|| rand::thread_rng().gen_range(DELAY_MINUTES));

        Ok(Self {
            rule,
            feed: cli.feed.clone().or(file.feed),
            client: cli
                .client
                .clone()
                .or(file.client)
                .unwrap_or_else(|| DEFAULT_CLIENT.to_string()),
            remote: cli.remote.clone().or(file.remote),
            token: cli.token.clone().or(file.token),
            user: cli.user.clone().or(file.user),
            cache_dir: cli.cache.clone().or(file.cache).unwrap_or_else(default_cache_dir),
            limit: cli.limit.or(file.limit),
            service: cli.service || file.service.unwrap_or(false),
            sleep: Duration::from_secs(60 * cli.sleep.or(file.sleep).unwrap_or(DEFAULT_SLEEP_MINUTES)),
            delay: Duration::from_secs(60 * delay_minutes),
            timeout_secs: cli.timeout.or(file.timeout).unwrap_or(DEFAULT_TIMEOUT_SECS),
            remember: cli.remember || file.remember.unwrap_or(false),
            remember_path: cli
                .remember_path
                .clone()
                .or(file.remember_path)
                .unwrap_or_else(default_archive_path),
            format: cli
                .format
                .clone()
                .or(file.format)
                .unwrap_or_else(|| DEFAULT_FORMAT.to_string()),
            fireball: cli.fireball || file.fireball.unwrap_or(false),
            no_fetch: cli.no_fetch || file.no_fetch.unwrap_or(false),
            verify_ssl: !(cli.no_verify_ssl || file.no_verify_ssl.unwrap_or(false)),
            proxy: cli.proxy.clone().or(file.proxy),
            indicator: cli.indicator.clone(),
            log_level,
        })
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            cache_dir: self.cache_dir.clone(),
            verify_ssl: self.verify_ssl,
            timeout_secs: self.timeout_secs,
            proxy: self.proxy.clone(),
            user_agent: None,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            remote: self.remote.clone(),
            token: self.token.clone(),
            user: self.user.clone(),
            verify_ssl: self.verify_ssl,
            timeout_secs: self.timeout_secs,
            proxy: self.proxy.clone(),
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            rule: RuleSource::Path(self.rule.clone()),
            feed: self.feed.clone(),
            limit: self.limit,
            filters: self
                .indicator
                .as_deref()
                .map(Filters::indicator)
                .unwrap_or_default(),
            service: self.service,
            sleep: self.sleep,
            delay: self.delay,
            read_stdin: true,
        }
    }
}
