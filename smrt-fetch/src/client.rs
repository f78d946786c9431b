//! HTTP client construction
//!
//! Builds the reqwest client used for feed downloads, with optional proxy,
//! TLS verification toggle and user-agent rotation.

use reqwest::{Client, Proxy};
use smrt_core::SmrtError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fetch layer configuration
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Root of the on-disk feed cache
    pub cache_dir: PathBuf,
    /// Verify TLS certificates
    pub verify_ssl: bool,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Proxy URL (http://, https:// or socks5h://)
    pub proxy: Option<String>,
    /// Fixed user agent; a browser UA is picked at random when unset
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            verify_ssl: true,
            timeout_secs: 300,
            proxy: None,
            user_agent: None,
        }
    }
}

/// `$HOME/.cache/smrt`, or a relative `.smrt-cache` without a home directory
pub fn default_cache_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".cache").join("smrt"))
        .unwrap_or_else(|| PathBuf::from(".smrt-cache"))
}

/// Errors from the fetch layer
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("timeout fetching {0}")]
    Timeout(String),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("feed '{0}' has no remote")]
    MissingRemote(String),

    #[error("invalid remote: {0}")]
    InvalidUrl(String),

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FetchError> for SmrtError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Timeout(url) => SmrtError::Timeout(url),
            FetchError::Request(e) if e.is_timeout() => SmrtError::Timeout(e.to_string()),
            other @ (FetchError::MissingRemote(_)
            | FetchError::InvalidUrl(_)
            | FetchError::ClientBuild(_)) => SmrtError::Config(other.to_string()),
            other => SmrtError::Runtime(format!("fetch failed: {other}")),
        }
    }
}

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:137.0) Gecko/20100101 Firefox/137.0",
];

/// Get a random user agent
pub fn random_user_agent() -> &'static str {
    use rand::Rng;
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Create the HTTP client described by `config`
pub fn create_http_client(config: &FetchConfig) -> Result<Client, FetchError> {
    let user_agent = config
        .user_agent
        .clone()
        .unwrap_or_else(|| random_user_agent().to_string());

    let mut builder = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(user_agent)
        .danger_accept_invalid_certs(!config.verify_ssl);

    if let Some(proxy) = &config.proxy {
        let proxy = Proxy::all(proxy).map_err(|e| FetchError::ClientBuild(e.to_string()))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| FetchError::ClientBuild(e.to_string()))
}
