//! Feed fetcher with on-disk cache
//!
//! HTTP(S) remotes are downloaded and cached under
//! `<cache_dir>/<provider>/<feed>`; local files are read in place.

use reqwest::Client;
use smrt_core::Rule;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{create_http_client, FetchConfig, FetchError};

/// Where a feed's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remote {
    Http(String),
    File(PathBuf),
}

impl Remote {
    /// Resolve a remote string; relative paths are anchored at `base`
    pub fn resolve(raw: &str, base: Option<&Path>) -> Result<Self, FetchError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(FetchError::InvalidUrl("empty remote".to_string()));
        }

        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Remote::Http(raw.to_string()));
        }

        if let Some(path) = raw.strip_prefix("file://") {
            return Ok(Remote::File(PathBuf::from(path)));
        }

        if raw.contains("://") {
            return Err(FetchError::InvalidUrl(raw.to_string()));
        }

        let path = PathBuf::from(raw);
        match base {
            Some(base) if path.is_relative() => Ok(Remote::File(base.join(path))),
            _ => Ok(Remote::File(path)),
        }
    }
}

/// Downloads feed data for a rule/feed pair
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = create_http_client(&config)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Cache location for a feed
    pub fn cache_path(&self, rule: &Rule, feed: &str) -> PathBuf {
        let provider = rule
            .feed(feed)
            .map(|f| f.provider(rule))
            .unwrap_or_else(|| rule.provider());
        self.config
            .cache_dir
            .join(sanitize(&provider))
            .join(sanitize(feed))
    }

    /// Fetch raw bytes for `feed`
    ///
    /// With `no_fetch`, an existing cache entry is returned without touching
    /// the network. Without one the feed is downloaded anyway.
    pub async fn fetch(&self, rule: &Rule, feed: &str, no_fetch: bool) -> Result<Vec<u8>, FetchError> {
        let raw = rule
            .feed(feed)
            .and_then(|f| f.remote(rule))
            .ok_or_else(|| FetchError::MissingRemote(feed.to_string()))?;

        match Remote::resolve(raw, rule.base_dir())? {
            Remote::File(path) => {
                debug!("Reading {} from {}", feed, path.display());
                Ok(tokio::fs::read(&path).await?)
            }
            Remote::Http(url) => {
                let cache = self.cache_path(rule, feed);

                if no_fetch {
                    match tokio::fs::read(&cache).await {
                        Ok(bytes) => {
                            debug!("Using cached {} ({} bytes)", cache.display(), bytes.len());
                            return Ok(bytes);
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            warn!("No cache for {}, fetching {}", feed, url);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }

                let bytes = self.download(&url).await?;
                write_cache(&cache, &bytes).await?;
                Ok(bytes)
            }
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        info!("Fetching {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Request(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Request(e)
            }
        })?;

        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}

/// Write via a temp file and rename so readers never see a partial cache
async fn write_cache(path: &Path, bytes: &[u8]) -> Result<(), FetchError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// One safe path component; never empty, `.` or `..`
fn sanitize(name: &str) -> String {
    let clean: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();

    if clean.chars().all(|c| c == '.') {
        "_".repeat(clean.len().max(1))
    } else {
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(cache_dir: &Path) -> Fetcher {
        Fetcher::new(FetchConfig {
            cache_dir: cache_dir.to_path_buf(),
            timeout_secs: 5,
            ..FetchConfig::default()
        })
        .unwrap()
    }

    fn http_rule(server: &MockServer) -> Rule {
        let toml = format!(
            "provider = \"example.org\"\n[feeds.scanners]\nremote = \"{}/scanners.txt\"\n",
            server.uri()
        );
        Rule::from_toml_str(&toml, None).unwrap()
    }

    #[test]
    fn test_resolve_remote() {
        let base = Path::new("/etc/smrt/rules");
        assert_eq!(
            Remote::resolve("https://x.org/a", Some(base)).unwrap(),
            Remote::Http("https://x.org/a".into())
        );
        assert_eq!(
            Remote::resolve("file:///tmp/a.txt", Some(base)).unwrap(),
            Remote::File("/tmp/a.txt".into())
        );
        assert_eq!(
            Remote::resolve("data/a.txt", Some(base)).unwrap(),
            Remote::File("/etc/smrt/rules/data/a.txt".into())
        );
        assert!(Remote::resolve("ftp://x.org/a", None).is_err());
    }

    #[test]
    fn test_cache_path_stays_in_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let rule = Rule::from_toml_str(
            "provider = \"..\"\nremote = \"https://x.org/a\"\n[feeds.\"..\"]\n[feeds.\".\"]\n",
            None,
        )
        .unwrap();
        let fetcher = fetcher(dir.path());

        assert_eq!(fetcher.cache_path(&rule, ".."), dir.path().join("__").join("__"));
        assert_eq!(fetcher.cache_path(&rule, "."), dir.path().join("__").join("_"));
        assert_eq!(sanitize(""), "_");
        assert_eq!(sanitize("abuse.ch"), "abuse.ch");
        assert_eq!(sanitize("a/../b"), "a_.._b");
    }

    #[tokio::test]
    async fn test_fetch_http_writes_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/scanners.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("192.0.2.1\n"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(dir.path());
        let rule = http_rule(&server);

        let bytes = fetcher.fetch(&rule, "scanners", false).await.unwrap();
        assert_eq!(bytes, b"192.0.2.1\n");

        let cached = std::fs::read(dir.path().join("example.org").join("scanners")).unwrap();
        assert_eq!(cached, b"192.0.2.1\n");
    }

    #[tokio::test]
    async fn test_no_fetch_uses_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(dir.path());
        let rule = http_rule(&server);

        let cache = fetcher.cache_path(&rule, "scanners");
        std::fs::create_dir_all(cache.parent().unwrap()).unwrap();
        std::fs::write(&cache, "cached").unwrap();

        let bytes = fetcher.fetch(&rule, "scanners", true).await.unwrap();
        assert_eq!(bytes, b"cached");
    }

    #[tokio::test]
    async fn test_no_fetch_without_cache_downloads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let bytes = fetcher(dir.path())
            .fetch(&http_rule(&server), "scanners", true)
            .await
            .unwrap();
        assert_eq!(bytes, b"fresh");
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = fetcher(dir.path())
            .fetch(&http_rule(&server), "scanners", false)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_fetch_relative_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("list.txt"), "198.51.100.1\n").unwrap();
        let rule_path = dir.path().join("local.toml");
        std::fs::write(&rule_path, "[feeds.default]\nremote = \"list.txt\"\n").unwrap();

        let rule = Rule::load(&rule_path).unwrap();
        let bytes = fetcher(&dir.path().join("cache"))
            .fetch(&rule, "default", false)
            .await
            .unwrap();
        assert_eq!(bytes, b"198.51.100.1\n");
        assert!(!dir.path().join("cache").exists());
    }

    #[tokio::test]
    async fn test_missing_remote() {
        let rule = Rule::from_toml_str("[feeds.default]\nparser = \"csv\"\n", None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = fetcher(dir.path()).fetch(&rule, "default", false).await.unwrap_err();
        assert!(matches!(err, FetchError::MissingRemote(_)));
    }
}
