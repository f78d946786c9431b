//! Plugin seams: parsers, submission clients and the dedup archive

use async_trait::async_trait;
use parking_lot::Mutex;
use smrt_core::{Candidate, Feed, Filters, Indicator, Rule, SmrtError};
use smrt_fetch::Fetcher;
use std::sync::Arc;

/// Lazy stream of parser output
pub type CandidateIter = Box<dyn Iterator<Item = Result<Candidate, SmrtError>> + Send>;

/// Turns fetched feed data into candidates
#[async_trait]
pub trait Parser: Send {
    /// Registered parser name
    fn name(&self) -> &str;

    /// Read the feed and return the candidate stream
    async fn process(&mut self) -> Result<CandidateIter, SmrtError>;
}

/// One indicator or a batch of them
#[derive(Debug, Clone, Copy)]
pub enum Submission<'a> {
    Single(&'a Indicator),
    Batch(&'a [Indicator]),
}

impl Submission<'_> {
    pub fn len(&self) -> usize {
        match self {
            Submission::Single(_) => 1,
            Submission::Batch(batch) => batch.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Destination for accepted indicators
#[async_trait]
pub trait SubmissionClient: Send + Sync {
    /// Registered client name
    fn name(&self) -> &str;

    /// Pass-through sinks receive no submissions
    fn is_passthrough(&self) -> bool {
        false
    }

    /// The service loop prints the cycle's indicators when this is set
    fn renders_output(&self) -> bool {
        false
    }

    /// Connectivity check; authentication failures are errors, not `false`
    async fn ping(&self, write: bool) -> Result<bool, SmrtError>;

    /// Deliver indicators, returning how many were accepted
    async fn indicators_create(&self, submission: Submission<'_>) -> Result<usize, SmrtError>;
}

/// Thread-safe reference to a submission client
pub type SharedClient = Arc<dyn SubmissionClient>;

/// Persistent "already seen" store
pub trait Archive: Send {
    /// Start a run (load state, open a transaction)
    fn begin(&mut self) -> Result<(), SmrtError>;

    /// Persist everything recorded since `begin`
    fn commit(&mut self) -> Result<(), SmrtError>;

    fn search(&self, indicator: &Indicator) -> Result<bool, SmrtError>;

    /// Record an indicator; returns false when it was already present
    fn create(&mut self, indicator: &Indicator) -> Result<bool, SmrtError>;

    /// Drop expired records, returning how many were removed
    fn cleanup(&mut self) -> Result<usize, SmrtError>;
}

/// Shared reference to an archive
pub type SharedArchive = Arc<Mutex<dyn Archive>>;

/// Wrap an archive for sharing
pub fn share_archive<A: Archive + 'static>(archive: A) -> SharedArchive {
    Arc::new(Mutex::new(archive))
}

/// Where a parser gets its bytes
#[derive(Debug, Clone)]
pub enum FeedInput {
    /// Fetch through the cache-aware fetcher
    Fetch { fetcher: Fetcher, no_fetch: bool },
    /// Data supplied up front (stdin, tests)
    Data(Vec<u8>),
}

impl FeedInput {
    pub async fn read(&self, rule: &Rule, feed: &str) -> Result<Vec<u8>, SmrtError> {
        match self {
            FeedInput::Fetch { fetcher, no_fetch } => Ok(fetcher.fetch(rule, feed, *no_fetch).await?),
            FeedInput::Data(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Everything a parser is constructed with
///
/// The built-in parsers only read `rule`, `feed`, `input` and `filters`.
/// The remaining fields are for parsers added with
/// [`PluginRegistry::register_parser`](crate::PluginRegistry::register_parser)
/// that talk to the destination or the archive themselves, or that can stop
/// reading a large source early. The pipeline still enforces `limit`,
/// dedup and submission on whatever a parser yields.
#[derive(Clone)]
pub struct ParserContext {
    pub rule: Arc<Rule>,
    pub feed: String,
    pub input: FeedInput,
    /// Destination client of this run
    pub client: SharedClient,
    /// Dedup archive, when one is configured
    pub archive: Option<SharedArchive>,
    /// Requested accepted-record limit; `None` or `Some(0)` is unbounded
    pub limit: Option<usize>,
    pub filters: Filters,
    /// Whether the pipeline batches submissions
    pub fireball: bool,
}

impl ParserContext {
    /// The feed table this parser is bound to
    pub fn feed_config(&self) -> Result<&Feed, SmrtError> {
        self.rule.feed(&self.feed).ok_or_else(|| SmrtError::FeedNotFound {
            rule: self.rule.name(),
            feed: self.feed.clone(),
        })
    }

    pub async fn read(&self) -> Result<Vec<u8>, SmrtError> {
        self.input.read(&self.rule, &self.feed).await
    }

    /// Read the feed as text, replacing invalid UTF-8
    pub async fn read_text(&self) -> Result<String, SmrtError> {
        let bytes = self.read().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Per-feed defaults applied to every indicator the parser builds
    pub fn defaults(&self) -> Result<FeedDefaults, SmrtError> {
        let feed = self.feed_config()?;
        Ok(FeedDefaults {
            provider: feed.provider(&self.rule),
            tags: feed.tags(&self.rule).to_vec(),
            group: feed.group(&self.rule).map(str::to_string),
            description: feed.description(&self.rule).map(str::to_string),
            confidence: feed.confidence(&self.rule),
            filters: self.filters.clone(),
        })
    }
}

/// Provider, tags and friends resolved from feed then rule
#[derive(Debug, Clone, Default)]
pub struct FeedDefaults {
    pub provider: String,
    pub tags: Vec<String>,
    pub group: Option<String>,
    pub description: Option<String>,
    pub confidence: Option<f64>,
    pub filters: Filters,
}

impl FeedDefaults {
    /// New indicator carrying the feed defaults
    pub fn build(&self, value: &str) -> Indicator {
        let mut indicator = Indicator::new(value)
            .with_provider(&self.provider)
            .with_tags(self.tags.iter().cloned());
        indicator.group = self.group.clone();
        indicator.description = self.description.clone();
        indicator.confidence = self.confidence;
        indicator
    }

    pub fn accepts(&self, indicator: &Indicator) -> bool {
        self.filters.matches(indicator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_feed_then_rule() {
        let rule = Rule::from_toml_str(
            "provider = \"example.org\"\ntags = [\"scanner\"]\nconfidence = 6.0\n\
             [feeds.ssh]\ntags = [\"ssh\"]\ndescription = \"ssh brute force\"\n",
            None,
        )
        .unwrap();

        let feed = rule.feed("ssh").unwrap();
        let defaults = FeedDefaults {
            provider: feed.provider(&rule),
            tags: feed.tags(&rule).to_vec(),
            group: None,
            description: feed.description(&rule).map(str::to_string),
            confidence: feed.confidence(&rule),
            filters: Filters::default(),
        };

        let i = defaults.build("192.0.2.1");
        assert_eq!(i.provider.as_deref(), Some("example.org"));
        assert_eq!(i.tags, vec!["ssh"]);
        assert_eq!(i.description.as_deref(), Some("ssh brute force"));
        assert_eq!(i.confidence, Some(6.0));
        assert!(defaults.accepts(&i));
    }

    #[test]
    fn test_submission_len() {
        let batch = vec![Indicator::new("a.example"), Indicator::new("b.example")];
        assert_eq!(Submission::Batch(&batch).len(), 2);
        assert_eq!(Submission::Single(&batch[0]).len(), 1);
        assert!(Submission::Batch(&[]).is_empty());
    }
}
