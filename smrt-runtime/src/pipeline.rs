//! Processing pipeline
//!
//! Pulls candidates from a parser, normalizes them, consults the dedup
//! archive, submits to the client (singly or in fireball batches) and hands
//! accepted indicators back to the caller one at a time.

use smrt_core::{Filters, Indicator, Rule, SmrtError, FIREBALL_SIZE};
use smrt_fetch::Fetcher;
use smrt_plugins::{
    CandidateIter, FeedInput, Parser, ParserContext, PluginRegistry, SharedArchive, SharedClient,
    Submission,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Pipeline configuration shared by every feed of a cycle
#[derive(Clone)]
pub struct Smrt {
    registry: PluginRegistry,
    client: SharedClient,
    fetcher: Fetcher,
    archive: Option<SharedArchive>,
    no_fetch: bool,
    fireball: bool,
    fireball_size: usize,
}

impl Smrt {
    pub fn new(registry: PluginRegistry, client: SharedClient, fetcher: Fetcher) -> Self {
        Self {
            registry,
            client,
            fetcher,
            archive: None,
            no_fetch: false,
            fireball: false,
            fireball_size: FIREBALL_SIZE,
        }
    }

    pub fn with_archive(mut self, archive: SharedArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_no_fetch(mut self, no_fetch: bool) -> Self {
        self.no_fetch = no_fetch;
        self
    }

    pub fn with_fireball(mut self, fireball: bool) -> Self {
        self.fireball = fireball;
        self
    }

    pub fn with_fireball_size(mut self, size: usize) -> Self {
        self.fireball_size = size.max(1);
        self
    }

    pub fn client(&self) -> &SharedClient {
        &self.client
    }

    pub fn archive(&self) -> Option<&SharedArchive> {
        self.archive.as_ref()
    }

    /// Build the parser for `feed`
    ///
    /// The parser name comes from the feed, then the rule, then the default;
    /// `<name>` is tried before `z<name>`.
    pub fn load_parser(
        &self,
        rule: Arc<Rule>,
        feed: &str,
        limit: Option<usize>,
        data: Option<Vec<u8>>,
        filters: Filters,
    ) -> Result<Box<dyn Parser>, SmrtError> {
        let feed_config = rule.feed(feed).ok_or_else(|| SmrtError::FeedNotFound {
            rule: rule.name(),
            feed: feed.to_string(),
        })?;
        let requested = feed_config.parser_name(&rule).to_string();
        let (name, factory) = self.registry.resolve_parser(&requested)?;
        debug!("Loaded parser {} for {}:{}", name, rule.name(), feed);

        let input = match data {
            Some(bytes) => FeedInput::Data(bytes),
            None => FeedInput::Fetch {
                fetcher: self.fetcher.clone(),
                no_fetch: self.no_fetch,
            },
        };

        factory(ParserContext {
            rule,
            feed: feed.to_string(),
            input,
            client: Arc::clone(&self.client),
            archive: self.archive.clone(),
            limit,
            filters,
            fireball: self.fireball,
        })
    }

    /// Start processing one feed
    ///
    /// A `limit` of `None` or `Some(0)` is unbounded.
    pub async fn process(
        &self,
        rule: Arc<Rule>,
        feed: &str,
        limit: Option<usize>,
        data: Option<Vec<u8>>,
        filters: Filters,
    ) -> Result<ProcessRun, SmrtError> {
        let mut parser = self.load_parser(Arc::clone(&rule), feed, limit, data, filters)?;

        if let Some(archive) = &self.archive {
            archive.lock().begin()?;
        }

        let stream = parser.process().await?;

        Ok(ProcessRun {
            label: format!("{}:{}", rule.name(), feed),
            stream,
            client: Arc::clone(&self.client),
            archive: self.archive.clone(),
            passthrough: self.client.is_passthrough(),
            fireball: self.fireball,
            fireball_size: self.fireball_size,
            queue: Vec::new(),
            remaining: limit.filter(|&l| l > 0),
            shutdown: None,
            finished: false,
            stats: RunStats::default(),
        })
    }
}

/// Counters for one feed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub accepted: usize,
    pub skipped: usize,
    pub submitted: usize,
    pub batches: usize,
    /// Records that could not be turned into an indicator
    pub rejected: usize,
}

/// A feed being processed; pull indicators with [`ProcessRun::next`]
pub struct ProcessRun {
    label: String,
    stream: CandidateIter,
    client: SharedClient,
    archive: Option<SharedArchive>,
    passthrough: bool,
    fireball: bool,
    fireball_size: usize,
    queue: Vec<Indicator>,
    remaining: Option<usize>,
    shutdown: Option<watch::Receiver<bool>>,
    finished: bool,
    stats: RunStats,
}

impl ProcessRun {
    /// Abort with [`SmrtError::Interrupted`] once the flag turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Next accepted indicator, or `None` once the feed is exhausted or the
    /// limit is reached. The trailing batch flush and archive commit happen
    /// before `None` is returned.
    pub async fn next(&mut self) -> Result<Option<Indicator>, SmrtError> {
        if self.finished {
            return Ok(None);
        }

        loop {
            if self.remaining == Some(0) {
                self.finish().await?;
                return Ok(None);
            }

            if self.shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
                return Err(SmrtError::Interrupted);
            }

            let Some(candidate) = self.stream.next() else {
                self.finish().await?;
                return Ok(None);
            };

            let mut indicator = match candidate?.into_indicator() {
                Ok(indicator) => indicator,
                Err(SmrtError::Coerce(reason)) => {
                    warn!("{}: dropping record: {}", self.label, reason);
                    self.stats.rejected += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            indicator.normalize();

            if let Some(archive) = &self.archive {
                if archive.lock().search(&indicator)? {
                    debug!("Skipping {}", indicator.label());
                    self.stats.skipped += 1;
                    continue;
                }
            }

            if !self.passthrough {
                if self.fireball {
                    self.queue.push(indicator.clone());
                    if self.queue.len() >= self.fireball_size {
                        self.flush().await?;
                    }
                } else {
                    self.stats.submitted += self
                        .client
                        .indicators_create(Submission::Single(&indicator))
                        .await?;
                }
            }

            if let Some(archive) = &self.archive {
                archive.lock().create(&indicator)?;
            }

            debug!("Adding {}", indicator.label());
            self.stats.accepted += 1;
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }

            return Ok(Some(indicator));
        }
    }

    /// Drain the run into a list
    pub async fn collect(mut self) -> Result<Vec<Indicator>, SmrtError> {
        let mut out = Vec::new();
        while let Some(indicator) = self.next().await? {
            out.push(indicator);
        }
        Ok(out)
    }

    async fn flush(&mut self) -> Result<(), SmrtError> {
        if self.queue.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.queue);
        info!("{}: submitting batch of {}", self.label, batch.len());
        self.stats.submitted += self.client.indicators_create(Submission::Batch(&batch)).await?;
        self.stats.batches += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), SmrtError> {
        self.finished = true;
        self.flush().await?;

        if let Some(archive) = &self.archive {
            archive.lock().commit()?;
        }

        info!(
            "{}: {} accepted, {} already seen, {} rejected",
            self.label, self.stats.accepted, self.stats.skipped, self.stats.rejected
        );
        Ok(())
    }
}
