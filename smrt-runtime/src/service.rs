//! Service loop
//!
//! Runs one cycle (ping, resolve, process every feed, print) once or, in
//! service mode, forever with an initial jitter delay and a fixed sleep
//! between successful cycles. Errors are classified into stop / continue /
//! fatal; archive cleanup runs after every cycle.

use smrt_core::{Filters, Formatter, Indicator, SmrtError};
use std::io::Write;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classify::{classify, Disposition};
use crate::resolver::{load_feeds, RuleSource};
use crate::stdin::read_piped_stdin;
use crate::Smrt;

/// Per-process settings for the loop
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub rule: RuleSource,
    pub feed: Option<String>,
    pub limit: Option<usize>,
    pub filters: Filters,
    /// Repeat cycles until stopped
    pub service: bool,
    /// Pause between successful cycles
    pub sleep: Duration,
    /// Pause before the first cycle in service mode
    pub delay: Duration,
    /// Use piped stdin as feed data when present
    pub read_stdin: bool,
}

impl ServiceConfig {
    pub fn new(rule: impl Into<RuleSource>) -> Self {
        Self {
            rule: rule.into(),
            feed: None,
            limit: None,
            filters: Filters::default(),
            service: false,
            sleep: Duration::from_secs(60 * 60),
            delay: Duration::ZERO,
            read_stdin: false,
        }
    }
}

/// Why the loop ended without a fatal error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// One-shot run finished (possibly after a logged, non-fatal error)
    Completed,
    /// A stop-classified error ended the loop
    Stopped(String),
    /// Shutdown was requested
    Interrupted,
}

/// Create the shutdown flag shared by the signal handler and the loop
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

pub struct Service {
    smrt: Smrt,
    config: ServiceConfig,
    formatter: Formatter,
    output: Box<dyn Write + Send>,
    shutdown: watch::Receiver<bool>,
}

impl Service {
    pub fn new(
        smrt: Smrt,
        config: ServiceConfig,
        formatter: Formatter,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            smrt,
            config,
            formatter,
            output: Box::new(std::io::stdout()),
            shutdown,
        }
    }

    /// Send formatted output somewhere other than stdout
    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = output;
        self
    }

    /// Run until done; `Err` only for fatal errors
    pub async fn run(&mut self) -> Result<StopReason, SmrtError> {
        if self.config.service && !self.config.delay.is_zero() {
            info!("Delaying start for {}s", self.config.delay.as_secs());
            if !self.pause(self.config.delay).await {
                info!("Shutdown requested during initial delay");
                return Ok(StopReason::Interrupted);
            }
        }

        loop {
            let cycle = Uuid::new_v4().to_string()[..8].to_string();
            info!("Cycle {} starting", cycle);

            let result = self.run_cycle().await;
            self.cleanup();

            match result {
                Ok(count) => {
                    info!("Cycle {} done: {} indicators", cycle, count);
                    if !self.config.service {
                        return Ok(StopReason::Completed);
                    }

                    info!("Sleeping {}s", self.config.sleep.as_secs());
                    if !self.pause(self.config.sleep).await {
                        info!("Shutdown requested, stopping");
                        return Ok(StopReason::Interrupted);
                    }
                }
                Err(e) => match classify(&e) {
                    Disposition::Stop => {
                        if matches!(e, SmrtError::Interrupted) {
                            warn!("Cycle {} interrupted", cycle);
                            return Ok(StopReason::Interrupted);
                        }
                        error!("Cycle {} stopped: {}", cycle, e);
                        return Ok(StopReason::Stopped(e.to_string()));
                    }
                    Disposition::Continue => {
                        error!("Cycle {} failed: {}", cycle, e);
                        if !self.config.service {
                            return Ok(StopReason::Completed);
                        }
                        if self.shutdown_requested() {
                            return Ok(StopReason::Interrupted);
                        }
                    }
                    Disposition::Fatal => {
                        error!("Cycle {} hit a fatal error: {}", cycle, e);
                        return Err(e);
                    }
                },
            }
        }
    }

    /// One RUN state: ping, resolve, process each feed, print
    pub async fn run_cycle(&mut self) -> Result<usize, SmrtError> {
        let data = if self.config.read_stdin {
            read_piped_stdin().await?
        } else {
            None
        };

        let client = self.smrt.client().clone();
        if !client.ping(true).await? {
            warn!("Client {} did not answer ping", client.name());
        }

        let items = load_feeds(&self.config.rule, self.config.feed.as_deref())?;
        debug!("Resolved {} feeds", items.len());

        let renders = client.renders_output();
        let mut printed: Vec<Indicator> = Vec::new();
        let mut total = 0;

        for item in items {
            if self.shutdown_requested() {
                return Err(SmrtError::Interrupted);
            }

            info!("Processing {}:{}", item.rule.name(), item.feed);
            let mut run = self
                .smrt
                .process(
                    item.rule,
                    &item.feed,
                    self.config.limit,
                    data.clone(),
                    self.config.filters.clone(),
                )
                .await?
                .with_shutdown(self.shutdown.clone());

            while let Some(indicator) = run.next().await? {
                total += 1;
                if renders {
                    printed.push(indicator);
                }
            }
        }

        if renders {
            let text = (self.formatter)(&printed);
            writeln!(self.output, "{text}")?;
            self.output.flush()?;
        }

        Ok(total)
    }

    fn cleanup(&self) {
        let Some(archive) = self.smrt.archive() else {
            return;
        };

        match archive.lock().cleanup() {
            Ok(count) => info!("Archive cleanup removed {} records", count),
            Err(e) => warn!("Archive cleanup failed: {}", e),
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `duration`; false when shutdown was requested first
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = wait_for_shutdown(&mut self.shutdown) => false,
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        // sender gone: nobody can ask us to stop any more
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        memory_archive, scripted_registry, test_fetcher, Pulls, RecordingClient, SharedBuf,
    };
    use smrt_core::{format_jsonl, Candidate, Rule};
    use smrt_plugins::{share_archive, PluginRegistry};
    use std::sync::Arc;

    fn candidates() -> Vec<Candidate> {
        ["192.0.2.1", "192.0.2.2"]
            .iter()
            .map(|v| Indicator::new(v).into())
            .collect()
    }

    fn rule() -> Rule {
        Rule::from_toml_str("[feeds.a]\n[feeds.b]\n", None).unwrap()
    }

    fn service(
        registry: PluginRegistry,
        client: Arc<RecordingClient>,
        config: ServiceConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Service {
        Service::new(Smrt::new(registry, client, test_fetcher()), config, format_jsonl, shutdown)
    }

    #[tokio::test]
    async fn test_one_shot_processes_every_feed() {
        let client = RecordingClient::new();
        let (_tx, rx) = shutdown_channel();
        let mut svc = service(
            scripted_registry(candidates(), Pulls::default()),
            client.clone(),
            ServiceConfig::new(rule()),
            rx,
        );

        assert_eq!(svc.run().await.unwrap(), StopReason::Completed);
        assert_eq!(client.pings(), 1);
        assert_eq!(client.submissions(), vec![1, 1, 1, 1]);
    }

    #[tokio::test]
    async fn test_auth_error_on_ping_stops_before_feeds() {
        let client = RecordingClient::failing_ping();
        let pulls = Pulls::default();
        let (_tx, rx) = shutdown_channel();
        let mut config = ServiceConfig::new(rule());
        config.service = true;

        let mut svc = service(scripted_registry(candidates(), pulls.clone()), client.clone(), config, rx);

        let reason = svc.run().await.unwrap();
        assert!(matches!(reason, StopReason::Stopped(msg) if msg.contains("authentication")));
        assert_eq!(pulls.count(), 0);
        assert!(client.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_submission_failure_stops_service() {
        let client = RecordingClient::failing_submit();
        let (_tx, rx) = shutdown_channel();
        let mut config = ServiceConfig::new(rule());
        config.service = true;

        let mut svc = service(scripted_registry(candidates(), Pulls::default()), client, config, rx);
        assert!(matches!(svc.run().await.unwrap(), StopReason::Stopped(_)));
    }

    #[tokio::test]
    async fn test_fatal_error_propagates() {
        let (_tx, rx) = shutdown_channel();
        let config = ServiceConfig::new(std::path::PathBuf::from("/nonexistent/smrt/rule.toml"));
        let mut svc = service(PluginRegistry::with_builtin(), RecordingClient::new(), config, rx);

        let err = svc.run().await.unwrap_err();
        assert!(matches!(err, SmrtError::Io(_)));
    }

    #[tokio::test]
    async fn test_missing_feed_is_fatal() {
        let (_tx, rx) = shutdown_channel();
        let mut config = ServiceConfig::new(rule());
        config.feed = Some("c".to_string());
        let mut svc = service(PluginRegistry::with_builtin(), RecordingClient::new(), config, rx);

        assert!(matches!(svc.run().await, Err(SmrtError::FeedNotFound { .. })));
    }

    #[tokio::test]
    async fn test_runtime_error_one_shot_completes() {
        let mut registry = PluginRegistry::new();
        registry.register_parser("pattern", |_| {
            Err(SmrtError::Runtime("fetch failed: connection reset".into()))
        });
        let (_tx, rx) = shutdown_channel();
        let mut svc = service(registry, RecordingClient::new(), ServiceConfig::new(rule()), rx);

        assert_eq!(svc.run().await.unwrap(), StopReason::Completed);
    }

    #[tokio::test]
    async fn test_stdout_style_client_prints_once() {
        let client = RecordingClient::passthrough();
        let buf = SharedBuf::default();
        let (_tx, rx) = shutdown_channel();
        let mut svc = service(
            scripted_registry(candidates(), Pulls::default()),
            client.clone(),
            ServiceConfig::new(rule()),
            rx,
        )
        .with_output(Box::new(buf.clone()));

        svc.run().await.unwrap();

        let text = buf.text();
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("\"indicator\":\"192.0.2.1\""));
        assert!(client.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_runs_after_failed_cycle() {
        let (archive, state) = memory_archive(&[]);
        let (_tx, rx) = shutdown_channel();
        let mut svc = Service::new(
            Smrt::new(
                scripted_registry(candidates(), Pulls::default()),
                RecordingClient::failing_submit(),
                test_fetcher(),
            )
            .with_archive(share_archive(archive)),
            ServiceConfig::new(rule()),
            format_jsonl,
            rx,
        );

        svc.run().await.unwrap();
        assert_eq!(state.lock().cleanups, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_sleeps_between_cycles_until_shutdown() {
        let client = RecordingClient::new();
        let (tx, rx) = shutdown_channel();
        let mut config = ServiceConfig::new(rule());
        config.service = true;
        config.delay = Duration::from_secs(5 * 60);
        config.sleep = Duration::from_secs(60 * 60);

        let mut svc = service(
            scripted_registry(candidates(), Pulls::default()),
            client.clone(),
            config,
            rx,
        );

        let stopper = tokio::spawn(async move {
            // past the delay and two full sleeps
            tokio::time::sleep(Duration::from_secs(5 * 60 + 2 * 60 * 60 + 30)).await;
            tx.send(true).unwrap();
        });

        assert_eq!(svc.run().await.unwrap(), StopReason::Interrupted);
        stopper.await.unwrap();
        assert_eq!(client.pings(), 3);
    }

    #[tokio::test]
    async fn test_bad_json_rows_do_not_end_service() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("feed.json"),
            r#"[{"indicator":"192.0.2.1","lasttime":"2024-03-01"},
                {"indicator":"192.0.2.2","lasttime":"n/a"},
                {"provider":"no value here"}]"#,
        )
        .unwrap();
        let rule_path = dir.path().join("rows.toml");
        std::fs::write(&rule_path, "parser = \"json\"\nremote = \"feed.json\"\n\n[feeds.rows]\n").unwrap();

        let client = RecordingClient::new();
        let (tx, rx) = shutdown_channel();
        let mut config = ServiceConfig::new(rule_path);
        config.service = true;
        config.sleep = Duration::from_millis(20);

        let mut svc = service(PluginRegistry::with_builtin(), client.clone(), config, rx);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            tx.send(true).unwrap();
        });

        assert_eq!(svc.run().await.unwrap(), StopReason::Interrupted);
        stopper.await.unwrap();

        assert!(client.pings() >= 2);
        let submissions = client.submissions();
        assert!(submissions.len() >= 2);
        assert!(submissions.iter().all(|&n| n == 1));
    }

    #[tokio::test]
    async fn test_shutdown_during_delay() {
        let (tx, rx) = shutdown_channel();
        let client = RecordingClient::new();
        let mut config = ServiceConfig::new(rule());
        config.service = true;
        config.delay = Duration::from_secs(3600);

        tx.send(true).unwrap();
        let mut svc = service(scripted_registry(candidates(), Pulls::default()), client.clone(), config, rx);

        assert_eq!(svc.run().await.unwrap(), StopReason::Interrupted);
        assert_eq!(client.pings(), 0);
    }
}
