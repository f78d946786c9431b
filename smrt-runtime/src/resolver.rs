//! Rule/feed resolution
//!
//! Turns a rule reference (file, directory or pre-loaded rule) and an optional
//! feed name into the list of (rule, feed) work items for one cycle.

use smrt_core::{Rule, SmrtError};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where rules come from
#[derive(Debug, Clone)]
pub enum RuleSource {
    /// A rule file or a directory of rule files
    Path(PathBuf),
    /// An already parsed rule
    Loaded(Arc<Rule>),
}

impl From<PathBuf> for RuleSource {
    fn from(path: PathBuf) -> Self {
        RuleSource::Path(path)
    }
}

impl From<Rule> for RuleSource {
    fn from(rule: Rule) -> Self {
        RuleSource::Loaded(Arc::new(rule))
    }
}

/// One feed to process
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub rule: Arc<Rule>,
    pub feed: String,
}

/// Resolve `source` into work items
///
/// Directories are read non-recursively in file-name order, skipping hidden
/// entries; every feed of every rule is returned and `feed` is ignored.
/// A single rule with `feed` set is narrowed to exactly that feed.
pub fn load_feeds(source: &RuleSource, feed: Option<&str>) -> Result<Vec<WorkItem>, SmrtError> {
    match source {
        RuleSource::Path(path) if path.is_dir() => {
            if let Some(feed) = feed {
                warn!("Ignoring feed filter '{}' for rule directory {}", feed, path.display());
            }
            load_dir(path)
        }
        RuleSource::Path(path) => single(Rule::load(path)?, feed),
        RuleSource::Loaded(rule) => single(Rule::clone(rule), feed),
    }
}

fn load_dir(dir: &std::path::Path) -> Result<Vec<WorkItem>, SmrtError> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut items = Vec::new();
    for entry in entries {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        if !path.is_file() {
            debug!("Skipping non-file {}", path.display());
            continue;
        }

        debug!("Loading rule {}", path.display());
        items.extend(expand(Arc::new(Rule::load(&path)?)));
    }

    Ok(items)
}

fn single(mut rule: Rule, feed: Option<&str>) -> Result<Vec<WorkItem>, SmrtError> {
    if let Some(feed) = feed {
        rule.narrow(feed)?;
    }
    Ok(expand(Arc::new(rule)))
}

fn expand(rule: Arc<Rule>) -> Vec<WorkItem> {
    rule.feed_names()
        .into_iter()
        .map(|feed| WorkItem {
            rule: Arc::clone(&rule),
            feed,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn pairs(items: &[WorkItem]) -> Vec<(String, String)> {
        items.iter().map(|i| (i.rule.name(), i.feed.clone())).collect()
    }

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_directory_yields_every_feed() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.toml", "[feeds.default]\n");
        write(dir.path(), "a.toml", "[feeds.default]\n");
        write(dir.path(), ".hidden.toml", "[feeds.default]\n");
        fs::create_dir(dir.path().join("archive")).unwrap();

        let items = load_feeds(&RuleSource::Path(dir.path().to_path_buf()), None).unwrap();
        assert_eq!(
            pairs(&items),
            vec![
                ("a".to_string(), "default".to_string()),
                ("b".to_string(), "default".to_string())
            ]
        );
    }

    #[test]
    fn test_directory_ignores_feed_filter() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.toml", "[feeds.x]\n[feeds.y]\n");

        let items = load_feeds(&RuleSource::Path(dir.path().to_path_buf()), Some("y")).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_single_file_with_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "rule.toml", "[feeds.a]\n[feeds.b]\n");
        let source = RuleSource::Path(path);

        let items = load_feeds(&source, Some("b")).unwrap();
        assert_eq!(pairs(&items), vec![("rule".to_string(), "b".to_string())]);

        let all = load_feeds(&source, None).unwrap();
        assert_eq!(all.iter().map(|i| i.feed.as_str()).collect::<Vec<_>>(), ["a", "b"]);

        let err = load_feeds(&source, Some("c")).unwrap_err();
        assert!(matches!(err, SmrtError::FeedNotFound { .. }));
    }

    #[test]
    fn test_preloaded_rule() {
        let rule = Rule::from_toml_str("[feeds.a]\n[feeds.b]\n", None).unwrap();
        let source = RuleSource::from(rule);

        assert_eq!(load_feeds(&source, None).unwrap().len(), 2);
        assert_eq!(load_feeds(&source, Some("a")).unwrap().len(), 1);
    }

    #[test]
    fn test_bad_rule_in_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken.toml", "feeds = 3\n");

        let err = load_feeds(&RuleSource::Path(dir.path().to_path_buf()), None).unwrap_err();
        assert!(matches!(err, SmrtError::Rule { .. }));
    }
}
