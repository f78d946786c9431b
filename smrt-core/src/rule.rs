//! Rule files
//!
//! A rule is a TOML document describing one or more feeds. Top-level keys are
//! defaults shared by every feed; each `[feeds.<name>]` table may override them
//! and carries the parser-specific options for that feed.

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{SmrtError, PARSER_DEFAULT};

/// A loaded rule file
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    /// File the rule was loaded from (None for in-memory rules)
    #[serde(skip)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub remote: Option<String>,

    #[serde(default)]
    pub parser: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub confidence: Option<f64>,

    /// Feeds in document order
    #[serde(default)]
    pub feeds: IndexMap<String, Feed>,
}

/// One named feed inside a rule
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Feed {
    #[serde(default)]
    pub remote: Option<String>,

    #[serde(default)]
    pub parser: Option<String>,

    /// Capture regex for the pattern parser
    #[serde(default)]
    pub pattern: Option<String>,

    /// Field names for captures / columns, in order
    #[serde(default)]
    pub values: Vec<String>,

    #[serde(default)]
    pub delimiter: Option<String>,

    /// Lines matching this regex are ignored
    #[serde(default)]
    pub skip: Option<String>,

    #[serde(default)]
    pub skip_first: bool,

    #[serde(default)]
    pub tags: Option<Vec<String>>,

    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub confidence: Option<f64>,

    /// Source key -> indicator field renames (json parser)
    #[serde(default)]
    pub map: BTreeMap<String, String>,

    /// Anything else, left for custom parsers
    #[serde(flatten)]
    pub options: toml::Table,
}

impl Rule {
    /// Load and validate a rule file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SmrtError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content, Some(path))
    }

    /// Parse a rule from TOML text
    pub fn from_toml_str(content: &str, path: Option<&Path>) -> Result<Self, SmrtError> {
        let label = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("<inline>"));
        let mut rule: Rule = toml::from_str(content).map_err(|e| SmrtError::Rule {
            path: label.clone(),
            message: e.message().to_string(),
        })?;
        rule.path = path.map(Path::to_path_buf);
        rule.validate(&label)?;
        Ok(rule)
    }

    fn validate(&self, label: &Path) -> Result<(), SmrtError> {
        let invalid = |message: String| SmrtError::Rule {
            path: label.to_path_buf(),
            message,
        };

        if self.feeds.is_empty() {
            return Err(invalid("no feeds declared".to_string()));
        }

        for (name, feed) in &self.feeds {
            for (key, regex) in [("pattern", &feed.pattern), ("skip", &feed.skip)] {
                if let Some(raw) = regex {
                    Regex::new(raw).map_err(|e| invalid(format!("feeds.{name}.{key}: {e}")))?;
                }
            }
        }

        Ok(())
    }

    /// Short name derived from the file stem
    pub fn name(&self) -> String {
        self.path
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "inline".to_string())
    }

    /// Provider label; falls back to the rule name
    pub fn provider(&self) -> String {
        self.provider.clone().unwrap_or_else(|| self.name())
    }

    /// Directory that relative file remotes are resolved against
    pub fn base_dir(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    pub fn feed(&self, name: &str) -> Option<&Feed> {
        self.feeds.get(name)
    }

    pub fn feed_names(&self) -> Vec<String> {
        self.feeds.keys().cloned().collect()
    }

    /// Replace the feed set with exactly the named feed
    pub fn narrow(&mut self, feed: &str) -> Result<(), SmrtError> {
        if !self.feeds.contains_key(feed) {
            return Err(SmrtError::FeedNotFound {
                rule: self.name(),
                feed: feed.to_string(),
            });
        }
        self.feeds.retain(|name, _| name == feed);
        Ok(())
    }
}

impl Feed {
    /// Parser name: feed, then rule, then the default pattern parser
    pub fn parser_name<'a>(&'a self, rule: &'a Rule) -> &'a str {
        self.parser
            .as_deref()
            .or(rule.parser.as_deref())
            .unwrap_or(PARSER_DEFAULT)
    }

    pub fn remote<'a>(&'a self, rule: &'a Rule) -> Option<&'a str> {
        self.remote.as_deref().or(rule.remote.as_deref())
    }

    pub fn provider(&self, rule: &Rule) -> String {
        self.provider.clone().unwrap_or_else(|| rule.provider())
    }

    pub fn tags<'a>(&'a self, rule: &'a Rule) -> &'a [String] {
        self.tags.as_deref().unwrap_or(&rule.tags)
    }

    pub fn group<'a>(&'a self, rule: &'a Rule) -> Option<&'a str> {
        self.group.as_deref().or(rule.group.as_deref())
    }

    pub fn description<'a>(&'a self, rule: &'a Rule) -> Option<&'a str> {
        self.description.as_deref().or(rule.description.as_deref())
    }

    pub fn confidence(&self, rule: &Rule) -> Option<f64> {
        self.confidence.or(rule.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULE: &str = r#"
provider = "feeds.example.org"
remote = "https://feeds.example.org/all.txt"
tags = ["scanner"]
confidence = 7.5

[feeds.zeta]
parser = "csv"
values = ["indicator", "lasttime"]

[feeds.alpha]
remote = "alpha.txt"
pattern = '^(\S+)\s+(\S+)$'
values = ["indicator", "description"]
tags = ["ssh"]
group = "partners"
custom_knob = 3
"#;

    #[test]
    fn test_parse_rule_keeps_feed_order() {
        let rule = Rule::from_toml_str(RULE, Some(Path::new("/rules/example.toml"))).unwrap();
        assert_eq!(rule.feed_names(), vec!["zeta", "alpha"]);
        assert_eq!(rule.name(), "example");
        assert_eq!(rule.base_dir(), Some(Path::new("/rules")));
    }

    #[test]
    fn test_feed_overrides() {
        let rule = Rule::from_toml_str(RULE, None).unwrap();
        let zeta = rule.feed("zeta").unwrap();
        let alpha = rule.feed("alpha").unwrap();

        assert_eq!(zeta.parser_name(&rule), "csv");
        assert_eq!(alpha.parser_name(&rule), PARSER_DEFAULT);
        assert_eq!(zeta.remote(&rule), Some("https://feeds.example.org/all.txt"));
        assert_eq!(alpha.remote(&rule), Some("alpha.txt"));
        assert_eq!(zeta.tags(&rule), ["scanner".to_string()]);
        assert_eq!(alpha.tags(&rule), ["ssh".to_string()]);
        assert_eq!(alpha.group(&rule), Some("partners"));
        assert_eq!(zeta.provider(&rule), "feeds.example.org");
        assert_eq!(zeta.confidence(&rule), Some(7.5));
        assert_eq!(alpha.options.get("custom_knob").and_then(|v| v.as_integer()), Some(3));
    }

    #[test]
    fn test_narrow() {
        let mut rule = Rule::from_toml_str(RULE, None).unwrap();
        rule.narrow("alpha").unwrap();
        assert_eq!(rule.feed_names(), vec!["alpha"]);

        let err = rule.narrow("missing").unwrap_err();
        assert!(matches!(err, SmrtError::FeedNotFound { .. }));
    }

    #[test]
    fn test_rule_without_feeds_is_rejected() {
        let err = Rule::from_toml_str("provider = \"x\"", None).unwrap_err();
        assert!(matches!(err, SmrtError::Rule { .. }));
    }

    #[test]
    fn test_bad_pattern_is_rejected() {
        let err = Rule::from_toml_str("[feeds.a]\npattern = '('\n", None).unwrap_err();
        assert!(err.to_string().contains("feeds.a.pattern"));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.toml");
        std::fs::write(&path, "[feeds.default]\nremote = \"list.txt\"\n").unwrap();

        let rule = Rule::load(&path).unwrap();
        assert_eq!(rule.provider(), "local");
        assert_eq!(rule.feed_names(), vec!["default"]);
    }
}
