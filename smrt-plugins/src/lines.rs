//! Shared helpers for line-oriented feeds

use regex::Regex;
use serde_json::Value;
use smrt_core::{parse_timestamp, split_tags, Feed, Indicator, SmrtError};
use tracing::debug;

/// Splits feed text into content lines
#[derive(Debug, Clone, Default)]
pub struct LineReader {
    skip: Option<Regex>,
    skip_first: bool,
}

impl LineReader {
    pub fn from_feed(feed: &Feed) -> Result<Self, SmrtError> {
        let skip = feed
            .skip
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| SmrtError::Config(format!("bad skip regex: {e}")))?;

        Ok(Self {
            skip,
            skip_first: feed.skip_first,
        })
    }

    /// Non-empty, non-comment lines that survive `skip` / `skip_first`
    pub fn lines(&self, text: &str) -> Vec<String> {
        text.lines()
            .skip(usize::from(self.skip_first))
            .map(str::trim)
            .filter(|line| !line.is_empty() && !is_comment(line))
            .filter(|line| !self.skip.as_ref().is_some_and(|re| re.is_match(line)))
            .map(str::to_string)
            .collect()
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#') || line.starts_with(';') || line.starts_with("//")
}

/// Cut an inline comment ("1.2.3.4 ; SBL123", "evil.com # c2")
///
/// Only a marker preceded by whitespace counts, so URL fragments survive.
pub fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (idx, &b) in bytes.iter().enumerate() {
        if (b == b'#' || b == b';') && idx > 0 && bytes[idx - 1].is_ascii_whitespace() {
            return line[..idx].trim_end();
        }
    }
    line.trim_end()
}

/// Assign a named column / capture onto an indicator
pub fn set_field(indicator: &mut Indicator, key: &str, raw: &str) {
    let raw = raw.trim().trim_matches('"');
    if raw.is_empty() {
        return;
    }

    match key {
        "" | "-" | "_" => {}
        "indicator" => indicator.indicator = raw.to_string(),
        "firsttime" | "lasttime" | "reporttime" => match parse_timestamp(raw) {
            Some(ts) if key == "firsttime" => indicator.firsttime = Some(ts),
            Some(ts) if key == "lasttime" => indicator.lasttime = Some(ts),
            Some(ts) => indicator.reporttime = ts,
            None => debug!("Ignoring unparsable {} '{}' for {}", key, raw, indicator.indicator),
        },
        "tags" => {
            for tag in split_tags(raw) {
                if !indicator.tags.contains(&tag) {
                    indicator.tags.push(tag);
                }
            }
        }
        "description" => indicator.description = Some(raw.to_string()),
        "group" => indicator.group = Some(raw.to_string()),
        "provider" => indicator.provider = Some(raw.to_string()),
        "confidence" => {
            if let Ok(c) = raw.parse::<f64>() {
                indicator.confidence = Some(c.clamp(0.0, 10.0));
            }
        }
        other => {
            indicator.extra.insert(other.to_string(), Value::String(raw.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_skip_comments_and_header() {
        let feed = Feed {
            skip: Some("^127\\.".to_string()),
            skip_first: true,
            ..Feed::default()
        };
        let reader = LineReader::from_feed(&feed).unwrap();
        let text = "ip,seen\n# comment\n; other\n\n127.0.0.1\n192.0.2.1\n";
        assert_eq!(reader.lines(text), vec!["192.0.2.1"]);
    }

    #[test]
    fn test_strip_comment() {
        assert_eq!(strip_comment("1.2.3.4 ; SBL123"), "1.2.3.4");
        assert_eq!(strip_comment("evil.example.com\t# c2"), "evil.example.com");
        assert_eq!(strip_comment("http://x.example/a#frag"), "http://x.example/a#frag");
    }

    #[test]
    fn test_set_field() {
        let mut i = Indicator::new("192.0.2.1").with_tags(["scanner"]);
        set_field(&mut i, "lasttime", "2024-03-01 10:00:00");
        set_field(&mut i, "tags", "scanner,ssh");
        set_field(&mut i, "asn", "64496");
        set_field(&mut i, "firsttime", "not a date");

        assert!(i.lasttime.is_some());
        assert!(i.firsttime.is_none());
        assert_eq!(i.tags, vec!["scanner", "ssh"]);
        assert_eq!(i.extra.get("asn"), Some(&Value::String("64496".into())));
    }
}
