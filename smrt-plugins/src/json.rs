//! JSON feed parser
//!
//! Accepts a top-level array of objects, or an object whose `data` /
//! `indicators` key holds one. Emits raw mappings for the pipeline to coerce.

use async_trait::async_trait;
use serde_json::{Map, Value};
use smrt_core::{Candidate, SmrtError};
use std::collections::BTreeMap;
use tracing::warn;

use crate::{CandidateIter, FeedDefaults, Parser, ParserContext};

pub struct JsonParser {
    ctx: ParserContext,
}

impl JsonParser {
    pub fn new(ctx: ParserContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Parser for JsonParser {
    fn name(&self) -> &str {
        "json"
    }

    async fn process(&mut self) -> Result<CandidateIter, SmrtError> {
        let map = self.ctx.feed_config()?.map.clone();
        let defaults = self.ctx.defaults()?;

        let bytes = self.ctx.read().await?;
        let doc: Value = serde_json::from_slice(&bytes)
            .map_err(|e| SmrtError::Runtime(format!("{}: malformed JSON feed: {e}", self.ctx.feed)))?;

        let items = match doc {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("data").or_else(|| obj.remove("indicators")) {
                Some(Value::Array(items)) => items,
                _ => vec![Value::Object(obj)],
            },
            other => {
                return Err(SmrtError::Runtime(format!(
                    "{}: expected a JSON array, got {other}",
                    self.ctx.feed
                )))
            }
        };

        let iter = items
            .into_iter()
            .filter_map(move |item| match item {
                Value::Object(obj) => to_candidate(obj, &map, &defaults),
                other => {
                    warn!("Skipping non-object JSON item: {}", other);
                    None
                }
            })
            .map(Ok);

        Ok(Box::new(iter))
    }
}

fn to_candidate(
    obj: Map<String, Value>,
    map: &BTreeMap<String, String>,
    defaults: &FeedDefaults,
) -> Option<Candidate> {
    let mut out: Map<String, Value> = obj
        .into_iter()
        .map(|(k, v)| (map.get(&k).cloned().unwrap_or(k), v))
        .collect();

    if let Some(wanted) = &defaults.filters.indicator {
        let value = out.get("indicator").and_then(Value::as_str).unwrap_or_default();
        if !value.trim().eq_ignore_ascii_case(wanted.trim()) {
            return None;
        }
    }

    out.entry("provider")
        .or_insert_with(|| Value::String(defaults.provider.clone()));
    if !defaults.tags.is_empty() {
        out.entry("tags")
            .or_insert_with(|| Value::from(defaults.tags.clone()));
    }
    if let Some(group) = &defaults.group {
        out.entry("group").or_insert_with(|| Value::String(group.clone()));
    }
    if let Some(description) = &defaults.description {
        out.entry("description")
            .or_insert_with(|| Value::String(description.clone()));
    }
    if let Some(confidence) = defaults.confidence {
        out.entry("confidence").or_insert_with(|| Value::from(confidence));
    }

    Some(Candidate::Raw(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;

    const RULE: &str = r#"
provider = "json.example.org"
tags = ["phishing"]

[feeds.default]
parser = "json"

[feeds.default.map]
url = "indicator"
seen = "lasttime"
"#;

    async fn run(data: &str) -> Vec<Candidate> {
        let mut parser = JsonParser::new(context(RULE, "default", data));
        parser.process().await.unwrap().map(Result::unwrap).collect()
    }

    #[tokio::test]
    async fn test_array_with_renames() {
        let found = run(r#"[{"url": "http://bad.example/x", "seen": "2024-03-01", "asn": 1}]"#).await;
        assert_eq!(found.len(), 1);

        let Candidate::Raw(map) = &found[0] else {
            panic!("expected a raw mapping");
        };
        assert_eq!(map["indicator"], "http://bad.example/x");
        assert_eq!(map["provider"], "json.example.org");
        assert_eq!(map["tags"], serde_json::json!(["phishing"]));

        let indicator = found[0].clone().into_indicator().unwrap();
        assert!(indicator.lasttime.is_some());
        assert_eq!(indicator.extra["asn"], 1);
    }

    #[tokio::test]
    async fn test_wrapped_object_and_explicit_fields() {
        let found = run(r#"{"data": [{"url": "a.example", "tags": ["c2"]}, 42]}"#).await;
        assert_eq!(found.len(), 1);
        let indicator = found[0].clone().into_indicator().unwrap();
        assert_eq!(indicator.tags, vec!["c2"]);
    }

    #[tokio::test]
    async fn test_malformed_json_is_runtime_error() {
        let mut parser = JsonParser::new(context(RULE, "default", "{not json"));
        let err = parser.process().await.err().unwrap();
        assert!(matches!(err, SmrtError::Runtime(_)));
    }
}
