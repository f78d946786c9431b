//! Default line/regex parser
//!
//! With a `pattern`, each line is matched and its capture groups are named by
//! `values`. Without one, the first token of every line is the indicator.

use async_trait::async_trait;
use regex::Regex;
use smrt_core::{Candidate, SmrtError};
use tracing::debug;

use crate::lines::{set_field, strip_comment, LineReader};
use crate::{CandidateIter, FeedDefaults, Parser, ParserContext};

pub struct PatternParser {
    ctx: ParserContext,
}

impl PatternParser {
    pub fn new(ctx: ParserContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Parser for PatternParser {
    fn name(&self) -> &str {
        "pattern"
    }

    async fn process(&mut self) -> Result<CandidateIter, SmrtError> {
        let feed = self.ctx.feed_config()?;
        let reader = LineReader::from_feed(feed)?;
        let pattern = feed
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| SmrtError::Config(format!("bad pattern: {e}")))?;
        let values = feed.values.clone();
        let defaults = self.ctx.defaults()?;

        let text = self.ctx.read_text().await?;
        let lines = reader.lines(&text);
        debug!("{}: {} candidate lines", self.ctx.feed, lines.len());

        let iter = lines
            .into_iter()
            .filter_map(move |line| parse_line(&line, pattern.as_ref(), &values, &defaults))
            .map(|indicator| Ok(Candidate::Indicator(indicator)));

        Ok(Box::new(iter))
    }
}

fn parse_line(
    line: &str,
    pattern: Option<&Regex>,
    values: &[String],
    defaults: &FeedDefaults,
) -> Option<smrt_core::Indicator> {
    let indicator = match pattern {
        Some(re) => {
            let caps = re.captures(line)?;
            let mut indicator = defaults.build("");

            if values.is_empty() {
                let value = caps.get(1).or_else(|| caps.get(0))?;
                indicator.indicator = value.as_str().trim().to_string();
            } else {
                for (idx, name) in values.iter().enumerate() {
                    if let Some(m) = caps.get(idx + 1) {
                        set_field(&mut indicator, name, m.as_str());
                    }
                }
                if !values.iter().any(|v| v == "indicator") {
                    indicator.indicator = caps.get(1)?.as_str().trim().to_string();
                }
            }
            indicator
        }
        None => {
            let value = strip_comment(line).split_whitespace().next()?;
            defaults.build(value)
        }
    };

    if indicator.indicator.is_empty() || !defaults.accepts(&indicator) {
        return None;
    }
    Some(indicator)
}
