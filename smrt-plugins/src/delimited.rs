//! Delimited column parsers (`csv`, `tsv`, `delim`)

use async_trait::async_trait;
use smrt_core::{Candidate, Indicator, SmrtError};

use crate::lines::{set_field, LineReader};
use crate::{CandidateIter, FeedDefaults, Parser, ParserContext};

/// Column separator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delimiter {
    Char(char),
    Text(String),
    Whitespace,
}

impl Delimiter {
    fn split<'a>(&self, line: &'a str) -> Vec<&'a str> {
        match self {
            Delimiter::Char(c) => split_quoted(line, *c),
            Delimiter::Text(sep) => line.split(sep.as_str()).collect(),
            Delimiter::Whitespace => line.split_whitespace().collect(),
        }
    }
}

/// Split on `sep`, keeping separators inside double quotes
fn split_quoted(line: &str, sep: char) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut quoted = false;

    for (idx, c) in line.char_indices() {
        if c == '"' {
            quoted = !quoted;
        } else if c == sep && !quoted {
            fields.push(&line[start..idx]);
            start = idx + c.len_utf8();
        }
    }
    fields.push(&line[start..]);
    fields
}

pub struct DelimitedParser {
    name: String,
    delimiter: Delimiter,
    ctx: ParserContext,
}

impl DelimitedParser {
    pub fn csv(ctx: ParserContext) -> Self {
        Self::with_delimiter("csv", Delimiter::Char(','), ctx)
    }

    pub fn tsv(ctx: ParserContext) -> Self {
        Self::with_delimiter("tsv", Delimiter::Char('\t'), ctx)
    }

    /// Separator from the feed's `delimiter`, whitespace when unset
    pub fn delim(ctx: ParserContext) -> Self {
        let delimiter = ctx
            .feed_config()
            .ok()
            .and_then(|f| f.delimiter.clone())
            .map(|d| {
                let mut chars = d.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Delimiter::Char(c),
                    _ => Delimiter::Text(d),
                }
            })
            .unwrap_or(Delimiter::Whitespace);
        Self::with_delimiter("delim", delimiter, ctx)
    }

    pub fn with_delimiter(name: &str, delimiter: Delimiter, ctx: ParserContext) -> Self {
        Self {
            name: name.to_string(),
            delimiter,
            ctx,
        }
    }
}

#[async_trait]
impl Parser for DelimitedParser {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&mut self) -> Result<CandidateIter, SmrtError> {
        let feed = self.ctx.feed_config()?;
        let reader = LineReader::from_feed(feed)?;
        let mut values = feed.values.clone();
        if values.is_empty() {
            values.push("indicator".to_string());
        }
        let defaults = self.ctx.defaults()?;
        let delimiter = self.delimiter.clone();

        let text = self.ctx.read_text().await?;
        let iter = reader
            .lines(&text)
            .into_iter()
            .filter_map(move |line| parse_row(&delimiter.split(&line), &values, &defaults))
            .map(|indicator| Ok(Candidate::Indicator(indicator)));

        Ok(Box::new(iter))
    }
}

fn parse_row(fields: &[&str], values: &[String], defaults: &FeedDefaults) -> Option<Indicator> {
    let mut indicator = defaults.build("");
    for (name, field) in values.iter().zip(fields) {
        set_field(&mut indicator, name, field);
    }

    if indicator.indicator.is_empty() || !defaults.accepts(&indicator) {
        return None;
    }
    Some(indicator)
}
