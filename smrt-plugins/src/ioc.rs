//! Free-text indicator extraction (`zioc`, reached with `parser = "ioc"`)
//!
//! Scrapes every recognizable indicator out of a page or report. HTML
//! payloads are reduced to visible text first.

use async_trait::async_trait;
use scraper::node::Node;
use scraper::{Html, Selector};
use smrt_core::{extract, Candidate, SmrtError};
use tracing::debug;

use crate::{CandidateIter, Parser, ParserContext};

pub struct IocParser {
    ctx: ParserContext,
}

impl IocParser {
    pub fn new(ctx: ParserContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Parser for IocParser {
    fn name(&self) -> &str {
        "zioc"
    }

    async fn process(&mut self) -> Result<CandidateIter, SmrtError> {
        let defaults = self.ctx.defaults()?;
        let raw = self.ctx.read_text().await?;

        let text = if looks_like_html(&raw) {
            visible_text(&raw)
        } else {
            raw
        };

        let found = extract(&text);
        debug!("{}: extracted {} indicators", self.ctx.feed, found.len());

        let iter = found.into_iter().filter_map(move |(itype, value)| {
            let mut indicator = defaults.build(&value);
            indicator.itype = Some(itype);
            defaults
                .accepts(&indicator)
                .then(|| Ok(Candidate::Indicator(indicator)))
        });

        Ok(Box::new(iter))
    }
}

fn looks_like_html(text: &str) -> bool {
    let head: String = text.chars().take(1024).collect::<String>().to_ascii_lowercase();
    head.contains("<html") || head.contains("<body") || head.contains("<!doctype html")
}

/// Visible text of an HTML document, skipping script/style/noscript
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let body_selector = Selector::parse("body").unwrap();

    let Some(body) = document.select(&body_selector).next() else {
        return String::new();
    };

    let mut parts = Vec::new();
    for node_ref in body.descendants() {
        if let Node::Text(text_node) = node_ref.value() {
            let in_excluded = node_ref.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|el| matches!(el.name(), "script" | "style" | "noscript"))
            });

            if !in_excluded {
                let trimmed = text_node.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
        }
    }

    // one fragment per line keeps adjacent cells from running together
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use smrt_core::IndicatorType;

    #[test]
    fn test_visible_text_skips_scripts() {
        let html = r#"
            <html><head><title>Report</title></head>
            <body>
                <script>var c2 = "203.0.113.99";</script>
                <p>Beacon to 198.51.100.4</p>
                <style>.x { color: red; }</style>
            </body></html>
        "#;

        let text = visible_text(html);
        assert!(text.contains("198.51.100.4"));
        assert!(!text.contains("203.0.113.99"));
        assert!(!text.contains("color"));
    }

    #[tokio::test]
    async fn test_extracts_typed_indicators() {
        let html = "<html><body><td>198.51.100.4</td><td>http://bad.example.net/p.exe</td></body></html>";
        let mut parser = IocParser::new(context(
            "provider = \"blog.example.org\"\n[feeds.default]\nparser = \"ioc\"\n",
            "default",
            html,
        ));

        let found: Vec<_> = parser
            .process()
            .await
            .unwrap()
            .map(|c| c.unwrap().into_indicator().unwrap())
            .collect();

        assert!(found
            .iter()
            .any(|i| i.indicator == "198.51.100.4" && i.itype == Some(IndicatorType::Ipv4)));
        assert!(found.iter().any(|i| i.itype == Some(IndicatorType::Url)));
        assert!(found.iter().all(|i| i.provider.as_deref() == Some("blog.example.org")));
    }

    #[tokio::test]
    async fn test_plain_text_report() {
        let mut parser = IocParser::new(context(
            "[feeds.default]\n",
            "default",
            "hash d41d8cd98f00b204e9800998ecf8427e seen",
        ));
        let found: Vec<_> = parser.process().await.unwrap().collect();
        assert_eq!(found.len(), 1);
    }
}
