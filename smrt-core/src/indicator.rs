//! Indicator records and parser candidates
//!
//! An [`Indicator`] is the unit of work flowing through the pipeline. Parsers
//! produce [`Candidate`]s, either fully typed or as loose key/value mappings
//! that the pipeline coerces before normalization.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

use crate::itype::{self, IndicatorType};
use crate::{SmrtError, DEFAULT_GROUP};

/// A normalized threat-intelligence record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    /// The observable itself (ip, domain, url, hash, ...)
    pub indicator: String,

    /// Detected or parser-supplied indicator type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub itype: Option<IndicatorType>,

    /// Source identity of the feed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Access-scope label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firsttime: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lasttime: Option<DateTime<Utc>>,

    /// When this record was produced; not part of its identity
    pub reporttime: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Source confidence (0.0 - 10.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// Open set of extra fields carried through from the parser
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Indicator {
    pub fn new(indicator: &str) -> Self {
        Self {
            indicator: indicator.trim().to_string(),
            itype: None,
            provider: None,
            group: None,
            tags: Vec::new(),
            firsttime: None,
            lasttime: None,
            reporttime: Utc::now(),
            description: None,
            confidence: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_firsttime(mut self, ts: DateTime<Utc>) -> Self {
        self.firsttime = Some(ts);
        self
    }

    pub fn with_lasttime(mut self, ts: DateTime<Utc>) -> Self {
        self.lasttime = Some(ts);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 10.0));
        self
    }

    /// Apply the defaulting invariants every accepted indicator must satisfy
    ///
    /// - `firsttime` falls back to `lasttime`
    /// - `group` falls back to [`DEFAULT_GROUP`]
    /// - `itype` is detected from the value when the parser left it unset
    pub fn normalize(&mut self) {
        if self.firsttime.is_none() {
            self.firsttime = self.lasttime;
        }

        if self.group.as_deref().map_or(true, str::is_empty) {
            self.group = Some(DEFAULT_GROUP.to_string());
        }

        if self.itype.is_none() {
            self.itype = itype::detect(&self.indicator);
        }
    }

    /// Stable identity used for dedup across runs
    ///
    /// Covers value, provider, group, sorted tags and the observation window.
    /// `reporttime` is deliberately left out.
    pub fn fingerprint(&self) -> String {
        let mut tags = self.tags.clone();
        tags.sort();

        let mut hasher = Sha256::new();
        hasher.update(self.indicator.to_lowercase().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.provider.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.group.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        hasher.update(tags.join(",").as_bytes());
        hasher.update([0u8]);
        hasher.update(rfc3339_or_empty(self.firsttime).as_bytes());
        hasher.update([0u8]);
        hasher.update(rfc3339_or_empty(self.lasttime).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Short `indicator/provider/firsttime/lasttime` label for log lines
    pub fn label(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.indicator,
            self.provider.as_deref().unwrap_or("-"),
            rfc3339_or_none(self.firsttime),
            rfc3339_or_none(self.lasttime),
        )
    }
}

fn rfc3339_or_empty(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn rfc3339_or_none(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_else(|| "None".to_string())
}

impl TryFrom<Map<String, Value>> for Indicator {
    type Error = SmrtError;

    fn try_from(mut map: Map<String, Value>) -> Result<Self, Self::Error> {
        let value = match map.remove("indicator") {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(SmrtError::Coerce(format!("unusable indicator value: {other}")))
            }
            None => return Err(SmrtError::Coerce("missing 'indicator' key".to_string())),
        };

        let mut out = Indicator::new(&value);
        out.provider = take_string(&mut map, "provider");
        out.group = take_string(&mut map, "group");
        out.description = take_string(&mut map, "description");
        out.firsttime = take_timestamp(&mut map, "firsttime");
        out.lasttime = take_timestamp(&mut map, "lasttime");

        if let Some(reporttime) = take_timestamp(&mut map, "reporttime") {
            out.reporttime = reporttime;
        }

        if let Some(raw) = map.remove("itype") {
            out.itype = serde_json::from_value(raw).ok();
        }

        match map.remove("tags") {
            Some(Value::Array(items)) => {
                out.tags = items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            Some(Value::String(s)) => out.tags = split_tags(&s),
            _ => {}
        }

        if let Some(c) = map.remove("confidence") {
            let parsed = match &c {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };
            out.confidence = parsed.map(|v: f64| v.clamp(0.0, 10.0));
        }

        out.extra = map.into_iter().collect();
        Ok(out)
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Null | Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

/// Unparsable values are dropped, matching how text parsers treat bad columns
fn take_timestamp(map: &mut Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    let parsed = match map.remove(key)? {
        Value::Null => return None,
        Value::String(s) if s.trim().is_empty() => return None,
        Value::String(s) => parse_timestamp(&s).ok_or(Value::String(s)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or(Value::Number(n)),
        other => Err(other),
    };

    match parsed {
        Ok(ts) => Some(ts),
        Err(raw) => {
            debug!("Ignoring unparsable {} {}", key, raw);
            None
        }
    }
}

/// Split a comma separated tag list
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse the timestamp layouts commonly found in feeds
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`,
/// `YYYY-MM-DD` and integer epoch seconds. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
    }

    if raw.chars().all(|c| c.is_ascii_digit()) {
        return raw
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    }

    None
}

/// What a parser hands to the pipeline
#[derive(Debug, Clone)]
pub enum Candidate {
    /// A fully typed record
    Indicator(Indicator),
    /// A loose key/value mapping that still needs coercion
    Raw(Map<String, Value>),
}

impl Candidate {
    /// Resolve into a typed [`Indicator`]
    pub fn into_indicator(self) -> Result<Indicator, SmrtError> {
        match self {
            Candidate::Indicator(i) => Ok(i),
            Candidate::Raw(map) => Indicator::try_from(map),
        }
    }
}

impl From<Indicator> for Candidate {
    fn from(indicator: Indicator) -> Self {
        Candidate::Indicator(indicator)
    }
}

/// Per-run indicator filters, mostly useful when testing a single rule
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    /// Only keep records whose value equals this one (case-insensitive)
    pub indicator: Option<String>,
}

impl Filters {
    pub fn indicator(value: &str) -> Self {
        Self {
            indicator: Some(value.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indicator.is_none()
    }

    pub fn matches(&self, indicator: &Indicator) -> bool {
        match &self.indicator {
            Some(wanted) => indicator.indicator.eq_ignore_ascii_case(wanted.trim()),
            None => true,
        }
    }
}
