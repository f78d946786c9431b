//! Indicator type detection and free-text extraction
//!
//! Classifies a single indicator value (ip, cidr, fqdn, url, email, hash) and
//! pulls every recognizable indicator out of an unstructured blob of text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::LazyLock;

/// Kinds of indicator values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorType {
    /// IPv4 address
    Ipv4,
    /// IPv4 network in CIDR notation
    Ipv4Cidr,
    /// IPv6 address
    Ipv6,
    /// Fully qualified domain name
    Fqdn,
    /// URL
    Url,
    /// Email address
    Email,
    /// MD5 hash
    Md5,
    /// SHA1 hash
    Sha1,
    /// SHA256 hash
    Sha256,
}

impl IndicatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorType::Ipv4 => "ipv4",
            IndicatorType::Ipv4Cidr => "ipv4_cidr",
            IndicatorType::Ipv6 => "ipv6",
            IndicatorType::Fqdn => "fqdn",
            IndicatorType::Url => "url",
            IndicatorType::Email => "email",
            IndicatorType::Md5 => "md5",
            IndicatorType::Sha1 => "sha1",
            IndicatorType::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static FQDN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,63}$").unwrap()
});

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap()
});

static HEX_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-fA-F0-9]+$").unwrap());

// Free-text extraction patterns
static URL_TEXT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"']+"#).unwrap()
});

static EMAIL_TEXT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});

static IPV4_TEXT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)(?:/(?:3[0-2]|[12]?[0-9]))?\b").unwrap()
});

static HASH_TEXT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[a-fA-F0-9]{64}|[a-fA-F0-9]{40}|[a-fA-F0-9]{32})\b").unwrap()
});

static FQDN_TEXT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,63}\b").unwrap()
});

/// Classify a single indicator value
pub fn detect(value: &str) -> Option<IndicatorType> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if Ipv4Addr::from_str(value).is_ok() {
        return Some(IndicatorType::Ipv4);
    }
    if is_ipv4_cidr(value) {
        return Some(IndicatorType::Ipv4Cidr);
    }
    if Ipv6Addr::from_str(value).is_ok() {
        return Some(IndicatorType::Ipv6);
    }
    if value.contains("://") {
        return Some(IndicatorType::Url);
    }
    if EMAIL_REGEX.is_match(value) {
        return Some(IndicatorType::Email);
    }
    if HEX_REGEX.is_match(value) {
        return match value.len() {
            32 => Some(IndicatorType::Md5),
            40 => Some(IndicatorType::Sha1),
            64 => Some(IndicatorType::Sha256),
            _ => None,
        };
    }
    if FQDN_REGEX.is_match(value) {
        return Some(IndicatorType::Fqdn);
    }

    None
}

fn is_ipv4_cidr(value: &str) -> bool {
    let Some((addr, prefix)) = value.split_once('/') else {
        return false;
    };
    Ipv4Addr::from_str(addr).is_ok() && prefix.parse::<u8>().map(|p| p <= 32).unwrap_or(false)
}

/// Helper to add a value if it has not been seen yet
fn try_add(
    found: &mut Vec<(IndicatorType, String)>,
    seen: &mut HashSet<String>,
    itype: IndicatorType,
    value: &str,
) {
    if seen.insert(value.to_lowercase()) {
        found.push((itype, value.to_string()));
    }
}

/// Extract every recognizable indicator from unstructured text
///
/// Values are returned in discovery order and deduplicated case-insensitively.
/// URLs and emails are blanked out before the domain scan so their host parts
/// are not reported a second time as bare domains.
pub fn extract(text: &str) -> Vec<(IndicatorType, String)> {
    let mut found = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for cap in URL_TEXT_REGEX.find_iter(text) {
        let url = cap.as_str().trim_end_matches(['.', ',', ')', ';']);
        try_add(&mut found, &mut seen, IndicatorType::Url, url);
    }

    for cap in EMAIL_TEXT_REGEX.find_iter(text) {
        try_add(&mut found, &mut seen, IndicatorType::Email, cap.as_str());
    }

    let remainder = URL_TEXT_REGEX.replace_all(text, " ");
    let remainder = EMAIL_TEXT_REGEX.replace_all(&remainder, " ");

    for cap in IPV4_TEXT_REGEX.find_iter(&remainder) {
        if let Some(itype) = detect(cap.as_str()) {
            try_add(&mut found, &mut seen, itype, cap.as_str());
        }
    }

    for cap in HASH_TEXT_REGEX.find_iter(&remainder) {
        if let Some(itype) = detect(cap.as_str()) {
            try_add(&mut found, &mut seen, itype, cap.as_str());
        }
    }

    for cap in FQDN_TEXT_REGEX.find_iter(&remainder) {
        try_add(&mut found, &mut seen, IndicatorType::Fqdn, cap.as_str());
    }

    found
}
