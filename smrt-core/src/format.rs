//! Output formats for printing a cycle's indicators

use std::collections::BTreeMap;

use crate::{Indicator, SmrtError};

/// Renders a list of indicators into printable text
pub type Formatter = fn(&[Indicator]) -> String;

const COLUMNS: [&str; 7] = [
    "indicator",
    "itype",
    "provider",
    "group",
    "tags",
    "firsttime",
    "lasttime",
];

/// Name -> formatter lookup
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    formats: BTreeMap<String, Formatter>,
}

impl FormatRegistry {
    /// Registry holding `table`, `csv`, `json` and `jsonl`
    pub fn with_builtin() -> Self {
        let mut registry = Self::default();
        registry.register("table", format_table);
        registry.register("csv", format_csv);
        registry.register("json", format_json);
        registry.register("jsonl", format_jsonl);
        registry
    }

    pub fn register(&mut self, name: &str, formatter: Formatter) {
        self.formats.insert(name.to_string(), formatter);
    }

    pub fn get(&self, name: &str) -> Result<Formatter, SmrtError> {
        self.formats.get(name).copied().ok_or_else(|| {
            SmrtError::Config(format!(
                "unknown output format '{}' (available: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.formats.keys().map(String::as_str).collect()
    }
}

fn row(i: &Indicator) -> [String; 7] {
    let ts = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_default()
    };
    [
        i.indicator.clone(),
        i.itype.map(|t| t.to_string()).unwrap_or_default(),
        i.provider.clone().unwrap_or_default(),
        i.group.clone().unwrap_or_default(),
        i.tags.join(","),
        ts(i.firsttime),
        ts(i.lasttime),
    ]
}

/// Aligned columns with a header row
pub fn format_table(indicators: &[Indicator]) -> String {
    let rows: Vec<[String; 7]> = indicators.iter().map(row).collect();

    let mut widths = COLUMNS.map(str::len);
    for r in &rows {
        for (w, cell) in widths.iter_mut().zip(r.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let render = |cells: &[&str]| -> String {
        cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, &w)| format!("{cell:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = Vec::with_capacity(rows.len() + 2);
    out.push(render(&COLUMNS));
    out.push(render(&widths.map(|w| "-".repeat(w)).each_ref().map(String::as_str)));
    for r in &rows {
        out.push(render(&r.each_ref().map(String::as_str)));
    }
    out.join("\n")
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// Header plus one quoted line per indicator
pub fn format_csv(indicators: &[Indicator]) -> String {
    let mut lines = vec![COLUMNS.join(",")];
    for i in indicators {
        let cells: Vec<String> = row(i).iter().map(|c| csv_field(c)).collect();
        lines.push(cells.join(","));
    }
    lines.join("\n")
}

/// Pretty-printed JSON array
pub fn format_json(indicators: &[Indicator]) -> String {
    serde_json::to_string_pretty(indicators).unwrap_or_else(|_| "[]".to_string())
}

/// One JSON object per line
pub fn format_jsonl(indicators: &[Indicator]) -> String {
    indicators
        .iter()
        .filter_map(|i| serde_json::to_string(i).ok())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Indicator> {
        let mut a = Indicator::new("192.0.2.1")
            .with_provider("example.org")
            .with_tags(["scanner", "ssh"]);
        a.normalize();
        let mut b = Indicator::new("bad.example.com").with_provider("other, inc");
        b.normalize();
        vec![a, b]
    }

    #[test]
    fn test_registry_lookup() {
        let registry = FormatRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["csv", "json", "jsonl", "table"]);
        assert!(registry.get("table").is_ok());
        assert!(matches!(registry.get("xml"), Err(SmrtError::Config(_))));
    }

    #[test]
    fn test_table_alignment() {
        let out = format_table(&sample());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("indicator        itype"));
        assert!(lines[2].starts_with("192.0.2.1        ipv4"));
        assert!(lines[2].contains("scanner,ssh"));
    }

    #[test]
    fn test_csv_quoting() {
        let out = format_csv(&sample());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "indicator,itype,provider,group,tags,firsttime,lasttime");
        assert_eq!(lines[1], "192.0.2.1,ipv4,example.org,everyone,\"scanner,ssh\",,");
        assert!(lines[2].contains("\"other, inc\""));
    }

    #[test]
    fn test_json_formats() {
        let indicators = sample();
        let parsed: serde_json::Value = serde_json::from_str(&format_json(&indicators)).unwrap();
        assert_eq!(parsed.as_array().map(Vec::len), Some(2));

        let jsonl = format_jsonl(&indicators);
        assert_eq!(jsonl.lines().count(), 2);
        assert!(jsonl.lines().next().unwrap().contains("\"indicator\":\"192.0.2.1\""));
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(format_json(&[]), "[]");
        assert_eq!(format_jsonl(&[]), "");
        assert_eq!(format_table(&[]).lines().count(), 2);
    }
}
