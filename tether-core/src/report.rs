//! Scan outcome aggregation.
//!
//! I/O and parse failures accumulate here instead of aborting the scan; the
//! CLI renders the final counts. Serialization is stable for diffing
//! consecutive runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ParseErrorKind;

/// A reference whose target GUID has no node in the graph. Recorded as a
/// warning; the edge is skipped, never silently absorbed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveWarning {
    pub source_path: String,
    pub target_guid: String,
    pub reason: String,
}

/// One non-fatal I/O failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoFailure {
    pub path: String,
    pub message: String,
}

/// One non-fatal per-file parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub path: String,
    pub kind: ParseErrorKind,
    pub message: String,
}

/// A file skipped for exceeding the size limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLarge {
    pub path: String,
    pub size: u64,
}

/// Aggregated result of one scan run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: i64,
    pub full_scan: bool,

    pub files_walked: u64,
    pub files_new: u64,
    pub files_modified: u64,
    pub files_unchanged: u64,
    pub files_deleted: u64,
    pub files_parsed: u64,

    pub nodes_upserted: u64,
    pub nodes_deactivated: u64,
    pub edges_added: u64,
    pub edges_removed: u64,
    pub transactions_committed: u64,
    pub transactions_failed: u64,

    pub skipped_large: Vec<SkippedLarge>,
    pub io_errors: Vec<IoFailure>,
    pub parse_errors: Vec<ParseFailure>,
    pub resolve_warnings: Vec<ResolveWarning>,
    pub parser_warnings: u64,

    pub cancelled: bool,
    pub duration_ms: u64,
}

impl ScanReport {
    pub fn error_count(&self) -> usize {
        self.io_errors.len() + self.parse_errors.len()
    }

    /// Parse-error counts keyed by kind, in stable order.
    pub fn parse_errors_by_kind(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for err in &self.parse_errors {
            let key = serde_json::to_value(err.kind)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| format!("{:?}", err.kind));
            *counts.entry(key).or_default() += 1;
        }
        counts
    }

    /// Fraction of walked files that processed cleanly.
    pub fn success_rate(&self) -> f64 {
        if self.files_walked == 0 {
            return 1.0;
        }
        let failed = self.error_count() as f64;
        ((self.files_walked as f64 - failed) / self.files_walked as f64).max(0.0)
    }

    pub fn summary_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_counts_failures() {
        let mut report = ScanReport {
            files_walked: 10,
            ..Default::default()
        };
        assert!((report.success_rate() - 1.0).abs() < f64::EPSILON);

        report.parse_errors.push(ParseFailure {
            path: "x.meta".into(),
            kind: ParseErrorKind::BadGuid,
            message: "bad".into(),
        });
        report.io_errors.push(IoFailure {
            path: "y.prefab".into(),
            message: "denied".into(),
        });
        assert!((report.success_rate() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_scan_is_fully_successful() {
        assert!((ScanReport::default().success_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn counts_by_kind_stable_keys() {
        let mut report = ScanReport::default();
        for kind in [
            ParseErrorKind::BadGuid,
            ParseErrorKind::BadGuid,
            ParseErrorKind::MalformedYaml,
        ] {
            report.parse_errors.push(ParseFailure {
                path: "p".into(),
                kind,
                message: String::new(),
            });
        }
        let counts = report.parse_errors_by_kind();
        assert_eq!(counts.get("bad_guid"), Some(&2));
        assert_eq!(counts.get("malformed_yaml"), Some(&1));
    }

    #[test]
    fn report_serializes_round_trip() {
        let report = ScanReport {
            scan_id: 7,
            files_walked: 3,
            resolve_warnings: vec![ResolveWarning {
                source_path: "Assets/P.prefab".into(),
                target_guid: "f".repeat(32),
                reason: "unknown GUID".into(),
            }],
            ..Default::default()
        };
        let json = report.summary_json();
        let back: ScanReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
