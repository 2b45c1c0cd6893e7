//! Result reconciliation and report accumulation.
//!
//! Compares each [`HashResult`] against its manifest expectation and
//! folds the outcome into the run's [`VerificationReport`]. Comparison
//! is algorithm-specific: PDQ/MD5 digests match on case-insensitive hex
//! equality (with an optional Hamming-distance bound from the manifest),
//! TMK artifacts are scored by a pluggable similarity function against a
//! threshold.
//!
//! A result that did not complete (timeout, engine failure) never
//! reaches a comparator — it is reported unmatched with the status as
//! its reason.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{Algorithm, Engine};
use crate::invoke::{HashResult, InvokeStatus, Observed};
use crate::manifest::VerificationCase;

/// TMK similarity scoring is an external collaborator. Implementations
/// return a score in `[0, 1]`; the reconciler only interprets it against
/// the configured threshold.
pub trait TmkComparator: Send + Sync {
    fn score(&self, observed: &[u8], expected: &[u8]) -> f64;
}

/// Stand-alone default: byte-for-byte equality of artifact contents.
/// A deployment verifying against independently computed artifacts plugs
/// in the real TMK cosine scorer instead.
pub struct ByteEquality;

impl TmkComparator for ByteEquality {
    fn score(&self, observed: &[u8], expected: &[u8]) -> f64 {
        if observed == expected {
            1.0
        } else {
            0.0
        }
    }
}

/// One reconciled case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub media_id: String,
    pub expected: String,
    pub observed: String,
    pub matched: bool,
    pub reason: String,
    pub duration_ms: u64,
}

/// Final run report: ordered entries plus summary counts.
#[derive(Debug, Serialize)]
pub struct VerificationReport {
    pub run_id: String,
    pub engine: Engine,
    pub algorithm: Algorithm,
    pub started_at: String,
    pub entries: Vec<ReportEntry>,
    pub passed: usize,
    pub failed: usize,
    /// Manifest rows dropped before any case ran.
    pub skipped_rows: usize,
}

impl VerificationReport {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }

    /// Human-readable result table for stdout.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:<28} {:<20} {:<20} {:<6} {}\n",
            "CASE", "EXPECTED", "OBSERVED", "RESULT", "REASON"
        ));
        for entry in &self.entries {
            out.push_str(&format!(
                "{:<28} {:<20} {:<20} {:<6} {}\n",
                truncate(&entry.media_id, 28),
                truncate(&entry.expected, 20),
                truncate(&entry.observed, 20),
                if entry.matched { "PASS" } else { "FAIL" },
                entry.reason,
            ));
        }
        out.push_str(&format!(
            "\n{} passed, {} failed, {} manifest rows skipped\n",
            self.passed, self.failed, self.skipped_rows
        ));
        out
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

/// Accumulates report entries in case order.
pub struct Reconciler {
    report: VerificationReport,
    comparator: Box<dyn TmkComparator>,
    /// Minimum TMK similarity score counted as a match.
    threshold: f64,
}

impl Reconciler {
    pub fn new(engine: Engine, algorithm: Algorithm) -> Self {
        Self::with_comparator(engine, algorithm, Box::new(ByteEquality), 1.0)
    }

    pub fn with_comparator(
        engine: Engine,
        algorithm: Algorithm,
        comparator: Box<dyn TmkComparator>,
        threshold: f64,
    ) -> Self {
        Self {
            report: VerificationReport {
                run_id: Uuid::new_v4().to_string(),
                engine,
                algorithm,
                started_at: Utc::now().to_rfc3339(),
                entries: Vec::new(),
                passed: 0,
                failed: 0,
                skipped_rows: 0,
            },
            comparator,
            threshold,
        }
    }

    /// Compare one result against its case and record the entry.
    pub fn reconcile(&mut self, case: &VerificationCase, result: &HashResult) -> ReportEntry {
        let (matched, reason) = match result.status {
            InvokeStatus::Timeout => (false, InvokeStatus::Timeout.as_str().to_string()),
            InvokeStatus::EngineError => {
                let reason = match &result.detail {
                    Some(detail) => format!("{}: {detail}", InvokeStatus::EngineError.as_str()),
                    None => InvokeStatus::EngineError.as_str().to_string(),
                };
                (false, reason)
            }
            InvokeStatus::Ok => self.compare(case, &result.observed),
        };

        let entry = ReportEntry {
            media_id: case.media_id.clone(),
            expected: case.expected_hash.clone(),
            observed: result.observed.display(),
            matched,
            reason,
            duration_ms: result.compute_duration_ms,
        };
        self.record(entry.clone());
        entry
    }

    /// Record a case that failed before producing a result (bridge
    /// failure, cancellation). Keeps the one-entry-per-case invariant.
    pub fn record_failure(
        &mut self,
        case: &VerificationCase,
        reason: impl Into<String>,
        duration_ms: u64,
    ) -> ReportEntry {
        let entry = ReportEntry {
            media_id: case.media_id.clone(),
            expected: case.expected_hash.clone(),
            observed: "-".to_string(),
            matched: false,
            reason: reason.into(),
            duration_ms,
        };
        self.record(entry.clone());
        entry
    }

    fn record(&mut self, entry: ReportEntry) {
        if entry.matched {
            self.report.passed += 1;
        } else {
            self.report.failed += 1;
        }
        self.report.entries.push(entry);
    }

    pub fn finish(mut self, skipped_rows: usize) -> VerificationReport {
        self.report.skipped_rows = skipped_rows;
        self.report
    }

    fn compare(&self, case: &VerificationCase, observed: &Observed) -> (bool, String) {
        match (case.algorithm, observed) {
            (Algorithm::PdqMd5, Observed::Digest(digest)) => {
                compare_digest(digest, &case.expected_hash, case.max_distance)
            }
            (Algorithm::Tmk, Observed::Artifact(path)) => {
                self.compare_artifact(path, &case.expected_hash, case)
            }
            _ => (false, "no observed value".to_string()),
        }
    }

    fn compare_artifact(
        &self,
        artifact: &Path,
        expected: &str,
        case: &VerificationCase,
    ) -> (bool, String) {
        let observed_bytes = match std::fs::read(artifact) {
            Ok(b) => b,
            Err(e) => return (false, format!("artifact unreadable: {e}")),
        };
        let expected_path = resolve_expected(expected, case);
        let expected_bytes = match std::fs::read(&expected_path) {
            Ok(b) => b,
            Err(e) => return (false, format!("expected artifact unreadable: {e}")),
        };

        let score = self.comparator.score(&observed_bytes, &expected_bytes);
        if score >= self.threshold {
            (true, format!("score {score:.3}"))
        } else {
            (false, format!("score {score:.3} below {:.3}", self.threshold))
        }
    }
}

/// TMK expected values are artifact paths; relative ones resolve against
/// the media file's directory, where reference artifacts live alongside
/// their inputs.
fn resolve_expected(expected: &str, case: &VerificationCase) -> std::path::PathBuf {
    let p = std::path::PathBuf::from(expected);
    if p.is_absolute() {
        return p;
    }
    match case.source_path.parent() {
        Some(dir) => dir.join(p),
        None => p,
    }
}

fn compare_digest(observed: &str, expected: &str, max_distance: Option<u32>) -> (bool, String) {
    if observed.eq_ignore_ascii_case(expected) {
        return (true, "exact".to_string());
    }
    if let Some(bound) = max_distance {
        match hamming_distance(observed, expected) {
            Some(distance) if distance <= bound => {
                return (true, format!("near-match (distance {distance})"));
            }
            Some(distance) => {
                return (false, format!("mismatch (distance {distance} > {bound})"));
            }
            None => {}
        }
    }
    (false, "mismatch".to_string())
}

/// Bitwise Hamming distance between two equal-length hex digests.
/// `None` when either side is not hex or the lengths differ.
fn hamming_distance(a: &str, b: &str) -> Option<u32> {
    let a = hex::decode(a).ok()?;
    let b = hex::decode(b).ok()?;
    if a.len() != b.len() {
        return None;
    }
    Some(
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x ^ y).count_ones())
            .sum(),
    )
}
