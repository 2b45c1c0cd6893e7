// SPDX-License-Identifier: MIT
//! Invocation result and policy types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{Algorithm, HarnessConfig};

/// Terminal status of one hashing invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvokeStatus {
    Ok,
    /// No completion signal (or no stable artifact) within the bound.
    Timeout,
    /// The hashing module reported failure, or the page-side pipeline
    /// broke underneath us.
    EngineError,
}

impl InvokeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Timeout => "TIMEOUT",
            Self::EngineError => "ENGINE_ERROR",
        }
    }
}

/// What the invocation produced: a scalar digest (PDQ/MD5), a downloaded
/// artifact file (TMK), or nothing on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Observed {
    Digest(String),
    Artifact(PathBuf),
    None,
}

impl Observed {
    /// Short human-readable form for the report table.
    pub fn display(&self) -> String {
        match self {
            Self::Digest(d) => d.clone(),
            Self::Artifact(p) => p.display().to_string(),
            Self::None => "-".to_string(),
        }
    }
}

/// Produced exactly once per case by the invocation adapter, consumed
/// exactly once by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashResult {
    pub media_id: String,
    pub algorithm: Algorithm,
    pub observed: Observed,
    pub compute_duration_ms: u64,
    pub status: InvokeStatus,
    /// Failure detail for the report, when the page supplied one.
    pub detail: Option<String>,
}

/// Bounds and cadence for one invocation's waits. Fully injectable so
/// tests can run with millisecond budgets.
#[derive(Debug, Clone)]
pub struct InvokePolicy {
    /// Bound on the in-page computation (and, for TMK, the transcode).
    pub compute_timeout: Duration,
    /// Bound on the downloaded artifact appearing and stabilizing.
    pub download_timeout: Duration,
    /// Re-check interval for both waits.
    pub poll_interval: Duration,
}

impl InvokePolicy {
    /// Derive the per-case policy from the run config and the media file
    /// size (larger files get a longer compute bound, never below the
    /// configured floor).
    pub fn for_case(config: &HarnessConfig, file_len: u64) -> Self {
        Self {
            compute_timeout: config.compute_timeout_for(file_len),
            download_timeout: config.download_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            compute_timeout: Duration::from_millis(50),
            download_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
        }
    }
}
