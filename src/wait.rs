// SPDX-License-Identifier: MIT
//! Deadline-bounded polling for browser-side completion signals.
//!
//! Provides [`poll_until`] — a generic async helper that re-runs a probe
//! at a fixed interval until it yields a value, fails, or the deadline
//! passes. Used for page readiness checks, download stability checks,
//! and WebDriver endpoint availability.
//!
//! # Example
//! ```rust,ignore
//! use wasmhash_harness::wait::{poll_until, PollConfig};
//!
//! let digest = poll_until(&PollConfig::default(), || async {
//!     read_page_state().await // Ok(Some(v)) done, Ok(None) keep waiting
//! })
//! .await?;
//! ```

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::trace;

/// Configuration for [`poll_until`].
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between probe attempts.
    ///
    /// Default: 300 ms
    pub interval: Duration,
    /// Total time budget, measured from the first probe.
    ///
    /// Default: 30 s
    pub deadline: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(300),
            deadline: Duration::from_secs(30),
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    /// Config suitable for quick unit tests (no real waiting).
    pub fn instant() -> Self {
        Self {
            interval: Duration::from_millis(1),
            deadline: Duration::from_millis(50),
        }
    }
}

/// Outcome of a bounded poll: the probe failed, or time ran out.
#[derive(Debug, thiserror::Error)]
pub enum PollError<E: std::fmt::Display> {
    #[error("no completion signal within {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{0}")]
    Probe(E),
}

impl<E: std::fmt::Display> PollError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Re-run `probe` until it produces a value or the deadline passes.
///
/// The probe returns `Ok(Some(value))` when the awaited condition holds,
/// `Ok(None)` to keep waiting, or `Err(e)` to abort the poll. The probe
/// always runs at least once; after the deadline it is not invoked again.
///
/// # Errors
///
/// [`PollError::Timeout`] when the deadline passes without a value,
/// [`PollError::Probe`] when the probe itself fails.
pub async fn poll_until<F, Fut, T, E>(
    config: &PollConfig,
    mut probe: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if let Some(value) = probe().await.map_err(PollError::Probe)? {
            trace!(attempt, elapsed_ms = started.elapsed().as_millis() as u64, "poll satisfied");
            return Ok(value);
        }
        if started.elapsed() >= config.deadline {
            return Err(PollError::Timeout(config.deadline));
        }
        sleep(config.interval).await;
    }
}
