//! Run orchestration.
//!
//! Sequences every verification case against one live session: bridge
//! the file in, invoke the pipeline, reconcile the result. Cases run
//! strictly one at a time — the page VFS and hashing state are global to
//! the session, so no two cases may be in flight at once.
//!
//! Per-case failures mark that case failed and the run continues; only a
//! dead page (the hashing module never appears after navigation) aborts
//! the run. Cancellation aborts the in-flight case, records it, and the
//! report still covers everything that completed.

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bridge;
use crate::config::HarnessConfig;
use crate::invoke::{HashResult, InvokePolicy, Invoker};
use crate::manifest::{Manifest, VerificationCase};
use crate::reconcile::{Reconciler, ReportEntry, VerificationReport};
use crate::session::BrowserHost;

/// Per-case progression. Terminal states are `Passed` and `Failed`;
/// everything else is transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseState {
    Pending,
    Bridging,
    Invoking,
    Reconciling,
    Passed,
    Failed,
}

impl CaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Bridging => "BRIDGING",
            Self::Invoking => "INVOKING",
            Self::Reconciling => "RECONCILING",
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
        }
    }
}

/// Run-fatal controller failure. Everything else becomes a report entry.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("hashing page unavailable at {url}: {detail}")]
    PageUnavailable { url: String, detail: String },
}

/// What one case produced before reconciliation.
enum CaseOutcome {
    BridgeFailed(String),
    Hashed(HashResult),
}

pub struct HarnessController<'a> {
    host: &'a dyn BrowserHost,
    config: &'a HarnessConfig,
    cancel: watch::Receiver<bool>,
}

impl<'a> HarnessController<'a> {
    pub fn new(
        host: &'a dyn BrowserHost,
        config: &'a HarnessConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            host,
            config,
            cancel,
        }
    }

    /// Run every case in the manifest and return the accumulated report.
    ///
    /// # Errors
    ///
    /// [`ControllerError::PageUnavailable`] when navigation fails or the
    /// page never exposes the hashing entry points — nothing can run, so
    /// no report is produced.
    pub async fn run(&self, manifest: &Manifest) -> Result<VerificationReport, ControllerError> {
        self.host
            .goto(&self.config.site_url)
            .await
            .map_err(|e| ControllerError::PageUnavailable {
                url: self.config.site_url.clone(),
                detail: e.to_string(),
            })?;

        // The module loads asynchronously after the page itself.
        let baseline = Invoker::new(self.host, InvokePolicy::for_case(self.config, 0));
        baseline
            .wait_for_engine(self.config.algorithm)
            .await
            .map_err(|e| ControllerError::PageUnavailable {
                url: self.config.site_url.clone(),
                detail: e.to_string(),
            })?;

        info!(
            cases = manifest.len(),
            engine = self.config.engine.as_str(),
            algorithm = self.config.algorithm.as_str(),
            "starting verification run"
        );

        let mut reconciler = Reconciler::new(self.config.engine, self.config.algorithm);
        for case in manifest.cases() {
            if *self.cancel.borrow() {
                info!("run cancelled — remaining cases not started");
                break;
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                () = cancelled(self.cancel.clone()) => None,
                outcome = self.run_case(case) => Some(outcome),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            debug!(media_id = %case.media_id, state = CaseState::Reconciling.as_str(), "case transition");
            let entry = match outcome {
                None => {
                    warn!(media_id = %case.media_id, "cancelled mid-case");
                    reconciler.record_failure(case, "CANCELED", duration_ms)
                }
                Some(CaseOutcome::BridgeFailed(detail)) => {
                    reconciler.record_failure(case, format!("BRIDGE_ERROR: {detail}"), duration_ms)
                }
                Some(CaseOutcome::Hashed(result)) => reconciler.reconcile(case, &result),
            };
            log_outcome(&entry);

            if *self.cancel.borrow() {
                break;
            }
        }

        Ok(reconciler.finish(manifest.skipped_rows()))
    }

    async fn run_case(&self, case: &VerificationCase) -> CaseOutcome {
        debug!(media_id = %case.media_id, state = CaseState::Bridging.as_str(), "case transition");
        let bridged = match bridge::push(self.host, &case.source_path).await {
            Ok(b) => b,
            Err(e) => return CaseOutcome::BridgeFailed(e.to_string()),
        };

        debug!(media_id = %case.media_id, state = CaseState::Invoking.as_str(), "case transition");
        let policy = InvokePolicy::for_case(self.config, bridged.len);
        let invoker = Invoker::new(self.host, policy);
        let result = invoker
            .invoke(
                &case.media_id,
                &bridged,
                case.algorithm,
                self.config.download_dir.as_deref(),
            )
            .await;
        CaseOutcome::Hashed(result)
    }
}

fn log_outcome(entry: &ReportEntry) {
    let state = if entry.matched {
        CaseState::Passed
    } else {
        CaseState::Failed
    };
    info!(
        media_id = %entry.media_id,
        state = state.as_str(),
        reason = %entry.reason,
        duration_ms = entry.duration_ms,
        "case finished"
    );
}

/// Resolves only when cancellation has actually been signalled. A closed
/// channel means no one can cancel any more, not that we were cancelled.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
