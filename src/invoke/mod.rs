// SPDX-License-Identifier: MIT
//! Hash Invocation Adapter.
//!
//! Drives the in-page hashing pipeline for a bridged file and turns the
//! outcome into exactly one [`HashResult`] — failures included. Two
//! protocols sit behind one entry point:
//!
//! * **PDQ/MD5**: kick off the page-side computation, poll the readiness
//!   state it publishes, read the scalar digest from it.
//! * **TMK**: wait for the decode/transcode stage, call the module entry
//!   point and require return code `1`, then poll the browser download
//!   directory until the artifact file's size is unchanged across two
//!   consecutive polls. A file that is still growing at the deadline is
//!   a timeout, never a result.
//!
//! Both paths unlink their VFS files (input, intermediate, artifact)
//! before returning, on success and on failure, so a long manifest does
//! not accumulate page memory.

pub mod model;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::bridge::{self, BridgedFile};
use crate::config::Algorithm;
use crate::session::{BrowserHost, HostError};
use crate::wait::{poll_until, PollConfig, PollError};

pub use model::{HashResult, InvokePolicy, InvokeStatus, Observed};

pub(crate) const JS_IMAGE_ENGINE_READY: &str =
    "return typeof window.startImageHash === 'function';";

pub(crate) const JS_TMK_ENGINE_READY: &str = "return typeof window.startVideoTranscode === 'function' && typeof window.runTmkHash === 'function';";

pub(crate) const JS_START_IMAGE_HASH: &str =
    "window.__imageHashState = null; window.startImageHash(arguments[0]); return true;";

/// Null until the page finishes; then `{ok: bool, digest?, error?}`.
pub(crate) const JS_POLL_IMAGE_HASH: &str = "return window.__imageHashState;";

pub(crate) const JS_START_TRANSCODE: &str =
    "window.__transcodeState = null; window.startVideoTranscode(arguments[0]); return true;";

/// Null until decode/resample completes; then `{ok: bool, rawFile?, error?}`.
pub(crate) const JS_POLL_TRANSCODE: &str = "return window.__transcodeState;";

/// Synchronous module call. Returns the module's status code; `1` means
/// the artifact was written and the page has triggered its download.
pub(crate) const JS_RUN_TMK: &str = "return window.runTmkHash(arguments[0]);";

/// One invocation attempt's internal failure, before it is folded into
/// the result status.
enum PathFailure {
    Timeout,
    Engine(String),
}

impl From<PollError<HostError>> for PathFailure {
    fn from(e: PollError<HostError>) -> Self {
        match e {
            PollError::Timeout(_) => Self::Timeout,
            PollError::Probe(e) => Self::Engine(e.to_string()),
        }
    }
}

impl From<HostError> for PathFailure {
    fn from(e: HostError) -> Self {
        Self::Engine(e.to_string())
    }
}

/// Adapter over a [`BrowserHost`], parameterized by wait policy.
pub struct Invoker<'a> {
    host: &'a dyn BrowserHost,
    policy: InvokePolicy,
}

impl<'a> Invoker<'a> {
    pub fn new(host: &'a dyn BrowserHost, policy: InvokePolicy) -> Self {
        Self { host, policy }
    }

    /// Wait for the page to expose the hashing entry points after
    /// navigation. The module loads asynchronously, so the functions can
    /// lag the page itself.
    pub async fn wait_for_engine(&self, algorithm: Algorithm) -> Result<(), PollError<HostError>> {
        let script = match algorithm {
            Algorithm::PdqMd5 => JS_IMAGE_ENGINE_READY,
            Algorithm::Tmk => JS_TMK_ENGINE_READY,
        };
        let cfg = self.compute_poll_config();
        let host = self.host;
        poll_until(&cfg, || async move {
            let ready = host.execute(script, vec![]).await?;
            Ok(if ready.as_bool().unwrap_or(false) {
                Some(())
            } else {
                None
            })
        })
        .await
    }

    /// Run the full pipeline for one bridged file. Never fails: every
    /// outcome, including timeout and engine failure, is encoded in the
    /// returned result's status. The bridged input (and any intermediate
    /// or artifact VFS files) are removed before returning.
    pub async fn invoke(
        &self,
        media_id: &str,
        file: &BridgedFile,
        algorithm: Algorithm,
        download_dir: Option<&Path>,
    ) -> HashResult {
        let started = Instant::now();
        let (status, observed, detail) = match algorithm {
            Algorithm::PdqMd5 => self.invoke_pdq_md5(file).await,
            Algorithm::Tmk => self.invoke_tmk(file, download_dir).await,
        };

        let compute_duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            media_id,
            algorithm = algorithm.as_str(),
            status = status.as_str(),
            compute_duration_ms,
            "invocation finished"
        );

        HashResult {
            media_id: media_id.to_string(),
            algorithm,
            observed,
            compute_duration_ms,
            status,
            detail,
        }
    }

    async fn invoke_pdq_md5(&self, file: &BridgedFile) -> (InvokeStatus, Observed, Option<String>) {
        let outcome = self.run_pdq_md5(file).await;
        self.cleanup(&[file.name.as_str()]).await;
        match outcome {
            Ok(digest) => (InvokeStatus::Ok, Observed::Digest(digest), None),
            Err(PathFailure::Timeout) => (InvokeStatus::Timeout, Observed::None, None),
            Err(PathFailure::Engine(detail)) => {
                (InvokeStatus::EngineError, Observed::None, Some(detail))
            }
        }
    }

    async fn run_pdq_md5(&self, file: &BridgedFile) -> Result<String, PathFailure> {
        self.host
            .execute(JS_START_IMAGE_HASH, vec![json!(file.name)])
            .await?;

        let cfg = self.compute_poll_config();
        let host = self.host;
        let state = poll_until(&cfg, || async move {
            let state = host.execute(JS_POLL_IMAGE_HASH, vec![]).await?;
            Ok(if state.is_null() { None } else { Some(state) })
        })
        .await?;

        read_page_outcome(&state, "digest")
    }

    async fn invoke_tmk(
        &self,
        file: &BridgedFile,
        download_dir: Option<&Path>,
    ) -> (InvokeStatus, Observed, Option<String>) {
        let artifact_name = swap_extension(&file.name, "tmk");
        let mut vfs_garbage: Vec<String> = vec![file.name.clone(), artifact_name.clone()];

        let outcome = self
            .run_tmk(file, &artifact_name, download_dir, &mut vfs_garbage)
            .await;

        let names: Vec<&str> = vfs_garbage.iter().map(String::as_str).collect();
        self.cleanup(&names).await;

        match outcome {
            Ok(path) => (InvokeStatus::Ok, Observed::Artifact(path), None),
            Err(PathFailure::Timeout) => (InvokeStatus::Timeout, Observed::None, None),
            Err(PathFailure::Engine(detail)) => {
                (InvokeStatus::EngineError, Observed::None, Some(detail))
            }
        }
    }

    async fn run_tmk(
        &self,
        file: &BridgedFile,
        artifact_name: &str,
        download_dir: Option<&Path>,
        vfs_garbage: &mut Vec<String>,
    ) -> Result<PathBuf, PathFailure> {
        let download_dir = download_dir
            .ok_or_else(|| PathFailure::Engine("no download directory configured".to_string()))?;

        // Stage 1: decode + resample down to the module's fixed raw format.
        self.host
            .execute(JS_START_TRANSCODE, vec![json!(file.name)])
            .await?;

        let cfg = self.compute_poll_config();
        let host = self.host;
        let state = poll_until(&cfg, || async move {
            let state = host.execute(JS_POLL_TRANSCODE, vec![]).await?;
            Ok(if state.is_null() { None } else { Some(state) })
        })
        .await?;
        let raw_file = read_page_outcome(&state, "rawFile")?;
        vfs_garbage.push(raw_file.clone());

        // Stage 2: the module itself. Anything but 1 is an engine failure
        // and there is no artifact to wait for.
        let code = self.host.execute(JS_RUN_TMK, vec![json!(raw_file)]).await?;
        let code = code.as_i64().unwrap_or(-1);
        if code != 1 {
            return Err(PathFailure::Engine(format!(
                "hashing module returned code {code}"
            )));
        }

        // Stage 3: the page has triggered the download; wait for the
        // artifact to land and settle.
        self.wait_for_stable_download(&download_dir.join(artifact_name))
            .await
    }

    /// Poll for the downloaded artifact until its size is unchanged
    /// across two consecutive polls. Size stability is a heuristic — a
    /// writer pausing for a full poll interval would fool it — so the
    /// interval is configurable and the check never accepts an empty
    /// file.
    async fn wait_for_stable_download(&self, path: &Path) -> Result<PathBuf, PathFailure> {
        let cfg = PollConfig::new(self.policy.poll_interval, self.policy.download_timeout);
        let last_size: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));

        let path_buf = path.to_path_buf();
        let found = poll_until(&cfg, || {
            let last_size = Arc::clone(&last_size);
            let path = path_buf.clone();
            async move {
                let size = match tokio::fs::metadata(&path).await {
                    Ok(meta) => meta.len(),
                    Err(_) => return Ok::<_, HostError>(None),
                };
                let mut last = last_size.lock().unwrap_or_else(|e| e.into_inner());
                let stable = size > 0 && *last == Some(size);
                *last = Some(size);
                Ok(if stable { Some(path) } else { None })
            }
        })
        .await;

        found.map_err(PathFailure::from)
    }

    /// Unlink VFS leftovers. Unlink is idempotent, and cleanup failures
    /// only get a warning — the case outcome is already decided.
    async fn cleanup(&self, names: &[&str]) {
        for name in names {
            if let Err(e) = bridge::remove_named(self.host, name).await {
                warn!(name, error = %e, "vfs cleanup failed");
            }
        }
    }

    fn compute_poll_config(&self) -> PollConfig {
        PollConfig::new(self.policy.poll_interval, self.policy.compute_timeout)
    }
}

/// Pull `field` out of a page state object of the form
/// `{ok: bool, <field>: string, error?: string}`.
fn read_page_outcome(state: &Value, field: &str) -> Result<String, PathFailure> {
    let ok = state.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if !ok {
        let error = state
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("page reported failure without detail");
        return Err(PathFailure::Engine(error.to_string()));
    }
    state
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| PathFailure::Engine(format!("page state is missing '{field}'")))
}

/// `clip.mp4` → `clip.tmk`; extensionless names just gain the suffix.
fn swap_extension(name: &str, ext: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) => format!("{stem}.{ext}"),
        None => format!("{name}.{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedHost;

    fn bridged(name: &str) -> BridgedFile {
        BridgedFile {
            name: name.to_string(),
            len: 1024,
        }
    }

    #[test]
    fn extension_swap() {
        assert_eq!(swap_extension("dog.mp4", "tmk"), "dog.tmk");
        assert_eq!(swap_extension("a.b.c.webm", "tmk"), "a.b.c.tmk");
        assert_eq!(swap_extension("noext", "tmk"), "noext.tmk");
    }

    #[tokio::test]
    async fn pdq_md5_returns_digest_and_cleans_up() {
        let host = ScriptedHost::new();
        host.seed_vfs("cat.jpg", b"jpeg-bytes");
        host.push_image_state(serde_json::json!({"ok": true, "digest": "a1b2c3"}));

        let invoker = Invoker::new(&host, InvokePolicy::instant());
        let result = invoker
            .invoke("cat.jpg", &bridged("cat.jpg"), Algorithm::PdqMd5, None)
            .await;

        assert_eq!(result.status, InvokeStatus::Ok);
        assert_eq!(result.observed, Observed::Digest("a1b2c3".to_string()));
        assert!(!host.vfs_contains("cat.jpg"));
    }

    #[tokio::test]
    async fn pdq_md5_times_out_without_completion_signal() {
        let host = ScriptedHost::new();
        // No image state ever published: polls see null until deadline.
        let invoker = Invoker::new(&host, InvokePolicy::instant());
        let result = invoker
            .invoke("cat.jpg", &bridged("cat.jpg"), Algorithm::PdqMd5, None)
            .await;

        assert_eq!(result.status, InvokeStatus::Timeout);
        assert_eq!(result.observed, Observed::None);
    }

    #[tokio::test]
    async fn pdq_md5_page_failure_is_engine_error() {
        let host = ScriptedHost::new();
        host.push_image_state(serde_json::json!({"ok": false, "error": "decode failed"}));

        let invoker = Invoker::new(&host, InvokePolicy::instant());
        let result = invoker
            .invoke("cat.jpg", &bridged("cat.jpg"), Algorithm::PdqMd5, None)
            .await;

        assert_eq!(result.status, InvokeStatus::EngineError);
        assert_eq!(result.detail.as_deref(), Some("decode failed"));
    }

    #[tokio::test]
    async fn tmk_engine_failure_skips_download_polling() {
        let tmp = tempfile::tempdir().unwrap();
        let host = ScriptedHost::new();
        host.push_transcode_state(serde_json::json!({"ok": true, "rawFile": "dog.rvf"}));
        host.set_tmk_code(0);

        let invoker = Invoker::new(&host, InvokePolicy::instant());
        let started = std::time::Instant::now();
        let result = invoker
            .invoke(
                "dog.mp4",
                &bridged("dog.mp4"),
                Algorithm::Tmk,
                Some(tmp.path()),
            )
            .await;

        assert_eq!(result.status, InvokeStatus::EngineError);
        assert!(result.detail.unwrap().contains("code 0"));
        // No download wait happened: well under the download deadline
        // plus compute budget.
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn tmk_success_yields_stable_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("dog.tmk"), b"artifact-bytes").unwrap();

        let host = ScriptedHost::new();
        host.seed_vfs("dog.mp4", b"video");
        host.push_transcode_state(serde_json::json!({"ok": true, "rawFile": "dog.rvf"}));
        host.set_tmk_code(1);

        let invoker = Invoker::new(&host, InvokePolicy::instant());
        let result = invoker
            .invoke(
                "dog.mp4",
                &bridged("dog.mp4"),
                Algorithm::Tmk,
                Some(tmp.path()),
            )
            .await;

        assert_eq!(result.status, InvokeStatus::Ok);
        assert_eq!(
            result.observed,
            Observed::Artifact(tmp.path().join("dog.tmk"))
        );
        assert!(!host.vfs_contains("dog.mp4"));
    }

    #[tokio::test]
    async fn tmk_missing_artifact_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let host = ScriptedHost::new();
        host.push_transcode_state(serde_json::json!({"ok": true, "rawFile": "dog.rvf"}));
        host.set_tmk_code(1);

        let invoker = Invoker::new(&host, InvokePolicy::instant());
        let result = invoker
            .invoke(
                "dog.mp4",
                &bridged("dog.mp4"),
                Algorithm::Tmk,
                Some(tmp.path()),
            )
            .await;

        assert_eq!(result.status, InvokeStatus::Timeout);
    }

    #[tokio::test]
    async fn tmk_transcode_failure_is_engine_error() {
        let tmp = tempfile::tempdir().unwrap();
        let host = ScriptedHost::new();
        host.push_transcode_state(serde_json::json!({"ok": false, "error": "unsupported codec"}));

        let invoker = Invoker::new(&host, InvokePolicy::instant());
        let result = invoker
            .invoke(
                "dog.mp4",
                &bridged("dog.mp4"),
                Algorithm::Tmk,
                Some(tmp.path()),
            )
            .await;

        assert_eq!(result.status, InvokeStatus::EngineError);
        assert_eq!(result.detail.as_deref(), Some("unsupported codec"));
    }

    #[tokio::test]
    async fn engine_ready_wait_succeeds_when_page_exposes_entry_points() {
        let host = ScriptedHost::new();
        let invoker = Invoker::new(&host, InvokePolicy::instant());
        invoker.wait_for_engine(Algorithm::PdqMd5).await.unwrap();
        invoker.wait_for_engine(Algorithm::Tmk).await.unwrap();
    }

    #[tokio::test]
    async fn engine_ready_wait_times_out_on_bare_page() {
        let host = ScriptedHost::new();
        host.set_engine_ready(false);
        let invoker = Invoker::new(&host, InvokePolicy::instant());
        let err = invoker.wait_for_engine(Algorithm::PdqMd5).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
