// SPDX-License-Identifier: MIT
//! Browser session lifecycle.
//!
//! A [`Session`] owns the WebDriver server child process and the
//! connected client. It is created once per run, drives exactly one
//! browser, and must be closed on every exit path — [`Session::close`]
//! is best-effort and never fails, and a leaked session still kills its
//! driver process on drop.
//!
//! The rest of the harness never touches the underlying client: it works
//! against the [`BrowserHost`] capability set (navigate + evaluate), so
//! tests substitute a scripted fake and the Chrome/Firefox split stays
//! inside this module.

mod capabilities;

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thirtyfour::WebDriver;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::{Algorithm, Engine, HarnessConfig};
use crate::wait::{poll_until, PollConfig};

/// How long to wait for a freshly spawned WebDriver server to accept a
/// session before declaring the launch failed.
const CONNECT_DEADLINE: Duration = Duration::from_secs(15);
const CONNECT_INTERVAL: Duration = Duration::from_millis(250);

/// The capability set the harness is written against: navigate to a page
/// and evaluate script in it. Both engines expose exactly this surface.
#[async_trait]
pub trait BrowserHost: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), HostError>;

    /// Evaluate `script` in the page, returning its JSON-converted result.
    /// `arguments[0..n]` in the script bind to `args`.
    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, HostError>;
}

/// A live browser session: WebDriver client plus the server process that
/// backs it. Exclusively owned by its creator; no other component holds
/// the underlying handle.
pub struct Session {
    driver: Option<WebDriver>,
    server: Option<Child>,
    engine: Engine,
    /// Download directory the browser was configured with (TMK runs).
    pub download_dir: Option<PathBuf>,
}

impl Session {
    /// Launch the engine's WebDriver server, connect a client, and apply
    /// engine-specific preferences (headless mode; for TMK additionally
    /// the download directory, auto-accepted downloads, popup blocking
    /// off, and the built-in viewer off).
    ///
    /// # Errors
    ///
    /// [`SessionError`] when the server binary cannot be spawned or the
    /// endpoint never accepts a session. Both are unrecoverable for the
    /// run — no case can proceed without a browser.
    pub async fn open(config: &HarnessConfig) -> Result<Self, SessionError> {
        let binary = config.engine.driver_binary();
        let port = free_port(binary)?;
        let endpoint = format!("http://127.0.0.1:{port}");

        let mut cmd = Command::new(binary);
        cmd.arg(format!("--port={port}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        debug!(binary, port, "spawning webdriver server");
        let server = cmd.spawn().map_err(|e| SessionError::Launch {
            binary: binary.to_string(),
            detail: e.to_string(),
        })?;

        let connect_cfg = PollConfig::new(CONNECT_INTERVAL, CONNECT_DEADLINE);
        let connect = poll_until(&connect_cfg, || {
            let endpoint = endpoint.clone();
            async move {
                match Self::connect(&endpoint, config).await {
                    Ok(driver) => Ok(Some(driver)),
                    // Server still starting up — keep polling.
                    Err(SessionError::Connect(_)) => Ok(None),
                    Err(fatal) => Err(fatal),
                }
            }
        })
        .await;

        let driver = match connect {
            Ok(driver) => driver,
            Err(e) => {
                let mut server = server;
                let _ = server.start_kill();
                return Err(match e {
                    crate::wait::PollError::Timeout(d) => SessionError::Launch {
                        binary: binary.to_string(),
                        detail: format!(
                            "endpoint {endpoint} did not accept a session within {}s",
                            d.as_secs()
                        ),
                    },
                    crate::wait::PollError::Probe(e) => e,
                });
            }
        };

        debug!(engine = config.engine.as_str(), %endpoint, "browser session established");
        Ok(Self {
            driver: Some(driver),
            server: Some(server),
            engine: config.engine,
            download_dir: if config.algorithm == Algorithm::Tmk {
                config.download_dir.clone()
            } else {
                None
            },
        })
    }

    async fn connect(endpoint: &str, config: &HarnessConfig) -> Result<WebDriver, SessionError> {
        match config.engine {
            Engine::Chrome => {
                let caps = capabilities::chrome(config)?;
                WebDriver::new(endpoint, caps)
                    .await
                    .map_err(|e| SessionError::Connect(e.to_string()))
            }
            Engine::Firefox => {
                let caps = capabilities::firefox(config)?;
                WebDriver::new(endpoint, caps)
                    .await
                    .map_err(|e| SessionError::Connect(e.to_string()))
            }
        }
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Quit the browser and terminate the WebDriver server.
    ///
    /// Best-effort on both fronts: failures are logged, never returned,
    /// so teardown can run unconditionally on error paths.
    pub async fn close(mut self) {
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.quit().await {
                warn!(error = %e, "browser quit failed");
            }
        }
        if let Some(mut server) = self.server.take() {
            if let Err(e) = server.kill().await {
                warn!(error = %e, "webdriver server kill failed");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Normal teardown goes through close(). This is the backstop for
        // unwind paths: the session must never orphan a driver process.
        if let Some(server) = self.server.as_mut() {
            let _ = server.start_kill();
        }
    }
}

#[async_trait]
impl BrowserHost for Session {
    async fn goto(&self, url: &str) -> Result<(), HostError> {
        let driver = self.driver.as_ref().ok_or_else(HostError::closed)?;
        driver
            .goto(url)
            .await
            .map_err(|e| HostError::Navigation(e.to_string()))
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, HostError> {
        let driver = self.driver.as_ref().ok_or_else(HostError::closed)?;
        let ret = driver
            .execute(script, args)
            .await
            .map_err(|e| HostError::Script(e.to_string()))?;
        Ok(ret.json().clone())
    }
}

/// Failure at the page boundary after the session is up. Recoverable at
/// case granularity — the affected case fails, the run continues.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script evaluation failed: {0}")]
    Script(String),
}

impl HostError {
    fn closed() -> Self {
        Self::Script("session already closed".to_string())
    }
}

/// Unrecoverable session establishment failure — the run aborts.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not launch {binary}: {detail}")]
    Launch { binary: String, detail: String },

    #[error("webdriver endpoint refused connection: {0}")]
    Connect(String),

    #[error("could not build {engine} capabilities: {detail}")]
    Capabilities { engine: &'static str, detail: String },
}

fn free_port(binary: &str) -> Result<u16, SessionError> {
    let listener =
        std::net::TcpListener::bind(("127.0.0.1", 0)).map_err(|e| SessionError::Launch {
            binary: binary.to_string(),
            detail: format!("no free local port: {e}"),
        })?;
    let port = listener
        .local_addr()
        .map_err(|e| SessionError::Launch {
            binary: binary.to_string(),
            detail: format!("no free local port: {e}"),
        })?
        .port();
    drop(listener);
    Ok(port)
}
