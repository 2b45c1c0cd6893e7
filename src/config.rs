//! Harness run configuration.
//!
//! Built from CLI arguments in `main.rs`, validated once before any
//! browser session is opened. Validation failures are fatal and map to
//! exit code 2.

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

const DEFAULT_SITE_URL: &str = "http://localhost:8080/";
const DEFAULT_COMPUTE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;
const DEFAULT_POLL_INTERVAL_MS: u64 = 300;

/// Browser engine driven by the harness.
///
/// Parsing is strict: an unrecognized engine name is a [`ConfigError`],
/// never a silent fallback to one of the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Chrome,
    Firefox,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
        }
    }

    /// WebDriver server binary for this engine.
    pub fn driver_binary(&self) -> &'static str {
        match self {
            Self::Chrome => "chromedriver",
            Self::Firefox => "geckodriver",
        }
    }
}

/// Hashing algorithm family under verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Image hashing — the page returns a scalar digest.
    #[value(name = "pdqmd5")]
    PdqMd5,
    /// Video hashing — the engine writes an artifact that the page
    /// downloads into the configured directory.
    Tmk,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PdqMd5 => "pdqmd5",
            Self::Tmk => "tmk",
        }
    }
}

/// A validated harness run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub engine: Engine,
    pub algorithm: Algorithm,

    /// Path to the CSV manifest of verification cases.
    pub manifest_path: PathBuf,

    /// Browser download directory. Required for TMK (the artifact is
    /// retrieved as a browser download); ignored for PDQ/MD5.
    pub download_dir: Option<PathBuf>,

    /// URL of the page hosting the WASM hashing module.
    #[serde(default = "default_site_url")]
    pub site_url: String,

    /// Run the browser without a visible window. Defaults to true.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Baseline bound on waiting for the in-page computation, in seconds.
    /// The effective per-case bound scales with file size but never drops
    /// below this floor.
    #[serde(default = "default_compute_timeout_secs")]
    pub compute_timeout_secs: u64,

    /// Bound on waiting for the downloaded TMK artifact to stabilize.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Interval between readiness/download re-checks, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_site_url() -> String {
    DEFAULT_SITE_URL.to_string()
}

fn default_headless() -> bool {
    true
}

fn default_compute_timeout_secs() -> u64 {
    DEFAULT_COMPUTE_TIMEOUT_SECS
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl HarnessConfig {
    pub fn new(engine: Engine, algorithm: Algorithm, manifest_path: PathBuf) -> Self {
        Self {
            engine,
            algorithm,
            manifest_path,
            download_dir: None,
            site_url: default_site_url(),
            headless: true,
            compute_timeout_secs: DEFAULT_COMPUTE_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    /// Check cross-field requirements before any session is opened.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the manifest file is missing, or
    /// when algorithm = tmk and the download directory is absent or not
    /// an existing directory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.manifest_path.is_file() {
            return Err(ConfigError::ManifestNotFound(self.manifest_path.clone()));
        }

        if self.algorithm == Algorithm::Tmk {
            match &self.download_dir {
                None => return Err(ConfigError::DownloadDirRequired),
                Some(dir) if !dir.is_dir() => {
                    return Err(ConfigError::DownloadDirMissing(dir.clone()));
                }
                Some(_) => {}
            }
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Compute-wait bound for a file of `len` bytes.
    ///
    /// One extra second per megabyte on top of the configured floor; the
    /// floor is never undercut so small files keep the full baseline.
    pub fn compute_timeout_for(&self, len: u64) -> Duration {
        let per_size_secs = len / (1024 * 1024);
        Duration::from_secs(self.compute_timeout_secs.max(per_size_secs))
    }
}

/// Fatal configuration problems, reported before any session exists.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("manifest file not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("algorithm tmk requires a download directory argument")]
    DownloadDirRequired,

    #[error("download directory does not exist: {0}")]
    DownloadDirMissing(PathBuf),

    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn manifest_fixture(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("manifest.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "id,path,expected").unwrap();
        path
    }

    #[test]
    fn pdqmd5_needs_no_download_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = HarnessConfig::new(
            Engine::Chrome,
            Algorithm::PdqMd5,
            manifest_fixture(tmp.path()),
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tmk_requires_download_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = HarnessConfig::new(
            Engine::Firefox,
            Algorithm::Tmk,
            manifest_fixture(tmp.path()),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DownloadDirRequired)
        ));
    }

    #[test]
    fn tmk_download_dir_must_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = HarnessConfig::new(
            Engine::Firefox,
            Algorithm::Tmk,
            manifest_fixture(tmp.path()),
        );
        config.download_dir = Some(tmp.path().join("nope"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DownloadDirMissing(_))
        ));

        config.download_dir = Some(tmp.path().to_path_buf());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_manifest_is_fatal() {
        let config = HarnessConfig::new(
            Engine::Chrome,
            Algorithm::PdqMd5,
            PathBuf::from("/does/not/exist.csv"),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ManifestNotFound(_))
        ));
    }

    #[test]
    fn compute_timeout_scales_with_size_above_floor() {
        let tmp = tempfile::tempdir().unwrap();
        let config = HarnessConfig::new(
            Engine::Chrome,
            Algorithm::PdqMd5,
            manifest_fixture(tmp.path()),
        );
        // Small file: floor applies.
        assert_eq!(config.compute_timeout_for(1024), Duration::from_secs(30));
        // 100 MB: scaled bound wins.
        assert_eq!(
            config.compute_timeout_for(100 * 1024 * 1024),
            Duration::from_secs(100)
        );
    }
}
