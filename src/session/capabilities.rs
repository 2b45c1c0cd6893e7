// SPDX-License-Identifier: MIT
//! Engine-specific capability construction.
//!
//! Both engines receive the same treatment — headless flag, and for TMK
//! runs a download setup that saves the hash artifact straight to the
//! configured directory without prompts, popups, or an in-browser viewer
//! intercepting it. Everything engine-specific lives here.

use serde_json::json;
use thirtyfour::common::capabilities::firefox::FirefoxPreferences;
use thirtyfour::{ChromeCapabilities, DesiredCapabilities, FirefoxCapabilities};

use crate::config::{Algorithm, HarnessConfig};

use super::SessionError;

pub(super) fn chrome(config: &HarnessConfig) -> Result<ChromeCapabilities, SessionError> {
    let mut caps = DesiredCapabilities::chrome();
    let fail = |e: thirtyfour::error::WebDriverError| SessionError::Capabilities {
        engine: "chrome",
        detail: e.to_string(),
    };

    if config.headless {
        caps.set_headless().map_err(fail)?;
    }
    caps.add_chrome_arg("--disable-gpu").map_err(fail)?;
    caps.add_chrome_arg("--no-sandbox").map_err(fail)?;
    caps.add_chrome_arg("--disable-dev-shm-usage").map_err(fail)?;

    if config.algorithm == Algorithm::Tmk {
        caps.add_chrome_arg("--disable-popup-blocking").map_err(fail)?;
        if let Some(dir) = &config.download_dir {
            caps.add_chrome_option(
                "prefs",
                json!({
                    "download.default_directory": dir.to_string_lossy(),
                    "download.prompt_for_download": false,
                    "download.directory_upgrade": true,
                    "profile.default_content_settings.popups": 0,
                }),
            )
            .map_err(fail)?;
        }
    }

    Ok(caps)
}

pub(super) fn firefox(config: &HarnessConfig) -> Result<FirefoxCapabilities, SessionError> {
    let mut caps = DesiredCapabilities::firefox();
    let fail = |e: thirtyfour::error::WebDriverError| SessionError::Capabilities {
        engine: "firefox",
        detail: e.to_string(),
    };

    if config.headless {
        caps.set_headless().map_err(fail)?;
    }

    if config.algorithm == Algorithm::Tmk {
        let mut prefs = FirefoxPreferences::new();
        if let Some(dir) = &config.download_dir {
            // folderList 2 = use browser.download.dir instead of Desktop.
            prefs
                .set("browser.download.folderList", json!(2))
                .map_err(fail)?;
            prefs
                .set("browser.download.dir", json!(dir.to_string_lossy()))
                .map_err(fail)?;
            prefs
                .set("browser.download.useDownloadDir", json!(true))
                .map_err(fail)?;
        }
        // The artifact arrives as an opaque binary stream; save it without
        // asking and keep pdf.js or any other viewer out of the way.
        prefs
            .set(
                "browser.helperApps.neverAsk.saveToDisk",
                json!("application/octet-stream,application/x-tmk"),
            )
            .map_err(fail)?;
        prefs.set("pdfjs.disabled", json!(true)).map_err(fail)?;
        prefs
            .set("dom.disable_open_during_load", json!(false))
            .map_err(fail)?;
        caps.set_preferences(prefs).map_err(fail)?;
    }

    Ok(caps)
}
