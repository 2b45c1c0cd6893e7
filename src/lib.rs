pub mod bridge;
pub mod config;
pub mod controller;
pub mod invoke;
pub mod manifest;
pub mod reconcile;
pub mod session;
pub mod wait;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{Algorithm, ConfigError, Engine, HarnessConfig};
pub use controller::HarnessController;
pub use manifest::{Manifest, VerificationCase};
pub use reconcile::{ReportEntry, VerificationReport};
