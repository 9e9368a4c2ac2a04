//! Configuration types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for one supervised detector channel.
///
/// Supplied by an external loader (TOML file or CLI flags); the supervisor
/// itself never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Path to the external detector binary.
    pub binary: PathBuf,
    /// Pipe the detector writes records to; opened read-only non-blocking.
    pub inbound_pipe: PathBuf,
    /// Pipe the detector reads commands from; opened for writing.
    pub outbound_pipe: PathBuf,
    /// Scale applied to calibration tolerances before they are echoed back.
    #[serde(default = "default_tolerance_factor")]
    pub tolerance_factor: f64,
    /// Whitespace-separated arguments passed to the detector binary.
    #[serde(default)]
    pub params: String,
}

fn default_tolerance_factor() -> f64 {
    1.0
}
