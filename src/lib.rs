//! Supervisor for an external camera line-detection process.
//!
//! The detector runs as a separate binary and is driven through a pair of
//! named pipes: commands go out on one, detection records and calibration
//! updates come back on the other. The supervisor owns the process lifecycle,
//! both pipe ends and a readiness state machine that silently self-heals when
//! the detector dies or its pipes disappear.

pub mod config;
pub mod pipes;
pub mod process;
pub mod protocol;
pub mod supervisor;
