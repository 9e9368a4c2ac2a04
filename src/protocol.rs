//! Wire protocol spoken by the external detector.
//!
//! The detector writes newline-terminated, space-separated records on the
//! inbound pipe and accepts commands of the same shape on the outbound pipe.
//! Its console output carries two sentinel lines that double as out-of-band
//! readiness and termination signals.

/// Console line announcing that the detector reached its serving loop.
pub const SERVING_LOOP_SENTINEL: &str = "Entering video thread loop";

/// Console line announcing that the detector is about to exit.
pub const TERMINATING_SENTINEL: &str = "Terminating";

/// Meaning of a single line of detector console output.
///
/// The detector has no structured handshake; these sentinels are the only
/// reliable readiness and crash indicators for the text path. Keeping the
/// classification here means the state machine never string-matches console
/// output itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// The detector entered its serving loop and its pipe ends are open.
    ServingLoop,
    /// The detector is shutting down.
    Terminating,
    /// Free-form diagnostic output with no protocol meaning.
    Diagnostic,
}

impl ProcessSignal {
    /// Classify one console line.
    #[must_use]
    pub fn classify(line: &str) -> Self {
        match line.trim_end() {
            SERVING_LOOP_SENTINEL => Self::ServingLoop,
            TERMINATING_SENTINEL => Self::Terminating,
            _ => Self::Diagnostic,
        }
    }
}

/// Error type for record parsing.
#[derive(thiserror::Error, Debug)]
pub enum RecordError {
    /// A known tag arrived with fewer fields than its record requires.
    #[error("truncated `{tag}` record: {line:?}")]
    Truncated { tag: &'static str, line: String },
    /// A field that should be an integer was not.
    #[error("non-numeric field {field:?} in record {line:?}")]
    InvalidField { field: String, line: String },
}

/// One parsed record from the inbound pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorRecord {
    /// A detected line position.
    Location(Location),
    /// The detector's current color calibration window.
    Calibration(CalibrationWindow),
}

/// Detected line position in the camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Horizontal offset of the line.
    pub x: i32,
    /// Line angle. Reported by the detector but unused downstream.
    pub angle: i32,
    /// Blob mass. Reported by the detector but unused downstream.
    pub mass: i32,
}

/// HSV calibration window reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationWindow {
    pub hue: i32,
    pub hue_tolerance: i32,
    pub saturation: i32,
    pub saturation_tolerance: i32,
    pub value: i32,
    pub value_tolerance: i32,
}

impl CalibrationWindow {
    /// Format the write-back command, scaling the tolerances by `factor`.
    #[must_use]
    pub fn to_command(&self, factor: f64) -> String {
        format!(
            "hsv {} {} {} {} {} {}",
            self.hue,
            scale(self.hue_tolerance, factor),
            self.saturation,
            scale(self.saturation_tolerance, factor),
            self.value,
            scale(self.value_tolerance, factor),
        )
    }
}

/// Scaled tolerances are echoed as whole numbers, rounded to nearest.
#[allow(clippy::cast_possible_truncation)]
fn scale(tolerance: i32, factor: f64) -> i64 {
    (f64::from(tolerance) * factor).round() as i64
}

/// Parse one inbound record.
///
/// Unknown tags yield `Ok(None)` and are skipped by the caller. The tag's
/// trailing colon is optional.
///
/// # Errors
///
/// A record with a known tag but missing or non-numeric fields is a
/// [`RecordError`]; the caller drops and logs it, it never propagates.
pub fn parse_record(line: &str) -> Result<Option<DetectorRecord>, RecordError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let Some(tag) = fields.first() else {
        return Ok(None);
    };

    match tag.trim_end_matches(':') {
        "loc" => {
            if fields.len() < 4 {
                return Err(RecordError::Truncated {
                    tag: "loc",
                    line: line.to_string(),
                });
            }
            Ok(Some(DetectorRecord::Location(Location {
                x: int_field(line, fields[1])?,
                angle: int_field(line, fields[2])?,
                mass: int_field(line, fields[3])?,
            })))
        }
        "hsv" => {
            if fields.len() < 7 {
                return Err(RecordError::Truncated {
                    tag: "hsv",
                    line: line.to_string(),
                });
            }
            Ok(Some(DetectorRecord::Calibration(CalibrationWindow {
                hue: int_field(line, fields[1])?,
                hue_tolerance: int_field(line, fields[2])?,
                saturation: int_field(line, fields[3])?,
                saturation_tolerance: int_field(line, fields[4])?,
                value: int_field(line, fields[5])?,
                value_tolerance: int_field(line, fields[6])?,
            })))
        }
        _ => Ok(None),
    }
}

fn int_field(line: &str, field: &str) -> Result<i32, RecordError> {
    field.parse().map_err(|_| RecordError::InvalidField {
        field: field.to_string(),
        line: line.to_string(),
    })
}
