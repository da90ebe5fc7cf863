//! Severity classification of raw build output

use serde::{Deserialize, Serialize};

/// Severity tag attached to every log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Error => "error",
        };
        f.write_str(s)
    }
}

const SUCCESS_MARKERS: &[&str] = &["✅", "✓", "✔", "success", "completed"];
const ERROR_MARKERS: &[&str] = &["❌", "✗", "✘", "error", "failed"];

/// Classify one line of build output.
///
/// Success markers are checked before error markers, so a line carrying
/// both (e.g. `"retry completed after error"`) is a `Success`.
pub fn classify(line: &str) -> Severity {
    let lowered = line.to_lowercase();

    if SUCCESS_MARKERS.iter().any(|m| lowered.contains(m)) {
        Severity::Success
    } else if ERROR_MARKERS.iter().any(|m| lowered.contains(m)) {
        Severity::Error
    } else {
        Severity::Info
    }
}
