//! Coarse layer phases

use std::fmt;

use serde::Serialize;

/// Bucket a layer's raw status string is classified into.
///
/// Several distinct runtime sub-phases share a bucket; reports only track
/// coarse progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pending,
    Downloading,
    Extracting,
    Complete,
    Pushing,
}

impl Phase {
    /// All phases in report order.
    pub const ALL: [Phase; 5] = [
        Phase::Pending,
        Phase::Downloading,
        Phase::Extracting,
        Phase::Complete,
        Phase::Pushing,
    ];

    /// Classify a runtime status string. Unrecognized strings are `Pending`.
    pub fn from_status(status: &str) -> Self {
        match status {
            "Pushing" => Phase::Pushing,
            "Downloading" => Phase::Downloading,
            "Extracting" | "Verifying Checksum" | "Download complete" => Phase::Extracting,
            "Pull complete" | "Already exists" | "Pushed" | "Layer already exists" => {
                Phase::Complete
            }
            _ => Phase::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Downloading => "downloading",
            Phase::Extracting => "extracting",
            Phase::Complete => "complete",
            Phase::Pushing => "pushing",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
