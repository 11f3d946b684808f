//! Persisted saturation entry

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// One channel's saturation record
///
/// Both fields are optional so that decoding tolerates records written by
/// other versions: unknown fields are ignored, missing fields make the entry
/// incomplete, and an incomplete entry never counts as saturated. Expiry
/// times are epoch seconds, matching the wall-clock `expires_at` values in
/// the state file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaturationEntry {
    /// Wall-clock expiry (epoch seconds)
    #[serde(default)]
    pub expires_at: Option<f64>,

    /// Admission failures recorded while the entry was live
    #[serde(default)]
    pub failure_count: Option<u64>,
}

impl SaturationEntry {
    /// Whether both fields survived decoding
    pub fn is_complete(&self) -> bool {
        self.expires_at.is_some() && self.failure_count.is_some()
    }

    /// Whether the entry is complete and not yet expired at `now`
    pub fn is_live(&self, now: f64) -> bool {
        match (self.expires_at, self.failure_count) {
            (Some(expires_at), Some(_)) => expires_at > now,
            _ => false,
        }
    }

    /// Recorded failures (0 for incomplete entries)
    pub fn failures(&self) -> u64 {
        self.failure_count.unwrap_or(0)
    }

    /// Whether the recorded failures reach `threshold`
    pub fn meets(&self, threshold: u64) -> bool {
        self.failures() >= threshold
    }
}

/// Current wall-clock time as epoch seconds
pub(crate) fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
