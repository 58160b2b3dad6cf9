//! Per-vehicle punctuality returned by the vehicle detail endpoint.

use serde::{Deserialize, Serialize};

/// Punctuality as reported by the operator.
///
/// Both members are optional in the feed; an all-`None` value is also what
/// the tracker records when a lookup is impossible or fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingStatus {
    #[serde(rename = "Minutes", default)]
    pub minutes: Option<i64>,
    #[serde(rename = "Status", default)]
    pub status: Option<i64>,
}

/// Closed interpretation of [`TimingStatus::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingState {
    OnTime,
    Early,
    Late,
    Unknown,
}

impl TimingStatus {
    /// The placeholder cached when no real answer is available.
    pub const UNKNOWN: TimingStatus = TimingStatus {
        minutes: None,
        status: None,
    };

    pub fn state(&self) -> TimingState {
        match self.status {
            Some(0) => TimingState::OnTime,
            Some(1) => TimingState::Early,
            Some(2) => TimingState::Late,
            _ => TimingState::Unknown,
        }
    }

    pub fn description(&self) -> String {
        let Some(status) = self.status else {
            return "Timing: Unknown".to_string();
        };
        match self.state() {
            TimingState::OnTime => "Timing: On time".to_string(),
            TimingState::Early => "Timing: Early".to_string(),
            TimingState::Late => {
                let delay = self.minutes.unwrap_or(0);
                let unit = if delay == 1 { "min" } else { "mins" };
                format!("Timing: Late by {delay} {unit}")
            }
            TimingState::Unknown => format!("Timing: Status {status}"),
        }
    }
}

/// Body of the vehicle detail endpoint; only the timing block is kept.
#[derive(Debug, Deserialize)]
pub struct VehicleDetails {
    #[serde(rename = "TimingStatus", default)]
    pub timing_status: Option<TimingStatus>,
}
