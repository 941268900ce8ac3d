//! Interception audit log models.
//!
//! One `InterceptionRecord` is appended per completed interstitial flow. The
//! log is only ever read in aggregate (open counts, time saved, weekly stats).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ChallengeMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptionRecord {
    pub id: Option<i64>,
    pub identifier: String,
    pub timestamp: DateTime<Utc>,
    /// Did the user get through (challenge passed or bypassed)?
    pub was_allowed: bool,
    pub time_on_interstitial_ms: u64,
    pub challenge_mode: ChallengeMode,
}

impl InterceptionRecord {
    pub fn new(identifier: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            identifier: identifier.into(),
            timestamp,
            was_allowed: false,
            time_on_interstitial_ms: 0,
            challenge_mode: ChallengeMode::default(),
        }
    }
}

/// Per-day aggregate for the weekly chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStat {
    pub days_ago: u32,
    pub open_count: u32,
    /// Time spent on interstitials that ended without letting the user in.
    pub time_saved_ms: u64,
}
