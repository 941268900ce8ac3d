use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_SECS: u64 = 5;
pub const DEFAULT_INCREMENT_SECS: u64 = 5;
pub const DEFAULT_ROAST_THRESHOLD: u32 = 5;

/// The more often an app is opened today, the longer the breathing pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationPolicy {
    pub base_secs: u64,
    pub increment_secs: u64,
    pub roast_threshold: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            base_secs: DEFAULT_BASE_SECS,
            increment_secs: DEFAULT_INCREMENT_SECS,
            roast_threshold: DEFAULT_ROAST_THRESHOLD,
        }
    }
}

impl EscalationPolicy {
    pub fn breathing_duration(&self, opens_today: u32) -> Duration {
        let secs = self
            .increment_secs
            .saturating_mul(u64::from(opens_today))
            .saturating_add(self.base_secs);
        Duration::from_secs(secs)
    }

    pub fn should_roast(&self, opens_last_hour: u32) -> bool {
        opens_last_hour >= self.roast_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_grows_with_opens_today() {
        let policy = EscalationPolicy::default();
        assert_eq!(policy.breathing_duration(0), Duration::from_secs(5));
        assert_eq!(policy.breathing_duration(3), Duration::from_secs(20));
    }

    #[test]
    fn huge_counts_saturate() {
        let policy = EscalationPolicy {
            base_secs: 5,
            increment_secs: u64::MAX,
            roast_threshold: 5,
        };
        assert_eq!(policy.breathing_duration(2), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn roast_kicks_in_at_threshold() {
        let policy = EscalationPolicy::default();
        assert!(!policy.should_roast(4));
        assert!(policy.should_roast(5));
        assert!(policy.should_roast(12));
    }
}
