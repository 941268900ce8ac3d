//! Tracked app configuration models.
//!
//! A `TrackedApp` is written by the configuration layer and only ever read by
//! the interception engine, through the warm cache in
//! `interception::cache`.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::Weekday;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum ChallengeMode {
    #[default]
    Breathing,
    TypedPhrase,
    Arithmetic,
    PhysicalMotion,
    HardSchedule,
}

impl ChallengeMode {
    pub const ALL: [ChallengeMode; 5] = [
        ChallengeMode::Breathing,
        ChallengeMode::TypedPhrase,
        ChallengeMode::Arithmetic,
        ChallengeMode::PhysicalMotion,
        ChallengeMode::HardSchedule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeMode::Breathing => "Breathing",
            ChallengeMode::TypedPhrase => "TypedPhrase",
            ChallengeMode::Arithmetic => "Arithmetic",
            ChallengeMode::PhysicalMotion => "PhysicalMotion",
            ChallengeMode::HardSchedule => "HardSchedule",
        }
    }

    pub fn is_high_friction(&self) -> bool {
        matches!(
            self,
            ChallengeMode::Arithmetic | ChallengeMode::PhysicalMotion | ChallengeMode::HardSchedule
        )
    }

    /// High-friction modes are the premium tier.
    pub fn requires_premium(&self) -> bool {
        self.is_high_friction()
    }
}

impl fmt::Display for ChallengeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        ChallengeMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| anyhow!("unknown challenge mode '{value}'"))
    }
}

/// Set of weekdays, one bit per day starting at Monday.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(transparent)]
pub struct ActiveDays(u8);

impl ActiveDays {
    pub const NONE: ActiveDays = ActiveDays(0);
    pub const WEEKDAYS: ActiveDays = ActiveDays(0b0001_1111);
    pub const ALL: ActiveDays = ActiveDays(0b0111_1111);

    fn bit(day: Weekday) -> u8 {
        1 << day.num_days_from_monday()
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & Self::bit(day) != 0
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= Self::bit(day);
    }

    pub fn is_empty(self) -> bool {
        self.0 & Self::ALL.0 == 0
    }

    pub fn days(self) -> impl Iterator<Item = Weekday> {
        let mut day = Weekday::Mon;
        (0..7).filter_map(move |_| {
            let current = day;
            day = day.succ();
            self.contains(current).then_some(current)
        })
    }

    /// Comma-separated ISO day numbers, Monday = 1.
    pub fn to_db_string(self) -> String {
        self.days()
            .map(|day| day.number_from_monday().to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn parse(value: &str) -> Result<Self> {
        let mut days = ActiveDays::NONE;
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let number: u32 = part
                .parse()
                .map_err(|_| anyhow!("invalid weekday number '{part}'"))?;
            let day = match number {
                1 => Weekday::Mon,
                2 => Weekday::Tue,
                3 => Weekday::Wed,
                4 => Weekday::Thu,
                5 => Weekday::Fri,
                6 => Weekday::Sat,
                7 => Weekday::Sun,
                other => return Err(anyhow!("weekday number {other} out of range 1..=7")),
            };
            days.insert(day);
        }
        Ok(days)
    }
}

impl FromIterator<Weekday> for ActiveDays {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut days = ActiveDays::NONE;
        for day in iter {
            days.insert(day);
        }
        days
    }
}

/// Recurring hard-block window: hours `[start_hour, end_hour)` on `days`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub enabled: bool,
    pub start_hour: u8,
    pub end_hour: u8,
    pub days: ActiveDays,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            enabled: false,
            start_hour: 9,
            end_hour: 17,
            days: ActiveDays::WEEKDAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedApp {
    pub identifier: String,
    pub display_name: String,
    pub enabled: bool,
    pub challenge_mode: ChallengeMode,
    #[serde(default)]
    pub schedule: Schedule,
}

impl TrackedApp {
    pub fn new(identifier: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            enabled: true,
            challenge_mode: ChallengeMode::default(),
            schedule: Schedule::default(),
        }
    }

    pub fn with_mode(mut self, mode: ChallengeMode) -> Self {
        self.challenge_mode = mode;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }
}

/// Validation applied by the configuration store before writes.
pub mod validation {
    use super::{ChallengeMode, TrackedApp};
    use anyhow::{bail, Result};

    const MAX_IDENTIFIER_LEN: usize = 255;

    pub fn validate_identifier(identifier: &str) -> Result<()> {
        if identifier.is_empty() {
            bail!("identifier is required");
        }
        if identifier.len() > MAX_IDENTIFIER_LEN {
            bail!("identifier too long (max 255 chars)");
        }
        if identifier.chars().any(char::is_whitespace) {
            bail!("identifier must not contain whitespace");
        }
        Ok(())
    }

    pub fn validate_tracked_app(app: &TrackedApp) -> Result<()> {
        validate_identifier(&app.identifier)?;

        if app.display_name.trim().is_empty() {
            bail!("display name is required");
        }

        // end_hour may be 24 to cover the last hour of the day
        if app.schedule.start_hour > 23 {
            bail!("schedule start hour must be between 0 and 23");
        }
        if app.schedule.end_hour > 24 {
            bail!("schedule end hour must be between 0 and 24");
        }

        Ok(())
    }

    /// Entitlement gate for assigning a mode. The engine itself never checks this.
    pub fn validate_challenge_assignment(mode: ChallengeMode, premium: bool) -> Result<()> {
        if mode.requires_premium() && !premium {
            bail!("{mode} requires premium");
        }
        Ok(())
    }
}
