//! The challenge variants shown on the interstitial.
//!
//! Each variant owns only its own progress. Whether a solved challenge turns
//! into a pass, and what that pass grants, is decided by the session.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::db::models::ChallengeMode;

pub const TYPED_PHRASE: &str = "I am choosing to waste my time";
pub const DEFAULT_STEP_GOAL: u32 = 50;
pub const ERROR_FLASH_MS: i64 = 800;

/// Operand pairs with products awkward enough to need a moment's thought.
pub const ARITHMETIC_PAIRS: [(u32, u32); 6] = [(14, 8), (17, 6), (23, 7), (9, 13), (15, 12), (8, 19)];

/// User action routed to the active challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeInput<'a> {
    Tick,
    Text(&'a str),
    Answer(&'a str),
    Steps(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Pending,
    Solved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Challenge {
    /// Hard schedule window is active. Nothing can be solved.
    Blocked,
    #[serde(rename_all = "camelCase")]
    Breathing {
        started_at: DateTime<Utc>,
        duration_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    TypedPhrase { phrase: String, input: String },
    #[serde(rename_all = "camelCase")]
    Arithmetic {
        lhs: u32,
        rhs: u32,
        input: String,
        #[serde(skip)]
        error_until: Option<DateTime<Utc>>,
    },
    #[serde(rename_all = "camelCase")]
    PhysicalMotion { goal: u32, steps: u32 },
}

/// Inputs a challenge needs beyond the mode itself.
#[derive(Debug, Clone)]
pub struct ChallengeSetup {
    pub hard_block: bool,
    pub breathing: StdDuration,
    pub phrase: String,
    pub step_goal: u32,
}

impl Challenge {
    pub fn build<R: Rng + ?Sized>(
        mode: ChallengeMode,
        setup: &ChallengeSetup,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Self {
        if setup.hard_block {
            return Challenge::Blocked;
        }

        match mode {
            // Outside its window a hard-schedule app still gets a pause.
            ChallengeMode::Breathing | ChallengeMode::HardSchedule => {
                Challenge::breathing(now, setup.breathing)
            }
            ChallengeMode::TypedPhrase => Challenge::TypedPhrase {
                phrase: setup.phrase.clone(),
                input: String::new(),
            },
            ChallengeMode::Arithmetic => {
                let (lhs, rhs) = ARITHMETIC_PAIRS
                    .choose(rng)
                    .copied()
                    .unwrap_or(ARITHMETIC_PAIRS[0]);
                Challenge::arithmetic(lhs, rhs)
            }
            ChallengeMode::PhysicalMotion => Challenge::PhysicalMotion {
                goal: setup.step_goal.max(1),
                steps: 0,
            },
        }
    }

    pub fn breathing(now: DateTime<Utc>, duration: StdDuration) -> Self {
        Challenge::Breathing {
            started_at: now,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn arithmetic(lhs: u32, rhs: u32) -> Self {
        Challenge::Arithmetic {
            lhs,
            rhs,
            input: String::new(),
            error_until: None,
        }
    }

    pub fn apply(&mut self, input: ChallengeInput<'_>, now: DateTime<Utc>) -> Progress {
        match (self, input) {
            (Challenge::Blocked, _) => Progress::Pending,

            (
                Challenge::Breathing {
                    started_at,
                    duration_ms,
                },
                ChallengeInput::Tick,
            ) => {
                let elapsed = (now - *started_at).num_milliseconds().max(0);
                if u64::try_from(elapsed).unwrap_or(0) >= *duration_ms {
                    Progress::Solved
                } else {
                    Progress::Pending
                }
            }
            (Challenge::Breathing { .. }, _) => Progress::Pending,

            (Challenge::TypedPhrase { phrase, input }, ChallengeInput::Text(text)) => {
                *input = text.to_string();
                if input.to_lowercase() == phrase.to_lowercase() {
                    Progress::Solved
                } else {
                    Progress::Pending
                }
            }
            (Challenge::TypedPhrase { .. }, _) => Progress::Pending,

            (
                Challenge::Arithmetic {
                    lhs,
                    rhs,
                    input,
                    error_until,
                },
                input_event,
            ) => match input_event {
                ChallengeInput::Answer(answer) => {
                    *input = answer.to_string();
                    let expected = u64::from(*lhs) * u64::from(*rhs);
                    if answer.trim().parse::<u64>().ok() == Some(expected) {
                        *error_until = None;
                        Progress::Solved
                    } else {
                        *error_until = Some(now + Duration::milliseconds(ERROR_FLASH_MS));
                        Progress::Pending
                    }
                }
                ChallengeInput::Tick => {
                    if matches!(*error_until, Some(until) if now >= until) {
                        input.clear();
                        *error_until = None;
                    }
                    Progress::Pending
                }
                ChallengeInput::Text(_) | ChallengeInput::Steps(_) => Progress::Pending,
            },

            (Challenge::PhysicalMotion { goal, steps }, ChallengeInput::Steps(count)) => {
                *steps = (*steps).max(count);
                if *steps >= *goal {
                    Progress::Solved
                } else {
                    Progress::Pending
                }
            }
            (Challenge::PhysicalMotion { .. }, _) => Progress::Pending,
        }
    }

    /// Stretches or shrinks a running breathing countdown once the real
    /// open counts are known.
    pub fn rescale_breathing(&mut self, duration: StdDuration) {
        if let Challenge::Breathing { duration_ms, .. } = self {
            *duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        }
    }

    pub fn has_error(&self) -> bool {
        matches!(
            self,
            Challenge::Arithmetic {
                error_until: Some(_),
                ..
            }
        )
    }

    pub fn remaining_ms(&self, now: DateTime<Utc>) -> Option<u64> {
        match self {
            Challenge::Breathing {
                started_at,
                duration_ms,
            } => {
                let elapsed = u64::try_from((now - *started_at).num_milliseconds().max(0)).unwrap_or(0);
                Some(duration_ms.saturating_sub(elapsed))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::{rngs::StdRng, SeedableRng};

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn setup(hard_block: bool) -> ChallengeSetup {
        ChallengeSetup {
            hard_block,
            breathing: StdDuration::from_secs(5),
            phrase: TYPED_PHRASE.into(),
            step_goal: DEFAULT_STEP_GOAL,
        }
    }

    fn typed() -> Challenge {
        Challenge::TypedPhrase {
            phrase: TYPED_PHRASE.into(),
            input: String::new(),
        }
    }

    #[test]
    fn hard_block_wins_over_every_mode() {
        let mut rng = StdRng::seed_from_u64(1);
        for mode in ChallengeMode::ALL {
            let challenge = Challenge::build(mode, &setup(true), t(0), &mut rng);
            assert_eq!(challenge, Challenge::Blocked);
        }
    }

    #[test]
    fn hard_schedule_outside_window_is_a_breathing_pause() {
        let mut rng = StdRng::seed_from_u64(1);
        let challenge = Challenge::build(ChallengeMode::HardSchedule, &setup(false), t(0), &mut rng);
        assert!(matches!(challenge, Challenge::Breathing { duration_ms: 5_000, .. }));
    }

    #[test]
    fn arithmetic_operands_come_from_the_curated_pairs() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            match Challenge::build(ChallengeMode::Arithmetic, &setup(false), t(0), &mut rng) {
                Challenge::Arithmetic { lhs, rhs, .. } => {
                    assert!(ARITHMETIC_PAIRS.contains(&(lhs, rhs)))
                }
                other => panic!("unexpected challenge {other:?}"),
            }
        }
    }

    #[test]
    fn breathing_passes_when_countdown_elapses() {
        let mut challenge = Challenge::breathing(t(0), StdDuration::from_secs(5));
        assert_eq!(challenge.apply(ChallengeInput::Tick, t(4_999)), Progress::Pending);
        assert_eq!(challenge.remaining_ms(t(4_000)), Some(1_000));
        assert_eq!(challenge.apply(ChallengeInput::Tick, t(5_000)), Progress::Solved);
    }

    #[test]
    fn typed_phrase_ignores_case_but_not_extra_characters() {
        let mut challenge = typed();
        assert_eq!(
            challenge.apply(ChallengeInput::Text("I am choosing to waste my time."), t(0)),
            Progress::Pending
        );
        assert_eq!(
            challenge.apply(ChallengeInput::Text("I am choosing to waste my"), t(0)),
            Progress::Pending
        );
        assert_eq!(
            challenge.apply(ChallengeInput::Text("i AM choosing TO waste my time"), t(0)),
            Progress::Solved
        );
    }

    #[test]
    fn typed_phrase_is_not_trimmed() {
        let mut challenge = typed();
        assert_eq!(
            challenge.apply(ChallengeInput::Text("I am choosing to waste my time "), t(0)),
            Progress::Pending
        );
    }

    #[test]
    fn arithmetic_correct_product_passes() {
        let mut challenge = Challenge::arithmetic(14, 8);
        assert_eq!(challenge.apply(ChallengeInput::Answer("112"), t(0)), Progress::Solved);
    }

    #[test]
    fn arithmetic_wrong_answer_flashes_then_clears() {
        let mut challenge = Challenge::arithmetic(14, 8);
        assert_eq!(challenge.apply(ChallengeInput::Answer("111"), t(0)), Progress::Pending);
        assert!(challenge.has_error());

        challenge.apply(ChallengeInput::Tick, t(799));
        assert!(matches!(&challenge, Challenge::Arithmetic { input, .. } if input == "111"));

        challenge.apply(ChallengeInput::Tick, t(800));
        assert!(!challenge.has_error());
        assert!(matches!(&challenge, Challenge::Arithmetic { input, .. } if input.is_empty()));
    }

    #[test]
    fn arithmetic_rejects_garbage() {
        let mut challenge = Challenge::arithmetic(9, 13);
        assert_eq!(challenge.apply(ChallengeInput::Answer("one hundred"), t(0)), Progress::Pending);
        assert_eq!(challenge.apply(ChallengeInput::Answer("117"), t(10)), Progress::Solved);
    }

    #[test]
    fn physical_motion_needs_the_full_step_goal() {
        let mut challenge = Challenge::PhysicalMotion {
            goal: DEFAULT_STEP_GOAL,
            steps: 0,
        };
        assert_eq!(challenge.apply(ChallengeInput::Steps(49), t(0)), Progress::Pending);
        // Step counters only go up.
        assert_eq!(challenge.apply(ChallengeInput::Steps(10), t(0)), Progress::Pending);
        assert_eq!(challenge.apply(ChallengeInput::Steps(50), t(0)), Progress::Solved);
    }

    #[test]
    fn blocked_never_progresses() {
        let mut challenge = Challenge::Blocked;
        for input in [
            ChallengeInput::Tick,
            ChallengeInput::Text(TYPED_PHRASE),
            ChallengeInput::Answer("112"),
            ChallengeInput::Steps(1_000),
        ] {
            assert_eq!(challenge.apply(input, t(60_000)), Progress::Pending);
        }
    }
}
