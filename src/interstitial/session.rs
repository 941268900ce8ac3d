use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::models::InterceptionRecord;
use crate::interception::{DispatchTicket, InterstitialRequest, OpenCounts};

use super::challenge::{Challenge, ChallengeInput, ChallengeSetup, Progress, DEFAULT_STEP_GOAL, TYPED_PHRASE};
use super::escalation::EscalationPolicy;
use super::roast::pick_roast;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Presented,
    Passed,
    Dismissed,
    /// Hard schedule block. Terminal from the start.
    Blocked,
}

#[derive(Debug, Clone)]
pub struct InterstitialConfig {
    pub policy: EscalationPolicy,
    pub phrase: String,
    pub step_goal: u32,
}

impl Default for InterstitialConfig {
    fn default() -> Self {
        Self {
            policy: EscalationPolicy::default(),
            phrase: TYPED_PHRASE.into(),
            step_goal: DEFAULT_STEP_GOAL,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub allowed: bool,
    pub bypassed: bool,
    pub time_on_interstitial_ms: u64,
}

/// Serializable view of a session for whatever renders it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub identifier: String,
    pub display_name: String,
    pub state: SessionState,
    pub challenge: Challenge,
    pub remaining_ms: Option<u64>,
    pub error: bool,
    pub roast: Option<&'static str>,
    pub counts: Option<OpenCounts>,
}

/// One instance of the interstitial, from presentation to its outcome.
pub struct InterstitialSession {
    request: InterstitialRequest,
    config: InterstitialConfig,
    challenge: Challenge,
    state: SessionState,
    bypassed: bool,
    presented_at: DateTime<Utc>,
    concluded_at: Option<DateTime<Utc>>,
    counts: Option<OpenCounts>,
    roast: Option<&'static str>,
}

impl InterstitialSession {
    pub fn present(request: InterstitialRequest, config: InterstitialConfig, now: DateTime<Utc>) -> Self {
        let early_counts = request.escalation.latest();
        let opens_today = early_counts.unwrap_or_default().opens_today;

        let setup = ChallengeSetup {
            hard_block: request.hard_block,
            breathing: config.policy.breathing_duration(opens_today),
            phrase: config.phrase.clone(),
            step_goal: config.step_goal,
        };
        let challenge = Challenge::build(request.challenge_mode, &setup, now, &mut rand::thread_rng());
        let state = if request.hard_block {
            SessionState::Blocked
        } else {
            SessionState::Presented
        };

        let mut session = Self {
            request,
            config,
            challenge,
            state,
            bypassed: false,
            presented_at: now,
            concluded_at: None,
            counts: None,
            roast: None,
        };
        if let Some(counts) = early_counts {
            session.apply_counts(counts);
        }
        session
    }

    pub fn request(&self) -> &InterstitialRequest {
        &self.request
    }

    pub fn ticket(&self) -> &DispatchTicket {
        &self.request.ticket
    }

    pub fn identifier(&self) -> &str {
        &self.request.identifier
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn challenge(&self) -> &Challenge {
        &self.challenge
    }

    pub fn roast(&self) -> Option<&'static str> {
        self.roast
    }

    pub fn counts(&self) -> Option<OpenCounts> {
        self.counts
    }

    pub fn is_concluded(&self) -> bool {
        self.concluded_at.is_some()
    }

    /// Picks up enrichment that arrived after presentation. Later updates
    /// are ignored.
    pub fn refresh_escalation(&mut self) {
        if self.counts.is_some() {
            return;
        }
        if let Some(counts) = self.request.escalation.latest() {
            self.apply_counts(counts);
        }
    }

    fn apply_counts(&mut self, counts: OpenCounts) {
        self.counts = Some(counts);
        if self.state == SessionState::Presented {
            self.challenge
                .rescale_breathing(self.config.policy.breathing_duration(counts.opens_today));
        }
        if self.config.policy.should_roast(counts.opens_last_hour) {
            self.roast = Some(pick_roast(&mut rand::thread_rng()));
        }
    }

    fn handle(&mut self, input: ChallengeInput<'_>, now: DateTime<Utc>) -> SessionState {
        self.refresh_escalation();
        if self.state != SessionState::Presented {
            return self.state;
        }

        if self.challenge.apply(input, now) == Progress::Solved {
            self.state = SessionState::Passed;
            self.concluded_at = Some(now);
        }
        self.state
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> SessionState {
        self.handle(ChallengeInput::Tick, now)
    }

    pub fn type_text(&mut self, text: &str, now: DateTime<Utc>) -> SessionState {
        self.handle(ChallengeInput::Text(text), now)
    }

    pub fn submit_answer(&mut self, answer: &str, now: DateTime<Utc>) -> SessionState {
        self.handle(ChallengeInput::Answer(answer), now)
    }

    pub fn record_steps(&mut self, steps: u32, now: DateTime<Utc>) -> SessionState {
        self.handle(ChallengeInput::Steps(steps), now)
    }

    /// "Let me in anyway": straight to `Passed`, flagged as a bypass.
    pub fn let_me_in(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.state {
            SessionState::Presented => {
                self.state = SessionState::Passed;
                self.bypassed = true;
                self.concluded_at = Some(now);
                Ok(())
            }
            SessionState::Blocked => bail!("{} is blocked by its schedule", self.request.display_name),
            SessionState::Passed | SessionState::Dismissed => bail!("interstitial already concluded"),
        }
    }

    /// User backed out. Nothing is granted.
    pub fn dismiss(&mut self, now: DateTime<Utc>) {
        match self.state {
            SessionState::Presented => {
                self.state = SessionState::Dismissed;
                self.concluded_at = Some(now);
            }
            SessionState::Blocked => {
                if self.concluded_at.is_none() {
                    self.concluded_at = Some(now);
                }
            }
            SessionState::Passed | SessionState::Dismissed => {}
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        let concluded_at = self.concluded_at?;
        let elapsed = (concluded_at - self.presented_at).num_milliseconds().max(0);
        Some(Outcome {
            allowed: self.state == SessionState::Passed,
            bypassed: self.bypassed,
            time_on_interstitial_ms: u64::try_from(elapsed).unwrap_or(0),
        })
    }

    /// Audit-log entry for a concluded session.
    pub fn record(&self) -> Option<InterceptionRecord> {
        let outcome = self.outcome()?;
        let mut record = InterceptionRecord::new(self.request.identifier.clone(), self.presented_at);
        record.was_allowed = outcome.allowed;
        record.time_on_interstitial_ms = outcome.time_on_interstitial_ms;
        record.challenge_mode = self.request.challenge_mode;
        Some(record)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            identifier: self.request.identifier.clone(),
            display_name: self.request.display_name.clone(),
            state: self.state,
            challenge: self.challenge.clone(),
            remaining_ms: self.challenge.remaining_ms(now),
            error: self.challenge.has_error(),
            roast: self.roast,
            counts: self.counts,
        }
    }
}
