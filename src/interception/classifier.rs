//! Foreground transition classifier.
//!
//! Consumes raw foreground-change signals one at a time, works out whether
//! each one is a real app switch, applies the allow-list side effects of that
//! switch, and decides whether the new foreground app must be intercepted.
//! Everything here is synchronous and in-memory: the decision has to be made
//! inside the same event tick, before the target app paints its first frame.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::models::TrackedApp;

use super::allow_list::AllowList;
use super::cache::TrackedAppCache;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub const DEFAULT_DEBOUNCE_MS: i64 = 2_000;

/// Who is who among foreground identifiers: this app's own interstitial
/// surface and the platform's home/launcher surfaces.
#[derive(Debug, Clone)]
pub struct SurfaceIdentity {
    own_identifier: String,
    launchers: HashSet<String>,
}

impl SurfaceIdentity {
    pub fn new<I, S>(own_identifier: impl Into<String>, launchers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            own_identifier: own_identifier.into(),
            launchers: launchers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn own_identifier(&self) -> &str {
        &self.own_identifier
    }

    pub fn is_self(&self, identifier: &str) -> bool {
        identifier == self.own_identifier
    }

    pub fn is_launcher(&self, identifier: &str) -> bool {
        self.launchers.contains(identifier)
    }

    pub fn primary_launcher(&self) -> Option<&str> {
        let mut launchers: Vec<&String> = self.launchers.iter().collect();
        launchers.sort();
        launchers.first().map(|s| s.as_str())
    }
}

/// Identifies one dispatched interception, for the failsafe and for
/// matching a resolution back to the dispatch that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchTicket {
    pub identifier: String,
    pub dispatched_at: DateTime<Utc>,
    pub sequence: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForegroundState {
    pub current: Option<String>,
    pub interstitial_active: bool,
    pub last_intercepted: Option<String>,
    pub last_intercept_at: Option<DateTime<Utc>>,
    pub pending: Option<DispatchTicket>,
}

/// Side effect of the transition half of the algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Event carried no identifier and was dropped.
    Dropped,
    /// Same identifier as the current foreground: noise, no side effects.
    Repeat,
    EnteredOwnSurface,
    ReturnedHome { revoked: usize },
    Switched { revoked: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    EmptyIdentifier,
    OwnSurface,
    InterstitialActive,
    GracePeriod,
    Debounced,
    NotTracked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interception {
    pub ticket: DispatchTicket,
    pub app: TrackedApp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Skip(SkipReason),
    Intercept(Interception),
}

impl Decision {
    pub fn is_intercept(&self) -> bool {
        matches!(self, Decision::Intercept(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub transition: Transition,
    pub decision: Decision,
}

pub struct ForegroundClassifier {
    state: ForegroundState,
    identity: SurfaceIdentity,
    allow_list: AllowList,
    cache: TrackedAppCache,
    debounce: Duration,
    next_sequence: u64,
}

impl ForegroundClassifier {
    pub fn new(identity: SurfaceIdentity, allow_list: AllowList, cache: TrackedAppCache) -> Self {
        Self {
            state: ForegroundState::default(),
            identity,
            allow_list,
            cache,
            debounce: Duration::milliseconds(DEFAULT_DEBOUNCE_MS),
            next_sequence: 0,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn state(&self) -> &ForegroundState {
        &self.state
    }

    pub fn identity(&self) -> &SurfaceIdentity {
        &self.identity
    }

    pub fn on_foreground_changed(&mut self, identifier: &str, now: DateTime<Utc>) -> Classification {
        if identifier.is_empty() {
            return Classification {
                transition: Transition::Dropped,
                decision: Decision::Skip(SkipReason::EmptyIdentifier),
            };
        }

        let transition = self.apply_transition(identifier);
        let decision = self.decide(identifier, now);

        Classification {
            transition,
            decision,
        }
    }

    fn apply_transition(&mut self, identifier: &str) -> Transition {
        if self.state.current.as_deref() == Some(identifier) {
            return Transition::Repeat;
        }

        let previous = self.state.current.take();
        log_debug!(
            "App switch detected: {} -> {}",
            previous.as_deref().unwrap_or("<none>"),
            identifier
        );

        let transition = if self.identity.is_self(identifier) {
            // The grace just granted must survive while our own surface is up.
            self.state.interstitial_active = true;
            Transition::EnteredOwnSurface
        } else if self.identity.is_launcher(identifier) {
            let revoked = self.allow_list.revoke_all();
            self.state.interstitial_active = false;
            log_info!("Returned home ({}); cleared {} grace entries", identifier, revoked);
            Transition::ReturnedHome { revoked }
        } else {
            let revoked = match previous.as_deref() {
                Some(prev) if !self.identity.is_self(prev) => {
                    self.allow_list.revoke(prev);
                    Some(prev.to_string())
                }
                // Coming back from our own surface: the pass it just granted stands.
                _ => None,
            };
            self.state.interstitial_active = false;
            Transition::Switched { revoked }
        };

        self.state.current = Some(identifier.to_string());
        transition
    }

    fn decide(&mut self, identifier: &str, now: DateTime<Utc>) -> Decision {
        if self.identity.is_self(identifier) {
            return Decision::Skip(SkipReason::OwnSurface);
        }

        if self.state.interstitial_active {
            log_debug!("Interstitial active; ignoring event for {}", identifier);
            return Decision::Skip(SkipReason::InterstitialActive);
        }

        if self.allow_list.is_allowed(identifier, now) {
            log_debug!("{} is within its grace period", identifier);
            return Decision::Skip(SkipReason::GracePeriod);
        }

        if let (Some(last), Some(at)) = (
            self.state.last_intercepted.as_deref(),
            self.state.last_intercept_at,
        ) {
            if last == identifier && now - at < self.debounce {
                log_debug!("Debounce hit for {}", identifier);
                return Decision::Skip(SkipReason::Debounced);
            }
        }

        // Cold cache misses too: fail open rather than block event delivery.
        let Some(app) = self.cache.lookup(identifier) else {
            return Decision::Skip(SkipReason::NotTracked);
        };

        self.next_sequence += 1;
        let ticket = DispatchTicket {
            identifier: identifier.to_string(),
            dispatched_at: now,
            sequence: self.next_sequence,
        };

        self.state.interstitial_active = true;
        self.state.last_intercepted = Some(identifier.to_string());
        self.state.last_intercept_at = Some(now);
        self.state.pending = Some(ticket.clone());

        log_info!("Intercepting tracked app {}", identifier);
        Decision::Intercept(Interception { ticket, app })
    }

    /// Failsafe check for a dispatch that never resolved. Resets
    /// `interstitial_active` only if `ticket` is still the pending dispatch
    /// and the foreground has moved away from its target.
    pub fn failsafe_reset(&mut self, ticket: &DispatchTicket) -> bool {
        if self.state.pending.as_ref() != Some(ticket) {
            return false;
        }

        if !self.state.interstitial_active {
            self.state.pending = None;
            return false;
        }

        if self.state.current.as_deref() == Some(ticket.identifier.as_str()) {
            return false;
        }

        log_warn!(
            "Failsafe: resetting interstitial state for {} (dispatch #{})",
            ticket.identifier,
            ticket.sequence
        );
        self.state.interstitial_active = false;
        self.state.pending = None;
        true
    }

    /// A resolution arrived for `ticket`; it is no longer pending.
    pub fn resolve(&mut self, ticket: &DispatchTicket) -> bool {
        if self.state.pending.as_ref() == Some(ticket) {
            self.state.pending = None;
            true
        } else {
            false
        }
    }
}
