use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use super::classifier::{Classification, Decision, DispatchTicket, ForegroundClassifier, ForegroundState};
use super::dispatcher::Dispatcher;

pub const DEFAULT_LAUNCH_SETTLE_MS: u64 = 100;
pub const DEFAULT_FAILSAFE_MS: u64 = 5_000;

/// One raw foreground-change signal from the platform. Duplicates are fine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundEvent {
    pub identifier: String,
    pub timestamp: DateTime<Utc>,
}

impl ForegroundEvent {
    pub fn new(identifier: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.into(),
            timestamp,
        }
    }
}

/// How an interstitial ended, reported back by arbitration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub ticket: DispatchTicket,
    pub allowed: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FailsafeTiming {
    pub launch_settle: Duration,
    pub timeout: Duration,
}

impl FailsafeTiming {
    pub fn total(&self) -> Duration {
        self.launch_settle + self.timeout
    }
}

impl Default for FailsafeTiming {
    fn default() -> Self {
        Self {
            launch_settle: Duration::from_millis(DEFAULT_LAUNCH_SETTLE_MS),
            timeout: Duration::from_millis(DEFAULT_FAILSAFE_MS),
        }
    }
}

struct ArmedFailsafe {
    ticket: DispatchTicket,
    cancel_token: CancellationToken,
}

/// Owns the classifier and serializes every foreground event through it.
///
/// Must be driven from inside a tokio runtime: interceptions arm a delayed
/// failsafe task.
#[derive(Clone)]
pub struct InterceptionController {
    classifier: Arc<Mutex<ForegroundClassifier>>,
    dispatcher: Arc<Dispatcher>,
    failsafe: Arc<Mutex<Option<ArmedFailsafe>>>,
    timing: FailsafeTiming,
}

impl InterceptionController {
    pub fn new(classifier: ForegroundClassifier, dispatcher: Dispatcher) -> Self {
        Self {
            classifier: Arc::new(Mutex::new(classifier)),
            dispatcher: Arc::new(dispatcher),
            failsafe: Arc::new(Mutex::new(None)),
            timing: FailsafeTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: FailsafeTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn foreground_state(&self) -> ForegroundState {
        self.classifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
            .clone()
    }

    pub fn handle_event(&self, event: &ForegroundEvent) -> Classification {
        let classification = self
            .classifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_foreground_changed(&event.identifier, event.timestamp);

        if let Decision::Intercept(interception) = &classification.decision {
            // Armed even when the launch fails: the failsafe is what recovers it.
            self.arm_failsafe(interception.ticket.clone());
            if let Err(err) = self.dispatcher.dispatch(interception) {
                warn!(
                    "Failed to launch interstitial for {}: {err:?}",
                    interception.ticket.identifier
                );
            }
        }

        classification
    }

    fn arm_failsafe(&self, ticket: DispatchTicket) {
        let cancel_token = CancellationToken::new();

        {
            let mut slot = self.failsafe.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = slot.replace(ArmedFailsafe {
                ticket: ticket.clone(),
                cancel_token: cancel_token.clone(),
            }) {
                previous.cancel_token.cancel();
            }
        }

        let classifier = self.classifier.clone();
        let slot = self.failsafe.clone();
        let delay = self.timing.total();

        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = cancel_token.cancelled() => {
                    debug!("Failsafe for dispatch #{} cancelled", ticket.sequence);
                    return;
                }
            }

            let reset = classifier
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .failsafe_reset(&ticket);
            if reset {
                info!("Failsafe released stuck interstitial for {}", ticket.identifier);
            }

            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.as_ref().map(|armed| &armed.ticket) == Some(&ticket) {
                *guard = None;
            }
        });
    }

    /// Cancels the failsafe for a resolved dispatch. Leaves
    /// `interstitial_active` alone; the next transition resets it.
    pub fn resolve(&self, resolution: &Resolution) {
        let matched = self
            .classifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(&resolution.ticket);

        let mut slot = self.failsafe.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map(|armed| &armed.ticket) == Some(&resolution.ticket) {
            if let Some(armed) = slot.take() {
                armed.cancel_token.cancel();
            }
        }

        debug!(
            "Resolution for {} (allowed={}, current_dispatch={})",
            resolution.ticket.identifier, resolution.allowed, matched
        );
    }

    pub fn failsafe_armed(&self) -> bool {
        self.failsafe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Consumes foreground events and resolutions until cancelled or both
    /// channels close.
    pub fn spawn_event_loop(
        &self,
        mut events: mpsc::UnboundedReceiver<ForegroundEvent>,
        mut resolutions: mpsc::UnboundedReceiver<Resolution>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let controller = self.clone();

        tokio::spawn(async move {
            let mut events_open = true;
            let mut resolutions_open = true;

            while events_open || resolutions_open {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    event = events.recv(), if events_open => match event {
                        Some(event) => {
                            controller.handle_event(&event);
                        }
                        None => events_open = false,
                    },
                    resolution = resolutions.recv(), if resolutions_open => match resolution {
                        Some(resolution) => controller.resolve(&resolution),
                        None => resolutions_open = false,
                    },
                }
            }

            if let Some(armed) = controller
                .failsafe
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                armed.cancel_token.cancel();
            }
            info!("Interception event loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::TrackedApp;
    use crate::interception::{
        allow_list::AllowList,
        cache::TrackedAppCache,
        classifier::SurfaceIdentity,
        dispatcher::{ChannelLauncher, InterstitialRequest},
        recent_opens::RecentOpens,
    };

    const SELF_ID: &str = "com.friction.app";
    const HOME: &str = "com.android.launcher";

    fn controller() -> (
        InterceptionController,
        AllowList,
        mpsc::UnboundedReceiver<InterstitialRequest>,
    ) {
        let allow_list = AllowList::new();
        let cache = TrackedAppCache::new();
        cache.replace(vec![TrackedApp::new("com.feed", "Feed")]);
        let classifier = ForegroundClassifier::new(
            SurfaceIdentity::new(SELF_ID, [HOME]),
            allow_list.clone(),
            cache,
        );
        let (launcher, rx) = ChannelLauncher::new();
        let dispatcher = Dispatcher::new(Arc::new(launcher), RecentOpens::new());
        let controller = InterceptionController::new(classifier, dispatcher);
        (controller, allow_list, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn failsafe_resets_a_stuck_flag_after_timeout() {
        let (controller, _allow, mut rx) = controller();
        let now = Utc::now();

        let c = controller.handle_event(&ForegroundEvent::new("com.feed", now));
        assert!(c.decision.is_intercept());
        let _request = rx.recv().await.unwrap();

        // Focus moved to our surface but it never reported a resolution.
        controller.handle_event(&ForegroundEvent::new(SELF_ID, now));
        assert!(controller.foreground_state().interstitial_active);

        time::sleep(Duration::from_millis(5_050)).await;
        assert!(controller.foreground_state().interstitial_active);

        time::sleep(Duration::from_millis(100)).await;
        assert!(!controller.foreground_state().interstitial_active);
        assert!(!controller.failsafe_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn failsafe_leaves_state_alone_while_target_is_foreground() {
        let (controller, _allow, _rx) = controller();
        controller.handle_event(&ForegroundEvent::new("com.feed", Utc::now()));

        time::sleep(Duration::from_secs(6)).await;
        assert!(controller.foreground_state().interstitial_active);
    }

    #[tokio::test(start_paused = true)]
    async fn resolution_cancels_the_failsafe() {
        let (controller, _allow, mut rx) = controller();
        let now = Utc::now();
        controller.handle_event(&ForegroundEvent::new("com.feed", now));
        let request = rx.recv().await.unwrap();
        assert!(controller.failsafe_armed());

        controller.handle_event(&ForegroundEvent::new(SELF_ID, now));
        controller.resolve(&Resolution {
            ticket: request.ticket,
            allowed: false,
        });
        assert!(!controller.failsafe_armed());

        time::sleep(Duration::from_secs(6)).await;
        // Nothing reset it: resolution does not touch the flag.
        assert!(controller.foreground_state().interstitial_active);
    }

    #[tokio::test]
    async fn event_loop_processes_events_in_order() {
        let (controller, allow_list, mut rx) = controller();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (_res_tx, res_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = controller.spawn_event_loop(events_rx, res_rx, cancel.clone());

        let now = Utc::now();
        events_tx.send(ForegroundEvent::new("com.feed", now)).unwrap();
        let request = rx.recv().await.unwrap();
        assert_eq!(request.identifier, "com.feed");

        allow_list.allow("com.feed", now);
        events_tx.send(ForegroundEvent::new(SELF_ID, now)).unwrap();
        events_tx.send(ForegroundEvent::new("com.feed", now)).unwrap();
        events_tx.send(ForegroundEvent::new(HOME, now)).unwrap();

        cancel.cancel();
        handle.await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
