use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::db::models::ChallengeMode;
use crate::utils::time::{one_hour_before, start_of_local_day};

use super::classifier::{DispatchTicket, Interception};
use super::recent_opens::RecentOpens;
use super::schedule::is_app_blocking;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Usage counts that feed escalation and roasting. Counted before the open
/// that triggered the interstitial is recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenCounts {
    pub opens_today: u32,
    pub opens_last_hour: u32,
}

/// Late-arriving enrichment for one interstitial.
///
/// The surface is launched before the counts exist. It renders with
/// defaults and switches to the real counts whenever they land.
#[derive(Debug, Clone)]
pub struct EscalationFeed {
    rx: watch::Receiver<Option<OpenCounts>>,
}

impl EscalationFeed {
    /// A feed still waiting for its counts, plus the sending half.
    pub fn pending() -> (watch::Sender<Option<OpenCounts>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx })
    }

    /// A feed that already carries `counts`.
    pub fn resolved(counts: OpenCounts) -> Self {
        let (_tx, rx) = watch::channel(Some(counts));
        Self { rx }
    }

    pub fn latest(&self) -> Option<OpenCounts> {
        *self.rx.borrow()
    }

    pub fn current_or_default(&self) -> OpenCounts {
        self.latest().unwrap_or_default()
    }

    /// Waits for the counts. `None` if the producer went away without sending.
    pub async fn ready(&mut self) -> Option<OpenCounts> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(counts) => *counts,
            Err(_) => None,
        }
    }
}

/// Everything the interstitial surface needs to render, handed over in one go.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterstitialRequest {
    pub instance_id: Uuid,
    pub ticket: DispatchTicket,
    pub identifier: String,
    pub display_name: String,
    pub challenge_mode: ChallengeMode,
    pub hard_block: bool,
    pub requested_at: DateTime<Utc>,
    #[serde(skip)]
    pub escalation: EscalationFeed,
}

/// Launches the interstitial surface on top of the intercepted app.
pub trait InterstitialLauncher: Send + Sync {
    fn launch(&self, request: InterstitialRequest) -> Result<()>;
}

/// Launcher that hands requests to whoever owns the receiving end: the
/// headless host, or a platform shell bridging to its own UI.
#[derive(Clone)]
pub struct ChannelLauncher {
    tx: mpsc::UnboundedSender<InterstitialRequest>,
}

impl ChannelLauncher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InterstitialRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl InterstitialLauncher for ChannelLauncher {
    fn launch(&self, request: InterstitialRequest) -> Result<()> {
        self.tx
            .send(request)
            .map_err(|_| anyhow!("interstitial surface channel closed"))
    }
}

pub struct Dispatcher {
    launcher: Arc<dyn InterstitialLauncher>,
    recent_opens: RecentOpens,
}

impl Dispatcher {
    pub fn new(launcher: Arc<dyn InterstitialLauncher>, recent_opens: RecentOpens) -> Self {
        Self {
            launcher,
            recent_opens,
        }
    }

    pub fn recent_opens(&self) -> &RecentOpens {
        &self.recent_opens
    }

    pub fn dispatch(&self, interception: &Interception) -> Result<Uuid> {
        let local = interception
            .ticket
            .dispatched_at
            .with_timezone(&Local)
            .naive_local();
        self.dispatch_at(interception, local)
    }

    /// Launches the surface. `local_time` is the wall-clock time the
    /// schedule is evaluated against.
    pub fn dispatch_at(&self, interception: &Interception, local_time: NaiveDateTime) -> Result<Uuid> {
        let app = &interception.app;
        let now = interception.ticket.dispatched_at;
        let hard_block = is_app_blocking(app, &local_time);

        let (counts_tx, escalation) = EscalationFeed::pending();
        let instance_id = Uuid::new_v4();

        let request = InterstitialRequest {
            instance_id,
            ticket: interception.ticket.clone(),
            identifier: app.identifier.clone(),
            display_name: app.display_name.clone(),
            challenge_mode: app.challenge_mode,
            hard_block,
            requested_at: now,
            escalation,
        };

        // Launch first; counting must never delay the surface.
        let launched = self.launcher.launch(request);
        self.spawn_enrichment(app.identifier.clone(), now, counts_tx);
        launched?;

        log_info!(
            "Dispatched interstitial {} for {} (mode={}, hard_block={})",
            instance_id,
            app.identifier,
            app.challenge_mode,
            hard_block
        );
        Ok(instance_id)
    }

    fn spawn_enrichment(
        &self,
        identifier: String,
        now: DateTime<Utc>,
        counts_tx: watch::Sender<Option<OpenCounts>>,
    ) {
        let opens = self.recent_opens.clone();
        let enrich = move || {
            let counts = OpenCounts {
                opens_today: count_u32(opens.count_since(&identifier, start_of_local_day(now))),
                opens_last_hour: count_u32(opens.count_since(&identifier, one_hour_before(now))),
            };
            opens.record_open(&identifier, now);
            log_debug!(
                "Open counts for {}: today={}, last_hour={}",
                identifier,
                counts.opens_today,
                counts.opens_last_hour
            );
            // Nobody listening is fine: the surface may already be gone.
            let _ = counts_tx.send(Some(counts));
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { enrich() });
            }
            Err(_) => enrich(),
        }
    }
}

fn count_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{ActiveDays, Schedule, TrackedApp};
    use chrono::{Duration, NaiveDate, TimeZone};

    struct FailingLauncher;

    impl InterstitialLauncher for FailingLauncher {
        fn launch(&self, _request: InterstitialRequest) -> Result<()> {
            Err(anyhow!("surface unavailable"))
        }
    }

    fn interception(app: TrackedApp, at: DateTime<Utc>) -> Interception {
        Interception {
            ticket: DispatchTicket {
                identifier: app.identifier.clone(),
                dispatched_at: at,
                sequence: 1,
            },
            app,
        }
    }

    fn monday_at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 15, 0)
            .unwrap()
    }

    fn scheduled_app() -> TrackedApp {
        TrackedApp::new("com.feed", "Feed").with_schedule(Schedule {
            enabled: true,
            start_hour: 9,
            end_hour: 17,
            days: ActiveDays::WEEKDAYS,
        })
    }

    #[tokio::test]
    async fn request_carries_everything_needed_to_render() {
        let (launcher, mut rx) = ChannelLauncher::new();
        let dispatcher = Dispatcher::new(Arc::new(launcher), RecentOpens::new());
        let app = TrackedApp::new("com.feed", "Feed").with_mode(ChallengeMode::TypedPhrase);

        let id = dispatcher
            .dispatch_at(&interception(app, Utc::now()), monday_at(10))
            .unwrap();

        let request = rx.recv().await.unwrap();
        assert_eq!(request.instance_id, id);
        assert_eq!(request.identifier, "com.feed");
        assert_eq!(request.display_name, "Feed");
        assert_eq!(request.challenge_mode, ChallengeMode::TypedPhrase);
        assert!(!request.hard_block);
    }

    #[tokio::test]
    async fn hard_block_is_computed_at_dispatch_time() {
        let (launcher, mut rx) = ChannelLauncher::new();
        let dispatcher = Dispatcher::new(Arc::new(launcher), RecentOpens::new());

        dispatcher
            .dispatch_at(&interception(scheduled_app(), Utc::now()), monday_at(10))
            .unwrap();
        assert!(rx.recv().await.unwrap().hard_block);

        dispatcher
            .dispatch_at(&interception(scheduled_app(), Utc::now()), monday_at(18))
            .unwrap();
        assert!(!rx.recv().await.unwrap().hard_block);
    }

    #[tokio::test]
    async fn counts_arrive_late_and_exclude_the_current_open() {
        let (launcher, mut rx) = ChannelLauncher::new();
        let opens = RecentOpens::new();
        let dispatcher = Dispatcher::new(Arc::new(launcher), opens.clone());
        let now = Utc::now();

        opens.record_open("com.feed", now - Duration::minutes(10));
        opens.record_open("com.feed", now - Duration::minutes(5));

        dispatcher
            .dispatch_at(&interception(scheduled_app(), now), monday_at(20))
            .unwrap();

        let mut request = rx.recv().await.unwrap();
        let counts = request.escalation.ready().await.unwrap();
        assert_eq!(counts.opens_last_hour, 2);
        assert!(counts.opens_today <= 2);
        assert_eq!(opens.count_since("com.feed", now), 1);
    }

    #[test]
    fn enrichment_runs_inline_without_a_runtime() {
        let (launcher, mut rx) = ChannelLauncher::new();
        let opens = RecentOpens::new();
        let dispatcher = Dispatcher::new(Arc::new(launcher), opens.clone());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        dispatcher
            .dispatch_at(&interception(scheduled_app(), now), monday_at(20))
            .unwrap();

        let request = rx.try_recv().unwrap();
        assert_eq!(request.escalation.latest(), Some(OpenCounts::default()));
        assert_eq!(opens.stored("com.feed"), 1);
    }

    #[test]
    fn feed_falls_back_to_defaults() {
        let (tx, feed) = EscalationFeed::pending();
        assert_eq!(feed.current_or_default(), OpenCounts::default());
        tx.send(Some(OpenCounts {
            opens_today: 3,
            opens_last_hour: 1,
        }))
        .unwrap();
        assert_eq!(feed.current_or_default().opens_today, 3);
    }

    #[tokio::test]
    async fn feed_reports_none_when_producer_vanishes() {
        let (tx, mut feed) = EscalationFeed::pending();
        drop(tx);
        assert_eq!(feed.ready().await, None);
    }

    #[test]
    fn launch_failure_is_reported_but_the_open_is_still_counted() {
        let opens = RecentOpens::new();
        let dispatcher = Dispatcher::new(Arc::new(FailingLauncher), opens.clone());

        let result = dispatcher.dispatch_at(&interception(scheduled_app(), Utc::now()), monday_at(10));
        assert!(result.is_err());
        assert_eq!(opens.stored("com.feed"), 1);
    }
}
