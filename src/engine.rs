use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    db::Database,
    interception::{
        sync_tracked_app_cache, AllowList, ChannelLauncher, Dispatcher, ForegroundClassifier,
        ForegroundEvent, InterceptionController, InterstitialRequest, RecentOpens,
        TrackedAppCache,
    },
    interstitial::InterstitialArbiter,
    settings::SettingsStore,
    AppState,
};

/// The running interception engine: shared state plus the background tasks
/// that keep it moving (cache sync and the serialized event loop).
pub struct Engine {
    state: Arc<AppState>,
    events: mpsc::UnboundedSender<ForegroundEvent>,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Wires everything up and starts the background tasks. The returned
    /// receiver yields a request every time an interstitial must be shown.
    pub async fn start(
        db: Database,
        settings: SettingsStore,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InterstitialRequest>)> {
        let config = settings.get();

        purge_expired_events(&db, config.retention_days, Utc::now()).await;

        let allow_list = AllowList::with_grace(config.grace());
        let recent_opens = RecentOpens::new();
        let cache = TrackedAppCache::new();
        let tracked = db
            .get_enabled_tracked_apps()
            .await
            .context("failed to load tracked apps")?;
        info!("Loaded {} tracked apps", tracked.len());
        cache.replace(tracked);

        let classifier = ForegroundClassifier::new(
            config.surface_identity(),
            allow_list.clone(),
            cache.clone(),
        )
        .with_debounce(config.debounce());
        let (launcher, requests) = ChannelLauncher::new();
        let dispatcher = Dispatcher::new(Arc::new(launcher), recent_opens.clone());
        let controller =
            InterceptionController::new(classifier, dispatcher).with_timing(config.failsafe_timing());

        let (resolutions_tx, resolutions_rx) = mpsc::unbounded_channel();
        let arbiter = InterstitialArbiter::new(allow_list.clone(), Some(db.clone()), resolutions_tx);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();

        let tasks = vec![
            tokio::spawn(sync_tracked_app_cache(
                db.clone(),
                cache.clone(),
                cancel_token.clone(),
            )),
            controller.spawn_event_loop(events_rx, resolutions_rx, cancel_token.clone()),
        ];

        let state = Arc::new(AppState {
            db,
            settings,
            allow_list,
            cache,
            recent_opens,
            controller,
            arbiter,
        });

        Ok((
            Self {
                state,
                events: events_tx,
                cancel_token,
                tasks,
            },
            requests,
        ))
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Feeds one foreground-change signal into the engine.
    pub fn submit(&self, identifier: impl Into<String>, timestamp: DateTime<Utc>) -> Result<()> {
        self.events
            .send(ForegroundEvent::new(identifier, timestamp))
            .map_err(|_| anyhow!("interception event loop has stopped"))
    }

    pub fn event_sender(&self) -> mpsc::UnboundedSender<ForegroundEvent> {
        self.events.clone()
    }

    pub async fn shutdown(self) -> Result<()> {
        self.cancel_token.cancel();
        for task in self.tasks {
            task.await.context("engine task failed to join")?;
        }
        info!("Engine stopped");
        Ok(())
    }
}

async fn purge_expired_events(db: &Database, retention_days: u32, now: DateTime<Utc>) {
    if retention_days == 0 {
        return;
    }

    // A retention reaching past the earliest representable time keeps everything.
    let Some(cutoff) = Duration::try_days(i64::from(retention_days))
        .and_then(|keep| now.checked_sub_signed(keep))
    else {
        return;
    };
    match db.delete_interceptions_older_than(cutoff).await {
        Ok(0) => {}
        Ok(deleted) => info!("Purged {deleted} interception events older than {retention_days} days"),
        Err(err) => warn!("Failed to purge old interception events: {err:?}"),
    }
}
