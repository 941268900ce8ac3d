use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::db::{models::TrackedApp, Database};

/// Warm in-memory projection of the enabled tracked apps.
///
/// The classifier reads it synchronously on every foreground event; a
/// background task keeps it in sync with the configuration store. Until the
/// first load completes the cache is cold and every lookup misses.
#[derive(Clone, Default)]
pub struct TrackedAppCache {
    inner: Arc<RwLock<Option<HashMap<String, TrackedApp>>>>,
}

impl TrackedAppCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole projection. Disabled apps are dropped.
    pub fn replace(&self, apps: Vec<TrackedApp>) {
        let projection: HashMap<String, TrackedApp> = apps
            .into_iter()
            .filter(|app| app.enabled)
            .map(|app| (app.identifier.clone(), app))
            .collect();

        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(projection);
    }

    pub fn lookup(&self, identifier: &str) -> Option<TrackedApp> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().and_then(|apps| apps.get(identifier).cloned())
    }

    pub fn is_warm(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps `cache` in sync with the enabled tracked apps until cancelled.
pub async fn sync_tracked_app_cache(
    db: Database,
    cache: TrackedAppCache,
    cancel_token: CancellationToken,
) {
    let mut changes = db.subscribe_tracked_apps();

    loop {
        // Mark the current revision seen before reading so a write that lands
        // during the query still triggers another pass.
        changes.borrow_and_update();

        match db.get_enabled_tracked_apps().await {
            Ok(apps) => {
                cache.replace(apps);
                debug!("Tracked app cache updated: {} apps", cache.len());
            }
            Err(err) => warn!("Failed to refresh tracked app cache: {err:?}"),
        }

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    info!("Tracked app change feed closed; cache sync stopping");
                    break;
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Tracked app cache sync shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_database;
    use std::time::Duration;

    #[test]
    fn cold_cache_misses_everything() {
        let cache = TrackedAppCache::new();
        assert!(!cache.is_warm());
        assert!(cache.lookup("com.a").is_none());
    }

    #[test]
    fn replace_keeps_only_enabled_apps() {
        let cache = TrackedAppCache::new();
        let mut disabled = TrackedApp::new("com.b", "B");
        disabled.enabled = false;

        cache.replace(vec![TrackedApp::new("com.a", "A"), disabled]);

        assert!(cache.is_warm());
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("com.a").is_some());
        assert!(cache.lookup("com.b").is_none());
    }

    async fn wait_for(cache: &TrackedAppCache, predicate: impl Fn(&TrackedAppCache) -> bool) {
        for _ in 0..100 {
            if predicate(cache) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("cache never reached the expected state");
    }

    #[tokio::test]
    async fn sync_task_follows_store_writes() {
        let (db, _dir) = temp_database();
        let cache = TrackedAppCache::new();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(sync_tracked_app_cache(
            db.clone(),
            cache.clone(),
            cancel.clone(),
        ));

        wait_for(&cache, |c| c.is_warm()).await;
        assert!(cache.is_empty());

        db.upsert_tracked_app(TrackedApp::new("com.a", "A")).await.unwrap();
        wait_for(&cache, |c| c.lookup("com.a").is_some()).await;

        db.set_tracked_app_enabled("com.a".into(), false).await.unwrap();
        wait_for(&cache, |c| c.lookup("com.a").is_none()).await;

        cancel.cancel();
        handle.await.unwrap();
    }
}
