//! Configuration and statistics commands.
//!
//! Errors are flattened to strings at this boundary so any front end (the
//! headless host, a platform shell) can show them as-is.

use chrono::Utc;
use serde::Serialize;

use crate::{
    db::models::{tracked_app::validation, ChallengeMode, DailyStat, TrackedApp},
    AppState,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub time_saved_today_ms: u64,
    pub weekly: Vec<DailyStat>,
}

pub async fn list_tracked_apps(state: &AppState) -> Result<Vec<TrackedApp>, String> {
    state
        .db
        .get_all_tracked_apps()
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_tracked_app(
    state: &AppState,
    identifier: String,
) -> Result<Option<TrackedApp>, String> {
    state
        .db
        .get_tracked_app(identifier)
        .await
        .map_err(|e| e.to_string())
}

/// Adds or replaces a tracked app. High-friction modes need premium.
pub async fn track_app(state: &AppState, app: TrackedApp) -> Result<TrackedApp, String> {
    let premium = state.settings.get().premium;
    validation::validate_challenge_assignment(app.challenge_mode, premium)
        .map_err(|e| e.to_string())?;

    state
        .db
        .upsert_tracked_app(app)
        .await
        .map_err(|e| e.to_string())
}

/// Starts tracking `identifier` with `mode`, or changes the mode of an app
/// already tracked. An existing app keeps its schedule and enabled flag, and
/// keeps its display name unless a new one is given.
pub async fn assign_challenge(
    state: &AppState,
    identifier: String,
    mode: ChallengeMode,
    display_name: Option<String>,
) -> Result<TrackedApp, String> {
    let app = match get_tracked_app(state, identifier.clone()).await? {
        Some(mut existing) => {
            existing.challenge_mode = mode;
            if let Some(name) = display_name {
                existing.display_name = name;
            }
            existing
        }
        None => {
            let name = display_name.unwrap_or_else(|| identifier.clone());
            TrackedApp::new(identifier, name).with_mode(mode)
        }
    };

    track_app(state, app).await
}

pub async fn set_app_enabled(
    state: &AppState,
    identifier: String,
    enabled: bool,
) -> Result<(), String> {
    state
        .db
        .set_tracked_app_enabled(identifier, enabled)
        .await
        .map_err(|e| e.to_string())
}

pub async fn untrack_app(state: &AppState, identifier: String) -> Result<(), String> {
    state
        .db
        .delete_tracked_app(identifier)
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_usage_stats(state: &AppState) -> Result<UsageStats, String> {
    let now = Utc::now();
    let db = &state.db;

    let time_saved_today_ms = db.time_saved_today(now).await.map_err(|e| e.to_string())?;
    let weekly = db.get_weekly_stats(now).await.map_err(|e| e.to_string())?;

    Ok(UsageStats {
        time_saved_today_ms,
        weekly,
    })
}

pub async fn set_premium(state: &AppState, premium: bool) -> Result<(), String> {
    state
        .settings
        .update_with(|settings| settings.premium = premium)
        .map(|_| ())
        .map_err(|e| e.to_string())
}
