use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    helpers::{conversion_error, parse_active_days, parse_challenge_mode, to_hour},
    models::{tracked_app::validation, Schedule, TrackedApp},
    Database,
};

const TRACKED_APP_COLUMNS: &str = "identifier, display_name, enabled, challenge_mode,
     schedule_enabled, schedule_start_hour, schedule_end_hour, schedule_days";

fn row_to_tracked_app(row: &Row) -> Result<TrackedApp, rusqlite::Error> {
    let challenge_mode: String = row.get("challenge_mode")?;
    let start_hour: i64 = row.get("schedule_start_hour")?;
    let end_hour: i64 = row.get("schedule_end_hour")?;
    let days: String = row.get("schedule_days")?;

    Ok(TrackedApp {
        identifier: row.get("identifier")?,
        display_name: row.get("display_name")?,
        enabled: row.get("enabled")?,
        challenge_mode: parse_challenge_mode(&challenge_mode)
            .map_err(|e| conversion_error(3, e))?,
        schedule: Schedule {
            enabled: row.get("schedule_enabled")?,
            start_hour: to_hour(start_hour, "schedule_start_hour")
                .map_err(|e| conversion_error(5, e))?,
            end_hour: to_hour(end_hour, "schedule_end_hour")
                .map_err(|e| conversion_error(6, e))?,
            days: parse_active_days(&days).map_err(|e| conversion_error(7, e))?,
        },
    })
}

impl Database {
    /// Enabled tracked apps, the projection the interception cache mirrors.
    pub async fn get_enabled_tracked_apps(&self) -> Result<Vec<TrackedApp>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRACKED_APP_COLUMNS}
                 FROM tracked_apps
                 WHERE enabled = 1
                 ORDER BY display_name"
            ))?;

            let apps = stmt
                .query_map([], row_to_tracked_app)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(apps)
        })
        .await
    }

    pub async fn get_all_tracked_apps(&self) -> Result<Vec<TrackedApp>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRACKED_APP_COLUMNS}
                 FROM tracked_apps
                 ORDER BY display_name"
            ))?;

            let apps = stmt
                .query_map([], row_to_tracked_app)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(apps)
        })
        .await
    }

    pub async fn get_tracked_app(&self, identifier: String) -> Result<Option<TrackedApp>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRACKED_APP_COLUMNS}
                 FROM tracked_apps
                 WHERE identifier = ?1"
            ))?;

            let result = stmt
                .query_row(params![identifier], row_to_tracked_app)
                .optional()?;

            Ok(result)
        })
        .await
    }

    /// Insert or update a tracked app by identifier.
    pub async fn upsert_tracked_app(&self, app: TrackedApp) -> Result<TrackedApp> {
        validation::validate_tracked_app(&app)?;

        let now = Utc::now().to_rfc3339();
        let saved = self
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO tracked_apps (identifier, display_name, enabled, challenge_mode,
                         schedule_enabled, schedule_start_hour, schedule_end_hour, schedule_days,
                         created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                     ON CONFLICT(identifier) DO UPDATE SET
                         display_name = excluded.display_name,
                         enabled = excluded.enabled,
                         challenge_mode = excluded.challenge_mode,
                         schedule_enabled = excluded.schedule_enabled,
                         schedule_start_hour = excluded.schedule_start_hour,
                         schedule_end_hour = excluded.schedule_end_hour,
                         schedule_days = excluded.schedule_days,
                         updated_at = excluded.updated_at",
                    params![
                        app.identifier,
                        app.display_name,
                        app.enabled,
                        app.challenge_mode.as_str(),
                        app.schedule.enabled,
                        i64::from(app.schedule.start_hour),
                        i64::from(app.schedule.end_hour),
                        app.schedule.days.to_db_string(),
                        now,
                    ],
                )?;

                let mut stmt = conn.prepare(&format!(
                    "SELECT {TRACKED_APP_COLUMNS}
                     FROM tracked_apps
                     WHERE identifier = ?1"
                ))?;
                let result = stmt.query_row(params![app.identifier], row_to_tracked_app)?;

                Ok(result)
            })
            .await?;

        self.notify_tracked_apps_changed();
        Ok(saved)
    }

    pub async fn set_tracked_app_enabled(&self, identifier: String, enabled: bool) -> Result<()> {
        let lookup = identifier.clone();
        let updated = self
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE tracked_apps
                     SET enabled = ?1,
                         updated_at = ?2
                     WHERE identifier = ?3",
                    params![enabled, Utc::now().to_rfc3339(), identifier],
                )?;
                Ok(updated)
            })
            .await?;

        if updated == 0 {
            bail!("no tracked app with identifier {lookup}");
        }

        self.notify_tracked_apps_changed();
        Ok(())
    }

    pub async fn delete_tracked_app(&self, identifier: String) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM tracked_apps WHERE identifier = ?1",
                params![identifier],
            )?;
            Ok(())
        })
        .await?;

        self.notify_tracked_apps_changed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::models::{ActiveDays, ChallengeMode, Schedule, TrackedApp};
    use crate::db::test_support::temp_database;

    #[tokio::test]
    async fn upsert_then_read_back() {
        let (db, _dir) = temp_database();

        let app = TrackedApp::new("com.example.feed", "Feed")
            .with_mode(ChallengeMode::Arithmetic)
            .with_schedule(Schedule {
                enabled: true,
                start_hour: 8,
                end_hour: 12,
                days: ActiveDays::ALL,
            });

        let saved = db.upsert_tracked_app(app.clone()).await.unwrap();
        assert_eq!(saved, app);

        let loaded = db
            .get_tracked_app("com.example.feed".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, app);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_row() {
        let (db, _dir) = temp_database();

        db.upsert_tracked_app(TrackedApp::new("com.example.feed", "Feed"))
            .await
            .unwrap();
        db.upsert_tracked_app(
            TrackedApp::new("com.example.feed", "Feed 2").with_mode(ChallengeMode::TypedPhrase),
        )
        .await
        .unwrap();

        let all = db.get_all_tracked_apps().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].display_name, "Feed 2");
        assert_eq!(all[0].challenge_mode, ChallengeMode::TypedPhrase);
    }

    #[tokio::test]
    async fn enabled_projection_excludes_disabled_apps() {
        let (db, _dir) = temp_database();

        db.upsert_tracked_app(TrackedApp::new("com.a", "A")).await.unwrap();
        db.upsert_tracked_app(TrackedApp::new("com.b", "B")).await.unwrap();
        db.set_tracked_app_enabled("com.b".into(), false).await.unwrap();

        let enabled = db.get_enabled_tracked_apps().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].identifier, "com.a");

        assert!(db
            .set_tracked_app_enabled("com.missing".into(), true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn writes_bump_the_subscription() {
        let (db, _dir) = temp_database();
        let mut rx = db.subscribe_tracked_apps();
        rx.borrow_and_update();

        db.upsert_tracked_app(TrackedApp::new("com.a", "A")).await.unwrap();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        db.delete_tracked_app("com.a".into()).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(db.get_tracked_app("com.a".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_apps_are_rejected_before_write() {
        let (db, _dir) = temp_database();
        assert!(db.upsert_tracked_app(TrackedApp::new("", "Nameless")).await.is_err());
        assert!(db.get_all_tracked_apps().await.unwrap().is_empty());
    }
}
