use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{
        conversion_error, from_millis, parse_challenge_mode, to_i64, to_millis, to_u64,
    },
    models::{DailyStat, InterceptionRecord},
    Database,
};
use crate::utils::time::start_of_local_day;

fn row_to_record(row: &Row) -> Result<InterceptionRecord, rusqlite::Error> {
    let timestamp_ms: i64 = row.get("timestamp_ms")?;
    let duration_ms: i64 = row.get("time_on_interstitial_ms")?;
    let challenge_mode: String = row.get("challenge_mode")?;

    Ok(InterceptionRecord {
        id: Some(row.get("id")?),
        identifier: row.get("identifier")?,
        timestamp: from_millis(timestamp_ms, "timestamp_ms").map_err(|e| conversion_error(2, e))?,
        was_allowed: row.get("was_allowed")?,
        time_on_interstitial_ms: to_u64(duration_ms, "time_on_interstitial_ms")
            .map_err(|e| conversion_error(4, e))?,
        challenge_mode: parse_challenge_mode(&challenge_mode)
            .map_err(|e| conversion_error(5, e))?,
    })
}

impl Database {
    pub async fn insert_interception(&self, record: &InterceptionRecord) -> Result<i64> {
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO interception_events
                     (identifier, timestamp_ms, was_allowed, time_on_interstitial_ms, challenge_mode)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.identifier,
                    to_millis(record.timestamp),
                    record.was_allowed,
                    to_i64(record.time_on_interstitial_ms)?,
                    record.challenge_mode.as_str(),
                ],
            )
            .context("failed to insert interception event")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Interceptions of `identifier` at or after `cutoff`.
    pub async fn count_interceptions_since(
        &self,
        identifier: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u32> {
        let identifier = identifier.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM interception_events
                 WHERE identifier = ?1 AND timestamp_ms >= ?2",
                params![identifier, to_millis(cutoff)],
                |row| row.get(0),
            )?;
            Ok(u32::try_from(count).unwrap_or(u32::MAX))
        })
        .await
    }

    /// Total time spent on interstitials since `cutoff`, optionally only for
    /// flows that ended without letting the user in ("time saved").
    pub async fn sum_interstitial_duration_since(
        &self,
        cutoff: DateTime<Utc>,
        only_denied: bool,
    ) -> Result<u64> {
        self.execute(move |conn| {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(time_on_interstitial_ms), 0) FROM interception_events
                 WHERE timestamp_ms >= ?1 AND (?2 = 0 OR was_allowed = 0)",
                params![to_millis(cutoff), only_denied],
                |row| row.get(0),
            )?;
            to_u64(total, "time_on_interstitial_ms")
        })
        .await
    }

    /// Retention purge. Returns the number of deleted rows.
    pub async fn delete_interceptions_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM interception_events WHERE timestamp_ms < ?1",
                    params![to_millis(cutoff)],
                )
                .context("failed to purge interception events")?;
            Ok(deleted)
        })
        .await
    }

    pub async fn get_interceptions_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<InterceptionRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, identifier, timestamp_ms, was_allowed, time_on_interstitial_ms, challenge_mode
                 FROM interception_events
                 WHERE timestamp_ms >= ?1
                 ORDER BY timestamp_ms DESC",
            )?;

            let records = stmt
                .query_map(params![to_millis(cutoff)], row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(records)
        })
        .await
    }

    pub async fn time_saved_today(&self, now: DateTime<Utc>) -> Result<u64> {
        self.sum_interstitial_duration_since(start_of_local_day(now), true)
            .await
    }

    /// Seven local calendar days ending today, oldest first.
    pub async fn get_weekly_stats(&self, now: DateTime<Utc>) -> Result<Vec<DailyStat>> {
        let today = start_of_local_day(now);
        let week_start = today - Duration::days(6);
        let records = self.get_interceptions_since(week_start).await?;

        let stats = (0..7u32)
            .rev()
            .map(|days_ago| {
                let day_start = today - Duration::days(i64::from(days_ago));
                let day_end = day_start + Duration::days(1);
                let in_day = records
                    .iter()
                    .filter(|r| r.timestamp >= day_start && r.timestamp < day_end);

                let mut stat = DailyStat {
                    days_ago,
                    open_count: 0,
                    time_saved_ms: 0,
                };
                for record in in_day {
                    stat.open_count += 1;
                    if !record.was_allowed {
                        stat.time_saved_ms += record.time_on_interstitial_ms;
                    }
                }
                stat
            })
            .collect();

        Ok(stats)
    }
}
