use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Schema scripts in order; entry `i` upgrades `user_version` from `i` to `i + 1`.
const MIGRATIONS: &[(&str, &str)] = &[
    ("schema_v1.sql", include_str!("schemas/schema_v1.sql")),
    ("schema_v2.sql", include_str!("schemas/schema_v2.sql")),
];

fn target_version() -> i32 {
    MIGRATIONS.len() as i32
}

/// Brings the schema up to date inside a single transaction.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let current: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;
    let target = target_version();

    if current > target {
        bail!("database schema v{current} is newer than this build understands (v{target})");
    }
    if current == target {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    for (name, sql) in MIGRATIONS.iter().skip(current.max(0) as usize) {
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply {name}"))?;
    }

    tx.pragma_update(None, "user_version", target)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    log::info!("Database schema migrated from v{current} to v{target}");
    Ok(())
}
