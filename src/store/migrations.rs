//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "applications",
        sql: r#"
            CREATE TABLE IF NOT EXISTS applications (
                id TEXT PRIMARY KEY,
                company TEXT NOT NULL,
                position TEXT NOT NULL,
                contact_email TEXT,
                applied_date TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'applied',
                response_received INTEGER NOT NULL DEFAULT 0,
                response_date TEXT,
                response_type TEXT,
                follow_ups_sent INTEGER NOT NULL DEFAULT 0 CHECK (follow_ups_sent >= 0),
                followup_sent INTEGER NOT NULL DEFAULT 0,
                last_follow_up TEXT,
                next_follow_up_scheduled TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_applications_status ON applications(status);
            CREATE INDEX IF NOT EXISTS idx_applications_followup ON applications(followup_sent);
        "#,
    },
    Migration {
        version: 2,
        name: "email_tracking",
        sql: r#"
            CREATE TABLE IF NOT EXISTS email_tracking (
                message_id TEXT PRIMARY KEY,
                application_id TEXT REFERENCES applications(id),
                from_address TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL,
                confidence REAL NOT NULL,
                action_required INTEGER NOT NULL DEFAULT 0,
                received_date TEXT NOT NULL,
                processed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_email_tracking_application
                ON email_tracking(application_id);
        "#,
    },
    Migration {
        version: 3,
        name: "dispatch_backoff",
        sql: r#"
            ALTER TABLE applications ADD COLUMN dispatch_attempts INTEGER NOT NULL DEFAULT 0;
            ALTER TABLE applications ADD COLUMN last_dispatch_error TEXT;
        "#,
    },
];

/// Apply every migration newer than the recorded version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
pub(crate) async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

/// Latest schema version known to this build.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}
