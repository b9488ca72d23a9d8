//! Schema for the libSQL itinerary store: places, itineraries and their
//! ordered stops, plus the index behind the backlog count.
//!
//! Applied versions are recorded in `_migrations`; opening a store applies
//! whatever is newer.

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
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS places (
                id INTEGER PRIMARY KEY,
                country TEXT NOT NULL,
                region TEXT,
                province TEXT,
                city TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS itineraries (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                session_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'QUEUED',
                created_at TEXT NOT NULL,
                updated_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_itineraries_session ON itineraries(session_id);
            CREATE INDEX IF NOT EXISTS idx_itineraries_status ON itineraries(status);

            CREATE TABLE IF NOT EXISTS itinerary_stops (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                itinerary_id TEXT NOT NULL REFERENCES itineraries(id) ON DELETE CASCADE,
                place_id INTEGER NOT NULL REFERENCES places(id),
                order_index INTEGER NOT NULL,
                is_current_stop INTEGER NOT NULL DEFAULT 0,
                UNIQUE (itinerary_id, order_index)
            );
            CREATE INDEX IF NOT EXISTS idx_itinerary_stops_itinerary
                ON itinerary_stops(itinerary_id);
        "#,
    },
    Migration {
        version: 2,
        name: "backlog_reference_index",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_itineraries_reference
                ON itineraries(COALESCE(updated_at, created_at));
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
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

    tracing::debug!(
        version = get_current_version(conn).await?,
        "Database migrations complete"
    );
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
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
