//! Ledger schema, versioned. `_migrations` records which steps ran.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version; append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS candidates (
                id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                address TEXT NOT NULL UNIQUE,
                credential_ref TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_candidates_position ON candidates(position);

            CREATE TABLE IF NOT EXISTS processing_records (
                candidate_id TEXT NOT NULL REFERENCES candidates(id),
                message_id TEXT NOT NULL,
                category TEXT NOT NULL,
                received_at TEXT NOT NULL,
                response_present INTEGER NOT NULL DEFAULT 0,
                subject TEXT NOT NULL DEFAULT '',
                sender TEXT NOT NULL DEFAULT '',
                processed_at TEXT NOT NULL,
                PRIMARY KEY (candidate_id, message_id)
            );
            CREATE INDEX IF NOT EXISTS idx_records_category
                ON processing_records(candidate_id, category);
        "#,
    },
    Migration {
        version: 2,
        name: "category_counts",
        sql: r#"
            CREATE TABLE IF NOT EXISTS category_counts (
                candidate_id TEXT PRIMARY KEY REFERENCES candidates(id),
                application INTEGER NOT NULL DEFAULT 0,
                interview INTEGER NOT NULL DEFAULT 0,
                offer INTEGER NOT NULL DEFAULT 0,
                rejection INTEGER NOT NULL DEFAULT 0,
                other INTEGER NOT NULL DEFAULT 0,
                last_updated TEXT NOT NULL
            );
        "#,
    },
];

/// Bring the schema up to the latest version.
///
/// Each step runs in its own transaction together with its `_migrations`
/// row, so a crash never leaves a half-applied version behind.
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
    .map_err(|e| DatabaseError::Migration(format!("create _migrations: {e}")))?;

    let applied = schema_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        tracing::debug!(version = applied, "Ledger schema up to date");
        return Ok(());
    }

    for migration in pending {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying ledger migration"
        );
        apply(conn, migration).await?;
    }
    Ok(())
}

async fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |step: &str, e: libsql::Error| {
        DatabaseError::Migration(format!(
            "V{} {} {step}: {e}",
            migration.version, migration.name
        ))
    };

    let tx = conn.transaction().await.map_err(|e| failed("begin", e))?;
    tx.execute_batch(migration.sql)
        .await
        .map_err(|e| failed("sql", e))?;
    tx.execute(
        "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![migration.version, migration.name],
    )
    .await
    .map_err(|e| failed("record", e))?;
    tx.commit().await.map_err(|e| failed("commit", e))
}

/// Highest applied version, 0 on a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let read_failed = |e: libsql::Error| DatabaseError::Migration(format!("read version: {e}"));

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(read_failed)?;
    match rows.next().await.map_err(read_failed)? {
        Some(row) => row.get::<i64>(0).map_err(read_failed),
        None => Ok(0),
    }
}
