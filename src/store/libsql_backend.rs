//! libSQL backend: async `Ledger` trait implementation.
//!
//! Supports local file and in-memory databases. Dedup lookups hit the
//! `(candidate_id, message_id)` primary key of `processing_records`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{Candidate, CategoryCount, ProcessingRecord};
use crate::store::migrations;
use crate::store::traits::{Ledger, RecordWrite};

/// libSQL ledger backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Ledger opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn row_to_candidate(row: &libsql::Row) -> Result<Candidate, libsql::Error> {
    Ok(Candidate {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        credential_ref: row.get(3)?,
    })
}

/// Column order matches COUNT_COLUMNS.
fn row_to_counts(row: &libsql::Row) -> Result<CategoryCount, libsql::Error> {
    let tally = |idx: i32| -> Result<u32, libsql::Error> {
        let n: i64 = row.get(idx)?;
        Ok(u32::try_from(n).unwrap_or(0))
    };
    let updated: String = row.get(8)?;

    Ok(CategoryCount {
        candidate_id: row.get(0)?,
        candidate_name: row.get(1)?,
        candidate_address: row.get(2)?,
        application: tally(3)?,
        interview: tally(4)?,
        offer: tally(5)?,
        rejection: tally(6)?,
        other: tally(7)?,
        last_updated: parse_datetime(&updated),
    })
}

const CANDIDATE_COLUMNS: &str = "id, name, address, credential_ref";

const COUNT_COLUMNS: &str = "cc.candidate_id, COALESCE(c.name, ''), COALESCE(c.address, ''), \
     cc.application, cc.interview, cc.offer, cc.rejection, cc.other, cc.last_updated";

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Ledger for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Roster ──────────────────────────────────────────────────────

    async fn add_candidate(
        &self,
        name: &str,
        address: &str,
        credential_ref: &str,
    ) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        self.conn()
            .execute(
                "INSERT INTO candidates (id, position, name, address, credential_ref)
                 VALUES (?1, (SELECT COALESCE(MAX(position), 0) + 1 FROM candidates), ?2, ?3, ?4)",
                params![id.clone(), name, address, credential_ref],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_candidate: {e}")))?;

        debug!(id = %id, address = address, "Candidate added to roster");
        Ok(id)
    }

    async fn list_candidates(&self, limit: usize) -> Result<Vec<Candidate>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CANDIDATE_COLUMNS} FROM candidates ORDER BY position ASC LIMIT ?1"),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_candidates: {e}")))?;

        let mut candidates = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_candidates: {e}")))?
        {
            let candidate = row_to_candidate(&row)
                .map_err(|e| DatabaseError::Query(format!("list_candidates row parse: {e}")))?;
            candidates.push(candidate);
        }
        Ok(candidates)
    }

    // ── Records & counts ────────────────────────────────────────────

    async fn has_record(
        &self,
        candidate_id: &str,
        message_id: &str,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM processing_records WHERE candidate_id = ?1 AND message_id = ?2",
                params![candidate_id, message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_record: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("has_record: {e}")))?;
        Ok(row.is_some())
    }

    async fn upsert_record_and_count(
        &self,
        record: &ProcessingRecord,
    ) -> Result<RecordWrite, DatabaseError> {
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_record_and_count begin: {e}")))?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO processing_records (candidate_id, message_id, category,
                    received_at, response_present, subject, sender, processed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.candidate_id.as_str(),
                    record.message_id.as_str(),
                    record.category.label(),
                    record.received_at.to_rfc3339(),
                    i64::from(record.response_present),
                    record.subject.as_str(),
                    record.sender.as_str(),
                    record.processed_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_record_and_count insert: {e}")))?;

        if inserted == 0 {
            tx.rollback()
                .await
                .map_err(|e| DatabaseError::Query(format!("upsert_record_and_count rollback: {e}")))?;
            debug!(
                candidate = %record.candidate_id,
                message_id = %record.message_id,
                "Record already present, count untouched"
            );
            return Ok(RecordWrite::AlreadyRecorded);
        }

        let column = record.category.column();
        tx.execute(
            &format!(
                "INSERT INTO category_counts (candidate_id, {column}, last_updated) VALUES (?1, 1, ?2)
                 ON CONFLICT(candidate_id) DO UPDATE SET
                    {column} = {column} + 1,
                    last_updated = excluded.last_updated"
            ),
            params![record.candidate_id.as_str(), Utc::now().to_rfc3339()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_record_and_count count: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_record_and_count commit: {e}")))?;

        debug!(
            candidate = %record.candidate_id,
            message_id = %record.message_id,
            category = %record.category,
            "Record stored and count incremented"
        );
        Ok(RecordWrite::Inserted)
    }

    async fn get_counts(&self, candidate_id: &str) -> Result<Option<CategoryCount>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {COUNT_COLUMNS} FROM category_counts cc
                     LEFT JOIN candidates c ON c.id = cc.candidate_id
                     WHERE cc.candidate_id = ?1"
                ),
                params![candidate_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_counts: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let counts = row_to_counts(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_counts row parse: {e}")))?;
                Ok(Some(counts))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_counts: {e}"))),
        }
    }

    async fn list_counts(&self) -> Result<Vec<CategoryCount>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {COUNT_COLUMNS} FROM category_counts cc
                     LEFT JOIN candidates c ON c.id = cc.candidate_id
                     ORDER BY c.position ASC, cc.candidate_id ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_counts: {e}")))?;

        let mut counts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_counts: {e}")))?
        {
            let count = row_to_counts(&row)
                .map_err(|e| DatabaseError::Query(format!("list_counts row parse: {e}")))?;
            counts.push(count);
        }
        Ok(counts)
    }

    async fn count_records(&self, candidate_id: &str) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM processing_records WHERE candidate_id = ?1",
                params![candidate_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_records: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(u64::try_from(count).unwrap_or(0))
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_records: {e}"))),
        }
    }
}
