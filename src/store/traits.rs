//! `Ledger` trait: the candidate roster plus processing records and counts.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::pipeline::types::{Candidate, CategoryCount, ProcessingRecord};

/// Result of handing a record to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordWrite {
    /// Record inserted and the candidate's count incremented.
    Inserted,
    /// A record for this `(candidate_id, message_id)` already existed.
    /// Nothing changed.
    AlreadyRecorded,
}

/// Backend-agnostic persistence for the triage run.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Create tables and apply pending migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Roster ──────────────────────────────────────────────────────

    /// Add a candidate to the roster. Returns the generated id.
    async fn add_candidate(
        &self,
        name: &str,
        address: &str,
        credential_ref: &str,
    ) -> Result<String, DatabaseError>;

    /// Candidates in roster order, at most `limit`.
    async fn list_candidates(&self, limit: usize) -> Result<Vec<Candidate>, DatabaseError>;

    // ── Records & counts ────────────────────────────────────────────

    /// Whether a record exists for this dedup key.
    async fn has_record(&self, candidate_id: &str, message_id: &str)
    -> Result<bool, DatabaseError>;

    /// Insert the record and increment the candidate's count for its
    /// category, creating the count row on first use. Both happen in one
    /// transaction, and a second call with the same key changes nothing.
    async fn upsert_record_and_count(
        &self,
        record: &ProcessingRecord,
    ) -> Result<RecordWrite, DatabaseError>;

    /// Category counts for one candidate, `None` before the first record.
    async fn get_counts(&self, candidate_id: &str) -> Result<Option<CategoryCount>, DatabaseError>;

    /// Category counts for every candidate that has at least one record.
    async fn list_counts(&self) -> Result<Vec<CategoryCount>, DatabaseError>;

    /// Number of processing records stored for a candidate.
    async fn count_records(&self, candidate_id: &str) -> Result<u64, DatabaseError>;
}
