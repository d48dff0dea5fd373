//! Persistence layer: libSQL-backed roster, processing records and counts.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Ledger, RecordWrite};
