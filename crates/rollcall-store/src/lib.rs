//! rollcall-store — Persistence for enrolled students and attendance logs.
//!
//! Students live in a SQLite table keyed by identifier; attendance is
//! appended to one CSV file per session.

pub mod attendance;
pub mod records;

pub use attendance::{AttendanceEntry, AttendanceLog, AttendanceRecord, SessionTag, TIMESTAMP_FORMAT};
pub use records::RecordStore;

use rollcall_core::EmbeddingError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("student identifier must not be empty")]
    EmptyIdentifier,
    #[error("stored embedding for '{id}' is corrupt: {source}")]
    CorruptEmbedding {
        id: String,
        #[source]
        source: EmbeddingError,
    },
}

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}
