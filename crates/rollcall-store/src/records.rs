//! SQLite record store for enrolled students.
//!
//! One row per student: identifier (primary key), display name and the
//! super embedding as raw little-endian f32 bytes.

use rollcall_core::{Embedding, EnrolledPerson};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::StoreError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS students (
        prnno TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        embedding BLOB NOT NULL
    )";

/// Handle to the student table. Open it, use it, drop it.
pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    /// Open (or create) the store at `path`, creating parent directories and
    /// the schema as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), "record store opened");
        Ok(Self { conn })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert a student, or overwrite name and embedding if the identifier exists.
    pub fn upsert(&self, person: &EnrolledPerson) -> Result<(), StoreError> {
        if person.id.trim().is_empty() {
            return Err(StoreError::EmptyIdentifier);
        }
        self.conn.execute(
            "INSERT INTO students (prnno, name, embedding) VALUES (?1, ?2, ?3)
             ON CONFLICT(prnno) DO UPDATE SET name = excluded.name, embedding = excluded.embedding",
            params![person.id, person.name, person.embedding.to_le_bytes()],
        )?;
        tracing::info!(id = %person.id, name = %person.name, dim = person.embedding.dim(), "student upserted");
        Ok(())
    }

    /// Every enrolled student, in insertion order.
    ///
    /// Upserting an existing identifier keeps its original position.
    pub fn all(&self) -> Result<Vec<EnrolledPerson>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT prnno, name, embedding FROM students ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut people = Vec::new();
        for row in rows {
            let (id, name, blob) = row?;
            people.push(decode(id, name, &blob)?);
        }
        Ok(people)
    }

    pub fn get(&self, id: &str) -> Result<Option<EnrolledPerson>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT name, embedding FROM students WHERE prnno = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()?;

        row.map(|(name, blob)| decode(id.to_string(), name, &blob))
            .transpose()
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn decode(id: String, name: String, blob: &[u8]) -> Result<EnrolledPerson, StoreError> {
    let embedding = Embedding::from_le_bytes(blob).map_err(|source| StoreError::CorruptEmbedding {
        id: id.clone(),
        source,
    })?;
    Ok(EnrolledPerson { id, name, embedding })
}
