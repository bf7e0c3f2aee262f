//! Per-session attendance logs.
//!
//! One CSV file per (subject, class, department, year). The header row is
//! written once, when the file is created; every later call only appends.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::AttendanceError;

/// Timestamp layout used in the log, e.g. `2024-03-07 09:15:00`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Session routing tags. Free-form; only used to pick the log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTag {
    pub subject: String,
    pub class_no: String,
    pub department: String,
    pub year: String,
}

impl SessionTag {
    pub fn new(
        subject: impl Into<String>,
        class_no: impl Into<String>,
        department: impl Into<String>,
        year: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            class_no: class_no.into(),
            department: department.into(),
            year: year.into(),
        }
    }

    fn file_name(&self) -> String {
        format!(
            "attendance_{}_{}_{}_{}.csv",
            path_safe(&self.subject),
            path_safe(&self.class_no),
            path_safe(&self.department),
            path_safe(&self.year),
        )
    }
}

/// Keep tag values inside the log directory.
fn path_safe(tag: &str) -> String {
    tag.replace(['/', '\\'], "-")
}

/// A matched student to be marked present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceEntry {
    pub id: String,
    pub name: String,
}

/// One row of an attendance log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "PRN No")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Class")]
    pub class_no: String,
    #[serde(rename = "Department")]
    pub department: String,
    #[serde(rename = "Year")]
    pub year: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
}

/// Directory of session attendance logs.
#[derive(Debug, Clone)]
pub struct AttendanceLog {
    dir: PathBuf,
}

impl AttendanceLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Log file for a session.
    pub fn path_for(&self, session: &SessionTag) -> PathBuf {
        self.dir.join(session.file_name())
    }

    /// Append one row per entry, creating the log (with header) if needed.
    ///
    /// Returns the log path. An empty `entries` slice leaves the filesystem
    /// untouched.
    pub fn append(
        &self,
        session: &SessionTag,
        entries: &[AttendanceEntry],
        at: NaiveDateTime,
    ) -> Result<PathBuf, AttendanceError> {
        let path = self.path_for(session);
        if entries.is_empty() {
            return Ok(path);
        }

        std::fs::create_dir_all(&self.dir)?;
        let is_new = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        // The csv writer emits the header before the first serialized row.
        let mut writer = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
        let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
        for entry in entries {
            writer.serialize(AttendanceRecord {
                id: entry.id.clone(),
                name: entry.name.clone(),
                subject: session.subject.clone(),
                class_no: session.class_no.clone(),
                department: session.department.clone(),
                year: session.year.clone(),
                timestamp: timestamp.clone(),
            })?;
        }
        writer.flush()?;

        tracing::info!(
            path = %path.display(),
            rows = entries.len(),
            created = is_new,
            "attendance appended"
        );
        Ok(path)
    }

    /// Read back a session log. A session with no log yet has no rows.
    pub fn read(&self, session: &SessionTag) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        let path = self.path_for(session);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let records = reader.deserialize().collect::<Result<Vec<AttendanceRecord>, _>>()?;
        Ok(records)
    }
}
