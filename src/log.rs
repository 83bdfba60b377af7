use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};
use std::fs::{OpenOptions, File};
use std::io::{BufReader, BufWriter, Write, BufRead};
use anyhow::{Result, Context};
use chrono::Utc;
use uuid::Uuid;

use crate::command::{Role, TransferStats};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SessionRecord {
    pub timestamp: String,
    pub session_id: String,
    pub role: Role,
    pub target: PathBuf,
    pub status: SessionStatus,
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
    pub error: Option<String>,
}

impl SessionRecord {
    pub fn new(role: Role, target: &Path, outcome: &crate::Result<TransferStats>) -> Self {
        let (status, stats, error) = match outcome {
            Ok(stats) => (SessionStatus::Completed, *stats, None),
            Err(e) => (SessionStatus::Failed, TransferStats::default(), Some(e.to_string())),
        };
        SessionRecord {
            timestamp: Utc::now().to_rfc3339(),
            session_id: Uuid::new_v4().to_string(),
            role,
            target: target.to_path_buf(),
            status,
            files: stats.files,
            dirs: stats.dirs,
            bytes: stats.bytes,
            error,
        }
    }
}

/// Append-only JSONL journal, one record per session
pub struct SessionJournal {
    path: PathBuf,
}

impl SessionJournal {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        SessionJournal { path: path.as_ref().to_path_buf() }
    }

    pub fn add_entry(&self, entry: &SessionRecord) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open session journal")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<SessionRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .context("Failed to open session journal for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecord = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn journal_appends_and_reads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = SessionJournal::new(tmp.path().join("sessions.jsonl"));
        assert!(journal.read_log().unwrap().is_empty());

        let ok: crate::Result<TransferStats> = Ok(TransferStats { files: 2, dirs: 1, bytes: 12 });
        journal.add_entry(&SessionRecord::new(Role::Sink, Path::new("/in/"), &ok)).unwrap();

        let failed: crate::Result<TransferStats> = Err(Error::Desync("directory end without a matching directory start".into()));
        journal.add_entry(&SessionRecord::new(Role::Source, Path::new("/out"), &failed)).unwrap();

        let entries = journal.read_log().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, SessionStatus::Completed);
        assert_eq!(entries[0].role, Role::Sink);
        assert_eq!(entries[0].bytes, 12);
        assert!(entries[0].error.is_none());
        assert_eq!(entries[1].status, SessionStatus::Failed);
        assert!(entries[1].error.as_deref().unwrap().contains("desync"));
        assert_ne!(entries[0].session_id, entries[1].session_id);
    }
}
