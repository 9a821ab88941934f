//! Append-only audit trail for recovery actions.
//!
//! Every stale-phase reset attempt — successful or not — leaves a durable
//! JSONL record for later inspection. Audit failures are logged and swallowed:
//! the trail supports operators, it never blocks recovery.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

const AUDIT_DIR_NAME: &str = ".runloom";
const AUDIT_FILE_NAME: &str = "audit.jsonl";

/// Current audit schema version.
pub const AUDIT_SCHEMA_VERSION: u32 = 1;

/// One audit record, stored as a single JSONL line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Audit schema version.
    pub schema_version: u32,
    /// Timestamp when the record was captured.
    pub recorded_at: DateTime<Utc>,
    /// Record kind (e.g. "stale_phase_reset").
    pub kind: String,
    /// Arbitrary JSON payload describing the event.
    pub payload: Value,
}

impl AuditRecord {
    /// Create a record with the current timestamp.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            schema_version: AUDIT_SCHEMA_VERSION,
            recorded_at: Utc::now(),
            kind: kind.into(),
            payload,
        }
    }
}

/// Payload of one stale-phase reset attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleResetAudit {
    /// Phase the reset targeted.
    pub phase_id: String,
    /// "reset", "skipped" (another actor already handled it), or "failed".
    pub outcome: String,
    /// Extra detail, e.g. the update error for failed attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Appends audit records to `<base_dir>/.runloom/audit.jsonl`.
#[derive(Debug, Clone)]
pub struct AuditWriter {
    path: PathBuf,
}

impl AuditWriter {
    /// Create a writer rooted at the given base directory, creating the
    /// audit directory if needed.
    pub fn try_new(base_dir: &Path) -> std::io::Result<Self> {
        let dir = base_dir.join(AUDIT_DIR_NAME);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join(AUDIT_FILE_NAME),
        })
    }

    /// Path of the backing audit file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Failures are logged at warn and otherwise ignored.
    pub fn append(&self, record: &AuditRecord) {
        if let Err(err) = self.try_append(record) {
            warn!(path = %self.path.display(), %err, "failed to write audit record");
        }
    }

    fn try_append(&self, record: &AuditRecord) -> std::io::Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{json}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_creates_file_and_lines() {
        let dir = TempDir::new().unwrap();
        let writer = AuditWriter::try_new(dir.path()).unwrap();

        writer.append(&AuditRecord::new(
            "stale_phase_reset",
            serde_json::json!({"phase_id": "p1", "outcome": "reset"}),
        ));
        writer.append(&AuditRecord::new(
            "stale_phase_reset",
            serde_json::json!({"phase_id": "p2", "outcome": "failed"}),
        ));

        let contents = std::fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.schema_version, AUDIT_SCHEMA_VERSION);
        assert_eq!(first.kind, "stale_phase_reset");
        assert_eq!(first.payload["phase_id"], "p1");
    }

    #[test]
    fn test_stale_reset_payload_round_trip() {
        let audit = StaleResetAudit {
            phase_id: "phase-7".to_string(),
            outcome: "reset".to_string(),
            detail: None,
        };
        let value = serde_json::to_value(&audit).unwrap();
        assert!(value.get("detail").is_none());
        let parsed: StaleResetAudit = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, audit);
    }
}
