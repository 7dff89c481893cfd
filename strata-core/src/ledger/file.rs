//! File-backed ledger
//!
//! # Format
//!
//! ```text
//! data/
//! └── migrations.ledger   # Append-only event log, one "<crc32_hex>:<json>" line per event
//! ```
//!
//! The applied set is rebuilt on open by replaying every event. A checksum failure
//! anywhere but on the final line aborts the open: a ledger that cannot be trusted
//! must not drive the runner. A damaged final line is a torn append and is dropped.

use async_trait::async_trait;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{AppliedSet, LedgerEntry, LedgerEvent, MigrationLedger};
use crate::migration::{MigrationError, MigrationResult, StepId};
use crate::persistence::{format_line_with_crc32, parse_and_validate_line, write_atomically};

/// Ledger file name inside the data directory
pub const LEDGER_FILE_NAME: &str = "migrations.ledger";

struct LedgerLog {
    applied: AppliedSet,
    file: fs::File,
    /// Length of the file up to the last complete event
    len: u64,
    /// Events currently in the file (compaction shrinks this to the applied count)
    events: usize,
}

pub struct FileLedger {
    path: PathBuf,
    fsync: bool,
    log: Mutex<LedgerLog>,
}

impl FileLedger {
    /// Open (or create) the ledger at `path` and replay it
    pub fn open(path: impl AsRef<Path>, fsync: bool) -> MigrationResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let (applied, events) = Self::replay(&path)?;
        let file = Self::append_file(&path)?;
        let len = file.metadata()?.len();
        log::info!(
            "📂 Migration ledger {} loaded: {} events, {} applied steps (CRC32 validated ✓)",
            path.display(),
            events,
            applied.len()
        );

        Ok(Self { path, fsync, log: Mutex::new(LedgerLog { applied, file, len, events }) })
    }

    /// Open the ledger stored in `data_dir`
    pub fn open_in_dir(data_dir: impl AsRef<Path>, fsync: bool) -> MigrationResult<Self> {
        Self::open(data_dir.as_ref().join(LEDGER_FILE_NAME), fsync)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_file(path: &Path) -> MigrationResult<fs::File> {
        OpenOptions::new().create(true).append(true).open(path).map_err(|e| {
            MigrationError::Ledger(format!("failed to open ledger {}: {}", path.display(), e))
        })
    }

    fn replay(path: &Path) -> MigrationResult<(AppliedSet, usize)> {
        let mut applied = AppliedSet::default();
        if !path.exists() {
            return Ok((applied, 0));
        }

        let content = fs::read_to_string(path)?;
        let lines: Vec<(usize, &str)> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .collect();

        let mut events = 0;
        for (pos, (line_num, line)) in lines.iter().enumerate() {
            let json = match parse_and_validate_line(line) {
                Ok(json) => json,
                Err(e) if pos + 1 == lines.len() => {
                    log::warn!(
                        "⚠️ Dropping torn final ledger line {}:{}: {}",
                        path.display(),
                        line_num + 1,
                        e
                    );
                    // Cut the fragment so the next append starts on a clean line
                    let kept: String =
                        lines[..pos].iter().map(|(_, l)| format!("{}\n", l)).collect();
                    write_atomically(path, &kept, true)?;
                    break;
                }
                Err(e) => {
                    return Err(MigrationError::Ledger(format!(
                        "{}:{}: {}",
                        path.display(),
                        line_num + 1,
                        e
                    )));
                }
            };
            let event: LedgerEvent = serde_json::from_str(json)?;
            applied.apply_event(&event).map_err(|e| {
                MigrationError::Ledger(format!("{}:{}: {}", path.display(), line_num + 1, e))
            })?;
            events += 1;
        }
        Ok((applied, events))
    }

    fn write_event(&self, log: &mut LedgerLog, event: &LedgerEvent) -> MigrationResult<()> {
        // Validate against a copy so a rejected event never reaches the file
        let mut next = log.applied.clone();
        next.apply_event(event)?;

        let mut line = format_line_with_crc32(&serde_json::to_string(event)?);
        line.push('\n');
        if let Err(err) = Self::append_line(&mut log.file, line.as_bytes(), self.fsync) {
            self.discard_partial_append(log);
            return Err(MigrationError::Ledger(format!(
                "failed to append to {}: {}",
                self.path.display(),
                err
            )));
        }

        log.len += line.len() as u64;
        log.applied = next;
        log.events += 1;
        Ok(())
    }

    /// One unbuffered write per event: a failure leaves nothing queued for later
    fn append_line(file: &mut fs::File, bytes: &[u8], fsync: bool) -> std::io::Result<()> {
        file.write_all(bytes)?;
        if fsync {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Cut whatever part of a failed append reached the file, then reopen the handle
    fn discard_partial_append(&self, log: &mut LedgerLog) {
        let truncated =
            OpenOptions::new().write(true).open(&self.path).and_then(|f| f.set_len(log.len));
        if let Err(e) = truncated {
            log::error!("🚨 Cannot truncate ledger {} after a failed append: {}", self.path.display(), e);
        }
        match Self::append_file(&self.path) {
            Ok(file) => log.file = file,
            Err(e) => log::error!("🚨 {}", e),
        }
    }

    /// Rewrite the log so it holds one `Applied` event per applied step
    pub async fn compact(&self) -> MigrationResult<usize> {
        let mut log = self.log.lock().await;
        let before = log.events;

        let mut content = String::new();
        for entry in log.applied.entries() {
            let event = LedgerEvent::Applied { step_id: entry.step_id, at: entry.applied_at };
            content.push_str(&format_line_with_crc32(&serde_json::to_string(&event)?));
            content.push('\n');
        }
        write_atomically(&self.path, &content, self.fsync)?;

        log.file = Self::append_file(&self.path)?;
        log.len = content.len() as u64;
        log.events = log.applied.len();
        log::info!(
            "🗜️ Ledger compacted: {} events -> {}",
            before,
            log.events
        );
        Ok(before - log.events)
    }

    /// Number of events currently stored in the file
    pub async fn event_count(&self) -> usize {
        self.log.lock().await.events
    }
}

#[async_trait]
impl MigrationLedger for FileLedger {
    async fn list_applied(&self) -> MigrationResult<Vec<LedgerEntry>> {
        Ok(self.log.lock().await.applied.entries())
    }

    async fn mark_applied(&self, id: &StepId) -> MigrationResult<LedgerEntry> {
        let mut log = self.log.lock().await;
        let at = Utc::now();
        self.write_event(&mut log, &LedgerEvent::Applied { step_id: id.clone(), at })?;
        log.applied
            .get(id)
            .ok_or_else(|| MigrationError::Ledger(format!("step {} missing after append", id)))
    }

    async fn mark_reverted(&self, id: &StepId) -> MigrationResult<()> {
        let mut log = self.log.lock().await;
        self.write_event(&mut log, &LedgerEvent::Reverted { step_id: id.clone(), at: Utc::now() })
    }

    async fn is_applied(&self, id: &StepId) -> MigrationResult<bool> {
        Ok(self.log.lock().await.applied.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(raw: &str) -> StepId {
        StepId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_file_ledger_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let ledger = FileLedger::open_in_dir(dir.path(), true).unwrap();
            ledger.mark_applied(&id("1_a")).await.unwrap();
            ledger.mark_applied(&id("2_b")).await.unwrap();
            ledger.mark_reverted(&id("2_b")).await.unwrap();
            ledger.mark_applied(&id("3_c")).await.unwrap();
        }

        let ledger = FileLedger::open_in_dir(dir.path(), false).unwrap();
        let ids: Vec<String> =
            ledger.list_applied().await.unwrap().iter().map(|e| e.step_id.to_string()).collect();
        assert_eq!(ids, vec!["1_a", "3_c"]);
        assert_eq!(ledger.event_count().await, 4);
    }

    #[tokio::test]
    async fn test_rejected_event_is_not_written() {
        let dir = TempDir::new().unwrap();
        let ledger = FileLedger::open_in_dir(dir.path(), false).unwrap();
        assert!(ledger.mark_reverted(&id("1_a")).await.is_err());
        ledger.mark_applied(&id("1_a")).await.unwrap();
        assert!(ledger.mark_applied(&id("1_a")).await.is_err());

        let content = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_failed_append_leaves_no_stale_event() {
        let dir = TempDir::new().unwrap();
        {
            let ledger = FileLedger::open_in_dir(dir.path(), false).unwrap();
            ledger.mark_applied(&id("1_a")).await.unwrap();

            // A read-only handle makes the next write fail
            ledger.log.lock().await.file = fs::File::open(ledger.path()).unwrap();
            let err = ledger.mark_applied(&id("2_b")).await.unwrap_err();
            assert!(matches!(err, MigrationError::Ledger(_)), "unexpected error: {:?}", err);
            assert!(!ledger.is_applied(&id("2_b")).await.unwrap());

            // The handle is reopened and nothing from the failed write comes back
            ledger.mark_applied(&id("3_c")).await.unwrap();
        }

        let ledger = FileLedger::open_in_dir(dir.path(), false).unwrap();
        let ids: Vec<String> =
            ledger.list_applied().await.unwrap().iter().map(|e| e.step_id.to_string()).collect();
        assert_eq!(ids, vec!["1_a", "3_c"]);
        let content = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_compact_keeps_applied_set() {
        let dir = TempDir::new().unwrap();
        let ledger = FileLedger::open_in_dir(dir.path(), false).unwrap();
        for raw in ["1_a", "2_b", "3_c"] {
            ledger.mark_applied(&id(raw)).await.unwrap();
        }
        ledger.mark_reverted(&id("3_c")).await.unwrap();
        ledger.mark_reverted(&id("2_b")).await.unwrap();

        assert_eq!(ledger.compact().await.unwrap(), 4);
        ledger.mark_applied(&id("4_d")).await.unwrap();
        drop(ledger);

        let reopened = FileLedger::open_in_dir(dir.path(), false).unwrap();
        let ids: Vec<String> = reopened
            .list_applied()
            .await
            .unwrap()
            .iter()
            .map(|e| e.step_id.to_string())
            .collect();
        assert_eq!(ids, vec!["1_a", "4_d"]);
        assert_eq!(reopened.event_count().await, 2);
    }

    #[tokio::test]
    async fn test_torn_final_line_is_dropped() {
        let dir = TempDir::new().unwrap();
        {
            let ledger = FileLedger::open_in_dir(dir.path(), false).unwrap();
            ledger.mark_applied(&id("1_a")).await.unwrap();
        }
        let path = dir.path().join(LEDGER_FILE_NAME);
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("0badc0de:{\"event\":\"app");
        fs::write(&path, content).unwrap();

        let ledger = FileLedger::open(&path, false).unwrap();
        assert_eq!(ledger.list_applied().await.unwrap().len(), 1);
        ledger.mark_applied(&id("2_b")).await.unwrap();
        drop(ledger);

        let reopened = FileLedger::open(&path, false).unwrap();
        assert_eq!(reopened.list_applied().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_corruption_in_the_middle_fails_open() {
        let dir = TempDir::new().unwrap();
        {
            let ledger = FileLedger::open_in_dir(dir.path(), false).unwrap();
            ledger.mark_applied(&id("1_a")).await.unwrap();
            ledger.mark_applied(&id("2_b")).await.unwrap();
        }
        let path = dir.path().join(LEDGER_FILE_NAME);
        let content = fs::read_to_string(&path).unwrap().replacen("1_a", "1_z", 1);
        fs::write(&path, content).unwrap();

        let err = FileLedger::open(&path, false).err().unwrap();
        assert!(matches!(err, MigrationError::Ledger(ref msg) if msg.contains("CRC32 mismatch")));
    }
}
