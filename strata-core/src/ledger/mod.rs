//! Migration ledger
//!
//! The durable record of which steps are applied. A step is listed iff its forward
//! transformation is in effect and its backward one has not run since. Entries are
//! always returned in ascending [`StepId`] order.
//!
//! Two implementations ship with the crate:
//! - [`MemoryLedger`] for tests and embedded use
//! - [`FileLedger`] an append-only, CRC32-framed event log on disk

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::migration::{MigrationError, MigrationResult, StepId};

pub mod file;

pub use file::FileLedger;

/// One applied step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub step_id: StepId,
    pub applied_at: DateTime<Utc>,
}

/// Event stored in a ledger log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    Applied { step_id: StepId, at: DateTime<Utc> },
    Reverted { step_id: StepId, at: DateTime<Utc> },
}

impl LedgerEvent {
    pub fn step_id(&self) -> &StepId {
        match self {
            LedgerEvent::Applied { step_id, .. } | LedgerEvent::Reverted { step_id, .. } => step_id,
        }
    }
}

#[async_trait]
pub trait MigrationLedger: Send + Sync {
    /// Applied steps in ascending id order
    async fn list_applied(&self) -> MigrationResult<Vec<LedgerEntry>>;

    /// Record `id` as applied; fails if it already is
    async fn mark_applied(&self, id: &StepId) -> MigrationResult<LedgerEntry>;

    /// Remove `id` from the applied set; fails if it is not there
    async fn mark_reverted(&self, id: &StepId) -> MigrationResult<()>;

    async fn is_applied(&self, id: &StepId) -> MigrationResult<bool> {
        Ok(self.list_applied().await?.iter().any(|entry| &entry.step_id == id))
    }
}

/// Applied set folded from ledger events
///
/// Shared by every ledger so replay and live updates follow the same rules.
#[derive(Debug, Default, Clone)]
pub(crate) struct AppliedSet {
    entries: BTreeMap<StepId, DateTime<Utc>>,
}

impl AppliedSet {
    pub(crate) fn apply_event(&mut self, event: &LedgerEvent) -> MigrationResult<()> {
        match event {
            LedgerEvent::Applied { step_id, at } => {
                if self.entries.contains_key(step_id) {
                    return Err(MigrationError::Ledger(format!(
                        "step {} is already recorded as applied",
                        step_id
                    )));
                }
                self.entries.insert(step_id.clone(), *at);
            }
            LedgerEvent::Reverted { step_id, .. } => {
                if self.entries.remove(step_id).is_none() {
                    return Err(MigrationError::Ledger(format!(
                        "step {} is not recorded as applied",
                        step_id
                    )));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn contains(&self, id: &StepId) -> bool {
        self.entries.contains_key(id)
    }

    pub(crate) fn get(&self, id: &StepId) -> Option<LedgerEntry> {
        self.entries
            .get(id)
            .map(|at| LedgerEntry { step_id: id.clone(), applied_at: *at })
    }

    pub(crate) fn entries(&self) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .map(|(id, at)| LedgerEntry { step_id: id.clone(), applied_at: *at })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// In-memory ledger
#[derive(Debug, Default)]
pub struct MemoryLedger {
    applied: RwLock<AppliedSet>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MigrationLedger for MemoryLedger {
    async fn list_applied(&self) -> MigrationResult<Vec<LedgerEntry>> {
        Ok(self.applied.read().await.entries())
    }

    async fn mark_applied(&self, id: &StepId) -> MigrationResult<LedgerEntry> {
        let mut applied = self.applied.write().await;
        let at = Utc::now();
        applied.apply_event(&LedgerEvent::Applied { step_id: id.clone(), at })?;
        Ok(LedgerEntry { step_id: id.clone(), applied_at: at })
    }

    async fn mark_reverted(&self, id: &StepId) -> MigrationResult<()> {
        let mut applied = self.applied.write().await;
        applied.apply_event(&LedgerEvent::Reverted { step_id: id.clone(), at: Utc::now() })
    }

    async fn is_applied(&self, id: &StepId) -> MigrationResult<bool> {
        Ok(self.applied.read().await.contains(id))
    }
}
