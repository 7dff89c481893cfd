//! Migration runner
//!
//! The runner is the only mutator of the ledger. It computes which steps to apply
//! or revert, executes them one at a time and records each outcome before moving
//! on. A failing step stops the batch: earlier steps stay committed, the failing
//! one is neither recorded nor left half-visible (when the backend supports
//! transactions).
//!
//! Each step is executed as:
//!
//! ```text
//! backend.begin() -> forward/backward -> backend.commit() -> ledger write
//!                          | error
//!                          v
//!                  backend.rollback(), stop
//! ```
//!
//! A crash (or ledger failure) between `commit` and the ledger write leaves a step
//! whose schema change is live but unrecorded; [`MigrationRunner::verify`] reports
//! it and an operator reconciles by hand.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::consistency::{self, ConsistencyReport};
use super::{Migration, MigrationError, MigrationRegistry, MigrationResult, StepId};
use crate::backend::{CatalogBackend, SchemaBackend};
use crate::config::StrataConfig;
use crate::ledger::{FileLedger, MigrationLedger};

/// Failure of an `apply_up`/`apply_down` batch
///
/// Partial progress is part of the outcome: `completed` lists the steps that were
/// applied (or reverted) and recorded before the batch stopped.
#[derive(Debug, thiserror::Error)]
#[error(
    "migration run stopped{}: {source}",
    .failed_step.as_ref().map(|id| format!(" at step {}", id)).unwrap_or_default()
)]
pub struct RunError {
    pub completed: Vec<StepId>,
    /// Step that failed, `None` when the batch was rejected before any step ran
    pub failed_step: Option<StepId>,
    pub source: MigrationError,
}

impl RunError {
    fn rejected(source: MigrationError) -> Self {
        Self { completed: Vec::new(), failed_step: None, source }
    }
}

/// Applied/pending state of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepState {
    Applied { at: DateTime<Utc> },
    Pending,
    /// Recorded in the ledger but unknown to the registry
    Unregistered { at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatus {
    pub id: StepId,
    pub description: String,
    pub state: StepState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

pub struct MigrationRunner {
    registry: Arc<MigrationRegistry>,
    backend: Arc<dyn SchemaBackend>,
    ledger: Arc<dyn MigrationLedger>,
    verify_before_apply: bool,
    /// Serializes runs issued from this process
    run_lock: Mutex<()>,
}

impl MigrationRunner {
    pub fn new(
        registry: Arc<MigrationRegistry>,
        backend: Arc<dyn SchemaBackend>,
        ledger: Arc<dyn MigrationLedger>,
    ) -> Self {
        if !backend.supports_transactions() {
            log::warn!(
                "⚠️ Schema backend has no transactions: a crash between a schema change and \
                 its ledger write requires manual reconciliation"
            );
        }
        Self { registry, backend, ledger, verify_before_apply: false, run_lock: Mutex::new(()) }
    }

    /// Runner over the on-disk catalog and ledger described by `config`
    pub fn from_config(
        config: &StrataConfig,
        registry: Arc<MigrationRegistry>,
    ) -> MigrationResult<Self> {
        let backend = CatalogBackend::open(config.catalog_path(), config.storage.fsync)?;
        let ledger = FileLedger::open(config.ledger_path(), config.storage.fsync)?;
        Ok(Self::new(registry, Arc::new(backend), Arc::new(ledger))
            .with_verify_before_apply(config.migrations.verify_before_apply))
    }

    /// Run the consistency check before every `apply_up`
    pub fn with_verify_before_apply(mut self, enabled: bool) -> Self {
        self.verify_before_apply = enabled;
        self
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn SchemaBackend> {
        &self.backend
    }

    pub fn ledger(&self) -> &Arc<dyn MigrationLedger> {
        &self.ledger
    }

    // ==================== APPLY UP ====================

    /// Apply pending steps up to and including `target` (newest step when `None`)
    ///
    /// Pending means registered with an id greater than the last applied one.
    /// Already at target is a no-op returning an empty list.
    pub async fn apply_up(&self, target: Option<&StepId>) -> Result<Vec<StepId>, RunError> {
        let _guard = self.run_lock.lock().await;

        if let Some(target) = target {
            if !self.registry.contains(target) {
                return Err(RunError::rejected(MigrationError::UnknownStep(target.to_string())));
            }
        }
        if self.verify_before_apply {
            self.verify().await.map_err(RunError::rejected)?;
        }

        let applied = self.ledger.list_applied().await.map_err(RunError::rejected)?;
        let last_applied = applied.last().map(|entry| entry.step_id.clone());
        let Some(target) = target.or(self.registry.latest()) else {
            log::info!("✅ No migrations registered");
            return Ok(Vec::new());
        };

        let pending: Vec<&dyn Migration> = self
            .registry
            .iter()
            .filter(|step| last_applied.as_ref().map_or(true, |last| step.id() > last))
            .filter(|step| step.id() <= target)
            .collect();

        if pending.is_empty() {
            log::info!("✅ Schema already at {}", target);
            return Ok(Vec::new());
        }
        log::info!("🚀 Applying {} migration(s) up to {}", pending.len(), target);

        let mut completed = Vec::with_capacity(pending.len());
        for step in pending {
            if let Err(source) = self.run_step(step, Direction::Up).await {
                log::error!("❌ Migration {} failed: {}", step.id(), source);
                return Err(RunError { completed, failed_step: Some(step.id().clone()), source });
            }
            log::info!("✅ Applied {}{}", step.id(), describe(step));
            completed.push(step.id().clone());
        }
        Ok(completed)
    }

    // ==================== APPLY DOWN ====================

    /// Revert applied steps newer than `target`, newest first
    ///
    /// With `None`, reverts exactly the most recently applied step.
    pub async fn apply_down(&self, target: Option<&StepId>) -> Result<Vec<StepId>, RunError> {
        let _guard = self.run_lock.lock().await;

        if let Some(target) = target {
            if !self.registry.contains(target) {
                return Err(RunError::rejected(MigrationError::UnknownStep(target.to_string())));
            }
        }

        let applied = self.ledger.list_applied().await.map_err(RunError::rejected)?;
        let selected: Vec<&StepId> = match target {
            Some(target) => {
                applied.iter().rev().map(|e| &e.step_id).filter(|id| *id > target).collect()
            }
            None => applied.last().map(|e| &e.step_id).into_iter().collect(),
        };

        if selected.is_empty() {
            log::info!("✅ Nothing to revert");
            return Ok(Vec::new());
        }

        let mut to_revert: Vec<&dyn Migration> = Vec::with_capacity(selected.len());
        let mut unregistered = Vec::new();
        for id in selected {
            match self.registry.get(id) {
                Some(step) => to_revert.push(step),
                None => unregistered.push(format!("applied step {} is not registered", id)),
            }
        }
        if !unregistered.is_empty() {
            return Err(RunError::rejected(MigrationError::LedgerInconsistency(unregistered)));
        }

        log::info!("⏪ Reverting {} migration(s)", to_revert.len());
        let mut completed = Vec::with_capacity(to_revert.len());
        for step in to_revert {
            if let Err(source) = self.run_step(step, Direction::Down).await {
                log::error!("❌ Reverting {} failed: {}", step.id(), source);
                return Err(RunError { completed, failed_step: Some(step.id().clone()), source });
            }
            log::info!("↩️ Reverted {}{}", step.id(), describe(step));
            completed.push(step.id().clone());
        }
        Ok(completed)
    }

    /// One step as a unit: staged mutation, commit, then ledger write
    async fn run_step(&self, step: &dyn Migration, direction: Direction) -> MigrationResult<()> {
        let backend = self.backend.as_ref();
        backend.begin().await?;

        // Not-found is tolerated per operation inside `backward`, never for the whole step
        let outcome = match direction {
            Direction::Up => step.forward(backend).await,
            Direction::Down => step.backward(backend).await,
        };
        if let Err(err) = outcome {
            self.discard(step).await;
            return Err(err);
        }
        if let Err(err) = backend.commit().await {
            self.discard(step).await;
            return Err(err);
        }

        let recorded = match direction {
            Direction::Up => self.ledger.mark_applied(step.id()).await.map(|_| ()),
            Direction::Down => self.ledger.mark_reverted(step.id()).await,
        };
        recorded.map_err(|err| {
            MigrationError::Ledger(format!(
                "schema change of step {} is committed but the ledger write failed ({}); \
                 manual reconciliation required",
                step.id(),
                err
            ))
        })
    }

    async fn discard(&self, step: &dyn Migration) {
        if let Err(err) = self.backend.rollback().await {
            log::error!("🚨 Rollback of step {} failed: {}", step.id(), err);
        }
    }

    // ==================== INSPECTION ====================

    /// Every registered step with its state, then ledger entries nobody registered
    pub async fn status(&self) -> MigrationResult<Vec<StepStatus>> {
        let applied = self.ledger.list_applied().await?;

        let mut statuses: Vec<StepStatus> = self
            .registry
            .iter()
            .map(|step| {
                let state = applied
                    .iter()
                    .find(|entry| &entry.step_id == step.id())
                    .map_or(StepState::Pending, |entry| StepState::Applied { at: entry.applied_at });
                StepStatus {
                    id: step.id().clone(),
                    description: step.description().to_string(),
                    state,
                }
            })
            .collect();

        statuses.extend(applied.iter().filter(|e| !self.registry.contains(&e.step_id)).map(
            |entry| StepStatus {
                id: entry.step_id.clone(),
                description: String::new(),
                state: StepState::Unregistered { at: entry.applied_at },
            },
        ));
        Ok(statuses)
    }

    /// Compare ledger, registry and live schema
    pub async fn check(&self) -> MigrationResult<ConsistencyReport> {
        consistency::check(&self.registry, self.backend.as_ref(), self.ledger.as_ref()).await
    }

    /// Like [`check`](Self::check) but any issue becomes `LedgerInconsistency`
    pub async fn verify(&self) -> MigrationResult<()> {
        let report = self.check().await?;
        if report.is_consistent() {
            log::debug!("🔍 Ledger and schema are consistent");
            return Ok(());
        }
        for issue in &report.issues {
            log::error!("🚨 {}", issue);
        }
        Err(report.into_error())
    }
}

fn describe(step: &dyn Migration) -> String {
    match step.description() {
        "" => String::new(),
        text => format!(" ({})", text),
    }
}
