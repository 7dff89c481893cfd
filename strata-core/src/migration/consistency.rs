//! Ledger vs schema consistency check
//!
//! The expected schema is rebuilt by replaying the forward operations of every
//! applied declarative step into a scratch [`CatalogBackend`], then compared to the
//! live backend. Steps that are not declarative cannot be replayed; they are listed
//! as unverified and switch the comparison to "expected objects must exist" only.
//!
//! Nothing is repaired here.

use std::fmt;

use super::{MigrationError, MigrationRegistry, MigrationResult, StepId};
use crate::backend::{CatalogBackend, SchemaBackend};
use crate::ledger::MigrationLedger;
use crate::schema::{CollectionDescriptor, SchemaShape};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyIssue {
    /// The ledger records a step the registry does not know
    UnregisteredStep(StepId),
    /// A registered step older than the last applied one is still pending
    SkippedStep { pending: StepId, last_applied: StepId },
    /// An applied step should have left this collection behind
    MissingCollection { collection: String },
    /// The collection exists but its shape differs from what was applied
    ShapeMismatch { collection: String, detail: String },
}

impl fmt::Display for ConsistencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyIssue::UnregisteredStep(id) => {
                write!(f, "ledger records step {} which is not registered", id)
            }
            ConsistencyIssue::SkippedStep { pending, last_applied } => write!(
                f,
                "step {} is pending but older than the last applied step {}",
                pending, last_applied
            ),
            ConsistencyIssue::MissingCollection { collection } => {
                write!(f, "collection '{}' is recorded as created but absent", collection)
            }
            ConsistencyIssue::ShapeMismatch { collection, detail } => {
                write!(f, "collection '{}' differs from its migrations: {}", collection, detail)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    pub issues: Vec<ConsistencyIssue>,
    /// Applied steps whose effects could not be replayed
    pub unverified: Vec<StepId>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn into_error(self) -> MigrationError {
        MigrationError::LedgerInconsistency(self.issues.iter().map(|i| i.to_string()).collect())
    }
}

pub async fn check(
    registry: &MigrationRegistry,
    backend: &dyn SchemaBackend,
    ledger: &dyn MigrationLedger,
) -> MigrationResult<ConsistencyReport> {
    let mut report = ConsistencyReport::default();
    let applied = ledger.list_applied().await?;

    for entry in &applied {
        if !registry.contains(&entry.step_id) {
            report.issues.push(ConsistencyIssue::UnregisteredStep(entry.step_id.clone()));
        }
    }

    if let Some(last) = applied.last() {
        for id in registry.ids().filter(|id| *id < &last.step_id) {
            if !applied.iter().any(|entry| &entry.step_id == id) {
                report.issues.push(ConsistencyIssue::SkippedStep {
                    pending: id.clone(),
                    last_applied: last.step_id.clone(),
                });
            }
        }
    }

    let expected = replay(registry, applied.iter().map(|e| &e.step_id), &mut report).await?;
    let strict = report.unverified.is_empty();

    for descriptor in &expected {
        let live = backend.find_collection(descriptor.id().as_str()).await?;
        match live {
            None => report.issues.push(ConsistencyIssue::MissingCollection {
                collection: descriptor.name().to_string(),
            }),
            Some(live) => {
                let differences = compare(&descriptor.shape(), &live.shape(), strict);
                if !differences.is_empty() {
                    report.issues.push(ConsistencyIssue::ShapeMismatch {
                        collection: descriptor.name().to_string(),
                        detail: differences.join(", "),
                    });
                }
            }
        }
    }

    Ok(report)
}

/// Expected collections after every applied, replayable step
async fn replay<'a>(
    registry: &MigrationRegistry,
    applied: impl Iterator<Item = &'a StepId>,
    report: &mut ConsistencyReport,
) -> MigrationResult<Vec<CollectionDescriptor>> {
    let scratch = CatalogBackend::new();

    for id in applied {
        let Some(step) = registry.get(id) else {
            continue;
        };
        let Some(operations) = step.operations() else {
            report.unverified.push(id.clone());
            continue;
        };
        for op in operations {
            if let Err(err) = op.apply(&scratch).await {
                // Usually depends on an object an opaque step created
                log::debug!("🔍 Cannot replay '{}' of {}: {}", op.describe(), id, err);
                if !report.unverified.contains(id) {
                    report.unverified.push(id.clone());
                }
            }
        }
    }

    scratch.list_collections().await
}

fn compare(expected: &SchemaShape, live: &SchemaShape, strict: bool) -> Vec<String> {
    let mut differences = Vec::new();
    if expected.name != live.name {
        differences.push(format!("named '{}' instead of '{}'", live.name, expected.name));
    }

    for (name, shape) in &expected.fields {
        match live.fields.get(name) {
            None => differences.push(format!("field '{}' missing", name)),
            Some(found) if found != shape => {
                differences.push(format!("field '{}' has a different definition", name))
            }
            Some(_) => {}
        }
    }
    for (name, index) in &expected.indexes {
        match live.indexes.get(name) {
            None => differences.push(format!("index '{}' missing", name)),
            Some(found) if found != index => {
                differences.push(format!("index '{}' has a different definition", name))
            }
            Some(_) => {}
        }
    }

    if strict {
        for name in live.fields.keys().filter(|name| !expected.fields.contains_key(*name)) {
            differences.push(format!("unexpected field '{}'", name));
        }
        for name in live.indexes.keys().filter(|name| !expected.indexes.contains_key(*name)) {
            differences.push(format!("unexpected index '{}'", name));
        }
    }
    differences
}
