//! Versioned, reversible migrations
//!
//! - [`step`] - step ids, the [`Migration`] trait and declarative steps
//! - [`registry`] - the ordered, read-only set of known steps
//! - [`runner`] - applies and reverts steps while keeping the ledger in sync
//! - [`consistency`] - ledger vs live schema verification

pub mod consistency;
pub mod registry;
pub mod runner;
pub mod step;

pub use consistency::{ConsistencyIssue, ConsistencyReport};
pub use registry::MigrationRegistry;
pub use runner::{MigrationRunner, RunError, StepState, StepStatus};
pub use step::{DeclarativeStep, Migration, SchemaOperation, StepBuilder, StepId};

/// Result type used across the migration engine
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Migration engine error type
#[derive(thiserror::Error, Debug)]
pub enum MigrationError {
    #[error("Duplicate step id: {0}")]
    DuplicateStepId(StepId),
    #[error("Invalid step id '{0}': expected <unix-seconds>_<slug>")]
    InvalidStepId(String),
    #[error("Unknown step: {0}")]
    UnknownStep(String),
    #[error("Invalid schema descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("Collection name already in use: {0}")]
    NameConflict(String),
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    #[error("Field '{field}' not found in collection '{collection}'")]
    FieldNotFound { collection: String, field: String },
    #[error("Index '{index}' not found in collection '{collection}'")]
    IndexNotFound { collection: String, index: String },
    #[error("Backend failure: {0}")]
    Backend(String),
    #[error("Ledger error: {0}")]
    Ledger(String),
    #[error("Ledger inconsistency: {}", .0.join("; "))]
    LedgerInconsistency(Vec<String>),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl MigrationError {
    /// Whether the error only says the target is already absent
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MigrationError::CollectionNotFound(_)
                | MigrationError::FieldNotFound { .. }
                | MigrationError::IndexNotFound { .. }
        )
    }
}

/// Turn a not-found error into success, logging it as a warning
///
/// Rollbacks use this so that reverting a step whose objects were already removed
/// out of band still reaches the goal state.
pub fn tolerate_missing(result: MigrationResult<()>, context: &str) -> MigrationResult<()> {
    match result {
        Err(err) if err.is_not_found() => {
            log::warn!("⚠️ {}: {} (already absent, skipped)", context, err);
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(MigrationError::CollectionNotFound("cards".into()).is_not_found());
        assert!(MigrationError::IndexNotFound { collection: "c".into(), index: "i".into() }
            .is_not_found());
        assert!(!MigrationError::NameConflict("cards".into()).is_not_found());
    }

    #[test]
    fn test_tolerate_missing() {
        assert!(tolerate_missing(Err(MigrationError::CollectionNotFound("x".into())), "drop")
            .is_ok());
        assert!(tolerate_missing(Err(MigrationError::Backend("disk".into())), "drop").is_err());
    }

    #[test]
    fn test_inconsistency_message_lists_issues() {
        let err = MigrationError::LedgerInconsistency(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Ledger inconsistency: a; b");
    }
}
