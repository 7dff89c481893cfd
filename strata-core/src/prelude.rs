//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use strata_core::prelude::*;
//! ```

// === Schema ===
pub use crate::schema::{
    Collation, CollectionDescriptor, CollectionId, FieldDescriptor, FieldKind, IndexDefinition,
};

// === Migrations ===
pub use crate::migration::{
    DeclarativeStep, Migration, MigrationError, MigrationRegistry, MigrationResult,
    MigrationRunner, RunError, SchemaOperation, StepId, StepState, StepStatus,
};

// === Ledger and backend ===
pub use crate::backend::{CatalogBackend, SchemaBackend};
pub use crate::ledger::{FileLedger, MemoryLedger, MigrationLedger};

// === Configuration ===
pub use crate::config::StrataConfig;
pub use crate::logging::{init_logging, LoggerConfig};

// === Async trait for custom steps and backends ===
pub use async_trait::async_trait;
