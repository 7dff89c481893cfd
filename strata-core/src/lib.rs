//! Strata - Core
//!
//! A versioned, reversible schema-migration engine for collection stores.
//!
//! # Overview
//!
//! An operator declares the shape of named collections (fields, types,
//! constraints, indexes) as typed descriptors, groups changes into migration
//! steps with strictly ordered ids, and lets the runner apply or revert them
//! against a live schema backend. A durable ledger records which steps are in
//! effect, so re-running is a no-op and rollback is exact.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use strata_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cards = CollectionDescriptor::builder("cards")
//!         .field(FieldDescriptor::text("name").required())
//!         .index(IndexDefinition::unique(["name"]))
//!         .build()?;
//!
//!     let registry = MigrationRegistry::new(vec![Box::new(
//!         DeclarativeStep::builder("1752710000_create_cards").create_collection(cards).build()?,
//!     )])?;
//!
//!     let config = StrataConfig::load()?;
//!     let runner = MigrationRunner::from_config(&config, Arc::new(registry))?;
//!     let applied = runner.apply_up(None).await?;
//!     println!("applied {:?}", applied);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`schema`] - collection, field and index descriptors
//! - [`migration`] - steps, registry, runner and the consistency check
//! - [`ledger`] - the record of applied steps (in memory or on disk)
//! - [`backend`] - the schema mutation contract and the in-process catalog
//! - [`config`] - TOML + environment configuration
//! - [`logging`] - `log` backend with JSON, human and logfmt output

pub mod backend;
pub mod config;
pub mod ledger;
pub mod logging;
pub mod migration;
pub mod persistence; // CRC32 framing shared by the ledger and the catalog snapshot
pub mod schema;

pub mod prelude;

pub use backend::{CatalogBackend, SchemaBackend};
pub use config::StrataConfig;
pub use ledger::{FileLedger, LedgerEntry, MemoryLedger, MigrationLedger};
pub use migration::{
    DeclarativeStep, Migration, MigrationError, MigrationRegistry, MigrationResult,
    MigrationRunner, RunError, StepId,
};
pub use schema::{CollectionDescriptor, CollectionId, FieldDescriptor, IndexDefinition};
