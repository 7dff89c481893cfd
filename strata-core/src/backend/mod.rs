//! Schema mutation backend contract
//!
//! The runner and the migration steps never touch storage directly; every schema
//! change goes through a [`SchemaBackend`]. Collections are addressed by name or
//! by id (`name_or_id`), whichever the caller has at hand.
//!
//! Backends that can stage changes override [`SchemaBackend::begin`],
//! [`SchemaBackend::commit`] and [`SchemaBackend::rollback`]; the runner wraps every
//! step in that pair so a failed step leaves nothing visible. The defaults are
//! no-ops for backends that apply changes immediately.
//!
//! Hand-written `backward` functions use the `*_if_exists` variants: each one
//! treats an already absent object as done and lets the revert carry on with its
//! next operation.

use async_trait::async_trait;

use crate::migration::{tolerate_missing, MigrationResult};
use crate::schema::{CollectionDescriptor, FieldDescriptor, IndexDefinition};

pub mod catalog;

pub use catalog::CatalogBackend;

#[async_trait]
pub trait SchemaBackend: Send + Sync {
    /// Whether `begin`/`commit`/`rollback` actually isolate a step
    fn supports_transactions(&self) -> bool {
        false
    }

    async fn begin(&self) -> MigrationResult<()> {
        Ok(())
    }

    async fn commit(&self) -> MigrationResult<()> {
        Ok(())
    }

    async fn rollback(&self) -> MigrationResult<()> {
        Ok(())
    }

    /// Look up a live collection
    async fn find_collection(&self, name_or_id: &str)
        -> MigrationResult<Option<CollectionDescriptor>>;

    /// Every live collection, in creation order
    async fn list_collections(&self) -> MigrationResult<Vec<CollectionDescriptor>>;

    /// Create a collection together with its indexes
    ///
    /// Fails with `NameConflict` if a live collection already uses the name.
    async fn create_collection(&self, descriptor: &CollectionDescriptor) -> MigrationResult<()>;

    /// Fails with `CollectionNotFound` if nothing matches
    async fn delete_collection(&self, name_or_id: &str) -> MigrationResult<()>;

    async fn rename_collection(&self, name_or_id: &str, new_name: &str) -> MigrationResult<()>;

    /// Insert a field at `position` (appended when `None` or out of range)
    async fn add_field(
        &self,
        collection: &str,
        field: &FieldDescriptor,
        position: Option<usize>,
    ) -> MigrationResult<()>;

    async fn drop_field(&self, collection: &str, field: &str) -> MigrationResult<()>;

    async fn create_index(&self, collection: &str, index: &IndexDefinition)
        -> MigrationResult<()>;

    async fn drop_index(&self, collection: &str, index: &str) -> MigrationResult<()>;

    // ==================== TOLERANT DROPS ====================

    async fn delete_collection_if_exists(&self, name_or_id: &str) -> MigrationResult<()> {
        tolerate_missing(
            self.delete_collection(name_or_id).await,
            &format!("delete collection '{}'", name_or_id),
        )
    }

    async fn drop_field_if_exists(&self, collection: &str, field: &str) -> MigrationResult<()> {
        tolerate_missing(
            self.drop_field(collection, field).await,
            &format!("drop field '{}.{}'", collection, field),
        )
    }

    async fn drop_index_if_exists(&self, collection: &str, index: &str) -> MigrationResult<()> {
        tolerate_missing(
            self.drop_index(collection, index).await,
            &format!("drop index '{}' on '{}'", index, collection),
        )
    }
}
