//! In-process collection catalog
//!
//! [`CatalogBackend`] keeps the live collection set in memory and, when opened on
//! a path, persists it as a CRC32-protected JSON snapshot after every committed
//! change. A transaction stages a copy of the catalog: mutations inside it are
//! only visible to the transaction until `commit` swaps the copy in.
//!
//! ```text
//! data/
//! └── catalog.snapshot   # <crc32>:<json> single line, replaced atomically
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::SchemaBackend;
use crate::migration::{MigrationError, MigrationResult};
use crate::persistence::{format_line_with_crc32, parse_and_validate_line, write_atomically};
use crate::schema::{
    catalog_shape, CatalogShape, CollectionDescriptor, FieldDescriptor, IndexDefinition,
};

const SNAPSHOT_VERSION: u32 = 1;

/// The collection set itself, in creation order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Catalog {
    collections: Vec<CollectionDescriptor>,
}

impl Catalog {
    /// Ids win over names so a renamed collection stays reachable by id
    fn position(&self, name_or_id: &str) -> Option<usize> {
        self.collections.iter().position(|c| c.id().as_str() == name_or_id).or_else(|| {
            self.collections.iter().position(|c| c.name().eq_ignore_ascii_case(name_or_id))
        })
    }

    fn get(&self, name_or_id: &str) -> MigrationResult<&CollectionDescriptor> {
        self.position(name_or_id)
            .map(|pos| &self.collections[pos])
            .ok_or_else(|| MigrationError::CollectionNotFound(name_or_id.to_string()))
    }

    fn get_mut(&mut self, name_or_id: &str) -> MigrationResult<&mut CollectionDescriptor> {
        match self.position(name_or_id) {
            Some(pos) => Ok(&mut self.collections[pos]),
            None => Err(MigrationError::CollectionNotFound(name_or_id.to_string())),
        }
    }

    fn name_in_use(&self, name: &str) -> bool {
        self.collections.iter().any(|c| c.name().eq_ignore_ascii_case(name))
    }

    /// Index names share one namespace across the catalog
    fn index_owner(&self, index: &str) -> Option<&str> {
        self.collections.iter().find(|c| c.index(index).is_some()).map(|c| c.name())
    }

    fn ensure_relation_target(
        &self,
        owner: &CollectionDescriptor,
        field: &FieldDescriptor,
    ) -> MigrationResult<()> {
        if let Some(target) = field.kind.relation_target() {
            let known =
                target == owner.id() || self.collections.iter().any(|c| c.id() == target);
            if !known {
                return Err(MigrationError::Backend(format!(
                    "relation field '{}.{}' targets unknown collection '{}'",
                    owner.name(),
                    field.name,
                    target
                )));
            }
        }
        Ok(())
    }

    fn create(&mut self, descriptor: &CollectionDescriptor) -> MigrationResult<()> {
        descriptor.validate()?;
        if self.name_in_use(descriptor.name()) {
            return Err(MigrationError::NameConflict(descriptor.name().to_string()));
        }
        if self.collections.iter().any(|c| c.id() == descriptor.id()) {
            return Err(MigrationError::Backend(format!(
                "collection id '{}' already in use",
                descriptor.id()
            )));
        }
        for field in descriptor.fields() {
            self.ensure_relation_target(descriptor, field)?;
        }
        for index in descriptor.indexes() {
            if let Some(owner) = self.index_owner(&index.name) {
                return Err(MigrationError::Backend(format!(
                    "index name '{}' already used by collection '{}'",
                    index.name, owner
                )));
            }
        }
        self.collections.push(descriptor.clone());
        Ok(())
    }

    fn delete(&mut self, name_or_id: &str) -> MigrationResult<()> {
        let pos = self
            .position(name_or_id)
            .ok_or_else(|| MigrationError::CollectionNotFound(name_or_id.to_string()))?;
        let target = self.collections[pos].id().clone();

        for (other_pos, other) in self.collections.iter().enumerate() {
            if other_pos == pos {
                continue;
            }
            let referencing =
                other.fields().iter().find(|f| f.kind.relation_target() == Some(&target));
            if let Some(field) = referencing {
                return Err(MigrationError::Backend(format!(
                    "collection '{}' is still referenced by '{}.{}'",
                    self.collections[pos].name(),
                    other.name(),
                    field.name
                )));
            }
        }

        self.collections.remove(pos);
        Ok(())
    }

    fn rename(&mut self, name_or_id: &str, new_name: &str) -> MigrationResult<()> {
        crate::schema::validate_identifier("collection", new_name)?;
        let pos = self
            .position(name_or_id)
            .ok_or_else(|| MigrationError::CollectionNotFound(name_or_id.to_string()))?;
        let clash = self
            .collections
            .iter()
            .enumerate()
            .any(|(i, c)| i != pos && c.name().eq_ignore_ascii_case(new_name));
        if clash {
            return Err(MigrationError::NameConflict(new_name.to_string()));
        }
        self.collections[pos].set_name(new_name.to_string());
        Ok(())
    }

    fn add_field(
        &mut self,
        collection: &str,
        field: &FieldDescriptor,
        position: Option<usize>,
    ) -> MigrationResult<()> {
        field.validate()?;
        let owner = self.get(collection)?;
        if owner.field(&field.name).is_some() {
            return Err(MigrationError::Backend(format!(
                "field '{}' already exists in collection '{}'",
                field.name,
                owner.name()
            )));
        }
        self.ensure_relation_target(owner, field)?;
        self.get_mut(collection)?.insert_field(field.clone(), position);
        Ok(())
    }

    fn drop_field(&mut self, collection: &str, field: &str) -> MigrationResult<()> {
        let owner = self.get_mut(collection)?;
        if owner.field(field).is_none() {
            return Err(MigrationError::FieldNotFound {
                collection: owner.name().to_string(),
                field: field.to_string(),
            });
        }
        if let Some(index) = owner.indexes().iter().find(|i| i.fields.iter().any(|f| f == field)) {
            return Err(MigrationError::Backend(format!(
                "field '{}.{}' is used by index '{}'",
                owner.name(),
                field,
                index.name
            )));
        }
        owner.remove_field(field);
        Ok(())
    }

    fn create_index(&mut self, collection: &str, index: &IndexDefinition) -> MigrationResult<()> {
        let owner_name = self.get(collection)?.name().to_string();
        let mut index = index.clone();
        index.resolve_name(&owner_name);

        let owner = self.get(collection)?;
        let declared: Vec<&str> = owner.fields().iter().map(|f| f.name.as_str()).collect();
        index.validate(&declared)?;
        if let Some(existing) = self.index_owner(&index.name) {
            return Err(MigrationError::Backend(format!(
                "index name '{}' already used by collection '{}'",
                index.name, existing
            )));
        }
        self.get_mut(collection)?.push_index(index);
        Ok(())
    }

    fn drop_index(&mut self, collection: &str, index: &str) -> MigrationResult<()> {
        let owner = self.get_mut(collection)?;
        if owner.remove_index(index).is_none() {
            return Err(MigrationError::IndexNotFound {
                collection: owner.name().to_string(),
                index: index.to_string(),
            });
        }
        Ok(())
    }
}

/// On-disk form of the catalog
#[derive(Debug, Serialize, Deserialize)]
struct CatalogSnapshot {
    version: u32,
    saved_at: chrono::DateTime<chrono::Utc>,
    collections: Vec<CollectionDescriptor>,
}

#[derive(Debug, Default)]
struct CatalogState {
    live: Catalog,
    /// Copy being mutated by an open transaction
    staged: Option<Catalog>,
}

impl CatalogState {
    fn view(&self) -> &Catalog {
        self.staged.as_ref().unwrap_or(&self.live)
    }
}

/// Schema backend backed by an in-process catalog
pub struct CatalogBackend {
    state: Mutex<CatalogState>,
    snapshot_path: Option<PathBuf>,
    fsync: bool,
}

impl Default for CatalogBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogBackend {
    /// Memory-only catalog (nothing survives the process)
    pub fn new() -> Self {
        Self { state: Mutex::new(CatalogState::default()), snapshot_path: None, fsync: false }
    }

    /// Catalog persisted at `path`, loading the existing snapshot if any
    pub fn open(path: impl AsRef<Path>, fsync: bool) -> MigrationResult<Self> {
        let path = path.as_ref().to_path_buf();
        let live = if path.exists() {
            Self::load_snapshot(&path)?
        } else {
            Catalog::default()
        };
        log::debug!(
            "📂 Catalog opened at {} ({} collections)",
            path.display(),
            live.collections.len()
        );

        Ok(Self {
            state: Mutex::new(CatalogState { live, staged: None }),
            snapshot_path: Some(path),
            fsync,
        })
    }

    fn load_snapshot(path: &Path) -> MigrationResult<Catalog> {
        let content = fs::read_to_string(path)?;
        let content = content.trim();
        if content.is_empty() {
            return Ok(Catalog::default());
        }
        let json = parse_and_validate_line(content).map_err(|e| {
            MigrationError::Backend(format!("catalog snapshot {} corrupted: {}", path.display(), e))
        })?;
        let snapshot: CatalogSnapshot = serde_json::from_str(json)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(MigrationError::Backend(format!(
                "unsupported catalog snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Catalog { collections: snapshot.collections })
    }

    fn persist(&self, catalog: &Catalog) -> MigrationResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let snapshot = CatalogSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: chrono::Utc::now(),
            collections: catalog.collections.clone(),
        };
        let json = serde_json::to_string(&snapshot)?;
        write_atomically(path, &format_line_with_crc32(&json), self.fsync)
    }

    /// Apply `op` to the open transaction, or commit it straight away
    async fn mutate<F>(&self, op: F) -> MigrationResult<()>
    where
        F: FnOnce(&mut Catalog) -> MigrationResult<()> + Send,
    {
        let mut state = self.state.lock().await;
        match state.staged.as_mut() {
            Some(staged) => op(staged),
            None => {
                let mut next = state.live.clone();
                op(&mut next)?;
                self.persist(&next)?;
                state.live = next;
                Ok(())
            }
        }
    }

    /// Observable shape of the committed catalog
    pub async fn shape(&self) -> CatalogShape {
        let state = self.state.lock().await;
        catalog_shape(&state.live.collections)
    }

    /// Whether a transaction is currently open
    pub async fn in_transaction(&self) -> bool {
        self.state.lock().await.staged.is_some()
    }
}

#[async_trait]
impl SchemaBackend for CatalogBackend {
    fn supports_transactions(&self) -> bool {
        true
    }

    async fn begin(&self) -> MigrationResult<()> {
        let mut state = self.state.lock().await;
        if state.staged.is_some() {
            return Err(MigrationError::Backend("a transaction is already open".to_string()));
        }
        state.staged = Some(state.live.clone());
        Ok(())
    }

    async fn commit(&self) -> MigrationResult<()> {
        let mut state = self.state.lock().await;
        let staged = state
            .staged
            .take()
            .ok_or_else(|| MigrationError::Backend("no open transaction to commit".to_string()))?;
        // A failed write leaves the live catalog untouched
        self.persist(&staged)?;
        state.live = staged;
        Ok(())
    }

    async fn rollback(&self) -> MigrationResult<()> {
        let mut state = self.state.lock().await;
        if state.staged.take().is_some() {
            log::debug!("↩️ Catalog transaction discarded");
        }
        Ok(())
    }

    async fn find_collection(&self, name_or_id: &str)
        -> MigrationResult<Option<CollectionDescriptor>>
    {
        let state = self.state.lock().await;
        Ok(state.view().get(name_or_id).ok().cloned())
    }

    async fn list_collections(&self) -> MigrationResult<Vec<CollectionDescriptor>> {
        let state = self.state.lock().await;
        Ok(state.view().collections.clone())
    }

    async fn create_collection(&self, descriptor: &CollectionDescriptor) -> MigrationResult<()> {
        self.mutate(|catalog| catalog.create(descriptor)).await
    }

    async fn delete_collection(&self, name_or_id: &str) -> MigrationResult<()> {
        self.mutate(|catalog| catalog.delete(name_or_id)).await
    }

    async fn rename_collection(&self, name_or_id: &str, new_name: &str) -> MigrationResult<()> {
        self.mutate(|catalog| catalog.rename(name_or_id, new_name)).await
    }

    async fn add_field(
        &self,
        collection: &str,
        field: &FieldDescriptor,
        position: Option<usize>,
    ) -> MigrationResult<()> {
        self.mutate(|catalog| catalog.add_field(collection, field, position)).await
    }

    async fn drop_field(&self, collection: &str, field: &str) -> MigrationResult<()> {
        self.mutate(|catalog| catalog.drop_field(collection, field)).await
    }

    async fn create_index(&self, collection: &str, index: &IndexDefinition)
        -> MigrationResult<()>
    {
        self.mutate(|catalog| catalog.create_index(collection, index)).await
    }

    async fn drop_index(&self, collection: &str, index: &str) -> MigrationResult<()> {
        self.mutate(|catalog| catalog.drop_index(collection, index)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CollectionId;
    use tempfile::TempDir;

    fn cards() -> CollectionDescriptor {
        CollectionDescriptor::builder("cards")
            .field(FieldDescriptor::text("name").required())
            .field(FieldDescriptor::number("cmc"))
            .index(IndexDefinition::unique(["name"]))
            .build()
            .unwrap()
    }

    fn collections_referencing_cards() -> CollectionDescriptor {
        CollectionDescriptor::builder("collections")
            .field(FieldDescriptor::relation("card", CollectionId::from_name("cards")).required())
            .field(FieldDescriptor::number("quantity").with_range(Some(1.0), None))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_find_by_name_or_id() {
        let backend = CatalogBackend::new();
        backend.create_collection(&cards()).await.unwrap();

        let by_name = backend.find_collection("cards").await.unwrap().unwrap();
        let by_id = backend.find_collection(by_name.id().as_str()).await.unwrap().unwrap();
        assert_eq!(by_name, by_id);
        assert_eq!(by_name.indexes().len(), 1);
    }

    #[tokio::test]
    async fn test_name_conflict() {
        let backend = CatalogBackend::new();
        backend.create_collection(&cards()).await.unwrap();
        let other = CollectionDescriptor::builder("CARDS").id("other").build().unwrap();
        let err = backend.create_collection(&other).await.unwrap_err();
        assert!(matches!(err, MigrationError::NameConflict(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let backend = CatalogBackend::new();
        let err = backend.delete_collection("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_relation_target_must_exist_and_blocks_delete() {
        let backend = CatalogBackend::new();
        assert!(backend.create_collection(&collections_referencing_cards()).await.is_err());

        backend.create_collection(&cards()).await.unwrap();
        backend.create_collection(&collections_referencing_cards()).await.unwrap();

        let err = backend.delete_collection("cards").await.unwrap_err();
        assert!(matches!(err, MigrationError::Backend(ref msg) if msg.contains("referenced")));

        backend.delete_collection("collections").await.unwrap();
        backend.delete_collection("cards").await.unwrap();
        assert!(backend.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_field_and_index_operations() {
        let backend = CatalogBackend::new();
        backend.create_collection(&cards()).await.unwrap();

        backend
            .add_field("cards", &FieldDescriptor::text("artist"), Some(1))
            .await
            .unwrap();
        let found = backend.find_collection("cards").await.unwrap().unwrap();
        assert_eq!(found.field_position("artist"), Some(1));

        backend.create_index("cards", &IndexDefinition::new(["artist"])).await.unwrap();
        let err = backend.drop_field("cards", "artist").await.unwrap_err();
        assert!(matches!(err, MigrationError::Backend(_)));

        backend.drop_index("cards", "idx_cards_artist").await.unwrap();
        backend.drop_field("cards", "artist").await.unwrap();

        assert!(backend.drop_index("cards", "idx_cards_artist").await.unwrap_err().is_not_found());
        assert!(backend.drop_field("cards", "artist").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rename_keeps_id() {
        let backend = CatalogBackend::new();
        backend.create_collection(&cards()).await.unwrap();
        let id = CollectionId::from_name("cards");

        backend.rename_collection("cards", "magic_cards").await.unwrap();
        let renamed = backend.find_collection(id.as_str()).await.unwrap().unwrap();
        assert_eq!(renamed.name(), "magic_cards");
        assert!(backend.find_collection("cards").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_changes() {
        let backend = CatalogBackend::new();
        backend.begin().await.unwrap();
        backend.create_collection(&cards()).await.unwrap();
        assert!(backend.find_collection("cards").await.unwrap().is_some());
        assert!(backend.shape().await.is_empty());

        backend.rollback().await.unwrap();
        assert!(!backend.in_transaction().await);
        assert!(backend.find_collection("cards").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_commit_publishes_changes() {
        let backend = CatalogBackend::new();
        backend.begin().await.unwrap();
        assert!(backend.begin().await.is_err());
        backend.create_collection(&cards()).await.unwrap();
        backend.commit().await.unwrap();
        assert!(backend.shape().await.contains_key("cards"));
        assert!(backend.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.snapshot");
        {
            let backend = CatalogBackend::open(&path, false).unwrap();
            backend.create_collection(&cards()).await.unwrap();
        }
        let reopened = CatalogBackend::open(&path, false).unwrap();
        let found = reopened.find_collection("cards").await.unwrap().unwrap();
        assert_eq!(found, cards());
    }

    #[tokio::test]
    async fn test_corrupted_snapshot_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.snapshot");
        {
            let backend = CatalogBackend::open(&path, false).unwrap();
            backend.create_collection(&cards()).await.unwrap();
        }
        let content = fs::read_to_string(&path).unwrap().replace("cmc", "cmx");
        fs::write(&path, content).unwrap();
        assert!(CatalogBackend::open(&path, false).is_err());
    }
}
