//! Migration steps
//!
//! A step is a paired forward/backward transformation tagged with a [`StepId`].
//! Most steps are [`DeclarativeStep`]s: a list of typed [`SchemaOperation`]s whose
//! backward list is derived by inverting every operation and reversing the order.
//! Steps that need more than that implement [`Migration`] directly.
//!
//! ```rust,ignore
//! let step = DeclarativeStep::builder("1752710000_create_collections")
//!     .describe("cards and user collections")
//!     .create_collection(cards)
//!     .create_collection(collections)
//!     .build()?;
//! // backward: drop collections' indexes, delete collections, drop cards' indexes, delete cards
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::{tolerate_missing, MigrationError, MigrationResult};
use crate::backend::SchemaBackend;
use crate::schema::{CollectionDescriptor, FieldDescriptor, IndexDefinition};

// =============================================================================
// STEP ID
// =============================================================================

/// Totally ordered step identifier: `<unix-seconds>_<slug>`
///
/// Ordering is numeric on the timestamp, then lexicographic on the slug, so
/// `999_b` sorts before `1000_a` regardless of digit count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepId {
    timestamp: u64,
    slug: String,
}

impl StepId {
    pub fn new(timestamp: u64, slug: impl Into<String>) -> MigrationResult<Self> {
        let slug = slug.into();
        let valid = !slug.is_empty()
            && slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(MigrationError::InvalidStepId(format!("{}_{}", timestamp, slug)));
        }
        Ok(Self { timestamp, slug })
    }

    /// Step id stamped with the current time
    pub fn generate(slug: impl Into<String>) -> MigrationResult<Self> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        Self::new(now, slug)
    }

    pub fn parse(raw: &str) -> MigrationResult<Self> {
        let invalid = || MigrationError::InvalidStepId(raw.to_string());
        let (digits, slug) = raw.split_once('_').ok_or_else(invalid)?;
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let timestamp = digits.parse::<u64>().map_err(|_| invalid())?;
        Self::new(timestamp, slug).map_err(|_| invalid())
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }
}

impl Ord for StepId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp.cmp(&other.timestamp).then_with(|| self.slug.cmp(&other.slug))
    }
}

impl PartialOrd for StepId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.timestamp, self.slug)
    }
}

impl FromStr for StepId {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StepId {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StepId> for String {
    fn from(id: StepId) -> Self {
        id.to_string()
    }
}

// =============================================================================
// MIGRATION TRAIT
// =============================================================================

/// A versioned, reversible unit of schema change
///
/// `backward` must exactly undo `forward`: same collection set, same fields, same
/// indexes afterwards. Indexes are dropped before their owning collection and
/// collections are dropped in the reverse of their creation order.
#[async_trait]
pub trait Migration: Send + Sync {
    fn id(&self) -> &StepId;

    /// Human readable summary used in logs and status listings
    fn description(&self) -> &str {
        ""
    }

    async fn forward(&self, backend: &dyn SchemaBackend) -> MigrationResult<()>;

    async fn backward(&self, backend: &dyn SchemaBackend) -> MigrationResult<()>;

    /// Forward operations, when the step is declarative
    ///
    /// The consistency check replays these to know what an applied step should
    /// have left behind. Opaque steps return `None` and are not verified.
    fn operations(&self) -> Option<&[SchemaOperation]> {
        None
    }
}

// =============================================================================
// SCHEMA OPERATIONS
// =============================================================================

/// One typed schema change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaOperation {
    CreateCollection(CollectionDescriptor),
    /// Carries the full descriptor so the collection can be recreated
    DeleteCollection(CollectionDescriptor),
    RenameCollection {
        from: String,
        to: String,
    },
    AddField {
        collection: String,
        field: FieldDescriptor,
        #[serde(default)]
        position: Option<usize>,
    },
    DropField {
        collection: String,
        field: FieldDescriptor,
        #[serde(default)]
        position: Option<usize>,
    },
    CreateIndex {
        collection: String,
        index: IndexDefinition,
    },
    DropIndex {
        collection: String,
        index: IndexDefinition,
    },
}

impl SchemaOperation {
    /// Realise the operation through the backend
    ///
    /// Destructive operations first check that the live object still matches the
    /// definition they carry, since that definition is what the inverse restores.
    pub async fn apply(&self, backend: &dyn SchemaBackend) -> MigrationResult<()> {
        match self {
            SchemaOperation::CreateCollection(descriptor) => {
                backend.create_collection(descriptor).await
            }
            SchemaOperation::DeleteCollection(descriptor) => {
                let id = descriptor.id().as_str();
                if let Some(live) = backend.find_collection(id).await? {
                    if let Some(detail) = restore_mismatch(&live, descriptor) {
                        return Err(MigrationError::InvalidDescriptor(format!(
                            "refusing to delete collection '{}': {}",
                            live.name(),
                            detail
                        )));
                    }
                }
                backend.delete_collection(id).await
            }
            SchemaOperation::RenameCollection { from, to } => {
                backend.rename_collection(from, to).await
            }
            SchemaOperation::AddField { collection, field, position } => {
                backend.add_field(collection, field, *position).await
            }
            SchemaOperation::DropField { collection, field, .. } => {
                let live = backend.find_collection(collection).await?;
                if let Some(current) = live.as_ref().and_then(|c| c.field(&field.name)) {
                    if current != field {
                        return Err(MigrationError::InvalidDescriptor(format!(
                            "refusing to drop field '{}.{}': live definition differs from the \
                             one kept to restore it",
                            collection, field.name
                        )));
                    }
                }
                backend.drop_field(collection, &field.name).await
            }
            SchemaOperation::CreateIndex { collection, index } => {
                backend.create_index(collection, index).await
            }
            SchemaOperation::DropIndex { collection, index } => {
                let live = backend.find_collection(collection).await?;
                if let Some(current) = live.as_ref().and_then(|c| c.index(&index.name)) {
                    if current != index {
                        return Err(MigrationError::InvalidDescriptor(format!(
                            "refusing to drop index '{}' on '{}': live definition differs from \
                             the one kept to restore it",
                            index.name, collection
                        )));
                    }
                }
                backend.drop_index(collection, &index.name).await
            }
        }
    }

    /// Operations that undo this one, in execution order
    pub fn inverse(&self) -> Vec<SchemaOperation> {
        match self {
            SchemaOperation::CreateCollection(descriptor) => {
                let collection = descriptor.id().to_string();
                let mut ops: Vec<SchemaOperation> = descriptor
                    .indexes()
                    .iter()
                    .rev()
                    .map(|index| SchemaOperation::DropIndex {
                        collection: collection.clone(),
                        index: index.clone(),
                    })
                    .collect();
                ops.push(SchemaOperation::DeleteCollection(descriptor.without_indexes()));
                ops
            }
            SchemaOperation::DeleteCollection(descriptor) => {
                vec![SchemaOperation::CreateCollection(descriptor.clone())]
            }
            SchemaOperation::RenameCollection { from, to } => {
                vec![SchemaOperation::RenameCollection { from: to.clone(), to: from.clone() }]
            }
            SchemaOperation::AddField { collection, field, position } => {
                vec![SchemaOperation::DropField {
                    collection: collection.clone(),
                    field: field.clone(),
                    position: *position,
                }]
            }
            SchemaOperation::DropField { collection, field, position } => {
                vec![SchemaOperation::AddField {
                    collection: collection.clone(),
                    field: field.clone(),
                    position: *position,
                }]
            }
            SchemaOperation::CreateIndex { collection, index } => {
                vec![SchemaOperation::DropIndex {
                    collection: collection.clone(),
                    index: index.clone(),
                }]
            }
            SchemaOperation::DropIndex { collection, index } => {
                vec![SchemaOperation::CreateIndex {
                    collection: collection.clone(),
                    index: index.clone(),
                }]
            }
        }
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            SchemaOperation::CreateCollection(d) => format!("create collection '{}'", d.name()),
            SchemaOperation::DeleteCollection(d) => format!("delete collection '{}'", d.name()),
            SchemaOperation::RenameCollection { from, to } => {
                format!("rename collection '{}' to '{}'", from, to)
            }
            SchemaOperation::AddField { collection, field, .. } => {
                format!("add field '{}.{}'", collection, field.name)
            }
            SchemaOperation::DropField { collection, field, .. } => {
                format!("drop field '{}.{}'", collection, field.name)
            }
            SchemaOperation::CreateIndex { collection, index } => {
                format!("create index '{}' on '{}'", index.name, collection)
            }
            SchemaOperation::DropIndex { collection, index } => {
                format!("drop index '{}' on '{}'", index.name, collection)
            }
        }
    }
}

/// Why `live` could not be restored from `kept`, if it could not
fn restore_mismatch(live: &CollectionDescriptor, kept: &CollectionDescriptor) -> Option<String> {
    if live.name() != kept.name() {
        return Some(format!("it is now named '{}', not '{}'", live.name(), kept.name()));
    }
    for field in live.fields() {
        match kept.field(&field.name) {
            None => return Some(format!("live field '{}' is not in the descriptor", field.name)),
            Some(k) if k != field => return Some(format!("field '{}' has changed", field.name)),
            Some(_) => {}
        }
    }
    if let Some(gone) = kept.fields().iter().find(|f| live.field(&f.name).is_none()) {
        return Some(format!("field '{}' is no longer live", gone.name));
    }
    for index in live.indexes() {
        match kept.index(&index.name) {
            None => return Some(format!("live index '{}' is not in the descriptor", index.name)),
            Some(k) if k != index => return Some(format!("index '{}' has changed", index.name)),
            Some(_) => {}
        }
    }
    if let Some(gone) = kept.indexes().iter().find(|i| live.index(&i.name).is_none()) {
        return Some(format!("index '{}' is no longer live", gone.name));
    }
    None
}

// =============================================================================
// DECLARATIVE STEP
// =============================================================================

/// Step made of schema operations with an automatically derived backward list
#[derive(Debug, Clone)]
pub struct DeclarativeStep {
    id: StepId,
    description: String,
    forward: Vec<SchemaOperation>,
    backward: Vec<SchemaOperation>,
}

impl DeclarativeStep {
    pub fn builder(id: &str) -> StepBuilder {
        StepBuilder::new(id)
    }

    pub fn forward_operations(&self) -> &[SchemaOperation] {
        &self.forward
    }

    pub fn backward_operations(&self) -> &[SchemaOperation] {
        &self.backward
    }
}

#[async_trait]
impl Migration for DeclarativeStep {
    fn id(&self) -> &StepId {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn forward(&self, backend: &dyn SchemaBackend) -> MigrationResult<()> {
        for op in &self.forward {
            log::debug!("   ▶ {}", op.describe());
            op.apply(backend).await?;
        }
        Ok(())
    }

    async fn backward(&self, backend: &dyn SchemaBackend) -> MigrationResult<()> {
        for op in &self.backward {
            log::debug!("   ◀ {}", op.describe());
            tolerate_missing(op.apply(backend).await, &format!("{} ({})", op.describe(), self.id))?;
        }
        Ok(())
    }

    fn operations(&self) -> Option<&[SchemaOperation]> {
        Some(&self.forward)
    }
}

/// Builder for [`DeclarativeStep`]
#[derive(Debug, Clone)]
pub struct StepBuilder {
    id: String,
    description: String,
    forward: Vec<SchemaOperation>,
    backward: Option<Vec<SchemaOperation>>,
}

impl StepBuilder {
    fn new(id: &str) -> Self {
        Self { id: id.to_string(), description: String::new(), forward: Vec::new(), backward: None }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn create_collection(mut self, descriptor: CollectionDescriptor) -> Self {
        self.forward.push(SchemaOperation::CreateCollection(descriptor));
        self
    }

    /// Delete a collection; the descriptor is what backward recreates
    pub fn delete_collection(mut self, descriptor: CollectionDescriptor) -> Self {
        self.forward.push(SchemaOperation::DeleteCollection(descriptor));
        self
    }

    pub fn rename_collection(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.forward.push(SchemaOperation::RenameCollection { from: from.into(), to: to.into() });
        self
    }

    pub fn add_field(mut self, collection: impl Into<String>, field: FieldDescriptor) -> Self {
        self.forward.push(SchemaOperation::AddField {
            collection: collection.into(),
            field,
            position: None,
        });
        self
    }

    pub fn add_field_at(
        mut self,
        collection: impl Into<String>,
        field: FieldDescriptor,
        position: usize,
    ) -> Self {
        self.forward.push(SchemaOperation::AddField {
            collection: collection.into(),
            field,
            position: Some(position),
        });
        self
    }

    /// Drop a field; the descriptor (and position) is what backward restores
    pub fn drop_field(mut self, collection: impl Into<String>, field: FieldDescriptor) -> Self {
        self.forward.push(SchemaOperation::DropField {
            collection: collection.into(),
            field,
            position: None,
        });
        self
    }

    pub fn drop_field_at(
        mut self,
        collection: impl Into<String>,
        field: FieldDescriptor,
        position: usize,
    ) -> Self {
        self.forward.push(SchemaOperation::DropField {
            collection: collection.into(),
            field,
            position: Some(position),
        });
        self
    }

    pub fn create_index(mut self, collection: impl Into<String>, mut index: IndexDefinition) -> Self {
        let collection = collection.into();
        index.resolve_name(&collection);
        self.forward.push(SchemaOperation::CreateIndex { collection, index });
        self
    }

    /// Drop an index; the definition is what backward recreates
    pub fn drop_index(mut self, collection: impl Into<String>, mut index: IndexDefinition) -> Self {
        let collection = collection.into();
        index.resolve_name(&collection);
        self.forward.push(SchemaOperation::DropIndex { collection, index });
        self
    }

    /// Replace the derived backward list
    pub fn with_backward(mut self, operations: Vec<SchemaOperation>) -> Self {
        self.backward = Some(operations);
        self
    }

    pub fn build(self) -> MigrationResult<DeclarativeStep> {
        let id = StepId::parse(&self.id)?;
        if self.forward.is_empty() {
            return Err(MigrationError::InvalidDescriptor(format!(
                "step {} has no operations",
                id
            )));
        }
        for op in &self.forward {
            if let SchemaOperation::AddField { field, .. } | SchemaOperation::DropField { field, .. } = op {
                field.validate()?;
            }
        }

        let backward = match self.backward {
            Some(ops) => ops,
            None => self.forward.iter().rev().flat_map(SchemaOperation::inverse).collect(),
        };

        Ok(DeclarativeStep { id, description: self.description, forward: self.forward, backward })
    }
}
