//! Schema descriptors
//!
//! A [`CollectionDescriptor`] is the immutable, declarative shape of one collection:
//! its stable id, its name, the ordered field list and the index definitions.
//! Descriptors are validated when they are built, so a malformed schema never
//! reaches a migration step or the storage backend.
//!
//! ```rust,ignore
//! use strata_core::schema::{CollectionDescriptor, FieldDescriptor, IndexDefinition};
//!
//! let cards = CollectionDescriptor::builder("cards")
//!     .field(FieldDescriptor::text("name").required().with_length(Some(1), Some(255)))
//!     .field(FieldDescriptor::number("cmc").with_range(Some(0.0), None))
//!     .index(IndexDefinition::unique(["name"]))
//!     .build()?;
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::migration::{MigrationError, MigrationResult};
use crate::persistence::calculate_crc32;

pub mod field;
pub mod index;

pub use field::{FieldDescriptor, FieldKind};
pub use index::{Collation, IndexDefinition};

const MAX_IDENTIFIER_LEN: usize = 100;

/// Opaque, stable collection identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(String);

impl CollectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Deterministic id for a collection name: `pbc_<crc32(name)>`
    pub fn from_name(name: &str) -> Self {
        Self(format!("pbc_{}", calculate_crc32(name.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CollectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Check a collection, field or index name
pub(crate) fn validate_identifier(what: &str, name: &str) -> MigrationResult<()> {
    let invalid = |reason: &str| {
        Err(MigrationError::InvalidDescriptor(format!("{} name '{}' {}", what, name, reason)))
    };

    if name.is_empty() {
        return invalid("is empty");
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return invalid("is too long");
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return invalid("starts with a digit");
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return invalid("contains characters other than [A-Za-z0-9_]");
    }
    Ok(())
}

/// Immutable declaration of one collection's shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    id: CollectionId,
    name: String,
    fields: Vec<FieldDescriptor>,
    #[serde(default)]
    indexes: Vec<IndexDefinition>,
}

impl CollectionDescriptor {
    /// Start building a descriptor for `name`
    pub fn builder(name: impl Into<String>) -> CollectionBuilder {
        CollectionBuilder::new(name)
    }

    pub fn id(&self) -> &CollectionId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Position of a field in declaration order
    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Ids of the collections this one points at through relation fields
    pub fn relation_targets(&self) -> impl Iterator<Item = &CollectionId> {
        self.fields.iter().filter_map(|f| f.kind.relation_target())
    }

    /// Same collection without indexes (indexes are realised separately)
    pub fn without_indexes(&self) -> Self {
        Self { indexes: Vec::new(), ..self.clone() }
    }

    /// Observable shape, ignoring internal identifiers
    pub fn shape(&self) -> SchemaShape {
        SchemaShape {
            name: self.name.clone(),
            fields: self
                .fields
                .iter()
                .map(|f| {
                    (f.name.clone(), FieldShape { kind: f.kind.clone(), required: f.required })
                })
                .collect(),
            indexes: self.indexes.iter().map(|i| (i.name.clone(), i.clone())).collect(),
        }
    }

    /// Full validation of the descriptor invariants
    pub fn validate(&self) -> MigrationResult<()> {
        validate_identifier("collection", &self.name)?;
        if self.id.as_str().is_empty() {
            return Err(MigrationError::InvalidDescriptor(format!(
                "collection '{}' has an empty id",
                self.name
            )));
        }

        let mut declared: Vec<&str> = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            field.validate()?;
            if declared.contains(&field.name.as_str()) {
                return Err(MigrationError::InvalidDescriptor(format!(
                    "collection '{}' declares field '{}' twice",
                    self.name, field.name
                )));
            }
            declared.push(&field.name);
        }

        let mut index_names: Vec<&str> = Vec::with_capacity(self.indexes.len());
        for index in &self.indexes {
            index.validate(&declared)?;
            if index_names.contains(&index.name.as_str()) {
                return Err(MigrationError::InvalidDescriptor(format!(
                    "collection '{}' declares index '{}' twice",
                    self.name, index.name
                )));
            }
            index_names.push(&index.name);
        }
        Ok(())
    }

    // Catalog-internal mutators: descriptors handed to callers stay immutable.

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn insert_field(&mut self, field: FieldDescriptor, position: Option<usize>) {
        match position {
            Some(pos) if pos < self.fields.len() => self.fields.insert(pos, field),
            _ => self.fields.push(field),
        }
    }

    pub(crate) fn remove_field(&mut self, name: &str) -> Option<FieldDescriptor> {
        let pos = self.field_position(name)?;
        Some(self.fields.remove(pos))
    }

    pub(crate) fn push_index(&mut self, index: IndexDefinition) {
        self.indexes.push(index);
    }

    pub(crate) fn remove_index(&mut self, name: &str) -> Option<IndexDefinition> {
        let pos = self.indexes.iter().position(|i| i.name == name)?;
        Some(self.indexes.remove(pos))
    }
}

/// Builder validating a [`CollectionDescriptor`] at `build()` time
#[derive(Debug, Clone)]
pub struct CollectionBuilder {
    id: Option<CollectionId>,
    name: String,
    fields: Vec<FieldDescriptor>,
    indexes: Vec<IndexDefinition>,
}

impl CollectionBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self { id: None, name: name.into(), fields: Vec::new(), indexes: Vec::new() }
    }

    /// Explicit id (defaults to [`CollectionId::from_name`])
    pub fn id(mut self, id: impl Into<CollectionId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn build(self) -> MigrationResult<CollectionDescriptor> {
        let id = self.id.unwrap_or_else(|| CollectionId::from_name(&self.name));
        let mut indexes = self.indexes;
        for index in &mut indexes {
            index.resolve_name(&self.name);
        }
        let descriptor = CollectionDescriptor { id, name: self.name, fields: self.fields, indexes };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Observable shape of a field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldShape {
    pub kind: FieldKind,
    pub required: bool,
}

/// Observable shape of a collection: name, field set and index set
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaShape {
    pub name: String,
    pub fields: BTreeMap<String, FieldShape>,
    pub indexes: BTreeMap<String, IndexDefinition>,
}

/// Observable shape of a whole collection set, keyed by collection name
pub type CatalogShape = BTreeMap<String, SchemaShape>;

/// Shape of every collection in `collections`
pub fn catalog_shape<'a>(
    collections: impl IntoIterator<Item = &'a CollectionDescriptor>,
) -> CatalogShape {
    collections.into_iter().map(|c| (c.name().to_string(), c.shape())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cards() -> CollectionDescriptor {
        CollectionDescriptor::builder("cards")
            .field(FieldDescriptor::text("scryfall_id").required().with_length(Some(1), Some(255)))
            .field(FieldDescriptor::text("name").required())
            .field(FieldDescriptor::number("cmc").with_range(Some(0.0), None))
            .index(IndexDefinition::unique(["scryfall_id"]))
            .index(IndexDefinition::new(["name", "cmc"]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_derives_id_and_index_names() {
        let desc = cards();
        assert_eq!(desc.id(), &CollectionId::from_name("cards"));
        assert!(desc.id().as_str().starts_with("pbc_"));
        assert_eq!(desc.indexes()[0].name, "idx_cards_scryfall_id");
        assert_eq!(desc.indexes()[1].name, "idx_cards_name_cmc");
        assert_eq!(desc.field_position("cmc"), Some(2));
    }

    #[test]
    fn test_id_is_stable_across_builds() {
        assert_eq!(cards().id(), cards().id());
        let explicit = CollectionDescriptor::builder("cards").id("cards_id").build().unwrap();
        assert_eq!(explicit.id().as_str(), "cards_id");
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = CollectionDescriptor::builder("decks")
            .field(FieldDescriptor::text("name"))
            .field(FieldDescriptor::number("name"))
            .build()
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidDescriptor(_)));
    }

    #[test]
    fn test_index_on_undeclared_field_rejected() {
        let result = CollectionDescriptor::builder("decks")
            .field(FieldDescriptor::text("name"))
            .index(IndexDefinition::new(["format"]))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_index_name_rejected() {
        let result = CollectionDescriptor::builder("decks")
            .field(FieldDescriptor::text("name"))
            .index(IndexDefinition::new(["name"]))
            .index(IndexDefinition::unique(["name"]))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_collection_name_rejected() {
        assert!(CollectionDescriptor::builder("").build().is_err());
        assert!(CollectionDescriptor::builder("card-sets").build().is_err());
    }

    #[test]
    fn test_shape_ignores_ids_and_field_order() {
        let a = CollectionDescriptor::builder("decks")
            .id("one")
            .field(FieldDescriptor::text("name"))
            .field(FieldDescriptor::bool("public"))
            .build()
            .unwrap();
        let b = CollectionDescriptor::builder("decks")
            .id("two")
            .field(FieldDescriptor::bool("public"))
            .field(FieldDescriptor::text("name"))
            .build()
            .unwrap();
        assert_eq!(a.shape(), b.shape());
    }

    #[test]
    fn test_snapshot_serde() {
        let desc = cards();
        let json = serde_json::to_string(&desc).unwrap();
        let back: CollectionDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, desc);
    }
}
