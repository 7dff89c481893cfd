//! Index definitions attached to a collection

use serde::{Deserialize, Serialize};

use super::validate_identifier;
use crate::migration::{MigrationError, MigrationResult};

/// Collating sequence used when comparing indexed text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collation {
    Binary,
    Nocase,
    Rtrim,
}

/// Index over one field or an ordered tuple of fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Empty until the owning descriptor derives `idx_<collection>_<fields>`
    #[serde(default)]
    pub name: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<Collation>,
}

impl IndexDefinition {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: String::new(),
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
            collation: None,
        }
    }

    /// Shorthand for a unique index
    pub fn unique<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = Self::new(fields);
        index.unique = true;
        index
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = Some(collation);
        self
    }

    /// Name derived from the collection and field list
    pub fn derived_name(collection: &str, fields: &[String]) -> String {
        format!("idx_{}_{}", collection, fields.join("_"))
    }

    /// Fill in the derived name when none was given
    pub(crate) fn resolve_name(&mut self, collection: &str) {
        if self.name.is_empty() {
            self.name = Self::derived_name(collection, &self.fields);
        }
    }

    /// Check the index against the set of declared field names
    pub fn validate(&self, declared: &[&str]) -> MigrationResult<()> {
        validate_identifier("index", &self.name)?;
        if self.fields.is_empty() {
            return Err(MigrationError::InvalidDescriptor(format!(
                "index '{}' has no fields",
                self.name
            )));
        }
        for (pos, field) in self.fields.iter().enumerate() {
            if self.fields[..pos].contains(field) {
                return Err(MigrationError::InvalidDescriptor(format!(
                    "index '{}' lists field '{}' twice",
                    self.name, field
                )));
            }
            if field != "id" && !declared.contains(&field.as_str()) {
                return Err(MigrationError::InvalidDescriptor(format!(
                    "index '{}' references undeclared field '{}'",
                    self.name, field
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_name() {
        let mut index = IndexDefinition::new(["user_id", "card_id"]);
        index.resolve_name("collections");
        assert_eq!(index.name, "idx_collections_user_id_card_id");

        let mut named = IndexDefinition::unique(["data_type"]).named("idx_sync_type");
        named.resolve_name("sync_status");
        assert_eq!(named.name, "idx_sync_type");
        assert!(named.unique);
    }

    #[test]
    fn test_undeclared_field_rejected() {
        let mut index = IndexDefinition::new(["missing"]);
        index.resolve_name("cards");
        let err = index.validate(&["name"]).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_implicit_id_is_indexable() {
        let mut index = IndexDefinition::new(["id", "name"]);
        index.resolve_name("cards");
        assert!(index.validate(&["name"]).is_ok());
    }
}
