//! Field descriptors and their type-specific constraint sets

use serde::{Deserialize, Serialize};

use super::{validate_identifier, CollectionId};
use crate::migration::{MigrationError, MigrationResult};

/// Type of a field together with the constraints that only make sense for that type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(default)]
        only_int: bool,
    },
    Bool,
    Date {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<chrono::DateTime<chrono::Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<chrono::DateTime<chrono::Utc>>,
    },
    Select {
        values: Vec<String>,
        #[serde(default = "default_max_select")]
        max_select: usize,
    },
    Json {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_size: Option<u64>,
    },
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_size: Option<u64>,
        #[serde(default)]
        mime_types: Vec<String>,
        #[serde(default = "default_max_select")]
        max_select: usize,
    },
    Relation {
        collection_id: CollectionId,
        #[serde(default = "default_max_select")]
        max_select: usize,
        #[serde(default)]
        cascade_delete: bool,
    },
}

fn default_max_select() -> usize {
    1
}

impl FieldKind {
    /// Short type name (`text`, `number`, ...) used in logs and shapes
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Text { .. } => "text",
            FieldKind::Number { .. } => "number",
            FieldKind::Bool => "bool",
            FieldKind::Date { .. } => "date",
            FieldKind::Select { .. } => "select",
            FieldKind::Json { .. } => "json",
            FieldKind::File { .. } => "file",
            FieldKind::Relation { .. } => "relation",
        }
    }

    /// Target collection of a relation field
    pub fn relation_target(&self) -> Option<&CollectionId> {
        match self {
            FieldKind::Relation { collection_id, .. } => Some(collection_id),
            _ => None,
        }
    }
}

/// One declared field of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl FieldDescriptor {
    /// Create a field of the given kind (optional, no default)
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self { name: name.into(), kind, required: false, hidden: false, default: None }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text { min: None, max: None, pattern: None })
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number { min: None, max: None, only_int: false })
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date { min: None, max: None })
    }

    pub fn select<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            FieldKind::Select { values: values.into_iter().map(Into::into).collect(), max_select: 1 },
        )
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Json { max_size: None })
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::File { max_size: None, mime_types: Vec::new(), max_select: 1 })
    }

    pub fn relation(name: impl Into<String>, collection_id: impl Into<CollectionId>) -> Self {
        Self::new(
            name,
            FieldKind::Relation {
                collection_id: collection_id.into(),
                max_select: 1,
                cascade_delete: false,
            },
        )
    }

    /// Mark the field as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Length bounds for text fields (ignored on other kinds)
    pub fn with_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        if let FieldKind::Text { min: ref mut lo, max: ref mut hi, .. } = self.kind {
            *lo = min;
            *hi = max;
        }
        self
    }

    pub fn with_pattern(mut self, regex: impl Into<String>) -> Self {
        if let FieldKind::Text { ref mut pattern, .. } = self.kind {
            *pattern = Some(regex.into());
        }
        self
    }

    /// Value bounds for number fields (ignored on other kinds)
    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        if let FieldKind::Number { min: ref mut lo, max: ref mut hi, .. } = self.kind {
            *lo = min;
            *hi = max;
        }
        self
    }

    pub fn integer_only(mut self) -> Self {
        if let FieldKind::Number { ref mut only_int, .. } = self.kind {
            *only_int = true;
        }
        self
    }

    /// Maximum number of selected values (select, file, relation)
    pub fn with_max_select(mut self, count: usize) -> Self {
        match self.kind {
            FieldKind::Select { ref mut max_select, .. }
            | FieldKind::File { ref mut max_select, .. }
            | FieldKind::Relation { ref mut max_select, .. } => *max_select = count,
            _ => {}
        }
        self
    }

    /// Maximum payload size in bytes (json, file)
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        match self.kind {
            FieldKind::Json { ref mut max_size } | FieldKind::File { ref mut max_size, .. } => {
                *max_size = Some(bytes)
            }
            _ => {}
        }
        self
    }

    pub fn with_mime_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let FieldKind::File { ref mut mime_types, .. } = self.kind {
            *mime_types = types.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn cascade_delete(mut self) -> Self {
        if let FieldKind::Relation { ref mut cascade_delete, .. } = self.kind {
            *cascade_delete = true;
        }
        self
    }

    /// Check the field's own constraints
    pub fn validate(&self) -> MigrationResult<()> {
        validate_identifier("field", &self.name)?;
        if self.name == "id" {
            return Err(MigrationError::InvalidDescriptor(
                "field name 'id' is reserved".to_string(),
            ));
        }

        let invalid = |reason: String| {
            Err(MigrationError::InvalidDescriptor(format!("field '{}': {}", self.name, reason)))
        };

        match &self.kind {
            FieldKind::Text { min: Some(min), max: Some(max), .. } if min > max => {
                invalid(format!("min length {} exceeds max length {}", min, max))
            }
            FieldKind::Number { min: Some(min), max: Some(max), .. } if min > max => {
                invalid(format!("min {} exceeds max {}", min, max))
            }
            FieldKind::Date { min: Some(min), max: Some(max) } if min > max => {
                invalid(format!("min date {} is after max date {}", min, max))
            }
            FieldKind::Select { values, .. } if values.is_empty() => {
                invalid("select field needs at least one allowed value".to_string())
            }
            FieldKind::Select { values, max_select } if *max_select > values.len() => invalid(
                format!("max_select {} exceeds {} allowed values", max_select, values.len()),
            ),
            FieldKind::Relation { collection_id, .. } if collection_id.as_str().is_empty() => {
                invalid("relation field has no target collection".to_string())
            }
            FieldKind::Select { max_select: 0, .. }
            | FieldKind::File { max_select: 0, .. }
            | FieldKind::Relation { max_select: 0, .. } => {
                invalid("max_select must be at least 1".to_string())
            }
            _ => Ok(()),
        }
    }
}
