//! Ordered, read-only set of known migration steps

use std::collections::HashSet;

use super::{Migration, MigrationError, MigrationResult, StepId};

/// Every known step, sorted ascending by id
///
/// Built once at startup; duplicate ids are rejected at construction.
pub struct MigrationRegistry {
    steps: Vec<Box<dyn Migration>>,
}

impl MigrationRegistry {
    pub fn new(mut steps: Vec<Box<dyn Migration>>) -> MigrationResult<Self> {
        let mut seen = HashSet::with_capacity(steps.len());
        for step in &steps {
            if !seen.insert(step.id().clone()) {
                return Err(MigrationError::DuplicateStepId(step.id().clone()));
            }
        }
        steps.sort_by(|a, b| a.id().cmp(b.id()));
        log::debug!("📋 Migration registry built with {} steps", steps.len());
        Ok(Self { steps })
    }

    pub fn empty() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn get(&self, id: &StepId) -> Option<&dyn Migration> {
        self.steps
            .binary_search_by(|step| step.id().cmp(id))
            .ok()
            .map(|pos| self.steps[pos].as_ref())
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.get(id).is_some()
    }

    /// Resolve a user supplied id string against the registry
    pub fn resolve(&self, raw: &str) -> MigrationResult<StepId> {
        let id = StepId::parse(raw).map_err(|_| MigrationError::UnknownStep(raw.to_string()))?;
        if self.contains(&id) {
            Ok(id)
        } else {
            Err(MigrationError::UnknownStep(raw.to_string()))
        }
    }

    pub fn latest(&self) -> Option<&StepId> {
        self.steps.last().map(|step| step.id())
    }

    pub fn ids(&self) -> impl Iterator<Item = &StepId> {
        self.steps.iter().map(|step| step.id())
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &dyn Migration> {
        self.steps.iter().map(|step| step.as_ref())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ids().map(|id| id.to_string())).finish()
    }
}
