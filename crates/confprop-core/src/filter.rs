//! Declarative type/operation filter over change records.
//!
//! Used twice on the same stream: coarsely by the store when a subscriber
//! registers, and again by the dispatcher before a record may enter a batch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{ChangeOperation, ChangeRecord, EntityType};

/// Conjunction `type ∈ types ∧ operation ∈ operations`. Pure and stateless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPredicate {
    types: BTreeSet<EntityType>,
    operations: BTreeSet<ChangeOperation>,
}

impl FilterPredicate {
    pub fn new(
        types: impl IntoIterator<Item = EntityType>,
        operations: impl IntoIterator<Item = ChangeOperation>,
    ) -> Self {
        Self {
            types: types.into_iter().collect(),
            operations: operations.into_iter().collect(),
        }
    }

    /// Schedule and period inserts/modifications: the writes that can change
    /// what a scheduler should be doing.
    pub fn schedule_changes() -> Self {
        Self::new(
            [EntityType::Schedule, EntityType::Period],
            [ChangeOperation::Insert, ChangeOperation::Modify],
        )
    }

    pub fn matches(&self, record: &ChangeRecord) -> bool {
        self.types.contains(&record.entity_type) && self.operations.contains(&record.operation)
    }

    pub fn types(&self) -> &BTreeSet<EntityType> {
        &self.types
    }

    pub fn operations(&self) -> &BTreeSet<ChangeOperation> {
        &self.operations
    }
}

impl Default for FilterPredicate {
    fn default() -> Self {
        Self::schedule_changes()
    }
}
