//! Per-kind row factory.
//!
//! Maps each `EntityKind` to the behavior object attached to its rows, so
//! kind-specific presentation stays out of the synchronization algorithm.

use crate::model::entity::{EntityKind, EntitySnapshot};
use crate::model::row::{NamedRow, ParameterRow, RowBehavior, RowError, RowNode, ValueSetRow};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of row behaviors keyed by entity kind.
pub struct RowFactory {
    behaviors: HashMap<EntityKind, Arc<dyn RowBehavior>>,
    fallback: Arc<dyn RowBehavior>,
}

impl Default for RowFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl RowFactory {
    /// Empty registry; every kind resolves to a named leaf row.
    pub fn empty() -> Self {
        Self {
            behaviors: HashMap::new(),
            fallback: Arc::new(NamedRow { container: false }),
        }
    }

    /// Registry with the behaviors of the file-store and element browsers.
    pub fn with_defaults() -> Self {
        let mut factory = Self::empty();
        let container: Arc<dyn RowBehavior> = Arc::new(NamedRow { container: true });
        let leaf: Arc<dyn RowBehavior> = Arc::new(NamedRow { container: false });
        let parameter: Arc<dyn RowBehavior> = Arc::new(ParameterRow);

        factory.register(EntityKind::Folder, Arc::clone(&container));
        factory.register(EntityKind::File, leaf);
        factory.register(EntityKind::ParameterGroup, Arc::clone(&container));
        factory.register(EntityKind::ElementUsage, container);
        factory.register(EntityKind::Parameter, Arc::clone(&parameter));
        factory.register(EntityKind::ParameterOverride, Arc::clone(&parameter));
        factory.register(EntityKind::ParameterSubscription, parameter);
        factory.register(EntityKind::ValueSet, Arc::new(ValueSetRow));
        factory
    }

    /// Registers a behavior, returning the one it replaced.
    pub fn register(
        &mut self,
        kind: EntityKind,
        behavior: Arc<dyn RowBehavior>,
    ) -> Option<Arc<dyn RowBehavior>> {
        self.behaviors.insert(kind, behavior)
    }

    pub fn behavior(&self, kind: EntityKind) -> Arc<dyn RowBehavior> {
        self.behaviors
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Builds an unmaterialized row for `snapshot`.
    pub fn build(&self, snapshot: &EntitySnapshot) -> Result<RowNode, RowError> {
        RowNode::try_new(snapshot, self.behavior(snapshot.kind))
    }
}
