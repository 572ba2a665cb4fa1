//! Identity-keyed store of projected rows.
//!
//! The cache answers "does a projected row exist for entity X" and owns the
//! scope-root child list. Placement and ordering live in the synchronizer.

use crate::model::entity::EntityId;
use crate::model::observable::ObservableList;
use crate::model::row::{RowNode, RowParent};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct ProjectionCache {
    nodes: HashMap<EntityId, RowNode>,
    root: ObservableList<EntityId>,
}

impl ProjectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: EntityId) -> Option<&RowNode> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: EntityId) -> Option<&mut RowNode> {
        self.nodes.get_mut(&id)
    }

    /// Stores `node` under `id`, returning the row it replaced.
    pub(crate) fn put(&mut self, id: EntityId, node: RowNode) -> Option<RowNode> {
        self.nodes.insert(id, node)
    }

    pub(crate) fn remove(&mut self, id: EntityId) -> Option<RowNode> {
        self.nodes.remove(&id)
    }

    pub fn keys(&self) -> HashSet<EntityId> {
        self.nodes.keys().copied().collect()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &RowNode> {
        self.nodes.values()
    }

    pub fn root_children(&self) -> &ObservableList<EntityId> {
        &self.root
    }

    /// Child list of `parent`; `None` for an uncached row.
    pub fn children(&self, parent: RowParent) -> Option<&ObservableList<EntityId>> {
        match parent {
            RowParent::Root => Some(&self.root),
            RowParent::Row(id) => self.nodes.get(&id).map(RowNode::children),
        }
    }

    pub(crate) fn children_mut(&mut self, parent: RowParent) -> Option<&mut ObservableList<EntityId>> {
        match parent {
            RowParent::Root => Some(&mut self.root),
            RowParent::Row(id) => self.nodes.get_mut(&id).map(RowNode::children_mut),
        }
    }
}
