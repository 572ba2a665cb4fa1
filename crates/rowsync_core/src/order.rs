//! Comparator registry for deterministic sibling placement.
//!
//! # Responsibility
//! - Map a parent selector (scope root or container kind) to a child ordering.
//! - Provide the orderings used by the file-store and element browsers.
//!
//! # Invariants
//! - Every comparison is a total order: primary ties fall back to entity
//!   identity, so placement is stable across runs.

use crate::model::entity::EntityKind;
use crate::model::row::RowNode;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Ordering function applied to two sibling rows.
pub type RowComparator = Arc<dyn Fn(&RowNode, &RowNode) -> Ordering + Send + Sync>;

/// Selects the comparator for one sibling set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParentKey {
    /// Children of the scope root.
    Root,
    /// Children of a row of this kind.
    Kind(EntityKind),
}

/// Per-parent comparator registry.
pub struct ComparatorRegistry {
    comparators: HashMap<ParentKey, RowComparator>,
    fallback: RowComparator,
}

impl Default for ComparatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComparatorRegistry {
    /// Registry ordering every sibling set by name.
    pub fn new() -> Self {
        Self {
            comparators: HashMap::new(),
            fallback: Arc::new(by_name),
        }
    }

    /// Folders before files, then by name, at the root and inside folders.
    pub fn file_store_defaults() -> Self {
        let order = ranked_by_kind(file_store_rank);
        Self::new()
            .with(ParentKey::Root, Arc::clone(&order))
            .with(ParentKey::Kind(EntityKind::Folder), order)
    }

    /// Parameters, then groups, then usages, at the root and inside groups.
    ///
    /// Children of parameter rows (value sets) and of usages keep the same
    /// ranking, which degrades to name order for single-kind sibling sets.
    pub fn element_defaults() -> Self {
        let order = ranked_by_kind(element_child_rank);
        let mut registry = Self::new();
        for key in [
            ParentKey::Root,
            ParentKey::Kind(EntityKind::ParameterGroup),
            ParentKey::Kind(EntityKind::ElementUsage),
            ParentKey::Kind(EntityKind::Parameter),
            ParentKey::Kind(EntityKind::ParameterOverride),
            ParentKey::Kind(EntityKind::ParameterSubscription),
        ] {
            registry.register(key, Arc::clone(&order));
        }
        registry
    }

    pub fn register(&mut self, key: ParentKey, comparator: RowComparator) -> Option<RowComparator> {
        self.comparators.insert(key, comparator)
    }

    pub fn with(mut self, key: ParentKey, comparator: RowComparator) -> Self {
        self.register(key, comparator);
        self
    }

    /// Compares two siblings under `key`, tie-breaking on identity.
    pub fn compare(&self, key: ParentKey, left: &RowNode, right: &RowNode) -> Ordering {
        let comparator = self.comparators.get(&key).unwrap_or(&self.fallback);
        comparator(left, right).then_with(|| left.id().cmp(&right.id()))
    }

    /// Returns whether `rows` is sorted under `key`.
    pub fn is_sorted(&self, key: ParentKey, rows: &[&RowNode]) -> bool {
        rows.windows(2)
            .all(|pair| self.compare(key, pair[0], pair[1]) != Ordering::Greater)
    }
}

/// Case-insensitive name, then case-sensitive name. Unnamed rows sort last.
pub fn by_name(left: &RowNode, right: &RowNode) -> Ordering {
    match (left.name(), right.name()) {
        (Some(a), Some(b)) => a
            .to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Orders by `rank(kind)` first, then by name.
pub fn ranked_by_kind(rank: fn(EntityKind) -> u8) -> RowComparator {
    Arc::new(move |left: &RowNode, right: &RowNode| {
        rank(left.kind())
            .cmp(&rank(right.kind()))
            .then_with(|| by_name(left, right))
    })
}

pub fn file_store_rank(kind: EntityKind) -> u8 {
    match kind {
        EntityKind::Folder => 0,
        EntityKind::File => 1,
        _ => 2,
    }
}

pub fn element_child_rank(kind: EntityKind) -> u8 {
    match kind {
        kind if kind.is_parameter_like() => 0,
        EntityKind::ParameterGroup => 1,
        EntityKind::ElementUsage => 2,
        EntityKind::ValueSet => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::{ComparatorRegistry, ParentKey};
    use crate::model::entity::{EntityKind, EntitySnapshot};
    use crate::model::factory::RowFactory;
    use crate::model::row::RowNode;
    use std::cmp::Ordering;
    use uuid::Uuid;

    fn row(kind: EntityKind, name: &str) -> RowNode {
        RowFactory::with_defaults()
            .build(&EntitySnapshot::named(kind, name))
            .unwrap()
    }

    #[test]
    fn element_order_places_parameters_groups_then_usages() {
        let registry = ComparatorRegistry::element_defaults();
        let mut rows = vec![
            row(EntityKind::ElementUsage, "def"),
            row(EntityKind::ElementUsage, "ghi"),
            row(EntityKind::Parameter, "a"),
            row(EntityKind::ParameterGroup, "a"),
            row(EntityKind::Parameter, "b"),
            row(EntityKind::ParameterGroup, "b"),
            row(EntityKind::ElementUsage, "abc"),
        ];
        rows.sort_by(|a, b| registry.compare(ParentKey::Root, a, b));

        let labels: Vec<(EntityKind, String)> = rows
            .iter()
            .map(|row| (row.kind(), row.name().unwrap_or_default().to_string()))
            .collect();
        assert_eq!(
            labels,
            vec![
                (EntityKind::Parameter, "a".to_string()),
                (EntityKind::Parameter, "b".to_string()),
                (EntityKind::ParameterGroup, "a".to_string()),
                (EntityKind::ParameterGroup, "b".to_string()),
                (EntityKind::ElementUsage, "abc".to_string()),
                (EntityKind::ElementUsage, "def".to_string()),
                (EntityKind::ElementUsage, "ghi".to_string()),
            ]
        );
    }

    #[test]
    fn file_store_order_puts_folders_first() {
        let registry = ComparatorRegistry::file_store_defaults();
        let file = row(EntityKind::File, "aaa");
        let folder = row(EntityKind::Folder, "zzz");
        assert_eq!(
            registry.compare(ParentKey::Kind(EntityKind::Folder), &folder, &file),
            Ordering::Less
        );
    }

    #[test]
    fn equal_names_tie_break_on_identity() {
        let registry = ComparatorRegistry::new();
        let low = EntitySnapshot::new(Uuid::from_u128(1), EntityKind::File, 1).with_attribute("name", "same");
        let high = EntitySnapshot::new(Uuid::from_u128(2), EntityKind::File, 1).with_attribute("name", "same");
        let factory = RowFactory::with_defaults();
        let low = factory.build(&low).unwrap();
        let high = factory.build(&high).unwrap();

        assert_eq!(registry.compare(ParentKey::Root, &low, &high), Ordering::Less);
        assert_eq!(registry.compare(ParentKey::Root, &high, &low), Ordering::Greater);
        assert!(registry.is_sorted(ParentKey::Root, &[&low, &high]));
        assert!(!registry.is_sorted(ParentKey::Root, &[&high, &low]));
    }

    #[test]
    fn name_order_is_case_insensitive_first() {
        let registry = ComparatorRegistry::new();
        let upper = row(EntityKind::File, "B");
        let lower = row(EntityKind::File, "a");
        assert_eq!(registry.compare(ParentKey::Root, &lower, &upper), Ordering::Less);
    }
}
