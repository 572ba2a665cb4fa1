//! Diff/apply engine keeping a row tree aligned with one domain scope.
//!
//! # Responsibility
//! - Diff the live scope against the cache and apply removals, two-phase
//!   additions, repositioning, attribute refresh and sibling reordering.
//! - Re-synchronize single rows on targeted `Updated` notifications.
//!
//! # Invariants
//! - All graph reads of a pass happen before the first tree mutation, so a
//!   failing read leaves the tree untouched.
//! - Every cached row is `Live` and linked once a pass returns.
//! - Active subscriptions equal live rows once a pass returns.
//! - Containment cycles never enter the tree; the offending row is placed at
//!   the scope root and reported.

use crate::change::ChangeChannel;
use crate::config::IssueLogLevel;
use crate::graph::{DomainGraph, GraphResult};
use crate::model::entity::{EntityId, EntityKind, EntitySnapshot};
use crate::model::factory::RowFactory;
use crate::model::observable::ObservableList;
use crate::model::row::{RowNode, RowParent, RowState};
use crate::order::{ComparatorRegistry, ParentKey};
use crate::predicate::InclusionPredicate;
use crate::projection::cache::ProjectionCache;
use crate::projection::report::{InvariantViolation, SyncIssue, SyncReport};
use crate::projection::subscription::SubscriptionManager;
use crate::projection::ProjectionError;
use log::{debug, info, log, warn};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;

type LiveSet = HashMap<EntityId, EntitySnapshot>;

/// Read-only nested view of a projected tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowSnapshot {
    pub id: EntityId,
    pub kind: EntityKind,
    pub label: String,
    pub revision: u64,
    pub children: Vec<RowSnapshot>,
}

pub struct TreeSynchronizer {
    scope: EntityId,
    cache: ProjectionCache,
    subscriptions: SubscriptionManager,
    ordering: ComparatorRegistry,
    factory: RowFactory,
    predicate: Box<dyn InclusionPredicate>,
    issue_level: IssueLogLevel,
    /// Rows placed at the root because their container could not hold them.
    fallbacks: HashSet<EntityId>,
}

impl TreeSynchronizer {
    /// Creates an empty projection of `scope`.
    ///
    /// # Errors
    /// - `InvalidConstructionArgument` for a nil scope or a closed channel.
    pub fn new(
        scope: EntityId,
        channel: ChangeChannel,
        ordering: ComparatorRegistry,
        factory: RowFactory,
        predicate: Box<dyn InclusionPredicate>,
    ) -> Result<Self, ProjectionError> {
        if scope.is_nil() {
            return Err(ProjectionError::InvalidConstructionArgument(
                "scope owner id must not be nil",
            ));
        }
        if channel.is_closed() {
            return Err(ProjectionError::InvalidConstructionArgument(
                "change channel is closed",
            ));
        }
        Ok(Self {
            scope,
            cache: ProjectionCache::new(),
            subscriptions: SubscriptionManager::new(channel),
            ordering,
            factory,
            predicate,
            issue_level: IssueLogLevel::default(),
            fallbacks: HashSet::new(),
        })
    }

    pub fn with_issue_level(mut self, level: IssueLogLevel) -> Self {
        self.issue_level = level;
        self
    }

    pub fn scope(&self) -> EntityId {
        self.scope
    }

    pub fn cache(&self) -> &ProjectionCache {
        &self.cache
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn row(&self, id: EntityId) -> Option<&RowNode> {
        self.cache.get(id)
    }

    pub fn children_of(&self, parent: RowParent) -> Option<&[EntityId]> {
        self.cache.children(parent).map(ObservableList::as_slice)
    }

    pub(crate) fn children_list_mut(&mut self, parent: RowParent) -> Option<&mut ObservableList<EntityId>> {
        self.cache.children_mut(parent)
    }

    pub fn predicate_description(&self) -> String {
        self.predicate.describe()
    }

    /// Runs one full pass over the scope.
    pub fn synchronize(&mut self, graph: &dyn DomainGraph) -> GraphResult<SyncReport> {
        let started_at = Instant::now();
        let live = self.read_scope(graph)?;
        let mut report = SyncReport::default();
        self.apply_pass(&live, &mut report);
        self.log_pass("full", &report, started_at);
        Ok(report)
    }

    /// Refreshes and repositions one cached row after an `Updated` event.
    ///
    /// Uncached targets are ignored. Targets that left the scope or lost
    /// inclusion escalate to a full pass.
    pub fn resync_entity(
        &mut self,
        graph: &dyn DomainGraph,
        id: EntityId,
        revision: u64,
    ) -> GraphResult<SyncReport> {
        let started_at = Instant::now();
        let mut report = SyncReport::default();
        let Some(cached_revision) = self.cache.get(id).map(RowNode::revision) else {
            debug!("event=sync_entity module=projection status=skipped reason=not_cached");
            return Ok(report);
        };
        if revision <= cached_revision {
            self.record(
                &mut report,
                SyncIssue::StaleUpdateIgnored {
                    entity_id: id,
                    revision,
                    cached_revision,
                },
            );
            return Ok(report);
        }

        let snapshot = graph.entity(id)?;
        let included = match &snapshot {
            Some(snapshot) => graph.is_member(self.scope, id)? && self.predicate.includes(snapshot),
            None => false,
        };
        let snapshot = match snapshot {
            Some(snapshot) if included => snapshot,
            _ => return self.synchronize(graph),
        };

        let (target, issue) = self.resolve_parent(id, snapshot.container);
        if matches!(issue, Some(SyncIssue::CyclicContainment { .. })) {
            // The container may itself be about to move; only a full pass
            // can order the moves.
            debug!("event=sync_entity module=projection status=escalated reason=cycle entity_id={id}");
            return self.synchronize(graph);
        }

        let mut touched = BTreeSet::new();
        let moved = self.place(id, target, issue, &mut report, &mut touched);
        self.refresh(id, &snapshot, &mut report, &mut touched);
        self.reorder(&touched);
        self.log_pass("entity", &report, started_at);

        // Rows parked at the root may have become placeable.
        if moved && self.fallbacks.iter().any(|parked| *parked != id) {
            report.merge(self.synchronize(graph)?);
        }
        Ok(report)
    }

    /// Disposes every row, innermost subtrees first. Returns the row count.
    pub fn dispose_all(&mut self) -> usize {
        let mut report = SyncReport::default();
        let roots = self.cache.root_children().as_slice().to_vec();
        for id in roots {
            self.remove_subtree(id, &mut report);
        }
        let mut unlinked: Vec<EntityId> = self.cache.keys().into_iter().collect();
        unlinked.sort();
        for id in unlinked {
            if self.cache.contains(id) {
                self.remove_subtree(id, &mut report);
            }
        }
        self.subscriptions.dispose_all();
        self.fallbacks.clear();
        report.removed
    }

    /// Nested read-only view of the current tree.
    pub fn snapshot(&self) -> Vec<RowSnapshot> {
        self.snapshot_children(RowParent::Root)
    }

    /// Checks every tree invariant against the live graph.
    pub fn audit(&self, graph: &dyn DomainGraph) -> GraphResult<Vec<InvariantViolation>> {
        let live = self.read_scope(graph)?;
        let mut violations = Vec::new();

        let mut live_ids: Vec<EntityId> = live.keys().copied().collect();
        live_ids.sort();
        for id in &live_ids {
            if !self.cache.contains(*id) {
                violations.push(InvariantViolation::MissingRow(*id));
            }
        }

        let mut row_ids: Vec<EntityId> = self.cache.keys().into_iter().collect();
        row_ids.sort();
        for id in &row_ids {
            let Some(row) = self.cache.get(*id) else {
                continue;
            };
            if !row.is_live() {
                violations.push(InvariantViolation::NotLive(*id));
            }
            match live.get(id) {
                None => violations.push(InvariantViolation::OrphanRow(*id)),
                Some(snapshot) => {
                    // A parked row is excused only while its container is
                    // still unusable.
                    if self.fallbacks.contains(id)
                        && self.resolve_parent(*id, snapshot.container).1.is_some()
                    {
                        continue;
                    }
                    let expected = self.declared_parent(snapshot.container);
                    if row.parent() != Some(expected) {
                        violations.push(InvariantViolation::MisplacedRow {
                            entity_id: *id,
                            expected,
                            actual: row.parent(),
                        });
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        let parents = std::iter::once(RowParent::Root).chain(row_ids.iter().map(|id| RowParent::Row(*id)));
        for parent in parents {
            let Some(children) = self.cache.children(parent) else {
                continue;
            };
            let mut nodes = Vec::with_capacity(children.len());
            for child in children.iter() {
                if !seen.insert(*child) {
                    violations.push(InvariantViolation::DuplicateChildEntry(*child));
                }
                match self.cache.get(*child) {
                    Some(node) if node.parent() == Some(parent) => nodes.push(node),
                    _ => violations.push(InvariantViolation::BrokenBackReference {
                        parent,
                        child: *child,
                    }),
                }
            }
            if !self.ordering.is_sorted(self.parent_key(parent), &nodes) {
                violations.push(InvariantViolation::UnsortedChildren(parent));
            }
        }

        let live_rows = self.cache.rows().filter(|row| row.is_live()).count();
        if self.subscriptions.active_count() != live_rows {
            violations.push(InvariantViolation::SubscriptionCountMismatch {
                subscriptions: self.subscriptions.active_count(),
                live_rows,
            });
        }
        Ok(violations)
    }

    /// Logs `issue` at the configured level and appends it to `report`.
    pub(crate) fn record(&self, report: &mut SyncReport, issue: SyncIssue) {
        log!(
            self.issue_level.as_level(),
            "event=sync_issue module=projection status=degraded code={} scope={} entity_id={}",
            issue.code(),
            self.scope,
            issue.entity_id()
        );
        report.issues.push(issue);
    }

    fn read_scope(&self, graph: &dyn DomainGraph) -> GraphResult<LiveSet> {
        let mut live = LiveSet::new();
        for snapshot in graph.scope_snapshots(self.scope)? {
            if snapshot.id.is_nil() || snapshot.id == self.scope {
                continue;
            }
            if self.predicate.includes(&snapshot) {
                live.insert(snapshot.id, snapshot);
            }
        }
        Ok(live)
    }

    fn apply_pass(&mut self, live: &LiveSet, report: &mut SyncReport) {
        let mut touched = BTreeSet::new();

        let mut to_remove: Vec<EntityId> = self
            .cache
            .keys()
            .into_iter()
            .filter(|id| !live.contains_key(id))
            .collect();
        to_remove.sort();
        for id in to_remove {
            // Already gone when an ancestor was removed earlier in this loop.
            if self.cache.contains(id) {
                if let Some(parent) = self.remove_subtree(id, report) {
                    touched.insert(parent);
                }
            }
        }

        // Computed after removal so live descendants of removed rows come back.
        let mut existing: Vec<EntityId> = self.cache.keys().into_iter().collect();
        existing.sort();
        let mut to_add: Vec<EntityId> = live
            .keys()
            .filter(|id| !self.cache.contains(**id))
            .copied()
            .collect();
        to_add.sort();

        let mut materialized = Vec::with_capacity(to_add.len());
        for id in to_add {
            let Some(snapshot) = live.get(&id) else {
                continue;
            };
            match self.factory.build(snapshot) {
                Ok(node) => {
                    self.cache.put(id, node);
                    materialized.push(id);
                }
                Err(err) => warn!(
                    "event=row_build module=projection status=error entity_id={id} error={err}"
                ),
            }
        }

        for id in materialized {
            let Some(snapshot) = live.get(&id) else {
                continue;
            };
            let (parent, issue) = self.resolve_parent(id, snapshot.container);
            self.note_fallback(id, issue, report);
            self.attach_sorted(id, parent);
            self.set_state(id, RowState::Live);
            self.subscriptions.attach(id, snapshot.revision);
            report.added += 1;
            touched.insert(parent);
        }

        self.reposition_all(&existing, live, report, &mut touched);

        for id in &existing {
            if let Some(snapshot) = live.get(id) {
                self.refresh(*id, snapshot, report, &mut touched);
            }
        }

        self.reorder(&touched);
    }

    /// Repositions rows until no more progress is possible.
    ///
    /// A row whose target currently sits below it is retried after the other
    /// moves of the pass, so swapping parent and child converges instead of
    /// being reported as a cycle.
    fn reposition_all(
        &mut self,
        ids: &[EntityId],
        live: &LiveSet,
        report: &mut SyncReport,
        touched: &mut BTreeSet<RowParent>,
    ) {
        let mut pending = ids.to_vec();
        loop {
            let mut deferred = Vec::new();
            let mut progressed = false;
            for id in pending {
                let Some(snapshot) = live.get(&id) else {
                    continue;
                };
                let (target, issue) = self.resolve_parent(id, snapshot.container);
                if matches!(issue, Some(SyncIssue::CyclicContainment { .. })) {
                    deferred.push(id);
                    continue;
                }
                progressed |= self.place(id, target, issue, report, touched);
            }
            if deferred.is_empty() {
                return;
            }
            if !progressed {
                for id in deferred {
                    if let Some(snapshot) = live.get(&id) {
                        let (target, issue) = self.resolve_parent(id, snapshot.container);
                        self.place(id, target, issue, report, touched);
                    }
                }
                return;
            }
            pending = deferred;
        }
    }

    /// Moves one linked row under `target`. Returns whether it moved.
    fn place(
        &mut self,
        id: EntityId,
        target: RowParent,
        issue: Option<SyncIssue>,
        report: &mut SyncReport,
        touched: &mut BTreeSet<RowParent>,
    ) -> bool {
        self.note_fallback(id, issue, report);
        let current = self.cache.get(id).and_then(RowNode::parent);
        if current == Some(target) {
            return false;
        }

        self.set_state(id, RowState::Stale);
        self.detach(id);
        self.attach_sorted(id, target);
        self.set_state(id, RowState::Live);

        report.repositioned += 1;
        touched.insert(target);
        if let Some(previous) = current {
            touched.insert(previous);
        }
        true
    }

    /// Tracks degraded placements; each fallback is reported once until the
    /// row is placed normally again.
    fn note_fallback(&mut self, id: EntityId, issue: Option<SyncIssue>, report: &mut SyncReport) {
        match issue {
            Some(issue) => {
                if self.fallbacks.insert(id) {
                    self.record(report, issue);
                }
            }
            None => {
                self.fallbacks.remove(&id);
            }
        }
    }

    fn refresh(
        &mut self,
        id: EntityId,
        snapshot: &EntitySnapshot,
        report: &mut SyncReport,
        touched: &mut BTreeSet<RowParent>,
    ) {
        let Some(node) = self.cache.get_mut(id) else {
            return;
        };
        let cached_revision = node.revision();
        if node.apply_snapshot(snapshot) {
            let parent = node.parent();
            self.subscriptions.advance(id, snapshot.revision);
            report.refreshed += 1;
            if let Some(parent) = parent {
                touched.insert(parent);
            }
        } else if snapshot.revision < cached_revision {
            self.record(
                report,
                SyncIssue::StaleUpdateIgnored {
                    entity_id: id,
                    revision: snapshot.revision,
                    cached_revision,
                },
            );
        }
    }

    /// Resolves the parent row for a declared container.
    ///
    /// No container, or the scope owner itself, means the scope root.
    fn resolve_parent(&self, id: EntityId, container: Option<EntityId>) -> (RowParent, Option<SyncIssue>) {
        let Some(container_id) = container else {
            return (RowParent::Root, None);
        };
        if container_id == self.scope {
            return (RowParent::Root, None);
        }
        if !self
            .cache
            .get(container_id)
            .is_some_and(RowNode::accepts_children)
        {
            return (
                RowParent::Root,
                Some(SyncIssue::MissingContainerRow {
                    entity_id: id,
                    container_id,
                }),
            );
        }
        if self.closes_cycle(id, container_id) {
            return (
                RowParent::Root,
                Some(SyncIssue::CyclicContainment {
                    entity_id: id,
                    container_id,
                }),
            );
        }
        (RowParent::Row(container_id), None)
    }

    /// Walks the ancestor chain of `container` looking for `id` or a loop.
    fn closes_cycle(&self, id: EntityId, container: EntityId) -> bool {
        let mut visited = HashSet::new();
        let mut current = container;
        loop {
            if current == id || !visited.insert(current) {
                return true;
            }
            match self.cache.get(current).and_then(RowNode::parent) {
                Some(RowParent::Row(next)) => current = next,
                _ => return false,
            }
        }
    }

    fn declared_parent(&self, container: Option<EntityId>) -> RowParent {
        match container {
            Some(id) if id != self.scope => RowParent::Row(id),
            _ => RowParent::Root,
        }
    }

    fn parent_key(&self, parent: RowParent) -> ParentKey {
        match parent {
            RowParent::Root => ParentKey::Root,
            RowParent::Row(id) => self
                .cache
                .get(id)
                .map_or(ParentKey::Root, |node| ParentKey::Kind(node.kind())),
        }
    }

    fn attach_sorted(&mut self, id: EntityId, parent: RowParent) {
        let key = self.parent_key(parent);
        let index = match (self.cache.get(id), self.cache.children(parent)) {
            (Some(node), Some(siblings)) => siblings.insertion_index_by(|probe| {
                self.cache
                    .get(*probe)
                    .map_or(Ordering::Less, |sibling| self.ordering.compare(key, sibling, node))
            }),
            _ => {
                warn!("event=row_attach module=projection status=error entity_id={id} reason=missing_row");
                return;
            }
        };
        if let Some(siblings) = self.cache.children_mut(parent) {
            siblings.insert(index, id);
        }
        if let Some(node) = self.cache.get_mut(id) {
            node.set_parent(Some(parent));
        }
    }

    /// Unlinks one row from its parent without disposing it.
    fn detach(&mut self, id: EntityId) -> Option<RowParent> {
        let parent = self.cache.get(id)?.parent()?;
        if let Some(siblings) = self.cache.children_mut(parent) {
            siblings.remove(&id);
        }
        if let Some(node) = self.cache.get_mut(id) {
            node.set_parent(None);
        }
        Some(parent)
    }

    /// Detaches `id` and disposes its subtree, innermost rows first.
    fn remove_subtree(&mut self, id: EntityId, report: &mut SyncReport) -> Option<RowParent> {
        let parent = self.detach(id);
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            order.push(current);
            if let Some(node) = self.cache.get(current) {
                stack.extend(node.children().iter().copied());
            }
        }
        for current in order.into_iter().rev() {
            if self.dispose_row(current) {
                report.removed += 1;
            }
        }
        parent
    }

    fn dispose_row(&mut self, id: EntityId) -> bool {
        let Some(mut node) = self.cache.remove(id) else {
            return false;
        };
        node.children_mut().clear();
        node.set_parent(None);
        if let Err(err) = node.transition(RowState::Disposed) {
            warn!("event=row_dispose module=projection status=error entity_id={id} error={err}");
        }
        self.subscriptions.dispose(id);
        self.fallbacks.remove(&id);
        true
    }

    fn set_state(&mut self, id: EntityId, to: RowState) {
        if let Some(node) = self.cache.get_mut(id) {
            if let Err(err) = node.transition(to) {
                warn!("event=row_transition module=projection status=error entity_id={id} error={err}");
            }
        }
    }

    /// Restores comparator order in every touched sibling set using moves.
    fn reorder(&mut self, touched: &BTreeSet<RowParent>) {
        for parent in touched {
            let key = self.parent_key(*parent);
            let Some(siblings) = self.cache.children(*parent) else {
                continue;
            };
            let mut target = siblings.as_slice().to_vec();
            target.sort_by(|left, right| match (self.cache.get(*left), self.cache.get(*right)) {
                (Some(l), Some(r)) => self.ordering.compare(key, l, r),
                _ => left.cmp(right),
            });
            if let Some(siblings) = self.cache.children_mut(*parent) {
                siblings.reorder(&target);
            }
        }
    }

    fn snapshot_children(&self, parent: RowParent) -> Vec<RowSnapshot> {
        let Some(children) = self.cache.children(parent) else {
            return Vec::new();
        };
        children
            .iter()
            .filter_map(|id| self.cache.get(*id))
            .map(|node| RowSnapshot {
                id: node.id(),
                kind: node.kind(),
                label: node.label(),
                revision: node.revision(),
                children: self.snapshot_children(RowParent::Row(node.id())),
            })
            .collect()
    }

    fn log_pass(&self, mode: &'static str, report: &SyncReport, started_at: Instant) {
        if report.is_noop() {
            debug!(
                "event=sync_pass module=projection status=noop mode={mode} scope={} duration_ms={}",
                self.scope,
                started_at.elapsed().as_millis()
            );
            return;
        }
        info!(
            "event=sync_pass module=projection status=ok mode={mode} scope={} added={} removed={} repositioned={} refreshed={} issues={} rows={} duration_ms={}",
            self.scope,
            report.added,
            report.removed,
            report.repositioned,
            report.refreshed,
            report.issues.len(),
            self.cache.len(),
            started_at.elapsed().as_millis()
        );
    }
}
