//! Owning panel for one projected scope.
//!
//! # Responsibility
//! - Wire one change channel, one synchronizer and its configuration.
//! - Marshal queued change events onto the consumer turn (`pump`).
//! - Tear everything down eagerly when the panel goes away.
//!
//! # Invariants
//! - After teardown every entry point is a no-op returning an empty report.
//! - Structural events (`Added`, `Removed`, updates of unprojected
//!   entities) trigger full passes; row-listener updates trigger targeted
//!   re-syncs.

use crate::change::{ChangeChannel, ChangeEvent, ChangeFilter, ChangeKind, Delivery, ListenerId};
use crate::config::SyncConfig;
use crate::graph::{DomainGraph, GraphResult};
use crate::model::entity::EntityId;
use crate::model::observable::{ListChange, ObserverId};
use crate::model::row::{RowNode, RowParent};
use crate::model::factory::RowFactory;
use crate::order::ComparatorRegistry;
use crate::predicate::{IncludeAll, InclusionPredicate};
use crate::projection::report::{InvariantViolation, SyncIssue, SyncReport};
use crate::projection::synchronizer::{RowSnapshot, TreeSynchronizer};
use crate::projection::ProjectionError;
use log::{debug, info};
use std::collections::HashMap;

enum EventAction {
    Ignore,
    FullPass,
    Resync { id: EntityId, revision: u64 },
}

/// Builder for [`ProjectionPanel`]; scope and channel are required.
#[derive(Default)]
pub struct ProjectionPanelBuilder {
    scope: Option<EntityId>,
    channel: Option<ChangeChannel>,
    ordering: Option<ComparatorRegistry>,
    factory: Option<RowFactory>,
    predicate: Option<Box<dyn InclusionPredicate>>,
    config: SyncConfig,
}

impl ProjectionPanelBuilder {
    /// Entity whose members are projected; never projected itself.
    pub fn scope(mut self, scope: EntityId) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Channel the panel drains; closed on teardown.
    pub fn channel(mut self, channel: ChangeChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn ordering(mut self, ordering: ComparatorRegistry) -> Self {
        self.ordering = Some(ordering);
        self
    }

    pub fn factory(mut self, factory: RowFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn predicate(mut self, predicate: impl InclusionPredicate + 'static) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// # Errors
    /// - `InvalidConstructionArgument` when scope or channel is missing, the
    ///   scope is nil, the channel is closed, or the config is invalid.
    pub fn build(self) -> Result<ProjectionPanel, ProjectionError> {
        let scope = self.scope.ok_or(ProjectionError::InvalidConstructionArgument(
            "scope owner is required",
        ))?;
        let channel = self.channel.ok_or(ProjectionError::InvalidConstructionArgument(
            "change channel is required",
        ))?;
        if self.config.validate().is_err() {
            return Err(ProjectionError::InvalidConstructionArgument(
                "sync config is invalid",
            ));
        }

        let predicate = self.predicate.unwrap_or_else(|| Box::new(IncludeAll));
        let synchronizer = TreeSynchronizer::new(
            scope,
            channel.clone(),
            self.ordering.unwrap_or_default(),
            self.factory.unwrap_or_default(),
            predicate,
        )?
        .with_issue_level(self.config.issue_log_level);

        let scope_listener = channel.subscribe(ChangeFilter::any()).ok_or(
            ProjectionError::InvalidConstructionArgument("change channel is closed"),
        )?;
        info!(
            "event=panel_open module=projection status=ok scope={scope} predicate={}",
            crate::logging::single_line(&synchronizer.predicate_description(), 120)
        );

        Ok(ProjectionPanel {
            synchronizer,
            channel,
            scope_listener: Some(scope_listener),
            config: self.config,
            torn_down: false,
        })
    }
}

/// One projected scope with its channel and subscriptions.
pub struct ProjectionPanel {
    synchronizer: TreeSynchronizer,
    channel: ChangeChannel,
    scope_listener: Option<ListenerId>,
    config: SyncConfig,
    torn_down: bool,
}

impl ProjectionPanel {
    pub fn builder() -> ProjectionPanelBuilder {
        ProjectionPanelBuilder::default()
    }

    pub fn scope(&self) -> EntityId {
        self.synchronizer.scope()
    }

    /// Producer handle; clone it onto I/O threads.
    pub fn channel(&self) -> &ChangeChannel {
        &self.channel
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Initial population.
    ///
    /// Events queued before this call are discarded first; the full pass
    /// that follows reads the state they announced.
    pub fn populate(&mut self, graph: &dyn DomainGraph) -> GraphResult<SyncReport> {
        if self.torn_down {
            debug!("event=panel_populate module=projection status=skipped reason=torn_down");
            return Ok(SyncReport::default());
        }
        let discarded = self.channel.drain().len();
        let report = self.synchronizer.synchronize(graph)?;
        info!(
            "event=panel_populate module=projection status=ok scope={} rows={} discarded_events={discarded}",
            self.synchronizer.scope(),
            self.synchronizer.cache().len()
        );
        Ok(report)
    }

    pub fn synchronize(&mut self, graph: &dyn DomainGraph) -> GraphResult<SyncReport> {
        if self.torn_down {
            debug!("event=panel_sync module=projection status=skipped reason=torn_down");
            return Ok(SyncReport::default());
        }
        self.synchronizer.synchronize(graph)
    }

    /// Drains queued events (up to the configured limit) and applies them.
    pub fn pump(&mut self, graph: &dyn DomainGraph) -> GraphResult<SyncReport> {
        if self.torn_down {
            debug!("event=panel_pump module=projection status=skipped reason=torn_down");
            return Ok(SyncReport::default());
        }
        let deliveries = self.channel.drain_up_to(self.config.drain_limit());
        let coalesce = self.config.coalesce_structural_events;
        let mut report = SyncReport::default();
        let mut full_pass = false;
        // Latest revision per row, in first-arrival order.
        let mut targeted: Vec<(EntityId, u64)> = Vec::new();
        let mut slots: HashMap<EntityId, usize> = HashMap::new();

        for delivery in &deliveries {
            let from_row_listener = self.is_row_delivery(delivery);
            match self.classify(delivery.event, from_row_listener, &mut report) {
                EventAction::Ignore => {}
                EventAction::FullPass if coalesce => full_pass = true,
                EventAction::FullPass => report.merge(self.synchronizer.synchronize(graph)?),
                EventAction::Resync { id, revision } if coalesce => match slots.get(&id) {
                    Some(slot) => targeted[*slot].1 = targeted[*slot].1.max(revision),
                    None => {
                        slots.insert(id, targeted.len());
                        targeted.push((id, revision));
                    }
                },
                EventAction::Resync { id, revision } => {
                    if !self.already_applied(id, revision) {
                        report.merge(self.synchronizer.resync_entity(graph, id, revision)?);
                    }
                }
            }
        }

        // A full pass already refreshes every row.
        if full_pass {
            report.merge(self.synchronizer.synchronize(graph)?);
        } else {
            for (id, revision) in targeted {
                if !self.already_applied(id, revision) {
                    report.merge(self.synchronizer.resync_entity(graph, id, revision)?);
                }
            }
        }

        if !deliveries.is_empty() {
            debug!(
                "event=panel_pump module=projection status=ok events={} pending={} issues={}",
                deliveries.len(),
                self.channel.pending(),
                report.issues.len()
            );
        }
        Ok(report)
    }

    /// Applies one event immediately, bypassing the channel queue.
    pub fn handle_event(&mut self, graph: &dyn DomainGraph, event: ChangeEvent) -> GraphResult<SyncReport> {
        if self.torn_down {
            debug!("event=panel_event module=projection status=skipped reason=torn_down");
            return Ok(SyncReport::default());
        }
        let mut report = SyncReport::default();
        match self.classify(event, true, &mut report) {
            EventAction::Ignore => {}
            EventAction::FullPass => report.merge(self.synchronizer.synchronize(graph)?),
            EventAction::Resync { id, revision } => {
                report.merge(self.synchronizer.resync_entity(graph, id, revision)?)
            }
        }
        Ok(report)
    }

    /// Disposes every row, releases every listener and closes the channel.
    ///
    /// Repeated calls are no-ops.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        let disposed = self.synchronizer.dispose_all();
        if let Some(listener) = self.scope_listener.take() {
            self.channel.unsubscribe(listener);
        }
        self.channel.close();
        info!(
            "event=panel_teardown module=projection status=ok scope={} disposed={disposed}",
            self.synchronizer.scope()
        );
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn row(&self, id: EntityId) -> Option<&RowNode> {
        self.synchronizer.row(id)
    }

    pub fn root_children(&self) -> &[EntityId] {
        self.synchronizer
            .children_of(RowParent::Root)
            .unwrap_or_default()
    }

    /// Child ids of one row; `None` when the row is not projected.
    pub fn children_of(&self, id: EntityId) -> Option<&[EntityId]> {
        self.synchronizer.children_of(RowParent::Row(id))
    }

    /// Child labels of `parent`, in display order.
    pub fn labels_of(&self, parent: RowParent) -> Vec<String> {
        self.synchronizer
            .children_of(parent)
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.synchronizer.row(*id))
            .map(RowNode::label)
            .collect()
    }

    /// Observes the child list of `parent`; `None` when it does not exist.
    pub fn observe_children(
        &mut self,
        parent: RowParent,
        observer: impl FnMut(&ListChange<EntityId>) + 'static,
    ) -> Option<ObserverId> {
        if self.torn_down {
            return None;
        }
        self.synchronizer
            .children_list_mut(parent)
            .map(|children| children.observe(observer))
    }

    pub fn unobserve_children(&mut self, parent: RowParent, observer: ObserverId) -> bool {
        self.synchronizer
            .children_list_mut(parent)
            .is_some_and(|children| children.unobserve(observer))
    }

    pub fn snapshot(&self) -> Vec<RowSnapshot> {
        self.synchronizer.snapshot()
    }

    pub fn audit(&self, graph: &dyn DomainGraph) -> GraphResult<Vec<InvariantViolation>> {
        self.synchronizer.audit(graph)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.synchronizer.subscriptions().active_count()
    }

    pub fn len(&self) -> usize {
        self.synchronizer.cache().len()
    }

    pub fn is_empty(&self) -> bool {
        self.synchronizer.cache().is_empty()
    }

    /// Whether an earlier pass of this pump already applied `revision`.
    ///
    /// Row listeners only deliver revisions above the cached one, so a
    /// cached revision at or above it was reached during this pump.
    fn already_applied(&self, id: EntityId, revision: u64) -> bool {
        self.synchronizer
            .row(id)
            .is_some_and(|row| row.revision() >= revision)
    }

    fn is_row_delivery(&self, delivery: &Delivery) -> bool {
        let subscriptions = self.synchronizer.subscriptions();
        delivery
            .listeners
            .iter()
            .any(|listener| subscriptions.owner_of(*listener) == Some(delivery.event.entity_id))
    }

    fn classify(&self, event: ChangeEvent, from_row_listener: bool, report: &mut SyncReport) -> EventAction {
        let id = event.entity_id;
        let cached_revision = self.synchronizer.row(id).map(RowNode::revision);
        match (event.kind, cached_revision) {
            (ChangeKind::Added, Some(_)) => {
                self.synchronizer
                    .record(report, SyncIssue::DuplicateMaterialization { entity_id: id });
                EventAction::Ignore
            }
            (ChangeKind::Removed, None) => {
                self.synchronizer
                    .record(report, SyncIssue::RemovalOfUnknownEntity { entity_id: id });
                EventAction::Ignore
            }
            (ChangeKind::Updated, Some(_)) if from_row_listener => EventAction::Resync {
                id,
                revision: event.revision,
            },
            (ChangeKind::Updated, Some(cached_revision)) => {
                self.synchronizer.record(
                    report,
                    SyncIssue::StaleUpdateIgnored {
                        entity_id: id,
                        revision: event.revision,
                        cached_revision,
                    },
                );
                EventAction::Ignore
            }
            (ChangeKind::Added, None) | (ChangeKind::Removed, Some(_)) | (ChangeKind::Updated, None) => {
                EventAction::FullPass
            }
        }
    }
}

impl Drop for ProjectionPanel {
    fn drop(&mut self) {
        self.teardown();
    }
}
