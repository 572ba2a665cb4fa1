use rowsync_core::{
    ChangeChannel, ChangeEvent, ComparatorRegistry, EntityKind, EntitySnapshot, ListChange,
    MemoryGraph, ProjectionPanel, RowParent, RowState, SyncConfig, SyncIssue,
};
use std::cell::RefCell;
use std::rc::Rc;
use uuid::Uuid;

struct Fixture {
    scope: Uuid,
    graph: MemoryGraph,
    panel: ProjectionPanel,
}

fn setup() -> Fixture {
    setup_with(SyncConfig::default())
}

fn setup_with(config: SyncConfig) -> Fixture {
    let scope = Uuid::new_v4();
    let graph = MemoryGraph::new();
    let channel = ChangeChannel::new();
    graph.attach_channel(channel.clone());
    let panel = ProjectionPanel::builder()
        .scope(scope)
        .channel(channel)
        .ordering(ComparatorRegistry::file_store_defaults())
        .config(config)
        .build()
        .unwrap();
    Fixture {
        scope,
        graph,
        panel,
    }
}

fn insert(fx: &Fixture, snapshot: EntitySnapshot) -> Uuid {
    let id = snapshot.id;
    fx.graph.insert(fx.scope, snapshot).unwrap();
    id
}

fn folder(name: &str) -> EntitySnapshot {
    EntitySnapshot::named(EntityKind::Folder, name)
}

fn file_in(name: &str, container: Option<Uuid>) -> EntitySnapshot {
    EntitySnapshot::named(EntityKind::File, name).with_container(container)
}

fn assert_consistent(fx: &Fixture) {
    assert_eq!(fx.panel.audit(&fx.graph).unwrap(), Vec::new());
    assert_eq!(fx.panel.active_subscriptions(), fx.panel.len());
}

#[test]
fn duplicate_added_event_keeps_one_row() {
    let mut fx = setup();
    let f = insert(&fx, folder("F"));
    let report = fx.panel.pump(&fx.graph).unwrap();
    assert_eq!(report.added, 1);

    let report = fx
        .panel
        .handle_event(&fx.graph, ChangeEvent::added(f, 1))
        .unwrap();
    assert_eq!(
        report.issues,
        vec![SyncIssue::DuplicateMaterialization { entity_id: f }]
    );
    assert_eq!(fx.panel.len(), 1);
    assert_eq!(fx.panel.root_children(), &[f]);
    assert_consistent(&fx);
}

#[test]
fn duplicate_added_events_in_one_pump_materialize_once() {
    let mut fx = setup();
    let g = insert(&fx, folder("G"));
    fx.panel.channel().publish(ChangeEvent::added(g, 1));

    let report = fx.panel.pump(&fx.graph).unwrap();

    assert_eq!(report.added, 1);
    assert_eq!(fx.panel.root_children(), &[g]);
    assert_consistent(&fx);
}

#[test]
fn added_then_removed_leaves_no_row_or_subscription() {
    let mut fx = setup();
    let e = insert(&fx, file_in("e.txt", None));
    fx.panel.pump(&fx.graph).unwrap();
    assert_eq!(fx.panel.active_subscriptions(), 1);

    fx.graph.remove(e).unwrap();
    let report = fx.panel.pump(&fx.graph).unwrap();

    assert_eq!(report.removed, 1);
    assert!(fx.panel.row(e).is_none());
    assert!(fx.panel.root_children().is_empty());
    assert_eq!(fx.panel.active_subscriptions(), 0);
    // Only the panel's scope listener remains on the channel.
    assert_eq!(fx.panel.channel().active_listeners(), 1);
}

#[test]
fn container_change_moves_row_between_parents() {
    let mut fx = setup();
    let a_folder = insert(&fx, folder("A"));
    let b_folder = insert(&fx, folder("B"));
    let e = insert(&fx, file_in("e.txt", Some(a_folder)));
    fx.panel.populate(&fx.graph).unwrap();
    assert_eq!(fx.panel.children_of(a_folder).unwrap(), &[e]);

    fx.graph.set_container(e, Some(b_folder)).unwrap();
    let report = fx.panel.pump(&fx.graph).unwrap();

    assert_eq!(report.repositioned, 1);
    assert!(fx.panel.children_of(a_folder).unwrap().is_empty());
    assert_eq!(fx.panel.children_of(b_folder).unwrap(), &[e]);
    let row = fx.panel.row(e).unwrap();
    assert_eq!(row.state(), RowState::Live);
    assert_eq!(row.parent(), Some(RowParent::Row(b_folder)));
    assert_eq!(row.revision(), 2);
    assert_consistent(&fx);
}

#[test]
fn siblings_follow_comparator_and_reorder_with_moves_only() {
    let mut fx = setup();
    let c = insert(&fx, file_in("c.txt", None));
    insert(&fx, file_in("a.txt", None));
    insert(&fx, file_in("B.txt", None));
    insert(&fx, folder("z"));
    fx.panel.populate(&fx.graph).unwrap();
    assert_eq!(
        fx.panel.labels_of(RowParent::Root),
        vec!["z", "a.txt", "B.txt", "c.txt"]
    );

    let changes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&changes);
    fx.panel
        .observe_children(RowParent::Root, move |change| {
            sink.borrow_mut().push(change.clone())
        })
        .unwrap();

    fx.graph.rename(c, "0.txt").unwrap();
    let report = fx.panel.pump(&fx.graph).unwrap();

    assert_eq!(report.refreshed, 1);
    assert_eq!(
        fx.panel.labels_of(RowParent::Root),
        vec!["z", "0.txt", "a.txt", "B.txt"]
    );
    assert_eq!(
        *changes.borrow(),
        vec![ListChange::Moved {
            from: 3,
            to: 1,
            item: c
        }]
    );
    assert_consistent(&fx);
}

#[test]
fn stale_updates_leave_row_untouched() {
    let mut fx = setup();
    let e = insert(&fx, file_in("e.txt", None));
    fx.panel.pump(&fx.graph).unwrap();
    fx.graph.rename(e, "renamed.txt").unwrap();
    fx.panel.pump(&fx.graph).unwrap();
    assert_eq!(fx.panel.row(e).unwrap().revision(), 2);

    let report = fx
        .panel
        .handle_event(&fx.graph, ChangeEvent::updated(e, 1))
        .unwrap();
    assert_eq!(
        report.issues,
        vec![SyncIssue::StaleUpdateIgnored {
            entity_id: e,
            revision: 1,
            cached_revision: 2
        }]
    );

    fx.panel.channel().publish(ChangeEvent::updated(e, 2));
    let report = fx.panel.pump(&fx.graph).unwrap();
    assert!(report.has_issue("stale_update_ignored"));

    let row = fx.panel.row(e).unwrap();
    assert_eq!(row.label(), "renamed.txt");
    assert_eq!(row.revision(), 2);
    assert_eq!(row.parent(), Some(RowParent::Root));
}

#[test]
fn parent_and_child_added_in_one_batch_nest_correctly() {
    let mut fx = setup();
    let parent = folder("P");
    let child = file_in("c.txt", Some(parent.id));
    let (parent_id, child_id) = (parent.id, child.id);
    // Child announced before its container.
    insert(&fx, child);
    insert(&fx, parent);

    let report = fx.panel.pump(&fx.graph).unwrap();

    assert_eq!(report.added, 2);
    assert!(report.issues.is_empty());
    assert_eq!(fx.panel.root_children(), &[parent_id]);
    assert_eq!(fx.panel.children_of(parent_id).unwrap(), &[child_id]);
    assert_consistent(&fx);
}

#[test]
fn parent_child_swap_through_row_updates_converges() {
    let mut fx = setup();
    let outer = insert(&fx, folder("outer"));
    let inner = insert(&fx, folder("inner").with_container(Some(outer)));
    fx.panel.populate(&fx.graph).unwrap();
    assert_eq!(fx.panel.children_of(outer).unwrap(), &[inner]);

    fx.graph.set_container(outer, Some(inner)).unwrap();
    fx.graph.set_container(inner, None).unwrap();
    let report = fx.panel.pump(&fx.graph).unwrap();

    assert!(report.issues.is_empty());
    assert_eq!(fx.panel.root_children(), &[inner]);
    assert_eq!(fx.panel.children_of(inner).unwrap(), &[outer]);
    assert_consistent(&fx);

    assert!(fx.panel.pump(&fx.graph).unwrap().is_noop());
}

#[test]
fn row_parked_by_a_cycle_is_placed_once_the_cycle_breaks() {
    let mut fx = setup();
    let a = insert(&fx, folder("a"));
    let b = insert(&fx, folder("b"));
    fx.panel.populate(&fx.graph).unwrap();

    fx.graph.set_container(a, Some(b)).unwrap();
    fx.graph.set_container(b, Some(a)).unwrap();
    let report = fx.panel.pump(&fx.graph).unwrap();
    let cycles = report
        .issues
        .iter()
        .filter(|issue| matches!(issue, SyncIssue::CyclicContainment { .. }))
        .count();
    assert_eq!(cycles, 1);
    assert_eq!(fx.panel.root_children(), &[b]);
    assert_consistent(&fx);

    fx.graph.set_container(a, None).unwrap();
    let report = fx.panel.pump(&fx.graph).unwrap();

    assert!(report.issues.is_empty());
    assert_eq!(fx.panel.root_children(), &[a]);
    assert_eq!(fx.panel.children_of(a).unwrap(), &[b]);
    assert_consistent(&fx);
}

#[test]
fn successive_updates_in_one_pump_apply_once_without_stale_reports() {
    let mut fx = setup();
    let e = insert(&fx, file_in("e.txt", None));
    fx.panel.populate(&fx.graph).unwrap();

    fx.graph.rename(e, "f.txt").unwrap();
    fx.graph.rename(e, "g.txt").unwrap();
    let report = fx.panel.pump(&fx.graph).unwrap();

    assert!(report.issues.is_empty());
    assert_eq!(report.refreshed, 1);
    let row = fx.panel.row(e).unwrap();
    assert_eq!(row.label(), "g.txt");
    assert_eq!(row.revision(), 3);
}

#[test]
fn removal_of_unknown_entity_is_a_reported_noop() {
    let mut fx = setup();
    insert(&fx, folder("F"));
    fx.panel.populate(&fx.graph).unwrap();
    let before = fx.panel.snapshot();

    let ghost = Uuid::new_v4();
    let report = fx
        .panel
        .handle_event(&fx.graph, ChangeEvent::removed(ghost, 7))
        .unwrap();

    assert_eq!(
        report.issues,
        vec![SyncIssue::RemovalOfUnknownEntity { entity_id: ghost }]
    );
    assert_eq!(report.removed, 0);
    assert_eq!(fx.panel.snapshot(), before);
}

#[test]
fn orphan_attaches_to_root_until_container_appears() {
    let mut fx = setup();
    let late = folder("Late");
    let late_id = late.id;
    let orphan = insert(&fx, file_in("o.txt", Some(late_id)));

    let report = fx.panel.pump(&fx.graph).unwrap();
    assert_eq!(
        report.issues,
        vec![SyncIssue::MissingContainerRow {
            entity_id: orphan,
            container_id: late_id
        }]
    );
    assert_eq!(fx.panel.root_children(), &[orphan]);
    assert_consistent(&fx);

    insert(&fx, late);
    let report = fx.panel.pump(&fx.graph).unwrap();

    assert!(report.issues.is_empty());
    assert_eq!(report.repositioned, 1);
    assert_eq!(fx.panel.root_children(), &[late_id]);
    assert_eq!(fx.panel.children_of(late_id).unwrap(), &[orphan]);
    assert_consistent(&fx);
}

#[test]
fn removing_container_rehomes_live_children_at_root() {
    let mut fx = setup();
    let f = insert(&fx, folder("F"));
    let a = insert(&fx, file_in("a.txt", Some(f)));
    fx.panel.populate(&fx.graph).unwrap();

    fx.graph.remove(f).unwrap();
    let report = fx.panel.pump(&fx.graph).unwrap();

    assert_eq!(report.removed, 2);
    assert_eq!(report.added, 1);
    assert!(report.has_issue("missing_container_row"));
    assert_eq!(fx.panel.root_children(), &[a]);
    assert_consistent(&fx);
}

#[test]
fn teardown_disposes_everything_and_later_events_are_noops() {
    let mut fx = setup();
    let f = insert(&fx, folder("F"));
    let a = insert(&fx, file_in("a.txt", Some(f)));
    fx.panel.populate(&fx.graph).unwrap();

    fx.panel.teardown();

    assert!(fx.panel.is_torn_down());
    assert!(fx.panel.is_empty());
    assert_eq!(fx.panel.active_subscriptions(), 0);
    assert!(fx.panel.channel().is_closed());

    fx.graph.rename(a, "late.txt").unwrap();
    assert!(fx.panel.pump(&fx.graph).unwrap().is_noop());
    assert!(fx
        .panel
        .handle_event(&fx.graph, ChangeEvent::updated(a, 9))
        .unwrap()
        .is_noop());
    assert!(fx.panel.synchronize(&fx.graph).unwrap().is_noop());
    fx.panel.teardown();
    assert!(fx.panel.row(a).is_none());
}

#[test]
fn drain_limit_spreads_events_over_pumps() {
    let config = SyncConfig {
        max_events_per_pump: 1,
        ..SyncConfig::default()
    };
    let mut fx = setup_with(config);
    for name in ["a", "b", "c"] {
        insert(&fx, file_in(name, None));
    }

    let report = fx.panel.pump(&fx.graph).unwrap();
    assert_eq!(report.added, 3);
    assert_eq!(fx.panel.channel().pending(), 2);

    let report = fx.panel.pump(&fx.graph).unwrap();
    assert!(report.has_issue("duplicate_materialization"));
    assert_eq!(fx.panel.channel().pending(), 1);
}

#[test]
fn uncoalesced_pump_runs_one_pass_per_structural_event() {
    let config = SyncConfig {
        coalesce_structural_events: false,
        ..SyncConfig::default()
    };
    let mut fx = setup_with(config);
    insert(&fx, file_in("a", None));
    insert(&fx, file_in("b", None));

    let report = fx.panel.pump(&fx.graph).unwrap();

    assert_eq!(report.added, 2);
    assert!(report.has_issue("duplicate_materialization"));
    assert_consistent(&fx);
}

#[test]
fn subscription_count_tracks_rows_through_mixed_changes() {
    let mut fx = setup();
    let f1 = insert(&fx, folder("F1"));
    let f2 = insert(&fx, folder("F2"));
    let files: Vec<Uuid> = (0..5)
        .map(|index| insert(&fx, file_in(&format!("f{index}"), Some(f1))))
        .collect();
    fx.panel.pump(&fx.graph).unwrap();
    assert_consistent(&fx);

    fx.graph.set_container(files[0], Some(f2)).unwrap();
    fx.graph.remove(files[1]).unwrap();
    fx.graph.rename(files[2], "zz").unwrap();
    fx.graph.set_container(f2, Some(f1)).unwrap();
    insert(&fx, file_in("new", Some(f2)));
    fx.panel.pump(&fx.graph).unwrap();

    assert_eq!(fx.panel.len(), 7);
    assert_eq!(fx.panel.children_of(f1).unwrap().first(), Some(&f2));
    assert_consistent(&fx);
}

#[test]
fn builder_requires_scope_and_open_channel() {
    let missing_channel = ProjectionPanel::builder().scope(Uuid::new_v4()).build();
    assert!(missing_channel.is_err());

    let missing_scope = ProjectionPanel::builder().channel(ChangeChannel::new()).build();
    assert!(missing_scope.is_err());

    let closed = ChangeChannel::new();
    closed.close();
    let closed_channel = ProjectionPanel::builder()
        .scope(Uuid::new_v4())
        .channel(closed)
        .build();
    assert!(closed_channel.is_err());
}
