use rowsync_core::db::{open_db, open_db_in_memory};
use rowsync_core::{
    ChangeChannel, ComparatorRegistry, DomainGraph, EntityKind, EntitySnapshot, GraphError,
    ProjectionPanel, RowParent, SqliteDomainGraph,
};
use rusqlite::Connection;
use uuid::Uuid;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn panel_for(store: Uuid, channel: ChangeChannel) -> ProjectionPanel {
    ProjectionPanel::builder()
        .scope(store)
        .channel(channel)
        .ordering(ComparatorRegistry::file_store_defaults())
        .build()
        .unwrap()
}

#[test]
fn projection_follows_sqlite_moves_renames_and_deletes() {
    let conn = setup();
    let channel = ChangeChannel::new();
    let mut graph = SqliteDomainGraph::try_new(&conn).unwrap();
    graph.attach_channel(channel.clone());

    let store = Uuid::new_v4();
    let f1 = EntitySnapshot::named(EntityKind::Folder, "F1");
    let f2 = EntitySnapshot::named(EntityKind::Folder, "F2");
    let a = EntitySnapshot::named(EntityKind::File, "A.txt").with_container(Some(f1.id));
    let b = EntitySnapshot::named(EntityKind::File, "b.txt").with_container(Some(f1.id));
    for snapshot in [&f1, &f2, &a, &b] {
        graph.insert(store, snapshot).unwrap();
    }

    let mut panel = panel_for(store, channel);
    panel.populate(&graph).unwrap();
    assert_eq!(panel.labels_of(RowParent::Row(f1.id)), vec!["A.txt", "b.txt"]);

    graph.set_container(a.id, Some(f2.id)).unwrap();
    graph.rename(b.id, "0.txt").unwrap();
    panel.pump(&graph).unwrap();

    assert_eq!(panel.labels_of(RowParent::Row(f1.id)), vec!["0.txt"]);
    assert_eq!(panel.children_of(f2.id).unwrap(), &[a.id]);
    assert_eq!(panel.row(a.id).unwrap().revision(), 2);

    graph.soft_delete(f2.id).unwrap();
    let report = panel.pump(&graph).unwrap();

    assert_eq!(report.removed, 2);
    assert!(report.has_issue("missing_container_row"));
    assert_eq!(panel.labels_of(RowParent::Root), vec!["F1", "A.txt"]);
    assert!(panel.audit(&graph).unwrap().is_empty());
    assert_eq!(panel.active_subscriptions(), panel.len());
}

#[test]
fn stored_tree_is_projected_again_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");
    let store = Uuid::new_v4();
    let docs = EntitySnapshot::named(EntityKind::Folder, "docs");
    let note = EntitySnapshot::named(EntityKind::File, "note.md")
        .with_container(Some(docs.id))
        .with_attribute("size", 42_i64);

    {
        let conn = open_db(&path).unwrap();
        let graph = SqliteDomainGraph::try_new(&conn).unwrap();
        graph.insert(store, &docs).unwrap();
        graph.insert(store, &note).unwrap();
        graph.rename(note.id, "notes.md").unwrap();
    }

    let conn = open_db(&path).unwrap();
    let graph = SqliteDomainGraph::try_new(&conn).unwrap();
    let stored = graph.entity(note.id).unwrap().unwrap();
    assert_eq!(stored.revision, 2);
    assert_eq!(stored.attributes, note.clone().with_attribute("name", "notes.md").attributes);

    let mut panel = panel_for(store, ChangeChannel::new());
    panel.populate(&graph).unwrap();
    let tree = panel.snapshot();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].label, "docs");
    assert_eq!(tree[0].children[0].label, "notes.md");
    assert_eq!(tree[0].children[0].revision, 2);
}

#[test]
fn scope_members_exclude_other_scopes_and_the_owner() {
    let conn = setup();
    let graph = SqliteDomainGraph::try_new(&conn).unwrap();
    let store = Uuid::new_v4();
    let other = Uuid::new_v4();

    let owner = EntitySnapshot::new(store, EntityKind::Folder, 1);
    let mine = EntitySnapshot::named(EntityKind::File, "mine");
    let theirs = EntitySnapshot::named(EntityKind::File, "theirs");
    graph.insert(store, &owner).unwrap();
    graph.insert(store, &mine).unwrap();
    graph.insert(other, &theirs).unwrap();

    assert_eq!(graph.scope_members(store).unwrap(), vec![mine.id]);
    assert!(graph.is_member(store, mine.id).unwrap());
    assert!(!graph.is_member(store, theirs.id).unwrap());
    assert!(!graph.is_member(store, store).unwrap());
}

#[test]
fn duplicate_insert_and_missing_entity_are_reported() {
    let conn = setup();
    let graph = SqliteDomainGraph::try_new(&conn).unwrap();
    let store = Uuid::new_v4();
    let file = EntitySnapshot::named(EntityKind::File, "a");
    graph.insert(store, &file).unwrap();

    assert!(matches!(
        graph.insert(store, &file),
        Err(GraphError::DuplicateEntity(id)) if id == file.id
    ));
    let ghost = Uuid::new_v4();
    assert!(matches!(
        graph.set_container(ghost, None),
        Err(GraphError::EntityNotFound(id)) if id == ghost
    ));
    assert!(matches!(
        graph.soft_delete(ghost),
        Err(GraphError::EntityNotFound(_))
    ));
}
