//! CLI smoke entry point.
//!
//! Projects a small file store kept in an in-memory SQLite graph, moves a
//! file between folders and prints the tree before and after.

use rowsync_core::db::open_db_in_memory;
use rowsync_core::{
    ChangeChannel, ComparatorRegistry, EntityKind, EntitySnapshot, ProjectionPanel, RowSnapshot,
    SqliteDomainGraph,
};
use std::error::Error;
use std::process::ExitCode;
use uuid::Uuid;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("rowsync: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    println!("rowsync_core version={}", rowsync_core::core_version());

    let conn = open_db_in_memory()?;
    let channel = ChangeChannel::new();
    let mut graph = SqliteDomainGraph::try_new(&conn)?;
    graph.attach_channel(channel.clone());

    let store = Uuid::new_v4();
    let f1 = EntitySnapshot::named(EntityKind::Folder, "F1");
    let f2 = EntitySnapshot::named(EntityKind::Folder, "F2");
    let file = EntitySnapshot::named(EntityKind::File, "A.txt").with_container(Some(f1.id));
    for snapshot in [&f1, &f2, &file] {
        graph.insert(store, snapshot)?;
    }

    let mut panel = ProjectionPanel::builder()
        .scope(store)
        .channel(channel)
        .ordering(ComparatorRegistry::file_store_defaults())
        .build()?;
    let report = panel.populate(&graph)?;
    println!("populated rows={} added={}", panel.len(), report.added);
    print_tree(&panel.snapshot(), 0);

    graph.set_container(file.id, Some(f2.id))?;
    let report = panel.pump(&graph)?;
    println!(
        "moved A.txt to F2 repositioned={} refreshed={}",
        report.repositioned, report.refreshed
    );
    print_tree(&panel.snapshot(), 0);

    panel.teardown();
    println!("teardown subscriptions={}", panel.active_subscriptions());
    Ok(())
}

fn print_tree(rows: &[RowSnapshot], depth: usize) {
    for row in rows {
        println!("{}{} ({})", "  ".repeat(depth), row.label, row.kind);
        print_tree(&row.children, depth + 1);
    }
}
