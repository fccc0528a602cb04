//! End-to-end tests across crates: two sessions share one SQLite file, one
//! writing rows the way a cooperating client does and one mirroring them
//! through the reconciler.
//!
//! Run with: cargo test --test integration_tests

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use turnover_model::{ChangeEvent, EntityKind, Workspace, WorkspaceSummary};
use turnover_reconciler::{Reconciler, ReconcilerConfig, TurnoverConfig};
use turnover_store::{
    ChangeLogRow, MsDataFileRow, PeptideAnalysisRow, PeptideFileAnalysisRow, PeptideRow,
    SqliteStore, StoreConfig, StoreWriter,
};

fn open(path: &std::path::Path) -> SqliteStore {
    SqliteStore::open_path(path, Duration::from_secs(5)).unwrap()
}

fn mirror(store: SqliteStore, config: ReconcilerConfig) -> Reconciler {
    Reconciler::new(Arc::new(Workspace::new()), Arc::new(store), config)
}

/// A one-shot load from a fresh session: the reference graph.
fn fresh_summary(path: &std::path::Path) -> WorkspaceSummary {
    let reconciler = mirror(open(path), ReconcilerConfig::default());
    reconciler.sync().unwrap();
    reconciler.workspace().summary()
}

struct Fixture {
    peptide: i64,
    files: Vec<i64>,
    analysis: i64,
}

fn seed(store: &SqliteStore) -> Fixture {
    store.set_workspace("liver", "/data/liver").unwrap();
    store.put_setting("tracer_symbol", "Leu").unwrap();
    let peptide = store
        .insert_peptide(PeptideRow {
            sequence: "LVNELTEFAK".to_string(),
            protein_name: "ALBU".to_string(),
            max_tracer_count: 2,
            ..PeptideRow::default()
        })
        .unwrap();
    let files = (0..3)
        .map(|day| {
            store
                .insert_ms_data_file(MsDataFileRow {
                    name: format!("day{day}.raw"),
                    cohort: "wt".to_string(),
                    time_point: Some(day as f64),
                    ..MsDataFileRow::default()
                })
                .unwrap()
        })
        .collect::<Vec<_>>();
    let analysis = store
        .insert_peptide_analysis(PeptideAnalysisRow {
            peptide_id: peptide,
            min_charge: 1,
            max_charge: 3,
            ..PeptideAnalysisRow::default()
        })
        .unwrap();
    for file in &files {
        store
            .insert_file_analysis(PeptideFileAnalysisRow {
                peptide_analysis_id: analysis,
                ms_data_file_id: *file,
                ..PeptideFileAnalysisRow::default()
            })
            .unwrap();
    }
    Fixture {
        peptide,
        files,
        analysis,
    }
}

// ============================================================================
// Passes against SQLite
// ============================================================================

#[test]
fn test_initial_sync_mirrors_the_database() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("turnover.sqlite");
    let writer = open(&path);
    let fixture = seed(&writer);

    let reconciler = mirror(open(&path), ReconcilerConfig::default());
    let summary = reconciler.sync().unwrap();
    assert!(summary.full_reload);

    let graph = reconciler.workspace().summary();
    assert_eq!(graph.info.as_ref().unwrap().name, "liver");
    assert_eq!(graph.settings.get("tracer_symbol").unwrap(), "Leu");
    assert_eq!(graph.peptides[&fixture.peptide].protein_name, "ALBU");
    assert_eq!(graph.ms_data_files.len(), 3);
    let analysis = &graph.peptide_analyses[&fixture.analysis];
    assert_eq!(analysis.file_analyses.len(), fixture.files.len());
    assert!(analysis
        .file_analyses
        .values()
        .all(|file_analysis| file_analysis.needs_chromatograms()));
}

#[test]
fn test_logged_edits_from_another_connection_are_picked_up() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("turnover.sqlite");
    let writer = open(&path);
    let fixture = seed(&writer);

    let reconciler = mirror(open(&path), ReconcilerConfig::default());
    reconciler.sync().unwrap();
    let node = reconciler
        .workspace()
        .acquire_read()
        .peptide_analyses
        .get(fixture.analysis)
        .cloned()
        .unwrap();

    writer
        .update_peptide_analysis(&PeptideAnalysisRow {
            id: fixture.analysis,
            peptide_id: fixture.peptide,
            note: "reviewed".to_string(),
            min_charge: 2,
            max_charge: 3,
            ..PeptideAnalysisRow::default()
        })
        .unwrap();
    writer
        .record_change(ChangeLogRow::peptide_analysis(fixture.analysis))
        .unwrap();

    let summary = reconciler.sync().unwrap();
    assert!(!summary.full_reload);
    assert_eq!(summary.analyses_loaded, 1);

    // Same instance, new state.
    let live = reconciler.try_load_one(fixture.analysis).unwrap().unwrap();
    assert!(Arc::ptr_eq(&node, &live));
    assert_eq!(node.read().note, "reviewed");
    assert_eq!(node.read().min_charge, 2);
    assert_eq!(reconciler.workspace().summary(), fresh_summary(&path));
}

#[test]
fn test_deleted_analysis_is_tombstoned_and_listeners_hear_it() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("turnover.sqlite");
    let writer = open(&path);
    let fixture = seed(&writer);

    let reconciler = mirror(open(&path), ReconcilerConfig::default());
    reconciler.sync().unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    reconciler.workspace().on_change(move |events: &[ChangeEvent]| {
        for event in events {
            if let ChangeEvent::Removed(key) = event {
                let _ = tx.send(*key);
            }
        }
    });

    assert!(writer.delete_peptide_analysis(fixture.analysis).unwrap());
    writer
        .record_change(ChangeLogRow::peptide_analysis(fixture.analysis))
        .unwrap();
    let summary = reconciler.sync().unwrap();
    assert_eq!(summary.analyses_removed, 1);
    assert!(reconciler.try_load_one(fixture.analysis).unwrap().is_none());

    let removed: Vec<_> = rx.try_iter().collect();
    assert!(removed
        .iter()
        .any(|key| key.kind == EntityKind::PeptideAnalysis && key.id == fixture.analysis));
    assert_eq!(
        removed
            .iter()
            .filter(|key| key.kind == EntityKind::PeptideFileAnalysis)
            .count(),
        fixture.files.len()
    );
}

// ============================================================================
// Worker
// ============================================================================

#[test]
fn test_worker_converges_with_a_concurrent_sqlite_writer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("turnover.sqlite");
    let writer = open(&path);
    let fixture = seed(&writer);

    let reconciler = Arc::new(mirror(
        open(&path),
        ReconcilerConfig {
            poll_interval_ms: 10,
            ..ReconcilerConfig::default()
        },
    ));
    reconciler.start().unwrap();

    for round in 0..20 {
        let analysis = writer
            .insert_peptide_analysis(PeptideAnalysisRow {
                peptide_id: fixture.peptide,
                min_charge: 1,
                max_charge: 2 + round % 3,
                ..PeptideAnalysisRow::default()
            })
            .unwrap();
        writer
            .insert_file_analysis(PeptideFileAnalysisRow {
                peptide_analysis_id: analysis,
                ms_data_file_id: fixture.files[round as usize % fixture.files.len()],
                chromatogram_count: round % 2,
                ..PeptideFileAnalysisRow::default()
            })
            .unwrap();
        writer
            .record_change(ChangeLogRow::peptide_analysis(analysis))
            .unwrap();
        if round % 5 == 0 {
            writer.put_setting("round", &round.to_string()).unwrap();
            writer
                .record_change(ChangeLogRow::workspace(1))
                .unwrap();
        }
        thread::sleep(Duration::from_millis(2));
    }

    reconciler.shutdown();
    assert!(!reconciler.is_running());

    // Whatever the worker managed, one more pass settles it.
    reconciler.sync().unwrap();
    assert_eq!(reconciler.workspace().summary(), fresh_summary(&path));
    let status = reconciler.status();
    assert!(status.passes_completed >= 1);
    assert!(status.last_pass_at.is_some());
}

#[test]
fn test_blocking_load_waits_for_a_sqlite_insert() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("turnover.sqlite");
    let writer = open(&path);
    let fixture = seed(&writer);

    let reconciler = Arc::new(mirror(
        open(&path),
        ReconcilerConfig {
            poll_interval_ms: 20,
            ..ReconcilerConfig::default()
        },
    ));
    reconciler.start().unwrap();

    let next = fixture.analysis + 1;
    let loader = {
        let reconciler = Arc::clone(&reconciler);
        thread::spawn(move || reconciler.load_one(next).map(|node| node.read().max_charge))
    };

    thread::sleep(Duration::from_millis(100));
    let inserted = writer
        .insert_peptide_analysis(PeptideAnalysisRow {
            peptide_id: fixture.peptide,
            min_charge: 1,
            max_charge: 4,
            ..PeptideAnalysisRow::default()
        })
        .unwrap();
    assert_eq!(inserted, next);

    assert_eq!(loader.join().unwrap().unwrap(), 4);
    reconciler.shutdown();
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_file_drives_store_and_reconciler() {
    let dir = tempdir().unwrap();
    let database = dir.path().join("configured.sqlite");
    let config_path = dir.path().join("turnover.json");
    let text = serde_json::json!({
        "store": { "database_path": database },
        "reconciler": { "requery_threshold": 1 }
    });
    std::fs::write(&config_path, text.to_string()).unwrap();

    let config = TurnoverConfig::load(&config_path).unwrap();
    assert_eq!(config.store.database_path, database);
    assert_eq!(
        config.store.busy_timeout_ms,
        StoreConfig::default().busy_timeout_ms
    );
    assert_eq!(config.reconciler.requery_threshold, 1);

    let writer = SqliteStore::open(&config.store).unwrap();
    seed(&writer);
    let reconciler = mirror(SqliteStore::open(&config.store).unwrap(), config.reconciler);
    let summary = reconciler.sync().unwrap();
    assert!(summary.requery);
    assert!(database.exists());
}
