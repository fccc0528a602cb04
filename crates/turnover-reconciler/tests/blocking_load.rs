//! Blocking loads and the worker under concurrent writers.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use turnover_model::Workspace;
use turnover_reconciler::{Reconciler, ReconcilerConfig};
use turnover_store::{
    ChangeLogRow, MemoryStore, PeptideAnalysisRow, PeptideFileAnalysisRow, PeptideRow, StoreWriter,
};

fn analysis(peptide_id: i64) -> PeptideAnalysisRow {
    PeptideAnalysisRow {
        peptide_id,
        min_charge: 1,
        max_charge: 3,
        ..PeptideAnalysisRow::default()
    }
}

#[test]
fn load_one_waits_until_the_row_exists() {
    let store = MemoryStore::new();
    let peptide = store.insert_peptide(PeptideRow::default()).unwrap();
    for _ in 1..=6 {
        store.insert_peptide_analysis(analysis(peptide)).unwrap();
    }
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(Workspace::new()),
        Arc::new(store.clone()),
        // Long poll: only an explicit wake gets the loader going again.
        ReconcilerConfig {
            poll_interval_ms: 30_000,
            ..ReconcilerConfig::default()
        },
    ));

    let (tx, rx) = mpsc::channel();
    let loader = {
        let reconciler = Arc::clone(&reconciler);
        thread::spawn(move || {
            let node = reconciler.load_one(7).unwrap();
            tx.send(node.id()).unwrap();
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(store.insert_peptide_analysis(analysis(peptide)).unwrap(), 7);
    store.record_change(ChangeLogRow::peptide_analysis(7)).unwrap();
    reconciler.wake();

    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), Some(7));
    loader.join().unwrap();
    assert!(reconciler
        .workspace()
        .acquire_read()
        .peptide_analyses
        .contains(7));
}

#[test]
fn worker_pass_releases_a_waiting_loader() {
    let store = MemoryStore::new();
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(Workspace::new()),
        Arc::new(store.clone()),
        ReconcilerConfig {
            poll_interval_ms: 20,
            ..ReconcilerConfig::default()
        },
    ));
    reconciler.start().unwrap();

    let loader = {
        let reconciler = Arc::clone(&reconciler);
        thread::spawn(move || reconciler.load_one(1).map(|node| node.id()))
    };
    thread::sleep(Duration::from_millis(100));
    store.insert_peptide_analysis(analysis(1)).unwrap();

    assert_eq!(loader.join().unwrap().unwrap(), Some(1));
    reconciler.shutdown();
}

#[test]
fn worker_converges_under_a_concurrent_writer() {
    let store = MemoryStore::new();
    let reconciler = Reconciler::new(
        Arc::new(Workspace::new()),
        Arc::new(store.clone()),
        ReconcilerConfig {
            poll_interval_ms: 5,
            ..ReconcilerConfig::default()
        },
    );
    reconciler.start().unwrap();

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for n in 0..200i64 {
                let peptide = store.insert_peptide(PeptideRow::default()).unwrap();
                let a = store.insert_peptide_analysis(analysis(peptide)).unwrap();
                store
                    .insert_file_analysis(PeptideFileAnalysisRow {
                        peptide_analysis_id: a,
                        ms_data_file_id: 1,
                        chromatogram_count: n % 3,
                        ..PeptideFileAnalysisRow::default()
                    })
                    .unwrap();
                store.record_change(ChangeLogRow::peptide_analysis(a)).unwrap();
                if n % 10 == 0 {
                    store.record_change(ChangeLogRow::peptide(peptide)).unwrap();
                }
                if n % 7 == 0 {
                    store.delete_peptide_analysis(a - 1).unwrap();
                    store.record_change(ChangeLogRow::peptide_analysis(a - 1)).unwrap();
                }
            }
        })
    };
    writer.join().unwrap();
    reconciler.shutdown();
    reconciler.sync().unwrap();

    let fresh = Reconciler::new(
        Arc::new(Workspace::new()),
        Arc::new(store),
        ReconcilerConfig::default(),
    );
    fresh.sync().unwrap();
    assert_eq!(reconciler.workspace().summary(), fresh.workspace().summary());
}
