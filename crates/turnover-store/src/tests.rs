use super::*;
use std::collections::BTreeSet;

fn ids(values: &[i64]) -> BTreeSet<i64> {
    values.iter().copied().collect()
}

fn analysis(peptide_id: i64) -> PeptideAnalysisRow {
    PeptideAnalysisRow {
        peptide_id,
        min_charge: 1,
        max_charge: 3,
        ..PeptideAnalysisRow::default()
    }
}

fn file_analysis(analysis_id: i64, file_id: i64) -> PeptideFileAnalysisRow {
    PeptideFileAnalysisRow {
        peptide_analysis_id: analysis_id,
        ms_data_file_id: file_id,
        ..PeptideFileAnalysisRow::default()
    }
}

#[test]
fn ids_increase_and_are_never_reused() {
    let store = MemoryStore::new();
    let p = store.insert_peptide(PeptideRow::default()).unwrap();
    let a1 = store.insert_peptide_analysis(analysis(p)).unwrap();
    assert!(store.delete_peptide_analysis(a1).unwrap());
    let a2 = store.insert_peptide_analysis(analysis(p)).unwrap();
    assert!(a2 > a1);
    assert!(!store.delete_peptide_analysis(a1).unwrap());
}

#[test]
fn after_queries_filter_by_cursor() {
    let store = MemoryStore::new();
    for sequence in ["AAK", "VLSK", "GGR"] {
        store
            .insert_peptide(PeptideRow {
                sequence: sequence.to_string(),
                ..PeptideRow::default()
            })
            .unwrap();
    }
    let session = store.open_session().unwrap();
    let rows = session.peptides_after(1).unwrap();
    assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(rows[0].sequence, "VLSK");
    assert!(session.peptides_after(3).unwrap().is_empty());
}

#[test]
fn snapshots_include_children_and_tombstones() {
    let store = MemoryStore::new();
    let a = store.insert_peptide_analysis(analysis(1)).unwrap();
    let f1 = store.insert_file_analysis(file_analysis(a, 10)).unwrap();
    let f2 = store.insert_file_analysis(file_analysis(a, 11)).unwrap();

    let session = store.open_session().unwrap();
    let snapshots = session.peptide_analysis_snapshots(&ids(&[a, 99])).unwrap();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots[&99].is_none());

    let snapshot = snapshots[&a].as_ref().unwrap();
    assert_eq!(snapshot.analysis.id, a);
    let child_ids: Vec<i64> = snapshot.file_analyses.iter().map(|r| r.id).collect();
    assert_eq!(child_ids, vec![f1, f2]);
}

#[test]
fn delete_cascades_to_file_analyses() {
    let store = MemoryStore::new();
    let a = store.insert_peptide_analysis(analysis(1)).unwrap();
    store.insert_file_analysis(file_analysis(a, 10)).unwrap();
    store.delete_peptide_analysis(a).unwrap();

    let session = store.open_session().unwrap();
    assert!(session.file_analyses_for(&ids(&[a])).unwrap().is_empty());
}

#[test]
fn change_log_max_is_zero_when_empty() {
    let store = MemoryStore::new();
    let session = store.open_session().unwrap();
    assert_eq!(session.max_change_log_id().unwrap(), 0);
    drop(session);

    store.record_change(ChangeLogRow::peptide(4)).unwrap();
    let id = store.record_change(ChangeLogRow::workspace(1)).unwrap();
    let session = store.open_session().unwrap();
    assert_eq!(session.max_change_log_id().unwrap(), id);
    let log = session.change_log_after(1).unwrap();
    assert_eq!(log.len(), 1);
    assert!(log[0].is_bare_workspace());
}

#[test]
fn settings_are_upserted_by_name() {
    let store = MemoryStore::new();
    let first = store.put_setting("MassAccuracy", "10").unwrap();
    let second = store.put_setting("MassAccuracy", "20").unwrap();
    assert_eq!(first, second);

    let session = store.open_session().unwrap();
    let settings = session.settings().unwrap();
    assert_eq!(settings.len(), 1);
    assert_eq!(settings[0].value, "20");
}

#[test]
fn update_of_missing_row_is_an_error() {
    let store = MemoryStore::new();
    let err = store
        .update_peptide(&PeptideRow {
            id: 7,
            ..PeptideRow::default()
        })
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::MissingRow {
            table: "peptide",
            id: 7
        }
    ));
}

#[test]
fn offline_store_fails_sessions_and_writes() {
    let store = MemoryStore::new();
    store.set_available(false);
    assert!(matches!(
        store.open_session().err(),
        Some(StoreError::Unavailable(_))
    ));
    assert!(store.insert_peptide(PeptideRow::default()).is_err());

    store.set_available(true);
    assert!(store.open_session().is_ok());
}

#[test]
fn bare_workspace_marker_is_only_the_workspace_reference() {
    assert!(ChangeLogRow::workspace(1).is_bare_workspace());
    let mixed = ChangeLogRow {
        peptide_id: Some(2),
        ..ChangeLogRow::workspace(1)
    };
    assert!(!mixed.is_bare_workspace());
    assert!(!ChangeLogRow::peptide_analysis(3).is_bare_workspace());
}
