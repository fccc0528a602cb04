//! Incremental passes reach the same graph as a one-shot load.

use proptest::prelude::*;
use std::sync::Arc;
use turnover_model::{Workspace, WorkspaceSummary};
use turnover_reconciler::{PassOutcome, Reconciler, ReconcilerConfig};
use turnover_store::{
    ChangeLogRow, MemoryStore, MsDataFileRow, PeptideAnalysisRow, PeptideFileAnalysisRow,
    PeptideRow, StoreWriter,
};

/// One write by "another session". Indices pick among rows created so far.
#[derive(Debug, Clone)]
enum Op {
    InsertPeptide { logged: bool },
    RenameProtein { pick: usize, name: u8 },
    InsertFile { logged: bool },
    RelabelFile { pick: usize, cohort: u8 },
    InsertAnalysis { peptide: usize, logged: bool },
    EditAnalysis { pick: usize, charge: i64 },
    DeleteAnalysis { pick: usize },
    InsertFileAnalysis { analysis: usize, file: usize },
    CountChromatograms { pick: usize, chromatograms: i64, peaks: i64 },
    PutSetting { value: u8 },
    Pass,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<bool>().prop_map(|logged| Op::InsertPeptide { logged }),
        (any::<usize>(), any::<u8>()).prop_map(|(pick, name)| Op::RenameProtein { pick, name }),
        any::<bool>().prop_map(|logged| Op::InsertFile { logged }),
        (any::<usize>(), any::<u8>()).prop_map(|(pick, cohort)| Op::RelabelFile { pick, cohort }),
        (any::<usize>(), any::<bool>())
            .prop_map(|(peptide, logged)| Op::InsertAnalysis { peptide, logged }),
        (any::<usize>(), 1i64..6).prop_map(|(pick, charge)| Op::EditAnalysis { pick, charge }),
        any::<usize>().prop_map(|pick| Op::DeleteAnalysis { pick }),
        (any::<usize>(), any::<usize>())
            .prop_map(|(analysis, file)| Op::InsertFileAnalysis { analysis, file }),
        (any::<usize>(), 0i64..3, 0i64..3).prop_map(|(pick, chromatograms, peaks)| {
            Op::CountChromatograms {
                pick,
                chromatograms,
                peaks,
            }
        }),
        any::<u8>().prop_map(|value| Op::PutSetting { value }),
        Just(Op::Pass),
        Just(Op::Pass),
    ]
}

/// Writes to the store the way a cooperating session does: every update is
/// followed by a change-log record; inserts may skip it.
struct Writer {
    store: MemoryStore,
    workspace_id: i64,
    peptides: Vec<PeptideRow>,
    files: Vec<MsDataFileRow>,
    analyses: Vec<PeptideAnalysisRow>,
    file_analyses: Vec<PeptideFileAnalysisRow>,
}

fn pick<T>(rows: &mut [T], index: usize) -> Option<&mut T> {
    if rows.is_empty() {
        return None;
    }
    let len = rows.len();
    rows.get_mut(index % len)
}

impl Writer {
    fn new(store: MemoryStore) -> Self {
        let workspace_id = store.set_workspace("liver", "/data/liver").unwrap();
        Self {
            store,
            workspace_id,
            peptides: Vec::new(),
            files: Vec::new(),
            analyses: Vec::new(),
            file_analyses: Vec::new(),
        }
    }

    fn log(&self, record: ChangeLogRow) {
        self.store.record_change(record).unwrap();
    }

    fn apply(&mut self, op: &Op) {
        match *op {
            Op::InsertPeptide { logged } => {
                let mut row = PeptideRow {
                    sequence: format!("PEP{}K", self.peptides.len()),
                    max_tracer_count: 2,
                    ..PeptideRow::default()
                };
                row.id = self.store.insert_peptide(row.clone()).unwrap();
                if logged {
                    self.log(ChangeLogRow::peptide(row.id));
                }
                self.peptides.push(row);
            }
            Op::RenameProtein { pick: index, name } => {
                if let Some(row) = pick(&mut self.peptides, index) {
                    row.protein_name = format!("PROT{name}");
                    let row = row.clone();
                    self.store.update_peptide(&row).unwrap();
                    self.log(ChangeLogRow::peptide(row.id));
                }
            }
            Op::InsertFile { logged } => {
                let mut row = MsDataFileRow {
                    name: format!("run{}.raw", self.files.len()),
                    ..MsDataFileRow::default()
                };
                row.id = self.store.insert_ms_data_file(row.clone()).unwrap();
                if logged {
                    self.log(ChangeLogRow::ms_data_file(row.id));
                }
                self.files.push(row);
            }
            Op::RelabelFile { pick: index, cohort } => {
                if let Some(row) = pick(&mut self.files, index) {
                    row.cohort = format!("cohort{cohort}");
                    row.time_point = Some(f64::from(cohort));
                    let row = row.clone();
                    self.store.update_ms_data_file(&row).unwrap();
                    self.log(ChangeLogRow::ms_data_file(row.id));
                }
            }
            Op::InsertAnalysis { peptide, logged } => {
                let Some(peptide_id) = pick(&mut self.peptides, peptide).map(|p| p.id) else {
                    return;
                };
                let mut row = PeptideAnalysisRow {
                    peptide_id,
                    min_charge: 1,
                    max_charge: 3,
                    ..PeptideAnalysisRow::default()
                };
                row.id = self.store.insert_peptide_analysis(row.clone()).unwrap();
                if logged {
                    self.log(ChangeLogRow::peptide_analysis(row.id));
                }
                self.analyses.push(row);
            }
            Op::EditAnalysis { pick: index, charge } => {
                if let Some(row) = pick(&mut self.analyses, index) {
                    row.max_charge = charge;
                    let row = row.clone();
                    self.store.update_peptide_analysis(&row).unwrap();
                    self.log(ChangeLogRow::peptide_analysis(row.id));
                }
            }
            Op::DeleteAnalysis { pick: index } => {
                if self.analyses.is_empty() {
                    return;
                }
                let row = self.analyses.remove(index % self.analyses.len());
                self.store.delete_peptide_analysis(row.id).unwrap();
                self.file_analyses
                    .retain(|child| child.peptide_analysis_id != row.id);
                self.log(ChangeLogRow::peptide_analysis(row.id));
            }
            Op::InsertFileAnalysis { analysis, file } => {
                let Some(analysis_id) = pick(&mut self.analyses, analysis).map(|a| a.id) else {
                    return;
                };
                let Some(file_id) = pick(&mut self.files, file).map(|f| f.id) else {
                    return;
                };
                let mut row = PeptideFileAnalysisRow {
                    peptide_analysis_id: analysis_id,
                    ms_data_file_id: file_id,
                    ..PeptideFileAnalysisRow::default()
                };
                row.id = self.store.insert_file_analysis(row.clone()).unwrap();
                self.log(ChangeLogRow::peptide_analysis(analysis_id));
                self.file_analyses.push(row);
            }
            Op::CountChromatograms {
                pick: index,
                chromatograms,
                peaks,
            } => {
                if let Some(row) = pick(&mut self.file_analyses, index) {
                    row.chromatogram_count = chromatograms;
                    row.peak_count = peaks;
                    let row = row.clone();
                    self.store.update_file_analysis(&row).unwrap();
                    self.log(ChangeLogRow::peptide_analysis(row.peptide_analysis_id));
                }
            }
            Op::PutSetting { value } => {
                self.store
                    .put_setting("ChromatogramTimeWindow", &value.to_string())
                    .unwrap();
                self.log(ChangeLogRow::workspace(self.workspace_id));
            }
            Op::Pass => {}
        }
    }
}

fn config() -> ReconcilerConfig {
    ReconcilerConfig {
        poll_interval_ms: 10,
        ..ReconcilerConfig::default()
    }
}

fn one_shot(store: &MemoryStore) -> WorkspaceSummary {
    let reconciler =
        Reconciler::new(Arc::new(Workspace::new()), Arc::new(store.clone()), config());
    reconciler.sync().unwrap();
    reconciler.workspace().summary()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn incremental_passes_converge_to_a_full_load(ops in prop::collection::vec(op(), 1..60)) {
        let store = MemoryStore::new();
        let mut writer = Writer::new(store.clone());
        let incremental =
            Reconciler::new(Arc::new(Workspace::new()), Arc::new(store.clone()), config());

        let mut previous = incremental.status().cursors;
        for op in &ops {
            writer.apply(op);
            if matches!(op, Op::Pass) {
                let outcome = incremental.run_pass().unwrap();
                // Single-threaded writer: nothing can race.
                let summary = match outcome {
                    PassOutcome::Complete(summary) => summary,
                    PassOutcome::Incomplete => panic!("unexpected race"),
                };
                prop_assert!(summary.cursors.peptide >= previous.peptide);
                prop_assert!(summary.cursors.ms_data_file >= previous.ms_data_file);
                prop_assert!(summary.cursors.peptide_analysis >= previous.peptide_analysis);
                prop_assert!(summary.cursors.change_log >= previous.change_log);
                previous = summary.cursors;
            }
        }
        incremental.sync().unwrap();

        prop_assert_eq!(incremental.workspace().summary(), one_shot(&store));
    }

    #[test]
    fn repeating_a_pass_changes_nothing(ops in prop::collection::vec(op(), 1..40)) {
        let store = MemoryStore::new();
        let mut writer = Writer::new(store.clone());
        for op in &ops {
            writer.apply(op);
        }
        let reconciler =
            Reconciler::new(Arc::new(Workspace::new()), Arc::new(store.clone()), config());
        reconciler.sync().unwrap();
        let first = reconciler.workspace().summary();

        let again = reconciler.sync().unwrap();
        prop_assert_eq!(again.changed, 0);
        prop_assert_eq!(reconciler.workspace().summary(), first);
    }
}
