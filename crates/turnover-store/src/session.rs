use std::collections::BTreeSet;

use crate::error::StoreError;
use crate::rows::{
    ChangeLogRow, ModificationRow, MsDataFileRow, PeptideAnalysisRow, PeptideFileAnalysisRow,
    PeptideRow, SettingRow, TracerDefRow, WorkspaceRow,
};
use crate::snapshot::{load_snapshots, Snapshots};

/// A shared relational store. Each reconciliation pass opens one session.
pub trait Store: Send + Sync {
    fn open_session(&self) -> Result<Box<dyn StoreSession + '_>, StoreError>;
}

/// Read-only queries a pass issues. All `*_after` queries return rows in
/// ascending id order.
pub trait StoreSession {
    /// The singleton workspace row, if one has been written.
    fn workspace_row(&self) -> Result<Option<WorkspaceRow>, StoreError>;
    fn settings(&self) -> Result<Vec<SettingRow>, StoreError>;
    fn modifications(&self) -> Result<Vec<ModificationRow>, StoreError>;
    fn tracer_defs(&self) -> Result<Vec<TracerDefRow>, StoreError>;

    fn peptides_after(&self, cursor: i64) -> Result<Vec<PeptideRow>, StoreError>;
    fn peptides_in(&self, ids: &BTreeSet<i64>) -> Result<Vec<PeptideRow>, StoreError>;

    fn ms_data_files_after(&self, cursor: i64) -> Result<Vec<MsDataFileRow>, StoreError>;
    fn ms_data_files_in(&self, ids: &BTreeSet<i64>) -> Result<Vec<MsDataFileRow>, StoreError>;

    /// Only the ids: analyses are always read through a snapshot.
    fn peptide_analysis_ids_after(&self, cursor: i64) -> Result<Vec<i64>, StoreError>;
    fn peptide_analyses_in(
        &self,
        ids: &BTreeSet<i64>,
    ) -> Result<Vec<PeptideAnalysisRow>, StoreError>;
    fn file_analyses_for(
        &self,
        analysis_ids: &BTreeSet<i64>,
    ) -> Result<Vec<PeptideFileAnalysisRow>, StoreError>;

    fn change_log_after(&self, checkpoint: i64) -> Result<Vec<ChangeLogRow>, StoreError>;
    /// Highest change-log id, `0` for an empty log.
    fn max_change_log_id(&self) -> Result<i64, StoreError>;

    /// Deep read of each requested analysis. Backends that can isolate the
    /// reads (a transaction, a single lock scope) should override this.
    fn peptide_analysis_snapshots(&self, ids: &BTreeSet<i64>) -> Result<Snapshots, StoreError> {
        load_snapshots(self, ids)
    }
}

/// Writes issued by the sessions the reconciler observes. Inserts ignore the
/// row's `id` and return the one the store assigned.
pub trait StoreWriter {
    /// Creates or renames the singleton workspace row.
    fn set_workspace(&self, name: &str, data_directory: &str) -> Result<i64, StoreError>;
    /// Inserts or overwrites the setting called `name`.
    fn put_setting(&self, name: &str, value: &str) -> Result<i64, StoreError>;
    fn add_modification(&self, row: ModificationRow) -> Result<i64, StoreError>;
    fn add_tracer_def(&self, row: TracerDefRow) -> Result<i64, StoreError>;

    fn insert_peptide(&self, row: PeptideRow) -> Result<i64, StoreError>;
    fn update_peptide(&self, row: &PeptideRow) -> Result<(), StoreError>;

    fn insert_ms_data_file(&self, row: MsDataFileRow) -> Result<i64, StoreError>;
    fn update_ms_data_file(&self, row: &MsDataFileRow) -> Result<(), StoreError>;

    fn insert_peptide_analysis(&self, row: PeptideAnalysisRow) -> Result<i64, StoreError>;
    fn update_peptide_analysis(&self, row: &PeptideAnalysisRow) -> Result<(), StoreError>;
    /// Deletes the analysis and its file analyses; `false` if it was absent.
    fn delete_peptide_analysis(&self, id: i64) -> Result<bool, StoreError>;

    fn insert_file_analysis(&self, row: PeptideFileAnalysisRow) -> Result<i64, StoreError>;
    fn update_file_analysis(&self, row: &PeptideFileAnalysisRow) -> Result<(), StoreError>;

    fn record_change(&self, row: ChangeLogRow) -> Result<i64, StoreError>;
}
