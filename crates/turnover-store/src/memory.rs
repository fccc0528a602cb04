//! In-process store used by tests and demos.

use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::StoreError;
use crate::rows::{
    ChangeLogRow, ModificationRow, MsDataFileRow, PeptideAnalysisRow, PeptideFileAnalysisRow,
    PeptideRow, SettingRow, TracerDefRow, WorkspaceRow,
};
use crate::session::{Store, StoreSession, StoreWriter};
use crate::snapshot::{load_snapshots, Snapshots};

/// Last id handed out per table. Ids are never reused, even after deletes.
#[derive(Debug, Default)]
struct Sequences {
    workspace: i64,
    setting: i64,
    modification: i64,
    tracer_def: i64,
    peptide: i64,
    ms_data_file: i64,
    peptide_analysis: i64,
    file_analysis: i64,
    change_log: i64,
}

fn next_id(slot: &mut i64) -> i64 {
    *slot += 1;
    *slot
}

#[derive(Debug, Default)]
struct Tables {
    offline: bool,
    seq: Sequences,
    workspace: Option<WorkspaceRow>,
    settings: BTreeMap<i64, SettingRow>,
    modifications: BTreeMap<i64, ModificationRow>,
    tracer_defs: BTreeMap<i64, TracerDefRow>,
    peptides: BTreeMap<i64, PeptideRow>,
    ms_data_files: BTreeMap<i64, MsDataFileRow>,
    peptide_analyses: BTreeMap<i64, PeptideAnalysisRow>,
    file_analyses: BTreeMap<i64, PeptideFileAnalysisRow>,
    change_log: BTreeMap<i64, ChangeLogRow>,
}

impl Tables {
    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

fn after<T: Clone>(table: &BTreeMap<i64, T>, cursor: i64) -> Vec<T> {
    table
        .range(cursor.saturating_add(1)..)
        .map(|(_, row)| row.clone())
        .collect()
}

fn within<T: Clone>(table: &BTreeMap<i64, T>, ids: &BTreeSet<i64>) -> Vec<T> {
    ids.iter().filter_map(|id| table.get(id).cloned()).collect()
}

/// A shareable, cloneable store whose clones all see the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: while unavailable every session and write fails
    /// with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.tables.write().offline = !available;
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        let tables = self.tables.read();
        tables.check_online()?;
        Ok(tables)
    }

    fn write<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut tables = self.tables.write();
        tables.check_online()?;
        f(&mut tables)
    }
}

impl Store for MemoryStore {
    fn open_session(&self) -> Result<Box<dyn StoreSession + '_>, StoreError> {
        drop(self.read()?);
        Ok(Box::new(MemorySession { store: self }))
    }
}

struct MemorySession<'a> {
    store: &'a MemoryStore,
}

impl StoreSession for MemorySession<'_> {
    fn workspace_row(&self) -> Result<Option<WorkspaceRow>, StoreError> {
        self.store.read()?.workspace_row()
    }

    fn settings(&self) -> Result<Vec<SettingRow>, StoreError> {
        self.store.read()?.settings()
    }

    fn modifications(&self) -> Result<Vec<ModificationRow>, StoreError> {
        self.store.read()?.modifications()
    }

    fn tracer_defs(&self) -> Result<Vec<TracerDefRow>, StoreError> {
        self.store.read()?.tracer_defs()
    }

    fn peptides_after(&self, cursor: i64) -> Result<Vec<PeptideRow>, StoreError> {
        self.store.read()?.peptides_after(cursor)
    }

    fn peptides_in(&self, ids: &BTreeSet<i64>) -> Result<Vec<PeptideRow>, StoreError> {
        self.store.read()?.peptides_in(ids)
    }

    fn ms_data_files_after(&self, cursor: i64) -> Result<Vec<MsDataFileRow>, StoreError> {
        self.store.read()?.ms_data_files_after(cursor)
    }

    fn ms_data_files_in(&self, ids: &BTreeSet<i64>) -> Result<Vec<MsDataFileRow>, StoreError> {
        self.store.read()?.ms_data_files_in(ids)
    }

    fn peptide_analysis_ids_after(&self, cursor: i64) -> Result<Vec<i64>, StoreError> {
        self.store.read()?.peptide_analysis_ids_after(cursor)
    }

    fn peptide_analyses_in(
        &self,
        ids: &BTreeSet<i64>,
    ) -> Result<Vec<PeptideAnalysisRow>, StoreError> {
        self.store.read()?.peptide_analyses_in(ids)
    }

    fn file_analyses_for(
        &self,
        analysis_ids: &BTreeSet<i64>,
    ) -> Result<Vec<PeptideFileAnalysisRow>, StoreError> {
        self.store.read()?.file_analyses_for(analysis_ids)
    }

    fn change_log_after(&self, checkpoint: i64) -> Result<Vec<ChangeLogRow>, StoreError> {
        self.store.read()?.change_log_after(checkpoint)
    }

    fn max_change_log_id(&self) -> Result<i64, StoreError> {
        self.store.read()?.max_change_log_id()
    }

    fn peptide_analysis_snapshots(&self, ids: &BTreeSet<i64>) -> Result<Snapshots, StoreError> {
        // One lock scope for the whole subtree so writers cannot interleave.
        let tables = self.store.read()?;
        load_snapshots(&*tables, ids)
    }
}

/// The tables answer queries directly; a [`MemorySession`] takes the read
/// lock per query and delegates here.
impl StoreSession for Tables {
    fn workspace_row(&self) -> Result<Option<WorkspaceRow>, StoreError> {
        Ok(self.workspace.clone())
    }

    fn settings(&self) -> Result<Vec<SettingRow>, StoreError> {
        Ok(self.settings.values().cloned().collect())
    }

    fn modifications(&self) -> Result<Vec<ModificationRow>, StoreError> {
        Ok(self.modifications.values().cloned().collect())
    }

    fn tracer_defs(&self) -> Result<Vec<TracerDefRow>, StoreError> {
        Ok(self.tracer_defs.values().cloned().collect())
    }

    fn peptides_after(&self, cursor: i64) -> Result<Vec<PeptideRow>, StoreError> {
        Ok(after(&self.peptides, cursor))
    }

    fn peptides_in(&self, ids: &BTreeSet<i64>) -> Result<Vec<PeptideRow>, StoreError> {
        Ok(within(&self.peptides, ids))
    }

    fn ms_data_files_after(&self, cursor: i64) -> Result<Vec<MsDataFileRow>, StoreError> {
        Ok(after(&self.ms_data_files, cursor))
    }

    fn ms_data_files_in(&self, ids: &BTreeSet<i64>) -> Result<Vec<MsDataFileRow>, StoreError> {
        Ok(within(&self.ms_data_files, ids))
    }

    fn peptide_analysis_ids_after(&self, cursor: i64) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .peptide_analyses
            .range(cursor.saturating_add(1)..)
            .map(|(id, _)| *id)
            .collect())
    }

    fn peptide_analyses_in(
        &self,
        ids: &BTreeSet<i64>,
    ) -> Result<Vec<PeptideAnalysisRow>, StoreError> {
        Ok(within(&self.peptide_analyses, ids))
    }

    fn file_analyses_for(
        &self,
        analysis_ids: &BTreeSet<i64>,
    ) -> Result<Vec<PeptideFileAnalysisRow>, StoreError> {
        Ok(self
            .file_analyses
            .values()
            .filter(|row| analysis_ids.contains(&row.peptide_analysis_id))
            .cloned()
            .collect())
    }

    fn change_log_after(&self, checkpoint: i64) -> Result<Vec<ChangeLogRow>, StoreError> {
        Ok(after(&self.change_log, checkpoint))
    }

    fn max_change_log_id(&self) -> Result<i64, StoreError> {
        Ok(self.change_log.keys().next_back().copied().unwrap_or(0))
    }
}

fn update_existing<T>(
    table: &mut BTreeMap<i64, T>,
    name: &'static str,
    id: i64,
    row: &T,
) -> Result<(), StoreError>
where
    T: Clone,
{
    match table.get_mut(&id) {
        Some(slot) => {
            *slot = row.clone();
            Ok(())
        }
        None => Err(StoreError::MissingRow { table: name, id }),
    }
}

impl StoreWriter for MemoryStore {
    fn set_workspace(&self, name: &str, data_directory: &str) -> Result<i64, StoreError> {
        self.write(|t| {
            let id = match &t.workspace {
                Some(existing) => existing.id,
                None => next_id(&mut t.seq.workspace),
            };
            t.workspace = Some(WorkspaceRow {
                id,
                name: name.to_string(),
                data_directory: data_directory.to_string(),
            });
            Ok(id)
        })
    }

    fn put_setting(&self, name: &str, value: &str) -> Result<i64, StoreError> {
        self.write(|t| {
            if let Some(existing) = t.settings.values_mut().find(|row| row.name == name) {
                existing.value = value.to_string();
                return Ok(existing.id);
            }
            let id = next_id(&mut t.seq.setting);
            t.settings.insert(
                id,
                SettingRow {
                    id,
                    name: name.to_string(),
                    value: value.to_string(),
                },
            );
            Ok(id)
        })
    }

    fn add_modification(&self, mut row: ModificationRow) -> Result<i64, StoreError> {
        self.write(|t| {
            row.id = next_id(&mut t.seq.modification);
            t.modifications.insert(row.id, row.clone());
            Ok(row.id)
        })
    }

    fn add_tracer_def(&self, mut row: TracerDefRow) -> Result<i64, StoreError> {
        self.write(|t| {
            row.id = next_id(&mut t.seq.tracer_def);
            t.tracer_defs.insert(row.id, row.clone());
            Ok(row.id)
        })
    }

    fn insert_peptide(&self, mut row: PeptideRow) -> Result<i64, StoreError> {
        self.write(|t| {
            row.id = next_id(&mut t.seq.peptide);
            t.peptides.insert(row.id, row.clone());
            Ok(row.id)
        })
    }

    fn update_peptide(&self, row: &PeptideRow) -> Result<(), StoreError> {
        self.write(|t| update_existing(&mut t.peptides, "peptide", row.id, row))
    }

    fn insert_ms_data_file(&self, mut row: MsDataFileRow) -> Result<i64, StoreError> {
        self.write(|t| {
            row.id = next_id(&mut t.seq.ms_data_file);
            t.ms_data_files.insert(row.id, row.clone());
            Ok(row.id)
        })
    }

    fn update_ms_data_file(&self, row: &MsDataFileRow) -> Result<(), StoreError> {
        self.write(|t| update_existing(&mut t.ms_data_files, "ms_data_file", row.id, row))
    }

    fn insert_peptide_analysis(&self, mut row: PeptideAnalysisRow) -> Result<i64, StoreError> {
        self.write(|t| {
            row.id = next_id(&mut t.seq.peptide_analysis);
            t.peptide_analyses.insert(row.id, row.clone());
            Ok(row.id)
        })
    }

    fn update_peptide_analysis(&self, row: &PeptideAnalysisRow) -> Result<(), StoreError> {
        self.write(|t| update_existing(&mut t.peptide_analyses, "peptide_analysis", row.id, row))
    }

    fn delete_peptide_analysis(&self, id: i64) -> Result<bool, StoreError> {
        self.write(|t| {
            if t.peptide_analyses.remove(&id).is_none() {
                return Ok(false);
            }
            t.file_analyses.retain(|_, row| row.peptide_analysis_id != id);
            Ok(true)
        })
    }

    fn insert_file_analysis(&self, mut row: PeptideFileAnalysisRow) -> Result<i64, StoreError> {
        self.write(|t| {
            row.id = next_id(&mut t.seq.file_analysis);
            t.file_analyses.insert(row.id, row.clone());
            Ok(row.id)
        })
    }

    fn update_file_analysis(&self, row: &PeptideFileAnalysisRow) -> Result<(), StoreError> {
        self.write(|t| update_existing(&mut t.file_analyses, "peptide_file_analysis", row.id, row))
    }

    fn record_change(&self, mut row: ChangeLogRow) -> Result<i64, StoreError> {
        self.write(|t| {
            row.id = next_id(&mut t.seq.change_log);
            t.change_log.insert(row.id, row.clone());
            Ok(row.id)
        })
    }
}
