//! The store-facing half of a reconciliation pass: everything that runs
//! before the workspace write lock is taken.

use serde::Serialize;
use std::collections::BTreeSet;
use turnover_store::{
    ChangeLogRow, ModificationRow, MsDataFileRow, PeptideRow, SettingRow, Snapshots, StoreError,
    StoreSession, TracerDefRow, WorkspaceRow,
};

use crate::cursor::Cursors;

#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// The delta was merged (or there was none) and cursors advanced.
    Complete(PassSummary),
    /// The store changed under the pass; nothing was merged or advanced.
    Incomplete,
}

impl PassOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, PassOutcome::Complete(_))
    }

    pub fn summary(&self) -> Option<&PassSummary> {
        match self {
            PassOutcome::Complete(summary) => Some(summary),
            PassOutcome::Incomplete => None,
        }
    }
}

/// What one committed pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassSummary {
    pub full_reload: bool,
    pub peptides: usize,
    pub ms_data_files: usize,
    pub analyses_loaded: usize,
    pub analyses_removed: usize,
    /// Requested analyses that had no row.
    pub tombstones: usize,
    /// Nodes created, changed or removed.
    pub changed: usize,
    pub pending_results: usize,
    pub pending_chromatograms: usize,
    /// Collaborators were told to requery instead of receiving ids.
    pub requery: bool,
    pub cursors: Cursors,
}

impl PassSummary {
    pub(crate) fn unchanged(cursors: Cursors) -> Self {
        Self {
            cursors,
            ..Self::default()
        }
    }
}

/// Workspace-level rows, re-read wholesale on a full reload.
#[derive(Debug)]
pub(crate) struct WorkspaceReload {
    pub workspace: Option<WorkspaceRow>,
    pub settings: Vec<SettingRow>,
    pub modifications: Vec<ModificationRow>,
    pub tracer_defs: Vec<TracerDefRow>,
}

/// Everything a pass read, ready to merge.
#[derive(Debug)]
pub(crate) struct Delta {
    pub reload: Option<WorkspaceReload>,
    pub peptides: Vec<PeptideRow>,
    pub ms_data_files: Vec<MsDataFileRow>,
    pub snapshots: Snapshots,
    /// Highest ids the scans and the change log reached.
    pub observed: Cursors,
}

impl Delta {
    /// Nothing to merge and no checkpoint movement: the lock can be skipped.
    pub fn is_noop(&self, cursors: &Cursors) -> bool {
        self.reload.is_none()
            && self.peptides.is_empty()
            && self.ms_data_files.is_empty()
            && self.snapshots.is_empty()
            && self.observed == *cursors
    }
}

fn max_id(ids: impl Iterator<Item = i64>) -> i64 {
    ids.max().unwrap_or(0)
}

/// Runs the scans, the change-log classification, the optional full reload
/// and the analysis snapshots.
///
/// On the initial load the change log is not replayed: its current maximum
/// becomes the checkpoint (read before the scans, so nothing written during
/// them is skipped) and everything is reloaded.
pub(crate) fn fetch(
    session: &dyn StoreSession,
    cursors: &Cursors,
    initial: bool,
    probes: &BTreeSet<i64>,
) -> Result<Delta, StoreError> {
    let mut observed = *cursors;
    let mut full_reload = initial;
    if initial {
        observed.change_log = observed.change_log.max(session.max_change_log_id()?);
    }

    let mut peptides = session.peptides_after(cursors.peptide)?;
    let mut ms_data_files = session.ms_data_files_after(cursors.ms_data_file)?;
    let scanned_analyses = session.peptide_analysis_ids_after(cursors.peptide_analysis)?;
    observed.peptide = observed.peptide.max(max_id(peptides.iter().map(|r| r.id)));
    observed.ms_data_file = observed
        .ms_data_file
        .max(max_id(ms_data_files.iter().map(|r| r.id)));
    observed.peptide_analysis = observed
        .peptide_analysis
        .max(max_id(scanned_analyses.iter().copied()));

    let scanned_peptides: BTreeSet<i64> = peptides.iter().map(|r| r.id).collect();
    let scanned_files: BTreeSet<i64> = ms_data_files.iter().map(|r| r.id).collect();
    let mut peptide_ids = BTreeSet::new();
    let mut file_ids = BTreeSet::new();
    let mut analysis_ids: BTreeSet<i64> = scanned_analyses.into_iter().collect();
    analysis_ids.extend(probes.iter().copied());

    if !initial {
        for record in session.change_log_after(cursors.change_log)? {
            observed.change_log = observed.change_log.max(record.id);
            if record.is_bare_workspace() {
                full_reload = true;
                continue;
            }
            if let Some(id) = record.peptide_id {
                if !scanned_peptides.contains(&id) {
                    peptide_ids.insert(id);
                }
            }
            if let Some(id) = record.ms_data_file_id {
                if !scanned_files.contains(&id) {
                    file_ids.insert(id);
                }
            }
            if let Some(id) = record.peptide_analysis_id {
                analysis_ids.insert(id);
            }
        }
    }

    if !peptide_ids.is_empty() {
        peptides.extend(session.peptides_in(&peptide_ids)?);
    }
    if !file_ids.is_empty() {
        ms_data_files.extend(session.ms_data_files_in(&file_ids)?);
    }

    let reload = if full_reload {
        Some(WorkspaceReload {
            workspace: session.workspace_row()?,
            settings: session.settings()?,
            modifications: session.modifications()?,
            tracer_defs: session.tracer_defs()?,
        })
    } else {
        None
    };

    let snapshots = if analysis_ids.is_empty() {
        Snapshots::new()
    } else {
        session.peptide_analysis_snapshots(&analysis_ids)?
    };

    Ok(Delta {
        reload,
        peptides,
        ms_data_files,
        snapshots,
        observed,
    })
}

/// Looks past `checkpoint` for a record that invalidates what the pass read:
/// anything touching the workspace, a peptide or a data file, or an analysis
/// that was snapshotted. Returns the first such record.
pub(crate) fn find_race(
    session: &dyn StoreSession,
    checkpoint: i64,
    snapshots: &Snapshots,
) -> Result<Option<ChangeLogRow>, StoreError> {
    let racing = session
        .change_log_after(checkpoint)?
        .into_iter()
        .find(|record| {
            record.workspace_id.is_some()
                || record.peptide_id.is_some()
                || record.ms_data_file_id.is_some()
                || record
                    .peptide_analysis_id
                    .is_some_and(|id| snapshots.contains_key(&id))
        });
    Ok(racing)
}
