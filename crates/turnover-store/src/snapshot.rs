//! Deep reads of composite entities.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::StoreError;
use crate::rows::{PeptideAnalysisRow, PeptideFileAnalysisRow};
use crate::session::StoreSession;

/// One peptide analysis and all of its file analyses, read together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeptideAnalysisSnapshot {
    pub analysis: PeptideAnalysisRow,
    /// Ascending by id.
    pub file_analyses: Vec<PeptideFileAnalysisRow>,
}

/// Requested id to snapshot; `None` is a tombstone (no such row).
pub type Snapshots = BTreeMap<i64, Option<PeptideAnalysisSnapshot>>;

/// Loads a snapshot for every id in `ids`. Every requested id has an entry
/// in the result.
pub fn load_snapshots<S>(session: &S, ids: &BTreeSet<i64>) -> Result<Snapshots, StoreError>
where
    S: StoreSession + ?Sized,
{
    if ids.is_empty() {
        return Ok(Snapshots::new());
    }
    let analyses = session.peptide_analyses_in(ids)?;
    let found: BTreeSet<i64> = analyses.iter().map(|row| row.id).collect();
    let mut children: BTreeMap<i64, Vec<PeptideFileAnalysisRow>> = BTreeMap::new();
    if !found.is_empty() {
        for row in session.file_analyses_for(&found)? {
            children.entry(row.peptide_analysis_id).or_default().push(row);
        }
    }

    let mut snapshots: Snapshots = ids.iter().map(|id| (*id, None)).collect();
    for analysis in analyses {
        let mut file_analyses = children.remove(&analysis.id).unwrap_or_default();
        file_analyses.sort_by_key(|row| row.id);
        snapshots.insert(
            analysis.id,
            Some(PeptideAnalysisSnapshot {
                analysis,
                file_analyses,
            }),
        );
    }
    Ok(snapshots)
}
