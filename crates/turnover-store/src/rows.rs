//! Plain row structs, one per store table.
//!
//! Ids are assigned by the store on insert; the `id` a caller passes to an
//! insert is ignored.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceRow {
    pub id: i64,
    pub name: String,
    pub data_directory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingRow {
    pub id: i64,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModificationRow {
    pub id: i64,
    pub symbol: String,
    pub delta_mass: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TracerDefRow {
    pub id: i64,
    pub name: String,
    pub tracer_symbol: String,
    pub delta_mass: f64,
    pub atom_count: i64,
    pub initial_enrichment: f64,
    pub final_enrichment: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeptideRow {
    pub id: i64,
    pub sequence: String,
    pub protein_name: String,
    pub protein_description: String,
    pub max_tracer_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MsDataFileRow {
    pub id: i64,
    pub name: String,
    pub label: String,
    pub cohort: String,
    pub sample: String,
    pub time_point: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeptideAnalysisRow {
    pub id: i64,
    pub peptide_id: i64,
    pub note: String,
    pub min_charge: i64,
    pub max_charge: i64,
    pub excluded_masses: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeptideFileAnalysisRow {
    pub id: i64,
    pub peptide_analysis_id: i64,
    pub ms_data_file_id: i64,
    pub chromatogram_count: i64,
    pub peak_count: i64,
    pub note: String,
}

/// One append-only audit record. A record whose only reference is the
/// workspace asks readers to reload everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogRow {
    pub id: i64,
    pub workspace_id: Option<i64>,
    pub peptide_id: Option<i64>,
    pub ms_data_file_id: Option<i64>,
    pub peptide_analysis_id: Option<i64>,
}

impl ChangeLogRow {
    pub fn workspace(workspace_id: i64) -> Self {
        Self {
            workspace_id: Some(workspace_id),
            ..Self::default()
        }
    }

    pub fn peptide(peptide_id: i64) -> Self {
        Self {
            peptide_id: Some(peptide_id),
            ..Self::default()
        }
    }

    pub fn ms_data_file(ms_data_file_id: i64) -> Self {
        Self {
            ms_data_file_id: Some(ms_data_file_id),
            ..Self::default()
        }
    }

    pub fn peptide_analysis(peptide_analysis_id: i64) -> Self {
        Self {
            peptide_analysis_id: Some(peptide_analysis_id),
            ..Self::default()
        }
    }

    /// `true` for the "reload everything" marker.
    pub fn is_bare_workspace(&self) -> bool {
        self.workspace_id.is_some()
            && self.peptide_id.is_none()
            && self.ms_data_file_id.is_none()
            && self.peptide_analysis_id.is_none()
    }
}
