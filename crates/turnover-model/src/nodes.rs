//! Node payloads for each mirrored entity kind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::collection::EntityCollection;
use crate::entity::{set_if_changed, Entity, EntityData};
use crate::key::{EntityKey, EntityKind, Parent, WorkspaceId};
use crate::registry::{AnyEntity, EntityTracker};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peptide {
    /// Fixed once the row has an id; merges never rewrite it.
    pub sequence: String,
    pub protein_name: String,
    pub protein_description: String,
    pub max_tracer_count: i64,
}

impl EntityData for Peptide {
    const KIND: EntityKind = EntityKind::Peptide;

    fn merge_from(&mut self, incoming: Self) -> bool {
        let mut changed = false;
        changed |= set_if_changed(&mut self.protein_name, incoming.protein_name);
        changed |= set_if_changed(&mut self.protein_description, incoming.protein_description);
        changed |= set_if_changed(&mut self.max_tracer_count, incoming.max_tracer_count);
        changed
    }

    fn into_any(node: Arc<Entity<Self>>) -> AnyEntity {
        AnyEntity::Peptide(node)
    }

    fn from_any(any: &AnyEntity) -> Option<Arc<Entity<Self>>> {
        match any {
            AnyEntity::Peptide(node) => Some(Arc::clone(node)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsDataFile {
    pub name: String,
    pub label: String,
    pub cohort: String,
    pub sample: String,
    pub time_point: Option<f64>,
}

impl EntityData for MsDataFile {
    const KIND: EntityKind = EntityKind::MsDataFile;

    fn merge_from(&mut self, incoming: Self) -> bool {
        let mut changed = false;
        changed |= set_if_changed(&mut self.name, incoming.name);
        changed |= set_if_changed(&mut self.label, incoming.label);
        changed |= set_if_changed(&mut self.cohort, incoming.cohort);
        changed |= set_if_changed(&mut self.sample, incoming.sample);
        changed |= set_if_changed(&mut self.time_point, incoming.time_point);
        changed
    }

    fn into_any(node: Arc<Entity<Self>>) -> AnyEntity {
        AnyEntity::MsDataFile(node)
    }

    fn from_any(any: &AnyEntity) -> Option<Arc<Entity<Self>>> {
        match any {
            AnyEntity::MsDataFile(node) => Some(Arc::clone(node)),
            _ => None,
        }
    }
}

/// One data file's share of a peptide analysis. The counts drive the
/// downstream chromatogram generator and result calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeptideFileAnalysis {
    pub ms_data_file_id: i64,
    pub chromatogram_count: i64,
    pub peak_count: i64,
    pub note: String,
}

impl PeptideFileAnalysis {
    pub fn needs_chromatograms(&self) -> bool {
        self.chromatogram_count == 0
    }

    /// Chromatograms exist but no result has been computed from them.
    pub fn awaiting_results(&self) -> bool {
        self.chromatogram_count != 0 && self.peak_count == 0
    }
}

impl EntityData for PeptideFileAnalysis {
    const KIND: EntityKind = EntityKind::PeptideFileAnalysis;

    fn merge_from(&mut self, incoming: Self) -> bool {
        let mut changed = false;
        changed |= set_if_changed(&mut self.ms_data_file_id, incoming.ms_data_file_id);
        changed |= set_if_changed(&mut self.chromatogram_count, incoming.chromatogram_count);
        changed |= set_if_changed(&mut self.peak_count, incoming.peak_count);
        changed |= set_if_changed(&mut self.note, incoming.note);
        changed
    }

    fn into_any(node: Arc<Entity<Self>>) -> AnyEntity {
        AnyEntity::PeptideFileAnalysis(node)
    }

    fn from_any(any: &AnyEntity) -> Option<Arc<Entity<Self>>> {
        match any {
            AnyEntity::PeptideFileAnalysis(node) => Some(Arc::clone(node)),
            _ => None,
        }
    }
}

/// Composite node: the analysis of one peptide across data files.
#[derive(Debug)]
pub struct PeptideAnalysis {
    pub peptide_id: i64,
    pub note: String,
    pub min_charge: i64,
    pub max_charge: i64,
    pub excluded_masses: String,
    pub file_analyses: EntityCollection<PeptideFileAnalysis>,
}

impl PeptideAnalysis {
    /// An analysis payload whose (empty) child collection is owned by the
    /// analysis `id` of `workspace`.
    pub fn new(
        workspace: WorkspaceId,
        id: i64,
        peptide_id: i64,
        note: String,
        min_charge: i64,
        max_charge: i64,
        excluded_masses: String,
    ) -> Self {
        let owner = EntityKey::new(workspace, EntityKind::PeptideAnalysis, id);
        Self {
            peptide_id,
            note,
            min_charge,
            max_charge,
            excluded_masses,
            file_analyses: EntityCollection::new(Parent::Entity(owner)),
        }
    }

    pub fn summary(&self) -> PeptideAnalysisSummary {
        PeptideAnalysisSummary {
            peptide_id: self.peptide_id,
            note: self.note.clone(),
            min_charge: self.min_charge,
            max_charge: self.max_charge,
            excluded_masses: self.excluded_masses.clone(),
            file_analyses: self
                .file_analyses
                .iter()
                .map(|(id, node)| (id, node.read().clone()))
                .collect(),
        }
    }
}

impl EntityData for PeptideAnalysis {
    const KIND: EntityKind = EntityKind::PeptideAnalysis;

    fn merge_from(&mut self, incoming: Self) -> bool {
        let mut changed = false;
        changed |= set_if_changed(&mut self.peptide_id, incoming.peptide_id);
        changed |= set_if_changed(&mut self.note, incoming.note);
        changed |= set_if_changed(&mut self.min_charge, incoming.min_charge);
        changed |= set_if_changed(&mut self.max_charge, incoming.max_charge);
        changed |= set_if_changed(&mut self.excluded_masses, incoming.excluded_masses);
        changed
    }

    fn into_any(node: Arc<Entity<Self>>) -> AnyEntity {
        AnyEntity::PeptideAnalysis(node)
    }

    fn from_any(any: &AnyEntity) -> Option<Arc<Entity<Self>>> {
        match any {
            AnyEntity::PeptideAnalysis(node) => Some(Arc::clone(node)),
            _ => None,
        }
    }

    fn on_detached(&mut self, tracker: &mut EntityTracker) {
        self.file_analyses.detach_all(tracker);
    }
}

/// Plain, comparable copy of a [`PeptideAnalysis`] and its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeptideAnalysisSummary {
    pub peptide_id: i64,
    pub note: String,
    pub min_charge: i64,
    pub max_charge: i64,
    pub excluded_masses: String,
    pub file_analyses: BTreeMap<i64, PeptideFileAnalysis>,
}
