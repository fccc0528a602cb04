//! The lock-held half of a pass: applying a [`Delta`] to the graph.

use std::collections::{BTreeMap, BTreeSet};
use turnover_model::{
    Modification, MsDataFile, Peptide, PeptideAnalysis, PeptideFileAnalysis, TracerDef,
    WorkspaceData, WorkspaceInfo,
};
use turnover_store::{
    ModificationRow, MsDataFileRow, PeptideAnalysisSnapshot, PeptideFileAnalysisRow, PeptideRow,
    TracerDefRow,
};

use crate::pass::{Delta, WorkspaceReload};

#[derive(Debug, Default)]
pub(crate) struct MergeReport {
    pub peptides: usize,
    pub ms_data_files: usize,
    pub analyses_loaded: usize,
    pub analyses_removed: usize,
    pub tombstones: usize,
    pub changed: usize,
    /// File analyses with chromatograms but no result.
    pub pending_results: Vec<i64>,
    /// File analyses without chromatograms.
    pub pending_chromatograms: Vec<i64>,
}

fn peptide(row: PeptideRow) -> Peptide {
    Peptide {
        sequence: row.sequence,
        protein_name: row.protein_name,
        protein_description: row.protein_description,
        max_tracer_count: row.max_tracer_count,
    }
}

fn ms_data_file(row: MsDataFileRow) -> MsDataFile {
    MsDataFile {
        name: row.name,
        label: row.label,
        cohort: row.cohort,
        sample: row.sample,
        time_point: row.time_point,
    }
}

fn file_analysis(row: PeptideFileAnalysisRow) -> PeptideFileAnalysis {
    PeptideFileAnalysis {
        ms_data_file_id: row.ms_data_file_id,
        chromatogram_count: row.chromatogram_count,
        peak_count: row.peak_count,
        note: row.note,
    }
}

fn modification(row: ModificationRow) -> Modification {
    Modification {
        symbol: row.symbol,
        delta_mass: row.delta_mass,
    }
}

fn tracer_def(row: TracerDefRow) -> TracerDef {
    TracerDef {
        name: row.name,
        tracer_symbol: row.tracer_symbol,
        delta_mass: row.delta_mass,
        atom_count: row.atom_count,
        initial_enrichment: row.initial_enrichment,
        final_enrichment: row.final_enrichment,
    }
}

fn reload(data: &mut WorkspaceData, reload: WorkspaceReload) -> bool {
    let info = reload.workspace.map(|row| WorkspaceInfo {
        name: row.name,
        data_directory: row.data_directory,
    });
    let settings: BTreeMap<String, String> = reload
        .settings
        .into_iter()
        .map(|row| (row.name, row.value))
        .collect();
    data.load(
        info,
        settings,
        reload.modifications.into_iter().map(modification).collect(),
        reload.tracer_defs.into_iter().map(tracer_def).collect(),
    )
}

pub(crate) fn apply(data: &mut WorkspaceData, delta: Delta) -> MergeReport {
    let mut report = MergeReport::default();
    if let Some(full) = delta.reload {
        if reload(data, full) {
            report.changed += 1;
        }
    }

    let workspace = data.id();
    let WorkspaceData {
        peptides,
        ms_data_files,
        peptide_analyses,
        tracker,
        ..
    } = data;

    report.peptides = delta.peptides.len();
    report.changed += peptides.merge_all(
        delta.peptides.into_iter().map(|row| (row.id, peptide(row))),
        tracker,
    );
    report.ms_data_files = delta.ms_data_files.len();
    report.changed += ms_data_files.merge_all(
        delta
            .ms_data_files
            .into_iter()
            .map(|row| (row.id, ms_data_file(row))),
        tracker,
    );

    for (id, snapshot) in delta.snapshots {
        let Some(PeptideAnalysisSnapshot {
            analysis,
            file_analyses,
        }) = snapshot
        else {
            report.tombstones += 1;
            if peptide_analyses.remove(id, tracker).is_some() {
                report.analyses_removed += 1;
                report.changed += 1;
            }
            continue;
        };

        let incoming = PeptideAnalysis::new(
            workspace,
            id,
            analysis.peptide_id,
            analysis.note,
            analysis.min_charge,
            analysis.max_charge,
            analysis.excluded_masses,
        );
        let outcome = peptide_analyses.merge(id, incoming, tracker);

        let keep: BTreeSet<i64> = file_analyses.iter().map(|row| row.id).collect();
        let children: Vec<(i64, PeptideFileAnalysis)> = file_analyses
            .into_iter()
            .map(|row| (row.id, file_analysis(row)))
            .collect();
        for (child_id, child) in &children {
            if child.awaiting_results() {
                report.pending_results.push(*child_id);
            } else if child.needs_chromatograms() {
                report.pending_chromatograms.push(*child_id);
            }
        }
        let children_changed = outcome.node().update_with(tracker, |analysis, tracker| {
            let removed = analysis.file_analyses.retain_ids(&keep, tracker).len();
            removed + analysis.file_analyses.merge_all(children, tracker)
        });

        report.analyses_loaded += 1;
        report.changed += usize::from(outcome.changed()) + children_changed;
    }
    report
}
