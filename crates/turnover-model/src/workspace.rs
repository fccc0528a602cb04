//! The workspace root: top-level collections, wholesale-reloaded settings,
//! scoped locking and change notification.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use crate::collection::EntityCollection;
use crate::entity::{set_if_changed, Entity, EntityData};
use crate::error::ModelError;
use crate::key::{EntityKey, Parent, WorkspaceId};
use crate::nodes::{MsDataFile, Peptide, PeptideAnalysis, PeptideAnalysisSummary};
use crate::registry::{AnyEntity, ChangeEvent, EntityTracker};

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives the events of one write scope, after the lock has been released.
pub type ChangeListener = Box<dyn Fn(&[ChangeEvent]) + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    pub name: String,
    pub data_directory: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub symbol: String,
    pub delta_mass: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerDef {
    pub name: String,
    pub tracer_symbol: String,
    pub delta_mass: f64,
    pub atom_count: i64,
    pub initial_enrichment: f64,
    pub final_enrichment: f64,
}

/// Everything the workspace lock protects.
#[derive(Debug)]
pub struct WorkspaceData {
    pub info: Option<WorkspaceInfo>,
    pub settings: BTreeMap<String, String>,
    pub modifications: Vec<Modification>,
    pub tracer_defs: Vec<TracerDef>,
    pub peptides: EntityCollection<Peptide>,
    pub ms_data_files: EntityCollection<MsDataFile>,
    pub peptide_analyses: EntityCollection<PeptideAnalysis>,
    pub tracker: EntityTracker,
    loaded: bool,
}

impl WorkspaceData {
    fn new(id: WorkspaceId) -> Self {
        let root = Parent::Workspace(id);
        Self {
            info: None,
            settings: BTreeMap::new(),
            modifications: Vec::new(),
            tracer_defs: Vec::new(),
            peptides: EntityCollection::new(root),
            ms_data_files: EntityCollection::new(root),
            peptide_analyses: EntityCollection::new(root),
            tracker: EntityTracker::new(id),
            loaded: false,
        }
    }

    pub fn id(&self) -> WorkspaceId {
        self.tracker.workspace()
    }

    /// `true` once a full reload has been applied.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Replaces the wholesale-reloaded part of the workspace. Returns whether
    /// anything differed from what was there before.
    pub fn load(
        &mut self,
        info: Option<WorkspaceInfo>,
        settings: BTreeMap<String, String>,
        modifications: Vec<Modification>,
        tracer_defs: Vec<TracerDef>,
    ) -> bool {
        let mut changed = false;
        changed |= set_if_changed(&mut self.info, info);
        changed |= set_if_changed(&mut self.settings, settings);
        changed |= set_if_changed(&mut self.modifications, modifications);
        changed |= set_if_changed(&mut self.tracer_defs, tracer_defs);
        self.loaded = true;
        if changed {
            self.tracker.record(ChangeEvent::WorkspaceReloaded);
        }
        changed
    }

    pub fn notify_changed<T: EntityData>(&mut self, node: &Entity<T>) {
        self.tracker.notify_changed(node.key(), node.parent());
    }

    pub fn register_entity<T: EntityData>(&mut self, node: &Arc<Entity<T>>) -> bool {
        self.tracker.register(node)
    }

    pub fn unregister_entity(&mut self, key: &EntityKey) -> Option<AnyEntity> {
        self.tracker.unregister(key)
    }

    /// Looks a node up by id through the registry, nested nodes included.
    pub fn resolve<T: EntityData>(&self, id: i64) -> Option<Arc<Entity<T>>> {
        self.tracker.resolve(id)
    }

    pub fn is_dirty(&self) -> bool {
        self.tracker.is_dirty()
    }

    pub fn mark_clean(&mut self) {
        self.tracker.mark_clean();
    }

    pub fn summary(&self) -> WorkspaceSummary {
        WorkspaceSummary {
            info: self.info.clone(),
            settings: self.settings.clone(),
            modifications: self.modifications.clone(),
            tracer_defs: self.tracer_defs.clone(),
            peptides: self
                .peptides
                .iter()
                .map(|(id, node)| (id, node.read().clone()))
                .collect(),
            ms_data_files: self
                .ms_data_files
                .iter()
                .map(|(id, node)| (id, node.read().clone()))
                .collect(),
            peptide_analyses: self
                .peptide_analyses
                .iter()
                .map(|(id, node)| (id, node.read().summary()))
                .collect(),
        }
    }
}

/// Comparable, serializable copy of the whole graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSummary {
    pub info: Option<WorkspaceInfo>,
    pub settings: BTreeMap<String, String>,
    pub modifications: Vec<Modification>,
    pub tracer_defs: Vec<TracerDef>,
    pub peptides: BTreeMap<i64, Peptide>,
    pub ms_data_files: BTreeMap<i64, MsDataFile>,
    pub peptide_analyses: BTreeMap<i64, PeptideAnalysisSummary>,
}

pub type WorkspaceReadGuard<'a> = RwLockReadGuard<'a, WorkspaceData>;

pub struct Workspace {
    id: WorkspaceId,
    data: RwLock<WorkspaceData>,
    listeners: RwLock<Vec<ChangeListener>>,
    write_timeout: Duration,
}

impl Workspace {
    pub fn new() -> Self {
        Self::with_write_timeout(DEFAULT_WRITE_TIMEOUT)
    }

    pub fn with_write_timeout(write_timeout: Duration) -> Self {
        let id = WorkspaceId::new();
        Self {
            id,
            data: RwLock::new(WorkspaceData::new(id)),
            listeners: RwLock::new(Vec::new()),
            write_timeout,
        }
    }

    pub fn id(&self) -> WorkspaceId {
        self.id
    }

    /// Shared access. Reentrant: a thread already holding a read guard can
    /// take another one even while a writer is queued.
    pub fn acquire_read(&self) -> WorkspaceReadGuard<'_> {
        self.data.read_recursive()
    }

    /// Exclusive access, bounded by the workspace's write timeout.
    pub fn acquire_write(&self) -> Result<WorkspaceWriteGuard<'_>, ModelError> {
        self.acquire_write_for(self.write_timeout)
    }

    /// Exclusive access with an explicit bound on the wait.
    pub fn acquire_write_for(
        &self,
        timeout: Duration,
    ) -> Result<WorkspaceWriteGuard<'_>, ModelError> {
        let guard = self
            .data
            .try_write_for(timeout)
            .ok_or(ModelError::LockTimeout { waited: timeout })?;
        Ok(WorkspaceWriteGuard {
            workspace: self,
            guard: Some(guard),
        })
    }

    pub fn on_change(&self, listener: impl Fn(&[ChangeEvent]) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    pub fn is_dirty(&self) -> bool {
        self.acquire_read().is_dirty()
    }

    pub fn mark_clean(&self) -> Result<(), ModelError> {
        self.acquire_write()?.mark_clean();
        Ok(())
    }

    pub fn summary(&self) -> WorkspaceSummary {
        self.acquire_read().summary()
    }

    fn dispatch(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }
        for listener in self.listeners.read().iter() {
            listener(events);
        }
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to [`WorkspaceData`]. Change events recorded while the
/// guard was held are delivered to listeners after the lock is released.
pub struct WorkspaceWriteGuard<'a> {
    workspace: &'a Workspace,
    guard: Option<RwLockWriteGuard<'a, WorkspaceData>>,
}

impl Deref for WorkspaceWriteGuard<'_> {
    type Target = WorkspaceData;

    fn deref(&self) -> &WorkspaceData {
        self.guard.as_ref().expect("write guard is held until drop")
    }
}

impl DerefMut for WorkspaceWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut WorkspaceData {
        self.guard.as_mut().expect("write guard is held until drop")
    }
}

impl Drop for WorkspaceWriteGuard<'_> {
    fn drop(&mut self) {
        let events = match self.guard.take() {
            Some(mut guard) => guard.tracker.take_events(),
            None => return,
        };
        self.workspace.dispatch(&events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::PeptideFileAnalysis;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn peptide(protein: &str) -> Peptide {
        Peptide {
            sequence: "VLSAADK".to_string(),
            protein_name: protein.to_string(),
            protein_description: String::new(),
            max_tracer_count: 1,
        }
    }

    #[test]
    fn listeners_run_after_the_write_lock_is_released() {
        let workspace = Arc::new(Workspace::new());
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let workspace_in_listener = Arc::clone(&workspace);
            let seen = Arc::clone(&seen);
            workspace.on_change(move |events| {
                // Would time out if the writer still held the lock.
                let data = workspace_in_listener.acquire_write().unwrap();
                assert_eq!(data.peptides.len(), 1);
                seen.fetch_add(events.len(), Ordering::SeqCst);
            });
        }

        {
            let mut data = workspace.acquire_write().unwrap();
            let WorkspaceData {
                peptides, tracker, ..
            } = &mut *data;
            peptides.merge(1, peptide("ALB"), tracker);
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn read_lock_is_reentrant_with_a_writer_queued() {
        let workspace = Arc::new(Workspace::with_write_timeout(Duration::from_millis(200)));
        let outer = workspace.acquire_read();

        let writer = {
            let workspace = Arc::clone(&workspace);
            thread::spawn(move || workspace.acquire_write().map(|_| ()))
        };
        thread::sleep(Duration::from_millis(50));

        let inner = workspace.acquire_read();
        assert!(!inner.is_loaded());
        drop(inner);
        thread::sleep(Duration::from_millis(250));
        drop(outer);

        let err = writer.join().unwrap().unwrap_err();
        assert!(matches!(err, ModelError::LockTimeout { .. }));
    }

    #[test]
    fn load_marks_dirty_only_when_something_differs() {
        let workspace = Workspace::new();
        let settings: BTreeMap<String, String> =
            [("ChromatogramTimeWindow".to_string(), "2.5".to_string())].into();
        let info = Some(WorkspaceInfo {
            name: "liver".to_string(),
            data_directory: "/data/liver".to_string(),
        });

        {
            let mut data = workspace.acquire_write().unwrap();
            assert!(data.load(info.clone(), settings.clone(), vec![], vec![]));
            assert!(data.is_loaded());
        }
        assert!(workspace.is_dirty());
        workspace.mark_clean().unwrap();

        {
            let mut data = workspace.acquire_write().unwrap();
            assert!(!data.load(info, settings, vec![], vec![]));
        }
        assert!(!workspace.is_dirty());
    }

    #[test]
    fn nested_nodes_resolve_through_the_registry() {
        let workspace = Workspace::new();
        let ws = workspace.id();
        let mut data = workspace.acquire_write().unwrap();
        let WorkspaceData {
            peptide_analyses,
            tracker,
            ..
        } = &mut *data;

        let analysis = PeptideAnalysis::new(ws, 9, 1, String::new(), 1, 3, String::new());
        let outcome = peptide_analyses.merge(9, analysis, tracker);
        outcome.node().update_with(tracker, |analysis, tracker| {
            analysis.file_analyses.merge(
                40,
                PeptideFileAnalysis {
                    ms_data_file_id: 2,
                    chromatogram_count: 0,
                    peak_count: 0,
                    note: String::new(),
                },
                tracker,
            );
        });

        let child = data.resolve::<PeptideFileAnalysis>(40).unwrap();
        assert_eq!(child.read().ms_data_file_id, 2);
        assert!(data.resolve::<PeptideFileAnalysis>(41).is_none());

        // Removing the analysis takes its children out of the registry too.
        let WorkspaceData {
            peptide_analyses,
            tracker,
            ..
        } = &mut *data;
        peptide_analyses.remove(9, tracker);
        assert!(data.resolve::<PeptideFileAnalysis>(40).is_none());
        assert!(!child.is_attached());
    }
}
