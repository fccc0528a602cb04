//! Side registry and change bookkeeping.
//!
//! The registry maps `(kind, id)` to the live node so that repeated
//! observations of one row, including nested rows, resolve to a single
//! instance. The same structure records which nodes changed while the write
//! lock was held; the events are dispatched once the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::{Entity, EntityData};
use crate::key::{EntityKey, EntityKind, Parent, WorkspaceId};
use crate::nodes::{MsDataFile, Peptide, PeptideAnalysis, PeptideFileAnalysis};

#[derive(Debug, Clone)]
pub enum AnyEntity {
    Peptide(Arc<Entity<Peptide>>),
    MsDataFile(Arc<Entity<MsDataFile>>),
    PeptideAnalysis(Arc<Entity<PeptideAnalysis>>),
    PeptideFileAnalysis(Arc<Entity<PeptideFileAnalysis>>),
}

impl AnyEntity {
    pub fn kind(&self) -> EntityKind {
        match self {
            AnyEntity::Peptide(_) => EntityKind::Peptide,
            AnyEntity::MsDataFile(_) => EntityKind::MsDataFile,
            AnyEntity::PeptideAnalysis(_) => EntityKind::PeptideAnalysis,
            AnyEntity::PeptideFileAnalysis(_) => EntityKind::PeptideFileAnalysis,
        }
    }

    pub fn key(&self) -> Option<EntityKey> {
        match self {
            AnyEntity::Peptide(node) => node.key(),
            AnyEntity::MsDataFile(node) => node.key(),
            AnyEntity::PeptideAnalysis(node) => node.key(),
            AnyEntity::PeptideFileAnalysis(node) => node.key(),
        }
    }
}

/// What happened to the graph during one write-lock scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Added(EntityKey),
    Updated(EntityKey),
    Removed(EntityKey),
    /// Workspace row, settings, modifications or tracer definitions changed.
    WorkspaceReloaded,
}

#[derive(Debug)]
pub struct EntityTracker {
    workspace: WorkspaceId,
    registry: HashMap<EntityKey, AnyEntity>,
    dirty: bool,
    pending: Vec<ChangeEvent>,
}

impl EntityTracker {
    pub(crate) fn new(workspace: WorkspaceId) -> Self {
        Self {
            workspace,
            registry: HashMap::new(),
            dirty: false,
            pending: Vec::new(),
        }
    }

    pub fn workspace(&self) -> WorkspaceId {
        self.workspace
    }

    /// Returns `false` for transient nodes, which are never registered.
    pub fn register<T: EntityData>(&mut self, node: &Arc<Entity<T>>) -> bool {
        let Some(key) = node.key() else {
            return false;
        };
        self.registry.insert(key, T::into_any(Arc::clone(node)));
        true
    }

    pub fn unregister(&mut self, key: &EntityKey) -> Option<AnyEntity> {
        self.registry.remove(key)
    }

    /// Unregisters `node` only if it is the instance registered under its
    /// key; returns whether it was.
    pub fn unregister_instance<T: EntityData>(&mut self, node: &Arc<Entity<T>>) -> bool {
        let Some(key) = node.key() else {
            return false;
        };
        let registered = self
            .registry
            .get(&key)
            .and_then(T::from_any)
            .is_some_and(|current| Arc::ptr_eq(&current, node));
        if registered {
            self.registry.remove(&key);
        }
        registered
    }

    pub fn lookup(&self, key: &EntityKey) -> Option<&AnyEntity> {
        self.registry.get(key)
    }

    pub fn resolve<T: EntityData>(&self, id: i64) -> Option<Arc<Entity<T>>> {
        let key = EntityKey::new(self.workspace, T::KIND, id);
        self.registry.get(&key).and_then(T::from_any)
    }

    pub fn is_registered(&self, key: &EntityKey) -> bool {
        self.registry.contains_key(key)
    }

    pub fn registered_len(&self) -> usize {
        self.registry.len()
    }

    /// Field-level change reported by a node. Nodes without a parent have
    /// been detached; their notifications are stale and dropped.
    pub fn notify_changed(&mut self, key: Option<EntityKey>, parent: Option<Parent>) {
        let (Some(key), Some(_)) = (key, parent) else {
            return;
        };
        self.record(ChangeEvent::Updated(key));
    }

    pub(crate) fn record(&mut self, event: ChangeEvent) {
        self.dirty = true;
        self.pending.push(event);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn take_events(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.pending)
    }
}
