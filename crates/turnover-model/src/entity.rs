//! Graph nodes.
//!
//! An [`Entity`] is the in-memory mirror of one store row. The persisted
//! fields live behind a node-local lock so that a node can be updated in place
//! (external `Arc` handles keep observing the live instance) while the
//! workspace lock decides *who* may write.

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::fmt;
use std::sync::Arc;

use crate::key::{EntityKey, EntityKind, Parent, WorkspaceId};
use crate::registry::{AnyEntity, EntityTracker};

/// Payload carried by a node of one entity kind.
pub trait EntityData: fmt::Debug + Send + Sync + Sized + 'static {
    const KIND: EntityKind;

    /// Copies the persisted fields of `incoming` into `self` and reports
    /// whether any of them differed. Nested collections are not touched.
    fn merge_from(&mut self, incoming: Self) -> bool;

    fn into_any(node: Arc<Entity<Self>>) -> AnyEntity;

    fn from_any(any: &AnyEntity) -> Option<Arc<Entity<Self>>>;

    /// Runs after the node left its collection. Composite nodes detach and
    /// unregister their children here.
    fn on_detached(&mut self, _tracker: &mut EntityTracker) {}
}

pub struct Entity<T> {
    workspace: WorkspaceId,
    id: Option<i64>,
    parent: Mutex<Option<Parent>>,
    state: RwLock<T>,
}

impl<T: EntityData> Entity<T> {
    /// A persisted node. It has no parent until a collection adopts it.
    pub fn new(workspace: WorkspaceId, id: i64, state: T) -> Arc<Self> {
        Arc::new(Self {
            workspace,
            id: Some(id),
            parent: Mutex::new(None),
            state: RwLock::new(state),
        })
    }

    /// A node that has not been saved yet; reconciliation ignores it.
    pub fn transient(workspace: WorkspaceId, state: T) -> Arc<Self> {
        Arc::new(Self {
            workspace,
            id: None,
            parent: Mutex::new(None),
            state: RwLock::new(state),
        })
    }

    pub fn workspace(&self) -> WorkspaceId {
        self.workspace
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        T::KIND
    }

    pub fn key(&self) -> Option<EntityKey> {
        self.id
            .map(|id| EntityKey::new(self.workspace, T::KIND, id))
    }

    pub fn is_transient(&self) -> bool {
        self.id.is_none()
    }

    pub fn parent(&self) -> Option<Parent> {
        *self.parent.lock()
    }

    /// `false` once the node has been removed from the graph.
    pub fn is_attached(&self) -> bool {
        self.parent.lock().is_some()
    }

    pub(crate) fn attach(&self, parent: Parent) {
        *self.parent.lock() = Some(parent);
    }

    pub(crate) fn detach(&self) {
        *self.parent.lock() = None;
    }

    /// Shared view of the node's fields.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.state.read_recursive()
    }

    /// Applies `f` to the fields; when it reports a change the node notifies
    /// the workspace (detached nodes are ignored by the tracker).
    ///
    /// The `tracker` can only be reached through a workspace write guard, so
    /// every call site already holds the exclusive lock.
    pub fn update(&self, tracker: &mut EntityTracker, f: impl FnOnce(&mut T) -> bool) -> bool {
        let changed = f(&mut self.state.write());
        if changed {
            tracker.notify_changed(self.key(), self.parent());
        }
        changed
    }

    /// Mutable access to the fields together with the tracker, for composite
    /// nodes whose children have to be registered or removed.
    pub fn update_with<R>(
        &self,
        tracker: &mut EntityTracker,
        f: impl FnOnce(&mut T, &mut EntityTracker) -> R,
    ) -> R {
        let mut state = self.state.write();
        f(&mut state, tracker)
    }

    pub fn merge(&self, incoming: T, tracker: &mut EntityTracker) -> bool {
        self.update(tracker, |state| state.merge_from(incoming))
    }
}

impl<T: EntityData> PartialEq for Entity<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self.key(), other.key()) {
            (Some(a), Some(b)) => a == b,
            _ => std::ptr::eq(self, other),
        }
    }
}

impl<T: EntityData> Eq for Entity<T> {}

impl<T: EntityData> fmt::Debug for Entity<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("kind", &T::KIND)
            .field("id", &self.id)
            .field("parent", &self.parent())
            .field("state", &*self.read())
            .finish()
    }
}

/// Assigns `value` to `slot` if they differ; returns whether it did.
pub fn set_if_changed<V: PartialEq>(slot: &mut V, value: V) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}
