use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::entity::{Entity, EntityData};
use crate::error::ModelError;
use crate::key::Parent;
use crate::registry::{ChangeEvent, EntityTracker};

/// Keyed container of nodes of one kind, owned by the workspace root or by a
/// composite node.
#[derive(Debug)]
pub struct EntityCollection<T: EntityData> {
    owner: Parent,
    children: BTreeMap<i64, Arc<Entity<T>>>,
}

#[derive(Debug)]
pub enum MergeOutcome<T: EntityData> {
    Created(Arc<Entity<T>>),
    Updated { node: Arc<Entity<T>>, changed: bool },
}

impl<T: EntityData> MergeOutcome<T> {
    pub fn node(&self) -> &Arc<Entity<T>> {
        match self {
            MergeOutcome::Created(node) => node,
            MergeOutcome::Updated { node, .. } => node,
        }
    }

    pub fn changed(&self) -> bool {
        match self {
            MergeOutcome::Created(_) => true,
            MergeOutcome::Updated { changed, .. } => *changed,
        }
    }
}

impl<T: EntityData> EntityCollection<T> {
    pub fn new(owner: Parent) -> Self {
        Self {
            owner,
            children: BTreeMap::new(),
        }
    }

    pub fn owner(&self) -> Parent {
        self.owner
    }

    pub fn get(&self, id: i64) -> Option<&Arc<Entity<T>>> {
        self.children.get(&id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.children.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.children.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &Arc<Entity<T>>)> + '_ {
        self.children.iter().map(|(id, node)| (*id, node))
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Adopts `node` and registers it. A different instance already stored
    /// under the same id is removed first so the two never coexist.
    pub fn add(
        &mut self,
        node: Arc<Entity<T>>,
        tracker: &mut EntityTracker,
    ) -> Result<(), ModelError> {
        let Some(key) = node.key() else {
            return Err(ModelError::TransientEntity { kind: T::KIND });
        };
        if let Some(existing) = self.children.get(&key.id) {
            if Arc::ptr_eq(existing, &node) {
                return Ok(());
            }
            tracing::warn!(entity = %key, "replacing a second instance of an already tracked entity");
            self.remove(key.id, tracker);
        }
        node.attach(self.owner);
        tracker.register(&node);
        self.children.insert(key.id, node);
        tracker.record(ChangeEvent::Added(key));
        Ok(())
    }

    /// Detaches and unregisters the node (and, for composites, its children).
    pub fn remove(&mut self, id: i64, tracker: &mut EntityTracker) -> Option<Arc<Entity<T>>> {
        let node = self.children.remove(&id)?;
        // A newer instance adopted elsewhere in the same merge keeps its
        // registration.
        if let Some(key) = node.key() {
            if tracker.unregister_instance(&node) {
                tracker.record(ChangeEvent::Removed(key));
            }
        }
        node.detach();
        node.update_with(tracker, |state, tracker| state.on_detached(tracker));
        Some(node)
    }

    /// Merges `incoming` into the node stored under `id`, or creates,
    /// registers and adopts a new node when there is none.
    pub fn merge(&mut self, id: i64, incoming: T, tracker: &mut EntityTracker) -> MergeOutcome<T> {
        if let Some(node) = self.children.get(&id) {
            let changed = node.merge(incoming, tracker);
            return MergeOutcome::Updated {
                node: Arc::clone(node),
                changed,
            };
        }
        let node = Entity::new(tracker.workspace(), id, incoming);
        node.attach(self.owner);
        tracker.register(&node);
        self.children.insert(id, Arc::clone(&node));
        if let Some(key) = node.key() {
            tracker.record(ChangeEvent::Added(key));
        }
        MergeOutcome::Created(node)
    }

    /// Bulk form of [`merge`](Self::merge); returns how many nodes were
    /// created or changed.
    pub fn merge_all(
        &mut self,
        rows: impl IntoIterator<Item = (i64, T)>,
        tracker: &mut EntityTracker,
    ) -> usize {
        rows.into_iter()
            .map(|(id, incoming)| self.merge(id, incoming, tracker))
            .filter(MergeOutcome::changed)
            .count()
    }

    /// Removes every child whose id is not in `keep`.
    pub fn retain_ids(
        &mut self,
        keep: &BTreeSet<i64>,
        tracker: &mut EntityTracker,
    ) -> Vec<Arc<Entity<T>>> {
        let stale: Vec<i64> = self
            .children
            .keys()
            .copied()
            .filter(|id| !keep.contains(id))
            .collect();
        stale
            .into_iter()
            .filter_map(|id| self.remove(id, tracker))
            .collect()
    }

    /// Detaches every child without touching the collection's owner; used
    /// when the owner itself leaves the graph.
    pub(crate) fn detach_all(&mut self, tracker: &mut EntityTracker) {
        let ids: Vec<i64> = self.children.keys().copied().collect();
        for id in ids {
            self.remove(id, tracker);
        }
    }
}
