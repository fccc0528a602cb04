//! Turnover Entity Graph
//!
//! The in-process object graph that mirrors a subset of the rows in the
//! shared relational store:
//!
//! ```text
//! Workspace (root)
//!   ├── settings / modifications / tracer definitions   (reloaded wholesale)
//!   ├── peptides            EntityCollection<Peptide>
//!   ├── ms_data_files       EntityCollection<MsDataFile>
//!   └── peptide_analyses    EntityCollection<PeptideAnalysis>
//!                              └── file_analyses  EntityCollection<PeptideFileAnalysis>
//! ```
//!
//! ## Ownership and identity
//!
//! - Collections own their nodes (`Arc<Entity<T>>`); a node only knows its
//!   parent by key, never by reference.
//! - Nodes are updated in place, so an `Arc` handed out to a reader stays the
//!   live instance until the node is removed (it is then *detached*).
//! - Identity is `(workspace, kind, id)`; transient nodes (no id) never enter
//!   a collection or the registry.
//!
//! ## Locking
//!
//! All mutation goes through [`WorkspaceWriteGuard`]; node-level locks are
//! only ever written while the workspace write lock is held, so readers that
//! hold [`WorkspaceReadGuard`] never block on a node.

pub mod collection;
pub mod entity;
pub mod error;
pub mod key;
pub mod nodes;
pub mod registry;
pub mod workspace;

pub use collection::{EntityCollection, MergeOutcome};
pub use entity::{set_if_changed, Entity, EntityData};
pub use error::ModelError;
pub use key::{EntityKey, EntityKind, Parent, WorkspaceId};
pub use nodes::{
    MsDataFile, Peptide, PeptideAnalysis, PeptideAnalysisSummary, PeptideFileAnalysis,
};
pub use registry::{AnyEntity, ChangeEvent, EntityTracker};
pub use workspace::{
    Modification, TracerDef, Workspace, WorkspaceData, WorkspaceInfo, WorkspaceReadGuard,
    WorkspaceSummary, WorkspaceWriteGuard,
};
