//! Identity types for graph nodes.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one in-process workspace; two workspaces mirroring the same
/// store still hold distinct nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkspaceId(Uuid);

impl WorkspaceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkspaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Peptide,
    MsDataFile,
    PeptideAnalysis,
    PeptideFileAnalysis,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Peptide => "peptide",
            EntityKind::MsDataFile => "ms_data_file",
            EntityKind::PeptideAnalysis => "peptide_analysis",
            EntityKind::PeptideFileAnalysis => "peptide_file_analysis",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a persisted node: `(workspace, kind, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub workspace: WorkspaceId,
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityKey {
    pub fn new(workspace: WorkspaceId, kind: EntityKind, id: i64) -> Self {
        Self {
            workspace,
            kind,
            id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Non-owning back-reference from a node to whatever holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parent {
    Workspace(WorkspaceId),
    Entity(EntityKey),
}
