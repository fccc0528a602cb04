//! Turnover Reconciler
//!
//! Keeps a [`Workspace`](turnover_model::Workspace) eventually consistent
//! with a [`Store`](turnover_store::Store) by fetching only what changed:
//!
//! ```text
//!   wake / poll ──► scan ids > cursors ──► change log > checkpoint
//!                                               │
//!        ┌──────────── snapshots of affected analyses ◄──┘
//!        ▼
//!   race check ── raced ──► Incomplete (retry, nothing advanced)
//!        │ clean
//!        ▼
//!   write lock: merge, tombstones, advance cursors ──► collaborators
//! ```
//!
//! At most one pass runs at a time per workspace: the background worker and
//! the blocking loads ([`Reconciler::load_one`], [`Reconciler::load_many`])
//! serialize on the same internal mutex.

pub mod collaborators;
pub mod config;
pub mod cursor;
pub mod error;
mod merge;
mod pass;
pub mod reconciler;

pub use collaborators::{Collaborators, NoopQueue, PendingWorkQueue};
pub use config::{ReconcilerConfig, TurnoverConfig};
pub use cursor::Cursors;
pub use error::ReconcileError;
pub use pass::{PassOutcome, PassSummary};
pub use reconciler::{AnalysisNode, Reconciler, ReconcilerStatus};
