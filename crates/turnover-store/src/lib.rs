//! Turnover Store Layer
//!
//! The narrow query contract the reconciler is written against, plus two
//! backends:
//!
//! ```text
//!                 ┌────────────────────┐
//!  Reconciler ───►│ Store::open_session│──► StoreSession (one per pass)
//!                 └────────────────────┘      ├── rows with id > cursor
//!                          ▲                  ├── rows with id in set
//!         ┌────────────────┴──────┐           ├── change log > checkpoint
//!         │                       │           └── analysis snapshots
//!   MemoryStore             SqliteStore
//!   (tests, demos)          (rusqlite, WAL)
//! ```
//!
//! Writers (the "other sessions" whose changes the reconciler picks up) go
//! through [`StoreWriter`]. Nothing here merges; the store only reads and
//! writes rows.

pub mod config;
pub mod error;
pub mod memory;
pub mod rows;
pub mod session;
pub mod snapshot;
pub mod sqlite;

pub use config::StoreConfig;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use rows::{
    ChangeLogRow, ModificationRow, MsDataFileRow, PeptideAnalysisRow, PeptideFileAnalysisRow,
    PeptideRow, SettingRow, TracerDefRow, WorkspaceRow,
};
pub use session::{Store, StoreSession, StoreWriter};
pub use snapshot::{load_snapshots, PeptideAnalysisSnapshot, Snapshots};
pub use sqlite::SqliteStore;

#[cfg(test)]
mod tests;
