use std::path::PathBuf;
use turnover_model::ModelError;
use turnover_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("failed to spawn reconciler worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ReconcileError {
    /// Lock timeouts are surfaced to callers; everything else a pass can
    /// raise is retried.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, ReconcileError::Model(ModelError::LockTimeout { .. }))
    }
}
