use std::time::Duration;

use crate::key::EntityKind;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A transient node (no id yet) was offered to an id-keyed container.
    #[error("transient {kind} cannot be added to a collection")]
    TransientEntity { kind: EntityKind },

    /// The workspace write lock was not granted within the bounded wait.
    ///
    /// This is a caller error: the lock discipline was violated somewhere
    /// (typically a read guard held across a call that needs the write lock).
    #[error("workspace write lock not acquired within {waited:?}")]
    LockTimeout { waited: Duration },
}
