use std::path::PathBuf;

/// Errors the engine itself can produce.
///
/// Builder failures are not represented here: a builder reports failure by
/// returning `false` (or panicking, which the engine catches and logs), not
/// by propagating a `SandwormError`.
#[derive(Debug, thiserror::Error)]
pub enum SandwormError {
    #[error("no such target: {0}")]
    NoSuchTarget(String),

    #[error("main target not set")]
    NoMainTarget,

    #[error("invalid KEY=VAL argument: {0}")]
    InvalidAssignment(String),

    #[error("invalid worker count: {0}")]
    InvalidWorkerCount(String),

    #[error("Wormfile already exists at {0}")]
    WormfileExists(PathBuf),

    #[error("no Wormfile found at {0}")]
    WormfileMissing(PathBuf),

    #[error("failed to load Wormfile plugin: {0}")]
    PluginError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key not found: {0}")]
    KeyNotFound(String),
}

pub type Result<T> = std::result::Result<T, SandwormError>;
