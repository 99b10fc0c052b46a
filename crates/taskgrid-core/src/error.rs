use thiserror::Error;

/// Top-level error type for the taskgrid-core library.
///
/// Variants are named by effect (see spec §7's error taxonomy), not by the
/// Rust type that produced them, so callers can match on "what happened"
/// independent of which component raised it.
#[derive(Debug, Error)]
pub enum TaskGridError {
    /// Configuration parse or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Version file missing, hash mismatch, or disk quota exceeded while
    /// materializing a sandbox.
    #[error("materialization error: {0}")]
    Materialization(String),

    /// Runtime not installed, bad command, or the child process could not
    /// be spawned at all.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A per-node, per-workflow, or per-UI-interaction deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Explicit stop or workflow cancel terminated the operation.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Child process exited with a non-zero status.
    #[error("non-zero exit ({code}): {detail}")]
    NonZeroExit { code: i32, detail: String },

    /// Workflow structure or input-mapping validation failed.
    #[error("validation error: {0}")]
    Validation(String),

    /// A required input was missing when a node became eligible for dispatch.
    #[error("dependency error: {0}")]
    Dependency(String),

    /// A UI interaction was not answered within its window.
    #[error("ui interaction timed out: {0}")]
    UiTimeout(String),

    /// Background task queue is at capacity.
    #[error("queue full: {0}")]
    QueueFull(String),

    /// Referenced entity (program, version, workflow, execution, ...) does
    /// not exist in the external persistence collaborator.
    #[error("not found: {0}")]
    NotFound(String),

    /// The external file-store collaborator failed a `put`/`get`/`list` call.
    #[error("file store error: {0}")]
    FileStore(String),

    /// Wraps `std::io::Error`.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, TaskGridError>;
