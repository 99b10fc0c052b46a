use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, TaskGridError};

/// Controls what file-system writes are permitted inside a sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxPolicy {
    /// Allow writes to paths outside the execution's sandbox root.
    pub allow_writes_outside_sandbox: bool,
    /// Disable all sandbox checks. Requires explicit per-execution opt-in.
    pub unsafe_mode: bool,
}

/// Validate that `target_path` is inside `sandbox_root`, subject to `policy`.
///
/// - If `policy.unsafe_mode` is true, all paths are allowed but a warning is
///   emitted via `tracing`.
/// - If `policy.allow_writes_outside_sandbox` is true, all paths are allowed.
/// - Otherwise, `target_path` must be a descendant of `sandbox_root`.
pub fn validate_path(
    policy: &SandboxPolicy,
    sandbox_root: &Path,
    target_path: &Path,
) -> Result<()> {
    if policy.unsafe_mode {
        warn!(
            target_path = %target_path.display(),
            sandbox_root = %sandbox_root.display(),
            "unsafe mode: allowing write outside sandbox"
        );
        return Ok(());
    }

    if policy.allow_writes_outside_sandbox {
        return Ok(());
    }

    // Canonicalize both paths to resolve symlinks and relative components.
    // If canonicalize fails (e.g. path doesn't exist yet), fall back to
    // checking the parent directory.
    let canonical_root = sandbox_root.canonicalize().map_err(|e| {
        TaskGridError::Materialization(format!(
            "failed to canonicalize sandbox root {}: {e}",
            sandbox_root.display()
        ))
    })?;

    let canonical_target = if target_path.exists() {
        target_path.canonicalize().map_err(|e| {
            TaskGridError::Materialization(format!(
                "failed to canonicalize target path {}: {e}",
                target_path.display()
            ))
        })?
    } else {
        // For paths that don't exist yet, canonicalize the parent.
        let parent = target_path.parent().ok_or_else(|| {
            TaskGridError::Materialization(format!(
                "target path has no parent: {}",
                target_path.display()
            ))
        })?;
        let canonical_parent = parent.canonicalize().map_err(|e| {
            TaskGridError::Materialization(format!(
                "failed to canonicalize parent of target path {}: {e}",
                parent.display()
            ))
        })?;
        canonical_parent.join(target_path.file_name().unwrap_or_default())
    };

    if canonical_target.starts_with(&canonical_root) {
        Ok(())
    } else {
        Err(TaskGridError::Materialization(format!(
            "path {} is outside sandbox root {}",
            canonical_target.display(),
            canonical_root.display()
        )))
    }
}
