//! File Materializer (C1): fetches a version's files from the external
//! file store into an isolated directory, plus UI-binding stub generation.
//! Grounded in the teacher's `worktree/mod.rs` isolated-directory lifecycle
//! and `security/sandbox.rs`'s path confinement.

pub mod stub;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::domain::{Language, Program, UiComponent, Version};
use crate::error::{Result, TaskGridError};
use crate::external::FileStore;
use crate::security::sandbox::{validate_path, SandboxPolicy};

use stub::{CsharpStubGenerator, GenericStubGenerator, PythonStubGenerator, StubGenerator};

/// An isolated, exclusively-owned working directory for one execution.
/// Released by calling `release()` from every exit path of C5 (normal
/// completion, failure, cancellation) — mirrors the teacher's
/// scoped-acquisition-with-guaranteed-release sandbox pattern.
pub struct Sandbox {
    root: PathBuf,
    released: bool,
}

impl Sandbox {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn validate_write(&self, policy: &SandboxPolicy, target: &Path) -> Result<()> {
        validate_path(policy, &self.root, target)
    }

    /// Fetches every `VersionFile` from `file_store` into `sandbox_root`,
    /// preserving relative paths, creates the `input/`/`output/`
    /// subdirectories, and (if `ui_component` is given) writes a generated
    /// UI-binding stub.
    pub async fn materialize(
        file_store: &dyn FileStore,
        program: &Program,
        version: &Version,
        ui_component: Option<&UiComponent>,
        sandbox_root: PathBuf,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&sandbox_root)
            .await
            .map_err(|e| TaskGridError::Materialization(format!("failed to create sandbox root: {e}")))?;

        for file in &version.files {
            let bytes = file_store.get(program.id, version.id, &file.path).await?;
            let dest = sandbox_root.join(&file.path);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| TaskGridError::Materialization(format!("failed to create {}: {e}", parent.display())))?;
            }
            tokio::fs::write(&dest, &bytes)
                .await
                .map_err(|e| TaskGridError::Materialization(format!("failed to write {}: {e}", dest.display())))?;
        }

        tokio::fs::create_dir_all(sandbox_root.join("input"))
            .await
            .map_err(|e| TaskGridError::Materialization(format!("failed to create input/: {e}")))?;
        tokio::fs::create_dir_all(sandbox_root.join("output"))
            .await
            .map_err(|e| TaskGridError::Materialization(format!("failed to create output/: {e}")))?;

        if let Some(component) = ui_component {
            write_stub(&sandbox_root, program.language, component).await?;
        }

        info!(
            program_id = %program.id,
            version_id = %version.id,
            sandbox_root = %sandbox_root.display(),
            "sandbox materialized"
        );

        Ok(Self {
            root: sandbox_root,
            released: false,
        })
    }

    /// Removes the sandbox directory. Safe to call more than once.
    pub async fn release(mut self) -> Result<()> {
        self.release_mut().await
    }

    async fn release_mut(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(sandbox_root = %self.root.display(), error = %e, "failed to remove sandbox directory");
                return Err(TaskGridError::Materialization(format!(
                    "failed to release sandbox {}: {e}",
                    self.root.display()
                )));
            }
        }
        Ok(())
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if !self.released {
            warn!(sandbox_root = %self.root.display(), "sandbox dropped without explicit release(); cleaning up best-effort");
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }
}

async fn write_stub(sandbox_root: &Path, language: Language, component: &UiComponent) -> Result<()> {
    let source = match language {
        Language::Python => PythonStubGenerator.render(component),
        Language::Csharp => CsharpStubGenerator.render(component),
        Language::Java | Language::Nodejs => GenericStubGenerator.render(component),
    };
    let file_name: &str = match language {
        Language::Python => PythonStubGenerator.file_name(),
        Language::Csharp => CsharpStubGenerator.file_name(),
        Language::Java | Language::Nodejs => GenericStubGenerator.file_name(),
    };
    let dest = sandbox_root.join(file_name);
    tokio::fs::write(&dest, source)
        .await
        .map_err(|e| TaskGridError::Materialization(format!("failed to write stub {}: {e}", dest.display())))
}
