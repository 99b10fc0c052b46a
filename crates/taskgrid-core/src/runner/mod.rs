//! Language Runner (C2): a polymorphic capability registry keyed by
//! `Program.language`, grounded in the teacher's `adapter/*` `canHandle`/
//! `build` shape and `resolve_binary` PATH discovery helper.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::domain::Language;
use crate::error::{Result, TaskGridError};

/// Mirrors the teacher's `BuiltCommand`, plus `expected_outputs` pointing
/// at the sandbox's `output/` directory.
#[derive(Debug, Clone)]
pub struct RunnerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
    pub expected_outputs: PathBuf,
}

/// Parameters and per-node environment a runner folds into the command it
/// builds. Parameters are serialized as the first CLI argument (JSON) so
/// the generated stub can ingest them.
pub struct RunnerContext<'a> {
    pub sandbox_root: &'a std::path::Path,
    pub entry_file: &'a str,
    pub parameters: &'a Value,
    pub node_env: &'a HashMap<String, String>,
}

pub trait LanguageRunner: Send + Sync {
    fn can_handle(&self, language: Language) -> bool;
    fn build(&self, ctx: &RunnerContext<'_>) -> Result<RunnerCommand>;
}

fn default_env(node_env: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = vec![("TASKGRID_EXECUTION".into(), "1".into())];
    for (k, v) in node_env {
        env.push((k.clone(), v.clone()));
    }
    env
}

/// Resolve a binary by checking configured override, then PATH candidates
/// (identical precedence to the teacher's `resolve_binary`).
fn resolve_binary(configured: Option<&str>, candidates: &[&str]) -> Option<PathBuf> {
    if let Some(path) = configured {
        let p = PathBuf::from(path);
        return if p.exists() { Some(p) } else { None };
    }
    for name in candidates {
        if let Ok(p) = which::which(name) {
            return Some(p);
        }
    }
    None
}

pub struct PythonRunner {
    pub configured_binary: Option<String>,
}

impl LanguageRunner for PythonRunner {
    fn can_handle(&self, language: Language) -> bool {
        matches!(language, Language::Python)
    }

    fn build(&self, ctx: &RunnerContext<'_>) -> Result<RunnerCommand> {
        let binary = resolve_binary(self.configured_binary.as_deref(), &["python3", "python"])
            .ok_or_else(|| TaskGridError::Runtime("no python interpreter found on PATH".into()))?;
        Ok(RunnerCommand {
            program: binary.display().to_string(),
            args: vec![ctx.entry_file.to_string(), ctx.parameters.to_string()],
            env: default_env(ctx.node_env),
            cwd: ctx.sandbox_root.to_path_buf(),
            expected_outputs: ctx.sandbox_root.join("output"),
        })
    }
}

pub struct NodeJsRunner {
    pub configured_binary: Option<String>,
}

impl LanguageRunner for NodeJsRunner {
    fn can_handle(&self, language: Language) -> bool {
        matches!(language, Language::Nodejs)
    }

    fn build(&self, ctx: &RunnerContext<'_>) -> Result<RunnerCommand> {
        let binary = resolve_binary(self.configured_binary.as_deref(), &["node"])
            .ok_or_else(|| TaskGridError::Runtime("no node runtime found on PATH".into()))?;
        Ok(RunnerCommand {
            program: binary.display().to_string(),
            args: vec![ctx.entry_file.to_string(), ctx.parameters.to_string()],
            env: default_env(ctx.node_env),
            cwd: ctx.sandbox_root.to_path_buf(),
            expected_outputs: ctx.sandbox_root.join("output"),
        })
    }
}

/// Compile-then-run: `javac` followed by `java`. `build()` returns the
/// command for the run step; compilation is performed by the process
/// supervisor as a distinct preceding step driven by `compile_command`.
pub struct JavaRunner {
    pub configured_binary: Option<String>,
    pub configured_compiler: Option<String>,
}

impl JavaRunner {
    pub fn compile_command(&self, ctx: &RunnerContext<'_>) -> Result<RunnerCommand> {
        let javac = resolve_binary(self.configured_compiler.as_deref(), &["javac"])
            .ok_or_else(|| TaskGridError::Runtime("no javac compiler found on PATH".into()))?;
        Ok(RunnerCommand {
            program: javac.display().to_string(),
            args: vec![ctx.entry_file.to_string()],
            env: default_env(ctx.node_env),
            cwd: ctx.sandbox_root.to_path_buf(),
            expected_outputs: ctx.sandbox_root.join("output"),
        })
    }
}

impl LanguageRunner for JavaRunner {
    fn can_handle(&self, language: Language) -> bool {
        matches!(language, Language::Java)
    }

    fn build(&self, ctx: &RunnerContext<'_>) -> Result<RunnerCommand> {
        let java = resolve_binary(self.configured_binary.as_deref(), &["java"])
            .ok_or_else(|| TaskGridError::Runtime("no java runtime found on PATH".into()))?;
        let main_class = ctx
            .entry_file
            .strip_suffix(".java")
            .unwrap_or(ctx.entry_file)
            .to_string();
        Ok(RunnerCommand {
            program: java.display().to_string(),
            args: vec![main_class, ctx.parameters.to_string()],
            env: default_env(ctx.node_env),
            cwd: ctx.sandbox_root.to_path_buf(),
            expected_outputs: ctx.sandbox_root.join("output"),
        })
    }
}

/// Build-then-run via `dotnet run`.
pub struct CsharpRunner {
    pub configured_binary: Option<String>,
}

impl LanguageRunner for CsharpRunner {
    fn can_handle(&self, language: Language) -> bool {
        matches!(language, Language::Csharp)
    }

    fn build(&self, ctx: &RunnerContext<'_>) -> Result<RunnerCommand> {
        let dotnet = resolve_binary(self.configured_binary.as_deref(), &["dotnet"])
            .ok_or_else(|| TaskGridError::Runtime("no dotnet sdk found on PATH".into()))?;
        Ok(RunnerCommand {
            program: dotnet.display().to_string(),
            args: vec!["run".to_string(), "--".to_string(), ctx.parameters.to_string()],
            env: default_env(ctx.node_env),
            cwd: ctx.sandbox_root.to_path_buf(),
            expected_outputs: ctx.sandbox_root.join("output"),
        })
    }
}

/// Selects the runner for `Program.language`, treating each as an opaque
/// builder (DESIGN NOTES: polymorphic language runners re-expressed as a
/// registry of capability providers).
pub struct RunnerRegistry {
    runners: Vec<Box<dyn LanguageRunner>>,
}

impl RunnerRegistry {
    pub fn with_defaults() -> Self {
        Self {
            runners: vec![
                Box::new(PythonRunner { configured_binary: None }),
                Box::new(CsharpRunner { configured_binary: None }),
                Box::new(JavaRunner {
                    configured_binary: None,
                    configured_compiler: None,
                }),
                Box::new(NodeJsRunner { configured_binary: None }),
            ],
        }
    }

    pub fn resolve(&self, language: Language) -> Result<&dyn LanguageRunner> {
        self.runners
            .iter()
            .find(|r| r.can_handle(language))
            .map(|r| r.as_ref())
            .ok_or_else(|| TaskGridError::Runtime(format!("no runner registered for language {}", language.as_str())))
    }
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn ctx<'a>(sandbox_root: &'a Path, entry: &'a str, params: &'a Value, env: &'a HashMap<String, String>) -> RunnerContext<'a> {
        RunnerContext {
            sandbox_root,
            entry_file: entry,
            parameters: params,
            node_env: env,
        }
    }

    #[test]
    fn registry_resolves_python() {
        let registry = RunnerRegistry::with_defaults();
        let runner = registry.resolve(Language::Python).unwrap();
        assert!(runner.can_handle(Language::Python));
        assert!(!runner.can_handle(Language::Java));
    }

    #[test]
    fn python_runner_uses_configured_binary_override() {
        let tmp = tempfile::tempdir().unwrap();
        let fake_interp = tmp.path().join("my-python");
        std::fs::write(&fake_interp, b"").unwrap();
        let runner = PythonRunner {
            configured_binary: Some(fake_interp.display().to_string()),
        };
        let params = json!({"a": 2});
        let env = HashMap::new();
        let cmd = runner.build(&ctx(tmp.path(), "main.py", &params, &env)).unwrap();
        assert_eq!(cmd.program, fake_interp.display().to_string());
        assert_eq!(cmd.args[0], "main.py");
    }

    #[test]
    fn python_runner_errors_when_binary_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = PythonRunner {
            configured_binary: Some(tmp.path().join("does-not-exist").display().to_string()),
        };
        let params = json!({});
        let env = HashMap::new();
        let err = runner.build(&ctx(tmp.path(), "main.py", &params, &env)).unwrap_err();
        assert!(matches!(err, TaskGridError::Runtime(_)));
    }

    #[test]
    fn java_runner_strips_java_extension_for_main_class() {
        let tmp = tempfile::tempdir().unwrap();
        let fake_java = tmp.path().join("java");
        std::fs::write(&fake_java, b"").unwrap();
        let runner = JavaRunner {
            configured_binary: Some(fake_java.display().to_string()),
            configured_compiler: None,
        };
        let params = json!({});
        let env = HashMap::new();
        let cmd = runner.build(&ctx(tmp.path(), "Main.java", &params, &env)).unwrap();
        assert_eq!(cmd.args[0], "Main");
    }
}
